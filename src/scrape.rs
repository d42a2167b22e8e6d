use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use tracing::info;

use crate::table::RawRow;

/// Column order of the raw snapshot CSV.
pub const RAW_COLUMNS: [&str; 8] = [
    "reference_code",
    "local_reference",
    "title",
    "price",
    "currency",
    "url",
    "collection",
    "objectID",
];

pub struct ScrapeConfig {
    pub app_id: String,
    pub api_key: String,
    pub index: String,
    pub category_filter: String,
    pub hits_per_page: usize,
    pub sleep_ms: u64,
    /// 0 means fetch every page.
    pub max_pages: usize,
}

impl ScrapeConfig {
    /// Credentials come from the environment so they never land in the repo:
    /// CATALOG_APP_ID, CATALOG_API_KEY (required), CATALOG_INDEX.
    pub fn from_env(
        category_filter: String,
        hits_per_page: usize,
        sleep_ms: u64,
        max_pages: usize,
    ) -> Result<Self> {
        let app_id = env_or("CATALOG_APP_ID", "96TW5XP97E");
        let index = env_or("CATALOG_INDEX", "prod_cartier_europe_fr_fr_products");
        let api_key = std::env::var("CATALOG_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .context("CATALOG_API_KEY must be set (search-index API key)")?;

        Ok(Self { app_id, api_key, index, category_filter, hits_per_page, sleep_ms, max_pages })
    }

    fn query_url(&self) -> String {
        format!(
            "https://{}.algolia.net/1/indexes/{}/query",
            self.app_id.to_lowercase(),
            self.index
        )
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Fetch the full current catalog snapshot: page 0 reports the total
/// hit/page counts, the remaining pages are fetched sequentially with a
/// fixed inter-page pause. Rows with an empty reference code are dropped
/// and duplicates deduplicated keep-first before returning.
pub async fn fetch_snapshot(cfg: &ScrapeConfig) -> Result<Vec<RawRow>> {
    let client = reqwest::Client::new();
    let url = cfg.query_url();

    let first = fetch_page(&client, cfg, &url, 0).await?;
    let nb_hits = first["nbHits"].as_u64().unwrap_or(0);
    let nb_pages = first["nbPages"].as_u64().unwrap_or(1) as usize;

    let pages_to_fetch = if cfg.max_pages > 0 {
        nb_pages.min(cfg.max_pages)
    } else {
        nb_pages
    };
    info!(
        "nbHits={}, nbPages={}, hitsPerPage={}, filter=categoryId:{}",
        nb_hits, nb_pages, cfg.hits_per_page, cfg.category_filter
    );

    let pb = ProgressBar::new(pages_to_fetch as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} pages ({per_sec})")?
            .progress_chars("=> "),
    );

    let mut rows: Vec<RawRow> = Vec::new();
    append_hits(&first, &mut rows);
    pb.inc(1);

    for page in 1..pages_to_fetch {
        tokio::time::sleep(Duration::from_millis(cfg.sleep_ms)).await;
        let data = fetch_page(&client, cfg, &url, page).await?;
        append_hits(&data, &mut rows);
        pb.inc(1);
    }
    pb.finish_and_clear();

    let before = rows.len();
    let mut seen: HashSet<String> = HashSet::new();
    rows.retain(|row| {
        let reference = row
            .get("reference_code")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        !reference.is_empty() && seen.insert(reference)
    });
    info!("[QA] drop empty reference_code + dedup: {} -> {}", before, rows.len());

    Ok(rows)
}

async fn fetch_page(
    client: &reqwest::Client,
    cfg: &ScrapeConfig,
    url: &str,
    page: usize,
) -> Result<Value> {
    let payload = json!({
        "attributesToRetrieve": ["*"],
        "facets": ["*"],
        "filters": format!("categoryId:{}", cfg.category_filter),
        "hitsPerPage": cfg.hits_per_page,
        "maxValuesPerFacet": 100,
        "page": page,
    });

    let resp = client
        .post(url)
        .header("X-Algolia-Application-Id", &cfg.app_id)
        .header("X-Algolia-API-Key", &cfg.api_key)
        .json(&payload)
        .send()
        .await
        .with_context(|| format!("Query failed for page {}", page))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let head: String = body.chars().take(800).collect();
        bail!("HTTP {}: {}", status, head);
    }

    let data: Value = resp.json().await.context("Response was not JSON")?;
    if data.get("hits").is_none() {
        bail!("Unexpected response (no 'hits'): keys={:?}", object_keys(&data));
    }
    Ok(data)
}

fn object_keys(v: &Value) -> Vec<&String> {
    v.as_object().map(|o| o.keys().collect()).unwrap_or_default()
}

fn append_hits(data: &Value, rows: &mut Vec<RawRow>) {
    if let Some(hits) = data["hits"].as_array() {
        rows.extend(hits.iter().map(hit_to_row));
    }
}

/// Map one search hit onto the raw snapshot columns. Each field is picked
/// through a fallback chain because the upstream schema is inconsistent
/// between items.
fn hit_to_row(hit: &Value) -> RawRow {
    let reference_code = pick_upper(
        hit,
        &["globalReference", "shortGlobalReference", "localReference", "objectID"],
    );
    let local_reference = pick_upper(hit, &["localReference", "shortGlobalReference"]);
    let title = pick_str(hit, &["productName", "englishProductName", "title", "productModel"]);
    let currency = {
        let c = pick_upper(hit, &["priceCurrency", "currency"]);
        if c.is_empty() { "EUR".to_string() } else { c }
    };
    let url = pick_str(hit, &["newPdpLink", "pdpLink", "oldPdpLink"]);
    let collection = pick_collection(hit);
    let object_id = pick_str(hit, &["objectID"]);

    RawRow::from([
        ("reference_code".to_string(), Value::String(reference_code)),
        ("local_reference".to_string(), Value::String(local_reference)),
        ("title".to_string(), Value::String(title)),
        ("price".to_string(), pick_price(hit)),
        ("currency".to_string(), Value::String(currency)),
        ("url".to_string(), Value::String(url)),
        ("collection".to_string(), Value::String(collection)),
        ("objectID".to_string(), Value::String(object_id)),
    ])
}

fn pick_str(hit: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|k| hit.get(*k).and_then(|v| v.as_str()))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_default()
}

fn pick_upper(hit: &Value, keys: &[&str]) -> String {
    pick_str(hit, keys).to_uppercase()
}

/// Numeric `priceValue` preferred; otherwise pass the display string
/// through untouched and let the normalizer's price parser deal with it.
fn pick_price(hit: &Value) -> Value {
    if let Some(n) = hit.get("priceValue").filter(|v| v.is_number()) {
        return n.clone();
    }
    match hit.get("price").and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Value::String(s.trim().to_string()),
        _ => Value::Null,
    }
}

fn pick_collection(hit: &Value) -> String {
    let direct = pick_str(
        hit,
        &[
            "collectionProductLine",
            "englishCollectionProductLine",
            "englishCollectionName",
            "collectionText",
        ],
    );
    if !direct.is_empty() {
        return direct;
    }
    hit.get("_collections")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}
