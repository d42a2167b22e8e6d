use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::classify::Classifier;
use crate::config::PipelineConfig;
use crate::parse;
use crate::table::{RawRow, RawTable};

/// Required input columns are missing. Raised before any row processing so
/// a malformed snapshot fails whole, not row by row.
#[derive(Debug, Error)]
#[error("{table}: missing required columns {missing:?} | found: {found:?}")]
pub struct SchemaError {
    pub table: String,
    pub missing: Vec<String>,
    pub found: Vec<String>,
}

/// How a native-currency price becomes an EUR price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencyStrategy {
    /// EUR prices pass through; anything else becomes absent.
    EurOnly,
    /// Multiply by the configured per-currency rate; currencies missing
    /// from the rate table become absent rather than silently unconverted.
    FixedRates,
}

/// Shape of one snapshot vintage: which columns must exist, which column
/// carries the join identifier, which vendor prefixes to strip from it,
/// and how to resolve prices to EUR.
#[derive(Debug, Clone)]
pub struct SnapshotSpec {
    pub year: i32,
    pub required_columns: &'static [&'static str],
    pub reference_column: &'static str,
    pub text_columns: &'static [&'static str],
    pub strip_prefixes: BTreeSet<String>,
    pub currency_strategy: CurrencyStrategy,
}

impl SnapshotSpec {
    /// 2022 baseline extraction: reference codes carry the vendor "CR"
    /// prefix, prices come in several currencies.
    pub fn baseline_2022() -> Self {
        Self {
            year: 2022,
            required_columns: &["reference_code", "title", "price", "currency", "url", "collection"],
            reference_column: "reference_code",
            text_columns: &["collection", "title", "url"],
            strip_prefixes: BTreeSet::from(["CR".to_string()]),
            currency_strategy: CurrencyStrategy::FixedRates,
        }
    }

    /// 2026 current extraction: the short local reference is already the
    /// comparable form, prices are EUR display strings.
    pub fn current_2026() -> Self {
        Self {
            year: 2026,
            required_columns: &[
                "reference_code",
                "local_reference",
                "title",
                "price",
                "currency",
                "url",
                "collection",
                "objectID",
            ],
            reference_column: "local_reference",
            text_columns: &["collection", "title", "url"],
            strip_prefixes: BTreeSet::new(),
            currency_strategy: CurrencyStrategy::EurOnly,
        }
    }
}

/// One normalized catalog row. Field order is the output column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub year: i32,
    pub reference_code: String,
    pub title: String,
    pub collection_raw: String,
    pub collection_canonical: String,
    pub material_label: String,
    pub size_label: String,
    pub currency: String,
    pub price_native: Option<f64>,
    pub price_eur: Option<f64>,
    pub market: String,
    pub url: String,
}

/// Before/after row counts, reported as diagnostics only.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeReport {
    pub rows_in: usize,
    pub dropped_empty_ref: usize,
    pub dropped_duplicate: usize,
    pub rows_out: usize,
    pub missing_price_ratio: f64,
}

/// Validate the manifest against the snapshot's header columns, not against
/// any particular row, so an empty-but-well-formed file still passes.
pub fn check_schema(
    columns: &[String],
    snap: &SnapshotSpec,
    table: &str,
) -> Result<(), SchemaError> {
    let missing: Vec<String> = snap
        .required_columns
        .iter()
        .filter(|c| !columns.iter().any(|f| f == *c))
        .map(|c| c.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SchemaError { table: table.to_string(), missing, found: columns.to_vec() })
    }
}

/// Normalize one raw snapshot into a canonical table: schema check first,
/// then per-row parsing and classification, then drop empty references and
/// deduplicate keeping the first occurrence in input order.
pub fn normalize(
    table: &RawTable,
    snap: &SnapshotSpec,
    cfg: &PipelineConfig,
) -> Result<(Vec<CanonicalRecord>, NormalizeReport), SchemaError> {
    check_schema(&table.columns, snap, &format!("raw_{}", snap.year))?;
    let rows = &table.rows;

    let collection_cls = Classifier::collection();
    let material_cls = Classifier::material(&cfg.material_empty_fallback);
    let size_cls = Classifier::size(&cfg.size_fallback);

    let mut records = Vec::with_capacity(rows.len());
    let mut dropped_empty_ref = 0usize;

    for row in rows {
        let reference_code =
            parse::clean_reference(value_of(row, snap.reference_column), &snap.strip_prefixes);
        if reference_code.is_empty() {
            dropped_empty_ref += 1;
            continue;
        }

        let title = parse::text(value_of(row, "title"));
        let collection_raw = parse::text(value_of(row, "collection"));

        let mut currency = parse::text(value_of(row, "currency")).to_uppercase();
        if currency.is_empty() {
            currency = "EUR".to_string();
        }

        let price_native = parse::parse_price(value_of(row, "price"));
        let price_eur = to_eur(price_native, &currency, snap.currency_strategy, cfg);

        let url = parse::normalize_url(value_of(row, "url"), &cfg.site_origin, &cfg.locale_prefix);
        let market = parse::extract_market(&url, &cfg.default_market);

        let fields: Vec<String> = snap
            .text_columns
            .iter()
            .map(|c| match *c {
                "collection" => collection_raw.clone(),
                "title" => title.clone(),
                "url" => url.clone(),
                other => parse::text(value_of(row, other)),
            })
            .collect();
        let field_refs: Vec<&str> = fields.iter().map(String::as_str).collect();

        records.push(CanonicalRecord {
            year: snap.year,
            reference_code,
            title,
            collection_raw,
            collection_canonical: collection_cls.classify(&field_refs),
            material_label: material_cls.classify(&field_refs),
            size_label: size_cls.classify(&field_refs),
            currency,
            price_native,
            price_eur,
            market,
            url,
        });
    }

    let kept = records.len();
    let records = dedup_keep_first(records);
    let dropped_duplicate = kept - records.len();

    let missing_price = records.iter().filter(|r| r.price_eur.is_none()).count();
    let missing_price_ratio = if records.is_empty() {
        0.0
    } else {
        missing_price as f64 / records.len() as f64
    };

    let report = NormalizeReport {
        rows_in: rows.len(),
        dropped_empty_ref,
        dropped_duplicate,
        rows_out: records.len(),
        missing_price_ratio,
    };
    info!(
        "[QA] year={} drop empty + dedup by reference: {} -> {} (empty {}, dup {}), missing price_eur ratio {:.3}",
        snap.year, report.rows_in, report.rows_out, dropped_empty_ref, dropped_duplicate,
        missing_price_ratio
    );

    Ok((records, report))
}

/// Keep the first record per reference code, in input order. Idempotent.
pub fn dedup_keep_first(records: Vec<CanonicalRecord>) -> Vec<CanonicalRecord> {
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|r| seen.insert(r.reference_code.clone()))
        .collect()
}

fn value_of<'a>(row: &'a RawRow, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&Value::Null)
}

fn to_eur(
    price_native: Option<f64>,
    currency: &str,
    strategy: CurrencyStrategy,
    cfg: &PipelineConfig,
) -> Option<f64> {
    let converted = match strategy {
        CurrencyStrategy::EurOnly => {
            if currency == "EUR" {
                price_native
            } else {
                None
            }
        }
        CurrencyStrategy::FixedRates => match cfg.exchange_rates.get(currency) {
            Some(rate) => price_native.map(|p| p * rate),
            None => None,
        },
    };
    converted.filter(|v| v.is_finite() && *v >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> RawRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn table(rows: Vec<RawRow>) -> RawTable {
        let columns = rows.first().map(|r| r.keys().cloned().collect()).unwrap_or_default();
        RawTable { columns, rows }
    }

    fn raw_2026(reference: &str, price: &str) -> RawRow {
        row(&[
            ("reference_code", json!(format!("CR{reference}"))),
            ("local_reference", json!(reference)),
            ("title", json!("Tank Must watch, small model")),
            ("price", json!(price)),
            ("currency", json!("EUR")),
            ("url", json!("/product/tank-must")),
            ("collection", json!("Tank")),
            ("objectID", json!(reference)),
        ])
    }

    #[test]
    fn schema_error_lists_every_missing_column() {
        let columns = vec!["title".to_string(), "price".to_string()];
        let err = check_schema(&columns, &SnapshotSpec::current_2026(), "raw_2026").unwrap_err();
        for col in ["reference_code", "local_reference", "currency", "url", "collection", "objectID"] {
            assert!(err.missing.iter().any(|m| m == col), "missing should list {col}");
        }
        assert!(!err.missing.iter().any(|m| m == "title"));
    }

    #[test]
    fn well_formed_header_with_zero_rows_normalizes_to_empty() {
        let cfg = PipelineConfig::default();
        let snap = SnapshotSpec::current_2026();
        let empty = RawTable {
            columns: snap.required_columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        };
        let (records, report) = normalize(&empty, &snap, &cfg).unwrap();
        assert!(records.is_empty());
        assert_eq!(report.rows_in, 0);
        assert_eq!(report.rows_out, 0);
    }

    #[test]
    fn normalizes_a_2026_row() {
        let cfg = PipelineConfig::default();
        let (records, report) =
            normalize(&table(vec![raw_2026("WT100015", "5,000€")]), &SnapshotSpec::current_2026(), &cfg)
                .unwrap();
        assert_eq!(report.rows_out, 1);
        let r = &records[0];
        assert_eq!(r.year, 2026);
        assert_eq!(r.reference_code, "WT100015");
        assert_eq!(r.collection_canonical, "Tank");
        assert_eq!(r.size_label, "Small");
        assert_eq!(r.price_native, Some(5000.0));
        assert_eq!(r.price_eur, Some(5000.0));
        assert_eq!(r.url, "https://www.cartier.com/fr-fr/product/tank-must");
        assert_eq!(r.market, "fr-fr");
    }

    #[test]
    fn vendor_prefix_makes_vintages_comparable() {
        let cfg = PipelineConfig::default();
        let raw = row(&[
            ("reference_code", json!("CRWT100015")),
            ("title", json!("Tank")),
            ("price", json!("5000")),
            ("currency", json!("EUR")),
            ("url", json!("")),
            ("collection", json!("Tank")),
        ]);
        let (records, _) = normalize(&table(vec![raw]), &SnapshotSpec::baseline_2022(), &cfg).unwrap();
        assert_eq!(records[0].reference_code, "WT100015");
    }

    #[test]
    fn empty_reference_rows_are_dropped() {
        let cfg = PipelineConfig::default();
        let rows = vec![raw_2026("WT100015", "5000"), raw_2026("", "9000")];
        let (records, report) = normalize(&table(rows), &SnapshotSpec::current_2026(), &cfg).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(report.dropped_empty_ref, 1);
    }

    #[test]
    fn dedup_keeps_first_occurrence_in_input_order() {
        let cfg = PipelineConfig::default();
        let rows = vec![raw_2026("WT100015", "5000"), raw_2026("WT100015", "9000")];
        let (records, report) = normalize(&table(rows), &SnapshotSpec::current_2026(), &cfg).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].price_eur, Some(5000.0), "first row wins, not highest price");
        assert_eq!(report.dropped_duplicate, 1);
    }

    #[test]
    fn dedup_is_idempotent() {
        let cfg = PipelineConfig::default();
        let rows = vec![
            raw_2026("A1", "1000"),
            raw_2026("B2", "2000"),
            raw_2026("A1", "3000"),
        ];
        let (records, _) = normalize(&table(rows), &SnapshotSpec::current_2026(), &cfg).unwrap();
        let once = dedup_keep_first(records.clone());
        let twice = dedup_keep_first(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once, records);
    }

    #[test]
    fn unparseable_price_keeps_the_record() {
        let cfg = PipelineConfig::default();
        let (records, report) =
            normalize(
                &table(vec![raw_2026("WT100015", "price on request")]),
                &SnapshotSpec::current_2026(),
                &cfg,
            )
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].price_native, None);
        assert_eq!(records[0].price_eur, None);
        assert!((report.missing_price_ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn eur_only_blanks_foreign_currency() {
        let cfg = PipelineConfig::default();
        let mut raw = raw_2026("WT100015", "5000");
        raw.insert("currency".to_string(), json!("USD"));
        let (records, _) = normalize(&table(vec![raw]), &SnapshotSpec::current_2026(), &cfg).unwrap();
        assert_eq!(records[0].price_native, Some(5000.0));
        assert_eq!(records[0].price_eur, None);
    }

    #[test]
    fn fixed_rates_convert_known_currencies_only() {
        let cfg = PipelineConfig::default();
        let base = |cur: &str| {
            row(&[
                ("reference_code", json!("CRWT1")),
                ("title", json!("Santos")),
                ("price", json!("10000")),
                ("currency", json!(cur)),
                ("url", json!("")),
                ("collection", json!("Santos")),
            ])
        };
        let snap = SnapshotSpec::baseline_2022();

        let (records, _) = normalize(&table(vec![base("USD")]), &snap, &cfg).unwrap();
        assert_eq!(records[0].price_eur, Some(9200.0));

        // Unknown currency: absent, never a silent 1.0 conversion.
        let (records, _) = normalize(&table(vec![base("XAU")]), &snap, &cfg).unwrap();
        assert_eq!(records[0].price_native, Some(10000.0));
        assert_eq!(records[0].price_eur, None);
    }

    #[test]
    fn end_to_end_two_snapshot_scenario() {
        use crate::reconcile;
        use crate::summarize;

        let cfg = PipelineConfig::default();
        let before_raw = |reference: &str, price: &str| {
            row(&[
                ("reference_code", json!(format!("CR{reference}"))),
                ("title", json!("Tank watch")),
                ("price", json!(price)),
                ("currency", json!("EUR")),
                ("url", json!("/product/x")),
                ("collection", json!("Tank")),
            ])
        };

        let (before, _) = normalize(
            &table(vec![before_raw("A1", "5,000€"), before_raw("B2", "")]),
            &SnapshotSpec::baseline_2022(),
            &cfg,
        )
        .unwrap();
        let (after, _) = normalize(
            &table(vec![raw_2026("A1", "6 000 €"), raw_2026("C3", "1000")]),
            &SnapshotSpec::current_2026(),
            &cfg,
        )
        .unwrap();

        let matched = reconcile::reconcile(&before, &after, &cfg);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].reference_code, "A1");
        assert_eq!(matched[0].price_change_abs, Some(1000.0));
        assert_eq!(matched[0].price_change_pct, Some(20.0));

        // B2 and C3 are excluded from reconciliation but still aggregate
        // within their own snapshot year.
        let summary_2022 = summarize::summarize_by_collection(&before, 2022);
        assert_eq!(summary_2022[0].n_total, 2);
        assert_eq!(summary_2022[0].n_priced, 1);
        let summary_2026 = summarize::summarize_by_collection(&after, 2026);
        assert_eq!(summary_2026[0].n_total, 2);
        assert_eq!(summary_2026[0].n_priced, 2);
    }

    #[test]
    fn missing_currency_defaults_to_eur() {
        let cfg = PipelineConfig::default();
        let mut raw = raw_2026("WT100015", "5000");
        raw.insert("currency".to_string(), json!(""));
        let (records, _) = normalize(&table(vec![raw]), &SnapshotSpec::current_2026(), &cfg).unwrap();
        assert_eq!(records[0].currency, "EUR");
        assert_eq!(records[0].price_eur, Some(5000.0));
    }
}
