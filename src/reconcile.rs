use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PipelineConfig;
use crate::normalize::CanonicalRecord;
use crate::summarize::median;

const SEGMENT_LABELS: [&str; 4] =
    ["Entry Level", "Accessible Luxury", "High Luxury", "Haute Horlogerie"];

/// One product matched across both snapshots, with its price movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledRecord {
    pub reference_code: String,
    pub collection_canonical: String,
    pub material_label: String,
    pub size_label: String,
    pub title: String,
    /// Currency the before-snapshot listed natively. Both price columns are
    /// EUR regardless; this records where the converted baseline came from.
    pub original_currency: String,
    pub price_eur_before: Option<f64>,
    pub price_eur_after: Option<f64>,
    pub price_change_abs: Option<f64>,
    pub price_change_pct: Option<f64>,
    pub price_segment: Option<String>,
}

/// Inner-join two canonical tables on reference code and compute per-product
/// deltas. Records present in only one snapshot are excluded: the reconciled
/// set measures like-for-like movement on the stable product population, not
/// catalog churn. Output is sorted by percent change, largest increase
/// first, records without a computable percentage last.
pub fn reconcile(
    before: &[CanonicalRecord],
    after: &[CanonicalRecord],
    cfg: &PipelineConfig,
) -> Vec<ReconciledRecord> {
    let after_by_ref: HashMap<&str, &CanonicalRecord> =
        after.iter().map(|r| (r.reference_code.as_str(), r)).collect();

    let mut out: Vec<ReconciledRecord> = before
        .iter()
        .filter_map(|b| {
            let a = after_by_ref.get(b.reference_code.as_str())?;
            Some(join_pair(b, a, cfg))
        })
        .collect();

    out.sort_by(|a, b| match (a.price_change_pct, b.price_change_pct) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    info!(
        "Reconciled {} of {} before-rows against {} after-rows",
        out.len(),
        before.len(),
        after.len()
    );
    out
}

fn join_pair(
    before: &CanonicalRecord,
    after: &CanonicalRecord,
    cfg: &PipelineConfig,
) -> ReconciledRecord {
    let price_change_abs = match (before.price_eur, after.price_eur) {
        (Some(b), Some(a)) => Some(a - b),
        _ => None,
    };
    // Undefined when the base is zero or either operand is absent; this must
    // surface as an absent value, not a division panic or a silent zero.
    let price_change_pct = match (before.price_eur, after.price_eur) {
        (Some(b), Some(a)) if b != 0.0 => Some(round2((a - b) / b * 100.0)),
        _ => None,
    };
    let price_segment = after
        .price_eur
        .map(|p| segment_for(p, &cfg.segment_thresholds).to_string());

    ReconciledRecord {
        reference_code: before.reference_code.clone(),
        collection_canonical: before.collection_canonical.clone(),
        material_label: before.material_label.clone(),
        size_label: before.size_label.clone(),
        title: after.title.clone(),
        original_currency: before.currency.clone(),
        price_eur_before: before.price_eur,
        price_eur_after: after.price_eur,
        price_change_abs,
        price_change_pct,
        price_segment,
    }
}

fn segment_for(price: f64, thresholds: &[f64; 3]) -> &'static str {
    if price < thresholds[0] {
        SEGMENT_LABELS[0]
    } else if price < thresholds[1] {
        SEGMENT_LABELS[1]
    } else if price < thresholds[2] {
        SEGMENT_LABELS[2]
    } else {
        SEGMENT_LABELS[3]
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ── Derived exports ──

/// Overall reconciliation statistics, one metric per row.
#[derive(Debug, Clone, Serialize)]
pub struct StatRow {
    pub metric: String,
    pub value: Option<f64>,
}

pub fn recon_stats(records: &[ReconciledRecord]) -> Vec<StatRow> {
    let mut pcts: Vec<f64> = records.iter().filter_map(|r| r.price_change_pct).collect();
    let mean = if pcts.is_empty() {
        None
    } else {
        Some(pcts.iter().sum::<f64>() / pcts.len() as f64)
    };
    let max = pcts.iter().copied().fold(None, |acc: Option<f64>, v| {
        Some(acc.map_or(v, |m| m.max(v)))
    });
    let min = pcts.iter().copied().fold(None, |acc: Option<f64>, v| {
        Some(acc.map_or(v, |m| m.min(v)))
    });
    let med = median(&mut pcts);

    vec![
        StatRow { metric: "Total Products".into(), value: Some(records.len() as f64) },
        StatRow { metric: "Average Increase %".into(), value: mean },
        StatRow { metric: "Median Increase %".into(), value: med },
        StatRow { metric: "Max Increase %".into(), value: max },
        StatRow { metric: "Min Increase %".into(), value: min },
    ]
}

/// Per-collection aggregates over the reconciled set.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStatRow {
    pub collection_canonical: String,
    pub avg_change_pct: Option<f64>,
    pub median_change_pct: Option<f64>,
    pub n_products: usize,
    pub avg_price_eur_before: Option<f64>,
    pub avg_price_eur_after: Option<f64>,
}

/// Group the reconciled records by canonical collection, in first-seen
/// order, and average the movement within each group. Absent values stay
/// out of every average rather than counting as zero.
pub fn collection_stats(records: &[ReconciledRecord]) -> Vec<CollectionStatRow> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&ReconciledRecord>)> = Vec::new();
    for r in records {
        match index.get(r.collection_canonical.as_str()) {
            Some(&i) => groups[i].1.push(r),
            None => {
                index.insert(r.collection_canonical.as_str(), groups.len());
                groups.push((r.collection_canonical.as_str(), vec![r]));
            }
        }
    }

    groups
        .into_iter()
        .map(|(collection, members)| {
            let mut pcts: Vec<f64> =
                members.iter().filter_map(|r| r.price_change_pct).collect();
            CollectionStatRow {
                collection_canonical: collection.to_string(),
                avg_change_pct: mean_of(&pcts).map(round2),
                median_change_pct: median(&mut pcts).map(round2),
                n_products: members.len(),
                avg_price_eur_before: mean_of(
                    &members.iter().filter_map(|r| r.price_eur_before).collect::<Vec<_>>(),
                )
                .map(round2),
                avg_price_eur_after: mean_of(
                    &members.iter().filter_map(|r| r.price_eur_after).collect::<Vec<_>>(),
                )
                .map(round2),
            }
        })
        .collect()
}

fn mean_of(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Long-format export: two (year, price) points per reconciled product.
#[derive(Debug, Clone, Serialize)]
pub struct TimeseriesRow {
    pub reference_code: String,
    pub collection_canonical: String,
    pub material_label: String,
    pub size_label: String,
    pub price_segment: Option<String>,
    pub original_currency: String,
    pub title: String,
    pub year: i32,
    pub price_eur: Option<f64>,
}

pub fn timeseries(
    records: &[ReconciledRecord],
    year_before: i32,
    year_after: i32,
) -> Vec<TimeseriesRow> {
    let mut rows = Vec::with_capacity(records.len() * 2);
    for r in records {
        for (year, price) in [(year_before, r.price_eur_before), (year_after, r.price_eur_after)] {
            rows.push(TimeseriesRow {
                reference_code: r.reference_code.clone(),
                collection_canonical: r.collection_canonical.clone(),
                material_label: r.material_label.clone(),
                size_label: r.size_label.clone(),
                price_segment: r.price_segment.clone(),
                original_currency: r.original_currency.clone(),
                title: r.title.clone(),
                year,
                price_eur: price,
            });
        }
    }
    rows
}
