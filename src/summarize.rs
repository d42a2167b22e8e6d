use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::normalize::CanonicalRecord;

/// Per-(year, collection) aggregate over one canonical table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub year: i32,
    pub collection_canonical: String,
    pub n_total: usize,
    pub n_priced: usize,
    pub avg_price_eur: Option<f64>,
    pub median_price_eur: Option<f64>,
    pub share_in_year: f64,
}

/// Group a canonical table by collection: counts, priced-row mean/median
/// (absent for groups with no priced rows), and each group's share of the
/// year's total. Output sorted by `n_total` descending; ties keep
/// first-seen group order (stable sort).
pub fn summarize_by_collection(records: &[CanonicalRecord], year: i32) -> Vec<CollectionSummary> {
    struct Group {
        label: String,
        n_total: usize,
        prices: Vec<f64>,
    }

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Group> = Vec::new();

    for r in records {
        let i = *index.entry(r.collection_canonical.clone()).or_insert_with(|| {
            groups.push(Group {
                label: r.collection_canonical.clone(),
                n_total: 0,
                prices: Vec::new(),
            });
            groups.len() - 1
        });
        groups[i].n_total += 1;
        if let Some(p) = r.price_eur {
            groups[i].prices.push(p);
        }
    }

    let year_total: usize = groups.iter().map(|g| g.n_total).sum();

    let mut out: Vec<CollectionSummary> = groups
        .into_iter()
        .map(|mut g| {
            let avg = if g.prices.is_empty() {
                None
            } else {
                Some(g.prices.iter().sum::<f64>() / g.prices.len() as f64)
            };
            let med = median(&mut g.prices);
            CollectionSummary {
                year,
                collection_canonical: g.label,
                n_total: g.n_total,
                n_priced: g.prices.len(),
                avg_price_eur: avg,
                median_price_eur: med,
                share_in_year: g.n_total as f64 / year_total as f64,
            }
        })
        .collect();

    out.sort_by(|a, b| b.n_total.cmp(&a.n_total));
    out
}

/// Median of the given values; sorts in place. Empty input → None. Even
/// lengths average the two middle values.
pub(crate) fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}
