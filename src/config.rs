use std::collections::BTreeMap;

/// Pipeline-wide configuration, passed explicitly into each stage so tests
/// can run with their own values instead of module-level constants.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Site origin prepended to relative product URLs.
    pub site_origin: String,
    /// Locale path segment expected at the start of product URLs, e.g. "/fr-fr".
    pub locale_prefix: String,
    /// Market tag used when no locale token can be read from a URL.
    pub default_market: String,
    /// Approximate EUR conversion rates per ISO currency code. Currencies
    /// missing from this table yield an absent EUR price, never a guess.
    pub exchange_rates: BTreeMap<String, f64>,
    /// Ascending price-segment breakpoints in EUR (three cuts, four tiers).
    pub segment_thresholds: [f64; 3],
    /// Material label assigned when the source text is entirely empty.
    pub material_empty_fallback: String,
    /// Size label assigned when no size keyword matches (also the
    /// empty-input label).
    pub size_fallback: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let exchange_rates = BTreeMap::from(
            [
                ("EUR", 1.0),
                ("USD", 0.92),
                ("GBP", 1.17),
                ("CHF", 1.05),
                ("CNY", 0.13),
                ("AED", 0.25),
                ("JPY", 0.0065),
            ]
            .map(|(k, v)| (k.to_string(), v)),
        );

        Self {
            site_origin: "https://www.cartier.com".to_string(),
            locale_prefix: "/fr-fr".to_string(),
            default_market: "fr-fr".to_string(),
            exchange_rates,
            segment_thresholds: [5_000.0, 15_000.0, 30_000.0],
            material_empty_fallback: "Unknown".to_string(),
            size_fallback: "Unknown".to_string(),
        }
    }
}
