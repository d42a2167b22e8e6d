use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static DIGIT_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());
static MARKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"://[^/]+/([a-z]{2}-[a-z]{2})(?:/|$)").unwrap());

/// Loose scalar → trimmed text. Null and non-scalar values become "".
pub fn text(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Parse a display price into an integer-valued float.
///
/// Numbers pass through unchanged. Text is stripped of the euro sign,
/// NBSP/narrow-NBSP and spaces, then BOTH "," and "." are removed: the
/// source always renders integer EUR amounts, so either character can only
/// be a thousands separator. "5,000€", "5 000 €" and "5000" all yield
/// 5000.0. This is deliberately not a general numeric parser.
pub fn parse_price(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_price_text(s),
        _ => None,
    }
}

fn parse_price_text(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, '€' | '\u{00a0}' | '\u{202f}' | ' ' | ',' | '.'))
        .collect();
    let run = DIGIT_RUN_RE.find(&cleaned)?;
    run.as_str().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Absolute URLs pass through; relative paths get the locale prefix (when
/// not already present) and the site origin. Empty/absent input yields "".
pub fn normalize_url(raw: &Value, origin: &str, locale_prefix: &str) -> String {
    let s = text(raw);
    if s.is_empty() {
        return String::new();
    }
    if s.starts_with("http://") || s.starts_with("https://") {
        return s;
    }
    let path = if s.starts_with(locale_prefix) {
        s
    } else if s.starts_with('/') {
        format!("{}{}", locale_prefix, s)
    } else {
        format!("{}/{}", locale_prefix, s)
    };
    format!("{}{}", origin, path)
}

/// Extract the `xx-xx` locale token from a URL path, e.g.
/// "https://www.cartier.com/fr-fr/..." → "fr-fr". Falls back to `default`.
pub fn extract_market(url: &str, default: &str) -> String {
    MARKET_RE
        .captures(&url.to_lowercase())
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| default.to_string())
}

/// Upper-case, trim, and strip any configured vendor prefix so the same
/// product matches across snapshot vintages that encode codes differently.
pub fn clean_reference(raw: &Value, strip_prefixes: &BTreeSet<String>) -> String {
    let s = text(raw).to_uppercase();
    for prefix in strip_prefixes {
        if let Some(rest) = s.strip_prefix(prefix.as_str()) {
            return rest.trim().to_string();
        }
    }
    s
}
