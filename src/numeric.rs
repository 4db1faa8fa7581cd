//! Numeric normalization for user- and API-supplied scalars
//!
//! Absent or unparseable input comes back as `None` (the "not a number"
//! signal); nothing here panics or returns an error.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref PERCENT: Regex =
        Regex::new(r"(\d+(?:[.,]\d+)?)%").expect("valid percent regex");
}

/// Parse a JSON scalar. Numbers pass through when finite; strings go
/// through [`parse_text`]; anything else is not a number.
pub fn parse_number(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_text(s),
        _ => None,
    }
}

/// Parse free text such as `" 1 250,5 "`: whitespace is dropped and one
/// decimal comma becomes a decimal point.
pub fn parse_text(raw: &str) -> Option<f64> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    compact
        .replacen(',', ".", 1)
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Round to cents, ties away from zero. NaN stays NaN.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// First `<number>%` in the text, e.g. `"fee was 1,5% i think"` → `1.5`
pub fn extract_percent(text: &str) -> Option<f64> {
    PERCENT
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_text(m.as_str()))
}
