//! Cell-level normalization for broker exports.
//!
//! Broker spreadsheets carry currency symbols, parenthesized negatives,
//! percent signs, non-breaking spaces, zero-width characters and a handful
//! of "no value" tokens. Everything here is total: a value that cannot be
//! normalized comes back as `None`, never as an error.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Ticker shape: 1-7 letters, optional `.`/`-` separated 1-3 char suffix
/// (share class or exchange suffix, e.g. BRK.B, RDS-A).
static TICKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{1,7}(?:[.\-][A-Z0-9]{1,3})?$").unwrap());

static MDY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").unwrap());

static ISO_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").unwrap());

/// Strip BOM, non-breaking spaces and zero-width characters.
fn strip_invisible(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '\u{feff}' | '\u{200b}' | '\u{200c}' | '\u{200d}'))
        .map(|c| if c == '\u{a0}' { ' ' } else { c })
        .collect()
}

/// Parse a raw cell into a decimal number.
///
/// Tolerates `$`, thousands commas, `%`, leading `+`, `(123.45)` negatives
/// and unicode minus/dash variants. The tokens `-`, em dash, `NM`, `nan`,
/// `none` (case-insensitive) and the empty string mean "no value".
pub fn parse_number(raw: &str) -> Option<Decimal> {
    let s = strip_invisible(raw);
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let lower = s.to_lowercase();
    if matches!(lower.as_str(), "nan" | "none" | "nm") || matches!(s, "\u{2014}" | "-") {
        return None;
    }

    let mut s = s.replace('\u{2212}', "-").replace('\u{2013}', "-");

    let mut neg = false;
    if s.starts_with('(') && s.ends_with(')') {
        neg = true;
        s = s[1..s.len() - 1].trim().to_string();
    }

    let mut s = s.replace('$', "").replace(',', "").trim().to_string();
    if let Some(rest) = s.strip_prefix('+') {
        s = rest.trim().to_string();
    }
    let s = s.replace('%', "");
    let s = s.trim();

    let x = Decimal::from_str(s).ok()?;
    Some(if neg { -x } else { x })
}

/// Parse a date cell into a calendar date.
///
/// Accepts `YYYY-MM-DD` prefixes (excel-ish "2026-01-23 00:00:00" included),
/// `M/D/YYYY`, and "Thursday 9/18/2025"-style strings (the last
/// whitespace-separated token is the candidate). Out-of-range day/month
/// values are rejected.
pub fn parse_date_flexible(raw: &str) -> Option<NaiveDate> {
    let s = strip_invisible(raw);
    let s = s.trim();
    if s.is_empty() || !s.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    if s.len() >= 10 && ISO_PREFIX_RE.is_match(s) {
        return NaiveDate::parse_from_str(&s[..10], "%Y-%m-%d").ok();
    }

    let candidate = s.split_whitespace().last()?;
    let caps = MDY_RE.captures(candidate)?;
    let mm: u32 = caps[1].parse().ok()?;
    let dd: u32 = caps[2].parse().ok()?;
    let yy: i32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(yy, mm, dd)
}

/// Clean a raw symbol cell into a ticker.
///
/// Uppercases and strips invisible whitespace. Tickers ending in `**`
/// (house cash-equivalent markers like SPAXX**) are preserved verbatim with
/// internal whitespace removed; everything else is projected onto
/// `[A-Z0-9.*-]`.
pub fn clean_symbol(raw: &str) -> String {
    let s = strip_invisible(raw);
    let s = s.trim().to_uppercase();
    if s.is_empty() {
        return String::new();
    }
    if s.ends_with("**") {
        return s.split_whitespace().collect();
    }
    s.chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | '*' | '-'))
        .collect()
}

/// Whether a cleaned string looks like a ticker symbol.
pub fn looks_like_symbol(sym: &str) -> bool {
    let s = sym.trim().to_uppercase();
    if s.is_empty() {
        return false;
    }
    if s.ends_with("**") {
        return true;
    }
    TICKER_RE.is_match(&s)
}

/// Cash-equivalent sweep positions are marked with a trailing `**`.
pub fn is_cash_like_ticker(ticker: &str) -> bool {
    let t = ticker.trim().to_uppercase();
    !t.is_empty() && t.ends_with("**")
}
