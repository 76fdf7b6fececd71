//! Column-schema detection for broker exports.
//!
//! Exports label the same data differently between generations ("Current
//! Value" vs "Market Value", "Qty" vs "Quantity"), and occasionally ship
//! with no usable labels at all. Resolution runs as a cascade per canonical
//! field: exact label match, then keyword containment with reject lists,
//! then value-shape scoring over a sample of rows. A distinct shift-repair
//! pass afterwards catches exports that grew an extra leading column.

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::importers::table::RawTable;
use crate::normalize::{clean_symbol, looks_like_symbol, parse_number};

/// Rows sampled per column when shape-scoring.
const SAMPLE_ROWS: usize = 80;

/// Loose ticker prefix used by the symbol scorer's second tier.
static TICKER_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{1,7}").unwrap());

/// Detected columns for a positions upload. `None` means the field was not
/// found; downstream treats it as absent, never as zero.
#[derive(Debug, Clone, Default)]
pub struct PositionColumns {
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<String>,
    pub price: Option<String>,
    pub value: Option<String>,
    pub cost_basis: Option<String>,
    pub avg_cost: Option<String>,
    pub day_change: Option<String>,
    pub total_change: Option<String>,
    pub weight: Option<String>,
}

impl PositionColumns {
    fn attempted(&self) -> Vec<(String, String)> {
        let show = |c: &Option<String>| c.clone().unwrap_or_else(|| "(none)".to_string());
        vec![
            ("symbol".to_string(), show(&self.symbol)),
            ("description".to_string(), show(&self.description)),
            ("quantity".to_string(), show(&self.quantity)),
            ("price".to_string(), show(&self.price)),
            ("value".to_string(), show(&self.value)),
            ("cost_basis".to_string(), show(&self.cost_basis)),
            ("avg_cost".to_string(), show(&self.avg_cost)),
        ]
    }
}

/// Detected columns for a trade-activity upload.
#[derive(Debug, Clone, Default)]
pub struct ActivityColumns {
    pub run_date: Option<String>,
    pub action: Option<String>,
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub price: Option<String>,
    pub quantity: Option<String>,
    pub fees: Option<String>,
    pub settlement: Option<String>,
}

/// Detected columns for a daily-performance upload.
#[derive(Debug, Clone, Default)]
pub struct PerformanceColumns {
    pub date: Option<String>,
    pub balance: Option<String>,
    pub dollar_change: Option<String>,
    pub daily_return: Option<String>,
    pub net_flow: Option<String>,
    pub voo_close: Option<String>,
    pub qqq_close: Option<String>,
}

/// Case/whitespace-insensitive normalization for column-name comparison.
fn norm(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '\u{feff}' | '\u{200b}' | '\u{200c}' | '\u{200d}'))
        .map(|c| if c == '\u{a0}' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_lowercase()
        .split_whitespace()
        .join(" ")
}

fn find_col_exact(table: &RawTable, name: &str) -> Option<String> {
    let target = norm(name);
    table
        .columns()
        .iter()
        .find(|c| norm(c) == target)
        .cloned()
}

fn find_col_contains(table: &RawTable, contains_any: &[&str], reject_any: &[&str]) -> Option<String> {
    table
        .columns()
        .iter()
        .find(|c| {
            let nc = norm(c);
            contains_any.iter().any(|k| nc.contains(&norm(k)))
                && !reject_any.iter().any(|r| nc.contains(&norm(r)))
        })
        .cloned()
}

fn sample<'a>(table: &'a RawTable, col: &str) -> Vec<&'a str> {
    table.column_values(col).into_iter().take(SAMPLE_ROWS).collect()
}

/// +4 per strict ticker-shaped value (or `**` cash marker), +2 for a looser
/// symbol-like value, -2 per value longer than 12 characters.
fn score_symbol(table: &RawTable, col: &str) -> i64 {
    let mut score = 0i64;
    for v in sample(table, col) {
        let s = clean_symbol(v);
        if s.is_empty() {
            continue;
        }
        if looks_like_symbol(&s) {
            score += 4;
        } else if TICKER_PREFIX_RE.is_match(&s) {
            score += 2;
        }
        if s.len() > 12 {
            score -= 2;
        }
    }
    score
}

/// +3 per numeric value of plausible share-count magnitude, -1 otherwise.
fn score_quantity(table: &RawTable, col: &str) -> i64 {
    let limit = rust_decimal::Decimal::from(1_000_000);
    let mut score = 0i64;
    for v in sample(table, col) {
        match parse_number(v) {
            Some(x) if x.abs() <= limit => score += 3,
            Some(_) => score -= 1,
            None => {}
        }
    }
    score
}

/// +2 per numeric value in [0, 100_000]; a blanket -20 when more than 15% of
/// sampled values are negative (prices are rarely negative; a high negative
/// ratio means we are looking at a change column).
fn score_price(table: &RawTable, col: &str) -> i64 {
    let limit = rust_decimal::Decimal::from(100_000);
    let mut score = 0i64;
    let mut n = 0usize;
    let mut neg = 0usize;
    for v in sample(table, col) {
        let Some(x) = parse_number(v) else { continue };
        n += 1;
        if x.is_sign_negative() && !x.is_zero() {
            neg += 1;
        }
        if x >= rust_decimal::Decimal::ZERO && x <= limit {
            score += 2;
        }
    }
    if n > 0 && (neg as f64 / n as f64) > 0.15 {
        score -= 20;
    }
    score
}

/// +2 per numeric value of plausible market-value magnitude; -10 when more
/// than 25% of sampled values are negative.
fn score_value(table: &RawTable, col: &str) -> i64 {
    let limit = rust_decimal::Decimal::from(50_000_000);
    let mut score = 0i64;
    let mut n = 0usize;
    let mut neg = 0usize;
    for v in sample(table, col) {
        let Some(x) = parse_number(v) else { continue };
        n += 1;
        if x.is_sign_negative() && !x.is_zero() {
            neg += 1;
        }
        if x.abs() <= limit {
            score += 2;
        }
    }
    if n > 0 && (neg as f64 / n as f64) > 0.25 {
        score -= 10;
    }
    score
}

/// Highest-scoring candidate column; the first wins ties.
fn pick_best(
    table: &RawTable,
    candidates: &[String],
    scorer: fn(&RawTable, &str) -> i64,
) -> Option<String> {
    let mut best: Option<(String, i64)> = None;
    for c in candidates.iter().unique() {
        if table.col_index(c).is_none() {
            continue;
        }
        let s = scorer(table, c);
        if best.as_ref().map_or(true, |(_, bs)| s > *bs) {
            best = Some((c.clone(), s));
        }
    }
    best.map(|(c, _)| c)
}

/// Keyword candidates if any matched, else every column (shape scoring then
/// decides).
fn candidates_or_all(table: &RawTable, picked: Option<String>) -> Vec<String> {
    match picked {
        Some(c) => vec![c],
        None => table.columns().to_vec(),
    }
}

/// Primary detection cascade for a positions table.
pub fn detect_position_columns(table: &RawTable) -> PositionColumns {
    let mut cols = PositionColumns {
        symbol: find_col_exact(table, "Symbol"),
        description: find_col_exact(table, "Description"),
        quantity: find_col_exact(table, "Quantity"),
        price: find_col_exact(table, "Last Price"),
        value: find_col_exact(table, "Current Value"),
        day_change: find_col_exact(table, "Today's Gain/Loss Dollar"),
        total_change: find_col_exact(table, "Total Gain/Loss Dollar"),
        weight: find_col_exact(table, "Percent Of Account"),
        avg_cost: find_col_exact(table, "Average Cost Basis"),
        cost_basis: find_col_exact(table, "Cost Basis Total"),
    };

    if cols.symbol.is_none() {
        let kw = find_col_contains(table, &["symbol", "ticker"], &["cusip"]);
        cols.symbol = pick_best(table, &candidates_or_all(table, kw), score_symbol);
    }

    if cols.quantity.is_none() {
        let kw = find_col_contains(table, &["quantity", "qty", "shares"], &["%", "percent"]);
        cols.quantity = pick_best(table, &candidates_or_all(table, kw), score_quantity);
    }

    if cols.price.is_none() {
        let reject = ["change", "gain", "loss", "percent", "%"];
        let kws: Vec<String> = [
            find_col_contains(table, &["last price"], &reject),
            find_col_contains(table, &["price"], &reject),
        ]
        .into_iter()
        .flatten()
        .unique()
        .collect();
        let cands = if kws.is_empty() {
            table.columns().to_vec()
        } else {
            kws
        };
        cols.price = pick_best(table, &cands, score_price);
    }

    if cols.value.is_none() {
        let reject = ["change", "gain", "loss", "percent", "%"];
        let kws: Vec<String> = [
            find_col_contains(
                table,
                &["current value", "market value", "position value"],
                &reject,
            ),
            find_col_contains(table, &["value"], &reject),
        ]
        .into_iter()
        .flatten()
        .unique()
        .collect();
        let cands = if kws.is_empty() {
            table.columns().to_vec()
        } else {
            kws
        };
        cols.value = pick_best(table, &cands, score_value);
    }

    if cols.description.is_none() {
        cols.description =
            find_col_contains(table, &["description", "security"], &["account", "account name"]);
    }
    if cols.day_change.is_none() {
        cols.day_change =
            find_col_contains(table, &["today", "gain/loss dollar"], &["percent", "%"]);
    }
    if cols.total_change.is_none() {
        cols.total_change =
            find_col_contains(table, &["total gain/loss dollar"], &["percent", "%"]);
    }
    if cols.weight.is_none() {
        cols.weight = find_col_contains(table, &["percent of account", "weight"], &[]);
    }
    if cols.avg_cost.is_none() {
        cols.avg_cost = find_col_contains(table, &["average cost basis"], &["account"]);
    }
    if cols.cost_basis.is_none() {
        cols.cost_basis =
            find_col_contains(table, &["cost basis total", "cost basis"], &["average", "account"]);
    }

    cols
}

/// Fraction of sampled non-empty values in a column that clean up to a
/// ticker shape.
fn ticker_like_rate(table: &RawTable, col: &str) -> f64 {
    let mut seen = 0usize;
    let mut good = 0usize;
    for v in sample(table, col) {
        let s = clean_symbol(v);
        if s.is_empty() {
            continue;
        }
        seen += 1;
        if looks_like_symbol(&s) {
            good += 1;
        }
    }
    if seen == 0 {
        0.0
    } else {
        good as f64 / seen as f64
    }
}

/// Shift-repair pass, kept separate from primary detection.
///
/// Some exports emit an extra leading column, silently shifting every value
/// one slot: the data for each field then sits under the header immediately
/// preceding that field's expected label (tickers end up under "Account
/// Name"). When the chosen symbol column barely contains tickers but the
/// adjacent "Account Name" column does, every detected field is remapped
/// one header position to the left.
pub fn repair_shifted_columns(table: &RawTable, cols: PositionColumns) -> PositionColumns {
    let Some(sym_col) = cols.symbol.clone() else {
        return cols;
    };
    let Some(acct_col) = find_col_exact(table, "Account Name") else {
        return cols;
    };

    let sym_rate = ticker_like_rate(table, &sym_col);
    let acct_rate = ticker_like_rate(table, &acct_col);

    if !(sym_rate < 0.15 && acct_rate > 0.40) {
        return cols;
    }

    warn!(
        sym_rate,
        acct_rate, "symbol column is not ticker-shaped; repairing one-column shift"
    );

    let shift_left = |chosen: &Option<String>| -> Option<String> {
        let c = chosen.as_ref()?;
        let i = table.col_index(c)?;
        if i == 0 {
            return Some(c.clone());
        }
        Some(table.columns()[i - 1].clone())
    };

    PositionColumns {
        symbol: shift_left(&cols.symbol),
        description: shift_left(&cols.description),
        quantity: shift_left(&cols.quantity),
        price: shift_left(&cols.price),
        value: shift_left(&cols.value),
        day_change: shift_left(&cols.day_change),
        total_change: shift_left(&cols.total_change),
        weight: shift_left(&cols.weight),
        cost_basis: shift_left(&cols.cost_basis),
        avg_cost: shift_left(&cols.avg_cost),
    }
}

/// Full resolution for a positions table: cascade, repair, then validation.
/// No usable symbol or quantity column is a terminal schema failure.
pub fn resolve_position_columns(table: &RawTable) -> Result<PositionColumns> {
    let picked = detect_position_columns(table);
    debug!(?picked, "position columns before repair");
    let cols = repair_shifted_columns(table, picked);

    if cols.symbol.is_none() || cols.quantity.is_none() {
        let missing = if cols.symbol.is_none() {
            "symbol"
        } else {
            "quantity"
        };
        return Err(IngestError::SchemaDetection {
            reason: format!("no usable {missing} column after shift repair"),
            attempted: cols.attempted(),
            columns: table.columns().to_vec(),
        }
        .into());
    }

    Ok(cols)
}

/// Column resolution for a trade-activity table. Run-date, action and
/// symbol are required; the rest degrade to absent fields.
pub fn resolve_activity_columns(table: &RawTable) -> Result<ActivityColumns> {
    let cols = ActivityColumns {
        run_date: find_col_contains(table, &["run date"], &[])
            .or_else(|| find_col_exact(table, "Run Date"))
            .or_else(|| find_col_contains(table, &["date"], &["settlement"])),
        action: find_col_contains(table, &["action"], &[]),
        symbol: find_col_contains(table, &["symbol", "ticker"], &["cusip"]),
        description: find_col_contains(table, &["description"], &[]),
        price: find_col_contains(table, &["price"], &[]),
        quantity: find_col_contains(table, &["quantity", "qty", "shares"], &[]),
        fees: find_col_contains(table, &["fees"], &[]),
        settlement: find_col_contains(table, &["settlement"], &[]),
    };

    if cols.run_date.is_none() || cols.action.is_none() || cols.symbol.is_none() {
        let show = |c: &Option<String>| c.clone().unwrap_or_else(|| "(none)".to_string());
        return Err(IngestError::SchemaDetection {
            reason: "missing required columns for activity ingest (need run date, action, symbol)"
                .to_string(),
            attempted: vec![
                ("run_date".to_string(), show(&cols.run_date)),
                ("action".to_string(), show(&cols.action)),
                ("symbol".to_string(), show(&cols.symbol)),
                ("quantity".to_string(), show(&cols.quantity)),
                ("price".to_string(), show(&cols.price)),
                ("settlement".to_string(), show(&cols.settlement)),
            ],
            columns: table.columns().to_vec(),
        }
        .into());
    }

    Ok(cols)
}

/// Column resolution for a daily-performance table. Date and balance are
/// required.
pub fn resolve_performance_columns(table: &RawTable) -> Result<PerformanceColumns> {
    let cols = PerformanceColumns {
        date: find_col_contains(table, &["date"], &[]),
        balance: find_col_contains(table, &["balance", "equity"], &[])
            .or_else(|| find_col_contains(table, &["value"], &["%", "percent"])),
        dollar_change: find_col_contains(table, &["dollar change", "dollar chg", "dollar"], &[]),
        daily_return: find_col_exact(table, "Return").or_else(|| {
            find_col_contains(
                table,
                &["daily return", "return"],
                &["balance", "dollar", "%", "pct"],
            )
        }),
        net_flow: find_col_contains(
            table,
            &["net flow", "flow", "deposit", "contribution"],
            &[],
        ),
        voo_close: find_col_exact(table, "VOO").or_else(|| {
            find_col_contains(table, &["voo"], &["balance", "ret", "return", "pct", "%"])
        }),
        qqq_close: find_col_exact(table, "QQQ").or_else(|| {
            find_col_contains(table, &["qqq"], &["balance", "ret", "return", "pct", "%"])
        }),
    };

    if cols.date.is_none() || cols.balance.is_none() {
        let show = |c: &Option<String>| c.clone().unwrap_or_else(|| "(none)".to_string());
        return Err(IngestError::SchemaDetection {
            reason: "missing required columns for performance ingest (need date and balance)"
                .to_string(),
            attempted: vec![
                ("date".to_string(), show(&cols.date)),
                ("balance".to_string(), show(&cols.balance)),
            ],
            columns: table.columns().to_vec(),
        }
        .into());
    }

    Ok(cols)
}
