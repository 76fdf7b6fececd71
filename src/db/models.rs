use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Trade direction. Quantities are stored as non-negative magnitudes;
/// direction is carried solely by the side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl FromStr for Side {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "B" => Ok(Side::Buy),
            "SELL" | "S" => Ok(Side::Sell),
            _ => Err(()),
        }
    }
}

/// Provenance of one upload: filename plus blake3 hash of the raw bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub filename: String,
    pub content_hash: String,
    pub bytes: usize,
}

impl SourceInfo {
    pub fn from_bytes(filename: &str, raw: &[u8]) -> Self {
        SourceInfo {
            filename: filename.to_string(),
            content_hash: blake3::hash(raw).to_hex().to_string(),
            bytes: raw.len(),
        }
    }
}

/// One holding inside a snapshot. Absent optional fields stay absent all
/// the way to reporting; they are never defaulted to zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    pub name: Option<String>,
    pub quantity: Decimal,
    pub last_price: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub avg_cost: Option<Decimal>,
    pub cost_value: Option<Decimal>,
    pub day_change: Option<Decimal>,
    pub total_change: Option<Decimal>,
    pub weight_pct: Option<Decimal>,
}

/// A complete point-in-time record of all holdings on one as-of date.
/// Aggregates are recomputed from the position rows, never trusted from
/// the upload.
#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub as_of: NaiveDate,
    pub positions: Vec<Position>,
    pub non_cash_positions_value: Decimal,
    pub cash_value: Decimal,
    pub pending_amount: Decimal,
    pub total_value: Decimal,
    pub todays_pnl_total: Decimal,
    pub source: SourceInfo,
}

/// Synthetic sell line in a day-over-day change report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoldLine {
    pub ticker: String,
    pub quantity: Decimal,
    pub price_est: Decimal,
    pub value_est: Decimal,
    pub from_qty: Decimal,
    pub to_qty: Decimal,
}

/// Diff of a snapshot against the most recent earlier one: which holdings
/// shrank, with estimated prices. Supports human review of what changed
/// between consecutive snapshots without the activity ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeReport {
    pub date: NaiveDate,
    pub prev_date: Option<NaiveDate>,
    pub positions_count: usize,
    pub sold: Vec<SoldLine>,
    pub sold_value_est: Decimal,
}

impl ChangeReport {
    pub fn sold_count(&self) -> usize {
        self.sold.len()
    }
}

/// One deduplicated trade in the ledger, keyed by its deterministic
/// identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    pub trade_date: NaiveDate,
    pub settlement_date: Option<NaiveDate>,
    pub side: Side,
    pub ticker: String,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub fees: Option<Decimal>,
    pub value_est: Option<Decimal>,
    pub action_raw: String,
    pub source_filename: String,
    pub source_hash: String,
}

/// Counters returned by an activity ingest. A row counts as written only
/// if it was newly inserted or actually changed a stored field.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ActivityStats {
    pub written: usize,
    pub skipped: usize,
    pub seen: usize,
}

/// One daily row of the performance series store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceDailyPoint {
    pub date: NaiveDate,
    pub balance: Decimal,
    pub dollar_change: Option<Decimal>,
    pub daily_return: Option<Decimal>,
    pub net_flow: Option<Decimal>,
    pub voo_close: Option<Decimal>,
    pub qqq_close: Option<Decimal>,
    pub source_file: Option<String>,
}

/// A fully exited position, derived by correlating sell activity against
/// the prior snapshot. Computed on demand; not a source of truth.
#[derive(Debug, Clone, Serialize)]
pub struct ClosedTradeRecord {
    pub ticker: String,
    pub open_date: Option<NaiveDate>,
    pub close_date: NaiveDate,
    pub days_held: Option<i64>,
    pub quantity: Decimal,
    pub avg_cost: Option<Decimal>,
    pub sell_price: Option<Decimal>,
    pub proceeds: Decimal,
    pub cost_basis: Decimal,
    pub pnl_amount: Decimal,
    pub pnl_pct: Option<Decimal>,
    pub prev_snapshot_as_of: NaiveDate,
    pub sell_count: i64,
}

/// Minimal ledger row used by the lifecycle replay.
#[derive(Debug, Clone)]
pub struct LedgerEvent {
    pub trade_date: NaiveDate,
    pub side: Side,
    pub ticker: String,
    pub quantity: Decimal,
}

/// One (date, ticker) group of sell activity, summed by the store.
#[derive(Debug, Clone)]
pub struct SellDayGroup {
    pub trade_date: NaiveDate,
    pub ticker: String,
    pub qty_sold: Decimal,
    pub proceeds: Decimal,
    pub sell_count: i64,
}
