//! Position lifecycle inference: when did each ticker most recently go
//! from flat to held?
//!
//! Replays the trade ledger with a per-ticker running quantity. The replay
//! window matters: a SELL with no prior BUY inside the window means the
//! position predates the window, not that something closed — the running
//! quantity clamps at zero and nothing is recorded, so no spurious
//! close/reopen cycle is fabricated.

use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::db::{self, LedgerEvent, Side};
use crate::error::Result;

/// Quantities within this distance of zero count as flat (broker exports
/// round share counts to six decimal places).
fn qty_epsilon() -> Decimal {
    Decimal::new(1, 6)
}

/// Replay ledger events (already filtered and in ascending
/// (trade_date, stable-tiebreak) order) into a ticker -> opened-at map.
///
/// Tickers with no BUY inside the window have no entry; callers must treat
/// that as "unknown", not "never opened".
pub fn infer_opened_at(events: &[LedgerEvent]) -> HashMap<String, NaiveDate> {
    let eps = qty_epsilon();
    let mut running: HashMap<String, Decimal> = HashMap::new();
    let mut opened: HashMap<String, NaiveDate> = HashMap::new();

    for e in events {
        let qty = running.entry(e.ticker.clone()).or_insert(Decimal::ZERO);
        match e.side {
            Side::Buy => {
                let before = *qty;
                *qty += e.quantity;
                if before <= Decimal::ZERO && *qty > Decimal::ZERO {
                    // flat -> open; a re-open overwrites any earlier date
                    opened.insert(e.ticker.clone(), e.trade_date);
                }
            }
            Side::Sell => {
                if *qty <= Decimal::ZERO {
                    // Baseline unknown: the position existed before the
                    // window. Clamp at zero and close nothing.
                    *qty = Decimal::ZERO;
                    continue;
                }
                *qty -= e.quantity;
                if qty.abs() <= eps || *qty < Decimal::ZERO {
                    // fully exited (or oversold into an unknown baseline):
                    // the ticker is flat again, so a later BUY re-opens it
                    *qty = Decimal::ZERO;
                    opened.remove(&e.ticker);
                }
            }
        }
    }

    opened
}

/// Point-in-time read of the ledger plus replay. The cutoff must equal the
/// snapshot's as-of date when the result is compared against a snapshot,
/// so inferred open dates stay consistent with what that snapshot shows.
pub fn opened_at_map(
    conn: &Connection,
    tickers: Option<&[String]>,
    cutoff: Option<NaiveDate>,
) -> Result<HashMap<String, NaiveDate>> {
    let events = db::ledger_events(conn, tickers, cutoff)?;
    Ok(infer_opened_at(&events))
}
