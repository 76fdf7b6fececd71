//! Closed-trade matching: correlate full-exit sell activity against the
//! prior snapshot to report realized P&L and holding period.
//!
//! Only full exits are reported. A sell day that trims but does not
//! exhaust the prior holding is excluded entirely — partial-close P&L is
//! never inferred silently.

use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::debug;

use crate::db::{self, ClosedTradeRecord};
use crate::error::Result;
use crate::normalize::is_cash_like_ticker;
use crate::reports::lifecycle;
use crate::utils::{round_money, round_price, round_qty};

/// Tolerance for the full-close comparison; absorbs rounding noise in
/// broker-reported share counts.
fn close_tolerance() -> Decimal {
    Decimal::new(1, 6)
}

/// Fully closed positions since `start_date`, newest close first.
///
/// For each (date, ticker) sell-day group: the most recent snapshot
/// strictly before the sell date supplies prior quantity and average cost;
/// no such snapshot means no cost basis can be established and the group
/// is skipped. The opened-at date is resolved by replaying the ledger up
/// to the *prior snapshot's* date — the open event must predate the
/// holding the snapshot recorded.
pub fn find_closed_trades(
    conn: &Connection,
    start_date: NaiveDate,
    limit: usize,
) -> Result<Vec<ClosedTradeRecord>> {
    let groups = db::sell_day_groups(conn, start_date, limit)?;
    let tol = close_tolerance();

    let mut out: Vec<ClosedTradeRecord> = Vec::new();

    for g in groups {
        let ticker = g.ticker.trim().to_uppercase();
        if ticker.is_empty() || is_cash_like_ticker(&ticker) {
            continue;
        }
        if g.qty_sold <= Decimal::ZERO {
            continue;
        }

        let Some((prev_as_of, prev_pos)) =
            db::latest_position_before(conn, &ticker, g.trade_date)?
        else {
            debug!("{} sold {} with no prior snapshot; skipping", ticker, g.trade_date);
            continue;
        };

        let prev_qty = prev_pos.quantity;

        // Full-close test: selling less than the prior holding is a trim.
        if g.qty_sold + tol < prev_qty {
            continue;
        }

        let closed_qty = if prev_qty > Decimal::ZERO {
            prev_qty
        } else {
            g.qty_sold
        };

        let sell_price = g.proceeds / g.qty_sold;

        let avg_cost = prev_pos.avg_cost.filter(|c| !c.is_zero());
        let cost_basis = avg_cost.unwrap_or(Decimal::ZERO) * closed_qty;
        let pnl_amount = g.proceeds - cost_basis;
        let pnl_pct = if cost_basis > Decimal::ZERO {
            Some(pnl_amount / cost_basis)
        } else {
            None
        };

        let opened = lifecycle::opened_at_map(
            conn,
            Some(std::slice::from_ref(&ticker)),
            Some(prev_as_of),
        )?;
        let open_date = opened.get(&ticker).copied();
        let days_held = open_date.map(|d| (g.trade_date - d).num_days());

        out.push(ClosedTradeRecord {
            ticker,
            open_date,
            close_date: g.trade_date,
            days_held,
            quantity: round_qty(closed_qty),
            avg_cost: avg_cost.map(round_price),
            sell_price: Some(round_price(sell_price)),
            proceeds: round_money(g.proceeds),
            cost_basis: round_money(cost_basis),
            pnl_amount: round_money(pnl_amount),
            pnl_pct: pnl_pct.map(|p| p.round_dp(4)),
            prev_snapshot_as_of: prev_as_of,
            sell_count: g.sell_count,
        });
    }

    out.sort_by(|a, b| b.close_date.cmp(&a.close_date));
    Ok(out)
}
