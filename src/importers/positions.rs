//! Positions ingestion: RawTable -> canonical snapshot for one as-of date.
//!
//! Separates true positions from pending-cash rows, drops the disclaimer
//! boilerplate brokerages append to exports, recomputes every aggregate
//! from the surviving rows, and diffs against the previous snapshot to
//! produce a sold-delta change report.

use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::db::{self, ChangeReport, Position, PositionSnapshot, SoldLine, SourceInfo};
use crate::error::{IngestError, Result};
use crate::importers::schema::{resolve_position_columns, PositionColumns};
use crate::importers::table::RawTable;
use crate::normalize::{clean_symbol, is_cash_like_ticker, looks_like_symbol, parse_number};

/// Boilerplate phrases brokerages append below the holdings table. A row
/// whose symbol+description contains any of these is not a position.
const DISCLAIMER_PHRASES: &[&str] = &[
    "provided to you solely for your use",
    "not for distribution",
    "informational purposes only",
    "not intended to provide advice",
    "should not be used in place of your account statements",
    "for more information on the data included",
    "brokerage services are provided",
    "members sipc",
    "fidelity.com",
    "date downloaded",
    "custody and other services provided",
];

fn is_disclaimer_row(sym: &str, desc: &str) -> bool {
    let blob = format!("{} {}", sym, desc).trim().to_lowercase();
    if blob.is_empty() {
        return true;
    }
    DISCLAIMER_PHRASES.iter().any(|p| blob.contains(p))
}

fn opt_cell(table: &RawTable, row: usize, col: &Option<String>) -> Option<Decimal> {
    col.as_deref().and_then(|c| parse_number(table.cell(row, c)))
}

/// Build the canonical snapshot from a detected table. Zero surviving
/// positions is a hard failure: it nearly always means the schema was
/// misdetected, not that the account is empty.
pub fn build_snapshot(
    table: &RawTable,
    cols: &PositionColumns,
    as_of: NaiveDate,
    source: &SourceInfo,
) -> Result<PositionSnapshot> {
    let sym_col = cols.symbol.as_deref().expect("validated symbol column");
    let qty_col = cols.quantity.as_deref().expect("validated quantity column");

    let mut positions: Vec<Position> = Vec::new();
    let mut pending_amount = Decimal::ZERO;
    let mut skipped_rows = 0usize;

    for row in 0..table.n_rows() {
        let sym_raw = table.cell(row, sym_col).trim().to_string();
        let desc_raw = cols
            .description
            .as_deref()
            .map(|c| table.cell(row, c).trim().to_string())
            .unwrap_or_default();

        // Unsettled cash shows up as a "Pending Activity" pseudo-row in the
        // symbol (or sometimes description) column. Capture its value and
        // keep it out of positions.
        if sym_raw.to_lowercase().contains("pending")
            || desc_raw.to_lowercase().contains("pending")
        {
            let amount = opt_cell(table, row, &cols.value).unwrap_or(Decimal::ZERO);
            pending_amount += amount;
            continue;
        }

        let sym = clean_symbol(&sym_raw);

        if is_disclaimer_row(&sym, &desc_raw) {
            skipped_rows += 1;
            continue;
        }
        if !looks_like_symbol(&sym) {
            skipped_rows += 1;
            continue;
        }

        let quantity = parse_number(table.cell(row, qty_col)).unwrap_or(Decimal::ZERO);

        positions.push(Position {
            ticker: sym,
            name: if desc_raw.is_empty() {
                None
            } else {
                Some(desc_raw)
            },
            quantity,
            last_price: opt_cell(table, row, &cols.price),
            market_value: opt_cell(table, row, &cols.value),
            avg_cost: opt_cell(table, row, &cols.avg_cost),
            cost_value: opt_cell(table, row, &cols.cost_basis),
            day_change: opt_cell(table, row, &cols.day_change),
            total_change: opt_cell(table, row, &cols.total_change),
            weight_pct: opt_cell(table, row, &cols.weight),
        });
    }

    if positions.is_empty() {
        return Err(IngestError::NoPositionsParsed {
            columns: table.columns().to_vec(),
        }
        .into());
    }

    if skipped_rows > 0 {
        info!("skipped {} non-position row(s)", skipped_rows);
    }

    // Aggregates are recomputed here, never taken from the upload. Cash
    // sweep rows (ticker**) count in position value, not as separate cash,
    // so the total matches the broker's own statement total.
    let positions_value: Decimal = positions
        .iter()
        .map(|p| p.market_value.unwrap_or(Decimal::ZERO))
        .sum();
    let cash_value: Decimal = positions
        .iter()
        .filter(|p| is_cash_like_ticker(&p.ticker))
        .map(|p| p.market_value.unwrap_or(Decimal::ZERO))
        .sum();
    let todays_pnl_total: Decimal = positions
        .iter()
        .map(|p| p.day_change.unwrap_or(Decimal::ZERO))
        .sum();

    Ok(PositionSnapshot {
        as_of,
        non_cash_positions_value: positions_value - cash_value,
        cash_value,
        pending_amount,
        total_value: positions_value + pending_amount,
        todays_pnl_total,
        positions,
        source: source.clone(),
    })
}

fn pos_map(positions: &[Position]) -> HashMap<String, &Position> {
    let mut out = HashMap::new();
    for p in positions {
        let t = p.ticker.trim().to_uppercase();
        if t.is_empty() {
            continue;
        }
        out.insert(t, p);
    }
    out
}

/// Diff the new snapshot against the most recent earlier one. Any ticker
/// whose quantity decreased becomes a synthetic sell line with an
/// estimated price, so a human can review what changed between consecutive
/// snapshots without the activity ledger.
pub fn change_report(
    prev: Option<&(NaiveDate, Vec<Position>)>,
    snap: &PositionSnapshot,
) -> ChangeReport {
    let cur_map = pos_map(&snap.positions);
    let empty: Vec<Position> = Vec::new();
    let (prev_date, prev_positions) = match prev {
        Some((d, ps)) => (Some(*d), ps),
        None => (None, &empty),
    };
    let prev_map = pos_map(prev_positions);

    let mut sold: Vec<SoldLine> = Vec::new();
    let mut sold_value_est = Decimal::ZERO;

    for (ticker, prev_pos) in &prev_map {
        let prev_qty = prev_pos.quantity;
        let cur_qty = cur_map
            .get(ticker)
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO);
        let delta = cur_qty - prev_qty;
        if delta >= Decimal::ZERO {
            continue;
        }

        let qty_sold = delta.abs();
        let price_est = cur_map
            .get(ticker)
            .and_then(|p| p.last_price)
            .filter(|p| *p > Decimal::ZERO)
            .or(prev_pos.last_price)
            .unwrap_or(Decimal::ZERO);
        let value_est = qty_sold * price_est;
        sold_value_est += value_est;

        sold.push(SoldLine {
            ticker: ticker.clone(),
            quantity: qty_sold,
            price_est,
            value_est,
            from_qty: prev_qty,
            to_qty: cur_qty,
        });
    }

    sold.sort_by(|a, b| b.value_est.cmp(&a.value_est));

    ChangeReport {
        date: snap.as_of,
        prev_date,
        positions_count: snap.positions.len(),
        sold,
        sold_value_est,
    }
}

/// Ingest a positions table for one as-of date: detect columns, build the
/// snapshot, diff against the previous snapshot, and persist both the
/// snapshot (replaced wholesale for that date) and the change report.
pub fn ingest_positions(
    conn: &Connection,
    table: &RawTable,
    as_of: NaiveDate,
    source: &SourceInfo,
) -> Result<(PositionSnapshot, ChangeReport)> {
    let cols = resolve_position_columns(table)?;
    let snap = build_snapshot(table, &cols, as_of, source)?;

    let prev = db::latest_snapshot_before(conn, as_of)?;
    let report = change_report(prev.as_ref(), &snap);

    db::replace_snapshot(conn, &snap)?;
    db::upsert_receipt(conn, &report, &snap.source)?;

    if !report.sold.is_empty() {
        warn!(
            "{} position(s) shrank since {:?}",
            report.sold.len(),
            report.prev_date
        );
    }
    info!(
        "snapshot {} written: {} positions, total value {}",
        snap.as_of,
        snap.positions.len(),
        snap.total_value
    );

    Ok((snap, report))
}
