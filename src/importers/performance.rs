//! Daily-performance ingestion: RawTable -> performance_daily rows.
//!
//! This is the parallel ingestion path feeding the returns engine: one row
//! per date with balance, optional dollar change, optional daily return
//! (a decimal, 0.0197 = +1.97%), optional net deposit/withdrawal flow and
//! optional benchmark close prices.

use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::info;

use crate::db::{self, PerformanceDailyPoint, SourceInfo};
use crate::error::Result;
use crate::importers::schema::resolve_performance_columns;
use crate::importers::table::RawTable;
use crate::normalize::{parse_date_flexible, parse_number};

/// Clamp a daily return to sane bounds so one pasted-wrong row (1.97
/// meaning 197%) cannot blow up every downstream curve.
fn clamp_return(x: Decimal) -> Decimal {
    let lo = Decimal::new(-99, 2); // -0.99
    let hi = Decimal::from(5);
    x.clamp(lo, hi)
}

/// Ingest a performance table: one upsert per parseable (date, balance)
/// row, sorted by date first so re-runs are deterministic. Returns the
/// number of rows written.
pub fn ingest_performance(conn: &Connection, table: &RawTable, source: &SourceInfo) -> Result<usize> {
    let cols = resolve_performance_columns(table)?;
    let date_col = cols.date.as_deref().expect("validated date column");
    let bal_col = cols.balance.as_deref().expect("validated balance column");

    let opt = |row: usize, col: &Option<String>| -> Option<Decimal> {
        col.as_deref().and_then(|c| parse_number(table.cell(row, c)))
    };

    let mut rows: Vec<PerformanceDailyPoint> = Vec::new();
    for row in 0..table.n_rows() {
        // Non-date rows like "TRANSFER" markers are skipped silently.
        let Some(date) = parse_date_flexible(table.cell(row, date_col)) else {
            continue;
        };
        let Some(balance) = parse_number(table.cell(row, bal_col)) else {
            continue;
        };

        rows.push(PerformanceDailyPoint {
            date,
            balance,
            dollar_change: opt(row, &cols.dollar_change),
            daily_return: opt(row, &cols.daily_return).map(clamp_return),
            net_flow: opt(row, &cols.net_flow),
            voo_close: opt(row, &cols.voo_close),
            qqq_close: opt(row, &cols.qqq_close),
            source_file: Some(source.filename.clone()),
        });
    }

    rows.sort_by_key(|r| r.date);

    let mut written = 0usize;
    for r in &rows {
        db::upsert_performance_row(conn, r)?;
        written += 1;
    }

    info!("performance ingest: {} row(s) written", written);
    Ok(written)
}
