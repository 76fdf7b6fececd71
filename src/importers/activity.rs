//! Trade-activity ingestion: RawTable -> deduplicated trade ledger.
//!
//! Re-uploads of overlapping export windows are routine, so every row gets
//! a deterministic identity derived from its content and the ledger is
//! written with upsert-by-identity. Rows that are not tradable actions are
//! skipped and counted, never errors.

use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::db::{self, ActivityStats, Side, SourceInfo, TradeRecord, TradeWrite};
use crate::error::Result;
use crate::importers::schema::resolve_activity_columns;
use crate::importers::table::RawTable;
use crate::normalize::{clean_symbol, looks_like_symbol, parse_date_flexible, parse_number};

/// Map an action description to a trade side. Anything that is not a
/// buy/sell ("DIVIDEND RECEIVED", "REINVESTMENT", ...) is not a tradable
/// action and gets skipped by the caller.
pub fn action_side(action: &str) -> Option<Side> {
    let a = action.trim().to_lowercase();
    if a.starts_with("you bought") {
        Some(Side::Buy)
    } else if a.starts_with("you sold") {
        Some(Side::Sell)
    } else {
        None
    }
}

/// Deterministic trade identity, contract v1.
///
/// Identity is a blake3 hash (first 24 hex chars) over, in this exact
/// order:
///
///   trade_date | side | ticker | quantity | price-or-empty |
///   settlement-date-or-empty | lowercased raw action text
///
/// with dates as YYYY-MM-DD and decimals in trailing-zero-free form. The
/// field order and normalization are load-bearing: any two rows producing
/// the same hash are the same logical trade regardless of which file or
/// row position they came from, which is what makes re-uploads safe.
/// Changing the order or normalization silently breaks de-duplication of
/// previously-ingested ledgers — bump to a v2 contract instead.
pub fn trade_identity(
    trade_date: NaiveDate,
    side: Side,
    ticker: &str,
    quantity: Decimal,
    price: Option<Decimal>,
    settlement_date: Option<NaiveDate>,
    action_raw: &str,
) -> String {
    let key = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        trade_date.format("%Y-%m-%d"),
        side.as_str(),
        ticker,
        quantity.normalize(),
        price.map(|p| p.normalize().to_string()).unwrap_or_default(),
        settlement_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        action_raw.trim().to_lowercase(),
    );
    let hex = blake3::hash(key.as_bytes()).to_hex();
    hex[..24].to_string()
}

/// Ingest a trade-activity table into the ledger.
///
/// Returns accurate written/skipped/seen counts: a row is written only if
/// its identity was new or a stored field actually changed value, so
/// uploading the identical file twice reports zero writes the second time.
pub fn ingest_activity(
    conn: &Connection,
    table: &RawTable,
    source: &SourceInfo,
) -> Result<ActivityStats> {
    let cols = resolve_activity_columns(table)?;
    let date_col = cols.run_date.as_deref().expect("validated run date column");
    let action_col = cols.action.as_deref().expect("validated action column");
    let sym_col = cols.symbol.as_deref().expect("validated symbol column");

    let mut stats = ActivityStats::default();

    for row in 0..table.n_rows() {
        stats.seen += 1;

        let action = table.cell(row, action_col).trim().to_string();
        let Some(side) = action_side(&action) else {
            stats.skipped += 1;
            continue;
        };

        let Some(trade_date) = parse_date_flexible(table.cell(row, date_col)) else {
            debug!("skipping row {}: unparseable trade date", row);
            stats.skipped += 1;
            continue;
        };

        let ticker = clean_symbol(table.cell(row, sym_col));
        if ticker.is_empty() || !looks_like_symbol(&ticker) {
            stats.skipped += 1;
            continue;
        }

        let quantity = cols
            .quantity
            .as_deref()
            .and_then(|c| parse_number(table.cell(row, c)));
        let Some(quantity) = quantity.filter(|q| !q.is_zero()) else {
            stats.skipped += 1;
            continue;
        };
        // Direction is carried solely by side; store the magnitude.
        let quantity = quantity.abs();

        let description = cols
            .description
            .as_deref()
            .map(|c| table.cell(row, c).trim().to_string())
            .filter(|s| !s.is_empty());
        let price = cols
            .price
            .as_deref()
            .and_then(|c| parse_number(table.cell(row, c)));
        let fees = cols
            .fees
            .as_deref()
            .and_then(|c| parse_number(table.cell(row, c)));
        let settlement_date = cols
            .settlement
            .as_deref()
            .and_then(|c| parse_date_flexible(table.cell(row, c)));

        let value_est = price.map(|p| p * quantity);

        let trade_id = trade_identity(
            trade_date,
            side,
            &ticker,
            quantity,
            price,
            settlement_date,
            &action,
        );

        let record = TradeRecord {
            trade_id,
            trade_date,
            settlement_date,
            side,
            ticker,
            description,
            quantity,
            price,
            fees,
            value_est,
            action_raw: action,
            source_filename: source.filename.clone(),
            source_hash: source.content_hash.clone(),
        };

        match db::upsert_trade(conn, &record)? {
            TradeWrite::Inserted | TradeWrite::Updated => stats.written += 1,
            TradeWrite::Unchanged => {}
        }
    }

    info!(
        "activity ingest: {} written, {} skipped, {} seen",
        stats.written, stats.skipped, stats.seen
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn activity_table(rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            vec![
                "Run Date".into(),
                "Action".into(),
                "Symbol".into(),
                "Description".into(),
                "Quantity".into(),
                "Price ($)".into(),
                "Fees ($)".into(),
                "Settlement Date".into(),
            ],
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::apply_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_action_side_prefixes() {
        assert_eq!(action_side("YOU BOUGHT AAPL (Cash)"), Some(Side::Buy));
        assert_eq!(action_side(" you sold  MSFT"), Some(Side::Sell));
        assert_eq!(action_side("DIVIDEND RECEIVED"), None);
        assert_eq!(action_side("REINVESTMENT"), None);
        assert_eq!(action_side(""), None);
    }

    #[test]
    fn test_identity_is_stable_and_content_addressed() {
        let id1 = trade_identity(
            date(2026, 1, 5),
            Side::Buy,
            "AAPL",
            dec!(10),
            Some(dec!(187.50)),
            Some(date(2026, 1, 7)),
            "YOU BOUGHT AAPL",
        );
        // Same logical trade, different decimal rendering and action case.
        let id2 = trade_identity(
            date(2026, 1, 5),
            Side::Buy,
            "AAPL",
            dec!(10.000),
            Some(dec!(187.500)),
            Some(date(2026, 1, 7)),
            "you bought aapl",
        );
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 24);

        let other = trade_identity(
            date(2026, 1, 5),
            Side::Sell,
            "AAPL",
            dec!(10),
            Some(dec!(187.50)),
            Some(date(2026, 1, 7)),
            "YOU SOLD AAPL",
        );
        assert_ne!(id1, other);
    }

    #[test]
    fn test_identity_ignores_absent_price_consistently() {
        let a = trade_identity(date(2026, 1, 5), Side::Buy, "AAPL", dec!(10), None, None, "you bought");
        let b = trade_identity(date(2026, 1, 5), Side::Buy, "AAPL", dec!(10), None, None, "you bought");
        assert_eq!(a, b);
    }

    #[test]
    fn test_ingest_counts_and_idempotent_reupload() {
        let conn = test_conn();
        let t = activity_table(&[
            &["01/05/2026", "YOU BOUGHT AAPL", "AAPL", "APPLE INC", "10", "187.50", "0.00", "01/07/2026"],
            &["01/05/2026", "YOU SOLD MSFT", "MSFT", "MICROSOFT CORP", "-25", "402.10", "0.05", "01/07/2026"],
            &["01/06/2026", "DIVIDEND RECEIVED", "AAPL", "APPLE INC", "", "", "", ""],
        ]);
        let src = SourceInfo::from_bytes("activity.csv", b"activity-bytes");

        let first = ingest_activity(&conn, &t, &src).unwrap();
        assert_eq!(first.seen, 3);
        assert_eq!(first.written, 2);
        assert_eq!(first.skipped, 1);

        // identical re-upload: nothing written, nothing duplicated
        let second = ingest_activity(&conn, &t, &src).unwrap();
        assert_eq!(second.written, 0);
        assert_eq!(second.seen, 3);
        assert_eq!(db::count_trades(&conn).unwrap(), 2);
    }

    #[test]
    fn test_quantity_stored_as_magnitude_with_side() {
        let conn = test_conn();
        let t = activity_table(&[&[
            "01/05/2026", "YOU SOLD MSFT", "MSFT", "MICROSOFT CORP", "-25", "402.10", "", "",
        ]]);
        let src = SourceInfo::from_bytes("activity.csv", b"x");
        ingest_activity(&conn, &t, &src).unwrap();

        let events = db::ledger_events(&conn, None, None).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].side, Side::Sell);
        assert_eq!(events[0].quantity, dec!(25));
    }

    #[test]
    fn test_bad_rows_skipped_not_fatal() {
        let conn = test_conn();
        let t = activity_table(&[
            &["not a date", "YOU BOUGHT AAPL", "AAPL", "", "10", "187.50", "", ""],
            &["01/05/2026", "YOU BOUGHT ???", "123???", "", "10", "187.50", "", ""],
            &["01/05/2026", "YOU BOUGHT AAPL", "AAPL", "", "0", "187.50", "", ""],
            &["01/05/2026", "YOU BOUGHT AAPL", "AAPL", "", "10", "187.50", "", ""],
        ]);
        let src = SourceInfo::from_bytes("activity.csv", b"x");
        let stats = ingest_activity(&conn, &t, &src).unwrap();
        assert_eq!(stats.seen, 4);
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.written, 1);
    }
}
