//! Integration tests for the folio reconciliation engine
//!
//! These tests verify end-to-end functionality over real upload bytes:
//! - CSV and XLSX loading into snapshots
//! - Idempotent activity re-uploads
//! - Shift-repaired exports producing correct positions
//! - Closed-trade matching across ledger + snapshots
//! - Performance ingestion feeding the returns engine

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use folio::db::{self, SourceInfo};
use folio::importers::{ingest_activity, ingest_performance, ingest_positions, load_table};
use folio::reports::{self, SeriesMode};

/// Test helper: Create a temporary database
fn create_test_db() -> Result<(TempDir, Connection)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    db::init_database(Some(db_path.clone()))?;
    let conn = db::open_db(Some(db_path))?;
    Ok((temp_dir, conn))
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn ingest_positions_csv(
    conn: &Connection,
    csv: &str,
    filename: &str,
    as_of: NaiveDate,
) -> Result<(db::PositionSnapshot, db::ChangeReport)> {
    let table = load_table(csv.as_bytes(), filename)?;
    let source = SourceInfo::from_bytes(filename, csv.as_bytes());
    ingest_positions(conn, &table, as_of, &source)
}

const POSITIONS_DAY1: &str = "\
Account Number,Account Name,Symbol,Description,Quantity,Last Price,Current Value,Average Cost Basis
Z123,Brokerage,AAPL,APPLE INC,100,180.00,18000.00,150.00
Z123,Brokerage,MSFT,MICROSOFT CORP,25,400.00,10000.00,320.00
Z123,Brokerage,SPAXX**,FIDELITY GOVERNMENT MONEY MARKET,3200.55,1.00,3200.55,1.00
Z123,Brokerage,Pending Activity,,,,-500.00,
,\"Brokerage services are provided by Fidelity Brokerage Services, Members SIPC\",,,,,,
";

const ACTIVITY_JAN: &str = "\
Run Date,Action,Symbol,Description,Quantity,Price ($),Fees ($),Settlement Date
01/10/2026,YOU BOUGHT AAPL (Cash),AAPL,APPLE INC,100,150.00,0.00,01/12/2026
01/10/2026,YOU BOUGHT MSFT (Cash),MSFT,MICROSOFT CORP,25,320.00,0.00,01/12/2026
01/20/2026,YOU SOLD AAPL (Cash),AAPL,APPLE INC,-100,185.00,0.03,01/22/2026
01/21/2026,DIVIDEND RECEIVED,MSFT,MICROSOFT CORP,,,,
";

#[test]
fn test_positions_ingest_end_to_end() -> Result<()> {
    let (_tmp, conn) = create_test_db()?;

    let (snap, report) =
        ingest_positions_csv(&conn, POSITIONS_DAY1, "positions.csv", date(2026, 1, 12))?;

    // pending and disclaimer rows are filtered; the cash sweep stays
    assert_eq!(snap.positions.len(), 3);
    assert_eq!(snap.pending_amount, dec!(-500.00));
    assert_eq!(snap.cash_value, dec!(3200.55));
    assert_eq!(snap.non_cash_positions_value, dec!(28000.00));
    // totals include the cash line once, plus pending
    assert_eq!(snap.total_value, dec!(30700.55));
    assert_eq!(report.prev_date, None);

    let stored = db::positions_for(&conn, date(2026, 1, 12))?;
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[0].ticker, "AAPL");
    assert_eq!(stored[0].avg_cost, Some(dec!(150.00)));

    Ok(())
}

#[test]
fn test_positions_reupload_replaces_snapshot() -> Result<()> {
    let (_tmp, conn) = create_test_db()?;
    let as_of = date(2026, 1, 12);

    ingest_positions_csv(&conn, POSITIONS_DAY1, "positions.csv", as_of)?;

    // corrected re-export for the same date drops MSFT
    let corrected = "\
Symbol,Description,Quantity,Last Price,Current Value
AAPL,APPLE INC,100,181.00,18100.00
";
    ingest_positions_csv(&conn, corrected, "positions_fixed.csv", as_of)?;

    let stored = db::positions_for(&conn, as_of)?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].market_value, Some(dec!(18100.00)));
    assert_eq!(db::list_snapshot_dates(&conn, 10)?.len(), 1);

    Ok(())
}

#[test]
fn test_activity_reupload_is_idempotent() -> Result<()> {
    let (_tmp, conn) = create_test_db()?;

    let table = load_table(ACTIVITY_JAN.as_bytes(), "activity.csv")?;
    let source = SourceInfo::from_bytes("activity.csv", ACTIVITY_JAN.as_bytes());

    let first = ingest_activity(&conn, &table, &source)?;
    assert_eq!(first.seen, 4);
    assert_eq!(first.written, 3);
    assert_eq!(first.skipped, 1); // the dividend row

    let second = ingest_activity(&conn, &table, &source)?;
    assert_eq!(second.written, 0);
    assert_eq!(second.skipped, 1);
    assert_eq!(db::count_trades(&conn)?, 3);

    // overlapping export containing one already-known trade plus one new
    let overlap = "\
Run Date,Action,Symbol,Description,Quantity,Price ($),Fees ($),Settlement Date
01/20/2026,YOU SOLD AAPL (Cash),AAPL,APPLE INC,-100,185.00,0.03,01/22/2026
02/02/2026,YOU BOUGHT NVDA (Cash),NVDA,NVIDIA CORP,10,900.00,0.00,02/04/2026
";
    let t2 = load_table(overlap.as_bytes(), "activity_feb.csv")?;
    let s2 = SourceInfo::from_bytes("activity_feb.csv", overlap.as_bytes());
    let third = ingest_activity(&conn, &t2, &s2)?;
    // the known identity updates its provenance, the new one inserts
    assert_eq!(third.written, 2);
    assert_eq!(db::count_trades(&conn)?, 4);

    Ok(())
}

#[test]
fn test_shifted_export_end_to_end() -> Result<()> {
    let (_tmp, conn) = create_test_db()?;

    // an extra leading column pushed every value one slot left of its label
    let shifted = "\
Account Name,Symbol,Description,Quantity,Last Price,Current Value
AAPL,APPLE INC,100,180.00,18000.00,
MSFT,MICROSOFT CORP,25,400.00,10000.00,
";
    let (snap, _) = ingest_positions_csv(&conn, shifted, "shifted.csv", date(2026, 1, 12))?;

    assert_eq!(snap.positions.len(), 2);
    assert_eq!(snap.positions[0].ticker, "AAPL");
    assert_eq!(snap.positions[0].quantity, dec!(100));
    assert_eq!(snap.positions[0].last_price, Some(dec!(180.00)));
    assert_eq!(snap.positions[0].market_value, Some(dec!(18000.00)));

    Ok(())
}

#[test]
fn test_xlsx_positions_ingest() -> Result<()> {
    use rust_xlsxwriter::Workbook;

    let (_tmp, conn) = create_test_db()?;

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Summary").unwrap();

    let headers = ["Symbol", "Description", "Quantity", "Last Price", "Current Value"];
    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string(0, col as u16, *header).unwrap();
    }
    worksheet.write_string(1, 0, "AAPL").unwrap();
    worksheet.write_string(1, 1, "APPLE INC").unwrap();
    worksheet.write_number(1, 2, 100.0).unwrap();
    worksheet.write_number(1, 3, 180.0).unwrap();
    worksheet.write_number(1, 4, 18000.0).unwrap();

    let bytes = workbook.save_to_buffer().unwrap();
    let table = load_table(&bytes, "positions.xlsx")?;
    let source = SourceInfo::from_bytes("positions.xlsx", &bytes);
    let (snap, _) = ingest_positions(&conn, &table, date(2026, 1, 12), &source)?;

    assert_eq!(snap.positions.len(), 1);
    assert_eq!(snap.positions[0].ticker, "AAPL");
    assert_eq!(snap.positions[0].quantity, dec!(100));

    Ok(())
}

#[test]
fn test_closed_trades_end_to_end() -> Result<()> {
    let (_tmp, conn) = create_test_db()?;

    // ledger: buys on the 10th, full exit of AAPL on the 20th
    let table = load_table(ACTIVITY_JAN.as_bytes(), "activity.csv")?;
    let source = SourceInfo::from_bytes("activity.csv", ACTIVITY_JAN.as_bytes());
    ingest_activity(&conn, &table, &source)?;

    // snapshot between the buys and the sell supplies the cost basis
    ingest_positions_csv(&conn, POSITIONS_DAY1, "positions.csv", date(2026, 1, 12))?;

    let closed = reports::find_closed_trades(&conn, date(2026, 1, 1), 100)?;
    assert_eq!(closed.len(), 1);

    let c = &closed[0];
    assert_eq!(c.ticker, "AAPL");
    assert_eq!(c.close_date, date(2026, 1, 20));
    assert_eq!(c.open_date, Some(date(2026, 1, 10)));
    assert_eq!(c.days_held, Some(10));
    assert_eq!(c.quantity, dec!(100));
    assert_eq!(c.proceeds, dec!(18500.00));
    assert_eq!(c.cost_basis, dec!(15000.00));
    assert_eq!(c.pnl_amount, dec!(3500.00));
    assert_eq!(c.pnl_pct, Some(dec!(0.2333)));
    assert_eq!(c.prev_snapshot_as_of, date(2026, 1, 12));

    // MSFT was never fully sold: no closed-trade record
    assert!(!closed.iter().any(|c| c.ticker == "MSFT"));

    Ok(())
}

#[test]
fn test_performance_ingest_and_series() -> Result<()> {
    let (_tmp, conn) = create_test_db()?;

    let perf = "\
Date,Balance,Dollar Change,Return,Net Flow,VOO,QQQ
Thursday 1/1/2026,1000.00,0.00,0.0000,0,500.00,480.00
Friday 1/2/2026,1100.00,100.00,0.1000,0,505.00,
TRANSFER,,,,,,
Monday 1/5/2026,1050.00,50.00,0.0455,-100,510.05,484.80
";
    let table = load_table(perf.as_bytes(), "performance.csv")?;
    let source = SourceInfo::from_bytes("performance.csv", perf.as_bytes());
    let written = ingest_performance(&conn, &table, &source)?;
    assert_eq!(written, 3);

    let equity = reports::performance_series(&conn, SeriesMode::Equity, None)?;
    assert_eq!(equity.len(), 3);
    assert_eq!(equity[0].value, dec!(1000.00));
    assert_eq!(equity[2].value, dec!(1050.00));

    let twr = reports::performance_series(&conn, SeriesMode::Twr, None)?;
    assert_eq!(twr[0].value, dec!(100));
    assert_eq!(twr[1].value, dec!(110.0000));
    assert_eq!(twr[2].value, dec!(115.0000));

    let pnl = reports::performance_series(&conn, SeriesMode::Pnl, None)?;
    assert_eq!(pnl[2].value, dec!(150.00));

    let voo = reports::performance_series(&conn, SeriesMode::VooIndex, None)?;
    assert_eq!(voo[1].value, dec!(101.0000));
    assert_eq!(voo[2].value, dec!(102.0100));

    // windowed read keeps ascending order over the most recent rows
    let windowed = reports::performance_series(&conn, SeriesMode::Equity, Some(2))?;
    assert_eq!(windowed.len(), 2);
    assert_eq!(windowed[0].date, date(2026, 1, 2));

    Ok(())
}

#[test]
fn test_change_report_between_days() -> Result<()> {
    let (_tmp, conn) = create_test_db()?;

    ingest_positions_csv(&conn, POSITIONS_DAY1, "day1.csv", date(2026, 1, 12))?;

    // next day: AAPL fully gone, MSFT untouched
    let day2 = "\
Symbol,Description,Quantity,Last Price,Current Value
MSFT,MICROSOFT CORP,25,402.00,10050.00
SPAXX**,FIDELITY GOVERNMENT MONEY MARKET,21700.55,1.00,21700.55
";
    let (_, report) = ingest_positions_csv(&conn, day2, "day2.csv", date(2026, 1, 13))?;

    assert_eq!(report.prev_date, Some(date(2026, 1, 12)));
    assert_eq!(report.sold.len(), 1);
    assert_eq!(report.sold[0].ticker, "AAPL");
    assert_eq!(report.sold[0].quantity, dec!(100));
    // falls back to the prior snapshot's price when the ticker is gone
    assert_eq!(report.sold[0].price_est, dec!(180.00));
    assert_eq!(report.sold[0].value_est, dec!(18000.00));

    // the receipt is persisted and reloadable
    let stored = db::get_receipt(&conn, date(2026, 1, 13))?.unwrap();
    assert_eq!(stored.sold.len(), 1);
    assert_eq!(stored.sold[0].ticker, "AAPL");

    Ok(())
}

#[test]
fn test_opened_at_over_ledger() -> Result<()> {
    let (_tmp, conn) = create_test_db()?;

    let table = load_table(ACTIVITY_JAN.as_bytes(), "activity.csv")?;
    let source = SourceInfo::from_bytes("activity.csv", ACTIVITY_JAN.as_bytes());
    ingest_activity(&conn, &table, &source)?;

    // full ledger: AAPL fully exited on the 20th, MSFT still open
    let opened = reports::opened_at_map(&conn, None, None)?;
    assert!(!opened.contains_key("AAPL"));
    assert_eq!(opened.get("MSFT"), Some(&date(2026, 1, 10)));

    // bounded to the snapshot date, AAPL is still open
    let opened = reports::opened_at_map(&conn, None, Some(date(2026, 1, 12)))?;
    assert_eq!(opened.get("AAPL"), Some(&date(2026, 1, 10)));

    Ok(())
}
