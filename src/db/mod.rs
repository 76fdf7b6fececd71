// Database module - SQLite connection and models

pub mod models;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

pub use models::{
    ActivityStats, ChangeReport, ClosedTradeRecord, LedgerEvent, PerformanceDailyPoint, Position,
    PositionSnapshot, SellDayGroup, Side, SoldLine, SourceInfo, TradeRecord,
};

/// Get the default database path (~/.folio/data.db)
pub fn get_default_db_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let folio_dir = PathBuf::from(home).join(".folio");

    std::fs::create_dir_all(&folio_dir).context("Failed to create .folio directory")?;

    Ok(folio_dir.join("data.db"))
}

/// Open database connection
pub fn open_db(db_path: Option<PathBuf>) -> Result<Connection> {
    let path = db_path.unwrap_or(get_default_db_path()?);
    let conn = Connection::open(&path).context(format!("Failed to open database at {:?}", path))?;

    conn.execute("PRAGMA foreign_keys = ON", [])
        .context("Failed to enable foreign keys")?;

    Ok(conn)
}

/// Initialize the database with schema
pub fn init_database(db_path: Option<PathBuf>) -> Result<()> {
    let path = db_path.unwrap_or(get_default_db_path()?);

    info!("Initializing database at: {:?}", path);

    let conn = open_db(Some(path))?;

    let schema_sql = include_str!("schema.sql");
    conn.execute_batch(schema_sql)
        .context("Failed to execute schema")?;

    Ok(())
}

/// Apply the schema to an already-open connection (tests, in-memory DBs).
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(include_str!("schema.sql"))
        .context("Failed to execute schema")?;
    Ok(())
}

fn decimal_col(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let s: String = row.get(idx)?;
    Decimal::from_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn opt_decimal_col(row: &Row, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        None => Ok(None),
        Some(s) => Decimal::from_str(&s).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

/// SQL aggregates come back as whatever affinity SQLite settled on; accept
/// text, real or integer and parse to Decimal.
fn value_to_decimal(v: rusqlite::types::Value) -> Decimal {
    match v {
        rusqlite::types::Value::Text(s) => Decimal::from_str(&s).unwrap_or(Decimal::ZERO),
        rusqlite::types::Value::Real(f) => Decimal::try_from(f).unwrap_or(Decimal::ZERO),
        rusqlite::types::Value::Integer(i) => Decimal::from(i),
        _ => Decimal::ZERO,
    }
}

// ---------------------------------------------------------------------------
// snapshots
// ---------------------------------------------------------------------------

/// Replace the snapshot for its as-of date wholesale (aggregates row plus
/// all position rows) in one transaction. Re-uploading the same date
/// converges to the latest upload's content.
pub fn replace_snapshot(conn: &Connection, snap: &PositionSnapshot) -> Result<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO snapshots (
            as_of, non_cash_positions_value, cash_value, pending_amount,
            total_value, todays_pnl_total, source_filename, source_hash, source_bytes
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(as_of) DO UPDATE SET
            non_cash_positions_value = excluded.non_cash_positions_value,
            cash_value = excluded.cash_value,
            pending_amount = excluded.pending_amount,
            total_value = excluded.total_value,
            todays_pnl_total = excluded.todays_pnl_total,
            source_filename = excluded.source_filename,
            source_hash = excluded.source_hash,
            source_bytes = excluded.source_bytes,
            updated_at = datetime('now')",
        params![
            snap.as_of,
            snap.non_cash_positions_value.to_string(),
            snap.cash_value.to_string(),
            snap.pending_amount.to_string(),
            snap.total_value.to_string(),
            snap.todays_pnl_total.to_string(),
            snap.source.filename,
            snap.source.content_hash,
            snap.source.bytes as i64,
        ],
    )?;

    tx.execute(
        "DELETE FROM snapshot_positions WHERE as_of = ?1",
        params![snap.as_of],
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO snapshot_positions (
                as_of, seq, ticker, name, quantity, last_price, market_value,
                avg_cost, cost_value, day_change, total_change, weight_pct
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        for (seq, p) in snap.positions.iter().enumerate() {
            stmt.execute(params![
                snap.as_of,
                seq as i64,
                p.ticker,
                p.name,
                p.quantity.to_string(),
                p.last_price.map(|d| d.to_string()),
                p.market_value.map(|d| d.to_string()),
                p.avg_cost.map(|d| d.to_string()),
                p.cost_value.map(|d| d.to_string()),
                p.day_change.map(|d| d.to_string()),
                p.total_change.map(|d| d.to_string()),
                p.weight_pct.map(|d| d.to_string()),
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}

fn position_from_row(row: &Row) -> rusqlite::Result<Position> {
    Ok(Position {
        ticker: row.get(0)?,
        name: row.get(1)?,
        quantity: decimal_col(row, 2)?,
        last_price: opt_decimal_col(row, 3)?,
        market_value: opt_decimal_col(row, 4)?,
        avg_cost: opt_decimal_col(row, 5)?,
        cost_value: opt_decimal_col(row, 6)?,
        day_change: opt_decimal_col(row, 7)?,
        total_change: opt_decimal_col(row, 8)?,
        weight_pct: opt_decimal_col(row, 9)?,
    })
}

const POSITION_COLS: &str = "ticker, name, quantity, last_price, market_value, \
     avg_cost, cost_value, day_change, total_change, weight_pct";

/// Ordered positions of one snapshot.
pub fn positions_for(conn: &Connection, as_of: NaiveDate) -> Result<Vec<Position>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {POSITION_COLS} FROM snapshot_positions WHERE as_of = ?1 ORDER BY seq ASC"
    ))?;
    let rows = stmt
        .query_map(params![as_of], position_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Snapshot dates, newest first.
pub fn list_snapshot_dates(conn: &Connection, limit: usize) -> Result<Vec<NaiveDate>> {
    let mut stmt =
        conn.prepare("SELECT as_of FROM snapshots ORDER BY as_of DESC LIMIT ?1")?;
    let rows = stmt
        .query_map(params![limit as i64], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// The most recent snapshot strictly before `before`, with its positions.
pub fn latest_snapshot_before(
    conn: &Connection,
    before: NaiveDate,
) -> Result<Option<(NaiveDate, Vec<Position>)>> {
    let as_of: Option<NaiveDate> = conn
        .query_row(
            "SELECT as_of FROM snapshots WHERE as_of < ?1 ORDER BY as_of DESC LIMIT 1",
            params![before],
            |row| row.get(0),
        )
        .optional()?;

    match as_of {
        None => Ok(None),
        Some(d) => Ok(Some((d, positions_for(conn, d)?))),
    }
}

/// The most recent snapshot strictly before `before` that contains this
/// ticker, returning that snapshot's position record for the ticker.
pub fn latest_position_before(
    conn: &Connection,
    ticker: &str,
    before: NaiveDate,
) -> Result<Option<(NaiveDate, Position)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT as_of, {POSITION_COLS} FROM snapshot_positions
         WHERE ticker = ?1 AND as_of < ?2
         ORDER BY as_of DESC, seq ASC LIMIT 1"
    ))?;

    let row = stmt
        .query_row(params![ticker, before], |row| {
            let as_of: NaiveDate = row.get(0)?;
            let pos = Position {
                ticker: row.get(1)?,
                name: row.get(2)?,
                quantity: decimal_col(row, 3)?,
                last_price: opt_decimal_col(row, 4)?,
                market_value: opt_decimal_col(row, 5)?,
                avg_cost: opt_decimal_col(row, 6)?,
                cost_value: opt_decimal_col(row, 7)?,
                day_change: opt_decimal_col(row, 8)?,
                total_change: opt_decimal_col(row, 9)?,
                weight_pct: opt_decimal_col(row, 10)?,
            };
            Ok((as_of, pos))
        })
        .optional()?;

    Ok(row)
}

// ---------------------------------------------------------------------------
// receipts
// ---------------------------------------------------------------------------

/// Upsert the day-over-day change report for its date.
pub fn upsert_receipt(conn: &Connection, report: &ChangeReport, source: &SourceInfo) -> Result<()> {
    let sold_json = serde_json::to_string(&report.sold)?;
    conn.execute(
        "INSERT INTO receipts (
            date, prev_date, positions_count, sold_count, sold_value_est,
            sold_json, source_filename, source_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(date) DO UPDATE SET
            prev_date = excluded.prev_date,
            positions_count = excluded.positions_count,
            sold_count = excluded.sold_count,
            sold_value_est = excluded.sold_value_est,
            sold_json = excluded.sold_json,
            source_filename = excluded.source_filename,
            source_hash = excluded.source_hash,
            updated_at = datetime('now')",
        params![
            report.date,
            report.prev_date,
            report.positions_count as i64,
            report.sold_count() as i64,
            report.sold_value_est.to_string(),
            sold_json,
            source.filename,
            source.content_hash,
        ],
    )?;
    Ok(())
}

/// Load a stored change report, if any.
pub fn get_receipt(conn: &Connection, date: NaiveDate) -> Result<Option<ChangeReport>> {
    let row = conn
        .query_row(
            "SELECT prev_date, positions_count, sold_value_est, sold_json
             FROM receipts WHERE date = ?1",
            params![date],
            |row| {
                let prev_date: Option<NaiveDate> = row.get(0)?;
                let positions_count: i64 = row.get(1)?;
                let sold_value_est = decimal_col(row, 2)?;
                let sold_json: String = row.get(3)?;
                Ok((prev_date, positions_count, sold_value_est, sold_json))
            },
        )
        .optional()?;

    match row {
        None => Ok(None),
        Some((prev_date, positions_count, sold_value_est, sold_json)) => {
            let sold: Vec<SoldLine> =
                serde_json::from_str(&sold_json).context("corrupt sold_json in receipt")?;
            Ok(Some(ChangeReport {
                date,
                prev_date,
                positions_count: positions_count as usize,
                sold,
                sold_value_est,
            }))
        }
    }
}

// ---------------------------------------------------------------------------
// trades
// ---------------------------------------------------------------------------

/// Outcome of a trade upsert; only `Inserted` and `Updated` count as writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeWrite {
    Inserted,
    Updated,
    Unchanged,
}

/// Idempotent upsert by trade identity: insert on first sight, last write
/// wins on non-identity fields, no-op when nothing differs.
pub fn upsert_trade(conn: &Connection, t: &TradeRecord) -> Result<TradeWrite> {
    let existing: Option<(
        Option<NaiveDate>,
        Option<String>,
        Option<String>,
        Option<String>,
        Option<String>,
        String,
        Option<String>,
        Option<String>,
    )> = conn
        .query_row(
            "SELECT settlement_date, description, price, fees, value_est,
                    action_raw, source_filename, source_hash
             FROM trades WHERE trade_id = ?1",
            params![t.trade_id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            },
        )
        .optional()?;

    let price_s = t.price.map(|d| d.to_string());
    let fees_s = t.fees.map(|d| d.to_string());
    let value_s = t.value_est.map(|d| d.to_string());

    match existing {
        None => {
            conn.execute(
                "INSERT INTO trades (
                    trade_id, trade_date, settlement_date, side, ticker,
                    description, quantity, price, fees, value_est,
                    action_raw, source_filename, source_hash
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    t.trade_id,
                    t.trade_date,
                    t.settlement_date,
                    t.side.as_str(),
                    t.ticker,
                    t.description,
                    t.quantity.to_string(),
                    price_s,
                    fees_s,
                    value_s,
                    t.action_raw,
                    t.source_filename,
                    t.source_hash,
                ],
            )?;
            Ok(TradeWrite::Inserted)
        }
        Some((settle, desc, price, fees, value_est, action_raw, src_file, src_hash)) => {
            let unchanged = settle == t.settlement_date
                && desc == t.description
                && price == price_s
                && fees == fees_s
                && value_est == value_s
                && action_raw == t.action_raw
                && src_file.as_deref() == Some(t.source_filename.as_str())
                && src_hash.as_deref() == Some(t.source_hash.as_str());

            if unchanged {
                return Ok(TradeWrite::Unchanged);
            }

            conn.execute(
                "UPDATE trades SET
                    settlement_date = ?2, description = ?3, price = ?4, fees = ?5,
                    value_est = ?6, action_raw = ?7, source_filename = ?8,
                    source_hash = ?9, updated_at = datetime('now')
                 WHERE trade_id = ?1",
                params![
                    t.trade_id,
                    t.settlement_date,
                    t.description,
                    price_s,
                    fees_s,
                    value_s,
                    t.action_raw,
                    t.source_filename,
                    t.source_hash,
                ],
            )?;
            Ok(TradeWrite::Updated)
        }
    }
}

pub fn count_trades(conn: &Connection) -> Result<i64> {
    let n = conn.query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))?;
    Ok(n)
}

/// Point-in-time read of ledger rows for a lifecycle replay, in ascending
/// (trade_date, trade_id) order — the trade_id tiebreak keeps replays
/// stable across runs.
pub fn ledger_events(
    conn: &Connection,
    tickers: Option<&[String]>,
    cutoff: Option<NaiveDate>,
) -> Result<Vec<LedgerEvent>> {
    let mut sql =
        String::from("SELECT trade_date, side, ticker, quantity FROM trades");
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<String> = Vec::new();

    if let Some(c) = cutoff {
        args.push(c.format("%Y-%m-%d").to_string());
        clauses.push(format!("trade_date <= ?{}", args.len()));
    }
    if let Some(ts) = tickers {
        if ts.is_empty() {
            return Ok(Vec::new());
        }
        let mut placeholders = Vec::new();
        for t in ts {
            args.push(t.clone());
            placeholders.push(format!("?{}", args.len()));
        }
        clauses.push(format!("ticker IN ({})", placeholders.join(", ")));
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY trade_date ASC, trade_id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), |row| {
            let trade_date: NaiveDate = row.get(0)?;
            let side_s: String = row.get(1)?;
            let ticker: String = row.get(2)?;
            let quantity = decimal_col(row, 3)?;
            Ok((trade_date, side_s, ticker, quantity))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut events = Vec::with_capacity(rows.len());
    for (trade_date, side_s, ticker, quantity) in rows {
        let side = side_s
            .parse::<Side>()
            .map_err(|_| anyhow::anyhow!("unknown trade side {:?} in ledger", side_s))?;
        events.push(LedgerEvent {
            trade_date,
            side,
            ticker,
            quantity,
        });
    }
    Ok(events)
}

/// Group-and-sum SELL activity by (trade_date, ticker), newest day first.
pub fn sell_day_groups(
    conn: &Connection,
    start_date: NaiveDate,
    limit: usize,
) -> Result<Vec<SellDayGroup>> {
    let mut stmt = conn.prepare(
        "SELECT trade_date, ticker,
                SUM(quantity) AS qty_sold,
                SUM(CASE WHEN price IS NOT NULL THEN price * quantity ELSE 0 END) AS proceeds,
                COUNT(*) AS sell_count
         FROM trades
         WHERE side = 'SELL' AND trade_date >= ?1
         GROUP BY trade_date, ticker
         ORDER BY trade_date DESC
         LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(params![start_date, limit as i64], |row| {
            let trade_date: NaiveDate = row.get(0)?;
            let ticker: String = row.get(1)?;
            let qty_sold: rusqlite::types::Value = row.get(2)?;
            let proceeds: rusqlite::types::Value = row.get(3)?;
            let sell_count: i64 = row.get(4)?;
            Ok(SellDayGroup {
                trade_date,
                ticker,
                qty_sold: value_to_decimal(qty_sold),
                proceeds: value_to_decimal(proceeds),
                sell_count,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
}

// ---------------------------------------------------------------------------
// performance_daily
// ---------------------------------------------------------------------------

/// Upsert one daily performance row by date. Optional fields only
/// overwrite when present in the new row, so a later partial upload cannot
/// erase previously-stored benchmark closes.
pub fn upsert_performance_row(conn: &Connection, p: &PerformanceDailyPoint) -> Result<()> {
    conn.execute(
        "INSERT INTO performance_daily (
            date, balance, dollar_change, daily_return, net_flow,
            voo_close, qqq_close, source_file
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(date) DO UPDATE SET
            balance = excluded.balance,
            dollar_change = COALESCE(excluded.dollar_change, performance_daily.dollar_change),
            daily_return = COALESCE(excluded.daily_return, performance_daily.daily_return),
            net_flow = COALESCE(excluded.net_flow, performance_daily.net_flow),
            voo_close = COALESCE(excluded.voo_close, performance_daily.voo_close),
            qqq_close = COALESCE(excluded.qqq_close, performance_daily.qqq_close),
            source_file = excluded.source_file,
            updated_at = datetime('now')",
        params![
            p.date,
            p.balance.to_string(),
            p.dollar_change.map(|d| d.to_string()),
            p.daily_return.map(|d| d.to_string()),
            p.net_flow.map(|d| d.to_string()),
            p.voo_close.map(|d| d.to_string()),
            p.qqq_close.map(|d| d.to_string()),
            p.source_file,
        ],
    )?;
    Ok(())
}

/// The last `window` daily rows (all rows when `window` is `None`),
/// returned ascending by date for series construction.
pub fn performance_window(
    conn: &Connection,
    window: Option<usize>,
) -> Result<Vec<PerformanceDailyPoint>> {
    let limit = window.map(|w| w as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(
        "SELECT date, balance, dollar_change, daily_return, net_flow,
                voo_close, qqq_close, source_file
         FROM performance_daily
         ORDER BY date DESC
         LIMIT ?1",
    )?;

    let mut rows = stmt
        .query_map(params![limit], |row| {
            Ok(PerformanceDailyPoint {
                date: row.get(0)?,
                balance: decimal_col(row, 1)?,
                dollar_change: opt_decimal_col(row, 2)?,
                daily_return: opt_decimal_col(row, 3)?,
                net_flow: opt_decimal_col(row, 4)?,
                voo_close: opt_decimal_col(row, 5)?,
                qqq_close: opt_decimal_col(row, 6)?,
                source_file: row.get(7)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.reverse();
    Ok(rows)
}
