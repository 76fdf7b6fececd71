mod cli;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use colored::Colorize;
use rusqlite::Connection;
use std::path::PathBuf;
use tabled::{settings::Style, Table, Tabled};
use tracing::info;

use cli::{Cli, Commands, IngestCommands, ReportCommands, SnapshotCommands};
use folio::db::{self, ChangeReport, PositionSnapshot};
use folio::importers::{self, load_table};
use folio::reports;
use folio::utils::format_currency;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            db::init_database(cli.db)?;
            println!("{} Database initialized", "✓".green().bold());
            Ok(())
        }

        Commands::Ingest { kind } => match kind {
            IngestCommands::Positions {
                file,
                as_of,
                dry_run,
            } => handle_ingest_positions(&file, &as_of, dry_run, cli.db, cli.json),
            IngestCommands::Activity { file, dry_run } => {
                handle_ingest_activity(&file, dry_run, cli.db, cli.json)
            }
            IngestCommands::Performance { file, dry_run } => {
                handle_ingest_performance(&file, dry_run, cli.db, cli.json)
            }
        },

        Commands::Report { kind } => match kind {
            ReportCommands::Closed { start, limit } => {
                handle_report_closed(&start, limit, cli.db, cli.json)
            }
            ReportCommands::Series { mode, window } => {
                handle_report_series(&mode, window, cli.db, cli.json)
            }
            ReportCommands::OpenedAt { as_of, tickers } => {
                handle_report_opened_at(as_of.as_deref(), &tickers, cli.db, cli.json)
            }
        },

        Commands::Snapshot { kind } => match kind {
            SnapshotCommands::List { limit } => handle_snapshot_list(limit, cli.db, cli.json),
            SnapshotCommands::Show { as_of } => handle_snapshot_show(&as_of, cli.db, cli.json),
        },
    }
}

fn parse_iso_date(s: &str, what: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("{what} must be YYYY-MM-DD, got {s:?}"))
}

/// A dry run ingests into a throwaway in-memory database so the preview
/// exercises exactly the code a real ingest would.
fn open_target_db(dry_run: bool, db_path: Option<PathBuf>) -> Result<Connection> {
    if dry_run {
        let conn = Connection::open_in_memory()?;
        db::apply_schema(&conn)?;
        Ok(conn)
    } else {
        db::init_database(db_path.clone())?;
        db::open_db(db_path)
    }
}

fn read_upload(file: &str) -> Result<(importers::RawTable, db::SourceInfo)> {
    let raw = std::fs::read(file).with_context(|| format!("failed to read {file}"))?;
    let filename = std::path::Path::new(file)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file);
    let table = load_table(&raw, filename)?;
    let source = db::SourceInfo::from_bytes(filename, &raw);
    Ok((table, source))
}

fn handle_ingest_positions(
    file: &str,
    as_of: &str,
    dry_run: bool,
    db_path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let as_of = parse_iso_date(as_of, "as_of")?;
    info!("Ingesting positions from: {}", file);

    let (table, source) = read_upload(file)?;
    let conn = open_target_db(dry_run, db_path)?;
    let (snap, report) = importers::ingest_positions(&conn, &table, as_of, &source)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "as_of": snap.as_of,
                "positions_written": snap.positions.len(),
                "total_value": snap.total_value,
                "pending_amount": snap.pending_amount,
                "content_hash": snap.source.content_hash,
                "receipt": report,
            })
        );
        return Ok(());
    }

    print_snapshot_summary(&snap, &report);

    if dry_run {
        println!("\n{} Dry run - no changes saved", "ℹ".blue().bold());
    }
    Ok(())
}

fn print_snapshot_summary(snap: &PositionSnapshot, report: &ChangeReport) {
    #[derive(Tabled)]
    struct PositionPreview {
        #[tabled(rename = "Symbol")]
        symbol: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Price")]
        price: String,
        #[tabled(rename = "Value")]
        value: String,
    }

    println!(
        "\n{} Snapshot {} parsed: {} positions\n",
        "✓".green().bold(),
        snap.as_of,
        snap.positions.len()
    );

    let preview: Vec<PositionPreview> = snap
        .positions
        .iter()
        .take(10)
        .map(|p| PositionPreview {
            symbol: p.ticker.clone(),
            name: p.name.clone().unwrap_or_else(|| "—".to_string()),
            quantity: p.quantity.to_string(),
            price: p
                .last_price
                .map(format_currency)
                .unwrap_or_else(|| "—".to_string()),
            value: p
                .market_value
                .map(format_currency)
                .unwrap_or_else(|| "—".to_string()),
        })
        .collect();

    let table = Table::new(preview).with(Style::rounded()).to_string();
    println!("{}", table);

    if snap.positions.len() > 10 {
        println!("... and {} more positions", snap.positions.len() - 10);
    }

    println!("\n  Total value:   {}", format_currency(snap.total_value));
    println!(
        "  Non-cash:      {}",
        format_currency(snap.non_cash_positions_value)
    );
    println!("  Cash:          {}", format_currency(snap.cash_value));
    println!("  Pending:       {}", format_currency(snap.pending_amount));

    if !report.sold.is_empty() {
        println!(
            "\n  {} position(s) shrank since {}:",
            report.sold.len().to_string().yellow(),
            report
                .prev_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "—".to_string())
        );
        for line in &report.sold {
            println!(
                "    {} -{} (≈{})",
                line.ticker,
                line.quantity,
                format_currency(line.value_est)
            );
        }
    }
}

fn handle_ingest_activity(
    file: &str,
    dry_run: bool,
    db_path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    info!("Ingesting activity from: {}", file);

    let (table, source) = read_upload(file)?;
    let conn = open_target_db(dry_run, db_path)?;
    let stats = importers::ingest_activity(&conn, &table, &source)?;

    if json {
        println!("{}", serde_json::to_string(&stats)?);
        return Ok(());
    }

    println!("\n{} Activity ingest complete!", "✓".green().bold());
    println!("  Written: {}", stats.written.to_string().green());
    println!("  Skipped: {}", stats.skipped.to_string().yellow());
    println!("  Seen:    {}", stats.seen);

    if dry_run {
        println!("\n{} Dry run - no changes saved", "ℹ".blue().bold());
    }
    Ok(())
}

fn handle_ingest_performance(
    file: &str,
    dry_run: bool,
    db_path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    info!("Ingesting performance rows from: {}", file);

    let (table, source) = read_upload(file)?;
    let conn = open_target_db(dry_run, db_path)?;
    let written = importers::ingest_performance(&conn, &table, &source)?;

    if json {
        println!("{}", serde_json::json!({ "rows_written": written }));
        return Ok(());
    }

    println!(
        "\n{} Performance ingest complete: {} row(s) written",
        "✓".green().bold(),
        written
    );
    if dry_run {
        println!("\n{} Dry run - no changes saved", "ℹ".blue().bold());
    }
    Ok(())
}

fn handle_report_closed(
    start: &str,
    limit: usize,
    db_path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let start = parse_iso_date(start, "start")?;
    let conn = db::open_db(db_path)?;
    let closed = reports::find_closed_trades(&conn, start, limit)?;

    if json {
        println!("{}", serde_json::to_string(&closed)?);
        return Ok(());
    }

    if closed.is_empty() {
        println!("No fully closed positions since {}", start);
        return Ok(());
    }

    #[derive(Tabled)]
    struct ClosedRow {
        #[tabled(rename = "Ticker")]
        ticker: String,
        #[tabled(rename = "Opened")]
        opened: String,
        #[tabled(rename = "Closed")]
        closed: String,
        #[tabled(rename = "Days")]
        days: String,
        #[tabled(rename = "Qty")]
        qty: String,
        #[tabled(rename = "Avg Cost")]
        avg_cost: String,
        #[tabled(rename = "Sell Price")]
        sell_price: String,
        #[tabled(rename = "P&L")]
        pnl: String,
        #[tabled(rename = "P&L %")]
        pnl_pct: String,
    }

    let dash = || "—".to_string();
    let rows: Vec<ClosedRow> = closed
        .iter()
        .map(|c| ClosedRow {
            ticker: c.ticker.clone(),
            opened: c.open_date.map(|d| d.to_string()).unwrap_or_else(dash),
            closed: c.close_date.to_string(),
            days: c.days_held.map(|d| d.to_string()).unwrap_or_else(dash),
            qty: c.quantity.to_string(),
            avg_cost: c.avg_cost.map(format_currency).unwrap_or_else(dash),
            sell_price: c.sell_price.map(format_currency).unwrap_or_else(dash),
            pnl: format_currency(c.pnl_amount),
            pnl_pct: c
                .pnl_pct
                .map(|p| format!("{}%", (p * rust_decimal::Decimal::ONE_HUNDRED).round_dp(2)))
                .unwrap_or_else(dash),
        })
        .collect();

    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
    println!("{} closed position(s)", closed.len());
    Ok(())
}

fn handle_report_series(
    mode: &str,
    window: Option<usize>,
    db_path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let Ok(mode) = mode.parse::<reports::SeriesMode>() else {
        bail!("unknown series mode {mode:?} (expected equity|twr|pnl|index|voo_index|qqq_index)");
    };

    let conn = db::open_db(db_path)?;
    let series = reports::performance_series(&conn, mode, window)?;

    if json {
        println!("{}", serde_json::to_string(&series)?);
        return Ok(());
    }

    if series.is_empty() {
        println!("No performance rows ingested");
        return Ok(());
    }

    for p in &series {
        println!("{}  {}", p.date, p.value);
    }
    println!("{} point(s), mode {}", series.len(), mode.as_str());
    Ok(())
}

fn handle_report_opened_at(
    as_of: Option<&str>,
    tickers: &[String],
    db_path: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let cutoff = as_of.map(|s| parse_iso_date(s, "as_of")).transpose()?;
    let conn = db::open_db(db_path)?;

    let filter: Option<Vec<String>> = if tickers.is_empty() {
        None
    } else {
        Some(tickers.iter().map(|t| t.to_uppercase()).collect())
    };

    let opened = reports::opened_at_map(&conn, filter.as_deref(), cutoff)?;

    if json {
        println!("{}", serde_json::to_string(&opened)?);
        return Ok(());
    }

    if opened.is_empty() {
        println!("No open positions inferred from the ledger");
        return Ok(());
    }

    let mut entries: Vec<_> = opened.into_iter().collect();
    entries.sort();
    for (ticker, date) in entries {
        println!("{}  opened {}", ticker, date);
    }
    Ok(())
}

fn handle_snapshot_list(limit: usize, db_path: Option<PathBuf>, json: bool) -> Result<()> {
    let conn = db::open_db(db_path)?;
    let dates = db::list_snapshot_dates(&conn, limit)?;

    if json {
        println!("{}", serde_json::to_string(&dates)?);
        return Ok(());
    }

    for d in &dates {
        println!("{}", d);
    }
    println!("{} snapshot(s)", dates.len());
    Ok(())
}

fn handle_snapshot_show(as_of: &str, db_path: Option<PathBuf>, json: bool) -> Result<()> {
    let as_of = parse_iso_date(as_of, "as_of")?;
    let conn = db::open_db(db_path)?;
    let positions = db::positions_for(&conn, as_of)?;

    if positions.is_empty() {
        bail!("no snapshot stored for {as_of}");
    }

    if json {
        println!("{}", serde_json::to_string(&positions)?);
        return Ok(());
    }

    for p in &positions {
        println!(
            "{:<10} {:>14}  {}",
            p.ticker,
            p.quantity,
            p.market_value
                .map(format_currency)
                .unwrap_or_else(|| "—".to_string())
        );
    }
    println!("{} position(s) as of {}", positions.len(), as_of);
    Ok(())
}
