use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "folio")]
#[command(
    version,
    about = "Brokerage statement ingestion and portfolio reconciliation"
)]
#[command(
    long_about = "Ingest broker-exported spreadsheets (positions, trade activity, daily \
performance) into a reconciled local store and report closed trades, inferred \
position open dates and normalized performance series."
)]
pub struct Cli {
    /// Database file (defaults to ~/.folio/data.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Output results in JSON format
    #[arg(long = "json", global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database schema
    Init,

    /// Ingest a statement upload
    Ingest {
        #[command(subcommand)]
        kind: IngestCommands,
    },

    /// Reports over the ingested store
    Report {
        #[command(subcommand)]
        kind: ReportCommands,
    },

    /// Stored snapshot inspection
    Snapshot {
        #[command(subcommand)]
        kind: SnapshotCommands,
    },
}

#[derive(Subcommand)]
pub enum IngestCommands {
    /// Positions export for one as-of date (replaces that date's snapshot)
    Positions {
        /// Path to the .csv/.tsv/.txt or .xlsx/.xlsm export
        file: String,

        /// Snapshot date, YYYY-MM-DD
        #[arg(long)]
        as_of: String,

        /// Preview only, don't save to database
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Trade-activity export (idempotent upsert by trade identity)
    Activity {
        /// Path to the export file
        file: String,

        /// Preview only, don't save to database
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Daily balance/flow export feeding the returns engine
    Performance {
        /// Path to the export file
        file: String,

        /// Preview only, don't save to database
        #[arg(short, long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Fully closed positions with realized P&L, newest close first
    Closed {
        /// Earliest sell date to consider, YYYY-MM-DD
        #[arg(long, default_value = "2025-01-01")]
        start: String,

        /// Maximum sell-day groups examined
        #[arg(long, default_value_t = 500)]
        limit: usize,
    },

    /// Normalized performance series
    Series {
        /// One of: equity, twr, pnl, index, voo_index, qqq_index
        #[arg(long, default_value = "equity")]
        mode: String,

        /// Only the last N daily rows
        #[arg(long)]
        window: Option<usize>,
    },

    /// Inferred dates each ticker most recently went from flat to held
    OpenedAt {
        /// Replay cutoff date, YYYY-MM-DD (defaults to the whole ledger)
        #[arg(long)]
        as_of: Option<String>,

        /// Restrict to these tickers (default: all)
        tickers: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum SnapshotCommands {
    /// List stored snapshot dates, newest first
    List {
        #[arg(long, default_value_t = 200)]
        limit: usize,
    },

    /// Show the positions stored for one as-of date
    Show {
        /// Snapshot date, YYYY-MM-DD
        as_of: String,
    },
}
