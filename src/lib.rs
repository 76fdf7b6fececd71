//! Folio - brokerage statement ingestion and portfolio reconciliation
//!
//! This library turns broker-exported spreadsheets (position snapshots and
//! trade-activity logs) into a reconciled time series of portfolio state:
//! point-in-time holdings, a deduplicated trade ledger, inferred position
//! open/close events, and normalized performance curves.

pub mod db;
pub mod error;
pub mod importers;
pub mod normalize;
pub mod reports;
pub mod utils;
