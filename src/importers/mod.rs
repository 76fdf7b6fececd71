// Import module - statement table loading, schema detection, ingestion

pub mod activity;
pub mod performance;
pub mod positions;
pub mod schema;
pub mod table;

pub use activity::ingest_activity;
pub use performance::ingest_performance;
pub use positions::ingest_positions;
pub use schema::{ActivityColumns, PerformanceColumns, PositionColumns};
pub use table::{load_table, RawTable};
