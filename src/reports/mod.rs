// Read-side reporting over the ingested store.

pub mod closed_trades;
pub mod lifecycle;
pub mod returns;

pub use closed_trades::find_closed_trades;
pub use lifecycle::{infer_opened_at, opened_at_map};
pub use returns::{compute_series, performance_series, SeriesMode, SeriesPoint};
