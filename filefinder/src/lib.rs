pub mod cancel;
pub mod config;
pub mod errors;
pub mod filters;
pub mod results;
pub mod search;
pub mod sink;
pub mod stats;

pub use cancel::{CancelReason, CancellationToken};
pub use config::ScanOptions;
pub use errors::{FinderError, FinderResult};
pub use results::MatchResult;
pub use search::{scan, Scanner};
pub use sink::ResultSink;
pub use stats::{AppStats, StatsSnapshot};
