pub mod client;
pub mod error;
pub mod runner;
pub mod utils;

// Re-export common items
pub use error::{ReporterError, Result};
pub use runner::{run_reporter, ReportingSession};
