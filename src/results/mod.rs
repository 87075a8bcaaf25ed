//! Results module
//!
//! Event reports per run directory, their aggregation, and report rendering.

mod aggregate;
mod event_report;
mod report;

pub use aggregate::{AggregatedReport, ReportAggregator};
pub use event_report::{list_run_directories, EventReport, RunDirAllocator, RUN_DIR_PREFIX};
pub use report::{render, ReportFormat};

#[cfg(test)]
pub use event_report::REPORT_FILE_NAME;
