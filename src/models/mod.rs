//! Data models for test execution
//!
//! This module contains all data structures used throughout the application.

mod test_result;
mod unit;

pub use test_result::{AttemptResult, RunSummary, TestStatus, UnitVerdict, LOCAL_EXECUTOR};
pub use unit::TestUnit;
