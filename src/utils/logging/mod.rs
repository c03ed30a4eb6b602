//! Logging utilities
//!
//! Standardized messages for the start and end of each pipeline operation.

pub mod log;

pub use self::log::{log_operation_complete, log_operation_start, log_warning};
