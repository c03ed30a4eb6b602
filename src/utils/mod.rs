//! Shared helpers for Arrow columns and operation logging

pub mod arrow;
pub mod logging;

pub use logging::{log_operation_complete, log_operation_start, log_warning};
