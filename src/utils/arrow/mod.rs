//! Arrow data handling utilities
//!
//! This module contains utilities for working with Arrow arrays and record
//! batches: column lookup, typed extraction and column replacement.

pub mod array_utils;
pub mod conversion;

// Re-export commonly used functions for convenience
pub use array_utils::{columns_containing, downcast_array, get_column, with_column};
pub use conversion::{
    array_to_date, array_to_f64, array_to_i64, array_to_string, arrow_date_to_naive_date,
    column_date, column_f64, column_i64, column_string, naive_date_to_arrow_date,
};
