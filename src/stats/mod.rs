//! Grouped descriptive statistics and the rank-based group comparison.
//! Everything here is a pure function over an immutable [`DataTable`];
//! the only state in the pipeline lives in the aggregate-layer cache.
//!
//! [`DataTable`]: crate::table::DataTable

pub mod describe;
pub mod kruskal;

pub use describe::{describe_numeric, grouped_summary, ColumnSummary, Descriptive, GroupSummary};
pub use kruskal::{compare_groups, GroupComparison, TestOutcome, SIGNIFICANCE_LEVEL};
