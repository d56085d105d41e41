use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use arrow::array::BooleanArray;
use arrow::compute::{and, filter_record_batch};
use tracing::debug;

use crate::table::DataTable;

/// A row predicate. Predicates in a set are AND-ed together.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Inclusive `[low, high]` bound on a numeric column. An unspecified
    /// bound defaults to the column's observed minimum/maximum, so a fully
    /// unspecified range keeps every non-null row.
    NumericRange {
        column: String,
        low: Option<f64>,
        high: Option<f64>,
    },
    /// Row's value must be a member of the accepted label set.
    Membership {
        column: String,
        accepted: HashSet<String>,
    },
}

impl Predicate {
    pub fn range(column: impl Into<String>, low: Option<f64>, high: Option<f64>) -> Self {
        Predicate::NumericRange {
            column: column.into(),
            low,
            high,
        }
    }

    pub fn within<I, S>(column: impl Into<String>, accepted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::Membership {
            column: column.into(),
            accepted: accepted.into_iter().map(Into::into).collect(),
        }
    }
}

/// The column a range slider defaults to: the first numeric column.
pub fn default_range_column(table: &DataTable) -> Option<&str> {
    table.numeric_columns().first().copied()
}

/// Derive a new table containing only rows satisfying every predicate.
/// The input is never mutated. Range predicates over absent or non-numeric
/// columns are no-ops, so a table with no numeric columns passes through
/// range filtering unchanged.
pub fn apply(table: &DataTable, predicates: &[Predicate]) -> Result<DataTable> {
    let mut mask: Option<BooleanArray> = None;

    for predicate in predicates {
        let next = match predicate {
            Predicate::NumericRange { column, low, high } => {
                match range_mask(table, column, *low, *high) {
                    Some(m) => m,
                    None => {
                        debug!(column = %column, "range filter skipped (no numeric values)");
                        continue;
                    }
                }
            }
            Predicate::Membership { column, accepted } => {
                membership_mask(table, column, accepted)?
            }
        };

        mask = Some(match mask {
            None => next,
            Some(prev) => and(&prev, &next).context("combining filter masks")?,
        });
    }

    match mask {
        None => Ok(table.clone()),
        Some(mask) => {
            let filtered =
                filter_record_batch(table.batch(), &mask).context("applying row filter")?;
            Ok(table.with_batch(filtered))
        }
    }
}

/// Rows with a null in the ranged column never match, mirroring how numeric
/// comparisons against missing values behave in the source data tooling.
fn range_mask(
    table: &DataTable,
    column: &str,
    low: Option<f64>,
    high: Option<f64>,
) -> Option<BooleanArray> {
    let values = table.numeric_values(column)?;

    let observed = |pick: fn(f64, f64) -> f64| {
        values
            .iter()
            .flatten()
            .copied()
            .filter(|v| v.is_finite())
            .reduce(pick)
    };
    let low = low.or_else(|| observed(f64::min))?;
    let high = high.or_else(|| observed(f64::max))?;

    Some(
        values
            .iter()
            .map(|v| Some(matches!(v, Some(x) if *x >= low && *x <= high)))
            .collect(),
    )
}

fn membership_mask(
    table: &DataTable,
    column: &str,
    accepted: &HashSet<String>,
) -> Result<BooleanArray> {
    let values = table.string_values(column).ok_or_else(|| {
        anyhow!("membership filter requires a categorical column, `{}` is not one", column)
    })?;

    Ok(values
        .iter()
        .map(|v| Some(matches!(v, Some(s) if accepted.contains(s))))
        .collect())
}
