use anyhow::{anyhow, Result};
use serde::Serialize;
use statrs::statistics::{Data, Median, Statistics};

use crate::table::DataTable;

/// Mean, median and sample standard deviation (n−1 denominator) of the
/// non-null observations behind one (group, metric) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Descriptive {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
}

/// One summary record per (group, metric). `stats` is `None` when the group
/// has zero non-null observations for the metric; that marker is never
/// collapsed into a numeric zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub group: String,
    pub metric: String,
    pub stats: Option<Descriptive>,
}

/// Whole-table summary of one numeric column (single-country panel).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub column: String,
    pub stats: Option<Descriptive>,
}

fn summarize(values: &[f64]) -> Option<Descriptive> {
    if values.is_empty() {
        return None;
    }
    Some(Descriptive {
        count: values.len(),
        mean: values.mean(),
        median: Data::new(values.to_vec()).median(),
        std_dev: values.std_dev(),
    })
}

/// Partition `table` by the labels of `group_col` and summarize each metric
/// within each group. Groups appear in first-occurrence order; a metric
/// column absent from the table yields the no-data marker for every group.
pub fn grouped_summary(
    table: &DataTable,
    group_col: &str,
    metrics: &[String],
) -> Result<Vec<GroupSummary>> {
    let labels = table
        .string_values(group_col)
        .ok_or_else(|| anyhow!("grouping column `{}` must be categorical", group_col))?;

    let mut groups: Vec<String> = Vec::new();
    for label in labels.iter().flatten() {
        if !groups.iter().any(|g| g == label) {
            groups.push(label.clone());
        }
    }

    let mut records = Vec::with_capacity(groups.len() * metrics.len());
    for metric in metrics {
        let values = table.numeric_values(metric);
        for group in &groups {
            let group_values: Vec<f64> = match &values {
                Some(vs) => labels
                    .iter()
                    .zip(vs)
                    .filter(|(label, _)| label.as_deref() == Some(group.as_str()))
                    .filter_map(|(_, v)| *v)
                    .collect(),
                None => Vec::new(),
            };
            records.push(GroupSummary {
                group: group.clone(),
                metric: metric.clone(),
                stats: summarize(&group_values),
            });
        }
    }

    Ok(records)
}

/// Summarize every numeric column of the table, ungrouped.
pub fn describe_numeric(table: &DataTable) -> Vec<ColumnSummary> {
    table
        .numeric_columns()
        .iter()
        .map(|column| {
            let values: Vec<f64> = table
                .numeric_values(column)
                .unwrap_or_default()
                .into_iter()
                .flatten()
                .collect();
            ColumnSummary {
                column: (*column).to_string(),
                stats: summarize(&values),
            }
        })
        .collect()
}
