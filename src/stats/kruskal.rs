use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::warn;

use crate::table::DataTable;

/// Significance threshold for the comparison verdict.
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TestOutcome {
    Completed {
        statistic: f64,
        p_value: f64,
        /// `p_value < SIGNIFICANCE_LEVEL`
        significant: bool,
    },
    /// The test could not be run; never surfaced as a crash.
    NotApplicable { reason: String },
}

/// Result of comparing one metric across groups: which groups had to be
/// excluded for lack of valid observations, and the test outcome over the
/// rest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupComparison {
    pub metric: String,
    pub excluded: Vec<String>,
    pub outcome: TestOutcome,
}

/// Kruskal–Wallis H-test on `metric`, partitioned by `group_col`, restricted
/// to the requested `groups`. Null and non-finite observations are dropped;
/// a group left with no observations is excluded and reported, and the test
/// runs over the remainder if at least two groups survive.
pub fn compare_groups(
    table: &DataTable,
    group_col: &str,
    metric: &str,
    groups: &[String],
) -> GroupComparison {
    let not_applicable = |reason: String, excluded: Vec<String>| GroupComparison {
        metric: metric.to_string(),
        excluded,
        outcome: TestOutcome::NotApplicable { reason },
    };

    let Some(labels) = table.string_values(group_col) else {
        return not_applicable(
            format!("grouping column `{}` is not categorical", group_col),
            groups.to_vec(),
        );
    };
    let Some(values) = table.numeric_values(metric) else {
        return not_applicable(
            format!("metric column `{}` is not numeric", metric),
            groups.to_vec(),
        );
    };

    let mut samples: Vec<Vec<f64>> = Vec::with_capacity(groups.len());
    let mut excluded = Vec::new();
    for group in groups {
        let sample: Vec<f64> = labels
            .iter()
            .zip(&values)
            .filter(|(label, _)| label.as_deref() == Some(group.as_str()))
            .filter_map(|(_, v)| *v)
            .filter(|v| v.is_finite())
            .collect();
        if sample.is_empty() {
            warn!(group = %group, metric = %metric, "no valid observations, excluding from test");
            excluded.push(group.clone());
        } else {
            samples.push(sample);
        }
    }

    if samples.len() < 2 {
        return not_applicable(
            format!("only {} group(s) with valid observations", samples.len()),
            excluded,
        );
    }

    let Some((statistic, dof)) = h_statistic(&samples) else {
        return not_applicable("all observations are identical".to_string(), excluded);
    };

    let p_value = match ChiSquared::new(dof as f64) {
        Ok(dist) => dist.sf(statistic),
        Err(_) => {
            return not_applicable(format!("invalid degrees of freedom: {}", dof), excluded)
        }
    };

    GroupComparison {
        metric: metric.to_string(),
        excluded,
        outcome: TestOutcome::Completed {
            statistic,
            p_value,
            significant: p_value < SIGNIFICANCE_LEVEL,
        },
    }
}

/// Tie-corrected H statistic over average ranks. Returns `None` when every
/// pooled observation is identical, where the statistic is undefined.
fn h_statistic(samples: &[Vec<f64>]) -> Option<(f64, usize)> {
    let total: usize = samples.iter().map(Vec::len).sum();
    let n = total as f64;

    let mut pooled: Vec<(f64, usize)> = samples
        .iter()
        .enumerate()
        .flat_map(|(g, s)| s.iter().map(move |v| (*v, g)))
        .collect();
    pooled.sort_by(|a, b| a.0.total_cmp(&b.0));

    // Average ranks across ties; accumulate Σ(t³ − t) for the correction.
    let mut rank_sums = vec![0f64; samples.len()];
    let mut tie_term = 0f64;
    let mut i = 0;
    while i < total {
        let mut j = i;
        while j < total && pooled[j].0 == pooled[i].0 {
            j += 1;
        }
        let rank = (i + 1 + j) as f64 / 2.0;
        let ties = (j - i) as f64;
        if ties > 1.0 {
            tie_term += ties * ties * ties - ties;
        }
        for (_, group) in &pooled[i..j] {
            rank_sums[*group] += rank;
        }
        i = j;
    }

    let correction = 1.0 - tie_term / (n * n * n - n);
    if correction <= 0.0 {
        return None;
    }

    let rank_part: f64 = samples
        .iter()
        .enumerate()
        .map(|(g, s)| rank_sums[g] * rank_sums[g] / s.len() as f64)
        .sum();
    let h = 12.0 / (n * (n + 1.0)) * rank_part - 3.0 * (n + 1.0);

    Some((h / correction, samples.len() - 1))
}
