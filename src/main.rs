use anyhow::Result;
use heliodash::{
    aggregate::{AggregateError, TableStore},
    config::SourceConfig,
    stats::{compare_groups, grouped_summary},
    table::{COUNTRY_COLUMN, SOLAR_METRICS},
};
use std::{env, path::Path};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Stand-in for the presentation layer: produce the combined table, the
/// grouped summary and the GHI comparison, and print them as JSON.
fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();
    info!("startup");

    // ─── 2) configure sources ────────────────────────────────────────
    let config = match env::args().nth(1) {
        Some(path) => SourceConfig::from_file(Path::new(&path))?,
        None => SourceConfig::default(),
    };
    info!(data_dir = %config.data_dir.display(), "using data directory");

    // ─── 3) aggregate all countries ──────────────────────────────────
    let store = TableStore::new(config.clone());
    let combined = match store.combined() {
        Ok(table) => table,
        Err(err) => {
            if let AggregateError::Load(failures) = &err {
                for failure in failures {
                    error!("{}", failure);
                }
            }
            anyhow::bail!("could not build combined table: {}", err);
        }
    };

    // ─── 4) grouped statistics + GHI comparison ──────────────────────
    let summary = grouped_summary(&combined, COUNTRY_COLUMN, &config.metrics)?;
    let group_names: Vec<String> = config.countries.iter().map(|c| c.to_string()).collect();
    let comparison = compare_groups(&combined, COUNTRY_COLUMN, SOLAR_METRICS[0], &group_names);

    let report = serde_json::json!({
        "rows": combined.num_rows(),
        "summary": summary,
        "ghi_comparison": comparison,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    info!("done");
    Ok(())
}
