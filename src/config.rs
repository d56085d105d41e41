use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::table::{Country, SOLAR_METRICS};

static DEFAULT_METRICS: Lazy<Vec<String>> =
    Lazy::new(|| SOLAR_METRICS.iter().map(|m| (*m).to_string()).collect());

/// Where the cleaned CSVs live and which countries/metrics drive the
/// analysis. Deserializable from a JSON file; every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_countries")]
    pub countries: Vec<Country>,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_countries() -> Vec<Country> {
    Country::ALL.to_vec()
}

fn default_metrics() -> Vec<String> {
    DEFAULT_METRICS.clone()
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            data_dir: default_data_dir(),
            countries: default_countries(),
            metrics: default_metrics(),
        }
    }
}

impl SourceConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config `{}`", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing config `{}`", path.display()))
    }
}
