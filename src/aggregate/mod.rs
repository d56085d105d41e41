use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use arrow::array::ArrayRef;
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{DataType, Field, FieldRef, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde::Serialize;
use tracing::{error, info};

use crate::config::SourceConfig;
use crate::load::{load_country, LoadFailure};
use crate::table::{Country, DataTable};

/// Identity of a load request; cache entries live until process restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Single(Country),
    Combined,
}

/// Why the combined table could not be produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AggregateError {
    /// At least one country failed to load; carries every per-country
    /// diagnostic, not just the first.
    Load(Vec<LoadFailure>),
    /// No countries configured, so there is nothing to aggregate.
    NoSources,
    /// Designated metric columns absent after concatenation; the combined
    /// table is discarded.
    SchemaViolation { missing: Vec<String> },
    /// Concatenation itself failed (mismatched data, kernel error).
    Internal(String),
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateError::Load(failures) => {
                write!(f, "{} of the configured countries failed to load", failures.len())
            }
            AggregateError::NoSources => write!(f, "no countries configured"),
            AggregateError::SchemaViolation { missing } => {
                write!(f, "required metric columns missing: {}", missing.join(", "))
            }
            AggregateError::Internal(msg) => write!(f, "aggregation failed: {}", msg),
        }
    }
}

type Slot = Arc<Mutex<Option<Arc<DataTable>>>>;

/// Owns the source configuration and the process-lifetime load cache.
///
/// Each cache key has its own slot mutex, so at most one load per key is in
/// flight even when sessions share the store, while loads for different keys
/// proceed independently. There is no eviction; entries live until restart.
pub struct TableStore {
    config: SourceConfig,
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl TableStore {
    pub fn new(config: SourceConfig) -> Self {
        TableStore {
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    fn slot(&self, key: CacheKey) -> Slot {
        let mut slots = self.slots.lock().unwrap();
        slots.entry(key).or_default().clone()
    }

    /// Memoized single-country load. Failures are not cached, so a fixed
    /// data file is picked up on the next request.
    pub fn country(&self, country: Country) -> Result<Arc<DataTable>, LoadFailure> {
        let slot = self.slot(CacheKey::Single(country));
        let mut guard = slot.lock().unwrap();
        if let Some(table) = guard.as_ref() {
            return Ok(table.clone());
        }
        let table = Arc::new(load_country(&self.config.data_dir, country)?);
        *guard = Some(table.clone());
        Ok(table)
    }

    /// Memoized combined table over every configured country.
    pub fn combined(&self) -> Result<Arc<DataTable>, AggregateError> {
        let slot = self.slot(CacheKey::Combined);
        let mut guard = slot.lock().unwrap();
        if let Some(table) = guard.as_ref() {
            return Ok(table.clone());
        }
        let table = Arc::new(self.aggregate()?);
        *guard = Some(table.clone());
        Ok(table)
    }

    fn aggregate(&self) -> Result<DataTable, AggregateError> {
        if self.config.countries.is_empty() {
            error!("no countries configured; nothing to aggregate");
            return Err(AggregateError::NoSources);
        }

        let mut tables = Vec::with_capacity(self.config.countries.len());
        let mut failures = Vec::new();
        for &country in &self.config.countries {
            match self.country(country) {
                Ok(table) => tables.push(table),
                Err(failure) => failures.push(failure),
            }
        }

        // Downstream comparisons need every country, so any failure voids
        // the aggregate; the caller still gets the full diagnostic list.
        if !failures.is_empty() {
            for failure in &failures {
                error!("{}", failure);
            }
            return Err(AggregateError::Load(failures));
        }

        let combined =
            combine(&tables).map_err(|e| AggregateError::Internal(format!("{:#}", e)))?;

        let missing: Vec<String> = self
            .config
            .metrics
            .iter()
            .filter(|m| !combined.has_column(m))
            .cloned()
            .collect();
        if !missing.is_empty() {
            error!(missing = %missing.join(", "), "combined table violates metric schema");
            return Err(AggregateError::SchemaViolation { missing });
        }

        info!(
            rows = combined.num_rows(),
            countries = self.config.countries.len(),
            "combined table ready"
        );
        Ok(combined)
    }
}

/// Row-wise concatenation with column-wise union: columns absent from a
/// contributor are null-filled, and a name shared across contributors with
/// conflicting types is widened to Utf8.
fn combine(tables: &[Arc<DataTable>]) -> Result<DataTable> {
    let batches: Vec<&RecordBatch> = tables.iter().map(|t| t.batch()).collect();
    let schema = union_schema(&batches);

    let aligned = batches
        .iter()
        .map(|b| align(b, &schema))
        .collect::<Result<Vec<_>>>()?;

    let combined = concat_batches(&schema, &aligned).context("concatenating country tables")?;
    Ok(DataTable::new(combined))
}

fn union_schema(batches: &[&RecordBatch]) -> SchemaRef {
    let mut fields: Vec<FieldRef> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for batch in batches {
        for field in batch.schema_ref().fields() {
            match by_name.get(field.name()) {
                None => {
                    by_name.insert(field.name().clone(), fields.len());
                    fields.push(Arc::new(Field::new(
                        field.name(),
                        field.data_type().clone(),
                        true,
                    )));
                }
                Some(&idx) => {
                    if fields[idx].data_type() != field.data_type() {
                        fields[idx] =
                            Arc::new(Field::new(field.name(), DataType::Utf8, true));
                    }
                }
            }
        }
    }

    Arc::new(Schema::new(fields))
}

fn align(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    let columns = schema
        .fields()
        .iter()
        .map(|field| -> Result<ArrayRef> {
            match batch.column_by_name(field.name()) {
                Some(col) if col.data_type() == field.data_type() => Ok(col.clone()),
                Some(col) => cast(col, field.data_type())
                    .with_context(|| format!("widening column `{}`", field.name())),
                None => Ok(arrow::array::new_null_array(
                    field.data_type(),
                    batch.num_rows(),
                )),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    RecordBatch::try_new(schema.clone(), columns).context("aligning batch to union schema")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::COUNTRY_COLUMN;
    use std::collections::HashSet;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_csv(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    fn store_for(dir: &TempDir) -> TableStore {
        TableStore::new(SourceConfig {
            data_dir: dir.path().to_path_buf(),
            ..SourceConfig::default()
        })
    }

    fn write_all_three(dir: &TempDir) {
        write_csv(
            dir.path(),
            "benin_clean.csv",
            "GHI,DNI,DHI\n240.1,160.0,110.0\n231.9,150.3,108.2\n",
        );
        write_csv(
            dir.path(),
            "sierraleone_clean.csv",
            "GHI,DNI,DHI\n201.5,130.1,95.0\n",
        );
        write_csv(
            dir.path(),
            "togo_clean.csv",
            "GHI,DNI,DHI\n225.0,149.9,101.7\n222.3,151.2,99.8\n219.8,148.0,100.1\n",
        );
    }

    #[test]
    fn combined_row_count_is_sum_of_contributors() {
        let dir = TempDir::new().unwrap();
        write_all_three(&dir);
        let store = store_for(&dir);

        let combined = store.combined().unwrap();
        assert_eq!(combined.num_rows(), 2 + 1 + 3);

        let labels: HashSet<String> = combined
            .string_values(COUNTRY_COLUMN)
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        let configured: HashSet<String> =
            Country::ALL.iter().map(|c| c.to_string()).collect();
        assert!(labels.is_subset(&configured));
    }

    #[test]
    fn every_failing_country_gets_a_diagnostic() {
        let dir = TempDir::new().unwrap();
        write_csv(dir.path(), "benin_clean.csv", "GHI,DNI,DHI\n240.1,160.0,110.0\n");
        let store = store_for(&dir);

        match store.combined().unwrap_err() {
            AggregateError::Load(failures) => {
                let failed: HashSet<Country> =
                    failures.iter().map(|f| f.country()).collect();
                assert_eq!(
                    failed,
                    HashSet::from([Country::SierraLeone, Country::Togo])
                );
            }
            other => panic!("expected Load, got {:?}", other),
        }
    }

    #[test]
    fn missing_metric_column_voids_the_aggregate() {
        let dir = TempDir::new().unwrap();
        write_csv(dir.path(), "benin_clean.csv", "GHI,DNI\n240.1,160.0\n");
        write_csv(dir.path(), "sierraleone_clean.csv", "GHI,DNI\n201.5,130.1\n");
        write_csv(dir.path(), "togo_clean.csv", "GHI,DNI\n225.0,149.9\n");
        let store = store_for(&dir);

        match store.combined().unwrap_err() {
            AggregateError::SchemaViolation { missing } => {
                assert_eq!(missing, vec!["DHI".to_string()]);
            }
            other => panic!("expected SchemaViolation, got {:?}", other),
        }
    }

    #[test]
    fn column_union_null_fills_missing_columns() {
        let dir = TempDir::new().unwrap();
        write_csv(
            dir.path(),
            "benin_clean.csv",
            "GHI,DNI,DHI,Cleaning\n240.1,160.0,110.0,wet\n",
        );
        write_csv(
            dir.path(),
            "sierraleone_clean.csv",
            "GHI,DNI,DHI\n201.5,130.1,95.0\n",
        );
        write_csv(dir.path(), "togo_clean.csv", "GHI,DNI,DHI\n225.0,149.9,101.7\n");
        let store = store_for(&dir);

        let combined = store.combined().unwrap();
        assert_eq!(combined.num_rows(), 3);
        let cleaning = combined.string_values("Cleaning").unwrap();
        assert_eq!(cleaning.iter().flatten().count(), 1);
    }

    #[test]
    fn cached_table_survives_file_deletion() {
        let dir = TempDir::new().unwrap();
        write_all_three(&dir);
        let store = store_for(&dir);

        let first = store.combined().unwrap();
        fs::remove_file(dir.path().join("togo_clean.csv")).unwrap();
        let second = store.combined().unwrap();
        assert_eq!(first.num_rows(), second.num_rows());
    }

    #[test]
    fn empty_enumeration_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = TableStore::new(SourceConfig {
            data_dir: dir.path().to_path_buf(),
            countries: vec![],
            ..SourceConfig::default()
        });
        assert_eq!(store.combined().unwrap_err(), AggregateError::NoSources);
    }

    #[test]
    fn partial_availability_fails_combined_but_not_single_loads() {
        let dir = TempDir::new().unwrap();
        write_csv(
            dir.path(),
            "benin_clean.csv",
            "GHI,DNI,DHI\n10,1,1\n20,1,1\n30,1,1\n40,1,1\n50,1,1\n",
        );
        let store = TableStore::new(SourceConfig {
            data_dir: dir.path().to_path_buf(),
            countries: vec![Country::Benin, Country::Togo],
            ..SourceConfig::default()
        });

        match store.combined().unwrap_err() {
            AggregateError::Load(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].country(), Country::Togo);
                assert!(matches!(failures[0], LoadFailure::MissingSource { .. }));
            }
            other => panic!("expected Load, got {:?}", other),
        }

        let benin = store.country(Country::Benin).unwrap();
        assert_eq!(benin.num_rows(), 5);
        let labels = benin.string_values(COUNTRY_COLUMN).unwrap();
        assert!(labels.iter().all(|l| l.as_deref() == Some("Benin")));
    }
}
