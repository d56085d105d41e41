use std::fmt;
use std::fs::File;
use std::io::Seek;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, StringArray};
use arrow::compute::concat_batches;
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::{DataType, Field, FieldRef, Schema};
use arrow::record_batch::RecordBatch;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::table::{Country, DataTable, COUNTRY_COLUMN};

/// Why a single country's data could not be loaded. Returned by value; the
/// loader never panics and never aborts sibling loads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LoadFailure {
    /// Backing file absent at the templated path.
    MissingSource { country: Country, path: PathBuf },
    /// File present but unreadable or malformed.
    Unreadable { country: Country, message: String },
}

impl LoadFailure {
    pub fn country(&self) -> Country {
        match self {
            LoadFailure::MissingSource { country, .. } => *country,
            LoadFailure::Unreadable { country, .. } => *country,
        }
    }
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadFailure::MissingSource { country, path } => {
                write!(f, "data file not found for {} at {}", country, path.display())
            }
            LoadFailure::Unreadable { country, message } => {
                write!(f, "error loading {} data: {}", country, message)
            }
        }
    }
}

/// Templated path of a country's backing file: `<data-dir>/<stem>_clean.csv`.
pub fn source_path(data_dir: &Path, country: Country) -> PathBuf {
    data_dir.join(format!("{}_clean.csv", country.file_stem()))
}

/// Read one country's CSV into an in-memory table tagged with a `Country`
/// column. Emits exactly one operator diagnostic per attempt.
pub fn load_country(data_dir: &Path, country: Country) -> Result<DataTable, LoadFailure> {
    let path = source_path(data_dir, country);

    if !path.is_file() {
        warn!(country = %country, path = %path.display(), "data file not found");
        return Err(LoadFailure::MissingSource { country, path });
    }

    let batch = match read_csv(&path) {
        Ok(batch) => batch,
        Err(err) => {
            error!(country = %country, "load failed: {:#}", err);
            return Err(LoadFailure::Unreadable {
                country,
                message: format!("{:#}", err),
            });
        }
    };

    let tagged = match tag_with_country(&batch, country) {
        Ok(tagged) => tagged,
        Err(err) => {
            error!(country = %country, "load failed: {:#}", err);
            return Err(LoadFailure::Unreadable {
                country,
                message: format!("{:#}", err),
            });
        }
    };

    info!(country = %country, rows = tagged.num_rows(), "loaded country data");
    Ok(DataTable::new(tagged))
}

/// Parse a CSV file into one batch, inferring column types from the file
/// itself (numeric vs. text is decided by scanning every value).
fn read_csv(path: &Path) -> Result<RecordBatch> {
    let mut file =
        File::open(path).with_context(|| format!("opening `{}`", path.display()))?;

    let format = Format::default().with_header(true);
    let (schema, _) = format
        .infer_schema(&mut file, None)
        .context("inferring CSV schema")?;
    file.rewind().context("rewinding after schema inference")?;

    let schema = Arc::new(schema);
    let reader = ReaderBuilder::new(schema.clone())
        .with_format(format)
        .build(file)
        .context("creating CSV reader")?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch.context("reading CSV batch")?);
    }
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    concat_batches(&schema, &batches).context("concatenating CSV batches")
}

/// Append a non-null `Country` label column to every row.
fn tag_with_country(batch: &RecordBatch, country: Country) -> Result<RecordBatch> {
    let mut fields: Vec<FieldRef> = batch.schema().fields().iter().cloned().collect();
    fields.push(Arc::new(Field::new(COUNTRY_COLUMN, DataType::Utf8, false)));

    let labels: ArrayRef = Arc::new(StringArray::from(vec![
        country.as_str();
        batch.num_rows()
    ]));
    let mut columns = batch.columns().to_vec();
    columns.push(labels);

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context("appending country column")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnKind;
    use std::fs;
    use tempfile::TempDir;

    fn write_csv(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn loads_and_tags_with_country() {
        let dir = TempDir::new().unwrap();
        write_csv(
            dir.path(),
            "benin_clean.csv",
            "GHI,DNI,DHI,Cleaning\n240.5,167.2,110.0,clean\n0.0,0.0,0.0,dusty\n",
        );

        let table = load_country(dir.path(), Country::Benin).unwrap();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.kind_of("GHI"), Some(ColumnKind::Numeric));
        assert_eq!(table.kind_of("Cleaning"), Some(ColumnKind::Categorical));

        let labels = table.string_values(COUNTRY_COLUMN).unwrap();
        assert!(labels.iter().all(|l| l.as_deref() == Some("Benin")));
    }

    #[test]
    fn missing_file_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let err = load_country(dir.path(), Country::Togo).unwrap_err();
        match err {
            LoadFailure::MissingSource { country, path } => {
                assert_eq!(country, Country::Togo);
                assert!(path.ends_with("togo_clean.csv"));
            }
            other => panic!("expected MissingSource, got {:?}", other),
        }
    }

    #[test]
    fn malformed_file_is_reported_as_unreadable() {
        let dir = TempDir::new().unwrap();
        write_csv(
            dir.path(),
            "togo_clean.csv",
            "GHI,DNI\n1.0,2.0\n1.0,2.0,3.0,4.0,5.0\n",
        );

        let err = load_country(dir.path(), Country::Togo).unwrap_err();
        match err {
            LoadFailure::Unreadable { country, message } => {
                assert_eq!(country, Country::Togo);
                assert!(!message.is_empty());
            }
            other => panic!("expected Unreadable, got {:?}", other),
        }
    }

    #[test]
    fn header_only_file_yields_empty_table() {
        let dir = TempDir::new().unwrap();
        write_csv(dir.path(), "benin_clean.csv", "GHI,DNI,DHI\n");

        let table = load_country(dir.path(), Country::Benin).unwrap();
        assert_eq!(table.num_rows(), 0);
        assert!(table.has_column(COUNTRY_COLUMN));
    }
}
