use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Schema};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

/// Name of the label column the loader appends to every table.
pub const COUNTRY_COLUMN: &str = "Country";

/// The designated solar-potential metric columns. Aggregation fails closed
/// if any of these is absent from the combined table.
pub const SOLAR_METRICS: [&str; 3] = ["GHI", "DNI", "DHI"];

/// The closed set of countries with a backing data file. Rows in an
/// aggregated table can only ever carry one of these labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Country {
    Benin,
    SierraLeone,
    Togo,
}

impl Country {
    pub const ALL: [Country; 3] = [Country::Benin, Country::SierraLeone, Country::Togo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Country::Benin => "Benin",
            Country::SierraLeone => "SierraLeone",
            Country::Togo => "Togo",
        }
    }

    /// Lowercase form used in the backing file name
    /// (`<data-dir>/<file_stem>_clean.csv`).
    pub fn file_stem(&self) -> String {
        self.as_str().to_lowercase()
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Country {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Country::ALL
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown country `{}`", s))
    }
}

/// Broad classification of a column, derived once from its Arrow type when
/// the table is built and carried as metadata from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnKind {
    Numeric,
    Categorical,
    /// Timestamps, booleans, anything that is neither a metric candidate
    /// nor a grouping label.
    Other,
}

impl ColumnKind {
    pub fn classify(data_type: &DataType) -> ColumnKind {
        if data_type.is_numeric() {
            ColumnKind::Numeric
        } else {
            match data_type {
                DataType::Utf8 | DataType::LargeUtf8 => ColumnKind::Categorical,
                _ => ColumnKind::Other,
            }
        }
    }
}

/// An immutable in-memory table: one Arrow `RecordBatch` plus the per-column
/// kind map computed at construction time. All downstream layers (filter,
/// statistics) consume this instead of re-inspecting Arrow types ad hoc.
#[derive(Debug, Clone)]
pub struct DataTable {
    batch: RecordBatch,
    kinds: HashMap<String, ColumnKind>,
}

impl DataTable {
    pub fn new(batch: RecordBatch) -> Self {
        let kinds = batch
            .schema()
            .fields()
            .iter()
            .map(|f| (f.name().clone(), ColumnKind::classify(f.data_type())))
            .collect();
        DataTable { batch, kinds }
    }

    /// Wrap a batch that shares this table's schema (e.g. a filtered view),
    /// reusing the already-computed column kinds.
    pub fn with_batch(&self, batch: RecordBatch) -> Self {
        DataTable {
            batch,
            kinds: self.kinds.clone(),
        }
    }

    pub fn empty(schema: Arc<Schema>) -> Self {
        DataTable::new(RecordBatch::new_empty(schema))
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn schema(&self) -> Arc<Schema> {
        self.batch.schema()
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.batch
            .schema_ref()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.batch.schema_ref().column_with_name(name).is_some()
    }

    pub fn kind_of(&self, name: &str) -> Option<ColumnKind> {
        self.kinds.get(name).copied()
    }

    /// Column names classified numeric, in schema order.
    pub fn numeric_columns(&self) -> Vec<&str> {
        self.columns_of_kind(ColumnKind::Numeric)
    }

    /// Column names classified categorical, in schema order.
    pub fn categorical_columns(&self) -> Vec<&str> {
        self.columns_of_kind(ColumnKind::Categorical)
    }

    fn columns_of_kind(&self, kind: ColumnKind) -> Vec<&str> {
        self.batch
            .schema_ref()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .filter(|n| self.kinds.get(*n) == Some(&kind))
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    /// Values of a numeric column widened to f64, nulls preserved.
    /// `None` if the column is absent or not numeric.
    pub fn numeric_values(&self, name: &str) -> Option<Vec<Option<f64>>> {
        if self.kind_of(name)? != ColumnKind::Numeric {
            return None;
        }
        let col = self.column(name)?;
        let floats = cast(col, &DataType::Float64).ok()?;
        let floats = floats.as_any().downcast_ref::<Float64Array>()?;
        Some(floats.iter().collect())
    }

    /// Values of a categorical column, nulls preserved.
    /// `None` if the column is absent or not categorical.
    pub fn string_values(&self, name: &str) -> Option<Vec<Option<String>>> {
        if self.kind_of(name)? != ColumnKind::Categorical {
            return None;
        }
        let col = self.column(name)?;
        let strings = col.as_any().downcast_ref::<StringArray>()?;
        Some(strings.iter().map(|v| v.map(str::to_string)).collect())
    }
}
