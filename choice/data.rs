//! # Survey Database
//!
//! Entry point for the travel survey. The input is a tab-separated file with a
//! header row, one observation (trip) per line. Every column that parses as a
//! number is kept as an `f64` column; the models later declare which columns
//! they need and `Database::require` validates exactly those.
//!
//! - Fixed schema: the column names of the London passenger mode choice
//!   survey are listed in [`schema`]. They are not configurable.
//! - Derived columns: auxiliary variables such as the total transit duration
//!   are materialised with [`Database::define_variable`] so that they can be
//!   differentiated against like any other column.

use crate::choice::expression::{Expr, ExpressionError};
use ndarray::{Array1, ArrayView1};
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Column names of the survey file and of the columns derived from it.
pub mod schema {
    pub const TRAVEL_MODE: &str = "travel_mode";
    pub const PURPOSE: &str = "purpose";
    pub const AGE: &str = "age";
    pub const FEMALE: &str = "female";
    pub const FARETYPE: &str = "faretype";
    pub const BUS_SCALE: &str = "bus_scale";
    pub const DRIVING_LICENSE: &str = "driving_license";
    pub const CAR_OWNERSHIP: &str = "car_ownership";
    pub const DUR_WALKING: &str = "dur_walking";
    pub const DUR_CYCLING: &str = "dur_cycling";
    pub const DUR_PT_ACCESS: &str = "dur_pt_access";
    pub const DUR_PT_RAIL: &str = "dur_pt_rail";
    pub const DUR_PT_BUS: &str = "dur_pt_bus";
    pub const DUR_PT_INT: &str = "dur_pt_int";
    pub const PT_INTERCHANGES: &str = "pt_interchanges";
    pub const DUR_DRIVING: &str = "dur_driving";
    pub const COST_TRANSIT: &str = "cost_transit";
    pub const COST_DRIVING_FUEL: &str = "cost_driving_fuel";
    pub const COST_DRIVING_CCHARGE: &str = "cost_driving_ccharge";
    pub const DRIVING_TRAFFIC_PERCENT: &str = "driving_traffic_percent";

    pub const COST_DRIVING: &str = "cost_driving";
    pub const DUR_PT: &str = "dur_pt";
    pub const AGE_GROUP: &str = "age_group";
    pub const WEIGHT: &str = "Weight";
}

/// Upper bounds (inclusive) of the age groups 0..=2; older respondents fall in group 3.
pub const AGE_GROUP_BOUNDS: [f64; 3] = [16.0, 30.0, 60.0];

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "Missing or null values were found in the required column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("Column '{name}' has {found} values, but the database has {expected} rows.")]
    ColumnLengthMismatch {
        name: String,
        found: usize,
        expected: usize,
    },
    #[error("The input file contains no data rows.")]
    Empty,
    #[error("Failed to evaluate the definition of column '{name}': {source}")]
    Definition {
        name: String,
        #[source]
        source: ExpressionError,
    },
}

/// Column-oriented, in-memory survey data.
#[derive(Debug, Clone)]
pub struct Database {
    name: String,
    names: Vec<String>,
    index: HashMap<String, usize>,
    columns: Vec<Array1<f64>>,
    /// Columns that contained nulls in the source file.
    incomplete: HashSet<String>,
    n_rows: usize,
}

impl Database {
    /// Reads a tab-separated survey file.
    pub fn load(path: &Path) -> Result<Self, DataError> {
        log::info!("Loading data from '{}'", path.display());

        let df = CsvReader::new(File::open(path)?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
            )
            .finish()?;

        if df.height() == 0 {
            return Err(DataError::Empty);
        }

        let mut columns = Vec::with_capacity(df.width());
        let mut incomplete = HashSet::new();
        for column in df.get_columns() {
            let name = column.name().to_string();
            let original_nulls = column.null_count();
            let casted = match column.cast(&DataType::Float64) {
                Ok(casted) if casted.null_count() == original_nulls => casted,
                _ => {
                    log::debug!("Skipping non-numeric column '{name}' ({:?})", column.dtype());
                    continue;
                }
            };
            if original_nulls > 0 {
                incomplete.insert(name.clone());
            }
            let values: Vec<f64> = casted
                .f64()?
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect();
            columns.push((name, Array1::from_vec(values)));
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "survey".to_string());
        let mut database = Self::from_columns(&stem, columns)?;
        database.incomplete = incomplete;
        log::info!(
            "Loaded {} observations with {} numeric columns.",
            database.n_rows,
            database.names.len()
        );
        Ok(database)
    }

    /// Builds a database from named columns of equal length.
    pub fn from_columns(name: &str, columns: Vec<(String, Array1<f64>)>) -> Result<Self, DataError> {
        let n_rows = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        let mut database = Self {
            name: name.to_string(),
            names: Vec::with_capacity(columns.len()),
            index: HashMap::with_capacity(columns.len()),
            columns: Vec::with_capacity(columns.len()),
            incomplete: HashSet::new(),
            n_rows,
        };
        for (column_name, values) in columns {
            database.insert_column(&column_name, values)?;
        }
        Ok(database)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>, DataError> {
        self.index
            .get(name)
            .map(|&i| self.columns[i].view())
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))
    }

    /// Value of `name` on `row`, if both exist.
    pub fn value(&self, name: &str, row: usize) -> Option<f64> {
        self.index
            .get(name)
            .and_then(|&i| self.columns[i].get(row).copied())
    }

    /// Adds a column, replacing any column of the same name.
    pub fn insert_column(&mut self, name: &str, values: Array1<f64>) -> Result<(), DataError> {
        if values.len() != self.n_rows {
            return Err(DataError::ColumnLengthMismatch {
                name: name.to_string(),
                found: values.len(),
                expected: self.n_rows,
            });
        }
        self.incomplete.remove(name);
        match self.index.get(name) {
            Some(&i) => self.columns[i] = values,
            None => {
                self.index.insert(name.to_string(), self.columns.len());
                self.names.push(name.to_string());
                self.columns.push(values);
            }
        }
        Ok(())
    }

    /// Evaluates a beta-free expression on every row and stores it as column `name`.
    pub fn define_variable(&mut self, name: &str, definition: &Expr) -> Result<(), DataError> {
        let values = (0..self.n_rows)
            .map(|row| definition.value(self, row, &[]))
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|source| DataError::Definition {
                name: name.to_string(),
                source,
            })?;
        self.insert_column(name, Array1::from_vec(values))
    }

    /// Adds the `age_group` column: 0 up to 16, 1 up to 30, 2 up to 60, 3 above.
    pub fn add_age_group(&mut self) -> Result<(), DataError> {
        let groups = self.column(schema::AGE)?.mapv(age_group);
        self.insert_column(schema::AGE_GROUP, groups)
    }

    /// Checks that every listed column exists and holds complete, finite data.
    pub fn require<'a, I>(&self, names: I) -> Result<(), DataError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for name in names {
            let column = self.column(name)?;
            if self.incomplete.contains(name) {
                return Err(DataError::MissingValuesFound(name.to_string()));
            }
            if column.iter().any(|v| !v.is_finite()) {
                return Err(DataError::NonFiniteValuesFound(name.to_string()));
            }
        }
        Ok(())
    }

    /// A new database made of the given rows, in order; rows may repeat.
    pub fn resample(&self, rows: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|column| rows.iter().map(|&r| column[r]).collect::<Array1<f64>>())
            .collect();
        Self {
            name: self.name.clone(),
            names: self.names.clone(),
            index: self.index.clone(),
            columns,
            incomplete: self.incomplete.clone(),
            n_rows: rows.len(),
        }
    }
}

/// Age group code used by the segmented models.
pub fn age_group(age: f64) -> f64 {
    AGE_GROUP_BOUNDS
        .iter()
        .position(|&bound| age <= bound)
        .unwrap_or(AGE_GROUP_BOUNDS.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_tsv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    #[test]
    fn test_load_keeps_numeric_columns() {
        let content = "travel_mode\tage\tlabel\tcost_transit\n\
                       1\t25\tfoo\t1.5\n\
                       3\t61\tbar\t2.25\n\
                       4\t40\tbaz\t0";
        let file = create_test_tsv(content).unwrap();
        let db = Database::load(file.path()).unwrap();

        assert_eq!(db.n_rows(), 3);
        assert!(db.has_column("travel_mode"));
        assert!(!db.has_column("label"));
        assert_abs_diff_eq!(db.value("cost_transit", 1).unwrap(), 2.25);
        assert_abs_diff_eq!(db.value("age", 2).unwrap(), 40.0);
    }

    #[test]
    fn test_missing_values_are_rejected_when_required() {
        let content = "travel_mode\tage\n1\t25\n2\t\n3\t50";
        let file = create_test_tsv(content).unwrap();
        let db = Database::load(file.path()).unwrap();

        assert!(db.require(["travel_mode"]).is_ok());
        match db.require(["age"]) {
            Err(DataError::MissingValuesFound(col)) => assert_eq!(col, "age"),
            other => panic!("Expected MissingValuesFound(age), got {:?}", other),
        }
    }

    #[test]
    fn test_error_column_not_found() {
        let db = Database::from_columns("t", vec![("age".to_string(), array![1.0])]).unwrap();
        match db.require(["dur_walking"]) {
            Err(DataError::ColumnNotFound(col)) => assert_eq!(col, "dur_walking"),
            other => panic!("Expected ColumnNotFound error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let db = Database::from_columns("t", vec![("cost".to_string(), array![1.0, f64::NAN])])
            .unwrap();
        assert!(matches!(
            db.require(["cost"]),
            Err(DataError::NonFiniteValuesFound(_))
        ));
    }

    #[test]
    fn test_ragged_columns_rejected() {
        let err = Database::from_columns(
            "t",
            vec![
                ("a".to_string(), array![1.0, 2.0]),
                ("b".to_string(), array![1.0]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, DataError::ColumnLengthMismatch { .. }));
    }

    #[test]
    fn test_define_variable_sums_components() {
        let mut db = Database::from_columns(
            "t",
            vec![
                ("cost_driving_fuel".to_string(), array![1.0, 2.5]),
                ("cost_driving_ccharge".to_string(), array![0.0, 11.5]),
            ],
        )
        .unwrap();
        let definition =
            Expr::var(schema::COST_DRIVING_FUEL) + Expr::var(schema::COST_DRIVING_CCHARGE);
        db.define_variable(schema::COST_DRIVING, &definition).unwrap();
        assert_abs_diff_eq!(db.value(schema::COST_DRIVING, 1).unwrap(), 14.0);
    }

    #[test]
    fn test_age_groups_use_right_closed_intervals() {
        assert_eq!(age_group(5.0), 0.0);
        assert_eq!(age_group(16.0), 0.0);
        assert_eq!(age_group(16.5), 1.0);
        assert_eq!(age_group(30.0), 1.0);
        assert_eq!(age_group(60.0), 2.0);
        assert_eq!(age_group(61.0), 3.0);
    }

    #[test]
    fn test_resample_repeats_rows() {
        let db = Database::from_columns("t", vec![("x".to_string(), array![1.0, 2.0, 3.0])])
            .unwrap();
        let replica = db.resample(&[2, 2, 0]);
        assert_eq!(replica.n_rows(), 3);
        assert_eq!(replica.column("x").unwrap().to_vec(), vec![3.0, 3.0, 1.0]);
    }
}
