//! # Data Model and Loading
//!
//! This module owns the tabular inputs of an estimation run: the treatment
//! table `T` (categorical columns), the confounder table `W` (numeric) and the
//! outcome table `Y` (continuous or categorical columns, possibly several).
//!
//! - Structural checks happen once, when a `Dataset` is built: the three tables
//!   must have the same number of rows and pairwise disjoint column names.
//! - Missing values are data, not errors. Continuous columns use `NaN`,
//!   categorical columns `None`. `Dataset::realign` restricts a run to the
//!   rows that are complete for one target, independently per target.
//! - Loading from disk goes through the `polars` CSV reader (tab separated).

use ndarray::{Array1, Array2, ArrayView1, Axis};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Name given to a lone outcome vector when it is normalized into a table.
pub const DEFAULT_OUTCOME_NAME: &str = "y";

/// A comprehensive error type for all data validation and loading failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The {first} and {second} tables share the column name(s) {names:?}. Column names must be unique across treatments, confounders and outcomes."
    )]
    ColumnCollision {
        first: &'static str,
        second: &'static str,
        names: Vec<String>,
    },
    #[error("The column '{0}' appears more than once in the {1} table.")]
    DuplicateColumn(String, &'static str),
    #[error("The required column '{0}' was not found. Please check spelling and case.")]
    ColumnNotFound(String),
    #[error("The {table} table has {found} rows, but {expected} were expected.")]
    RowCountMismatch {
        table: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("The {table} table has {names} column names for {columns} columns.")]
    NamesMismatch {
        table: &'static str,
        names: usize,
        columns: usize,
    },
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
}

/// A categorical column. Levels are kept in natural sort order and survive
/// row subsetting, so a level absent from a subset is still a valid level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoricalColumn {
    levels: Vec<String>,
    codes: Vec<Option<usize>>,
}

impl CategoricalColumn {
    /// Builds a column from raw values; `None` marks a missing entry.
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let raw: Vec<Option<String>> = values
            .into_iter()
            .map(|v| v.map(|s| s.as_ref().to_string()))
            .collect();
        let mut levels: Vec<String> = raw.iter().flatten().cloned().collect();
        levels.sort_by(|a, b| natord::compare(a, b));
        levels.dedup();
        let codes = raw
            .iter()
            .map(|v| {
                v.as_ref()
                    .and_then(|s| levels.iter().position(|level| level == s))
            })
            .collect();
        Self { levels, codes }
    }

    /// Builds a column with no missing entries.
    pub fn from_complete<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_values(values.into_iter().map(Some))
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn codes(&self) -> &[Option<usize>] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn value(&self, row: usize) -> Option<&str> {
        self.codes[row].map(|code| self.levels[code].as_str())
    }

    pub fn is_missing(&self, row: usize) -> bool {
        self.codes[row].is_none()
    }

    pub fn level_index(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == level)
    }

    /// Restricts the column to `rows`, keeping the full level set.
    pub fn subset(&self, rows: &[usize]) -> Self {
        Self {
            levels: self.levels.clone(),
            codes: rows.iter().map(|&i| self.codes[i]).collect(),
        }
    }

    /// A column of the same length and levels with every entry set to `level`.
    /// Returns `None` when `level` is not one of the column's levels.
    pub fn forced(&self, level: &str) -> Option<Self> {
        let code = self.level_index(level)?;
        Some(Self {
            levels: self.levels.clone(),
            codes: vec![Some(code); self.codes.len()],
        })
    }
}

/// One outcome column. Continuous outcomes mark missing entries with `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeColumn {
    Continuous(Array1<f64>),
    Categorical(CategoricalColumn),
}

impl OutcomeColumn {
    pub fn len(&self) -> usize {
        match self {
            OutcomeColumn::Continuous(values) => values.len(),
            OutcomeColumn::Categorical(column) => column.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            OutcomeColumn::Continuous(values) => !values[row].is_finite(),
            OutcomeColumn::Categorical(column) => column.is_missing(row),
        }
    }

    pub fn subset(&self, rows: &[usize]) -> Self {
        match self {
            OutcomeColumn::Continuous(values) => {
                OutcomeColumn::Continuous(values.select(Axis(0), rows))
            }
            OutcomeColumn::Categorical(column) => OutcomeColumn::Categorical(column.subset(rows)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreatmentTable {
    pub names: Vec<String>,
    pub columns: Vec<CategoricalColumn>,
}

impl TreatmentTable {
    pub fn new(names: Vec<String>, columns: Vec<CategoricalColumn>) -> Result<Self, DataError> {
        check_names("treatment", &names, columns.len())?;
        if let Some(first) = columns.first() {
            check_rows("treatment", first.len(), columns.iter().map(|c| c.len()))?;
        }
        Ok(Self { names, columns })
    }

    pub fn nrows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.len())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfounderTable {
    pub names: Vec<String>,
    /// Shape: [n_samples, n_confounders]. Missing entries are `NaN`.
    pub values: Array2<f64>,
}

impl ConfounderTable {
    pub fn new(names: Vec<String>, values: Array2<f64>) -> Result<Self, DataError> {
        check_names("confounder", &names, values.ncols())?;
        Ok(Self { names, values })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeTable {
    pub names: Vec<String>,
    pub columns: Vec<OutcomeColumn>,
}

impl OutcomeTable {
    pub fn new(names: Vec<String>, columns: Vec<OutcomeColumn>) -> Result<Self, DataError> {
        check_names("outcome", &names, columns.len())?;
        if let Some(first) = columns.first() {
            check_rows("outcome", first.len(), columns.iter().map(|c| c.len()))?;
        }
        Ok(Self { names, columns })
    }

    pub fn column(&self, name: &str) -> Option<&OutcomeColumn> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
    }

    pub fn nrows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.len())
    }
}

/// A single outcome vector becomes a one-column table named `y`.
impl From<OutcomeColumn> for OutcomeTable {
    fn from(column: OutcomeColumn) -> Self {
        Self {
            names: vec![DEFAULT_OUTCOME_NAME.to_string()],
            columns: vec![column],
        }
    }
}

impl From<Array1<f64>> for OutcomeTable {
    fn from(values: Array1<f64>) -> Self {
        OutcomeColumn::Continuous(values).into()
    }
}

fn check_names(table: &'static str, names: &[String], columns: usize) -> Result<(), DataError> {
    if names.len() != columns {
        return Err(DataError::NamesMismatch {
            table,
            names: names.len(),
            columns,
        });
    }
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(DataError::DuplicateColumn(name.clone(), table));
        }
    }
    Ok(())
}

fn check_rows(
    table: &'static str,
    expected: usize,
    lengths: impl Iterator<Item = usize>,
) -> Result<(), DataError> {
    for found in lengths {
        if found != expected {
            return Err(DataError::RowCountMismatch {
                table,
                expected,
                found,
            });
        }
    }
    Ok(())
}

fn shared_names(first: &[String], second: &[String]) -> Vec<String> {
    first
        .iter()
        .filter(|name| second.contains(name))
        .cloned()
        .collect()
}

/// The validated input of an estimation run. Only `reformat` builds one, so
/// the three tables never share a column name.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    treatments: TreatmentTable,
    confounders: ConfounderTable,
    outcomes: OutcomeTable,
}

/// Builds a `Dataset`, normalizing the outcome input into a table and
/// rejecting overlapping column names before anything else happens.
pub fn reformat(
    treatments: TreatmentTable,
    confounders: ConfounderTable,
    outcomes: impl Into<OutcomeTable>,
) -> Result<Dataset, DataError> {
    let outcomes = outcomes.into();

    for (first, first_names, second, second_names) in [
        ("treatment", &treatments.names, "confounder", &confounders.names),
        ("confounder", &confounders.names, "outcome", &outcomes.names),
        ("treatment", &treatments.names, "outcome", &outcomes.names),
    ] {
        let names = shared_names(first_names, second_names);
        if !names.is_empty() {
            return Err(DataError::ColumnCollision {
                first,
                second,
                names,
            });
        }
    }

    let n = treatments.nrows();
    if confounders.values.nrows() != n {
        return Err(DataError::RowCountMismatch {
            table: "confounder",
            expected: n,
            found: confounders.values.nrows(),
        });
    }
    if outcomes.nrows() != n {
        return Err(DataError::RowCountMismatch {
            table: "outcome",
            expected: n,
            found: outcomes.nrows(),
        });
    }

    Ok(Dataset {
        treatments,
        confounders,
        outcomes,
    })
}

/// The rows of a `Dataset` that are complete for one target, with the
/// confounders restricted to the ones a parameter names.
#[derive(Debug, Clone)]
pub struct AlignedData {
    /// Indices of the retained rows in the original dataset.
    pub rows: Vec<usize>,
    pub treatment_names: Vec<String>,
    pub treatments: Vec<CategoricalColumn>,
    pub confounder_names: Vec<String>,
    pub confounders: Array2<f64>,
    pub target: String,
    pub outcome: OutcomeColumn,
}

impl AlignedData {
    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    /// The outcome on the fluctuation scale: the value itself for continuous
    /// outcomes, an indicator of the second level for binary ones.
    pub fn outcome_values(&self) -> Array1<f64> {
        match &self.outcome {
            OutcomeColumn::Continuous(values) => values.clone(),
            OutcomeColumn::Categorical(column) => column
                .codes()
                .iter()
                .map(|code| if *code == Some(1) { 1.0 } else { 0.0 })
                .collect(),
        }
    }
}

impl Dataset {
    pub fn nrows(&self) -> usize {
        self.treatments.nrows()
    }

    pub fn treatments(&self) -> &TreatmentTable {
        &self.treatments
    }

    pub fn confounders(&self) -> &ConfounderTable {
        &self.confounders
    }

    pub fn outcomes(&self) -> &OutcomeTable {
        &self.outcomes
    }

    /// Keeps the rows with no missing value among the treatments, the named
    /// confounders and the `target` outcome.
    pub fn realign(&self, target: &str, confounders: &[String]) -> Result<AlignedData, DataError> {
        let outcome = self
            .outcomes
            .column(target)
            .ok_or_else(|| DataError::ColumnNotFound(target.to_string()))?;
        let confounder_idx = confounders
            .iter()
            .map(|name| {
                self.confounders
                    .column_index(name)
                    .ok_or_else(|| DataError::ColumnNotFound(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let w = self.confounders.values.select(Axis(1), &confounder_idx);

        let rows: Vec<usize> = (0..self.nrows())
            .filter(|&i| {
                !outcome.is_missing(i)
                    && self.treatments.columns.iter().all(|c| !c.is_missing(i))
                    && row_is_finite(w.row(i))
            })
            .collect();

        Ok(AlignedData {
            treatment_names: self.treatments.names.clone(),
            treatments: self
                .treatments
                .columns
                .iter()
                .map(|c| c.subset(&rows))
                .collect(),
            confounder_names: confounders.to_vec(),
            confounders: w.select(Axis(0), &rows),
            target: target.to_string(),
            outcome: outcome.subset(&rows),
            rows,
        })
    }
}

fn row_is_finite(row: ArrayView1<f64>) -> bool {
    row.iter().all(|v| v.is_finite())
}

/// Reads a tab-separated file and splits its columns into the three roles.
///
/// Treatment columns are read as strings. Outcome columns of string or boolean
/// type become categorical, numeric ones continuous. Nulls become missing values.
pub fn load_dataset(
    path: &str,
    treatments: &[String],
    confounders: &[String],
    outcomes: &[String],
) -> Result<Dataset, DataError> {
    log::info!("Loading data from '{path}'");

    let df = CsvReader::new(File::open(Path::new(path))?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;

    let columns_set: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    for name in treatments.iter().chain(confounders).chain(outcomes) {
        if !columns_set.contains(name) {
            return Err(DataError::ColumnNotFound(name.clone()));
        }
    }
    log::info!("Loaded {} rows with all {} requested columns", df.height(), treatments.len() + confounders.len() + outcomes.len());

    let treatment_columns = treatments
        .iter()
        .map(|name| extract_categorical_column(&df, name))
        .collect::<Result<Vec<_>, _>>()?;

    let mut w = Array2::<f64>::zeros((df.height(), confounders.len()));
    for (j, name) in confounders.iter().enumerate() {
        let values = extract_numeric_column(&df, name)?;
        w.column_mut(j).assign(&Array1::from_vec(values));
    }

    let outcome_columns = outcomes
        .iter()
        .map(|name| {
            let series = df.column(name)?.as_materialized_series();
            match series.dtype() {
                DataType::String | DataType::Boolean => {
                    Ok(OutcomeColumn::Categorical(extract_categorical_column(&df, name)?))
                }
                _ => Ok(OutcomeColumn::Continuous(Array1::from_vec(
                    extract_numeric_column(&df, name)?,
                ))),
            }
        })
        .collect::<Result<Vec<_>, DataError>>()?;

    reformat(
        TreatmentTable::new(treatments.to_vec(), treatment_columns)?,
        ConfounderTable::new(confounders.to_vec(), w)?,
        OutcomeTable::new(outcomes.to_vec(), outcome_columns)?,
    )
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(column_name)?.as_materialized_series();
    let casted = series
        .cast(&DataType::Float64)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        })?;
    if casted.null_count() > series.null_count() {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        });
    }
    Ok(casted
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

fn extract_categorical_column(
    df: &DataFrame,
    column_name: &str,
) -> Result<CategoricalColumn, DataError> {
    let series = df
        .column(column_name)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    Ok(CategoricalColumn::from_values(series.str()?.into_iter()))
}
