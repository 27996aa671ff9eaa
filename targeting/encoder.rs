use crate::data::CategoricalColumn;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum EncoderError {
    #[error("Encoder was fitted on columns {expected:?} but received {found:?}.")]
    ColumnMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("Level '{level}' of column '{column}' was not seen when the encoder was fitted.")]
    UnseenLevel { column: String, level: String },
    #[error("Column '{column}' has a missing value at row {row}.")]
    MissingValue { column: String, row: usize },
}

/// One-hot encoding of categorical treatment columns.
///
/// With `drop_last` the last level of every column is the reference level and
/// gets no indicator, which keeps the design full rank next to an intercept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    pub drop_last: bool,
}

impl Default for OneHotEncoder {
    fn default() -> Self {
        Self { drop_last: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedColumn {
    pub name: String,
    pub levels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FittedEncoder {
    pub columns: Vec<EncodedColumn>,
    pub drop_last: bool,
}

impl OneHotEncoder {
    pub fn fit(&self, names: &[String], columns: &[CategoricalColumn]) -> FittedEncoder {
        FittedEncoder {
            columns: names
                .iter()
                .zip(columns)
                .map(|(name, column)| EncodedColumn {
                    name: name.clone(),
                    levels: column.levels().to_vec(),
                })
                .collect(),
            drop_last: self.drop_last,
        }
    }
}

impl FittedEncoder {
    fn encoded_levels<'a>(&self, column: &'a EncodedColumn) -> &'a [String] {
        if self.drop_last && !column.levels.is_empty() {
            &column.levels[..column.levels.len() - 1]
        } else {
            &column.levels
        }
    }

    pub fn width(&self) -> usize {
        self.columns
            .iter()
            .map(|c| self.encoded_levels(c).len())
            .sum()
    }

    /// Names of the indicator features, `<column>__<level>`.
    pub fn feature_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .flat_map(|c| {
                self.encoded_levels(c)
                    .iter()
                    .map(move |level| format!("{}__{}", c.name, level))
            })
            .collect()
    }

    /// Encodes `columns`, matching values to the fitted levels by name.
    pub fn transform(
        &self,
        names: &[String],
        columns: &[CategoricalColumn],
    ) -> Result<Array2<f64>, EncoderError> {
        let fitted_names: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        if fitted_names != names || columns.len() != names.len() {
            return Err(EncoderError::ColumnMismatch {
                expected: fitted_names,
                found: names.to_vec(),
            });
        }

        let n = columns.first().map_or(0, |c| c.len());
        let mut out = Array2::zeros((n, self.width()));
        let mut offset = 0;
        for (encoded, column) in self.columns.iter().zip(columns) {
            let kept = self.encoded_levels(encoded);
            // Position of each of the column's own levels among the fitted ones.
            let mapping = column
                .levels()
                .iter()
                .map(|level| {
                    encoded
                        .levels
                        .iter()
                        .position(|l| l == level)
                        .map(|j| (j < kept.len()).then_some(j))
                        .ok_or_else(|| EncoderError::UnseenLevel {
                            column: encoded.name.clone(),
                            level: level.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            for (row, code) in column.codes().iter().enumerate() {
                let code = code.ok_or_else(|| EncoderError::MissingValue {
                    column: encoded.name.clone(),
                    row,
                })?;
                if let Some(j) = mapping[code] {
                    out[(row, offset + j)] = 1.0;
                }
            }
            offset += kept.len();
        }
        Ok(out)
    }
}
