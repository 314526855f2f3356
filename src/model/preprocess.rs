//! Fitted feature transform: z-score scaling for numerical columns, one-hot
//! encoding for categorical columns, and a binary target mapping.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::TransformConfig;
use crate::dataset::{Matrix, Table};
use crate::schema::ColumnSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NumericScaler {
    column: String,
    mean: f64,
    std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CategoryEncoder {
    column: String,
    categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TargetEncoder {
    column: String,
    positive_label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    numerical: Vec<NumericScaler>,
    categorical: Vec<CategoryEncoder>,
    target: TargetEncoder,
}

impl Preprocessor {
    /// Learns scaling statistics and category vocabularies from `train`.
    pub fn fit(
        train: &Table,
        schema: &ColumnSchema,
        settings: &TransformConfig,
    ) -> Result<Self, String> {
        check_row_widths(train)?;
        let is_feature = |name: &&String| {
            **name != settings.target_column && !settings.drop_columns.contains(name)
        };

        let mut numerical = Vec::new();
        for column in schema.numerical_columns.iter().filter(is_feature) {
            let values = numeric_column(train, column)?;
            let count = values.len().max(1) as f64;
            let mean = values.iter().sum::<f64>() / count;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
            let std = variance.sqrt();
            numerical.push(NumericScaler {
                column: column.clone(),
                mean,
                std: if std > 0.0 { std } else { 1.0 },
            });
        }

        let mut categorical = Vec::new();
        for column in schema.categorical_columns.iter().filter(is_feature) {
            let idx = require_column(train, column)?;
            let categories: BTreeSet<String> =
                train.rows.iter().map(|row| row[idx].clone()).collect();
            categorical.push(CategoryEncoder {
                column: column.clone(),
                categories: categories.into_iter().collect(),
            });
        }

        require_column(train, &settings.target_column)?;

        Ok(Self {
            numerical,
            categorical,
            target: TargetEncoder {
                column: settings.target_column.clone(),
                positive_label: settings.positive_label.clone(),
            },
        })
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.numerical.iter().map(|s| s.column.clone()).collect();
        for encoder in &self.categorical {
            for category in &encoder.categories {
                names.push(format!("{}_{}", encoder.column, category));
            }
        }
        names
    }

    pub fn target_column(&self) -> &str {
        &self.target.column
    }

    /// Feature block only; the target column is ignored if present.
    pub fn transform(&self, table: &Table) -> Result<Matrix, String> {
        self.encode(table, false)
    }

    /// Features followed by the encoded label as the last column.
    pub fn transform_with_label(&self, table: &Table) -> Result<Matrix, String> {
        self.encode(table, true)
    }

    pub fn labels(&self, table: &Table) -> Result<Vec<f64>, String> {
        check_row_widths(table)?;
        let idx = require_column(table, &self.target.column)?;
        Ok(table
            .rows
            .iter()
            .map(|row| self.encode_label(&row[idx]))
            .collect())
    }

    fn encode_label(&self, value: &str) -> f64 {
        if value == self.target.positive_label {
            1.0
        } else {
            0.0
        }
    }

    fn encode(&self, table: &Table, with_label: bool) -> Result<Matrix, String> {
        check_row_widths(table)?;
        let numeric_idx = self
            .numerical
            .iter()
            .map(|s| require_column(table, &s.column))
            .collect::<Result<Vec<_>, _>>()?;
        let category_idx = self
            .categorical
            .iter()
            .map(|e| require_column(table, &e.column))
            .collect::<Result<Vec<_>, _>>()?;
        let label_idx = if with_label {
            Some(require_column(table, &self.target.column)?)
        } else {
            None
        };

        let width = self.numerical.len()
            + self
                .categorical
                .iter()
                .map(|e| e.categories.len())
                .sum::<usize>()
            + usize::from(with_label);
        let mut data = Vec::with_capacity(table.row_count() * width);

        for (row_no, row) in table.rows.iter().enumerate() {
            for (scaler, &idx) in self.numerical.iter().zip(&numeric_idx) {
                let value = parse_number(&row[idx])
                    .ok_or_else(|| bad_number(&scaler.column, row_no, &row[idx]))?;
                data.push((value - scaler.mean) / scaler.std);
            }
            for (encoder, &idx) in self.categorical.iter().zip(&category_idx) {
                let value = &row[idx];
                for category in &encoder.categories {
                    data.push(if category == value { 1.0 } else { 0.0 });
                }
            }
            if let Some(idx) = label_idx {
                data.push(self.encode_label(&row[idx]));
            }
        }

        Ok(Matrix::new(table.row_count(), width, data))
    }
}

/// Rows are indexed by header position, so every row must match the header.
fn check_row_widths(table: &Table) -> Result<(), String> {
    let expected = table.columns.len();
    match table.rows.iter().position(|row| row.len() != expected) {
        Some(row_no) => Err(format!(
            "row {} has {} field(s), expected {expected}",
            row_no + 1,
            table.rows[row_no].len()
        )),
        None => Ok(()),
    }
}

fn require_column(table: &Table, column: &str) -> Result<usize, String> {
    table
        .column_index(column)
        .ok_or_else(|| format!("column '{column}' not found"))
}

fn numeric_column(table: &Table, column: &str) -> Result<Vec<f64>, String> {
    let idx = require_column(table, column)?;
    table
        .rows
        .iter()
        .enumerate()
        .map(|(row_no, row)| {
            parse_number(&row[idx]).ok_or_else(|| bad_number(column, row_no, &row[idx]))
        })
        .collect()
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn bad_number(column: &str, row: usize, raw: &str) -> String {
    format!("column '{column}' row {} is not numeric: '{raw}'", row + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnSpec;

    fn fixture() -> (Table, ColumnSchema, TransformConfig) {
        let table = Table::parse_csv(
            "id,age,city,Response\n1,20,oslo,1\n2,40,rome,0\n3,30,oslo,yes\n",
        )
        .unwrap();
        let schema = ColumnSchema {
            columns: ["id", "age", "city", "Response"]
                .iter()
                .map(|n| ColumnSpec {
                    name: n.to_string(),
                    dtype: "any".into(),
                })
                .collect(),
            numerical_columns: vec!["id".into(), "age".into()],
            categorical_columns: vec!["city".into()],
        };
        (table, schema, TransformConfig::default())
    }

    #[test]
    fn drops_configured_columns_and_one_hot_encodes() {
        let (table, schema, settings) = fixture();
        let pre = Preprocessor::fit(&table, &schema, &settings).unwrap();
        assert_eq!(pre.feature_names(), vec!["age", "city_oslo", "city_rome"]);

        let matrix = pre.transform_with_label(&table).unwrap();
        assert_eq!(matrix.cols, 4);
        assert_eq!(matrix.row(0)[1..], [1.0, 0.0, 1.0]);
        assert_eq!(matrix.row(2)[3], 0.0, "only the positive label maps to 1");
        assert!((matrix.get(1, 0) - 1.224_744_871).abs() < 1e-6);
    }

    #[test]
    fn unknown_category_encodes_as_zeros() {
        let (table, schema, settings) = fixture();
        let pre = Preprocessor::fit(&table, &schema, &settings).unwrap();
        let unseen = Table::parse_csv("age,city\n25,paris\n").unwrap();
        let matrix = pre.transform(&unseen).unwrap();
        assert_eq!(matrix.row(0)[1..], [0.0, 0.0]);
    }

    #[test]
    fn non_numeric_cell_is_reported() {
        let (_, schema, settings) = fixture();
        let table = Table::parse_csv("id,age,city,Response\n1,old,oslo,1\n").unwrap();
        let err = Preprocessor::fit(&table, &schema, &settings).unwrap_err();
        assert!(err.contains("'age'"));
    }

    #[test]
    fn ragged_rows_are_an_error() {
        let (table, schema, settings) = fixture();
        let pre = Preprocessor::fit(&table, &schema, &settings).unwrap();
        let ragged = Table::new(
            vec!["id".into(), "age".into(), "city".into(), "Response".into()],
            vec![vec!["1".into()]],
        );

        let err = pre.transform(&ragged).unwrap_err();
        assert!(err.contains("row 1 has 1 field(s), expected 4"), "{err}");
        assert!(pre.labels(&ragged).is_err());
        assert!(Preprocessor::fit(&ragged, &schema, &settings).is_err());
    }
}
