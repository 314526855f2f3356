use std::path::{Path, PathBuf};

use tracing::info;

use crate::artifact::ValidationReport;
use crate::dataset::{Table, write_json};
use crate::error::Result;
use crate::schema::ColumnSchema;

const TRAIN_COLUMN_COUNT: &str = "Column count mismatch in training dataset. ";
const TEST_COLUMN_COUNT: &str = "Column count mismatch in testing dataset. ";
const TRAIN_COLUMNS_MISSING: &str = "Required columns are missing in training dataset. ";
const TEST_COLUMNS_MISSING: &str = "Required columns are missing in testing dataset. ";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MissingColumns {
    pub numerical: Vec<String>,
    pub categorical: Vec<String>,
}

impl MissingColumns {
    pub fn is_empty(&self) -> bool {
        self.numerical.is_empty() && self.categorical.is_empty()
    }
}

/// Shallow dataset checks against a [`ColumnSchema`].
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    schema: ColumnSchema,
    report_path: PathBuf,
}

impl SchemaValidator {
    pub fn new(schema: ColumnSchema, report_path: impl Into<PathBuf>) -> Self {
        Self {
            schema,
            report_path: report_path.into(),
        }
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    /// Count-only: names and order are not compared.
    pub fn column_count_matches(&self, dataset: &Table) -> bool {
        let status = dataset.column_count() == self.schema.column_count();
        info!(
            expected = self.schema.column_count(),
            actual = dataset.column_count(),
            status,
            "Column count check"
        );
        status
    }

    pub fn missing_columns(&self, dataset: &Table) -> MissingColumns {
        let missing = |names: &[String]| -> Vec<String> {
            names
                .iter()
                .filter(|name| !dataset.has_column(name))
                .cloned()
                .collect()
        };
        MissingColumns {
            numerical: missing(&self.schema.numerical_columns),
            categorical: missing(&self.schema.categorical_columns),
        }
    }

    pub fn required_columns_present(&self, dataset: &Table) -> bool {
        let missing = self.missing_columns(dataset);
        if !missing.numerical.is_empty() {
            info!(columns = ?missing.numerical, "Missing numerical columns");
        }
        if !missing.categorical.is_empty() {
            info!(columns = ?missing.categorical, "Missing categorical columns");
        }
        missing.is_empty()
    }

    /// Runs both checks on both splits and writes the report to disk.
    ///
    /// A failing check is reported through `status`; only I/O problems are errors.
    pub fn validate(&self, train: &Table, test: &Table) -> Result<ValidationReport> {
        let mut message = String::new();

        if !self.column_count_matches(train) {
            message.push_str(TRAIN_COLUMN_COUNT);
        }
        if !self.column_count_matches(test) {
            message.push_str(TEST_COLUMN_COUNT);
        }
        if !self.required_columns_present(train) {
            message.push_str(TRAIN_COLUMNS_MISSING);
        }
        if !self.required_columns_present(test) {
            message.push_str(TEST_COLUMNS_MISSING);
        }

        let report = ValidationReport {
            status: message.is_empty(),
            message: message.trim().to_string(),
        };

        write_json(&self.report_path, &report)?;
        info!(
            status = report.status,
            report = %self.report_path.display(),
            "Validation report written"
        );
        Ok(report)
    }
}
