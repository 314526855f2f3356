use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: String,
}

/// Expected dataset layout, loaded once per run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnSchema {
    pub columns: Vec<ColumnSpec>,
    pub numerical_columns: Vec<String>,
    pub categorical_columns: Vec<String>,
}

/// On-disk form: `columns` is a list of single-entry `{name: dtype}` maps.
#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct SchemaFile {
    pub columns: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    pub numerical_columns: Vec<String>,
    #[serde(default)]
    pub categorical_columns: Vec<String>,
}

impl ColumnSchema {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: SchemaFile =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_file(file)
    }

    pub(crate) fn from_file(file: SchemaFile) -> Result<Self, ConfigError> {
        let mut columns = Vec::with_capacity(file.columns.len());
        for entry in file.columns {
            if entry.len() != 1 {
                return Err(ConfigError::Invalid(format!(
                    "schema column entries must map one name to one dtype, found {} key(s)",
                    entry.len()
                )));
            }
            for (name, dtype) in entry {
                columns.push(ColumnSpec { name, dtype });
            }
        }
        Ok(Self {
            columns,
            numerical_columns: file.numerical_columns,
            categorical_columns: file.categorical_columns,
        })
    }

    pub(crate) fn to_file(&self) -> SchemaFile {
        SchemaFile {
            columns: self
                .columns
                .iter()
                .map(|c| BTreeMap::from([(c.name.clone(), c.dtype.clone())]))
                .collect(),
            numerical_columns: self.numerical_columns.clone(),
            categorical_columns: self.categorical_columns.clone(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_ordered_columns() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("schema.yaml");
        std::fs::write(
            &path,
            "columns:\n  - id: int\n  - Age: int\n  - Gender: category\nnumerical_columns: [Age]\ncategorical_columns: [Gender]\n",
        )
        .unwrap();

        let schema = ColumnSchema::load(&path).unwrap();
        assert_eq!(schema.column_count(), 3);
        assert_eq!(
            schema.column_names().collect::<Vec<_>>(),
            vec!["id", "Age", "Gender"]
        );
        assert_eq!(schema.categorical_columns, vec!["Gender"]);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = ColumnSchema::load(Path::new("/nonexistent/schema.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
