use std::fs;
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::dataset::ensure_parent;
use crate::error::{ConfigError, PipelineError, Result, ResultExt};
use crate::schema::{ColumnSchema, ColumnSpec};

pub const CONFIG_FILE: &str = "pipeline.yaml";
pub const SCHEMA_FILE: &str = "schema.yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scaffold {
    pub config: PathBuf,
    pub schema: PathBuf,
}

/// Column layout of the vehicle insurance cross-sell dataset.
pub fn starter_schema() -> ColumnSchema {
    let columns = [
        ("id", "int"),
        ("Gender", "category"),
        ("Age", "int"),
        ("Driving_License", "int"),
        ("Region_Code", "float"),
        ("Previously_Insured", "int"),
        ("Vehicle_Age", "category"),
        ("Vehicle_Damage", "category"),
        ("Annual_Premium", "float"),
        ("Policy_Sales_Channel", "float"),
        ("Vintage", "int"),
        ("Response", "int"),
    ];
    let owned = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
    ColumnSchema {
        columns: columns
            .iter()
            .map(|(name, dtype)| ColumnSpec {
                name: name.to_string(),
                dtype: dtype.to_string(),
            })
            .collect(),
        numerical_columns: owned(&[
            "Age",
            "Driving_License",
            "Region_Code",
            "Previously_Insured",
            "Annual_Premium",
            "Policy_Sales_Channel",
            "Vintage",
        ]),
        categorical_columns: owned(&["Gender", "Vehicle_Age", "Vehicle_Damage"]),
    }
}

/// Writes a starter `pipeline.yaml` and `schema.yaml` into `directory`.
pub fn write_scaffold(directory: &Path, force: bool) -> Result<Scaffold> {
    let scaffold = Scaffold {
        config: directory.join(CONFIG_FILE),
        schema: directory.join(SCHEMA_FILE),
    };
    if !force {
        for path in [&scaffold.config, &scaffold.schema] {
            if path.exists() {
                return Err(ConfigError::Invalid(format!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                ))
                .into());
            }
        }
    }

    let config = PipelineConfig {
        schema: PathBuf::from(SCHEMA_FILE),
        ..PipelineConfig::default()
    };
    write_yaml(&scaffold.config, &config)?;
    write_yaml(&scaffold.schema, &starter_schema().to_file())?;
    Ok(scaffold)
}

fn write_yaml<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let rendered = serde_yaml::to_string(value).map_err(|source| PipelineError::Manifest {
        context: format!("Failed to render {}", path.display()),
        source,
    })?;
    ensure_parent(path)?;
    fs::write(path, rendered).context_with(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaffold_passes_its_own_checks() {
        let temp = tempfile::tempdir().unwrap();
        let scaffold = write_scaffold(temp.path(), false).unwrap();
        let config = PipelineConfig::load(&scaffold.config).unwrap();
        let report = config.check();
        assert!(report.is_ok(), "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(config.load_schema().unwrap(), starter_schema());
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let temp = tempfile::tempdir().unwrap();
        write_scaffold(temp.path(), false).unwrap();
        assert!(write_scaffold(temp.path(), false).is_err());
        assert!(write_scaffold(temp.path(), true).is_ok());
    }
}
