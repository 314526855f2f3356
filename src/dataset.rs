use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result, ResultExt};

/// Header plus string cells, as read from a CSV file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context_with(|| format!("Failed to read dataset: {}", path.display()))?;
        Self::parse_csv(&content).map_err(|reason| PipelineError::dataset(path, reason))
    }

    pub fn parse_csv(content: &str) -> std::result::Result<Self, String> {
        let mut lines = content.lines().filter(|line| !line.trim().is_empty());
        let header = lines.next().ok_or_else(|| "empty CSV file".to_string())?;
        let columns = split_record(header);

        let mut rows = Vec::new();
        for (idx, line) in lines.enumerate() {
            let row = split_record(line);
            if row.len() != columns.len() {
                return Err(format!(
                    "row {} has {} field(s), header declares {}",
                    idx + 1,
                    row.len(),
                    columns.len()
                ));
            }
            rows.push(row);
        }
        Ok(Self { columns, rows })
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        fs::write(path, self.to_csv_string())
            .context_with(|| format!("Failed to write dataset: {}", path.display()))
    }

    pub fn to_csv_string(&self) -> String {
        let mut out = join_record(&self.columns);
        out.push('\n');
        for row in &self.rows {
            out.push_str(&join_record(row));
            out.push('\n');
        }
        out
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Appends rows from `other`; both tables must share the same header.
    pub fn extend(&mut self, other: Table) -> std::result::Result<(), String> {
        if self.columns.is_empty() && self.rows.is_empty() {
            *self = other;
            return Ok(());
        }
        if self.columns != other.columns {
            return Err(format!(
                "header mismatch: [{}] vs [{}]",
                self.columns.join(","),
                other.columns.join(",")
            ));
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    pub fn select_rows(&self, indices: &[usize]) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&idx| self.rows[idx].clone()).collect(),
        }
    }
}

/// Splits one CSV line. Whitespace around unquoted fields is trimmed; quoted
/// fields are kept verbatim.
fn split_record(line: &str) -> Vec<String> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' if in_quotes => in_quotes = false,
            '"' if !quoted && current.trim().is_empty() => {
                current.clear();
                quoted = true;
                in_quotes = true;
            }
            ',' if !in_quotes => {
                fields.push(finish_field(&mut current, quoted));
                quoted = false;
            }
            // padding after a closing quote
            _ if quoted && !in_quotes && ch.is_whitespace() => {}
            _ => current.push(ch),
        }
    }
    fields.push(finish_field(&mut current, quoted));
    fields
}

fn finish_field(current: &mut String, quoted: bool) -> String {
    let field = std::mem::take(current);
    if quoted {
        field
    } else {
        field.trim().to_string()
    }
}

/// Records are line-based, so fields must not contain line breaks.
fn join_record(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| {
            if field.contains([',', '"']) || field.trim() != field {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Location of a tabular dataset at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub path: PathBuf,
}

impl DatasetRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Table> {
        Table::read_csv(&self.path)
    }
}

/// Row-major numeric matrix. Transformed datasets keep the label in the last column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), rows * cols, "matrix data does not match shape");
        Self { rows, cols, data }
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let count = rows.len();
        let data: Vec<f64> = rows.into_iter().flatten().collect();
        Self::new(count, cols, data)
    }

    pub fn row(&self, idx: usize) -> &[f64] {
        &self.data[idx * self.cols..(idx + 1) * self.cols]
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    /// Splits into a feature block and the label vector (last column).
    pub fn split_label(&self) -> (Matrix, Vec<f64>) {
        if self.cols == 0 {
            return (Matrix::new(self.rows, 0, Vec::new()), vec![0.0; self.rows]);
        }
        let feature_cols = self.cols - 1;
        let mut features = Vec::with_capacity(self.rows * feature_cols);
        let mut labels = Vec::with_capacity(self.rows);
        for idx in 0..self.rows {
            let row = self.row(idx);
            features.extend_from_slice(&row[..feature_cols]);
            labels.push(row[feature_cols]);
        }
        (Matrix::new(self.rows, feature_cols, features), labels)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .context_with(|| format!("Failed to open matrix: {}", path.display()))?;
        let matrix: Matrix = serde_json::from_reader(std::io::BufReader::new(file))
            .context_with(|| format!("Failed to decode matrix: {}", path.display()))?;
        if matrix.data.len() != matrix.rows * matrix.cols {
            return Err(PipelineError::dataset(
                path,
                format!(
                    "shape {}x{} does not match {} value(s)",
                    matrix.rows,
                    matrix.cols,
                    matrix.data.len()
                ),
            ));
        }
        Ok(matrix)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

pub fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir)
        .context_with(|| format!("Failed to create directory: {}", dir.display()))
}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) => ensure_dir(parent),
        None => Ok(()),
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let file =
        File::create(path).context_with(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .context_with(|| format!("Failed to write JSON: {}", path.display()))?;
    writer
        .flush()
        .context_with(|| format!("Failed to flush {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_fields() {
        let table = Table::parse_csv("id,city,note\n1,\"Paris, FR\",\"say \"\"hi\"\"\"\n").unwrap();
        assert_eq!(table.columns, vec!["id", "city", "note"]);
        assert_eq!(table.rows[0], vec!["1", "Paris, FR", "say \"hi\""]);
    }

    #[test]
    fn rejects_ragged_rows() {
        let err = Table::parse_csv("a,b\n1,2\n3\n").unwrap_err();
        assert!(err.contains("row 2"));
    }

    #[test]
    fn csv_written_and_read_back() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested/data.csv");
        let table = Table::new(
            vec!["name".into(), "city".into()],
            vec![vec!["ann".into(), "Oslo, NO".into()]],
        );
        table.write_csv(&path).unwrap();
        assert_eq!(Table::read_csv(&path).unwrap(), table);
    }

    #[test]
    fn quoted_whitespace_is_preserved() {
        let table = Table::parse_csv("a,b,c\n x , \" y \" ,\"\"\r\n").unwrap();
        assert_eq!(table.rows[0], vec!["x", " y ", ""]);

        let padded = Table::new(
            vec!["name".into(), "note".into()],
            vec![vec![" ann".into(), "tail ".into()]],
        );
        assert_eq!(padded.to_csv_string(), "name,note\n\" ann\",\"tail \"\n");
        assert_eq!(Table::parse_csv(&padded.to_csv_string()).unwrap(), padded);
    }

    #[test]
    fn split_label_takes_last_column() {
        let matrix = Matrix::from_rows(vec![vec![1.0, 2.0, 0.0], vec![3.0, 4.0, 1.0]]);
        let (features, labels) = matrix.split_label();
        assert_eq!(features.cols, 2);
        assert_eq!(features.row(1), &[3.0, 4.0]);
        assert_eq!(labels, vec![0.0, 1.0]);
    }

    #[test]
    fn extend_requires_matching_header() {
        let mut left = Table::new(vec!["a".into()], vec![vec!["1".into()]]);
        let right = Table::new(vec!["b".into()], vec![vec!["2".into()]]);
        assert!(left.extend(right).is_err());
    }
}
