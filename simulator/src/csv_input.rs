//! CSV text to ordered rows.
//!
//! The first record is the header. Each data record becomes a [`Row`]: an
//! ordered list of `(column, value)` pairs in header order.

use crate::error::SimulationError;

/// One CSV record. Column order is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    columns: Vec<(String, String)>,
}

impl Row {
    pub fn new(columns: Vec<(String, String)>) -> Self {
        Self { columns }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            columns: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[(String, String)] {
        &self.columns
    }

    /// Case-insensitive lookup on the trimmed column name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|idx| self.columns[idx].1.as_str())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|(column, _)| column.trim().eq_ignore_ascii_case(name))
    }
}

/// Parse CSV text into rows.
///
/// Ragged records, invalid UTF-8 and a missing header are `MalformedInput`.
/// Blank lines are skipped by the reader.
pub fn parse_rows(text: &str) -> Result<Vec<Row>, SimulationError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| SimulationError::MalformedInput(format!("unreadable header: {e}")))?
        .iter()
        .map(ToString::to_string)
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(SimulationError::MalformedInput(
            "missing header row".to_string(),
        ));
    }

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            SimulationError::MalformedInput(format!("record {}: {e}", idx + 1))
        })?;
        rows.push(Row::new(
            headers
                .iter()
                .cloned()
                .zip(record.iter().map(ToString::to_string))
                .collect(),
        ));
    }

    Ok(rows)
}
