//! Columnar metric matrices.
//!
//! `MetricFrame` holds raw readings (rows = time steps) with missing cells,
//! `DiscreteFrame` holds the ordinal states produced by discretization and
//! `Observation` is a single inference-time row.

use crate::types::{normalize_column_name, TIMESTAMP_COLUMN};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Raw metric matrix stored column-major
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricFrame {
    columns: Vec<String>,
    values: Vec<Vec<Option<f64>>>,
    timestamps: Option<Vec<String>>,
    n_rows: usize,
}

impl MetricFrame {
    /// Build a frame from named columns of equal length
    pub fn new(columns: Vec<(String, Vec<Option<f64>>)>) -> Result<Self> {
        let n_rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut frame = Self {
            n_rows,
            ..Default::default()
        };
        for (name, values) in columns {
            frame.insert_column(name, values)?;
        }
        Ok(frame)
    }

    /// Attach a timestamp column
    pub fn with_timestamps(mut self, timestamps: Vec<String>) -> Result<Self> {
        if self.columns.is_empty() && self.n_rows == 0 {
            self.n_rows = timestamps.len();
        }
        if timestamps.len() != self.n_rows {
            return Err(Error::validation(format!(
                "timestamp column has {} rows, frame has {}",
                timestamps.len(),
                self.n_rows
            )));
        }
        self.timestamps = Some(timestamps);
        Ok(self)
    }

    /// Read a CSV file
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            Error::validation(format!("Failed to open dataset {}: {}", path.display(), e))
        })?;
        let frame = Self::from_csv_reader(file)?;
        debug!(
            path = %path.display(),
            rows = frame.n_rows(),
            columns = frame.n_cols(),
            "Loaded dataset"
        );
        Ok(frame)
    }

    /// Read and concatenate several CSV files
    pub fn from_csv_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut frame = Self::default();
        for path in paths {
            frame.append(Self::from_csv_path(path)?);
        }
        Ok(frame)
    }

    /// Parse CSV content. A leading unnamed index column is dropped, column
    /// names are normalised, and empty or non-numeric cells become missing.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let skip_index = headers
            .first()
            .map(|h| h.is_empty() || h.starts_with("Unnamed"))
            .unwrap_or(false);

        let mut names = Vec::new();
        let mut timestamp_at = None;
        for (position, header) in headers.iter().enumerate() {
            if skip_index && position == 0 {
                continue;
            }
            let name = normalize_column_name(header);
            if name == TIMESTAMP_COLUMN {
                timestamp_at = Some(position);
            } else {
                names.push((position, name));
            }
        }

        let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); names.len()];
        let mut timestamps = Vec::new();
        for record in reader.records() {
            let record = record?;
            for (slot, (position, _)) in names.iter().enumerate() {
                values[slot].push(parse_cell(record.get(*position).unwrap_or("")));
            }
            if let Some(position) = timestamp_at {
                timestamps.push(record.get(position).unwrap_or("").to_string());
            }
        }

        let n_rows = values
            .first()
            .map(Vec::len)
            .unwrap_or(timestamps.len());
        let frame = Self {
            columns: names.into_iter().map(|(_, name)| name).collect(),
            values,
            timestamps: timestamp_at.map(|_| timestamps),
            n_rows,
        };
        Ok(frame)
    }

    /// Number of rows
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of value columns (timestamp excluded)
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Column names in insertion order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Timestamp column, if any
    pub fn timestamps(&self) -> Option<&[String]> {
        self.timestamps.as_deref()
    }

    /// Detach the timestamp column
    pub fn take_timestamps(&mut self) -> Option<Vec<String>> {
        self.timestamps.take()
    }

    /// Check whether a column exists
    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of a column
    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.index_of(name).map(|i| self.values[i].as_slice())
    }

    /// Mutable values of a column
    pub fn column_mut(&mut self, name: &str) -> Option<&mut Vec<Option<f64>>> {
        let index = self.index_of(name)?;
        Some(&mut self.values[index])
    }

    /// Iterate over `(name, values)` pairs
    pub fn iter_columns(&self) -> impl Iterator<Item = (&str, &[Option<f64>])> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Vec::as_slice))
    }

    /// Add or replace a column
    pub fn insert_column(&mut self, name: impl Into<String>, values: Vec<Option<f64>>) -> Result<()> {
        let name = name.into();
        if self.columns.is_empty() && self.timestamps.is_none() {
            self.n_rows = values.len();
        }
        if values.len() != self.n_rows {
            return Err(Error::validation(format!(
                "column '{}' has {} rows, frame has {}",
                name,
                values.len(),
                self.n_rows
            )));
        }
        match self.index_of(&name) {
            Some(index) => self.values[index] = values,
            None => {
                self.columns.push(name);
                self.values.push(values);
            }
        }
        Ok(())
    }

    /// Remove a column, returning its values
    pub fn remove_column(&mut self, name: &str) -> Option<Vec<Option<f64>>> {
        let index = self.index_of(name)?;
        self.columns.remove(index);
        Some(self.values.remove(index))
    }

    /// Keep only the rows whose mask entry is true
    pub fn retain_rows(&mut self, keep: &[bool]) {
        let filter = |column: &mut Vec<Option<f64>>| {
            let mut mask = keep.iter();
            column.retain(|_| *mask.next().unwrap_or(&false));
        };
        self.values.iter_mut().for_each(filter);
        if let Some(timestamps) = self.timestamps.as_mut() {
            let mut mask = keep.iter();
            timestamps.retain(|_| *mask.next().unwrap_or(&false));
        }
        self.n_rows = keep.iter().take(self.n_rows).filter(|k| **k).count();
    }

    /// First `n` rows
    pub fn head(&self, n: usize) -> Self {
        let n = n.min(self.n_rows);
        self.slice(0, n)
    }

    /// Last `n` rows
    pub fn tail(&self, n: usize) -> Self {
        let n = n.min(self.n_rows);
        self.slice(self.n_rows - n, self.n_rows)
    }

    fn slice(&self, start: usize, end: usize) -> Self {
        Self {
            columns: self.columns.clone(),
            values: self.values.iter().map(|v| v[start..end].to_vec()).collect(),
            timestamps: self.timestamps.as_ref().map(|t| t[start..end].to_vec()),
            n_rows: end - start,
        }
    }

    /// Append the rows of another frame. Columns missing on either side are
    /// filled with missing cells.
    pub fn append(&mut self, other: MetricFrame) {
        if self.n_rows == 0 && self.columns.is_empty() {
            *self = other;
            return;
        }
        let existing_rows = self.n_rows;
        for name in &other.columns {
            if !self.contains(name) {
                self.columns.push(name.clone());
                self.values.push(vec![None; existing_rows]);
            }
        }
        for (index, name) in self.columns.iter().enumerate() {
            match other.column(name) {
                Some(values) => self.values[index].extend_from_slice(values),
                None => self.values[index].extend(std::iter::repeat(None).take(other.n_rows)),
            }
        }
        self.timestamps = match (self.timestamps.take(), other.timestamps) {
            (Some(mut mine), Some(theirs)) => {
                mine.extend(theirs);
                Some(mine)
            }
            (Some(mut mine), None) => {
                mine.extend(std::iter::repeat(String::new()).take(other.n_rows));
                Some(mine)
            }
            (None, Some(theirs)) => {
                let mut padded = vec![String::new(); existing_rows];
                padded.extend(theirs);
                Some(padded)
            }
            (None, None) => None,
        };
        self.n_rows += other.n_rows;
    }

    /// A single row as an observation
    pub fn row(&self, index: usize) -> Option<Observation> {
        if index >= self.n_rows {
            return None;
        }
        let values = self
            .iter_columns()
            .map(|(name, column)| (name.to_string(), column[index]))
            .collect();
        Some(Observation {
            timestamp: self.timestamps.as_ref().map(|t| t[index].clone()),
            values,
        })
    }

    /// Iterate over rows as observations
    pub fn rows(&self) -> impl Iterator<Item = Observation> + '_ {
        (0..self.n_rows).filter_map(move |i| self.row(i))
    }
}

fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    match cell {
        "True" | "true" => Some(1.0),
        "False" | "false" => Some(0.0),
        _ => cell.parse::<f64>().ok().filter(|v| !v.is_nan()),
    }
}

/// Ordinal states per column, stored column-major
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscreteFrame {
    columns: Vec<String>,
    states: Vec<Vec<u32>>,
    n_rows: usize,
}

impl DiscreteFrame {
    /// Empty frame with a fixed row count
    pub fn with_rows(n_rows: usize) -> Self {
        Self {
            n_rows,
            ..Default::default()
        }
    }

    /// Build from named state columns of equal length
    pub fn new(columns: Vec<(String, Vec<u32>)>) -> Result<Self> {
        let n_rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut frame = Self::with_rows(n_rows);
        for (name, states) in columns {
            frame.insert_column(name, states)?;
        }
        Ok(frame)
    }

    /// Number of rows
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Position of a column
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Check whether a column exists
    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// States of a column by name
    pub fn column(&self, name: &str) -> Option<&[u32]> {
        self.index_of(name).map(|i| self.states[i].as_slice())
    }

    /// States of a column by position
    pub fn column_at(&self, index: usize) -> &[u32] {
        &self.states[index]
    }

    /// Iterate over `(name, states)` pairs
    pub fn iter_columns(&self) -> impl Iterator<Item = (&str, &[u32])> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.states.iter().map(Vec::as_slice))
    }

    /// Add or replace a column
    pub fn insert_column(&mut self, name: impl Into<String>, states: Vec<u32>) -> Result<()> {
        let name = name.into();
        if states.len() != self.n_rows {
            return Err(Error::validation(format!(
                "state column '{}' has {} rows, frame has {}",
                name,
                states.len(),
                self.n_rows
            )));
        }
        match self.index_of(&name) {
            Some(index) => self.states[index] = states,
            None => {
                self.columns.push(name);
                self.states.push(states);
            }
        }
        Ok(())
    }

    /// Remove a column, returning its states
    pub fn remove_column(&mut self, name: &str) -> Option<Vec<u32>> {
        let index = self.index_of(name)?;
        self.columns.remove(index);
        Some(self.states.remove(index))
    }

    /// Frame restricted to the given columns, in the given order
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        let mut frame = Self::with_rows(self.n_rows);
        for name in names {
            let name = name.as_ref();
            let states = self
                .column(name)
                .ok_or_else(|| Error::validation(format!("unknown column '{}'", name)))?;
            frame.insert_column(name, states.to_vec())?;
        }
        Ok(frame)
    }
}

/// One inference-time row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Retrieval time of the row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Raw readings keyed by column name
    #[serde(flatten)]
    pub values: BTreeMap<String, Option<f64>>,
}

impl Observation {
    /// Create an observation
    pub fn new(timestamp: Option<String>, values: BTreeMap<String, Option<f64>>) -> Self {
        Self { timestamp, values }
    }

    /// Reading of a column; `None` when absent or missing
    pub fn get(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied().flatten()
    }

    /// Normalise column names (`-` to `_`)
    pub fn normalized(self) -> Self {
        Self {
            timestamp: self.timestamp,
            values: self
                .values
                .into_iter()
                .map(|(name, value)| (normalize_column_name(&name), value))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = ",timestamp,latency_edgex-ui_edgex-core-data,edgex-core-data\n\
0,2022-05-06 12:00:00,0.12,0\n\
1,2022-05-06 12:00:30,,1\n\
2,2022-05-06 12:01:00,0.95,1\n";

    #[test]
    fn test_from_csv_drops_index_and_normalizes() {
        let frame = MetricFrame::from_csv_reader(CSV.as_bytes()).unwrap();
        assert_eq!(frame.n_rows(), 3);
        assert_eq!(
            frame.columns(),
            &["latency_edgex_ui_edgex_core_data", "edgex_core_data"]
        );
        assert_eq!(
            frame.column("latency_edgex_ui_edgex_core_data").unwrap(),
            &[Some(0.12), None, Some(0.95)]
        );
        assert_eq!(frame.timestamps().unwrap()[1], "2022-05-06 12:00:30");
    }

    #[test]
    fn test_retain_rows_keeps_timestamps_aligned() {
        let mut frame = MetricFrame::from_csv_reader(CSV.as_bytes()).unwrap();
        frame.retain_rows(&[true, false, true]);
        assert_eq!(frame.n_rows(), 2);
        assert_eq!(frame.column("edgex_core_data").unwrap(), &[Some(0.0), Some(1.0)]);
        assert_eq!(frame.timestamps().unwrap()[1], "2022-05-06 12:01:00");
    }

    #[test]
    fn test_append_unions_columns() {
        let mut a = MetricFrame::new(vec![("a".into(), vec![Some(1.0)])]).unwrap();
        let b = MetricFrame::new(vec![("b".into(), vec![Some(2.0), Some(3.0)])]).unwrap();
        a.append(b);
        assert_eq!(a.n_rows(), 3);
        assert_eq!(a.column("a").unwrap(), &[Some(1.0), None, None]);
        assert_eq!(a.column("b").unwrap(), &[None, Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_head_tail_and_rows() {
        let frame = MetricFrame::from_csv_reader(CSV.as_bytes()).unwrap();
        assert_eq!(frame.head(1).n_rows(), 1);
        let tail = frame.tail(2);
        let row = tail.row(1).unwrap();
        assert_eq!(row.timestamp.as_deref(), Some("2022-05-06 12:01:00"));
        assert_eq!(row.get("edgex_core_data"), Some(1.0));
        assert_eq!(frame.rows().count(), 3);
    }

    #[test]
    fn test_discrete_select_and_length_check() {
        let frame = DiscreteFrame::new(vec![
            ("a".into(), vec![0, 1, 0]),
            ("b".into(), vec![1, 1, 0]),
        ])
        .unwrap();
        let selected = frame.select(&["b"]).unwrap();
        assert_eq!(selected.columns(), &["b"]);
        let mut bad = frame.clone();
        assert!(bad.insert_column("c", vec![0]).is_err());
        assert!(frame.select(&["missing"]).is_err());
    }

    #[test]
    fn test_observation_json_flattens_values() {
        let json = r#"{"timestamp":"t0","cpu_edgex-core-data":0.5,"memory_x":null}"#;
        let obs: Observation = serde_json::from_str(json).unwrap();
        let obs = obs.normalized();
        assert_eq!(obs.timestamp.as_deref(), Some("t0"));
        assert_eq!(obs.get("cpu_edgex_core_data"), Some(0.5));
        assert_eq!(obs.get("memory_x"), None);
        assert!(obs.values.contains_key("memory_x"));
    }
}
