// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::error::{AnalyticsError, DataError, Result};
use crate::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub type Row = IndexMap<String, Value>;

static NULL: Value = Value::Null;

/// Reads a cell; absent keys read as null.
pub fn cell<'a>(row: &'a Row, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&NULL)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Dataset {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Builds a dataset from rows alone, ordering columns by first appearance.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        Self { columns, rows }
    }

    pub fn from_json_records(json: &serde_json::Value) -> Result<Self> {
        let records = json.as_array().ok_or(DataError::NotAnArray)?;
        let mut rows = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let object = record.as_object().ok_or_else(|| DataError::InvalidRecord {
                row: index,
                found: json_kind(record).to_string(),
            })?;
            let row: Row = object
                .iter()
                .map(|(key, value)| (key.clone(), Value::from(value)))
                .collect();
            rows.push(row);
        }
        Ok(Self::from_rows(rows))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(raw)?;
        Self::from_json_records(&json)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn require_column(&self, name: &str) -> Result<()> {
        require_column(&self.columns, name)
    }

    pub fn column_values(&self, name: &str) -> Result<Vec<&Value>> {
        self.require_column(name)?;
        Ok(self.rows.iter().map(|row| cell(row, name)).collect())
    }

    /// Adds or replaces a derived column. `values` must have one entry per row.
    pub(crate) fn push_column(&mut self, name: String, values: Vec<Value>) {
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(name.clone(), value);
        }
        if !self.has_column(&name) {
            self.columns.push(name);
        }
    }
}

pub fn require_column(columns: &[String], name: &str) -> Result<()> {
    if columns.iter().any(|c| c == name) {
        Ok(())
    } else {
        Err(AnalyticsError::missing_column(name))
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Builds a row from `(column, value)` pairs.
#[macro_export]
macro_rules! row {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut row = $crate::dataset::Row::new();
        $(row.insert(::std::string::String::from($key), $crate::value::Value::from($value));)*
        row
    }};
}
