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

use crate::config::EngineConfig;
use crate::value::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Boolean,
    Date,
    Text,
}
impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Text => "text",
        };
        f.write_str(name)
    }
}

/// Classifies a column from its values. Categories are tried in the order
/// boolean, numeric, date; the first whose match ratio over non-null values
/// reaches the threshold wins, and text is the fallback.
#[derive(Debug, Clone)]
pub struct TypeInferencer {
    threshold: f64,
    date_formats: Vec<String>,
}

impl TypeInferencer {
    pub fn new() -> Self {
        Self::from_config(&EngineConfig::default())
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            threshold: config.type_confidence_threshold,
            date_formats: config.date_formats.clone(),
        }
    }

    pub fn infer<'a, I>(&self, values: I) -> ColumnType
    where
        I: IntoIterator<Item = &'a Value>,
    {
        self.infer_with_confidence(values).0
    }

    /// Returns the winning type and the share of non-null values that matched it.
    /// Text reports the share that matched none of the stronger categories.
    pub fn infer_with_confidence<'a, I>(&self, values: I) -> (ColumnType, f64)
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let present: Vec<&Value> = values.into_iter().filter(|v| !v.is_null()).collect();
        if present.is_empty() {
            return (ColumnType::Text, 1.0);
        }
        let total = present.len() as f64;
        let ratio = |test: &dyn Fn(&Value) -> bool| {
            present.iter().filter(|&&v| test(v)).count() as f64 / total
        };

        let boolean = ratio(&|v| v.is_boolean_like());
        if boolean >= self.threshold {
            return (ColumnType::Boolean, boolean);
        }
        let numeric = ratio(&|v| !matches!(v, Value::Bool(_)) && v.is_numeric());
        if numeric >= self.threshold {
            return (ColumnType::Numeric, numeric);
        }
        let date = ratio(&|v| self.is_date(v));
        if date >= self.threshold {
            return (ColumnType::Date, date);
        }
        let strongest = boolean.max(numeric).max(date);
        (ColumnType::Text, 1.0 - strongest)
    }

    pub fn is_date(&self, value: &Value) -> bool {
        value
            .as_text()
            .is_some_and(|s| parse_date(s.trim(), &self.date_formats).is_some())
    }
}

impl Default for TypeInferencer {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a calendar date or timestamp using RFC 3339 first and then each
/// configured format.
pub fn parse_date(value: &str, formats: &[String]) -> Option<NaiveDateTime> {
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    for format in formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

pub fn infer_column_type(values: &[Value]) -> ColumnType {
    TypeInferencer::new().infer(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<Value> {
        items.iter().map(|s| Value::from(*s)).collect()
    }

    #[test]
    fn classifies_basic_columns() {
        assert_eq!(infer_column_type(&texts(&["1", "2", "3"])), ColumnType::Numeric);
        assert_eq!(
            infer_column_type(&texts(&["true", "false", "yes"])),
            ColumnType::Boolean
        );
        assert_eq!(
            infer_column_type(&texts(&["2024-01-01", "2024-02-01"])),
            ColumnType::Date
        );
        assert_eq!(infer_column_type(&texts(&["red", "blue", "red"])), ColumnType::Text);
    }

    #[test]
    fn zero_one_strings_are_boolean() {
        assert_eq!(infer_column_type(&texts(&["0", "1", "1", "0"])), ColumnType::Boolean);
    }

    #[test]
    fn empty_and_all_null_columns_are_text() {
        assert_eq!(infer_column_type(&[]), ColumnType::Text);
        assert_eq!(
            infer_column_type(&[Value::Null, Value::from("")]),
            ColumnType::Text
        );
    }

    #[test]
    fn nulls_do_not_dilute_the_ratio() {
        let values = vec![
            Value::from(1.5),
            Value::Null,
            Value::Null,
            Value::from("2.5"),
            Value::from(""),
        ];
        assert_eq!(infer_column_type(&values), ColumnType::Numeric);
    }

    #[test]
    fn threshold_is_eighty_percent() {
        // 4 of 5 numeric clears the bar, 3 of 5 does not.
        assert_eq!(
            infer_column_type(&texts(&["10", "20", "30", "40", "n/a"])),
            ColumnType::Numeric
        );
        assert_eq!(
            infer_column_type(&texts(&["10", "20", "30", "x", "n/a"])),
            ColumnType::Text
        );
    }

    #[test]
    fn literal_booleans_are_not_numbers() {
        let values = vec![Value::from(true), Value::from(false), Value::from(true)];
        let (kind, confidence) = TypeInferencer::new().infer_with_confidence(&values);
        assert_eq!(kind, ColumnType::Boolean);
        assert!((confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn accepts_alternate_date_layouts() {
        let inferencer = TypeInferencer::new();
        assert!(inferencer.is_date(&Value::from("03/15/2024")));
        assert!(inferencer.is_date(&Value::from("2024-03-15T10:30:00Z")));
        assert!(inferencer.is_date(&Value::from("Mar 15, 2024")));
        assert!(!inferencer.is_date(&Value::from("2024-02-30")));
        assert!(!inferencer.is_date(&Value::from(20240315.0)));
    }
}
