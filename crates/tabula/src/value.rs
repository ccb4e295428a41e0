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

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single cell. Every operator pattern-matches on the variant instead of
/// relying on implicit coercion; the conversion helpers below define exactly
/// which cells count as null, numeric or boolean-like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

const BOOLEAN_LITERALS: [&str; 6] = ["true", "false", "yes", "no", "0", "1"];

impl Value {
    /// Null and the empty string are both "missing".
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Finite numeric reading of the cell. Booleans never count as numbers.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) if n.is_finite() => Some(*n),
            Value::Text(s) => parse_finite(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.as_number().is_some()
    }

    pub fn is_boolean_like(&self) -> bool {
        match self {
            Value::Bool(_) => true,
            Value::Text(s) => {
                let lowered = s.trim().to_lowercase();
                BOOLEAN_LITERALS.contains(&lowered.as_str())
            }
            Value::Number(n) => *n == 0.0 || *n == 1.0,
            Value::Null => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Ordering used for chart axes: numbers compare numerically, anything
    /// else falls back to the display string.
    pub fn axis_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            _ => self.to_string().cmp(&other.to_string()),
        }
    }
}

fn parse_finite(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Integral values print without a fractional part so that `3.0` and `"3"`
/// share a display string.
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}
impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}
impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}
impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Value::Null, Value::Number),
            serde_json::Value::String(s) => Value::Text(s.clone()),
            nested => Value::Text(nested.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_null() {
        assert!(Value::Null.is_null());
        assert!(Value::from("").is_null());
        assert!(!Value::from(" ").is_null());
        assert!(!Value::from(0.0).is_null());
    }

    #[test]
    fn numeric_reading_excludes_booleans_and_non_finite() {
        assert_eq!(Value::from(" 42.5 ").as_number(), Some(42.5));
        assert_eq!(Value::from(true).as_number(), None);
        assert_eq!(Value::from("inf").as_number(), None);
        assert_eq!(Value::from("NaN").as_number(), None);
        assert_eq!(Value::Number(f64::NAN).as_number(), None);
        assert_eq!(Value::from("12abc").as_number(), None);
    }

    #[test]
    fn integral_numbers_share_display_with_text() {
        assert_eq!(Value::from(3.0).to_string(), "3");
        assert_eq!(Value::from(3.0).to_string(), Value::from("3").to_string());
        assert_eq!(Value::from(2.5).to_string(), "2.5");
        assert_eq!(Value::Null.to_string(), "");
    }

    #[test]
    fn integral_formatting_covers_sign_and_magnitude() {
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(-42.0), "-42");
        assert_eq!(format_number(1e14), "100000000000000");
        assert_eq!(format_number(1e15), "1000000000000000");
        assert_eq!(format_number(0.25), "0.25");
    }

    #[test]
    fn axis_ordering_is_numeric_only_for_numbers() {
        assert_eq!(Value::from(9.0).axis_cmp(&Value::from(10.0)), Ordering::Less);
        assert_eq!(Value::from("9").axis_cmp(&Value::from("10")), Ordering::Greater);
    }

    #[test]
    fn deserializes_untagged_json() {
        let values: Vec<Value> = serde_json::from_str(r#"[null, true, 1.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Number(1.5),
                Value::Text("x".into())
            ]
        );
    }
}
