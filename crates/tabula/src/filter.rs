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

use crate::cancel::CancelToken;
use crate::dataset::{cell, Dataset, Row};
use crate::error::Result;
use crate::value::Value;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Between,
    InList,
    /// Unrecognised operators are kept by name and let every row through.
    Unknown(String),
}
impl From<String> for FilterOperator {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "equals" => Self::Equals,
            "not_equals" => Self::NotEquals,
            "contains" => Self::Contains,
            "greater_than" => Self::GreaterThan,
            "less_than" => Self::LessThan,
            "between" => Self::Between,
            "in_list" => Self::InList,
            _ => Self::Unknown(raw),
        }
    }
}
impl From<FilterOperator> for String {
    fn from(op: FilterOperator) -> Self {
        match op {
            FilterOperator::Equals => "equals".to_string(),
            FilterOperator::NotEquals => "not_equals".to_string(),
            FilterOperator::Contains => "contains".to_string(),
            FilterOperator::GreaterThan => "greater_than".to_string(),
            FilterOperator::LessThan => "less_than".to_string(),
            FilterOperator::Between => "between".to_string(),
            FilterOperator::InList => "in_list".to_string(),
            FilterOperator::Unknown(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,
}

impl Filter {
    pub fn new(column: &str, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            operator,
            value: value.into(),
            value2: None,
            values: Vec::new(),
        }
    }
    pub fn between(column: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self {
            value2: Some(high.into()),
            ..Self::new(column, FilterOperator::Between, low)
        }
    }
    pub fn in_list<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            ..Self::new(column, FilterOperator::InList, Value::Null)
        }
    }
}

/// A filter with its operands pre-converted once instead of per row.
#[derive(Debug)]
enum CompiledFilter {
    Equals(String, String),
    NotEquals(String, String),
    Contains(String, String),
    GreaterThan(String, Option<f64>),
    LessThan(String, Option<f64>),
    Between(String, Option<f64>, Option<f64>),
    InList(String, Vec<String>),
    PassThrough,
}

impl CompiledFilter {
    fn compile(filter: &Filter) -> Self {
        let column = filter.column.clone();
        match &filter.operator {
            FilterOperator::Equals => Self::Equals(column, filter.value.to_string()),
            FilterOperator::NotEquals => Self::NotEquals(column, filter.value.to_string()),
            FilterOperator::Contains => {
                Self::Contains(column, filter.value.to_string().to_lowercase())
            }
            FilterOperator::GreaterThan => Self::GreaterThan(column, filter.value.as_number()),
            FilterOperator::LessThan => Self::LessThan(column, filter.value.as_number()),
            FilterOperator::Between => {
                let low = filter.value.as_number();
                let high = match &filter.value2 {
                    Some(v) => v.as_number(),
                    None => low,
                };
                Self::Between(column, low, high)
            }
            FilterOperator::InList => Self::InList(
                column,
                filter.values.iter().map(ToString::to_string).collect(),
            ),
            FilterOperator::Unknown(name) => {
                warn!(operator = %name, column = %filter.column, "unknown filter operator; rows pass unfiltered");
                Self::PassThrough
            }
        }
    }

    fn matches(&self, row: &Row) -> bool {
        match self {
            Self::Equals(column, expected) => cell(row, column).to_string() == *expected,
            Self::NotEquals(column, expected) => cell(row, column).to_string() != *expected,
            Self::Contains(column, needle) => cell(row, column)
                .to_string()
                .to_lowercase()
                .contains(needle.as_str()),
            Self::GreaterThan(column, bound) => {
                numeric(row, column).zip(*bound).is_some_and(|(v, b)| v > b)
            }
            Self::LessThan(column, bound) => {
                numeric(row, column).zip(*bound).is_some_and(|(v, b)| v < b)
            }
            Self::Between(column, low, high) => match (numeric(row, column), low, high) {
                (Some(v), Some(lo), Some(hi)) => v >= *lo && v <= *hi,
                _ => false,
            },
            Self::InList(column, allowed) => {
                let shown = cell(row, column).to_string();
                allowed.iter().any(|a| *a == shown)
            }
            Self::PassThrough => true,
        }
    }
}

fn numeric(row: &Row, column: &str) -> Option<f64> {
    cell(row, column).as_number()
}

#[derive(Debug, Clone)]
pub struct FilterEngine {
    parallel_threshold: usize,
    cancel: CancelToken,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self {
            parallel_threshold: 10000,
            cancel: CancelToken::new(),
        }
    }
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Keeps rows that pass every filter. Column references are checked up
    /// front, in filter order.
    #[instrument(level = "debug", skip_all, fields(rows = dataset.row_count(), filters = filters.len()))]
    pub fn apply(&self, dataset: &Dataset, filters: &[Filter]) -> Result<Dataset> {
        for filter in filters {
            dataset.require_column(&filter.column)?;
        }
        self.cancel.check("filter")?;
        let compiled: Vec<CompiledFilter> = filters.iter().map(CompiledFilter::compile).collect();
        let keep = |row: &&Row| compiled.iter().all(|f| f.matches(row));
        let rows: Vec<Row> = if dataset.row_count() > self.parallel_threshold {
            dataset.rows.par_iter().filter(keep).cloned().collect()
        } else {
            dataset.rows.iter().filter(keep).cloned().collect()
        };
        self.cancel.check("filter")?;
        Ok(Dataset::new(dataset.columns.clone(), rows))
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

pub fn apply_filters(dataset: &Dataset, filters: &[Filter]) -> Result<Dataset> {
    FilterEngine::new().apply(dataset, filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    fn numbers() -> Dataset {
        Dataset::from_rows(vec![
            row! {"v" => 5.0, "name" => "Alpha"},
            row! {"v" => 15.0, "name" => "beta"},
            row! {"v" => 25.0, "name" => "Gamma"},
            row! {"v" => "n/a", "name" => "alphabet"},
        ])
    }

    fn v_of(ds: &Dataset) -> Vec<String> {
        ds.rows.iter().map(|r| cell(r, "v").to_string()).collect()
    }

    #[test]
    fn between_is_inclusive() {
        let out = apply_filters(&numbers(), &[Filter::between("v", 10.0, 20.0)]).unwrap();
        assert_eq!(v_of(&out), vec!["15"]);
        let out = apply_filters(&numbers(), &[Filter::between("v", 5.0, 15.0)]).unwrap();
        assert_eq!(v_of(&out), vec!["5", "15"]);
    }

    #[test]
    fn between_without_upper_bound_is_equality() {
        let filter = Filter::new("v", FilterOperator::Between, 25.0);
        let out = apply_filters(&numbers(), &[filter]).unwrap();
        assert_eq!(v_of(&out), vec!["25"]);
    }

    #[test]
    fn comparisons_drop_non_numeric_cells() {
        let gt = apply_filters(&numbers(), &[Filter::new("v", FilterOperator::GreaterThan, 10.0)]).unwrap();
        assert_eq!(v_of(&gt), vec!["15", "25"]);
        let lt = apply_filters(&numbers(), &[Filter::new("v", FilterOperator::LessThan, "20")]).unwrap();
        assert_eq!(v_of(&lt), vec!["5", "15"]);
    }

    #[test]
    fn equality_uses_display_strings() {
        let out = apply_filters(&numbers(), &[Filter::new("v", FilterOperator::Equals, "15")]).unwrap();
        assert_eq!(out.row_count(), 1);
        let out = apply_filters(&numbers(), &[Filter::new("v", FilterOperator::NotEquals, 15.0)]).unwrap();
        assert_eq!(out.row_count(), 3);
    }

    #[test]
    fn contains_ignores_case_and_filters_compose() {
        let filters = [
            Filter::new("name", FilterOperator::Contains, "ALPHA"),
            Filter::new("v", FilterOperator::Equals, 5.0),
        ];
        let out = apply_filters(&numbers(), &filters[..1]).unwrap();
        assert_eq!(out.row_count(), 2);
        let out = apply_filters(&numbers(), &filters).unwrap();
        assert_eq!(out.row_count(), 1);
    }

    #[test]
    fn in_list_membership() {
        let out = apply_filters(&numbers(), &[Filter::in_list("name", ["beta", "Gamma", "delta"])]).unwrap();
        assert_eq!(v_of(&out), vec!["15", "25"]);
    }

    #[test]
    fn unknown_operator_fails_open() {
        let filter = Filter::new("v", FilterOperator::from("starts_with".to_string()), "1");
        assert_eq!(filter.operator, FilterOperator::Unknown("starts_with".into()));
        let out = apply_filters(&numbers(), &[filter]).unwrap();
        assert_eq!(out, numbers());
    }

    #[test]
    fn empty_filter_list_is_identity_and_equality_is_idempotent() {
        let ds = numbers();
        assert_eq!(apply_filters(&ds, &[]).unwrap(), ds);
        let eq = Filter::new("name", FilterOperator::Equals, "beta");
        let once = apply_filters(&ds, &[eq.clone()]).unwrap();
        let twice = apply_filters(&once, &[eq.clone()]).unwrap();
        assert_eq!(once, twice);
        assert_eq!(apply_filters(&ds, &[eq.clone(), eq]).unwrap(), once);
    }

    #[test]
    fn missing_column_is_an_error() {
        let err = apply_filters(&numbers(), &[Filter::new("w", FilterOperator::Equals, 1.0)]).unwrap_err();
        assert_eq!(err.category(), "data");
    }

    #[test]
    fn parallel_path_preserves_order() {
        let engine = FilterEngine::new().with_parallel_threshold(0);
        let out = engine
            .apply(&numbers(), &[Filter::new("v", FilterOperator::GreaterThan, 0.0)])
            .unwrap();
        assert_eq!(v_of(&out), vec!["5", "15", "25"]);
    }

    #[test]
    fn deserializes_from_json() {
        let filters: Vec<Filter> = serde_json::from_str(
            r#"[{"column": "v", "operator": "between", "value": 10, "value2": 20},
                {"column": "name", "operator": "regex", "value": "^a"}]"#,
        )
        .unwrap();
        assert_eq!(filters[0].operator, FilterOperator::Between);
        assert_eq!(filters[1].operator, FilterOperator::Unknown("regex".into()));
        let out = apply_filters(&numbers(), &filters).unwrap();
        assert_eq!(v_of(&out), vec!["15"]);
    }
}
