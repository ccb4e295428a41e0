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
use crate::dataset::{cell, require_column, Dataset, Row};
use crate::error::{Result, SpecError};
use crate::value::Value;
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Sum,
    #[serde(alias = "avg", alias = "mean")]
    Average,
    Count,
    Min,
    Max,
    Median,
    #[serde(alias = "distinct", alias = "count_distinct")]
    DistinctCount,
}

impl FromStr for AggregateFunction {
    type Err = SpecError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "average" | "avg" | "mean" => Ok(Self::Average),
            "count" => Ok(Self::Count),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "median" => Ok(Self::Median),
            "distinct_count" | "distinct" | "count_distinct" => Ok(Self::DistinctCount),
            other => Err(SpecError::UnknownName {
                kind: "aggregation",
                name: other.to_string(),
            }),
        }
    }
}

impl AggregateFunction {
    /// Reduces one group's cells. Numeric reducers only see values that parse
    /// as finite numbers; sum, average and count fall back to 0 on an empty
    /// subset while min, max and median yield null.
    pub fn reduce(&self, values: &[&Value]) -> Value {
        let numbers = || -> Vec<f64> { values.iter().filter_map(|v| v.as_number()).collect() };
        match self {
            AggregateFunction::Sum => Value::Number(numbers().iter().sum()),
            AggregateFunction::Average => {
                let numbers = numbers();
                if numbers.is_empty() {
                    Value::Number(0.0)
                } else {
                    Value::Number(numbers.iter().sum::<f64>() / numbers.len() as f64)
                }
            }
            AggregateFunction::Count => Value::Number(numbers().len() as f64),
            AggregateFunction::Min => numbers().into_iter().reduce(f64::min).into(),
            AggregateFunction::Max => numbers().into_iter().reduce(f64::max).into(),
            AggregateFunction::Median => median(numbers()).into(),
            AggregateFunction::DistinctCount => {
                let distinct = values
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(|v| v.to_string())
                    .collect::<HashSet<_>>()
                    .len();
                Value::Number(distinct as f64)
            }
        }
    }
}

fn median(mut numbers: Vec<f64>) -> Option<f64> {
    if numbers.is_empty() {
        return None;
    }
    numbers.sort_by(f64::total_cmp);
    let mid = numbers.len() / 2;
    if numbers.len() % 2 == 0 {
        Some((numbers[mid - 1] + numbers[mid]) / 2.0)
    } else {
        Some(numbers[mid])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YColumns {
    One(String),
    Many(Vec<String>),
}
impl YColumns {
    pub fn as_slice(&self) -> &[String] {
        match self {
            YColumns::One(column) => std::slice::from_ref(column),
            YColumns::Many(columns) => columns,
        }
    }
}

impl From<Vec<String>> for YColumns {
    fn from(columns: Vec<String>) -> Self {
        YColumns::Many(columns)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSpec {
    pub x: String,
    pub y: YColumns,
    #[serde(default)]
    pub aggregation: Option<AggregateFunction>,
}
impl ChartSpec {
    pub fn new(x: &str, y: &[&str], aggregation: Option<AggregateFunction>) -> Self {
        Self {
            x: x.to_string(),
            y: YColumns::Many(y.iter().map(|s| s.to_string()).collect()),
            aggregation,
        }
    }

    pub fn validate(&self, columns: &[String]) -> Result<()> {
        if self.y.as_slice().is_empty() {
            return Err(SpecError::MissingYColumns.into());
        }
        require_column(columns, &self.x)?;
        for y in self.y.as_slice() {
            require_column(columns, y)?;
        }
        Ok(())
    }
}

pub type Record = Row;

#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    cancel: CancelToken,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    #[instrument(level = "debug", skip(self, dataset), fields(rows = dataset.row_count(), x = %spec.x))]
    pub fn aggregate(&self, dataset: &Dataset, spec: &ChartSpec) -> Result<Vec<Record>> {
        spec.validate(&dataset.columns)?;
        let ys = spec.y.as_slice();
        match spec.aggregation {
            None => Ok(dataset
                .rows
                .iter()
                .map(|row| project(row, &spec.x, ys))
                .collect()),
            Some(function) => self.grouped(&dataset.rows, &spec.x, ys, function),
        }
    }

    fn grouped(
        &self,
        rows: &[Row],
        x: &str,
        ys: &[String],
        function: AggregateFunction,
    ) -> Result<Vec<Record>> {
        let mut groups: IndexMap<String, (Value, Vec<&Row>)> = IndexMap::new();
        for (index, row) in rows.iter().enumerate() {
            if index % 4096 == 0 {
                self.cancel.check("aggregate")?;
            }
            let key_value = cell(row, x);
            groups
                .entry(key_value.to_string())
                .or_insert_with(|| (key_value.clone(), Vec::new()))
                .1
                .push(row);
        }
        debug!(groups = groups.len(), ?function, "grouped rows");
        let groups: Vec<(Value, Vec<&Row>)> = groups.into_values().collect();
        let mut records: Vec<Record> = groups
            .par_iter()
            .map(|(x_value, members)| {
                let mut record = Record::new();
                record.insert(x.to_string(), x_value.clone());
                for y in ys {
                    let cells: Vec<&Value> = members.iter().map(|row| cell(row, y)).collect();
                    record.insert(y.clone(), function.reduce(&cells));
                }
                record
            })
            .collect();
        records.sort_by(|a, b| cell(a, x).axis_cmp(cell(b, x)));
        Ok(records)
    }
}

fn project(row: &Row, x: &str, ys: &[String]) -> Record {
    let mut record = Record::new();
    record.insert(x.to_string(), cell(row, x).clone());
    for y in ys {
        record.insert(y.clone(), cell(row, y).clone());
    }
    record
}

pub fn aggregate_chart_data(
    dataset: &Dataset,
    x: &str,
    ys: &[&str],
    aggregation: Option<AggregateFunction>,
) -> Result<Vec<Record>> {
    Aggregator::new().aggregate(dataset, &ChartSpec::new(x, ys, aggregation))
}

/// Reduces a whole column to a single number; empty numeric subsets give 0.
pub fn calculate_metric(
    dataset: &Dataset,
    column: &str,
    calculation: AggregateFunction,
) -> Result<f64> {
    let values = dataset.column_values(column)?;
    Ok(calculation.reduce(&values).as_number().unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    fn sales() -> Dataset {
        Dataset::from_rows(vec![
            row! {"region" => "West", "sales" => 50.0, "units" => "5"},
            row! {"region" => "East", "sales" => 100.0, "units" => "n/a"},
            row! {"region" => "East", "sales" => 200.0, "units" => "7"},
        ])
    }

    #[test]
    fn sums_by_region_sorted_lexicographically() {
        let out = aggregate_chart_data(&sales(), "region", &["sales"], Some(AggregateFunction::Sum))
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["region"], Value::from("East"));
        assert_eq!(out[0]["sales"], Value::from(300.0));
        assert_eq!(out[1]["region"], Value::from("West"));
        assert_eq!(out[1]["sales"], Value::from(50.0));
    }

    #[test]
    fn count_only_counts_numeric_cells() {
        let out = aggregate_chart_data(
            &sales(),
            "region",
            &["units"],
            Some(AggregateFunction::Count),
        )
        .unwrap();
        assert_eq!(out[0]["units"], Value::from(1.0));
        assert_eq!(out[1]["units"], Value::from(1.0));
    }

    #[test]
    fn without_aggregation_rows_pass_through() {
        let out = aggregate_chart_data(&sales(), "region", &["sales", "units"], None).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0]["region"], Value::from("West"));
        assert_eq!(out[1]["units"], Value::from("n/a"));
        assert_eq!(out[0].len(), 3);
    }

    #[test]
    fn numeric_and_text_keys_share_a_group() {
        let ds = Dataset::from_rows(vec![
            row! {"k" => 3.0, "v" => 1.0},
            row! {"k" => "3", "v" => 2.0},
            row! {"k" => 10.0, "v" => 4.0},
        ]);
        let out = aggregate_chart_data(&ds, "k", &["v"], Some(AggregateFunction::Sum)).unwrap();
        assert_eq!(out.len(), 2);
        // representative x is the first raw value, and 3 < 10 numerically
        assert_eq!(out[0]["k"], Value::from(3.0));
        assert_eq!(out[0]["v"], Value::from(3.0));
        assert_eq!(out[1]["k"], Value::from(10.0));
    }

    #[test]
    fn reducers_handle_empty_numeric_subsets() {
        let text = [&Value::from("a"), &Value::Null];
        assert_eq!(AggregateFunction::Sum.reduce(&text), Value::from(0.0));
        assert_eq!(AggregateFunction::Average.reduce(&text), Value::from(0.0));
        assert_eq!(AggregateFunction::Min.reduce(&text), Value::Null);
        assert_eq!(AggregateFunction::Median.reduce(&text), Value::Null);
        assert_eq!(AggregateFunction::DistinctCount.reduce(&text), Value::from(1.0));
    }

    #[test]
    fn median_averages_middle_pair() {
        let values: Vec<Value> = [4.0, 1.0, 3.0, 2.0].into_iter().map(Value::from).collect();
        let refs: Vec<&Value> = values.iter().collect();
        assert_eq!(AggregateFunction::Median.reduce(&refs), Value::from(2.5));
        assert_eq!(AggregateFunction::Median.reduce(&refs[..3]), Value::from(3.0));
        assert_eq!(AggregateFunction::Max.reduce(&refs), Value::from(4.0));
        assert_eq!(AggregateFunction::Min.reduce(&refs), Value::from(1.0));
    }

    #[test]
    fn missing_columns_fail() {
        let err = aggregate_chart_data(&sales(), "region", &["profit"], None).unwrap_err();
        assert!(err.to_string().contains("profit"));
        assert!(aggregate_chart_data(&sales(), "zone", &["sales"], None).is_err());
        assert!(aggregate_chart_data(&sales(), "region", &[], None).is_err());
    }

    #[test]
    fn metric_over_column() {
        let ds = sales();
        assert_eq!(calculate_metric(&ds, "sales", AggregateFunction::Sum).unwrap(), 350.0);
        assert_eq!(calculate_metric(&ds, "units", AggregateFunction::Average).unwrap(), 6.0);
        assert_eq!(calculate_metric(&ds, "region", AggregateFunction::Max).unwrap(), 0.0);
        assert_eq!(
            calculate_metric(&ds, "region", AggregateFunction::DistinctCount).unwrap(),
            2.0
        );
    }

    #[test]
    fn parses_aggregation_names() {
        assert_eq!("AVG".parse::<AggregateFunction>().unwrap(), AggregateFunction::Average);
        assert_eq!(
            "distinct".parse::<AggregateFunction>().unwrap(),
            AggregateFunction::DistinctCount
        );
        assert!("mode".parse::<AggregateFunction>().is_err());
        let spec: ChartSpec =
            serde_json::from_str(r#"{"x": "region", "y": "sales", "aggregation": "avg"}"#).unwrap();
        assert_eq!(spec.aggregation, Some(AggregateFunction::Average));
        assert_eq!(spec.y.as_slice(), ["sales".to_string()]);
    }
}
