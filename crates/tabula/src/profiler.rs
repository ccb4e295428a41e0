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
use crate::config::EngineConfig;
use crate::dataset::{cell, Row};
use crate::error::Result;
use crate::inference::{ColumnType, TypeInferencer};
use crate::value::Value;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: ColumnType,
    pub sample_values: Vec<Value>,
    pub unique_count: usize,
    pub null_count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DatasetAnalysis {
    pub columns: Vec<ColumnInfo>,
    pub row_count: usize,
    pub numeric_columns: Vec<String>,
    pub text_columns: Vec<String>,
    pub date_columns: Vec<String>,
    pub boolean_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub row_count: usize,
    pub column_count: usize,
    pub numeric_count: usize,
    pub text_count: usize,
    pub date_count: usize,
    pub boolean_count: usize,
    pub completeness: f64,
}

pub struct ColumnProfiler {
    config: EngineConfig,
    inferencer: TypeInferencer,
}

impl ColumnProfiler {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let inferencer = TypeInferencer::from_config(&config);
        Self { config, inferencer }
    }

    /// Profiles every named column. Columns are independent, so wide datasets
    /// are profiled in parallel.
    #[instrument(level = "debug", skip(self, rows, columns, cancel), fields(rows = rows.len(), columns = columns.len()))]
    pub fn profile(
        &self,
        rows: &[Row],
        columns: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<ColumnInfo>> {
        if columns.len() >= self.config.parallel_threshold {
            columns
                .par_iter()
                .map(|name| {
                    cancel.check("profile")?;
                    Ok(self.profile_column(rows, name))
                })
                .collect()
        } else {
            columns
                .iter()
                .map(|name| {
                    cancel.check("profile")?;
                    Ok(self.profile_column(rows, name))
                })
                .collect()
        }
    }

    pub fn profile_column(&self, rows: &[Row], name: &str) -> ColumnInfo {
        let present: Vec<&Value> = rows
            .iter()
            .map(|row| cell(row, name))
            .filter(|v| !v.is_null())
            .collect();
        let column_type = self.inferencer.infer(present.iter().copied());
        let unique_count = present
            .iter()
            .map(|v| v.to_string())
            .collect::<HashSet<_>>()
            .len();
        let sample_values = present
            .iter()
            .take(self.config.max_sample_values)
            .map(|v| (*v).clone())
            .collect();
        let (min, max, mean) = if column_type == ColumnType::Numeric {
            numeric_summary(present.iter().filter_map(|v| v.as_number()))
        } else {
            (None, None, None)
        };
        debug!(column = name, %column_type, unique_count, "profiled column");
        ColumnInfo {
            name: name.to_string(),
            column_type,
            sample_values,
            unique_count,
            null_count: rows.len() - present.len(),
            min,
            max,
            mean,
        }
    }

    #[instrument(level = "debug", skip_all, fields(rows = rows.len()))]
    pub fn analyze(
        &self,
        rows: &[Row],
        columns: &[String],
        cancel: &CancelToken,
    ) -> Result<DatasetAnalysis> {
        if rows.is_empty() {
            return Ok(DatasetAnalysis::default());
        }
        let infos = self.profile(rows, columns, cancel)?;
        Ok(DatasetAnalysis::from_columns(infos, rows.len()))
    }
}

impl Default for ColumnProfiler {
    fn default() -> Self {
        Self::new()
    }
}

fn numeric_summary<I>(values: I) -> (Option<f64>, Option<f64>, Option<f64>)
where
    I: Iterator<Item = f64>,
{
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        count += 1;
        sum += v;
        min = min.min(v);
        max = max.max(v);
    }
    if count == 0 {
        (None, None, None)
    } else {
        (Some(min), Some(max), Some(sum / count as f64))
    }
}

impl DatasetAnalysis {
    pub fn from_columns(columns: Vec<ColumnInfo>, row_count: usize) -> Self {
        let names_of = |kind: ColumnType| -> Vec<String> {
            columns
                .iter()
                .filter(|c| c.column_type == kind)
                .map(|c| c.name.clone())
                .collect()
        };
        let numeric_columns = names_of(ColumnType::Numeric);
        let text_columns = names_of(ColumnType::Text);
        let date_columns = names_of(ColumnType::Date);
        let boolean_columns = names_of(ColumnType::Boolean);
        Self {
            columns,
            row_count,
            numeric_columns,
            text_columns,
            date_columns,
            boolean_columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn summary(&self) -> AnalysisSummary {
        let cells = self.row_count * self.columns.len();
        let nulls: usize = self.columns.iter().map(|c| c.null_count).sum();
        let completeness = if cells > 0 {
            1.0 - nulls as f64 / cells as f64
        } else {
            0.0
        };
        AnalysisSummary {
            row_count: self.row_count,
            column_count: self.columns.len(),
            numeric_count: self.numeric_columns.len(),
            text_count: self.text_columns.len(),
            date_count: self.date_columns.len(),
            boolean_count: self.boolean_columns.len(),
            completeness,
        }
    }

    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl std::fmt::Display for AnalysisSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Dataset: {} rows x {} columns ({} numeric, {} text, {} date, {} boolean), completeness: {:.2}",
            self.row_count,
            self.column_count,
            self.numeric_count,
            self.text_count,
            self.date_count,
            self.boolean_count,
            self.completeness
        )
    }
}

pub fn analyze_dataset(rows: &[Row], columns: &[String]) -> Result<DatasetAnalysis> {
    ColumnProfiler::new().analyze(rows, columns, &CancelToken::new())
}
