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

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Upper bound on k-means rounds regardless of configuration.
pub const MAX_KMEANS_ITERATIONS: usize = 100;

const ENV_PREFIX: &str = "TABULA_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub type_confidence_threshold: f64,
    pub max_sample_values: usize,
    pub max_kmeans_iterations: usize,
    pub default_seed: Option<u64>,
    pub parallel_threshold: usize,
    pub date_formats: Vec<String>,
    /// Reject a rule-based segment whose condition fails to compile instead
    /// of letting that rule never match.
    pub strict_rules: bool,
}
impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            type_confidence_threshold: 0.8,
            max_sample_values: 5,
            max_kmeans_iterations: MAX_KMEANS_ITERATIONS,
            default_seed: None,
            parallel_threshold: 2,
            date_formats: vec![
                "%Y-%m-%d".to_string(),
                "%Y/%m/%d".to_string(),
                "%m/%d/%Y".to_string(),
                "%d/%m/%Y".to_string(),
                "%Y-%m-%dT%H:%M:%S".to_string(),
                "%Y-%m-%d %H:%M:%S".to_string(),
                "%b %d, %Y".to_string(),
                "%B %d, %Y".to_string(),
                "%d %b %Y".to_string(),
            ],
            strict_rules: false,
        }
    }
}

impl EngineConfig {
    pub fn for_large_datasets() -> Self {
        Self {
            max_sample_values: 3,
            parallel_threshold: 1,
            ..Default::default()
        }
    }
    pub fn for_fast_profiling() -> Self {
        Self {
            max_kmeans_iterations: 25,
            date_formats: vec!["%Y-%m-%d".to_string(), "%Y-%m-%d %H:%M:%S".to_string()],
            ..Default::default()
        }
    }
    pub fn for_strict_inference() -> Self {
        Self {
            type_confidence_threshold: 0.95,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.default_seed = Some(seed);
        self
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::FileError {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "loaded engine configuration");
        Self::from_toml_str(&raw)
    }

    /// Applies `TABULA_*` environment variables on top of the current values.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("TYPE_CONFIDENCE_THRESHOLD") {
            self.type_confidence_threshold = parse_field("type_confidence_threshold", &raw)?;
        }
        if let Some(raw) = lookup("MAX_SAMPLE_VALUES") {
            self.max_sample_values = parse_field("max_sample_values", &raw)?;
        }
        if let Some(raw) = lookup("MAX_KMEANS_ITERATIONS") {
            self.max_kmeans_iterations = parse_field("max_kmeans_iterations", &raw)?;
        }
        if let Some(raw) = lookup("SEED") {
            self.default_seed = Some(parse_field("default_seed", &raw)?);
        }
        if let Some(raw) = lookup("PARALLEL_THRESHOLD") {
            self.parallel_threshold = parse_field("parallel_threshold", &raw)?;
        }
        if let Some(raw) = lookup("STRICT_RULES") {
            self.strict_rules = parse_field("strict_rules", &raw)?;
        }
        if let Some(raw) = lookup("DATE_FORMATS") {
            self.date_formats = raw
                .split(';')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(String::from)
                .collect();
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.type_confidence_threshold > 0.0 && self.type_confidence_threshold <= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "type_confidence_threshold".to_string(),
                value: self.type_confidence_threshold.to_string(),
            });
        }
        if self.max_sample_values == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_sample_values".to_string(),
                value: "0".to_string(),
            });
        }
        if self.date_formats.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "date_formats".to_string(),
            });
        }
        Ok(())
    }

    /// Configured iteration budget, never above the hard cap.
    pub fn kmeans_iterations(&self) -> usize {
        self.max_kmeans_iterations.min(MAX_KMEANS_ITERATIONS)
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: raw.to_string(),
    })
}
