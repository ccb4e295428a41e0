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

use thiserror::Error;
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),
    #[error("Invalid request: {0}")]
    Spec(#[from] SpecError),
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Serialisation error: {0}")]
    Serialisation(#[from] SerialisationError),
    #[error("Operation cancelled during {stage}")]
    Cancelled { stage: String },
}
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Column '{column}' not found in dataset")]
    InvalidColumnReference { column: String },
    #[error("Dataset records must be JSON objects, found {found} at row {row}")]
    InvalidRecord { row: usize, found: String },
    #[error("Dataset payload must be a JSON array of objects")]
    NotAnArray,
}
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("Segment definition has an empty name")]
    EmptySegmentName,
    #[error("Segment '{segment}' requests {clusters} clusters; at least one is required")]
    InvalidClusterCount { segment: String, clusters: usize },
    #[error("Segment '{segment}' uses a centroid method but declares no columns")]
    MissingFeatureColumns { segment: String },
    #[error("Chart specification needs at least one y column")]
    MissingYColumns,
    #[error("Unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },
}
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("Unterminated string literal starting at offset {offset}")]
    UnterminatedString { offset: usize },
    #[error("Unexpected token '{token}'")]
    UnexpectedToken { token: String },
    #[error("Unexpected end of expression")]
    UnexpectedEnd,
    #[error("Unknown identifier '{name}'")]
    UnknownIdentifier { name: String },
    #[error("Empty condition")]
    Empty,
}
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {field} = {value}")]
    InvalidValue { field: String, value: String },
    #[error("Missing required configuration: {field}")]
    MissingRequired { field: String },
    #[error("Failed to read configuration file '{path}': {source}")]
    FileError {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML configuration: {source}")]
    TomlParseError {
        #[from]
        source: toml::de::Error,
    },
}
#[derive(Error, Debug)]
pub enum SerialisationError {
    #[error("JSON serialisation failed: {source}")]
    JsonSerialisationError {
        #[from]
        source: serde_json::Error,
    },
}
pub type Result<T> = std::result::Result<T, AnalyticsError>;
pub type ExpressionResult<T> = std::result::Result<T, ExpressionError>;

impl From<serde_json::Error> for AnalyticsError {
    fn from(err: serde_json::Error) -> Self {
        AnalyticsError::Serialisation(SerialisationError::JsonSerialisationError { source: err })
    }
}

impl AnalyticsError {
    pub fn missing_column(column: &str) -> Self {
        AnalyticsError::Data(DataError::InvalidColumnReference {
            column: column.to_string(),
        })
    }
    pub fn cancelled(stage: &str) -> Self {
        AnalyticsError::Cancelled {
            stage: stage.to_string(),
        }
    }
    /// Cancellation is the only failure a caller can retry without changing the request.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AnalyticsError::Cancelled { .. })
    }
    pub fn category(&self) -> &'static str {
        match self {
            AnalyticsError::Data(_) => "data",
            AnalyticsError::Spec(_) => "request",
            AnalyticsError::Expression(_) => "expression",
            AnalyticsError::Config(_) => "configuration",
            AnalyticsError::Serialisation(_) => "serialisation",
            AnalyticsError::Cancelled { .. } => "cancelled",
        }
    }
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            AnalyticsError::Data(DataError::InvalidColumnReference { column }) => vec![
                format!("Check the spelling of '{column}'"),
                "Run an analysis first to list the available columns".to_string(),
            ],
            AnalyticsError::Spec(SpecError::InvalidClusterCount { .. }) => {
                vec!["Request at least one cluster".to_string()]
            }
            AnalyticsError::Config(_) => {
                vec!["Review the configuration file and TABULA_* variables".to_string()]
            }
            AnalyticsError::Cancelled { .. } => {
                vec!["Retry with a longer deadline or a smaller dataset".to_string()]
            }
            _ => Vec::new(),
        }
    }
    pub fn user_message(&self) -> String {
        match self {
            AnalyticsError::Data(DataError::InvalidColumnReference { column }) => {
                format!("The column '{column}' does not exist in this dataset.")
            }
            AnalyticsError::Cancelled { .. } => {
                "The analysis was stopped before it finished.".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}
impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "LOW",
            ErrorSeverity::Medium => "MEDIUM",
            ErrorSeverity::High => "HIGH",
        }
    }
    pub fn of(error: &AnalyticsError) -> Self {
        match error {
            AnalyticsError::Cancelled { .. } => ErrorSeverity::Low,
            AnalyticsError::Expression(_) | AnalyticsError::Spec(_) => ErrorSeverity::Medium,
            _ => ErrorSeverity::High,
        }
    }
}

pub struct ErrorReporter {
    show_suggestions: bool,
}
impl ErrorReporter {
    pub fn new() -> Self {
        Self {
            show_suggestions: true,
        }
    }
    pub fn without_suggestions(mut self) -> Self {
        self.show_suggestions = false;
        self
    }
    pub fn report(&self, error: &AnalyticsError) -> String {
        let mut report = format!(
            "[{}] {} error: {}\n",
            ErrorSeverity::of(error).as_str(),
            error.category(),
            error.user_message()
        );
        if self.show_suggestions {
            for suggestion in error.suggestions() {
                report.push_str(&format!("  - {suggestion}\n"));
            }
        }
        report
    }
}
impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_column_is_a_data_error() {
        let err = AnalyticsError::missing_column("revenue");
        assert_eq!(err.category(), "data");
        assert!(!err.is_recoverable());
        assert!(err.user_message().contains("revenue"));
    }

    #[test]
    fn reporter_lists_suggestions() {
        let err = AnalyticsError::cancelled("kmeans");
        let report = ErrorReporter::new().report(&err);
        assert!(report.starts_with("[LOW] cancelled"));
        assert!(report.contains("Retry"));
        let bare = ErrorReporter::new().without_suggestions().report(&err);
        assert!(!bare.contains("Retry"));
    }
}
