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

//! Tabular analytics over loosely typed records: type inference, column
//! profiling, chart aggregation, correlation, filtering and segmentation.

pub mod aggregate;
pub mod cancel;
pub mod config;
pub mod correlation;
pub mod dataset;
pub mod error;
pub mod expression;
pub mod filter;
pub mod inference;
pub mod profiler;
pub mod segmentation;
pub mod value;

pub use aggregate::{aggregate_chart_data, calculate_metric, AggregateFunction, Aggregator, ChartSpec, Record, YColumns};
pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use correlation::{build_numeric_pairs, correlation_matrix, pearson_correlation, strongest_correlations, CorrelationEntry};
pub use dataset::{cell, Dataset, Row};
pub use error::{
    AnalyticsError, ConfigError, DataError, ErrorReporter, ErrorSeverity, ExpressionError, Result,
    SerialisationError, SpecError,
};
pub use expression::Expr;
pub use filter::{apply_filters, Filter, FilterEngine, FilterOperator};
pub use inference::{infer_column_type, ColumnType, TypeInferencer};
pub use profiler::{analyze_dataset, AnalysisSummary, ColumnInfo, ColumnProfiler, DatasetAnalysis};
pub use segmentation::{
    apply_segmentation, ClusteringReport, KMeans, SegmentDefinition, SegmentMethod, SegmentReport,
    SegmentRule, SegmentationEngine,
};
pub use value::Value;

use tracing::{info, instrument};

/// One configuration and one cancel token shared by every operation.
pub struct AnalyticsEngine {
    config: EngineConfig,
    cancel: CancelToken,
}

impl AnalyticsEngine {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn from_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn infer_column_type(&self, values: &[Value]) -> ColumnType {
        TypeInferencer::from_config(&self.config).infer(values.iter())
    }

    #[instrument(level = "info", skip_all, fields(rows = dataset.row_count(), columns = dataset.column_count()))]
    pub fn analyze(&self, dataset: &Dataset) -> Result<DatasetAnalysis> {
        let analysis = ColumnProfiler::with_config(self.config.clone()).analyze(
            &dataset.rows,
            &dataset.columns,
            &self.cancel,
        )?;
        info!(summary = %analysis.summary(), "dataset analysed");
        Ok(analysis)
    }

    pub fn calculate_metric(
        &self,
        dataset: &Dataset,
        column: &str,
        calculation: AggregateFunction,
    ) -> Result<f64> {
        self.cancel.check("metric")?;
        calculate_metric(dataset, column, calculation)
    }

    pub fn aggregate(&self, dataset: &Dataset, spec: &ChartSpec) -> Result<Vec<Record>> {
        Aggregator::with_cancel(self.cancel.clone()).aggregate(dataset, spec)
    }

    pub fn correlate(&self, dataset: &Dataset, a: &str, b: &str) -> Result<f64> {
        Ok(pearson_correlation(&build_numeric_pairs(dataset, a, b)?))
    }

    /// Pairwise coefficients for `columns`, or for every numeric column the
    /// profiler finds when none are given.
    pub fn correlation_matrix(
        &self,
        dataset: &Dataset,
        columns: Option<&[String]>,
    ) -> Result<Vec<CorrelationEntry>> {
        match columns {
            Some(columns) => correlation_matrix(dataset, columns),
            None => {
                let analysis = self.analyze(dataset)?;
                correlation_matrix(dataset, &analysis.numeric_columns)
            }
        }
    }

    pub fn filter(&self, dataset: &Dataset, filters: &[Filter]) -> Result<Dataset> {
        FilterEngine::new()
            .with_cancel(self.cancel.clone())
            .apply(dataset, filters)
    }

    pub fn segment(&self, dataset: &Dataset, definitions: &[SegmentDefinition]) -> Result<Dataset> {
        self.segmentation().apply(dataset, definitions)
    }

    /// Segments with an explicit seed, returning per-definition diagnostics.
    pub fn segment_seeded(
        &self,
        dataset: &Dataset,
        definitions: &[SegmentDefinition],
        seed: u64,
    ) -> Result<(Dataset, Vec<SegmentReport>)> {
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        self.segmentation().apply_with_rng(dataset, definitions, &mut rng)
    }

    fn segmentation(&self) -> SegmentationEngine {
        SegmentationEngine::with_config(self.config.clone()).with_cancel(self.cancel.clone())
    }
}

impl Default for AnalyticsEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    fn sales() -> Dataset {
        Dataset::from_rows(vec![
            row! {"region" => "East", "sales" => 100.0, "cost" => 40.0},
            row! {"region" => "West", "sales" => 50.0, "cost" => 20.0},
            row! {"region" => "East", "sales" => 200.0, "cost" => 80.0},
        ])
    }

    #[test]
    fn facade_runs_each_operation() {
        let engine = AnalyticsEngine::new();
        let ds = sales();
        let analysis = engine.analyze(&ds).unwrap();
        assert_eq!(analysis.numeric_columns, vec!["sales", "cost"]);
        assert_eq!(
            engine.calculate_metric(&ds, "sales", AggregateFunction::Sum).unwrap(),
            350.0
        );
        let records = engine
            .aggregate(&ds, &ChartSpec::new("region", &["sales"], Some(AggregateFunction::Sum)))
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!((engine.correlate(&ds, "sales", "cost").unwrap() - 1.0).abs() < 1e-12);
        let matrix = engine.correlation_matrix(&ds, None).unwrap();
        assert_eq!(matrix.len(), 1);
        let east = engine
            .filter(&ds, &[Filter::new("region", FilterOperator::Equals, "East")])
            .unwrap();
        assert_eq!(east.row_count(), 2);
        let (segmented, reports) = engine
            .segment_seeded(&ds, &[SegmentDefinition::kmeans("spend", &["sales"], 2)], 9)
            .unwrap();
        assert!(segmented.has_column("spend_cluster"));
        assert_eq!(reports.len(), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            type_confidence_threshold: 0.0,
            ..EngineConfig::default()
        };
        assert!(AnalyticsEngine::from_config(config).is_err());
    }

    #[test]
    fn tripped_token_cancels_analysis() {
        let token = CancelToken::new();
        let engine = AnalyticsEngine::new().with_cancel(token.clone());
        token.cancel();
        let err = engine.analyze(&sales()).unwrap_err();
        assert_eq!(err.category(), "cancelled");
    }
}
