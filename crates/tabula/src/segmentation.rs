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
use crate::dataset::{cell, Dataset, Row};
use crate::error::{Result, SpecError};
use crate::expression::Expr;
use crate::value::Value;
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_LABEL: &str = "Default";
const CENTROID_RANGE: std::ops::Range<f64> = 0.0..100.0;
const PARALLEL_ROWS: usize = 10000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentMethod {
    #[serde(alias = "centroid", alias = "k-means")]
    Kmeans,
    Hierarchical,
    #[serde(alias = "rule-based", alias = "rules", alias = "rule")]
    RuleBased,
}

impl SegmentMethod {
    /// Hierarchical segmentation runs the same centroid clustering and only
    /// differs in how labels are spelled.
    fn label_prefix(&self) -> &'static str {
        match self {
            SegmentMethod::Hierarchical => "Group",
            _ => "Cluster",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRule {
    pub condition: String,
    pub label: String,
}

fn default_clusters() -> usize {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentDefinition {
    pub name: String,
    pub method: SegmentMethod,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default = "default_clusters")]
    pub clusters: usize,
    #[serde(default)]
    pub rules: Vec<SegmentRule>,
    #[serde(default)]
    pub default_label: Option<String>,
}

impl SegmentDefinition {
    pub fn kmeans(name: &str, columns: &[&str], clusters: usize) -> Self {
        Self {
            name: name.to_string(),
            method: SegmentMethod::Kmeans,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            clusters,
            rules: Vec::new(),
            default_label: None,
        }
    }

    pub fn hierarchical(name: &str, columns: &[&str], clusters: usize) -> Self {
        Self {
            method: SegmentMethod::Hierarchical,
            ..Self::kmeans(name, columns, clusters)
        }
    }

    pub fn rule_based(name: &str, rules: &[(&str, &str)], default_label: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            method: SegmentMethod::RuleBased,
            columns: Vec::new(),
            clusters: 0,
            rules: rules
                .iter()
                .map(|(condition, label)| SegmentRule {
                    condition: condition.to_string(),
                    label: label.to_string(),
                })
                .collect(),
            default_label: default_label.map(String::from),
        }
    }

    pub fn output_column(&self) -> String {
        format!("{}_cluster", self.name)
    }

    pub fn validate(&self, dataset: &Dataset) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SpecError::EmptySegmentName.into());
        }
        match self.method {
            SegmentMethod::Kmeans | SegmentMethod::Hierarchical => {
                if self.columns.is_empty() {
                    return Err(SpecError::MissingFeatureColumns {
                        segment: self.name.clone(),
                    }
                    .into());
                }
                if self.clusters == 0 {
                    return Err(SpecError::InvalidClusterCount {
                        segment: self.name.clone(),
                        clusters: self.clusters,
                    }
                    .into());
                }
                for column in &self.columns {
                    dataset.require_column(column)?;
                }
            }
            SegmentMethod::RuleBased => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusteringReport {
    pub assignments: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub iterations: usize,
    pub converged: bool,
    pub inertia: f64,
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Index of the closest centroid; ties resolve to the lowest index.
fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (index, centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(point, centroid);
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }
    best
}

/// Lloyd's algorithm with centroids seeded uniformly in `[0, 100)` per
/// dimension. Clusters that lose all their points keep their last centroid.
#[derive(Debug, Clone)]
pub struct KMeans {
    k: usize,
    max_iterations: usize,
}

impl KMeans {
    pub fn new(k: usize, max_iterations: usize) -> Self {
        Self { k, max_iterations }
    }

    pub fn fit<R: Rng>(
        &self,
        points: &[Vec<f64>],
        rng: &mut R,
        cancel: &CancelToken,
    ) -> Result<ClusteringReport> {
        let dims = points.first().map_or(0, Vec::len);
        let mut centroids: Vec<Vec<f64>> = (0..self.k)
            .map(|_| (0..dims).map(|_| rng.gen_range(CENTROID_RANGE)).collect())
            .collect();
        let mut assignments = vec![usize::MAX; points.len()];
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            cancel.check("kmeans")?;
            iterations += 1;
            let next: Vec<usize> = if points.len() > PARALLEL_ROWS {
                points.par_iter().map(|p| nearest(p, &centroids)).collect()
            } else {
                points.iter().map(|p| nearest(p, &centroids)).collect()
            };
            if next == assignments {
                converged = true;
                break;
            }
            assignments = next;

            let mut sums = vec![vec![0.0; dims]; self.k];
            let mut counts = vec![0usize; self.k];
            for (point, &cluster) in points.iter().zip(&assignments) {
                counts[cluster] += 1;
                for (sum, value) in sums[cluster].iter_mut().zip(point) {
                    *sum += value;
                }
            }
            for ((centroid, sum), count) in centroids.iter_mut().zip(sums).zip(&counts) {
                if *count > 0 {
                    *centroid = sum.into_iter().map(|s| s / *count as f64).collect();
                }
            }
        }

        let inertia = points
            .iter()
            .zip(&assignments)
            .filter(|&(_, &c)| c < centroids.len())
            .map(|(p, &c)| squared_distance(p, &centroids[c]))
            .sum();
        debug!(k = self.k, iterations, converged, inertia, "k-means finished");
        Ok(ClusteringReport {
            assignments,
            centroids,
            iterations,
            converged,
            inertia,
        })
    }
}

/// Feature vector for one row; cells that are missing or non-numeric read as 0.
fn features(row: &Row, columns: &[String]) -> Vec<f64> {
    columns
        .iter()
        .map(|c| cell(row, c).as_number().unwrap_or(0.0))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentReport {
    pub name: String,
    pub column: String,
    pub method: SegmentMethod,
    pub label_counts: IndexMap<String, usize>,
    pub clustering: Option<ClusteringReport>,
    pub skipped_rules: Vec<String>,
}

pub struct SegmentationEngine {
    config: EngineConfig,
    cancel: CancelToken,
}

impl SegmentationEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Seeds from the configuration when a seed is set, from entropy otherwise.
    pub fn rng(&self) -> StdRng {
        match self.config.default_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    pub fn apply(&self, dataset: &Dataset, definitions: &[SegmentDefinition]) -> Result<Dataset> {
        let mut rng = self.rng();
        self.apply_with_rng(dataset, definitions, &mut rng)
            .map(|(labelled, _)| labelled)
    }

    /// Returns a copy of `dataset` with one `<name>_cluster` column per
    /// definition. Every definition is validated before any work starts.
    #[instrument(level = "info", skip_all, fields(rows = dataset.row_count(), definitions = definitions.len()))]
    pub fn apply_with_rng<R: Rng>(
        &self,
        dataset: &Dataset,
        definitions: &[SegmentDefinition],
        rng: &mut R,
    ) -> Result<(Dataset, Vec<SegmentReport>)> {
        for definition in definitions {
            definition.validate(dataset)?;
        }
        let mut labelled = dataset.clone();
        let mut reports = Vec::with_capacity(definitions.len());
        for definition in definitions {
            self.cancel.check("segmentation")?;
            let (labels, clustering, skipped_rules) = match definition.method {
                SegmentMethod::Kmeans | SegmentMethod::Hierarchical => {
                    let (labels, report) = self.cluster(dataset, definition, rng)?;
                    (labels, Some(report), Vec::new())
                }
                SegmentMethod::RuleBased => {
                    let (labels, skipped) = self.label_by_rules(dataset, definition)?;
                    (labels, None, skipped)
                }
            };
            let mut label_counts: IndexMap<String, usize> = IndexMap::new();
            for label in &labels {
                *label_counts.entry(label.clone()).or_default() += 1;
            }
            info!(segment = %definition.name, method = ?definition.method, groups = label_counts.len(), "segment applied");
            labelled.push_column(
                definition.output_column(),
                labels.into_iter().map(Value::Text).collect(),
            );
            reports.push(SegmentReport {
                name: definition.name.clone(),
                column: definition.output_column(),
                method: definition.method,
                label_counts,
                clustering,
                skipped_rules,
            });
        }
        Ok((labelled, reports))
    }

    fn cluster<R: Rng>(
        &self,
        dataset: &Dataset,
        definition: &SegmentDefinition,
        rng: &mut R,
    ) -> Result<(Vec<String>, ClusteringReport)> {
        let points: Vec<Vec<f64>> = dataset
            .rows
            .iter()
            .map(|row| features(row, &definition.columns))
            .collect();
        let report = KMeans::new(definition.clusters, self.config.kmeans_iterations())
            .fit(&points, rng, &self.cancel)?;
        let prefix = definition.method.label_prefix();
        let labels = report
            .assignments
            .iter()
            .map(|c| format!("{prefix} {}", c + 1))
            .collect();
        Ok((labels, report))
    }

    /// First matching rule wins. A condition that does not parse, or names a
    /// column the dataset lacks, never matches unless `strict_rules` is set,
    /// in which case it fails the whole request.
    fn label_by_rules(
        &self,
        dataset: &Dataset,
        definition: &SegmentDefinition,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let mut skipped = Vec::new();
        let mut compiled: Vec<(Expr, &str)> = Vec::with_capacity(definition.rules.len());
        for rule in &definition.rules {
            match Expr::compile(&rule.condition, &dataset.columns) {
                Ok(expr) => compiled.push((expr, rule.label.as_str())),
                Err(err) if self.config.strict_rules => return Err(err.into()),
                Err(err) => {
                    warn!(segment = %definition.name, condition = %rule.condition, error = %err, "rule condition rejected");
                    skipped.push(rule.condition.clone());
                }
            }
        }
        let fallback = definition.default_label.as_deref().unwrap_or(DEFAULT_LABEL);
        let mut labels = Vec::with_capacity(dataset.row_count());
        for (index, row) in dataset.rows.iter().enumerate() {
            if index % 4096 == 0 {
                self.cancel.check("rules")?;
            }
            let label = compiled
                .iter()
                .find(|(expr, _)| expr.evaluate(row))
                .map_or(fallback, |(_, label)| label);
            labels.push(label.to_string());
        }
        Ok((labels, skipped))
    }
}

impl Default for SegmentationEngine {
    fn default() -> Self {
        Self::new()
    }
}

pub fn apply_segmentation(
    dataset: &Dataset,
    definitions: &[SegmentDefinition],
    seed: Option<u64>,
) -> Result<Dataset> {
    let mut config = EngineConfig::default();
    config.default_seed = seed;
    SegmentationEngine::with_config(config).apply(dataset, definitions)
}
