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

mod args;

use anyhow::{Context, Result};
use args::{Args, Command};
use clap::Parser;
use serde::de::DeserializeOwned;
use std::path::Path;
use tabula::{
    strongest_correlations, AggregateFunction, AnalyticsEngine, AnalyticsError, ChartSpec,
    Dataset, EngineConfig, ErrorReporter, Filter, SegmentDefinition,
};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(&args);
    if let Err(err) = run(args) {
        match err.downcast_ref::<AnalyticsError>() {
            Some(analytics) => eprintln!("{}", ErrorReporter::new().report(analytics)),
            None => eprintln!("Error: {err:#}"),
        }
        std::process::exit(1);
    }
}

fn init_logging(args: &Args) {
    let max_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(max_level.as_str().to_lowercase()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if args.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::from_toml_file(path).map_err(AnalyticsError::from)?,
        None => EngineConfig::default(),
    };
    Ok(config.with_env_overrides().map_err(AnalyticsError::from)?)
}

/// Accepts inline JSON or `@path` pointing at a JSON file.
fn parse_json_arg<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let text = match raw.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?
        }
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("parsing JSON argument")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let engine = AnalyticsEngine::from_config(config)?;
    let raw = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    let dataset = Dataset::from_json_str(&raw)?;
    info!(
        rows = dataset.row_count(),
        columns = dataset.column_count(),
        "loaded dataset"
    );

    match args.command {
        Command::Analyze { summary } => {
            let analysis = engine.analyze(&dataset)?;
            if summary {
                println!("{}", analysis.summary());
            } else {
                println!("{}", analysis.export_json()?);
            }
        }
        Command::Aggregate { x, y, aggregation } => {
            let aggregation = aggregation
                .map(|name| name.parse::<AggregateFunction>())
                .transpose()
                .map_err(AnalyticsError::from)?;
            let spec = ChartSpec {
                x,
                y: y.into(),
                aggregation,
            };
            print_json(&engine.aggregate(&dataset, &spec)?)?;
        }
        Command::Metric {
            column,
            calculation,
        } => {
            let calculation: AggregateFunction =
                calculation.parse().map_err(AnalyticsError::from)?;
            let value = engine.calculate_metric(&dataset, &column, calculation)?;
            print_json(&serde_json::json!({ "column": column, "calculation": calculation, "value": value }))?;
        }
        Command::Filter { filters } => {
            let filters: Vec<Filter> = parse_json_arg(&filters)?;
            let kept = engine.filter(&dataset, &filters)?;
            info!(kept = kept.row_count(), "filtered");
            print_json(&kept.rows)?;
        }
        Command::Segment { definitions, seed } => {
            let definitions: Vec<SegmentDefinition> = parse_json_arg(&definitions)?;
            let segmented = match seed {
                Some(seed) => {
                    let (segmented, reports) = engine.segment_seeded(&dataset, &definitions, seed)?;
                    for report in &reports {
                        info!(segment = %report.name, groups = ?report.label_counts, "segment report");
                    }
                    segmented
                }
                None => engine.segment(&dataset, &definitions)?,
            };
            print_json(&segmented.rows)?;
        }
        Command::Correlate { columns, top } => {
            let entries = if columns.is_empty() {
                engine.correlation_matrix(&dataset, None)?
            } else {
                engine.correlation_matrix(&dataset, Some(&columns))?
            };
            print_json(&strongest_correlations(entries, top))?;
        }
    }
    Ok(())
}
