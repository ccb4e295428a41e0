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

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "tabula-demo",
    version,
    about = "Profile, aggregate, filter, segment and correlate a JSON array of records"
)]
pub struct Args {
    #[arg(long = "input", short = 'i', help = "Path to a JSON file holding an array of objects")]
    pub input: PathBuf,
    #[arg(long = "config", help = "Optional TOML engine configuration")]
    pub config: Option<PathBuf>,
    #[arg(long = "debug", default_value_t = false)]
    pub debug: bool,
    #[arg(
        long = "json-logs",
        default_value_t = false,
        help = "Emit log lines as JSON instead of plain text"
    )]
    pub json_logs: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Infer column types and print the profile.
    Analyze {
        #[arg(long = "summary", default_value_t = false, help = "Print only the one-line summary")]
        summary: bool,
    },
    /// Group by an x column and reduce one or more y columns.
    Aggregate {
        #[arg(long = "x")]
        x: String,
        #[arg(long = "y", required = true, num_args = 1..)]
        y: Vec<String>,
        #[arg(long = "agg", help = "sum, average, count, min, max, median or distinct_count")]
        aggregation: Option<String>,
    },
    /// Reduce one column to a single number.
    Metric {
        #[arg(long = "column")]
        column: String,
        #[arg(long = "calc", default_value = "sum")]
        calculation: String,
    },
    /// Keep rows matching every filter in a JSON array.
    Filter {
        #[arg(long = "filters", help = "JSON array of filter objects, inline or @path")]
        filters: String,
    },
    /// Add derived segment columns from a JSON array of definitions.
    Segment {
        #[arg(long = "definitions", help = "JSON array of segment definitions, inline or @path")]
        definitions: String,
        #[arg(long = "seed")]
        seed: Option<u64>,
    },
    /// Pearson coefficients between numeric columns.
    Correlate {
        #[arg(long = "columns", value_delimiter = ',')]
        columns: Vec<String>,
        #[arg(long = "top", default_value_t = 10)]
        top: usize,
    },
}
