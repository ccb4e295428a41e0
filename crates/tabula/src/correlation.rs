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

use crate::dataset::{cell, Dataset};
use crate::error::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Rows where both columns read as finite numbers, in row order.
pub fn build_numeric_pairs(dataset: &Dataset, a: &str, b: &str) -> Result<Vec<(f64, f64)>> {
    dataset.require_column(a)?;
    dataset.require_column(b)?;
    Ok(dataset
        .rows
        .iter()
        .filter_map(|row| Some((cell(row, a).as_number()?, cell(row, b).as_number()?)))
        .collect())
}

/// Pearson's r from running sums. An empty input or a constant side has no
/// defined correlation and yields 0.
pub fn pearson_correlation(pairs: &[(f64, f64)]) -> f64 {
    let Some(&(first_a, first_b)) = pairs.first() else {
        return 0.0;
    };
    // Checked exactly: the running sums leave rounding residue for constants
    // like 0.1 that a spread test would read as variance.
    if pairs.iter().all(|&(a, _)| a == first_a) || pairs.iter().all(|&(_, b)| b == first_b) {
        return 0.0;
    }
    let n = pairs.len() as f64;
    let (mut sum_a, mut sum_b, mut sum_ab, mut sum_a2, mut sum_b2) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for &(a, b) in pairs {
        sum_a += a;
        sum_b += b;
        sum_ab += a * b;
        sum_a2 += a * a;
        sum_b2 += b * b;
    }
    let spread_a = n * sum_a2 - sum_a * sum_a;
    let spread_b = n * sum_b2 - sum_b * sum_b;
    if spread_a <= 0.0 || spread_b <= 0.0 {
        return 0.0;
    }
    let r = (n * sum_ab - sum_a * sum_b) / (spread_a * spread_b).sqrt();
    r.clamp(-1.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub column_a: String,
    pub column_b: String,
    pub coefficient: f64,
    pub sample_size: usize,
}

/// Coefficients for every unordered pair of `columns`.
pub fn correlation_matrix(dataset: &Dataset, columns: &[String]) -> Result<Vec<CorrelationEntry>> {
    for column in columns {
        dataset.require_column(column)?;
    }
    let pairs: Vec<(usize, usize)> = (0..columns.len())
        .flat_map(|i| (i + 1..columns.len()).map(move |j| (i, j)))
        .collect();
    pairs
        .par_iter()
        .map(|&(i, j)| {
            let aligned = build_numeric_pairs(dataset, &columns[i], &columns[j])?;
            Ok(CorrelationEntry {
                column_a: columns[i].clone(),
                column_b: columns[j].clone(),
                coefficient: pearson_correlation(&aligned),
                sample_size: aligned.len(),
            })
        })
        .collect()
}

/// Matrix entries ordered by descending absolute coefficient.
pub fn strongest_correlations(mut entries: Vec<CorrelationEntry>, limit: usize) -> Vec<CorrelationEntry> {
    entries.sort_by(|a, b| b.coefficient.abs().total_cmp(&a.coefficient.abs()));
    entries.truncate(limit);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::value::Value;

    fn dataset() -> Dataset {
        Dataset::from_rows(vec![
            row! {"a" => 1.0, "b" => 2.0, "c" => 5.0, "k" => 7.0},
            row! {"a" => 2.0, "b" => 4.0, "c" => 3.0, "k" => 7.0},
            row! {"a" => "3", "b" => 6.0, "c" => 1.0, "k" => 7.0},
            row! {"a" => "x", "b" => 8.0, "c" => Value::Null, "k" => 7.0},
        ])
    }

    #[test]
    fn pairs_skip_non_numeric_rows() {
        let pairs = build_numeric_pairs(&dataset(), "a", "b").unwrap();
        assert_eq!(pairs, vec![(1.0, 2.0), (2.0, 4.0), (3.0, 6.0)]);
        assert!(build_numeric_pairs(&dataset(), "a", "missing").is_err());
    }

    #[test]
    fn perfect_positive_and_negative() {
        let ds = dataset();
        let ab = pearson_correlation(&build_numeric_pairs(&ds, "a", "b").unwrap());
        let ac = pearson_correlation(&build_numeric_pairs(&ds, "a", "c").unwrap());
        assert!((ab - 1.0).abs() < 1e-12);
        assert!((ac + 1.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_inputs_give_zero() {
        assert_eq!(pearson_correlation(&[]), 0.0);
        let ds = dataset();
        let constant = build_numeric_pairs(&ds, "b", "k").unwrap();
        assert_eq!(pearson_correlation(&constant), 0.0);
        assert_eq!(pearson_correlation(&[(3.0, 3.0), (3.0, 3.0)]), 0.0);
    }

    #[test]
    fn fractional_constants_give_zero() {
        assert_eq!(pearson_correlation(&[(0.1, 1.1); 10]), 0.0);
        let ramp: Vec<(f64, f64)> = (0..10).map(|i| (1.1, f64::from(i))).collect();
        assert_eq!(pearson_correlation(&ramp), 0.0);
        let flipped: Vec<(f64, f64)> = ramp.iter().map(|&(a, b)| (b, a)).collect();
        assert_eq!(pearson_correlation(&flipped), 0.0);
    }

    #[test]
    fn matrix_covers_each_pair_once() {
        let columns: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let matrix = correlation_matrix(&dataset(), &columns).unwrap();
        assert_eq!(matrix.len(), 3);
        assert_eq!(matrix[0].column_a, "a");
        assert_eq!(matrix[0].column_b, "b");
        assert_eq!(matrix[0].sample_size, 3);
        let top = strongest_correlations(matrix, 1);
        assert_eq!(top.len(), 1);
        assert!((top[0].coefficient.abs() - 1.0).abs() < 1e-12);
    }
}
