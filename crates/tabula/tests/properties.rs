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

use proptest::prelude::*;
use tabula::{
    aggregate_chart_data, apply_filters, cell, pearson_correlation, row, AggregateFunction,
    Dataset, Filter, FilterOperator, Row,
};

fn keyed_rows() -> impl Strategy<Value = Vec<(u8, i32)>> {
    prop::collection::vec((0u8..5, -1000i32..1000), 0..60)
}

fn to_dataset(rows: &[(u8, i32)]) -> Dataset {
    Dataset::new(
        vec!["k".to_string(), "v".to_string()],
        rows.iter()
            .map(|(k, v)| -> Row { row! {"k" => format!("k{k}"), "v" => *v} })
            .collect(),
    )
}

proptest! {
    #[test]
    fn sum_mode_preserves_total(rows in keyed_rows()) {
        let ds = to_dataset(&rows);
        let total: f64 = rows.iter().map(|(_, v)| f64::from(*v)).sum();
        let records = aggregate_chart_data(&ds, "k", &["v"], Some(AggregateFunction::Sum)).unwrap();
        let grouped: f64 = records.iter().filter_map(|r| cell(r, "v").as_number()).sum();
        prop_assert!((total - grouped).abs() < 1e-6);
    }

    #[test]
    fn count_mode_covers_every_row(rows in keyed_rows()) {
        let ds = to_dataset(&rows);
        let records = aggregate_chart_data(&ds, "k", &["v"], Some(AggregateFunction::Count)).unwrap();
        let counted: f64 = records.iter().filter_map(|r| cell(r, "v").as_number()).sum();
        prop_assert_eq!(counted as usize, rows.len());
    }

    #[test]
    fn pearson_is_symmetric_and_bounded(pairs in prop::collection::vec((-1e3f64..1e3, -1e3f64..1e3), 0..40)) {
        let swapped: Vec<(f64, f64)> = pairs.iter().map(|&(a, b)| (b, a)).collect();
        let r = pearson_correlation(&pairs);
        prop_assert!((r - pearson_correlation(&swapped)).abs() < 1e-9);
        prop_assert!((-1.0..=1.0).contains(&r));
    }

    #[test]
    fn self_correlation_is_one(values in prop::collection::vec(-1e3f64..1e3, 2..40)) {
        let spread = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
            - values.iter().cloned().fold(f64::INFINITY, f64::min);
        prop_assume!(spread > 1.0);
        let pairs: Vec<(f64, f64)> = values.iter().map(|&v| (v, v)).collect();
        prop_assert!((pearson_correlation(&pairs) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn constant_side_gives_zero(
        c in prop::num::f64::NORMAL | prop::num::f64::SUBNORMAL | prop::num::f64::ZERO,
        others in prop::collection::vec(-1e6f64..1e6, 1..40),
        constant_first in any::<bool>(),
    ) {
        let pairs: Vec<(f64, f64)> = others
            .iter()
            .map(|&v| if constant_first { (c, v) } else { (v, c) })
            .collect();
        prop_assert_eq!(pearson_correlation(&pairs), 0.0);
    }

    #[test]
    fn filters_are_identity_when_empty_and_idempotent(rows in keyed_rows(), key in 0u8..5) {
        let ds = to_dataset(&rows);
        prop_assert_eq!(apply_filters(&ds, &[]).unwrap(), ds.clone());
        let eq = [Filter::new("k", FilterOperator::Equals, format!("k{key}"))];
        let once = apply_filters(&ds, &eq).unwrap();
        let twice = apply_filters(&once, &eq).unwrap();
        prop_assert_eq!(once, twice);
    }
}
