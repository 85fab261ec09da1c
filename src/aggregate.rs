use crate::dates::within_timeframe;
use crate::models::{Aggregation, MetricConfig, Row, PLACEHOLDER};
use crate::values::{format_with_affixes, is_blank, stringify, to_number};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Reduces a row set to one scalar. `count` and `count_distinct` always
/// produce a value; the numeric reducers return `None` when no row carries a
/// numeric `column` value.
pub fn aggregate(rows: &[&Row], aggregation: Aggregation, column: &str) -> Option<f64> {
    match aggregation {
        Aggregation::Count => Some(rows.len() as f64),
        Aggregation::CountDistinct => {
            let distinct = rows
                .iter()
                .filter_map(|row| {
                    let cell = row.get(column);
                    if is_blank(cell) {
                        return None;
                    }
                    cell.map(stringify)
                })
                .collect::<BTreeSet<_>>();
            Some(distinct.len() as f64)
        }
        Aggregation::Sum => reduce_numeric(rows, column, |numbers| numbers.iter().sum()),
        Aggregation::Average => reduce_numeric(rows, column, |numbers| {
            numbers.iter().sum::<f64>() / numbers.len() as f64
        }),
        Aggregation::Min => reduce_numeric(rows, column, |numbers| {
            numbers.iter().copied().fold(f64::INFINITY, f64::min)
        }),
        Aggregation::Max => reduce_numeric(rows, column, |numbers| {
            numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        }),
    }
}

fn reduce_numeric(rows: &[&Row], column: &str, reducer: impl FnOnce(&[f64]) -> f64) -> Option<f64> {
    let numbers = rows
        .iter()
        .filter_map(|row| row.get(column).and_then(to_number))
        .collect::<Vec<_>>();
    if numbers.is_empty() {
        return None;
    }
    let value = reducer(&numbers);
    value.is_finite().then_some(value)
}

/// Metric value over already-filtered rows, after the config's timeframe.
pub fn compute_metric(rows: &[Row], config: &MetricConfig, now: DateTime<Utc>) -> Option<f64> {
    let window = within_timeframe(rows, config.date_column.as_deref(), config.timeframe, now);
    aggregate(&window, config.aggregation, &config.column)
}

pub fn format_metric(value: Option<f64>, config: &MetricConfig) -> String {
    match value {
        Some(value) => format_with_affixes(value, config.prefix.as_deref(), config.suffix.as_deref()),
        None => PLACEHOLDER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Timeframe;
    use chrono::Duration;
    use serde_json::json;

    fn rows(values: Vec<serde_json::Value>) -> Vec<Row> {
        values
            .into_iter()
            .filter_map(|value| value.as_object().cloned())
            .collect()
    }

    #[test]
    fn count_ignores_column_and_counts_rows() {
        let rows = rows(vec![json!({ "a": 1 }), json!({}), json!({ "a": null })]);
        let refs = rows.iter().collect::<Vec<_>>();
        assert_eq!(aggregate(&refs, Aggregation::Count, "whatever"), Some(3.0));
        assert_eq!(aggregate(&[], Aggregation::Count, "a"), Some(0.0));
    }

    #[test]
    fn numeric_reducers_skip_non_numeric_rows() {
        let rows = rows(vec![
            json!({ "v": 10 }),
            json!({ "v": "20.5" }),
            json!({ "v": "oops" }),
            json!({ "v": null }),
            json!({ "v": -4 }),
        ]);
        let refs = rows.iter().collect::<Vec<_>>();
        assert_eq!(aggregate(&refs, Aggregation::Sum, "v"), Some(26.5));
        assert_eq!(aggregate(&refs, Aggregation::Min, "v"), Some(-4.0));
        assert_eq!(aggregate(&refs, Aggregation::Max, "v"), Some(20.5));
        let average = aggregate(&refs, Aggregation::Average, "v").expect("average");
        assert!((average - 26.5 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_numeric_set_has_no_value() {
        let rows = rows(vec![json!({ "v": "n/a" })]);
        let refs = rows.iter().collect::<Vec<_>>();
        assert_eq!(aggregate(&refs, Aggregation::Sum, "v"), None);
        assert_eq!(aggregate(&[], Aggregation::Sum, "v"), None);
        assert_eq!(aggregate(&[], Aggregation::Average, "v"), None);
        let config = MetricConfig::new("t", Aggregation::Sum, "v");
        assert_eq!(format_metric(None, &config), PLACEHOLDER);
    }

    #[test]
    fn distinct_counts_stringified_values() {
        let rows = rows(vec![
            json!({ "c": "a" }),
            json!({ "c": "a" }),
            json!({ "c": 1 }),
            json!({ "c": "1" }),
            json!({ "c": "" }),
            json!({}),
        ]);
        let refs = rows.iter().collect::<Vec<_>>();
        assert_eq!(aggregate(&refs, Aggregation::CountDistinct, "c"), Some(2.0));
    }

    #[test]
    fn metric_respects_timeframe() {
        let now = Utc::now();
        let recent = (now - Duration::days(2)).to_rfc3339();
        let old = (now - Duration::days(40)).to_rfc3339();
        let rows = rows(vec![
            json!({ "total": 10, "date": recent }),
            json!({ "total": 99, "date": old }),
            json!({ "total": 5, "date": "not a date" }),
        ]);
        let mut config = MetricConfig::new("orders", Aggregation::Sum, "total");
        config.date_column = Some("date".to_string());
        config.timeframe = Some(Timeframe::Last7Days);
        config.prefix = Some("$".to_string());
        let value = compute_metric(&rows, &config, now);
        assert_eq!(value, Some(10.0));
        assert_eq!(format_metric(value, &config), "$10");

        config.timeframe = Some(Timeframe::All);
        assert_eq!(compute_metric(&rows, &config, now), Some(114.0));
    }
}
