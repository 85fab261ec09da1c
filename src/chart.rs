use crate::aggregate::aggregate;
use crate::dates::{looks_like_date, parse_date, parse_date_str, period_label, truncate, within_timeframe};
use crate::models::{Aggregation, ChartConfig, ChartSortBy, DateTruncate, Row};
use crate::sort::natural_cmp;
use crate::values::{is_blank, stringify};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

pub const DEFAULT_MAX_BARS: usize = 20;
pub const EMPTY_CATEGORY: &str = "(empty)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    pub label: String,
    pub value: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub row_count: usize,
}

/// One category bucket before reduction.
#[derive(Debug, Clone)]
pub struct ChartGroup<'a> {
    pub label: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub rows: Vec<&'a Row>,
}

/// Full chart pipeline over already-filtered rows: timeframe, grouping,
/// reduction, ordering, then truncation to `maxBars`.
pub fn compute_chart(
    rows: &[Row],
    config: &ChartConfig,
    now: DateTime<Utc>,
    default_max_bars: usize,
) -> Vec<ChartPoint> {
    let window = within_timeframe(rows, config.date_column.as_deref(), config.timeframe, now);
    let groups = group_rows(&window, config);

    let mut points = groups
        .into_iter()
        .map(|group| ChartPoint {
            value: group_value(&group.rows, config),
            label: group.label,
            timestamp: group.timestamp,
            row_count: group.rows.len(),
        })
        .collect::<Vec<_>>();

    order_points(&mut points, config.sort_by.unwrap_or_default());

    let limit = config
        .max_bars
        .filter(|limit| *limit > 0)
        .unwrap_or(default_max_bars);
    points.truncate(limit);
    points
}

// Counting reducers never read `valueColumn`; a distinct count is the number
// of distinct records in the group.
fn group_value(rows: &[&Row], config: &ChartConfig) -> Option<f64> {
    match config.aggregation {
        Aggregation::Count => Some(rows.len() as f64),
        Aggregation::CountDistinct => {
            let distinct = rows
                .iter()
                .map(|row| Value::Object((*row).clone()).to_string())
                .collect::<HashSet<_>>();
            Some(distinct.len() as f64)
        }
        aggregation => aggregate(rows, aggregation, &config.value_column),
    }
}

/// Partitions rows by category label, keeping first-seen order. Every input
/// row lands in exactly one group.
pub fn group_rows<'a>(rows: &[&'a Row], config: &ChartConfig) -> Vec<ChartGroup<'a>> {
    let unit = config.date_truncate.unwrap_or_default();
    let mut groups: Vec<ChartGroup<'a>> = Vec::new();
    let mut index_by_label: HashMap<String, usize> = HashMap::new();

    for &row in rows {
        let (label, timestamp) = category_key(row.get(&config.category_column), unit);
        match index_by_label.get(&label) {
            Some(index) => groups[*index].rows.push(row),
            None => {
                index_by_label.insert(label.clone(), groups.len());
                groups.push(ChartGroup {
                    label,
                    timestamp,
                    rows: vec![row],
                });
            }
        }
    }
    groups
}

fn category_key(raw: Option<&Value>, unit: DateTruncate) -> (String, Option<DateTime<Utc>>) {
    let Some(raw) = raw.filter(|value| !is_blank(Some(value))) else {
        return (EMPTY_CATEGORY.to_string(), None);
    };

    if unit != DateTruncate::None {
        if let Some(date) = parse_date(raw) {
            let start = truncate(date, unit);
            return (period_label(start, unit), Some(start));
        }
    }

    if let Value::String(text) = raw {
        if looks_like_date(text) {
            if let Some(date) = parse_date_str(text) {
                let day = truncate(date, DateTruncate::Day);
                return (period_label(day, DateTruncate::Day), Some(day));
            }
        }
    }

    (stringify(raw), None)
}

fn order_points(points: &mut [ChartPoint], sort_by: ChartSortBy) {
    match sort_by {
        ChartSortBy::Value => points.sort_by(|left, right| match (left.value, right.value) {
            (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }),
        ChartSortBy::Category => points.sort_by(|left, right| match (left.timestamp, right.timestamp) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => natural_cmp(&left.label, &right.label),
        }),
    }
}
