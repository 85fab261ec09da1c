use crate::models::{DateTruncate, Row, Timeframe};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static DATE_LIKE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:?\d{2})?)?$")
        .expect("valid date regex")
});

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

// Numbers below this are more likely quantities than epoch milliseconds.
const MIN_EPOCH_MILLIS: f64 = 1e11;

/// Interprets a cell value as a point in time (UTC).
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => parse_date_str(raw),
        Value::Number(number) => {
            let millis = number.as_f64()?;
            if !millis.is_finite() || millis.abs() < MIN_EPOCH_MILLIS {
                return None;
            }
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Utc.timestamp_opt(seconds, nanos.min(999_999_999) as u32).single()
        }
        _ => None,
    }
}

pub fn parse_date_str(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc());
        }
    }
    for format in NAIVE_DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(raw, format) {
            return parsed.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

/// True when a raw string is shaped like an ISO date even if nobody asked for
/// truncation; such values still get a readable label.
pub fn looks_like_date(raw: &str) -> bool {
    DATE_LIKE_RE.is_match(raw.trim())
}

/// Lower bound for a relative window, or `None` for [`Timeframe::All`].
pub fn timeframe_cutoff(timeframe: Timeframe, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match timeframe {
        Timeframe::All => None,
        Timeframe::Last7Days => Some(now - Duration::days(7)),
        Timeframe::Last30Days => Some(now - Duration::days(30)),
        Timeframe::Last90Days => Some(now - Duration::days(90)),
        Timeframe::ThisMonth => start_of_day(now.year(), now.month(), 1),
        Timeframe::ThisYear => start_of_day(now.year(), 1, 1),
    }
}

/// Rows whose `date_column` parses to a date at or after the cutoff. Without a
/// date column or with [`Timeframe::All`] every row is kept.
pub fn within_timeframe<'a>(
    rows: &'a [Row],
    date_column: Option<&str>,
    timeframe: Option<Timeframe>,
    now: DateTime<Utc>,
) -> Vec<&'a Row> {
    let date_column = date_column.map(str::trim).filter(|column| !column.is_empty());
    let cutoff = timeframe.and_then(|timeframe| timeframe_cutoff(timeframe, now));
    let (Some(column), Some(cutoff)) = (date_column, cutoff) else {
        return rows.iter().collect();
    };

    rows.iter()
        .filter(|row| {
            row.get(column)
                .and_then(parse_date)
                .map(|date| date >= cutoff)
                .unwrap_or(false)
        })
        .collect()
}

/// Rounds down to the start of the period. Weeks start on Monday.
pub fn truncate(date: DateTime<Utc>, unit: DateTruncate) -> DateTime<Utc> {
    let day = date.date_naive();
    let truncated = match unit {
        DateTruncate::None => return date,
        DateTruncate::Day => day,
        DateTruncate::Week => {
            day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
        }
        DateTruncate::Month => day.with_day(1).unwrap_or(day),
        DateTruncate::Year => day.with_day(1).and_then(|d| d.with_month(1)).unwrap_or(day),
    };
    truncated
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(date)
}

pub fn period_label(date: DateTime<Utc>, unit: DateTruncate) -> String {
    match unit {
        DateTruncate::None | DateTruncate::Day => date.format("%b %-d, %Y").to_string(),
        DateTruncate::Week => format!("Week of {}", date.format("%b %-d, %Y")),
        DateTruncate::Month => date.format("%b %Y").to_string(),
        DateTruncate::Year => date.format("%Y").to_string(),
    }
}

fn start_of_day(year: i32, month: u32, day: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(raw: &str) -> DateTime<Utc> {
        parse_date_str(raw).expect("valid date")
    }

    #[test]
    fn parses_common_shapes() {
        assert_eq!(at("2024-03-05"), at("2024-03-05T00:00:00Z"));
        assert_eq!(at("2024/03/05"), at("2024-03-05T00:00:00Z"));
        assert_eq!(at("2024-03-05 14:30"), at("2024-03-05T14:30:00Z"));
        assert_eq!(
            parse_date(&json!({ "seconds": 1_709_596_800, "nanoseconds": 0 })),
            Some(at("2024-03-05T00:00:00Z"))
        );
        assert_eq!(
            parse_date(&json!(1_709_596_800_000i64)),
            Some(at("2024-03-05T00:00:00Z"))
        );
        assert_eq!(parse_date(&json!(42)), None);
        assert_eq!(parse_date(&json!("soon")), None);
        assert_eq!(parse_date(&json!(null)), None);
    }

    #[test]
    fn truncates_to_period_start() {
        let date = at("2024-03-07T18:12:00Z");
        assert_eq!(truncate(date, DateTruncate::Day), at("2024-03-07"));
        assert_eq!(truncate(date, DateTruncate::Week), at("2024-03-04"));
        assert_eq!(truncate(date, DateTruncate::Month), at("2024-03-01"));
        assert_eq!(truncate(date, DateTruncate::Year), at("2024-01-01"));
        assert_eq!(truncate(at("2024-03-04T01:00:00Z"), DateTruncate::Week), at("2024-03-04"));
        assert_eq!(truncate(at("2024-03-10T23:00:00Z"), DateTruncate::Week), at("2024-03-04"));
    }

    #[test]
    fn labels_are_human_readable() {
        let date = at("2024-03-04");
        assert_eq!(period_label(date, DateTruncate::Day), "Mar 4, 2024");
        assert_eq!(period_label(date, DateTruncate::Week), "Week of Mar 4, 2024");
        assert_eq!(period_label(date, DateTruncate::Month), "Mar 2024");
        assert_eq!(period_label(date, DateTruncate::Year), "2024");
    }

    #[test]
    fn cutoffs_follow_the_calendar() {
        let now = at("2024-03-15T12:00:00Z");
        assert_eq!(timeframe_cutoff(Timeframe::All, now), None);
        assert_eq!(timeframe_cutoff(Timeframe::Last7Days, now), Some(at("2024-03-08T12:00:00Z")));
        assert_eq!(timeframe_cutoff(Timeframe::ThisMonth, now), Some(at("2024-03-01")));
        assert_eq!(timeframe_cutoff(Timeframe::ThisYear, now), Some(at("2024-01-01")));
    }

    #[test]
    fn timeframe_drops_rows_without_dates() {
        let now = at("2024-03-15T12:00:00Z");
        let rows: Vec<Row> = [json!({ "d": "2024-03-14" }), json!({ "d": "n/a" }), json!({})]
            .into_iter()
            .filter_map(|value| value.as_object().cloned())
            .collect();
        let kept = within_timeframe(&rows, Some("d"), Some(Timeframe::Last7Days), now);
        assert_eq!(kept.len(), 1);
        let all = within_timeframe(&rows, Some("d"), Some(Timeframe::All), now);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn date_shape_detection() {
        assert!(looks_like_date("2024-03-05"));
        assert!(looks_like_date("2024-03-05T10:00:00.000Z"));
        assert!(!looks_like_date("Item 2024"));
        assert!(!looks_like_date("20240305"));
    }
}
