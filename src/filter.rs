use crate::models::{FilterOperator, Row, WidgetFilter};
use crate::values::{is_blank, parse_number, stringify, to_number};
use std::collections::BTreeSet;

/// Rows passing every filter (logical AND). Input rows are not modified.
pub fn apply_filters(rows: &[Row], filters: &[WidgetFilter]) -> Vec<Row> {
    filter_rows(rows.iter(), filters, None)
        .into_iter()
        .cloned()
        .collect()
}

/// Borrowing variant of [`apply_filters`]. When `known_columns` is given, a
/// configured filter naming a column outside that set matches nothing.
pub fn filter_rows<'a, I>(
    rows: I,
    filters: &[WidgetFilter],
    known_columns: Option<&BTreeSet<String>>,
) -> Vec<&'a Row>
where
    I: IntoIterator<Item = &'a Row>,
{
    let active = filters
        .iter()
        .filter_map(|filter| {
            let column = filter.column.trim();
            let operator = filter.operator?;
            if column.is_empty() {
                return None;
            }
            Some((filter, column, operator))
        })
        .collect::<Vec<_>>();

    if active.is_empty() {
        return rows.into_iter().collect();
    }

    let stale = active.iter().any(|(_, column, _)| {
        known_columns
            .map(|known| !known.contains(*column))
            .unwrap_or(false)
    });
    if stale {
        return Vec::new();
    }

    rows.into_iter()
        .filter(|row| {
            active
                .iter()
                .all(|(filter, column, operator)| evaluate(row, column, *operator, &filter.value))
        })
        .collect()
}

fn evaluate(row: &Row, column: &str, operator: FilterOperator, expected: &str) -> bool {
    let cell = row.get(column);
    match operator {
        FilterOperator::IsEmpty => is_blank(cell),
        FilterOperator::IsNotEmpty => !is_blank(cell),
        FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte => {
            let (Some(actual), Some(expected)) = (cell.and_then(to_number), parse_number(expected)) else {
                return false;
            };
            match operator {
                FilterOperator::Gt => actual > expected,
                FilterOperator::Gte => actual >= expected,
                FilterOperator::Lt => actual < expected,
                _ => actual <= expected,
            }
        }
        FilterOperator::Equals
        | FilterOperator::NotEquals
        | FilterOperator::Contains
        | FilterOperator::NotContains
        | FilterOperator::StartsWith => {
            let actual = cell.map(stringify).unwrap_or_default().to_lowercase();
            let expected = expected.to_lowercase();
            match operator {
                FilterOperator::Equals => actual == expected,
                FilterOperator::NotEquals => actual != expected,
                FilterOperator::Contains => actual.contains(&expected),
                FilterOperator::NotContains => !actual.contains(&expected),
                _ => actual.starts_with(&expected),
            }
        }
    }
}
