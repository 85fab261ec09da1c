use crate::models::Row;
use crate::values::stringify;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortState {
    pub column: String,
    pub direction: SortDirection,
}

impl SortState {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            direction: SortDirection::Desc,
        }
    }
}

/// Header click: ascending, then descending, then unsorted. Clicking another
/// column always starts over at ascending.
pub fn cycle_sort(current: Option<&SortState>, column: &str) -> Option<SortState> {
    match current {
        Some(state) if state.column == column => match state.direction {
            SortDirection::Asc => Some(SortState::desc(column)),
            SortDirection::Desc => None,
        },
        _ => Some(SortState::asc(column)),
    }
}

/// Copy-then-sort; equal keys keep their input order.
pub fn sort_rows<'a>(rows: &[&'a Row], sort: Option<&SortState>) -> Vec<&'a Row> {
    let mut sorted = rows.to_vec();
    if let Some(sort) = sort {
        sorted.sort_by(|left, right| {
            compare_cells(left.get(&sort.column), right.get(&sort.column), sort.direction)
        });
    }
    sorted
}

/// Nulls (and missing cells) sort last in both directions.
pub fn compare_cells(left: Option<&Value>, right: Option<&Value>, direction: SortDirection) -> Ordering {
    let left = left.filter(|value| !value.is_null());
    let right = right.filter(|value| !value.is_null());
    let ordering = match (left, right) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Greater,
        (Some(_), None) => return Ordering::Less,
        (Some(left), Some(right)) => compare_present(left, right),
    };
    match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

// Mixed columns rank numbers, then booleans, then everything else as text,
// so the comparator stays a total order.
fn compare_present(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(0.0);
            let b = b.as_f64().unwrap_or(0.0);
            a.total_cmp(&b)
        }
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => type_rank(left)
            .cmp(&type_rank(right))
            .then_with(|| natural_cmp(&stringify(left), &stringify(right))),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Number(_) => 0,
        Value::Bool(_) => 1,
        _ => 2,
    }
}

/// Case-insensitive comparison where digit runs compare by numeric value, so
/// `"Item 2"` sorts before `"Item 10"`.
pub fn natural_cmp(left: &str, right: &str) -> Ordering {
    let left_chunks = chunks(left);
    let right_chunks = chunks(right);

    for (a, b) in left_chunks.iter().zip(right_chunks.iter()) {
        let ordering = match (a, b) {
            (Chunk::Digits(a), Chunk::Digits(b)) => compare_digit_runs(a, b),
            (Chunk::Digits(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Digits(_)) => Ordering::Greater,
            (Chunk::Text(a), Chunk::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    left_chunks
        .len()
        .cmp(&right_chunks.len())
        .then_with(|| tie_break_case(left, right))
}

enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

fn chunks(raw: &str) -> Vec<Chunk<'_>> {
    let mut result = Vec::new();
    let mut start = 0;
    let mut in_digits: Option<bool> = None;
    for (index, ch) in raw.char_indices() {
        let is_digit = ch.is_ascii_digit();
        match in_digits {
            Some(current) if current != is_digit => {
                result.push(make_chunk(&raw[start..index], current));
                start = index;
            }
            _ => {}
        }
        in_digits = Some(is_digit);
    }
    if let Some(current) = in_digits {
        result.push(make_chunk(&raw[start..], current));
    }
    result
}

fn make_chunk(slice: &str, digits: bool) -> Chunk<'_> {
    if digits {
        Chunk::Digits(slice)
    } else {
        Chunk::Text(slice)
    }
}

fn compare_digit_runs(left: &str, right: &str) -> Ordering {
    let left_trimmed = left.trim_start_matches('0');
    let right_trimmed = right.trim_start_matches('0');
    left_trimmed
        .len()
        .cmp(&right_trimmed.len())
        .then_with(|| left_trimmed.cmp(right_trimmed))
        .then_with(|| left.len().cmp(&right.len()))
}

// Lowercase before uppercase when the strings only differ by case.
fn tie_break_case(left: &str, right: &str) -> Ordering {
    for (a, b) in left.chars().zip(right.chars()) {
        if a == b {
            continue;
        }
        match (a.is_lowercase(), b.is_lowercase()) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => return a.cmp(&b),
        }
    }
    left.len().cmp(&right.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn to_rows(values: Vec<Value>) -> Vec<Row> {
        values
            .into_iter()
            .filter_map(|value| json!({ "k": value }).as_object().cloned())
            .collect()
    }

    fn sorted(rows: &[Row], sort: Option<&SortState>) -> Vec<Row> {
        let refs = rows.iter().collect::<Vec<_>>();
        sort_rows(&refs, sort).into_iter().cloned().collect()
    }

    fn keys(rows: &[Row]) -> Vec<Value> {
        rows.iter().map(|row| row.get("k").cloned().unwrap_or(Value::Null)).collect()
    }

    #[test]
    fn cycles_through_three_states() {
        let first = cycle_sort(None, "name");
        assert_eq!(first, Some(SortState::asc("name")));
        let second = cycle_sort(first.as_ref(), "name");
        assert_eq!(second, Some(SortState::desc("name")));
        assert_eq!(cycle_sort(second.as_ref(), "name"), None);
        assert_eq!(cycle_sort(second.as_ref(), "other"), Some(SortState::asc("other")));
    }

    #[test]
    fn nulls_stay_last_in_both_directions() {
        let rows = to_rows(vec![json!(3), json!(null), json!(1), json!(2)]);
        assert_eq!(
            keys(&sorted(&rows, Some(&SortState::asc("k")))),
            vec![json!(1), json!(2), json!(3), json!(null)]
        );
        assert_eq!(
            keys(&sorted(&rows, Some(&SortState::desc("k")))),
            vec![json!(3), json!(2), json!(1), json!(null)]
        );
    }

    #[test]
    fn strings_compare_naturally() {
        let rows = to_rows(vec![json!("Item 10"), json!("item 2"), json!("Item 1")]);
        assert_eq!(
            keys(&sorted(&rows, Some(&SortState::asc("k")))),
            vec![json!("Item 1"), json!("item 2"), json!("Item 10")]
        );
        assert_eq!(natural_cmp("a", "B"), Ordering::Less);
        assert_eq!(natural_cmp("file007", "file7"), Ordering::Greater);
        assert_eq!(natural_cmp("abc", "abc"), Ordering::Equal);
    }

    #[test]
    fn booleans_put_false_first() {
        let rows = to_rows(vec![json!(true), json!(false)]);
        assert_eq!(
            keys(&sorted(&rows, Some(&SortState::asc("k")))),
            vec![json!(false), json!(true)]
        );
    }

    #[test]
    fn sort_is_stable_for_equal_keys() {
        let rows: Vec<Row> = [
            json!({ "k": 1, "tag": "a" }),
            json!({ "k": 1, "tag": "b" }),
            json!({ "k": 0, "tag": "c" }),
        ]
        .into_iter()
        .filter_map(|value| value.as_object().cloned())
        .collect();
        let tags = sorted(&rows, Some(&SortState::asc("k")))
            .iter()
            .map(|row| stringify(&row["tag"]))
            .collect::<Vec<_>>();
        assert_eq!(tags, vec!["c", "a", "b"]);
        assert_eq!(sorted(&rows, None), rows);
    }

    proptest! {
        #[test]
        fn reversing_direction_reverses_non_null_rows(
            numbers in prop::collection::btree_set(-1000i32..1000, 0..20),
            nulls in 0usize..4,
        ) {
            let mut values = numbers.iter().rev().map(|n| json!(n)).collect::<Vec<_>>();
            values.extend(std::iter::repeat(json!(null)).take(nulls));
            let rows = to_rows(values);

            let asc = keys(&sorted(&rows, Some(&SortState::asc("k"))));
            let desc = keys(&sorted(&rows, Some(&SortState::desc("k"))));
            let split = numbers.len();

            let mut reversed = desc[..split].to_vec();
            reversed.reverse();
            prop_assert_eq!(&asc[..split], &reversed[..]);
            prop_assert!(asc[split..].iter().all(Value::is_null));
            prop_assert!(desc[split..].iter().all(Value::is_null));
        }

        #[test]
        fn mixed_type_columns_sort_without_panicking(
            cells in prop::collection::vec(
                prop_oneof![
                    (0u32..2000).prop_map(|n| json!(1.0 + f64::from(n) / 1000.0)),
                    (0u32..2000).prop_map(|n| json!(format!("1.{n}"))),
                    any::<bool>().prop_map(|flag| json!(flag)),
                    Just(json!(null)),
                ],
                0..300,
            ),
        ) {
            let rows = to_rows(cells);
            for sort in [SortState::asc("k"), SortState::desc("k")] {
                let keys = keys(&sorted(&rows, Some(&sort)));
                prop_assert_eq!(keys.len(), rows.len());
                let first_null = keys.iter().position(Value::is_null).unwrap_or(keys.len());
                prop_assert!(keys[first_null..].iter().all(Value::is_null));
            }
        }
    }

    #[test]
    fn mixed_columns_group_numbers_before_text() {
        let rows = to_rows(vec![json!("1.10"), json!(1.15), json!(null), json!(true), json!(1.2)]);
        assert_eq!(
            keys(&sorted(&rows, Some(&SortState::asc("k")))),
            vec![json!(1.15), json!(1.2), json!(true), json!("1.10"), json!(null)]
        );
    }
}
