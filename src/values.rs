use serde_json::Value;

/// Stringified form of a cell, as used by the string filters, grouping keys
/// and distinct counts. `null` becomes the empty string.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => match number.as_f64() {
            Some(float) => format_plain_number(float),
            None => number.to_string(),
        },
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Strict numeric coercion: numbers pass through, strings must parse as a
/// finite float once trimmed. Everything else is non-numeric.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|float| float.is_finite()),
        Value::String(text) => parse_number(text),
        _ => None,
    }
}

pub fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|float| float.is_finite())
}

/// `null`, a missing cell and whitespace-only strings are all blank.
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(_) => false,
    }
}

/// Display form for computed values: thousands separators and at most two
/// decimals, trailing zeros dropped.
pub fn format_number(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    let negative = rounded < 0.0;
    let cents = (rounded.abs() * 100.0).round() as u128;
    let whole = cents / 100;
    let fraction = cents % 100;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let mut result = String::new();
    if negative && cents > 0 {
        result.push('-');
    }
    result.push_str(&grouped);
    if fraction > 0 {
        let decimals = format!("{fraction:02}");
        result.push('.');
        result.push_str(decimals.trim_end_matches('0'));
    }
    result
}

pub fn format_with_affixes(value: f64, prefix: Option<&str>, suffix: Option<&str>) -> String {
    format!(
        "{}{}{}",
        prefix.unwrap_or_default(),
        format_number(value),
        suffix.unwrap_or_default()
    )
}

fn format_plain_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stringifies_like_a_cell_display() {
        assert_eq!(stringify(&json!(null)), "");
        assert_eq!(stringify(&json!(3.0)), "3");
        assert_eq!(stringify(&json!(2.5)), "2.5");
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&json!("Paid")), "Paid");
    }

    #[test]
    fn numeric_coercion_is_strict() {
        assert_eq!(to_number(&json!(" 12.5 ")), Some(12.5));
        assert_eq!(to_number(&json!(7)), Some(7.0));
        assert_eq!(to_number(&json!("12abc")), None);
        assert_eq!(to_number(&json!("")), None);
        assert_eq!(to_number(&json!(true)), None);
        assert_eq!(to_number(&json!("NaN")), None);
    }

    #[test]
    fn formats_with_grouping_and_two_decimals() {
        assert_eq!(format_number(75.0), "75");
        assert_eq!(format_number(1234.5), "1,234.5");
        assert_eq!(format_number(-1234567.891), "-1,234,567.89");
        assert_eq!(format_number(0.006), "0.01");
        assert_eq!(format_number(-0.001), "0");
        assert_eq!(format_number(999.999), "1,000");
        assert_eq!(format_with_affixes(75.0, Some("$"), None), "$75");
        assert_eq!(format_with_affixes(12.5, None, Some("%")), "12.5%");
    }

    #[test]
    fn blank_detection() {
        assert!(is_blank(None));
        assert!(is_blank(Some(&json!(null))));
        assert!(is_blank(Some(&json!("   "))));
        assert!(!is_blank(Some(&json!(0))));
        assert!(!is_blank(Some(&json!("x"))));
    }
}
