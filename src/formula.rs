//! Computed-column formulas.
//!
//! The language is deliberately closed: `[Column]` references, `+ - * / %`,
//! parentheses, one conditional form `IF(cond, a, b)` and the functions
//! `ROUND`, `ABS`, `CEIL`, `FLOOR`. Evaluation is total: anything that cannot
//! be resolved to a finite number yields the placeholder instead of an error.

use crate::models::{Row, PLACEHOLDER};
use crate::values::{format_with_affixes, to_number};
use once_cell::sync::Lazy;
use regex::Regex;

static REFERENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\[\]]+)\]").expect("valid reference regex"));

static CALL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(IF|ROUND|ABS|CEIL|FLOOR)\s*\(").expect("valid call regex")
});

const MAX_NESTING: usize = 64;

const COMPARISONS: &[(&str, Comparison)] = &[
    (">=", Comparison::Gte),
    ("<=", Comparison::Lte),
    ("!=", Comparison::Ne),
    ("==", Comparison::Eq),
    ("=", Comparison::Eq),
    (">", Comparison::Gt),
    ("<", Comparison::Lt),
];

#[derive(Debug, Clone, Copy)]
enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Display value for one row: formatted number wrapped in the affixes, or
/// the placeholder.
pub fn evaluate(formula: &str, row: &Row, prefix: Option<&str>, suffix: Option<&str>) -> String {
    match evaluate_value(formula, row) {
        Some(value) => format_with_affixes(value, prefix, suffix),
        None => PLACEHOLDER.to_string(),
    }
}

/// Numeric result, `None` whenever the formula cannot be resolved for `row`.
pub fn evaluate_value(formula: &str, row: &Row) -> Option<f64> {
    let substituted = substitute_references(formula, row)?;
    reduce(&substituted)
}

fn substitute_references(formula: &str, row: &Row) -> Option<String> {
    let mut output = String::with_capacity(formula.len());
    let mut last = 0;
    for caps in REFERENCE_RE.captures_iter(formula) {
        let whole = caps.get(0)?;
        let name = caps.get(1)?.as_str();
        let value = resolve_reference(row, name)?;
        output.push_str(&formula[last..whole.start()]);
        output.push_str(&number_literal(value));
        last = whole.end();
    }
    output.push_str(&formula[last..]);
    Some(output)
}

/// Exact key first, then any nested key ending in `.Name`.
fn resolve_reference(row: &Row, name: &str) -> Option<f64> {
    let name = name.trim();
    if let Some(value) = row.get(name) {
        return to_number(value);
    }
    let suffix = format!(".{name}");
    row.iter()
        .find(|(key, _)| key.ends_with(&suffix))
        .and_then(|(_, value)| to_number(value))
}

fn number_literal(value: f64) -> String {
    if value < 0.0 {
        format!("({value})")
    } else {
        format!("{value}")
    }
}

fn reduce(expression: &str) -> Option<f64> {
    let expanded = expand_conditionals(expression)?;
    reduce_without_conditionals(&expanded)
}

fn reduce_without_conditionals(expression: &str) -> Option<f64> {
    let expanded = expand_functions(expression)?;
    evaluate_arithmetic(&sanitize(&expanded))
}

struct Call {
    name: String,
    start: usize,
    end: usize,
    args: Vec<String>,
}

/// The last call in the text has no other call inside its arguments, so
/// expanding from the back resolves nested calls innermost first.
fn last_call(expression: &str, conditional: bool) -> Option<Option<Call>> {
    let found = CALL_RE
        .captures_iter(expression)
        .filter(|caps| {
            caps.get(1)
                .map(|name| name.as_str().eq_ignore_ascii_case("IF") == conditional)
                .unwrap_or(false)
        })
        .last();
    let Some(caps) = found else {
        return Some(None);
    };
    let whole = caps.get(0)?;
    let name = caps.get(1)?.as_str().to_ascii_uppercase();
    let open = whole.end() - 1;
    let close = matching_paren(expression, open)?;
    Some(Some(Call {
        name,
        start: whole.start(),
        end: close + 1,
        args: split_arguments(&expression[open + 1..close])
            .into_iter()
            .map(ToString::to_string)
            .collect(),
    }))
}

fn expand_conditionals(expression: &str) -> Option<String> {
    let mut current = expression.to_string();
    while let Some(call) = last_call(&current, true)? {
        if call.args.len() != 3 {
            return None;
        }
        let branch = if condition_holds(&call.args[0])? {
            &call.args[1]
        } else {
            &call.args[2]
        };
        let replacement = format!("({})", branch.trim());
        current = format!("{}{}{}", &current[..call.start], replacement, &current[call.end..]);
    }
    Some(current)
}

fn condition_holds(condition: &str) -> Option<bool> {
    let (index, token, comparison) = find_comparison(condition)?;
    let left = reduce_without_conditionals(&condition[..index])?;
    let right = reduce_without_conditionals(&condition[index + token.len()..])?;
    let holds = match comparison {
        Comparison::Eq => left == right,
        Comparison::Ne => left != right,
        Comparison::Gt => left > right,
        Comparison::Gte => left >= right,
        Comparison::Lt => left < right,
        Comparison::Lte => left <= right,
    };
    Some(holds)
}

fn find_comparison(condition: &str) -> Option<(usize, &'static str, Comparison)> {
    let mut depth = 0i32;
    for (index, ch) in condition.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ if depth == 0 => {
                let rest = &condition[index..];
                if let Some((token, comparison)) =
                    COMPARISONS.iter().find(|(token, _)| rest.starts_with(token))
                {
                    return Some((index, *token, *comparison));
                }
            }
            _ => {}
        }
    }
    None
}

fn expand_functions(expression: &str) -> Option<String> {
    let mut current = expression.to_string();
    while let Some(call) = last_call(&current, false)? {
        let args = call
            .args
            .iter()
            .map(|arg| evaluate_arithmetic(&sanitize(arg)))
            .collect::<Option<Vec<_>>>()?;
        let value = apply_function(&call.name, &args)?;
        current = format!(
            "{}{}{}",
            &current[..call.start],
            number_literal(value),
            &current[call.end..]
        );
    }
    Some(current)
}

fn apply_function(name: &str, args: &[f64]) -> Option<f64> {
    let value = match (name, args) {
        ("ROUND", [value]) => js_round(*value),
        ("ROUND", [value, digits]) => {
            let factor = 10f64.powi(digits.trunc().clamp(-15.0, 15.0) as i32);
            js_round(value * factor) / factor
        }
        ("ABS", [value]) => value.abs(),
        ("CEIL", [value]) => value.ceil(),
        ("FLOOR", [value]) => value.floor(),
        _ => return None,
    };
    value.is_finite().then_some(value)
}

// Half-way cases round towards positive infinity.
fn js_round(value: f64) -> f64 {
    (value + 0.5).floor()
}

fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (index, byte) in text.bytes().enumerate().skip(open) {
        match byte {
            b'(' => depth += 1,
            b')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_arguments(text: &str) -> Vec<&str> {
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (index, byte) in text.bytes().enumerate() {
        match byte {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                args.push(&text[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    args.push(&text[start..]);
    args
}

/// Whitelist filter: digits, the five operators, parentheses, dot and space.
fn sanitize(expression: &str) -> String {
    expression
        .chars()
        .filter(|ch| ch.is_ascii_digit() || "+-*/().% ".contains(*ch))
        .collect()
}

fn evaluate_arithmetic(expression: &str) -> Option<f64> {
    let mut parser = Parser {
        bytes: expression.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let value = parser.expression()?;
    parser.skip_spaces();
    if parser.pos != parser.bytes.len() {
        return None;
    }
    value.is_finite().then_some(value)
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn expression(&mut self) -> Option<f64> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(b'-') => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Some(value),
            }
        }
    }

    fn term(&mut self) -> Option<f64> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                Some(b'/') => {
                    self.pos += 1;
                    value /= self.unary()?;
                }
                Some(b'%') => {
                    self.pos += 1;
                    value %= self.unary()?;
                }
                _ => return Some(value),
            }
        }
    }

    fn unary(&mut self) -> Option<f64> {
        self.enter()?;
        let value = match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                self.unary().map(|value| -value)
            }
            Some(b'+') => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        };
        self.depth -= 1;
        value
    }

    fn primary(&mut self) -> Option<f64> {
        match self.peek()? {
            b'(' => {
                self.pos += 1;
                let value = self.expression()?;
                if self.peek() != Some(b')') {
                    return None;
                }
                self.pos += 1;
                Some(value)
            }
            b'0'..=b'9' | b'.' => self.number(),
            _ => None,
        }
    }

    fn number(&mut self) -> Option<f64> {
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .map(|byte| byte.is_ascii_digit() || *byte == b'.')
            .unwrap_or(false)
        {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()?
            .parse::<f64>()
            .ok()
    }

    fn enter(&mut self) -> Option<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return None;
        }
        Some(())
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_spaces();
        self.bytes.get(self.pos).copied()
    }

    fn skip_spaces(&mut self) {
        while self.bytes.get(self.pos) == Some(&b' ') {
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().expect("object row")
    }

    #[test]
    fn subtracts_columns_with_prefix() {
        let row = row(json!({ "Revenue": 120, "Cost": 45 }));
        assert_eq!(evaluate("[Revenue] - [Cost]", &row, Some("$"), None), "$75");
    }

    #[test]
    fn resolves_nested_keys_by_suffix() {
        let row = row(json!({ "order.total": "1500.456", "qty": 2 }));
        assert_eq!(evaluate("[total] * [qty]", &row, None, Some(" USD")), "3,000.91 USD");
    }

    #[test]
    fn missing_or_text_references_yield_placeholder() {
        let row = row(json!({ "a": 1, "label": "north" }));
        assert_eq!(evaluate("[a] + [b]", &row, None, None), PLACEHOLDER);
        assert_eq!(evaluate("[a] + [label]", &row, None, None), PLACEHOLDER);
    }

    #[test]
    fn conditional_selects_a_branch() {
        let row = row(json!({ "score": 72, "bonus": 5 }));
        assert_eq!(evaluate("IF([score] >= 70, [score] + [bonus], 0)", &row, None, None), "77");
        assert_eq!(evaluate("if([score] < 70, 1, 2)", &row, None, None), "2");
        assert_eq!(evaluate("IF([score] = 72, 10, 20) * 2", &row, None, None), "20");
        assert_eq!(evaluate("IF([score] != 72, 10, 20)", &row, None, None), "20");
        assert_eq!(evaluate("IF([score], 1, 2)", &row, None, None), PLACEHOLDER);
    }

    #[test]
    fn functions_and_negative_values() {
        let row = row(json!({ "delta": -3.456, "n": 2.5 }));
        assert_eq!(evaluate("ABS([delta])", &row, None, None), "3.46");
        assert_eq!(evaluate("ROUND([delta], 1)", &row, None, None), "-3.5");
        assert_eq!(evaluate("ROUND([n])", &row, None, None), "3");
        assert_eq!(evaluate("CEIL([n]) + FLOOR([n])", &row, None, None), "5");
        assert_eq!(evaluate("ROUND(ABS([delta]) * 10)", &row, None, None), "35");
        assert_eq!(evaluate("IF(ABS([delta]) > 3, ROUND([n]), 0)", &row, None, None), "3");
    }

    #[test]
    fn strips_everything_outside_the_whitelist() {
        let row = row(json!({ "a": 4 }));
        assert_eq!(evaluate("[a] * 2 abc", &row, None, None), "8");
        assert_eq!(evaluate("alert(1)", &row, None, None), "1");
        assert_eq!(evaluate("[a] * ", &row, None, None), PLACEHOLDER);
        assert_eq!(evaluate("[a] / 0", &row, None, None), PLACEHOLDER);
        assert_eq!(evaluate("", &row, None, None), PLACEHOLDER);
        assert_eq!(evaluate("10 % 4", &row, None, None), "2");
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let row = Row::new();
        let formula = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert_eq!(evaluate(&formula, &row, None, None), PLACEHOLDER);
    }

    proptest! {
        #[test]
        fn evaluation_is_total_and_deterministic(
            formula in "[\\[\\]a-zA-Z0-9+*/%().,<>=! -]{0,40}",
            a in any::<i32>(),
        ) {
            let row = row(json!({ "a": a }));
            let first = evaluate(&formula, &row, Some("$"), None);
            let second = evaluate(&formula, &row, Some("$"), None);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn missing_reference_is_always_placeholder(prefix in "[0-9+* ]{0,10}") {
            let formula = format!("{prefix}[missing]");
            prop_assert_eq!(evaluate(&formula, &Row::new(), None, None), PLACEHOLDER);
        }
    }
}
