//! Predicate evaluation over a run context.
//!
//! Everything here is pure: evaluation never fails and never mutates the
//! context. Casts that cannot succeed (a non-numeric `gt`, an invalid regex)
//! evaluate to `false`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::types::Context;

/// Comparison operator of a single condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    #[default]
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    Matches,
    In,
    NotIn,
    Exists,
    /// Any operator name we do not recognise. Always false.
    #[serde(other)]
    Unknown,
}

/// How per-condition results are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Logic {
    Or,
    /// Anything other than `or` combines with AND.
    #[default]
    #[serde(other)]
    And,
}

/// `{ "field": "user.followers", "op": "gt", "value": 100 }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted path into the context.
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub op: ConditionOp,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: ConditionOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }
}

/// Evaluate `value <op> target`. A missing value and JSON `null` are the same thing.
pub fn evaluate(value: Option<&Value>, op: ConditionOp, target: &Value) -> bool {
    let value = value.filter(|v| !v.is_null());

    match op {
        ConditionOp::Eq => values_equal(value, target),
        ConditionOp::Ne => !values_equal(value, target),
        ConditionOp::Gt => compare(value, target, |a, b| a > b),
        ConditionOp::Gte => compare(value, target, |a, b| a >= b),
        ConditionOp::Lt => compare(value, target, |a, b| a < b),
        ConditionOp::Lte => compare(value, target, |a, b| a <= b),
        ConditionOp::Contains => display(value).contains(&display(Some(target))),
        ConditionOp::NotContains => !display(value).contains(&display(Some(target))),
        ConditionOp::Matches => matches(value, target),
        ConditionOp::In => membership(value, target),
        ConditionOp::NotIn => !membership(value, target),
        ConditionOp::Exists => value.is_some(),
        ConditionOp::Unknown => false,
    }
}

/// Evaluate every condition against the context and combine with `logic`.
pub fn evaluate_multi(conditions: &[Condition], context: &Context, logic: Logic) -> bool {
    let mut results = conditions
        .iter()
        .map(|c| evaluate(resolve_path(context, &c.field), c.op, &c.value));

    match logic {
        Logic::Or => results.any(|r| r),
        Logic::And => results.all(|r| r),
    }
}

/// Walk a dotted path through nested objects. Missing keys and non-object
/// intermediates resolve to `None`.
pub fn resolve_path<'a>(context: &'a Context, path: &str) -> Option<&'a Value> {
    let mut keys = path.split('.');
    let first = keys.next()?;
    let mut current = context.get(first)?;
    for key in keys {
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

fn values_equal(value: Option<&Value>, target: &Value) -> bool {
    match value {
        None => target.is_null(),
        Some(Value::Number(a)) => match target {
            Value::Number(b) => a.as_f64() == b.as_f64(),
            _ => false,
        },
        Some(v) => v == target,
    }
}

fn compare(value: Option<&Value>, target: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (value.and_then(as_number), as_number(target)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// Numeric cast: numbers, numeric strings, and booleans.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn matches(value: Option<&Value>, target: &Value) -> bool {
    let pattern = display(Some(target));
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(&display(value)),
        Err(e) => {
            debug!(pattern = %pattern, error = %e, "Invalid condition pattern");
            false
        }
    }
}

fn membership(value: Option<&Value>, target: &Value) -> bool {
    match target {
        Value::Array(items) => items.iter().any(|item| match value {
            None => item.is_null(),
            Some(_) => values_equal(value, item),
        }),
        other => display(Some(other)).contains(&display(value)),
    }
}

/// Stringify a value for substring and regex tests. Strings are used as-is;
/// a missing value renders as `null`, never as an empty string.
pub fn display(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(value: Value, op: ConditionOp, target: Value) -> bool {
        evaluate(Some(&value), op, &target)
    }

    fn ctx(value: Value) -> Context {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_eq_and_ne() {
        assert!(eval(json!(5), ConditionOp::Eq, json!(5)));
        assert!(eval(json!(5), ConditionOp::Eq, json!(5.0)));
        assert!(!eval(json!(5), ConditionOp::Eq, json!(6)));
        assert!(eval(json!("a"), ConditionOp::Eq, json!("a")));
        assert!(eval(json!(5), ConditionOp::Ne, json!(6)));
        assert!(!eval(json!(5), ConditionOp::Ne, json!(5)));
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(eval(json!(10), ConditionOp::Gt, json!(5)));
        assert!(!eval(json!(5), ConditionOp::Gt, json!(10)));
        assert!(eval(json!(10), ConditionOp::Gte, json!(10)));
        assert!(eval(json!(11), ConditionOp::Gte, json!(10)));
        assert!(eval(json!(5), ConditionOp::Lt, json!(10)));
        assert!(!eval(json!(10), ConditionOp::Lt, json!(5)));
        assert!(eval(json!(10), ConditionOp::Lte, json!(10)));
        assert!(eval(json!(9), ConditionOp::Lte, json!(10)));
    }

    #[test]
    fn test_numeric_cast_from_strings() {
        assert!(eval(json!("12.5"), ConditionOp::Gt, json!(12)));
        assert!(eval(json!(3), ConditionOp::Lt, json!(" 4 ")));
    }

    #[test]
    fn test_non_numeric_comparison_is_false() {
        assert!(!eval(json!("abc"), ConditionOp::Gt, json!("def")));
        assert!(!eval(json!([1, 2]), ConditionOp::Lte, json!(3)));
        assert!(!evaluate(None, ConditionOp::Gt, &json!(0)));
    }

    #[test]
    fn test_contains() {
        assert!(eval(json!("hello world"), ConditionOp::Contains, json!("world")));
        assert!(!eval(json!("hello"), ConditionOp::Contains, json!("world")));
        assert!(eval(json!("hello"), ConditionOp::NotContains, json!("world")));
        assert!(!eval(
            json!("hello world"),
            ConditionOp::NotContains,
            json!("world")
        ));
        assert!(eval(json!(12345), ConditionOp::Contains, json!(234)));
    }

    #[test]
    fn test_matches_regex() {
        assert!(eval(json!("test123"), ConditionOp::Matches, json!(r"\d+")));
        assert!(!eval(json!("test"), ConditionOp::Matches, json!(r"^\d+$")));
        assert!(!eval(json!("test"), ConditionOp::Matches, json!("(unclosed")));
    }

    #[test]
    fn test_in_and_not_in() {
        assert!(eval(json!("a"), ConditionOp::In, json!(["a", "b", "c"])));
        assert!(!eval(json!("d"), ConditionOp::In, json!(["a", "b", "c"])));
        assert!(eval(json!("d"), ConditionOp::NotIn, json!(["a", "b", "c"])));
        assert!(eval(json!(2), ConditionOp::In, json!([1.0, 2.0])));
        // Non-list target falls back to substring
        assert!(eval(json!("ell"), ConditionOp::In, json!("hello")));
        assert!(eval(json!("xyz"), ConditionOp::NotIn, json!("hello")));
    }

    #[test]
    fn test_missing_operand_is_not_a_substring_of_everything() {
        assert!(!evaluate(None, ConditionOp::In, &json!("hello")));
        assert!(evaluate(None, ConditionOp::NotIn, &json!("hello")));
        assert!(!eval(json!("abc"), ConditionOp::Contains, Value::Null));
        assert!(eval(json!("abc"), ConditionOp::NotContains, Value::Null));
        assert!(!evaluate(None, ConditionOp::Contains, &json!("x")));
        assert!(evaluate(None, ConditionOp::NotContains, &json!("x")));

        let context = ctx(json!({"name": "Bob"}));
        let missing_in = vec![Condition::new("nickname", ConditionOp::In, json!("hello"))];
        assert!(!evaluate_multi(&missing_in, &context, Logic::And));
        let missing_not_in = vec![Condition::new("nickname", ConditionOp::NotIn, json!("hello"))];
        assert!(evaluate_multi(&missing_not_in, &context, Logic::And));
    }

    #[test]
    fn test_exists() {
        assert!(eval(json!("something"), ConditionOp::Exists, Value::Null));
        assert!(eval(json!(false), ConditionOp::Exists, Value::Null));
        assert!(!evaluate(None, ConditionOp::Exists, &Value::Null));
        assert!(!eval(Value::Null, ConditionOp::Exists, Value::Null));
    }

    #[test]
    fn test_unknown_op() {
        assert!(!eval(json!(1), ConditionOp::Unknown, json!(1)));
        let op: ConditionOp = serde_json::from_value(json!("between")).unwrap();
        assert_eq!(op, ConditionOp::Unknown);
    }

    #[test]
    fn test_multi_and() {
        let conditions = vec![
            Condition::new("age", ConditionOp::Gt, json!(18)),
            Condition::new("name", ConditionOp::Eq, json!("Alice")),
        ];
        let context = ctx(json!({"age": 25, "name": "Alice"}));
        assert!(evaluate_multi(&conditions, &context, Logic::And));

        let context = ctx(json!({"age": 25, "name": "Bob"}));
        assert!(!evaluate_multi(&conditions, &context, Logic::And));
    }

    #[test]
    fn test_multi_or() {
        let conditions = vec![
            Condition::new("age", ConditionOp::Gt, json!(30)),
            Condition::new("name", ConditionOp::Eq, json!("Bob")),
        ];
        let context = ctx(json!({"age": 25, "name": "Bob"}));
        assert!(evaluate_multi(&conditions, &context, Logic::Or));

        let context = ctx(json!({"age": 25, "name": "Alice"}));
        assert!(!evaluate_multi(&conditions, &context, Logic::Or));
    }

    #[test]
    fn test_multi_empty() {
        let context = Context::new();
        assert!(evaluate_multi(&[], &context, Logic::And));
        assert!(!evaluate_multi(&[], &context, Logic::Or));
    }

    #[test]
    fn test_nested_field() {
        let conditions = vec![Condition::new(
            "user.profile.followers",
            ConditionOp::Gt,
            json!(1000),
        )];
        let context = ctx(json!({"user": {"profile": {"followers": 5000}}}));
        assert!(evaluate_multi(&conditions, &context, Logic::And));
    }

    #[test]
    fn test_missing_path_resolves_to_none() {
        let context = ctx(json!({"user": "flat-string"}));
        assert_eq!(resolve_path(&context, "nonexistent.field"), None);
        assert_eq!(resolve_path(&context, "user.name"), None);

        let eq = vec![Condition::new("nonexistent.field", ConditionOp::Eq, json!("x"))];
        assert!(!evaluate_multi(&eq, &context, Logic::And));
        let exists = vec![Condition::new("user.name", ConditionOp::Exists, Value::Null)];
        assert!(!evaluate_multi(&exists, &context, Logic::And));
    }

    #[test]
    fn test_logic_parsing() {
        let or: Logic = serde_json::from_value(json!("or")).unwrap();
        let and: Logic = serde_json::from_value(json!("and")).unwrap();
        let other: Logic = serde_json::from_value(json!("xor")).unwrap();
        assert_eq!(or, Logic::Or);
        assert_eq!(and, Logic::And);
        assert_eq!(other, Logic::And);
    }

    #[test]
    fn test_condition_defaults() {
        let c: Condition = serde_json::from_value(json!({"field": "x"})).unwrap();
        assert_eq!(c.op, ConditionOp::Eq);
        assert_eq!(c.value, Value::Null);
    }
}
