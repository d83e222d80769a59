//! Evaluation of predicate expressions against JSON entities.

use crate::expr::{BinaryOp, Expr, Literal, ScalarType, Side, TypeRef};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt;

/// A hashable batching key projected from an entity.
///
/// Integers of any width, and floats with no fractional part, all become
/// `Int` so that a widened key on one side matches the narrow key on the other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Key {
    /// Converts a scalar JSON value. Null, objects, arrays and fractional
    /// numbers have no key.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => integral(n).map(Self::Int),
            Value::String(s) => Some(Self::Str(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integral(n: &Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    let x = n.as_f64()?;
    (x.fract() == 0.0 && x >= i64::MIN as f64 && x <= i64::MAX as f64).then_some(x as i64)
}

/// Bindings for the two lambda parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scope<'a> {
    pub parent: Option<&'a Value>,
    pub child: Option<&'a Value>,
}

impl<'a> Scope<'a> {
    pub fn child(child: &'a Value) -> Self {
        Self {
            parent: None,
            child: Some(child),
        }
    }

    pub fn both(parent: &'a Value, child: &'a Value) -> Self {
        Self {
            parent: Some(parent),
            child: Some(child),
        }
    }

    fn get(&self, side: Side) -> Option<&'a Value> {
        match side {
            Side::Parent => self.parent,
            Side::Child => self.child,
        }
    }
}

/// Follows `path` through nested objects; missing members yield `None`.
pub fn lookup<'v>(value: &'v Value, path: &[String]) -> Option<&'v Value> {
    path.iter().try_fold(value, |current, field| current.get(field))
}

impl Expr {
    /// Evaluates to a JSON value. Unbound parameters and missing members
    /// evaluate to null.
    pub fn evaluate(&self, scope: &Scope<'_>) -> Value {
        match self {
            Self::Param(side) => scope.get(*side).cloned().unwrap_or(Value::Null),
            Self::Literal(lit) => literal_value(lit),
            Self::Member { .. } => match self.as_accessor() {
                Some((side, path)) => scope
                    .get(side)
                    .and_then(|root| lookup(root, &path))
                    .cloned()
                    .unwrap_or(Value::Null),
                None => Value::Null,
            },
            Self::Convert { expr, to } => convert(expr.evaluate(scope), *to),
            Self::Not(inner) => Value::Bool(!truthy(&inner.evaluate(scope))),
            Self::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    Value::Bool(truthy(&lhs.evaluate(scope)) && truthy(&rhs.evaluate(scope)))
                }
                BinaryOp::Or => {
                    Value::Bool(truthy(&lhs.evaluate(scope)) || truthy(&rhs.evaluate(scope)))
                }
                cmp => Value::Bool(compare(*cmp, &lhs.evaluate(scope), &rhs.evaluate(scope))),
            },
        }
    }

    /// Evaluates as a condition; anything but `true` is false.
    pub fn test(&self, scope: &Scope<'_>) -> bool {
        truthy(&self.evaluate(scope))
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::from(*i),
        Literal::Float(x) => Number::from_f64(*x).map_or(Value::Null, Value::Number),
        Literal::String(s) => Value::String(s.clone()),
    }
}

fn truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

/// Applies a conversion. Values that cannot be represented become null.
pub(crate) fn convert(value: Value, to: TypeRef) -> Value {
    match (to.scalar, value) {
        (_, Value::Null) => Value::Null,
        (ScalarType::Int, Value::Number(n)) => integral(&n).map_or(Value::Null, Value::from),
        (ScalarType::Int, Value::String(s)) => {
            s.trim().parse::<i64>().map_or(Value::Null, Value::from)
        }
        (ScalarType::Float, Value::Number(n)) => n
            .as_f64()
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number),
        (ScalarType::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number),
        (ScalarType::String, v @ Value::String(_)) | (ScalarType::Bool, v @ Value::Bool(_)) => v,
        (ScalarType::String, Value::Number(n)) => Value::String(n.to_string()),
        (ScalarType::String, Value::Bool(b)) => Value::String(b.to_string()),
        _ => Value::Null,
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> bool {
    let ordering = order(lhs, rhs);
    match op {
        BinaryOp::Eq => ordering == Some(Ordering::Equal) || (lhs.is_null() && rhs.is_null()),
        BinaryOp::Ne => !compare(BinaryOp::Eq, lhs, rhs),
        BinaryOp::Lt => ordering == Some(Ordering::Less),
        BinaryOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        BinaryOp::Gt => ordering == Some(Ordering::Greater),
        BinaryOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        BinaryOp::And | BinaryOp::Or => false,
    }
}

/// Orders scalars of the same kind; mismatched kinds are unordered.
fn order(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            (lhs == rhs).then_some(Ordering::Equal)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_predicate;
    use serde_json::json;

    #[test]
    fn test_key_from_value() {
        assert_eq!(Key::from_value(&json!(7)), Some(Key::Int(7)));
        assert_eq!(Key::from_value(&json!(7.0)), Some(Key::Int(7)));
        assert_eq!(Key::from_value(&json!(7.5)), None);
        assert_eq!(Key::from_value(&json!("a")), Some(Key::from("a")));
        assert_eq!(Key::from_value(&json!(null)), None);
        assert_eq!(Key::from_value(&json!({"id": 1})), None);
    }

    #[test]
    fn test_evaluate_child_filter() {
        let predicate = parse_predicate("(p, c) => c.extra > 0 && c.kind != \"draft\"").unwrap();
        let keep = json!({"extra": 3, "kind": "post"});
        let drop_kind = json!({"extra": 3, "kind": "draft"});
        let drop_missing = json!({"kind": "post"});
        assert!(predicate.body.test(&Scope::child(&keep)));
        assert!(!predicate.body.test(&Scope::child(&drop_kind)));
        assert!(!predicate.body.test(&Scope::child(&drop_missing)));
    }

    #[test]
    fn test_numeric_comparison_across_widths() {
        let predicate = parse_predicate("(p, c) => c.n == p.n as float").unwrap();
        let parent = json!({"n": 2});
        let child = json!({"n": 2.0});
        assert!(predicate.body.test(&Scope::both(&parent, &child)));
    }

    #[test]
    fn test_null_equality() {
        let predicate = parse_predicate("(p, c) => c.deleted_at == null").unwrap();
        assert!(predicate.body.test(&Scope::child(&json!({}))));
        assert!(!predicate
            .body
            .test(&Scope::child(&json!({"deleted_at": "2024-01-01"}))));
    }

    #[test]
    fn test_convert() {
        let int = TypeRef {
            scalar: ScalarType::Int,
            nullable: true,
        };
        assert_eq!(convert(json!("42"), int), json!(42));
        assert_eq!(convert(json!(1.5), int), Value::Null);
        assert_eq!(convert(Value::Null, int), Value::Null);
    }

    #[test]
    fn test_lookup_nested() {
        let value = json!({"owner": {"id": 5}});
        let path = vec!["owner".to_string(), "id".to_string()];
        assert_eq!(lookup(&value, &path), Some(&json!(5)));
        assert_eq!(lookup(&value, &["missing".to_string()]), None);
    }
}
