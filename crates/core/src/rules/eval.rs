use crate::auth::User;
use crate::rules::parser::{AuthAtom, CmpOp, Expr, Operand};

/// Everything a rule expression may reference for one operation.
#[derive(Default)]
pub struct RuleInput<'a> {
  pub is_admin: bool,
  pub auth: Option<&'a User>,
  pub record: Option<&'a serde_json::Map<String, serde_json::Value>>,
  pub body: Option<&'a serde_json::Map<String, serde_json::Value>>,
}

#[derive(Clone, Debug, PartialEq)]
enum Value {
  Null,
  Bool(bool),
  Number(f64),
  String(String),
}

pub(crate) fn evaluate(expr: &Expr, input: &RuleInput) -> bool {
  return match expr {
    Expr::Literal(value) => *value,
    Expr::Or(lhs, rhs) => evaluate(lhs, input) || evaluate(rhs, input),
    Expr::And(lhs, rhs) => evaluate(lhs, input) && evaluate(rhs, input),
    Expr::Compare(lhs, op, rhs) => compare(resolve(lhs, input), *op, resolve(rhs, input)),
  };
}

fn resolve(operand: &Operand, input: &RuleInput) -> Value {
  return match operand {
    Operand::String(s) => Value::String(s.clone()),
    Operand::Number(n) => Value::Number(*n),
    Operand::Bool(b) => Value::Bool(*b),
    Operand::Auth(atom) => {
      // Unauthenticated access resolves auth atoms to the empty string.
      let Some(user) = input.auth else {
        return Value::String(String::new());
      };
      match atom {
        AuthAtom::Id => Value::String(user.id.clone()),
        AuthAtom::Email => Value::String(user.email.clone()),
        AuthAtom::Verified => Value::Bool(user.verified),
        AuthAtom::CollectionId => Value::String(user.collection_id.clone()),
        AuthAtom::CollectionName => Value::String(user.collection_name.clone()),
      }
    }
    Operand::Body(field) => json_value(input.body.and_then(|m| m.get(field))),
    Operand::Record(field) => json_value(input.record.and_then(|m| m.get(field))),
  };
}

fn json_value(value: Option<&serde_json::Value>) -> Value {
  return match value {
    Some(serde_json::Value::String(s)) => Value::String(s.clone()),
    Some(serde_json::Value::Number(n)) => n.as_f64().map_or(Value::Null, Value::Number),
    Some(serde_json::Value::Bool(b)) => Value::Bool(*b),
    _ => Value::Null,
  };
}

fn compare(lhs: Value, op: CmpOp, rhs: Value) -> bool {
  return match op {
    CmpOp::Equal => loose_eq(&lhs, &rhs),
    CmpOp::NotEqual => !loose_eq(&lhs, &rhs),
    CmpOp::LessThan => ordering(&lhs, &rhs).is_some_and(|o| o.is_lt()),
    CmpOp::LessThanEqual => ordering(&lhs, &rhs).is_some_and(|o| o.is_le()),
    CmpOp::GreaterThan => ordering(&lhs, &rhs).is_some_and(|o| o.is_gt()),
    CmpOp::GreaterThanEqual => ordering(&lhs, &rhs).is_some_and(|o| o.is_ge()),
  };
}

/// Equality with the coercions record data needs: numbers compare
/// numerically, booleans against booleans or 0/1, everything else as text
/// with null treated as the empty string.
fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
  if let (Some(a), Some(b)) = (as_number(lhs), as_number(rhs)) {
    return a == b;
  }
  if let (Value::Bool(a), Value::Bool(b)) = (lhs, rhs) {
    return a == b;
  }
  return as_text(lhs) == as_text(rhs);
}

fn ordering(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
  if let (Some(a), Some(b)) = (as_number(lhs), as_number(rhs)) {
    return a.partial_cmp(&b);
  }
  return Some(as_text(lhs).cmp(&as_text(rhs)));
}

fn as_number(value: &Value) -> Option<f64> {
  return match value {
    Value::Number(n) => Some(*n),
    Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
    _ => None,
  };
}

fn as_text(value: &Value) -> String {
  return match value {
    Value::Null => String::new(),
    Value::Bool(b) => b.to_string(),
    Value::Number(n) => n.to_string(),
    Value::String(s) => s.clone(),
  };
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_loose_equality() {
    assert!(loose_eq(&Value::Number(1.0), &Value::Bool(true)));
    assert!(loose_eq(&Value::Null, &Value::String(String::new())));
    assert!(loose_eq(
      &Value::String("a".to_string()),
      &Value::String("a".to_string())
    ));
    assert!(!loose_eq(&Value::Number(1.0), &Value::Number(2.0)));
  }

  #[test]
  fn test_numeric_ordering_beats_lexicographic() {
    assert_eq!(
      ordering(&Value::Number(9.0), &Value::Number(10.0)),
      Some(std::cmp::Ordering::Less)
    );
    // Strings fall back to text comparison.
    assert_eq!(
      ordering(&Value::String("9".to_string()), &Value::String("10".to_string())),
      Some(std::cmp::Ordering::Greater)
    );
  }
}
