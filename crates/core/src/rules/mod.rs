use log::*;

mod eval;
mod parser;

pub use eval::RuleInput;

/// Evaluate a single rule expression. Any parse or evaluation failure denies
/// (fail closed).
pub fn evaluate_rule(rule: &str, input: &RuleInput) -> bool {
  let expr = match parser::parse(rule) {
    Ok(expr) => expr,
    Err(err) => {
      warn!("Denying access on malformed rule {rule:?}: {err}");
      return false;
    }
  };

  return eval::evaluate(&expr, input);
}

/// Apply the §rules contract for one operation:
/// missing rule → admin only, empty rule → public, otherwise evaluate.
/// Admin identity short-circuits to allow.
pub(crate) fn check_access(rule: Option<&str>, input: &RuleInput) -> bool {
  if input.is_admin {
    return true;
  }

  return match rule {
    None => false,
    Some("") => true,
    Some(expr) => evaluate_rule(expr, input),
  };
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::auth::User;

  fn anon() -> RuleInput<'static> {
    return RuleInput {
      is_admin: false,
      auth: None,
      record: None,
      body: None,
    };
  }

  fn test_user() -> User {
    return User {
      id: "u123".to_string(),
      email: "user@test.org".to_string(),
      verified: true,
      collection_id: "c1".to_string(),
      collection_name: "users".to_string(),
    };
  }

  #[test]
  fn test_rule_contract() {
    // Missing rule: admin only.
    assert!(!check_access(None, &anon()));
    assert!(check_access(
      None,
      &RuleInput {
        is_admin: true,
        ..anon()
      }
    ));

    // Empty rule: public.
    assert!(check_access(Some(""), &anon()));
  }

  #[test]
  fn test_auth_atoms_resolve_to_empty_string_for_anonymous() {
    // The guarded-view rule from the auth spec.
    let rule = r#"@request.auth.id != """#;
    assert!(!evaluate_rule(rule, &anon()));

    let user = test_user();
    let input = RuleInput {
      auth: Some(&user),
      ..anon()
    };
    assert!(evaluate_rule(rule, &input));
    assert!(evaluate_rule("@request.auth.verified = true", &input));
    assert!(evaluate_rule(r#"@request.auth.collectionName = 'users'"#, &input));
  }

  #[test]
  fn test_record_and_body_atoms() {
    let record = serde_json::json!({"status": "published", "score": 10});
    let record = record.as_object().unwrap();
    let input = RuleInput {
      record: Some(record),
      ..anon()
    };

    assert!(evaluate_rule(r#"status = "published""#, &input));
    assert!(evaluate_rule("score > 5", &input));
    assert!(!evaluate_rule("score >= 11", &input));

    let body = serde_json::json!({"public": true});
    let body = body.as_object().unwrap();
    let input = RuleInput {
      body: Some(body),
      ..anon()
    };
    assert!(evaluate_rule("@request.body.public = true", &input));
    assert!(!evaluate_rule("@request.body.missing = true", &input));
  }

  #[test]
  fn test_precedence_and_parentheses() {
    // && binds tighter than ||.
    assert!(evaluate_rule("true || false && false", &anon()));
    assert!(!evaluate_rule("(true || false) && false", &anon()));
    assert!(evaluate_rule("false && false || true", &anon()));

    assert!(evaluate_rule("1 < 2 && 2 < 3 || 5 < 4", &anon()));
  }

  #[test]
  fn test_malformed_rules_deny() {
    for rule in [
      "status =",
      "&& true",
      "(true",
      "status ~ 'x'",
      "'unterminated",
      "status",
      "",
    ] {
      assert!(!evaluate_rule(rule, &anon()), "rule should deny: {rule:?}");
    }

    // But fail-closed does not apply to admins.
    assert!(check_access(
      Some("status ="),
      &RuleInput {
        is_admin: true,
        ..anon()
      }
    ));
  }
}
