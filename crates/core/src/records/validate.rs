use crate::records::RecordError;
use crate::schema::{Collection, Field, FieldType, is_safe_identifier};
use bunbase_sqlite::{Connection, params};

/// Validate one value against its field's type. Returns an error message on
/// mismatch; nulls are handled by the required check, not here.
fn validate_value(field: &Field, value: &serde_json::Value) -> Option<String> {
  if value.is_null() {
    return None;
  }

  return match field.field_type {
    FieldType::Text => {
      if value.is_string() {
        None
      } else {
        Some("must be a string".to_string())
      }
    }
    FieldType::Number => match value.as_f64() {
      Some(n) if n.is_finite() => None,
      _ => Some("must be a finite number".to_string()),
    },
    FieldType::Boolean => {
      if value.is_boolean() {
        None
      } else {
        Some("must be a boolean".to_string())
      }
    }
    FieldType::Datetime => match value.as_str() {
      Some(s) if parse_datetime(s) => None,
      _ => Some("must be an ISO-8601 datetime".to_string()),
    },
    FieldType::Json => None,
    FieldType::Relation => match value.as_str() {
      Some(s) if !s.is_empty() => None,
      _ => Some("must be a record id".to_string()),
    },
    FieldType::File => match value {
      serde_json::Value::String(_) => None,
      serde_json::Value::Array(entries) if entries.iter().all(|e| e.is_string()) => None,
      _ => Some("must be a filename or list of filenames".to_string()),
    },
  };
}

/// ISO-8601 with optional offset: either a full RFC3339 timestamp or a naive
/// local timestamp.
fn parse_datetime(value: &str) -> bool {
  if chrono::DateTime::parse_from_rfc3339(value).is_ok() {
    return true;
  }
  return chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
    || chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").is_ok();
}

/// Shape validation. On create every declared field is checked and required
/// fields must be present; on update (partial) validators are built from
/// only the fields present in the patch.
pub(crate) fn validate_fields(
  collection: &Collection,
  data: &serde_json::Map<String, serde_json::Value>,
  partial: bool,
) -> Result<(), RecordError> {
  let mut errors: Vec<(String, String)> = vec![];

  for field in &collection.fields {
    let value = data.get(&field.name);

    match value {
      None => {
        if !partial && field.required {
          errors.push((field.name.clone(), "missing required value".to_string()));
        }
      }
      Some(value) => {
        if field.required && value.is_null() {
          errors.push((field.name.clone(), "cannot be null".to_string()));
        } else if let Some(message) = validate_value(field, value) {
          errors.push((field.name.clone(), message));
        }
      }
    }
  }

  if !errors.is_empty() {
    return Err(RecordError::Validation(errors));
  }
  return Ok(());
}

/// Relation existence: every non-null relation value present in `data` must
/// resolve to a record in its target collection. Runs after shape
/// validation; failures are a distinct error.
pub(crate) async fn validate_relations(
  conn: &Connection,
  collection: &Collection,
  data: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), RecordError> {
  for field in &collection.fields {
    if field.field_type != FieldType::Relation {
      continue;
    }
    let Some(value) = data.get(&field.name) else {
      continue;
    };
    let Some(id) = value.as_str() else {
      continue;
    };

    let Some(ref target) = field.options.target else {
      return Err(RecordError::Relation(field.name.clone()));
    };
    if !is_safe_identifier(target) {
      return Err(RecordError::Relation(field.name.clone()));
    }

    let exists: Option<i64> = conn
      .query_value(
        format!(r#"SELECT EXISTS(SELECT 1 FROM "{target}" WHERE id = $1)"#),
        params!(id.to_string()),
      )
      .await?;

    if exists != Some(1) {
      return Err(RecordError::Relation(field.name.clone()));
    }
  }

  return Ok(());
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::{CollectionOptions, CollectionType, FieldOptions, RuleSet};

  fn test_collection() -> Collection {
    let field = |name: &str, field_type: FieldType, required: bool| Field {
      id: format!("f_{name}"),
      collection_id: "c0".to_string(),
      name: name.to_string(),
      field_type,
      required,
      options: FieldOptions::default(),
      created_at: String::new(),
    };

    return Collection {
      id: "c0".to_string(),
      name: "posts".to_string(),
      kind: CollectionType::Base,
      options: CollectionOptions::default(),
      rules: RuleSet::default(),
      created_at: String::new(),
      updated_at: String::new(),
      fields: vec![
        field("title", FieldType::Text, true),
        field("score", FieldType::Number, false),
        field("published", FieldType::Boolean, false),
        field("released_at", FieldType::Datetime, false),
        field("meta", FieldType::Json, false),
      ],
    };
  }

  fn assert_field_error(result: Result<(), RecordError>, field: &str) {
    match result {
      Err(RecordError::Validation(errors)) => {
        assert!(
          errors.iter().any(|(f, _)| f == field),
          "expected error for {field}, got {errors:?}"
        );
      }
      other => panic!("expected validation failure, got {other:?}"),
    }
  }

  #[test]
  fn test_create_requires_required_fields() {
    let collection = test_collection();

    let data = serde_json::json!({"score": 3});
    assert_field_error(
      validate_fields(&collection, data.as_object().unwrap(), false),
      "title",
    );

    // The same patch is fine for partial updates.
    let data = serde_json::json!({"score": 3});
    assert!(validate_fields(&collection, data.as_object().unwrap(), true).is_ok());

    // But explicitly nulling a required field is not.
    let data = serde_json::json!({"title": null});
    assert_field_error(
      validate_fields(&collection, data.as_object().unwrap(), true),
      "title",
    );
  }

  #[test]
  fn test_type_checks() {
    let collection = test_collection();

    let ok = serde_json::json!({
      "title": "hello",
      "score": 1.5,
      "published": true,
      "released_at": "2026-01-01T10:00:00Z",
      "meta": {"tags": ["a"]},
    });
    assert!(validate_fields(&collection, ok.as_object().unwrap(), false).is_ok());

    let bad_bool = serde_json::json!({"title": "x", "published": "yes"});
    assert_field_error(
      validate_fields(&collection, bad_bool.as_object().unwrap(), false),
      "published",
    );

    let bad_date = serde_json::json!({"title": "x", "released_at": "not-a-date"});
    assert_field_error(
      validate_fields(&collection, bad_date.as_object().unwrap(), false),
      "released_at",
    );
  }

  #[test]
  fn test_datetime_accepts_optional_offset() {
    assert!(parse_datetime("2026-01-01T10:00:00Z"));
    assert!(parse_datetime("2026-01-01T10:00:00+02:00"));
    assert!(parse_datetime("2026-01-01T10:00:00.123"));
    assert!(parse_datetime("2026-01-01 10:00:00"));
    assert!(!parse_datetime("01/02/2026"));
  }
}
