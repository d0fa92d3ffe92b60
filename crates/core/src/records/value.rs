use rusqlite::types::Value as SqlValue;

use crate::schema::{Collection, FieldType};
use bunbase_sqlite::Row;

/// Storage encoding for one declared field: JSON values map onto SQLite
/// storage classes, with booleans as 0/1 and json documents stringified.
pub(crate) fn field_to_sql(
  field_type: FieldType,
  value: &serde_json::Value,
) -> Result<SqlValue, String> {
  if value.is_null() {
    return Ok(SqlValue::Null);
  }

  return match field_type {
    FieldType::Text | FieldType::Datetime | FieldType::Relation => match value.as_str() {
      Some(s) => Ok(SqlValue::Text(s.to_string())),
      None => Err("expected a string".to_string()),
    },
    FieldType::Number => match value.as_f64() {
      Some(n) => Ok(SqlValue::Real(n)),
      None => Err("expected a number".to_string()),
    },
    FieldType::Boolean => match value.as_bool() {
      Some(b) => Ok(SqlValue::Integer(b as i64)),
      None => Err("expected a boolean".to_string()),
    },
    FieldType::Json => {
      serde_json::to_string(value).map(SqlValue::Text).map_err(|err| err.to_string())
    }
    FieldType::File => match value {
      serde_json::Value::String(s) => Ok(SqlValue::Text(s.clone())),
      serde_json::Value::Array(_) => {
        serde_json::to_string(value).map(SqlValue::Text).map_err(|err| err.to_string())
      }
      _ => Err("expected a filename or list of filenames".to_string()),
    },
  };
}

/// Inverse of [field_to_sql]: decode a stored column back into its JSON
/// shape.
pub(crate) fn sql_to_field(field_type: FieldType, value: &SqlValue) -> serde_json::Value {
  return match (field_type, value) {
    (_, SqlValue::Null) => serde_json::Value::Null,
    (FieldType::Boolean, SqlValue::Integer(i)) => serde_json::Value::Bool(*i != 0),
    (FieldType::Number, SqlValue::Real(r)) => number_value(*r),
    (FieldType::Number, SqlValue::Integer(i)) => serde_json::Value::from(*i),
    (FieldType::Json, SqlValue::Text(text)) => {
      serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.clone()))
    }
    (FieldType::File, SqlValue::Text(text)) => {
      // Single filename or a JSON list of filenames.
      if text.starts_with('[') {
        serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.clone()))
      } else {
        serde_json::Value::String(text.clone())
      }
    }
    (_, SqlValue::Text(text)) => serde_json::Value::String(text.clone()),
    (_, SqlValue::Integer(i)) => serde_json::Value::from(*i),
    (_, SqlValue::Real(r)) => number_value(*r),
    (_, SqlValue::Blob(_)) => serde_json::Value::Null,
  };
}

/// REAL columns normalize integral inputs to floats; undo that for JSON
/// output so `10` round-trips as `10`.
fn number_value(value: f64) -> serde_json::Value {
  if value.fract() == 0.0 && value.abs() < (i64::MAX as f64) {
    return serde_json::Value::from(value as i64);
  }
  return serde_json::Number::from_f64(value)
    .map(serde_json::Value::Number)
    .unwrap_or(serde_json::Value::Null);
}

/// Decode a full row into the public record shape. The password hash of auth
/// collections is never included.
pub(crate) fn row_to_record(collection: &Collection, row: &Row) -> serde_json::Value {
  let mut record = serde_json::Map::new();

  for idx in 0..row.column_count() {
    let Some(name) = row.column_name(idx) else {
      continue;
    };
    let Some(value) = row.get_value(idx) else {
      continue;
    };

    let json = match name {
      "password_hash" => continue,
      "id" | "created_at" | "updated_at" | "email" => match value {
        SqlValue::Text(text) => serde_json::Value::String(text.clone()),
        _ => serde_json::Value::Null,
      },
      "verified" if collection.is_auth() => match value {
        SqlValue::Integer(i) => serde_json::Value::Bool(*i != 0),
        _ => serde_json::Value::Bool(false),
      },
      name => match collection.field(name) {
        Some(field) => sql_to_field(field.field_type, value),
        // Column without metadata, e.g. mid-migration. Skip.
        None => continue,
      },
    };

    record.insert(name.to_string(), json);
  }

  return serde_json::Value::Object(record);
}
