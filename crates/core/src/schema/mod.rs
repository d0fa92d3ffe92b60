use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::*;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;

pub(crate) mod alter;
pub mod cache;
pub mod engine;

pub use cache::SchemaCache;

use crate::util::error_response;

/// Columns every user table carries.
pub const SYSTEM_COLUMNS: [&str; 3] = ["id", "created_at", "updated_at"];

/// Additional engine-generated columns of auth collections.
pub const AUTH_COLUMNS: [&str; 3] = ["email", "password_hash", "verified"];

static IDENTIFIER_RE: LazyLock<regex::Regex> =
  LazyLock::new(|| regex::Regex::new("^[A-Za-z][A-Za-z0-9_]*$").expect("const"));

/// The one gate through which collection and field names pass before ever
/// being substituted into SQL.
pub(crate) fn is_safe_identifier(name: &str) -> bool {
  return IDENTIFIER_RE.is_match(name);
}

#[derive(Debug, Error)]
pub enum SchemaError {
  #[error("Invalid identifier: {0}")]
  InvalidIdentifier(String),
  #[error("Collection not found")]
  CollectionNotFound,
  #[error("Collection already exists")]
  CollectionExists,
  #[error("Field not found")]
  FieldNotFound,
  #[error("Field already exists: {0}")]
  FieldExists(String),
  #[error("Reserved field name: {0}")]
  ReservedField(String),
  #[error("Unknown field type: {0}")]
  UnknownFieldType(String),
  #[error("Relation field requires an existing target collection")]
  MissingRelationTarget,
  #[error("Foreign key integrity check failed: {0}")]
  IntegrityCheckFailed(String),
  #[error("Sql error: {0}")]
  Sql(#[from] bunbase_sqlite::Error),
  #[error("Metadata error: {0}")]
  Metadata(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for SchemaError {
  fn from(err: rusqlite::Error) -> Self {
    return Self::Sql(err.into());
  }
}

impl IntoResponse for SchemaError {
  fn into_response(self) -> Response {
    let status = match self {
      Self::CollectionNotFound | Self::FieldNotFound => StatusCode::NOT_FOUND,
      Self::CollectionExists | Self::FieldExists(_) => StatusCode::CONFLICT,
      Self::InvalidIdentifier(_)
      | Self::ReservedField(_)
      | Self::UnknownFieldType(_)
      | Self::MissingRelationTarget
      | Self::IntegrityCheckFailed(_) => StatusCode::BAD_REQUEST,
      Self::Sql(_) | Self::Metadata(_) => {
        error!("schema: {self}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error", None);
      }
    };

    return error_response(status, &self.to_string(), None);
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
  #[default]
  Base,
  Auth,
}

impl CollectionType {
  pub fn as_str(&self) -> &'static str {
    return match self {
      Self::Base => "base",
      Self::Auth => "auth",
    };
  }

  pub fn parse(value: &str) -> Option<Self> {
    return match value {
      "base" => Some(Self::Base),
      "auth" => Some(Self::Auth),
      _ => None,
    };
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
  Text,
  Number,
  Boolean,
  Datetime,
  Json,
  Relation,
  File,
}

impl FieldType {
  pub fn as_str(&self) -> &'static str {
    return match self {
      Self::Text => "text",
      Self::Number => "number",
      Self::Boolean => "boolean",
      Self::Datetime => "datetime",
      Self::Json => "json",
      Self::Relation => "relation",
      Self::File => "file",
    };
  }

  pub fn parse(value: &str) -> Option<Self> {
    return match value {
      "text" => Some(Self::Text),
      "number" => Some(Self::Number),
      "boolean" => Some(Self::Boolean),
      "datetime" => Some(Self::Datetime),
      "json" => Some(Self::Json),
      "relation" => Some(Self::Relation),
      "file" => Some(Self::File),
      _ => None,
    };
  }

  /// SQLite storage class backing this field type.
  pub(crate) fn column_type(&self) -> &'static str {
    return match self {
      Self::Text | Self::Datetime | Self::Json | Self::Relation | Self::File => "TEXT",
      Self::Number => "REAL",
      Self::Boolean => "INTEGER",
    };
  }

  /// Literal used to backfill existing rows when a required column is added.
  pub(crate) fn default_literal(&self) -> &'static str {
    return match self {
      Self::Text | Self::Datetime | Self::Json | Self::Relation | Self::File => "''",
      Self::Number => "0",
      Self::Boolean => "0",
    };
  }
}

/// Per-field configuration. Which entries apply depends on the field type:
/// `target` for relations, the file limits for file fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldOptions {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub target: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_size: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mime_types: Option<Vec<String>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_files: Option<usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectionOptions {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub min_password_length: Option<usize>,
}

/// The five per-operation access rules.
///
/// Missing/null means admin-only, the empty string means public and anything
/// else is a rule expression evaluated per request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSet {
  pub list_rule: Option<String>,
  pub view_rule: Option<String>,
  pub create_rule: Option<String>,
  pub update_rule: Option<String>,
  pub delete_rule: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
  pub id: String,
  pub collection_id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub field_type: FieldType,
  pub required: bool,
  pub options: FieldOptions,
  pub created_at: String,
}

impl Field {
  /// Column DDL for this field. With `for_add_column` set, required columns
  /// get a type-appropriate default so existing rows remain valid.
  pub(crate) fn column_definition(&self, for_add_column: bool) -> Result<String, SchemaError> {
    if !is_safe_identifier(&self.name) {
      return Err(SchemaError::InvalidIdentifier(self.name.clone()));
    }

    let mut definition = format!(
      r#""{name}" {column_type}"#,
      name = self.name,
      column_type = self.field_type.column_type()
    );

    if self.required {
      definition.push_str(" NOT NULL");
      if for_add_column {
        definition.push_str(&format!(" DEFAULT {}", self.field_type.default_literal()));
      }
    }

    if self.field_type == FieldType::Relation {
      let Some(ref target) = self.options.target else {
        return Err(SchemaError::MissingRelationTarget);
      };
      if !is_safe_identifier(target) {
        return Err(SchemaError::InvalidIdentifier(target.clone()));
      }
      definition.push_str(&format!(r#" REFERENCES "{target}"("id")"#));
    }

    return Ok(definition);
  }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub kind: CollectionType,
  pub options: CollectionOptions,
  pub rules: RuleSet,
  pub created_at: String,
  pub updated_at: String,
  pub fields: Vec<Field>,
}

impl Collection {
  pub fn is_auth(&self) -> bool {
    return self.kind == CollectionType::Auth;
  }

  pub fn field(&self, name: &str) -> Option<&Field> {
    return self.fields.iter().find(|f| f.name == name);
  }

  /// Column names valid in filter/sort parameters and rule identifiers:
  /// system columns plus declared fields, plus the visible auth columns.
  pub fn column_whitelist(&self) -> Vec<&str> {
    let mut columns: Vec<&str> = SYSTEM_COLUMNS.to_vec();
    if self.is_auth() {
      columns.push("email");
      columns.push("verified");
    }
    columns.extend(self.fields.iter().map(|f| f.name.as_str()));
    return columns;
  }

  /// All physical columns of the backing table, in declaration order.
  pub(crate) fn table_columns(&self) -> Vec<&str> {
    let mut columns: Vec<&str> = SYSTEM_COLUMNS.to_vec();
    if self.is_auth() {
      columns.extend(AUTH_COLUMNS);
    }
    columns.extend(self.fields.iter().map(|f| f.name.as_str()));
    return columns;
  }

  /// The body of a CREATE TABLE statement for this collection's shape.
  pub(crate) fn create_table_body(&self, for_add_column: bool) -> Result<String, SchemaError> {
    let mut definitions = vec![
      r#""id" TEXT PRIMARY KEY NOT NULL"#.to_string(),
      r#""created_at" TEXT NOT NULL"#.to_string(),
      r#""updated_at" TEXT NOT NULL"#.to_string(),
    ];

    if self.is_auth() {
      definitions.push(r#""email" TEXT NOT NULL UNIQUE"#.to_string());
      definitions.push(r#""password_hash" TEXT NOT NULL"#.to_string());
      definitions.push(r#""verified" INTEGER NOT NULL DEFAULT 0"#.to_string());
    }

    for field in &self.fields {
      definitions.push(field.column_definition(for_add_column)?);
    }

    return Ok(definitions.join(",\n  "));
  }
}

/// Reserved column names a declared field may never collide with.
pub(crate) fn reserved_field_names(kind: CollectionType) -> &'static [&'static str] {
  return match kind {
    CollectionType::Base => &["id", "created_at", "updated_at"],
    CollectionType::Auth => &[
      "id",
      "created_at",
      "updated_at",
      "email",
      "password_hash",
      "verified",
    ],
  };
}
