use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::*;
use thiserror::Error;

use crate::hooks::HookError;
use crate::util::error_response;

/// Publicly visible errors of the record APIs.
///
/// Deliberately opaque and kept close to HTTP error codes to avoid leaking
/// internals. NOTE: mappings from other subsystems are explicit, not #from.
#[derive(Debug, Error)]
pub enum RecordError {
  #[error("Not Found")]
  NotFound,
  #[error("Unauthorized")]
  Unauthorized,
  #[error("Forbidden")]
  Forbidden,
  #[error("Conflict")]
  Conflict,
  #[error("Bad request: {0}")]
  BadRequest(&'static str),
  /// Field-level validation failures: `(field, message)` pairs.
  #[error("Validation failed")]
  Validation(Vec<(String, String)>),
  /// A relation value does not resolve to an existing record.
  #[error("Invalid relation: {0}")]
  Relation(String),
  /// A before-hook rejected the operation; carries the thrown message.
  #[error("{0}")]
  Hook(String),
  #[error("Internal: {0}")]
  Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl From<bunbase_sqlite::Error> for RecordError {
  fn from(err: bunbase_sqlite::Error) -> Self {
    return match err {
      bunbase_sqlite::Error::Rusqlite(err) => match err {
        rusqlite::Error::QueryReturnedNoRows => Self::NotFound,
        rusqlite::Error::SqliteFailure(err, _msg) => {
          // https://www.sqlite.org/rescode.html
          match err.extended_code {
            1555 | 2067 => Self::Conflict,
            787 => Self::BadRequest("db constraint: fk"),
            1299 => Self::BadRequest("db constraint: not null"),
            275 => Self::BadRequest("db constraint: check"),
            3091 => Self::BadRequest("db constraint: data type"),
            _ => Self::Internal(err.into()),
          }
        }
        _ => Self::Internal(err.into()),
      },
      err => Self::Internal(err.into()),
    };
  }
}

impl From<HookError> for RecordError {
  fn from(err: HookError) -> Self {
    return match err {
      HookError::Rejected(message) => Self::Hook(message),
      HookError::Internal(err) => Self::Internal(err),
    };
  }
}

impl IntoResponse for RecordError {
  fn into_response(self) -> Response {
    let field_data = |fields: &[(String, String)], code: &str| -> serde_json::Value {
      let map: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .map(|(field, message)| {
          return (
            field.clone(),
            serde_json::json!({"code": code, "message": message}),
          );
        })
        .collect();
      return serde_json::Value::Object(map);
    };

    return match self {
      Self::NotFound => error_response(StatusCode::NOT_FOUND, "Not Found", None),
      Self::Unauthorized => error_response(StatusCode::UNAUTHORIZED, "Unauthorized", None),
      Self::Forbidden => error_response(StatusCode::FORBIDDEN, "Forbidden", None),
      Self::Conflict => error_response(StatusCode::CONFLICT, "Conflict", None),
      Self::BadRequest(msg) => error_response(StatusCode::BAD_REQUEST, msg, None),
      Self::Validation(ref fields) => error_response(
        StatusCode::BAD_REQUEST,
        "Validation failed",
        Some(field_data(fields, "validation_invalid")),
      ),
      Self::Relation(ref field) => error_response(
        StatusCode::BAD_REQUEST,
        "Invalid relation",
        Some(field_data(
          &[(field.clone(), "does not resolve to an existing record".to_string())],
          "relation_invalid",
        )),
      ),
      Self::Hook(ref message) => error_response(StatusCode::BAD_REQUEST, message, None),
      Self::Internal(ref err) => {
        error!("records: {err}");
        let message = if crate::server::dev_mode() {
          err.to_string()
        } else {
          "internal error".to_string()
        };
        error_response(StatusCode::INTERNAL_SERVER_ERROR, &message, None)
      }
    };
  }
}

impl From<crate::auth::AuthError> for RecordError {
  fn from(err: crate::auth::AuthError) -> Self {
    return match err {
      crate::auth::AuthError::Unauthorized | crate::auth::AuthError::RefreshRevoked => {
        Self::Unauthorized
      }
      crate::auth::AuthError::Forbidden => Self::Forbidden,
      crate::auth::AuthError::NotFound => Self::NotFound,
      crate::auth::AuthError::Conflict => Self::Conflict,
      crate::auth::AuthError::BadRequest(msg) => Self::BadRequest(msg),
      err => Self::Internal(err.to_string().into()),
    };
  }
}
