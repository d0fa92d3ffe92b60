use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::*;
use thiserror::Error;

use crate::util::error_response;

/// Publicly visible errors of the auth APIs.
///
/// Deliberately opaque and close to HTTP error codes to avoid leaking
/// internals. NOTE: Do not use thiserror's #from across subsystem
/// boundaries, all mappings should be explicit.
#[derive(Debug, Error)]
pub enum AuthError {
  #[error("Unauthorized")]
  Unauthorized,
  #[error("refresh token revoked")]
  RefreshRevoked,
  #[error("Forbidden")]
  Forbidden,
  #[error("Conflict")]
  Conflict,
  #[error("Not Found")]
  NotFound,
  #[error("Too Many Requests")]
  TooManyRequests,
  #[error("Bad request: {0}")]
  BadRequest(&'static str),
  #[error("Internal: {0}")]
  Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl From<bunbase_sqlite::Error> for AuthError {
  fn from(err: bunbase_sqlite::Error) -> Self {
    return match err {
      bunbase_sqlite::Error::Rusqlite(err) => match err {
        rusqlite::Error::QueryReturnedNoRows => Self::NotFound,
        rusqlite::Error::SqliteFailure(err, _msg) => match err.extended_code {
          // https://www.sqlite.org/rescode.html
          1555 | 2067 => Self::Conflict,
          787 => Self::BadRequest("db constraint: fk"),
          1299 => Self::BadRequest("db constraint: not null"),
          _ => Self::Internal(err.into()),
        },
        _ => Self::Internal(err.into()),
      },
      err => Self::Internal(err.into()),
    };
  }
}

impl IntoResponse for AuthError {
  fn into_response(self) -> Response {
    let (status, message) = match self {
      Self::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
      Self::RefreshRevoked => (StatusCode::UNAUTHORIZED, self.to_string()),
      Self::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
      Self::Conflict => (StatusCode::CONFLICT, self.to_string()),
      Self::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
      Self::TooManyRequests => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
      Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.to_string()),
      Self::Internal(ref err) => {
        error!("auth: {err}");
        let message = if crate::server::dev_mode() {
          err.to_string()
        } else {
          "internal error".to_string()
        };
        (StatusCode::INTERNAL_SERVER_ERROR, message)
      }
    };

    return error_response(status, &message, None);
  }
}
