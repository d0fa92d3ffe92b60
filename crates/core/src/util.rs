use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::Response;
use base64::prelude::*;
use chrono::SecondsFormat;
use uuid::Uuid;

/// Generate a new opaque record id: url-safe base64 of a time-ordered UUIDv7.
pub fn new_record_id() -> String {
  return BASE64_URL_SAFE_NO_PAD.encode(Uuid::now_v7().into_bytes());
}

/// Current wall-clock time as RFC3339 with microsecond precision.
///
/// Microseconds keep `updated_at` strictly monotonic for back-to-back writes
/// within the same request burst.
pub fn now_rfc3339() -> String {
  return chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
}

#[inline]
pub(crate) fn get_header<'a>(headers: &'a HeaderMap, header_name: &str) -> Option<&'a str> {
  if let Some(header) = headers.get(header_name) {
    return header.to_str().ok();
  }
  return None;
}

/// Uniform JSON error body: `{code, message, data}` with `data` mapping field
/// names to `{code, message}` pairs.
pub(crate) fn error_response(
  status: StatusCode,
  message: &str,
  data: Option<serde_json::Value>,
) -> Response {
  let body = serde_json::json!({
    "code": status.as_u16(),
    "message": message,
    "data": data.unwrap_or_else(|| serde_json::json!({})),
  });

  return Response::builder()
    .status(status)
    .header(axum::http::header::CONTENT_TYPE, "application/json")
    .body(axum::body::Body::from(body.to_string()))
    .unwrap_or_default();
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_record_ids_are_unique_and_sortable() {
    let first = new_record_id();
    let second = new_record_id();
    assert_ne!(first, second);
    assert_eq!(first.len(), 22);
  }

  #[test]
  fn test_now_rfc3339_round_trips() {
    let now = now_rfc3339();
    assert!(chrono::DateTime::parse_from_rfc3339(&now).is_ok());
  }
}
