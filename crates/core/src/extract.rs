use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;

use crate::constants::MAX_REQUEST_BODY_SIZE;
use crate::files::FileUpload;
use crate::hooks::RequestInfo;
use crate::records::RecordError;

/// A record mutation body: scalar fields plus any files separated out at the
/// multipart boundary.
#[derive(Debug, Default)]
pub(crate) struct RecordPayload {
  pub data: serde_json::Map<String, serde_json::Value>,
  pub files: Vec<FileUpload>,
}

/// Reduce the transport request to the descriptor hooks receive.
pub(crate) fn request_info(req: &Request) -> RequestInfo {
  return RequestInfo {
    method: req.method().to_string(),
    path: req.uri().path().to_string(),
    headers: req
      .headers()
      .iter()
      .map(|(name, value)| {
        return (
          name.to_string(),
          value.to_str().unwrap_or_default().to_string(),
        );
      })
      .collect(),
  };
}

/// Accept either `application/json` or `multipart/form-data`.
///
/// Multipart text parts are parsed as JSON scalars where possible (so
/// `published=true` is a boolean) and fall back to plain strings; parts with
/// a filename become [FileUpload]s.
pub(crate) async fn extract_record_payload(req: Request) -> Result<RecordPayload, RecordError> {
  let content_type = req
    .headers()
    .get(CONTENT_TYPE)
    .and_then(|value| value.to_str().ok())
    .unwrap_or_default();

  if content_type.starts_with("multipart/form-data") {
    return extract_multipart(req).await;
  }

  let bytes = axum::body::to_bytes(req.into_body(), MAX_REQUEST_BODY_SIZE)
    .await
    .map_err(|_| RecordError::BadRequest("failed to read request body"))?;

  if bytes.is_empty() {
    return Ok(RecordPayload::default());
  }

  let value: serde_json::Value =
    serde_json::from_slice(&bytes).map_err(|_| RecordError::BadRequest("invalid json body"))?;
  let serde_json::Value::Object(data) = value else {
    return Err(RecordError::BadRequest("expected a json object"));
  };

  return Ok(RecordPayload {
    data,
    files: vec![],
  });
}

async fn extract_multipart(req: Request) -> Result<RecordPayload, RecordError> {
  let mut multipart = Multipart::from_request(req, &())
    .await
    .map_err(|_| RecordError::BadRequest("invalid multipart body"))?;

  let mut payload = RecordPayload::default();

  while let Some(field) = multipart
    .next_field()
    .await
    .map_err(|_| RecordError::BadRequest("invalid multipart body"))?
  {
    let Some(name) = field.name().map(str::to_string) else {
      continue;
    };

    if let Some(original_name) = field.file_name().map(str::to_string) {
      let content_type = field.content_type().map(str::to_string);
      let data = field
        .bytes()
        .await
        .map_err(|_| RecordError::BadRequest("failed to read uploaded file"))?;

      payload.files.push(FileUpload {
        field: name,
        original_name,
        content_type,
        data: data.to_vec(),
      });
      continue;
    }

    let text = field
      .text()
      .await
      .map_err(|_| RecordError::BadRequest("invalid multipart field"))?;
    let value = serde_json::from_str::<serde_json::Value>(&text)
      .unwrap_or(serde_json::Value::String(text));
    payload.data.insert(name, value);
  }

  return Ok(payload);
}
