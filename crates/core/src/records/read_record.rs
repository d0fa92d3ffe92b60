use axum::{
  Json,
  body::Body,
  extract::{Path, RawQuery, State},
  http::header,
  response::{IntoResponse, Response},
};

use crate::app_state::AppState;
use crate::auth::RequestAuth;
use crate::files::lookup_file_content_type;
use crate::records::expand::attach_expansions;
use crate::records::query::parse_list_query;
use crate::records::update_record::filenames_of;
use crate::records::{
  Operation, RecordError, check_record_access, load_record, lookup_collection,
};
use crate::schema::{Collection, FieldType};

/// Read one record by id, evaluating the view rule against the loaded row.
pub async fn read_record(
  state: &AppState,
  collection: &Collection,
  id: &str,
  auth: &RequestAuth,
  expand: &[String],
) -> Result<serde_json::Value, RecordError> {
  let record = load_record(state, collection, id).await?;

  check_record_access(
    collection,
    Operation::View,
    auth,
    record.as_object(),
    None,
  )?;

  let mut records = [record];
  attach_expansions(state, collection, &mut records, expand).await?;
  let [record] = records;

  return Ok(record);
}

/// Serve one uploaded file. Protection follows the collection's view rule;
/// the token may arrive in the Authorization header or as `?token=`.
pub async fn download_file_handler(
  State(state): State<AppState>,
  Path((collection_name, record_id, filename)): Path<(String, String, String)>,
  auth: RequestAuth,
) -> Result<Response, RecordError> {
  let collection = lookup_collection(&state, &collection_name)?;

  let record = load_record(&state, &collection, &record_id).await?;
  check_record_access(
    &collection,
    Operation::View,
    &auth,
    record.as_object(),
    None,
  )?;

  // Only filenames actually attached to the record are servable.
  let attached = collection
    .fields
    .iter()
    .filter(|f| f.field_type == FieldType::File)
    .any(|f| {
      filenames_of(record.as_object().and_then(|m| m.get(&f.name))).contains(&filename)
    });
  if !attached {
    return Err(RecordError::NotFound);
  }

  let content_type =
    lookup_file_content_type(state.conn(), &collection.name, &record_id, &filename)
      .await
      .ok()
      .flatten()
      .unwrap_or_else(|| "application/octet-stream".to_string());

  let contents = state
    .files()
    .read(&collection.name, &record_id, &filename)
    .await
    .map_err(|_| RecordError::NotFound)?;

  return Ok(
    (
      [
        (header::CONTENT_TYPE, content_type),
        (header::CONTENT_DISPOSITION, "attachment".to_string()),
      ],
      Body::from(contents),
    )
      .into_response(),
  );
}

pub async fn read_record_handler(
  State(state): State<AppState>,
  Path((collection_name, record_id)): Path<(String, String)>,
  RawQuery(raw_query): RawQuery,
  auth: RequestAuth,
) -> Result<Json<serde_json::Value>, RecordError> {
  let collection = lookup_collection(&state, &collection_name)?;

  let query = parse_list_query(raw_query.as_deref())?;
  let record = read_record(&state, &collection, &record_id, &auth, &query.expand).await?;

  return Ok(Json(record));
}
