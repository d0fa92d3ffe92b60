use axum::{
  Json,
  extract::{Path, Request, State},
};
use log::*;
use rusqlite::types::Value as SqlValue;
use std::collections::HashMap;

use crate::app_state::AppState;
use crate::auth::RequestAuth;
use crate::extract::{extract_record_payload, request_info};
use crate::files::{
  FileMetadata, FileUpload, WrittenFiles, generate_filename, validate_upload,
};
use crate::hooks::{HookContext, HookEvent, RequestInfo};
use crate::records::validate::{validate_fields, validate_relations};
use crate::records::value::field_to_sql;
use crate::records::{
  Operation, RecordError, check_record_access, load_record, lookup_collection,
};
use crate::schema::{Collection, Field, FieldType};
use crate::util::{new_record_id, now_rfc3339};
use bunbase_sqlite::Params as _;

pub(crate) fn is_single_file_field(field: &Field) -> bool {
  return field.options.max_files == Some(1);
}

/// Check that every upload targets a file field and obeys the field's
/// limits. `existing_count` supplies the number of filenames kept per field
/// for the max-count check on updates.
pub(crate) fn validate_uploads(
  collection: &Collection,
  files: &[FileUpload],
  existing_count: &HashMap<String, usize>,
) -> Result<(), RecordError> {
  let mut errors: Vec<(String, String)> = vec![];
  let mut new_counts: HashMap<&str, usize> = HashMap::new();

  for upload in files {
    let Some(field) = collection.field(&upload.field) else {
      errors.push((upload.field.clone(), "unknown file field".to_string()));
      continue;
    };
    if field.field_type != FieldType::File {
      errors.push((upload.field.clone(), "not a file field".to_string()));
      continue;
    }
    if let Err(message) = validate_upload(field, upload) {
      errors.push((upload.field.clone(), message));
      continue;
    }
    *new_counts.entry(field.name.as_str()).or_default() += 1;
  }

  for (field_name, new_count) in new_counts {
    let Some(field) = collection.field(field_name) else {
      continue;
    };
    let limit = if is_single_file_field(field) {
      1
    } else {
      field.options.max_files.unwrap_or(usize::MAX)
    };
    // Single-file fields replace rather than accumulate.
    let kept = if is_single_file_field(field) {
      0
    } else {
      existing_count.get(field_name).copied().unwrap_or(0)
    };
    if kept + new_count > limit {
      errors.push((
        field_name.to_string(),
        format!("too many files, at most {limit} allowed"),
      ));
    }
  }

  if !errors.is_empty() {
    return Err(RecordError::Validation(errors));
  }
  return Ok(());
}

/// Write the uploads to the per-record directory, returning their metadata
/// and the generated filenames grouped by field. The [WrittenFiles] guard
/// cleans the files back up unless released after commit.
pub(crate) async fn write_uploads(
  state: &AppState,
  collection: &Collection,
  record_id: &str,
  files: &[FileUpload],
  written: &mut WrittenFiles,
) -> Result<(Vec<FileMetadata>, HashMap<String, Vec<String>>), RecordError> {
  let mut metadata: Vec<FileMetadata> = vec![];
  let mut by_field: HashMap<String, Vec<String>> = HashMap::new();

  for upload in files {
    let filename = generate_filename(&upload.original_name);
    state
      .files()
      .write(&collection.name, record_id, &filename, &upload.data)
      .await
      .map_err(|err| RecordError::Internal(err.into()))?;
    written.track(filename.clone());

    by_field
      .entry(upload.field.clone())
      .or_default()
      .push(filename.clone());
    metadata.push(FileMetadata {
      field: upload.field.clone(),
      filename,
      original_name: upload.original_name.clone(),
      content_type: upload.content_type.clone(),
      size: upload.data.len() as u64,
    });
  }

  return Ok((metadata, by_field));
}

/// Encode the declared fields present in `data` for storage.
pub(crate) fn serialize_declared_fields(
  collection: &Collection,
  data: &serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<(String, SqlValue)>, RecordError> {
  let mut values = vec![];
  for field in &collection.fields {
    let Some(value) = data.get(&field.name) else {
      continue;
    };
    let sql_value = field_to_sql(field.field_type, value)
      .map_err(|message| RecordError::Validation(vec![(field.name.clone(), message)]))?;
    values.push((field.name.clone(), sql_value));
  }
  return Ok(values);
}

pub(crate) fn file_metadata_insert_sql() -> &'static str {
  use crate::constants::FILES_TABLE;
  return const_format::formatcp!(
    "INSERT OR REPLACE INTO {FILES_TABLE}
       (collection, record_id, field, filename, original_name, content_type, size, created_at)
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
  );
}

/// Create a record: authorize, validate, run before-hooks, write files and
/// the row in one transaction, reload, then fire after-hooks.
pub async fn create_record(
  state: &AppState,
  collection: &Collection,
  data: serde_json::Map<String, serde_json::Value>,
  files: Vec<FileUpload>,
  auth: &RequestAuth,
  request: Option<RequestInfo>,
) -> Result<serde_json::Value, RecordError> {
  if collection.is_auth() {
    return Err(RecordError::BadRequest(
      "auth collection records are managed via the auth endpoints",
    ));
  }

  check_record_access(collection, Operation::Create, auth, None, Some(&data))?;

  validate_uploads(collection, &files, &HashMap::new())?;
  validate_fields(collection, &data, false)?;
  validate_relations(state.conn(), collection, &data).await?;

  let ctx = HookContext {
    collection: collection.name.clone(),
    data: Some(data),
    request,
    ..Default::default()
  };
  let ctx = state
    .hooks()
    .trigger(HookEvent::BeforeCreate, ctx)
    .await
    .map_err(RecordError::from)?;

  let mut data = ctx.data.unwrap_or_default();
  let request = ctx.request;

  let record_id = new_record_id();
  let now = now_rfc3339();

  let mut written = WrittenFiles::new(state.files().clone(), &collection.name, &record_id);
  let (metadata, files_by_field) =
    write_uploads(state, collection, &record_id, &files, &mut written).await?;

  // Merge generated filenames into the record. Client-passed filename values
  // carry no meaning on create and are dropped.
  for field in &collection.fields {
    if field.field_type != FieldType::File {
      continue;
    }
    match files_by_field.get(&field.name) {
      Some(filenames) if is_single_file_field(field) => {
        data.insert(
          field.name.clone(),
          serde_json::Value::String(filenames[0].clone()),
        );
      }
      Some(filenames) => {
        data.insert(field.name.clone(), serde_json::json!(filenames));
      }
      None => {
        data.remove(&field.name);
      }
    }
  }

  let mut columns: Vec<String> = vec![
    "id".to_string(),
    "created_at".to_string(),
    "updated_at".to_string(),
  ];
  let mut named: Vec<(String, SqlValue)> = vec![
    (":id".to_string(), SqlValue::Text(record_id.clone())),
    (":created_at".to_string(), SqlValue::Text(now.clone())),
    (":updated_at".to_string(), SqlValue::Text(now)),
  ];
  for (column, value) in serialize_declared_fields(collection, &data)? {
    named.push((format!(":{column}"), value));
    columns.push(column);
  }

  let insert_sql = format!(
    r#"INSERT INTO "{table}" ({columns}) VALUES ({placeholders})"#,
    table = collection.name,
    columns = columns
      .iter()
      .map(|c| format!(r#""{c}""#))
      .collect::<Vec<_>>()
      .join(", "),
    placeholders = columns
      .iter()
      .map(|c| format!(":{c}"))
      .collect::<Vec<_>>()
      .join(", "),
  );

  let collection_name = collection.name.clone();
  let meta_record_id = record_id.clone();
  state
    .conn()
    .call(move |conn| {
      let tx = conn.transaction()?;
      {
        let mut stmt = tx.prepare_cached(&insert_sql)?;
        named.bind(&mut stmt)?;
        stmt.raw_execute()?;

        for row in &metadata {
          tx.execute(
            file_metadata_insert_sql(),
            rusqlite::params![
              collection_name,
              meta_record_id,
              row.field,
              row.filename,
              row.original_name,
              row.content_type,
              row.size as i64,
              crate::util::now_rfc3339(),
            ],
          )?;
        }
      }
      tx.commit()?;
      return Ok(());
    })
    .await
    .map_err(RecordError::from)?;

  written.release();

  let record = load_record(state, collection, &record_id).await?;

  let after_ctx = HookContext {
    collection: collection.name.clone(),
    id: Some(record_id),
    record: Some(record.clone()),
    request,
    ..Default::default()
  };
  if let Err(err) = state.hooks().trigger(HookEvent::AfterCreate, after_ctx).await {
    warn!("afterCreate hook failed: {err}");
  }

  return Ok(record);
}

pub async fn create_record_handler(
  State(state): State<AppState>,
  Path(collection_name): Path<String>,
  auth: RequestAuth,
  req: Request,
) -> Result<Json<serde_json::Value>, RecordError> {
  let collection = lookup_collection(&state, &collection_name)?;

  let info = request_info(&req);
  let payload = extract_record_payload(req).await?;

  let record = create_record(
    &state,
    &collection,
    payload.data,
    payload.files,
    &auth,
    Some(info),
  )
  .await?;

  return Ok(Json(record));
}
