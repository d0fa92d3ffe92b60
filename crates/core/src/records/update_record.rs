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
use crate::files::{FileUpload, WrittenFiles, delete_file_metadata};
use crate::hooks::{HookContext, HookEvent, RequestInfo};
use crate::records::create_record::{
  file_metadata_insert_sql, is_single_file_field, serialize_declared_fields, validate_uploads,
  write_uploads,
};
use crate::records::validate::{validate_fields, validate_relations};
use crate::records::{
  Operation, RecordError, check_record_access, load_record, lookup_collection,
};
use crate::schema::{Collection, FieldType};
use crate::util::now_rfc3339;
use bunbase_sqlite::Params as _;

pub(crate) fn filenames_of(value: Option<&serde_json::Value>) -> Vec<String> {
  return match value {
    Some(serde_json::Value::String(s)) if !s.is_empty() => vec![s.clone()],
    Some(serde_json::Value::Array(entries)) => entries
      .iter()
      .filter_map(|e| e.as_str())
      .map(str::to_string)
      .collect(),
    _ => vec![],
  };
}

/// Partially update a record.
///
/// File semantics: new uploads append (or replace, for single-file fields);
/// a file field present in the body acts as the explicit list of existing
/// filenames to keep, while omission keeps everything. Dropped files are
/// removed from disk after the row commits.
pub async fn update_record(
  state: &AppState,
  collection: &Collection,
  id: &str,
  data: serde_json::Map<String, serde_json::Value>,
  files: Vec<FileUpload>,
  auth: &RequestAuth,
  request: Option<RequestInfo>,
) -> Result<serde_json::Value, RecordError> {
  let existing = load_record(state, collection, id).await?;

  check_record_access(
    collection,
    Operation::Update,
    auth,
    existing.as_object(),
    Some(&data),
  )?;

  // Validators are built from only the fields present in the patch.
  validate_fields(collection, &data, true)?;
  validate_relations(state.conn(), collection, &data).await?;

  let kept_counts: HashMap<String, usize> = collection
    .fields
    .iter()
    .filter(|f| f.field_type == FieldType::File)
    .map(|f| {
      let old = filenames_of(existing.as_object().and_then(|m| m.get(&f.name)));
      let kept = match data.get(&f.name) {
        Some(value) => filenames_of(Some(value))
          .into_iter()
          .filter(|name| old.contains(name))
          .count(),
        None => old.len(),
      };
      return (f.name.clone(), kept);
    })
    .collect();
  validate_uploads(collection, &files, &kept_counts)?;

  let ctx = HookContext {
    collection: collection.name.clone(),
    id: Some(id.to_string()),
    data: Some(data),
    existing: Some(existing.clone()),
    request,
    ..Default::default()
  };
  let ctx = state
    .hooks()
    .trigger(HookEvent::BeforeUpdate, ctx)
    .await
    .map_err(RecordError::from)?;

  let mut data = ctx.data.unwrap_or_default();
  let request = ctx.request;

  let mut written = WrittenFiles::new(state.files().clone(), &collection.name, id);
  let (metadata, files_by_field) =
    write_uploads(state, collection, id, &files, &mut written).await?;

  // Resolve the final filename list per file field and remember what got
  // dropped.
  let mut removed: Vec<String> = vec![];
  for field in &collection.fields {
    if field.field_type != FieldType::File {
      continue;
    }

    let old = filenames_of(existing.as_object().and_then(|m| m.get(&field.name)));
    let explicitly_kept = match data.get(&field.name) {
      // Only previously attached filenames can be kept.
      Some(value) => Some(
        filenames_of(Some(value))
          .into_iter()
          .filter(|name| old.contains(name))
          .collect::<Vec<_>>(),
      ),
      None => None,
    };
    let new = files_by_field.get(&field.name).cloned().unwrap_or_default();

    if explicitly_kept.is_none() && new.is_empty() {
      // Untouched field.
      continue;
    }

    let mut kept = explicitly_kept.unwrap_or_else(|| old.clone());
    let final_list: Vec<String> = if is_single_file_field(field) {
      match new.last() {
        Some(latest) => vec![latest.clone()],
        None => kept.drain(..).take(1).collect(),
      }
    } else {
      kept.into_iter().chain(new).collect()
    };

    removed.extend(old.iter().filter(|name| !final_list.contains(name)).cloned());

    let value = if is_single_file_field(field) {
      match final_list.first() {
        Some(name) => serde_json::Value::String(name.clone()),
        None => serde_json::Value::Null,
      }
    } else {
      serde_json::json!(final_list)
    };
    data.insert(field.name.clone(), value);
  }

  let now = now_rfc3339();
  let mut assignments: Vec<String> = vec![r#""updated_at" = :updated_at"#.to_string()];
  let mut named: Vec<(String, SqlValue)> = vec![
    (":updated_at".to_string(), SqlValue::Text(now)),
    (":id".to_string(), SqlValue::Text(id.to_string())),
  ];
  for (column, value) in serialize_declared_fields(collection, &data)? {
    assignments.push(format!(r#""{column}" = :{column}"#));
    named.push((format!(":{column}"), value));
  }

  let update_sql = format!(
    r#"UPDATE "{table}" SET {assignments} WHERE id = :id"#,
    table = collection.name,
    assignments = assignments.join(", "),
  );

  let collection_name = collection.name.clone();
  let meta_record_id = id.to_string();
  let affected = state
    .conn()
    .call(move |conn| {
      let tx = conn.transaction()?;
      let affected = {
        let mut stmt = tx.prepare_cached(&update_sql)?;
        named.bind(&mut stmt)?;
        let affected = stmt.raw_execute()?;

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
        affected
      };
      tx.commit()?;
      return Ok(affected);
    })
    .await
    .map_err(RecordError::from)?;

  if affected == 0 {
    return Err(RecordError::NotFound);
  }

  written.release();

  // Dropped files disappear best-effort after the commit.
  if !removed.is_empty() {
    let _ = delete_file_metadata(state.conn(), &collection.name, id, Some(&removed)).await;
    for filename in &removed {
      if let Err(err) = state.files().remove_file(&collection.name, id, filename).await {
        warn!("Failed to remove detached file: {err}");
      }
    }
  }

  let record = load_record(state, collection, id).await?;

  let after_ctx = HookContext {
    collection: collection.name.clone(),
    id: Some(id.to_string()),
    record: Some(record.clone()),
    request,
    ..Default::default()
  };
  if let Err(err) = state.hooks().trigger(HookEvent::AfterUpdate, after_ctx).await {
    warn!("afterUpdate hook failed: {err}");
  }

  return Ok(record);
}

pub async fn update_record_handler(
  State(state): State<AppState>,
  Path((collection_name, record_id)): Path<(String, String)>,
  auth: RequestAuth,
  req: Request,
) -> Result<Json<serde_json::Value>, RecordError> {
  let collection = lookup_collection(&state, &collection_name)?;

  let info = request_info(&req);
  let payload = extract_record_payload(req).await?;

  let record = update_record(
    &state,
    &collection,
    &record_id,
    payload.data,
    payload.files,
    &auth,
    Some(info),
  )
  .await?;

  return Ok(Json(record));
}
