use axum::{
  extract::{Path, Request, State},
  http::StatusCode,
};
use log::*;

use crate::app_state::AppState;
use crate::auth::RequestAuth;
use crate::extract::request_info;
use crate::hooks::{HookContext, HookEvent, RequestInfo};
use crate::records::{
  Operation, RecordError, check_record_access, load_record, lookup_collection,
};
use crate::schema::Collection;
use bunbase_sqlite::params;

/// Delete one record. The core's built-in after-delete hooks take care of
/// the per-record file directory and the realtime broadcast.
pub async fn delete_record(
  state: &AppState,
  collection: &Collection,
  id: &str,
  auth: &RequestAuth,
  request: Option<RequestInfo>,
) -> Result<(), RecordError> {
  let existing = load_record(state, collection, id).await?;

  check_record_access(
    collection,
    Operation::Delete,
    auth,
    existing.as_object(),
    None,
  )?;

  let ctx = HookContext {
    collection: collection.name.clone(),
    id: Some(id.to_string()),
    existing: Some(existing),
    request,
    ..Default::default()
  };
  let ctx = state
    .hooks()
    .trigger(HookEvent::BeforeDelete, ctx)
    .await
    .map_err(RecordError::from)?;
  let request = ctx.request;

  let affected = state
    .conn()
    .execute(
      format!(
        r#"DELETE FROM "{table}" WHERE id = $1"#,
        table = collection.name
      ),
      params!(id.to_string()),
    )
    .await?;
  if affected == 0 {
    return Err(RecordError::NotFound);
  }

  let after_ctx = HookContext {
    collection: collection.name.clone(),
    id: Some(id.to_string()),
    request,
    ..Default::default()
  };
  if let Err(err) = state.hooks().trigger(HookEvent::AfterDelete, after_ctx).await {
    warn!("afterDelete hook failed: {err}");
  }

  return Ok(());
}

pub async fn delete_record_handler(
  State(state): State<AppState>,
  Path((collection_name, record_id)): Path<(String, String)>,
  auth: RequestAuth,
  req: Request,
) -> Result<StatusCode, RecordError> {
  let collection = lookup_collection(&state, &collection_name)?;

  let info = request_info(&req);
  delete_record(&state, &collection, &record_id, &auth, Some(info)).await?;

  return Ok(StatusCode::NO_CONTENT);
}
