use axum::{
  Json,
  extract::{Path, RawQuery, State},
};
use serde::Serialize;

use crate::app_state::AppState;
use crate::auth::RequestAuth;
use crate::records::expand::attach_expansions;
use crate::records::query::{ListQuery, build_list_query, parse_list_query};
use crate::records::value::row_to_record;
use crate::records::{Operation, RecordError, check_record_access, lookup_collection};
use crate::schema::Collection;

/// JSON response of a list operation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
  pub page: u64,
  pub per_page: u64,
  pub total_items: u64,
  pub total_pages: u64,
  pub items: Vec<serde_json::Value>,
}

/// List records: rule pre-check, then data + count queries built from the
/// whitelisted filter/sort parameters, with optional relation expansion.
pub async fn list_records(
  state: &AppState,
  collection: &Collection,
  query: ListQuery,
  auth: &RequestAuth,
) -> Result<ListResponse, RecordError> {
  // The list rule is a pre-check: it sees the caller but no record.
  check_record_access(collection, Operation::List, auth, None, None)?;

  let built = build_list_query(collection, &query)?;

  let total_items: u64 = state
    .conn()
    .query_value::<i64>(built.count_sql, built.params.clone())
    .await?
    .unwrap_or(0)
    .max(0) as u64;

  let rows = state.conn().query_rows(built.data_sql, built.params).await?;
  let mut items: Vec<serde_json::Value> = rows
    .iter()
    .map(|row| row_to_record(collection, row))
    .collect();

  attach_expansions(state, collection, &mut items, &query.expand).await?;

  return Ok(ListResponse {
    page: query.page,
    per_page: query.per_page,
    total_items,
    total_pages: total_items.div_ceil(query.per_page.max(1)),
    items,
  });
}

pub async fn list_records_handler(
  State(state): State<AppState>,
  Path(collection_name): Path<String>,
  RawQuery(raw_query): RawQuery,
  auth: RequestAuth,
) -> Result<Json<ListResponse>, RecordError> {
  let collection = lookup_collection(&state, &collection_name)?;

  let query = parse_list_query(raw_query.as_deref())?;
  let response = list_records(&state, &collection, query, &auth).await?;

  return Ok(Json(response));
}
