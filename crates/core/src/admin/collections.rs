use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use log::*;
use serde::Deserialize;
use std::sync::Arc;

use crate::app_state::AppState;
use crate::auth::user::Admin;
use crate::constants::FILES_TABLE;
use crate::schema::engine::{self, CollectionSpec, FieldPatch, FieldSpec};
use crate::schema::{Collection, CollectionOptions, RuleSet, SchemaError};
use bunbase_sqlite::params;
use const_format::formatcp;

fn lookup(state: &AppState, name: &str) -> Result<Arc<Collection>, SchemaError> {
  return state.schema().get(name).ok_or(SchemaError::CollectionNotFound);
}

pub async fn list_collections_handler(
  State(state): State<AppState>,
  _admin: Admin,
) -> Json<Vec<Collection>> {
  let collections = state
    .schema()
    .list()
    .iter()
    .map(|c| (**c).clone())
    .collect();
  return Json(collections);
}

pub async fn get_collection_handler(
  State(state): State<AppState>,
  Path(name): Path<String>,
  _admin: Admin,
) -> Result<Json<Collection>, SchemaError> {
  return Ok(Json((*lookup(&state, &name)?).clone()));
}

pub async fn create_collection_handler(
  State(state): State<AppState>,
  _admin: Admin,
  Json(spec): Json<CollectionSpec>,
) -> Result<(StatusCode, Json<Collection>), SchemaError> {
  let collection = engine::create_collection(state.conn(), spec).await?;
  state.schema().rebuild(state.conn()).await?;

  return Ok((StatusCode::CREATED, Json(collection)));
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCollectionRequest {
  pub rules: Option<RuleSet>,
  pub options: Option<CollectionOptions>,
}

pub async fn update_collection_handler(
  State(state): State<AppState>,
  Path(name): Path<String>,
  _admin: Admin,
  Json(request): Json<UpdateCollectionRequest>,
) -> Result<Json<Collection>, SchemaError> {
  let collection = lookup(&state, &name)?;

  engine::update_collection_metadata(state.conn(), &collection, request.rules, request.options)
    .await?;
  state.schema().rebuild(state.conn()).await?;

  return Ok(Json((*lookup(&state, &name)?).clone()));
}

pub async fn delete_collection_handler(
  State(state): State<AppState>,
  Path(name): Path<String>,
  _admin: Admin,
) -> Result<StatusCode, SchemaError> {
  let collection = lookup(&state, &name)?;

  engine::drop_collection(state.conn(), &collection).await?;
  state.schema().rebuild(state.conn()).await?;

  // The table is gone; its file tree and metadata go with it.
  const QUERY: &str = formatcp!("DELETE FROM {FILES_TABLE} WHERE collection = $1");
  if let Err(err) = state.conn().execute(QUERY, params!(name.clone())).await {
    warn!("Failed to drop file metadata for {name}: {err}");
  }
  if let Err(err) = state.files().remove_collection_dir(&name).await {
    warn!("Failed to drop file tree for {name}: {err}");
  }

  return Ok(StatusCode::NO_CONTENT);
}

pub async fn add_field_handler(
  State(state): State<AppState>,
  Path(name): Path<String>,
  _admin: Admin,
  Json(spec): Json<FieldSpec>,
) -> Result<Json<Collection>, SchemaError> {
  let collection = lookup(&state, &name)?;

  engine::add_field(state.conn(), &collection, spec).await?;
  state.schema().rebuild(state.conn()).await?;

  return Ok(Json((*lookup(&state, &name)?).clone()));
}

pub async fn update_field_handler(
  State(state): State<AppState>,
  Path((name, field)): Path<(String, String)>,
  _admin: Admin,
  Json(patch): Json<FieldPatch>,
) -> Result<Json<Collection>, SchemaError> {
  let collection = lookup(&state, &name)?;

  engine::update_field(state.conn(), &collection, &field, patch).await?;
  state.schema().rebuild(state.conn()).await?;

  return Ok(Json((*lookup(&state, &name)?).clone()));
}

pub async fn drop_field_handler(
  State(state): State<AppState>,
  Path((name, field)): Path<(String, String)>,
  _admin: Admin,
) -> Result<Json<Collection>, SchemaError> {
  let collection = lookup(&state, &name)?;

  engine::drop_field(state.conn(), &collection, &field).await?;
  state.schema().rebuild(state.conn()).await?;

  return Ok(Json((*lookup(&state, &name)?).clone()));
}
