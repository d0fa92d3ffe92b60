use axum::{
  Json,
  extract::{Path, State},
};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::AuthError;
use crate::auth::api::login::AuthResponse;
use crate::auth::tokens::rotate_refresh_token;
use crate::auth::util::lookup_auth_collection;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
  pub refresh_token: String,
}

pub async fn refresh_handler(
  State(state): State<AppState>,
  Path(collection_name): Path<String>,
  Json(request): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
  let collection = lookup_auth_collection(&state, &collection_name)?;

  let (tokens, user) = rotate_refresh_token(&state, &request.refresh_token).await?;
  if user.collection_id != collection.id {
    // The token rotated fine but belongs to a sibling auth collection.
    return Err(AuthError::Unauthorized);
  }

  return Ok(Json(AuthResponse::new(tokens, user)));
}
