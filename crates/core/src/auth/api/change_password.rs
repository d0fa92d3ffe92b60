use axum::{
  Json,
  extract::{Path, State},
};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::AuthError;
use crate::auth::api::login::AuthResponse;
use crate::auth::password::{hash_password, validate_password_policy, verify_password};
use crate::auth::tokens::{mint_token_pair, revoke_all_refresh_tokens};
use crate::auth::user::{User, load_db_user_by_id};
use crate::auth::util::lookup_auth_collection;
use crate::schema::is_safe_identifier;
use crate::util::now_rfc3339;
use bunbase_sqlite::params;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
  pub old_password: String,
  pub new_password: String,
}

/// Change the caller's password. All refresh sessions are revoked and a
/// fresh token pair is handed back.
pub async fn change_password_handler(
  State(state): State<AppState>,
  Path(collection_name): Path<String>,
  user: User,
  Json(request): Json<ChangePasswordRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
  let collection = lookup_auth_collection(&state, &collection_name)?;
  if user.collection_id != collection.id {
    return Err(AuthError::Forbidden);
  }

  let db_user = load_db_user_by_id(state.conn(), &collection, &user.id)
    .await?
    .ok_or(AuthError::Unauthorized)?;

  verify_password(&request.old_password, &db_user.password_hash)?;
  validate_password_policy(&request.new_password, collection.options.min_password_length)?;

  let password_hash = hash_password(&request.new_password)?;

  assert!(is_safe_identifier(&collection.name));
  state
    .conn()
    .execute(
      format!(
        r#"UPDATE "{table}" SET password_hash = $1, updated_at = $2 WHERE id = $3"#,
        table = collection.name
      ),
      params!(password_hash, now_rfc3339(), user.id.clone()),
    )
    .await?;

  revoke_all_refresh_tokens(state.conn(), &user.id).await?;

  let tokens = mint_token_pair(&state, &user).await?;
  return Ok(Json(AuthResponse::new(tokens, user)));
}
