use axum::{Json, extract::State};
use const_format::formatcp;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::AuthError;
use crate::auth::password::{hash_password, validate_password_policy, verify_password};
use crate::auth::user::Admin;
use crate::auth::util::admin_login_with_password;
use crate::constants::ADMINS_TABLE;
use crate::util::now_rfc3339;
use bunbase_sqlite::params;

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
  pub email: String,
  pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AdminLoginResponse {
  pub token: String,
  pub admin: Admin,
}

pub async fn admin_login_handler(
  State(state): State<AppState>,
  Json(request): Json<AdminLoginRequest>,
) -> Result<Json<AdminLoginResponse>, AuthError> {
  let (token, admin) =
    admin_login_with_password(&state, &request.email, &request.password).await?;
  return Ok(Json(AdminLoginResponse { token, admin }));
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminChangePasswordRequest {
  pub old_password: String,
  pub new_password: String,
}

pub async fn admin_change_password_handler(
  State(state): State<AppState>,
  admin: Admin,
  Json(request): Json<AdminChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, AuthError> {
  const LOOKUP_QUERY: &str =
    formatcp!("SELECT password_hash FROM {ADMINS_TABLE} WHERE id = $1");

  let stored_hash: Option<String> = state
    .conn()
    .query_value(LOOKUP_QUERY, params!(admin.id.clone()))
    .await?;
  let stored_hash = stored_hash.ok_or(AuthError::Unauthorized)?;

  verify_password(&request.old_password, &stored_hash)?;
  validate_password_policy(&request.new_password, None)?;

  const UPDATE_QUERY: &str = formatcp!(
    "UPDATE {ADMINS_TABLE} SET password_hash = $1, updated_at = $2 WHERE id = $3"
  );
  state
    .conn()
    .execute(
      UPDATE_QUERY,
      params!(
        hash_password(&request.new_password)?,
        now_rfc3339(),
        admin.id
      ),
    )
    .await?;

  return Ok(Json(serde_json::json!({})));
}

pub async fn admin_me_handler(admin: Admin) -> Json<Admin> {
  return Json(admin);
}
