use axum::{
  Json,
  extract::{Path, State},
};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::AuthError;
use crate::auth::password::{hash_password, validate_password_policy};
use crate::auth::tokens::revoke_all_refresh_tokens;
use crate::auth::user::load_db_user_by_email;
use crate::auth::util::lookup_auth_collection;
use crate::auth::verification::{
  VerificationType, consume_verification_token, issue_verification_token,
};
use crate::email::Email;
use crate::schema::is_safe_identifier;
use crate::util::now_rfc3339;
use bunbase_sqlite::params;

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
  pub email: String,
}

/// Start a password reset. Unknown emails get the same success response and
/// no mail, so the endpoint is not an account oracle.
pub async fn reset_password_request_handler(
  State(state): State<AppState>,
  Path(collection_name): Path<String>,
  Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<serde_json::Value>, AuthError> {
  let collection = lookup_auth_collection(&state, &collection_name)?;

  if let Some(db_user) = load_db_user_by_email(state.conn(), &collection, &request.email).await? {
    let token = issue_verification_token(
      state.conn(),
      &db_user.id,
      &collection.name,
      VerificationType::PasswordReset,
    )
    .await?;

    let _ = state
      .mailer()
      .send(Email {
        to: db_user.email,
        subject: "Reset your password".to_string(),
        body: format!("Your password reset token: {token}"),
      })
      .await;
  }

  return Ok(Json(serde_json::json!({})));
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordConfirmRequest {
  pub token: String,
  pub password: String,
}

/// Complete a password reset: consume the token, store the new hash and
/// revoke every outstanding refresh session.
pub async fn reset_password_confirm_handler(
  State(state): State<AppState>,
  Path(collection_name): Path<String>,
  Json(request): Json<ResetPasswordConfirmRequest>,
) -> Result<Json<serde_json::Value>, AuthError> {
  let collection = lookup_auth_collection(&state, &collection_name)?;

  validate_password_policy(&request.password, collection.options.min_password_length)?;

  let consumed =
    consume_verification_token(state.conn(), &request.token, VerificationType::PasswordReset)
      .await?;
  if consumed.collection_name != collection.name {
    return Err(AuthError::BadRequest("invalid or expired token"));
  }

  let password_hash = hash_password(&request.password)?;

  assert!(is_safe_identifier(&collection.name));
  state
    .conn()
    .execute(
      format!(
        r#"UPDATE "{table}" SET password_hash = $1, updated_at = $2 WHERE id = $3"#,
        table = collection.name
      ),
      params!(password_hash, now_rfc3339(), consumed.user_id.clone()),
    )
    .await?;

  revoke_all_refresh_tokens(state.conn(), &consumed.user_id).await?;

  return Ok(Json(serde_json::json!({})));
}
