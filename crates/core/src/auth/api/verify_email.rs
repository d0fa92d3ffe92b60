use axum::{
  Json,
  extract::{Path, State},
};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::AuthError;
use crate::auth::user::load_db_user_by_email;
use crate::auth::util::lookup_auth_collection;
use crate::auth::verification::{
  VerificationType, consume_verification_token, issue_verification_token,
};
use crate::email::Email;
use crate::schema::is_safe_identifier;
use bunbase_sqlite::params;

#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
  pub email: String,
}

/// Trigger (or re-trigger) the email verification flow. Always responds with
/// success so account existence cannot be probed.
pub async fn request_verification_handler(
  State(state): State<AppState>,
  Path(collection_name): Path<String>,
  Json(request): Json<VerifyEmailRequest>,
) -> Result<Json<serde_json::Value>, AuthError> {
  let collection = lookup_auth_collection(&state, &collection_name)?;

  if let Some(db_user) =
    load_db_user_by_email(state.conn(), &collection, &request.email).await?
    && !db_user.verified
  {
    let token = issue_verification_token(
      state.conn(),
      &db_user.id,
      &collection.name,
      VerificationType::EmailVerification,
    )
    .await?;

    let _ = state
      .mailer()
      .send(Email {
        to: db_user.email,
        subject: "Verify your email".to_string(),
        body: format!("Your verification token: {token}"),
      })
      .await;
  }

  return Ok(Json(serde_json::json!({})));
}

#[derive(Debug, Deserialize)]
pub struct ConfirmVerificationRequest {
  pub token: String,
}

pub async fn confirm_verification_handler(
  State(state): State<AppState>,
  Path(collection_name): Path<String>,
  Json(request): Json<ConfirmVerificationRequest>,
) -> Result<Json<serde_json::Value>, AuthError> {
  let collection = lookup_auth_collection(&state, &collection_name)?;

  let consumed = consume_verification_token(
    state.conn(),
    &request.token,
    VerificationType::EmailVerification,
  )
  .await?;
  if consumed.collection_name != collection.name {
    return Err(AuthError::BadRequest("invalid or expired token"));
  }

  assert!(is_safe_identifier(&collection.name));
  state
    .conn()
    .execute(
      format!(
        r#"UPDATE "{table}" SET verified = 1 WHERE id = $1"#,
        table = collection.name
      ),
      params!(consumed.user_id),
    )
    .await?;

  return Ok(Json(serde_json::json!({})));
}
