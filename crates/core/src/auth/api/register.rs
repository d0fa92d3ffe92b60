use axum::{
  Json,
  extract::{Path, State},
};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::AuthError;
use crate::auth::password::{hash_password, validate_password_policy};
use crate::auth::user::{User, load_db_user_by_id};
use crate::auth::util::lookup_auth_collection;
use crate::auth::verification::{VerificationType, issue_verification_token};
use crate::email::Email;
use crate::schema::is_safe_identifier;
use crate::util::{new_record_id, now_rfc3339};
use bunbase_sqlite::params;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
  pub email: String,
  pub password: String,
  #[serde(default)]
  pub password_repeat: Option<String>,
}

pub async fn register_handler(
  State(state): State<AppState>,
  Path(collection_name): Path<String>,
  Json(request): Json<RegisterRequest>,
) -> Result<Json<User>, AuthError> {
  let collection = lookup_auth_collection(&state, &collection_name)?;

  let email = request.email.trim().to_lowercase();
  if !email.contains('@') || email.len() < 3 {
    return Err(AuthError::BadRequest("Invalid email"));
  }
  if let Some(ref repeat) = request.password_repeat
    && *repeat != request.password
  {
    return Err(AuthError::BadRequest("Passwords don't match"));
  }
  validate_password_policy(&request.password, collection.options.min_password_length)?;

  let password_hash = hash_password(&request.password)?;

  assert!(is_safe_identifier(&collection.name));
  let user_id = new_record_id();
  let now = now_rfc3339();

  state
    .conn()
    .execute(
      format!(
        r#"INSERT INTO "{table}" (id, created_at, updated_at, email, password_hash, verified)
           VALUES ($1, $2, $3, $4, $5, 0)"#,
        table = collection.name
      ),
      params!(user_id.clone(), now.clone(), now, email.clone(), password_hash),
    )
    .await
    // A unique-email violation surfaces as Conflict.
    .map_err(AuthError::from)?;

  let token =
    issue_verification_token(state.conn(), &user_id, &collection.name, VerificationType::EmailVerification)
      .await?;
  let _ = state
    .mailer()
    .send(Email {
      to: email,
      subject: "Verify your email".to_string(),
      body: format!("Your verification token: {token}"),
    })
    .await;

  let db_user = load_db_user_by_id(state.conn(), &collection, &user_id)
    .await?
    .ok_or_else(|| AuthError::Internal("registered user vanished".into()))?;

  return Ok(Json(db_user.into_user(&collection)));
}
