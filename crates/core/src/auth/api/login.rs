use axum::{
  Json,
  extract::{Path, State},
};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::AuthError;
use crate::auth::tokens::TokenPair;
use crate::auth::user::User;
use crate::auth::util::{login_with_password, lookup_auth_collection};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
  pub email: String,
  pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
  pub token: String,
  pub refresh_token: String,
  pub user: User,
}

impl AuthResponse {
  pub(crate) fn new(tokens: TokenPair, user: User) -> Self {
    return AuthResponse {
      token: tokens.token,
      refresh_token: tokens.refresh_token,
      user,
    };
  }
}

pub async fn login_handler(
  State(state): State<AppState>,
  Path(collection_name): Path<String>,
  Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
  let collection = lookup_auth_collection(&state, &collection_name)?;

  let (tokens, user) =
    login_with_password(&state, &collection, &request.email, &request.password).await?;

  return Ok(Json(AuthResponse::new(tokens, user)));
}
