use std::sync::Arc;

use crate::app_state::AppState;
use crate::auth::AuthError;
use crate::auth::password::{
  check_login_rate_limit, record_failed_login, verify_password_timing_safe,
};
use crate::auth::tokens::{TokenPair, mint_token_pair};
use crate::auth::user::{Admin, User, load_admin_by_email, load_db_user_by_email};
use crate::schema::Collection;

/// Resolve `name` to an auth collection or 404.
pub(crate) fn lookup_auth_collection(
  state: &AppState,
  name: &str,
) -> Result<Arc<Collection>, AuthError> {
  let Some(collection) = state.schema().get(name) else {
    return Err(AuthError::NotFound);
  };
  if !collection.is_auth() {
    return Err(AuthError::NotFound);
  }
  return Ok(collection);
}

/// Password login against one auth collection.
///
/// Verification work happens whether or not the account exists and both
/// failure modes map onto the same generic credential error.
pub async fn login_with_password(
  state: &AppState,
  collection: &Collection,
  email: &str,
  password: &str,
) -> Result<(TokenPair, User), AuthError> {
  check_login_rate_limit(email)?;

  let db_user = load_db_user_by_email(state.conn(), collection, email).await?;

  if let Err(err) =
    verify_password_timing_safe(password, db_user.as_ref().map(|u| u.password_hash.as_str()))
  {
    record_failed_login(email);
    return Err(err);
  }

  let user = db_user
    .ok_or(AuthError::Unauthorized)?
    .into_user(collection);

  let tokens = mint_token_pair(state, &user).await?;
  return Ok((tokens, user));
}

/// Password login for admins. Same timing discipline as user login.
pub(crate) async fn admin_login_with_password(
  state: &AppState,
  email: &str,
  password: &str,
) -> Result<(String, Admin), AuthError> {
  check_login_rate_limit(email)?;

  let admin = load_admin_by_email(state.conn(), email).await?;

  if let Err(err) =
    verify_password_timing_safe(password, admin.as_ref().map(|(_, hash)| hash.as_str()))
  {
    record_failed_login(email);
    return Err(err);
  }

  let (admin, _hash) = admin.ok_or(AuthError::Unauthorized)?;

  let token = state
    .jwt()
    .encode(&crate::auth::jwt::AdminTokenClaims::new(&admin.id))
    .map_err(|err| AuthError::Internal(err.into()))?;

  return Ok((token, admin));
}
