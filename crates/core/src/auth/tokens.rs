use const_format::formatcp;
use serde::Serialize;

use crate::app_state::AppState;
use crate::auth::AuthError;
use crate::auth::jwt::UserTokenClaims;
use crate::auth::user::{User, load_db_user_by_id};
use crate::constants::{REFRESH_TOKEN_ID_LENGTH, REFRESH_TOKEN_TTL, REFRESH_TOKENS_TABLE};
use crate::rand::generate_random_string;
use crate::util::{new_record_id, now_rfc3339};
use bunbase_sqlite::{Connection, params};

/// A freshly minted access/refresh token pair.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
  pub token: String,
  pub refresh_token: String,
}

/// Mint an access token plus a tracked, rotatable refresh token.
pub(crate) async fn mint_token_pair(state: &AppState, user: &User) -> Result<TokenPair, AuthError> {
  let token_id = generate_random_string(REFRESH_TOKEN_ID_LENGTH);

  let access = state
    .jwt()
    .encode(&UserTokenClaims::new_access(user))
    .map_err(|err| AuthError::Internal(err.into()))?;
  let refresh_claims = UserTokenClaims::new_refresh(user, token_id.clone());
  let refresh = state
    .jwt()
    .encode(&refresh_claims)
    .map_err(|err| AuthError::Internal(err.into()))?;

  const QUERY: &str = formatcp!(
    "INSERT INTO {REFRESH_TOKENS_TABLE}
       (id, user_id, collection_id, token_id, created_at, expires_at, revoked)
     VALUES ($1, $2, $3, $4, $5, $6, 0)"
  );

  let expires_at = (chrono::Utc::now() + REFRESH_TOKEN_TTL)
    .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

  state
    .conn()
    .execute(
      QUERY,
      params!(
        new_record_id(),
        user.id.clone(),
        user.collection_id.clone(),
        token_id,
        now_rfc3339(),
        expires_at,
      ),
    )
    .await?;

  return Ok(TokenPair {
    token: access,
    refresh_token: refresh,
  });
}

/// Rotate a refresh token: verify, atomically revoke the presented
/// `tokenId`, then issue a fresh access + refresh pair.
///
/// Replaying an already rotated (or otherwise revoked) token fails with
/// "refresh token revoked"; exactly one row is revoked and exactly one new
/// row created per successful rotation.
pub(crate) async fn rotate_refresh_token(
  state: &AppState,
  refresh_token: &str,
) -> Result<(TokenPair, User), AuthError> {
  let claims = UserTokenClaims::from_refresh_token(state.jwt(), refresh_token)?;
  let Some(token_id) = claims.token_id else {
    return Err(AuthError::Unauthorized);
  };

  // The UPDATE is the rotation's linearization point: only one concurrent
  // rotation of the same token can observe revoked = 0.
  const REVOKE_QUERY: &str = formatcp!(
    "UPDATE {REFRESH_TOKENS_TABLE}
       SET revoked = 1
     WHERE token_id = $1 AND revoked = 0 AND expires_at > $2"
  );

  let revoked = state
    .conn()
    .execute(REVOKE_QUERY, params!(token_id, now_rfc3339()))
    .await?;
  if revoked != 1 {
    return Err(AuthError::RefreshRevoked);
  }

  let Some(collection) = state.schema().get(&claims.collection_name) else {
    return Err(AuthError::Unauthorized);
  };
  if !collection.is_auth() || collection.id != claims.collection_id {
    return Err(AuthError::Unauthorized);
  }
  let Some(db_user) = load_db_user_by_id(state.conn(), &collection, &claims.sub).await? else {
    return Err(AuthError::Unauthorized);
  };

  let user = db_user.into_user(&collection);
  let pair = mint_token_pair(state, &user).await?;
  return Ok((pair, user));
}

/// Revoke every refresh token of one user, e.g. on password change or reset.
pub(crate) async fn revoke_all_refresh_tokens(
  conn: &Connection,
  user_id: &str,
) -> Result<(), AuthError> {
  const QUERY: &str =
    formatcp!("UPDATE {REFRESH_TOKENS_TABLE} SET revoked = 1 WHERE user_id = $1");
  conn.execute(QUERY, params!(user_id.to_string())).await?;
  return Ok(());
}

/// Lazily drop expired refresh-token rows. Invoked from the periodic
/// maintenance task.
pub(crate) async fn sweep_expired_refresh_tokens(conn: &Connection) -> Result<usize, AuthError> {
  const QUERY: &str = formatcp!("DELETE FROM {REFRESH_TOKENS_TABLE} WHERE expires_at <= $1");
  let n = conn.execute(QUERY, params!(now_rfc3339())).await?;
  return Ok(n);
}
