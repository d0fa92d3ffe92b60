use const_format::formatcp;
use sha2::{Digest, Sha256};

use crate::auth::AuthError;
use crate::constants::{
  PASSWORD_RESET_TOKEN_TTL, VERIFICATION_TOKEN_LENGTH, VERIFICATION_TOKEN_TTL,
  VERIFICATION_TOKENS_TABLE,
};
use crate::rand::generate_random_string;
use crate::util::{new_record_id, now_rfc3339};
use bunbase_sqlite::{Connection, params};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum VerificationType {
  EmailVerification,
  PasswordReset,
}

impl VerificationType {
  fn as_str(&self) -> &'static str {
    return match self {
      Self::EmailVerification => "email_verification",
      Self::PasswordReset => "password_reset",
    };
  }

  fn ttl(&self) -> chrono::Duration {
    return match self {
      Self::EmailVerification => VERIFICATION_TOKEN_TTL,
      Self::PasswordReset => PASSWORD_RESET_TOKEN_TTL,
    };
  }
}

fn hash_token(token: &str) -> String {
  let digest = Sha256::digest(token.as_bytes());
  return digest.iter().map(|b| format!("{b:02x}")).collect();
}

/// Issue a one-shot verification token for `(user, type)`.
///
/// Only the SHA-256 digest is stored; the plain 64-character token travels
/// out-of-band (email) exactly once. Outstanding unused tokens of the same
/// kind are invalidated.
pub(crate) async fn issue_verification_token(
  conn: &Connection,
  user_id: &str,
  collection_name: &str,
  kind: VerificationType,
) -> Result<String, AuthError> {
  let token = generate_random_string(VERIFICATION_TOKEN_LENGTH);

  const SUPERSEDE_QUERY: &str = formatcp!(
    "UPDATE {VERIFICATION_TOKENS_TABLE}
       SET used = 1
     WHERE user_id = $1 AND type = $2 AND used = 0"
  );
  conn
    .execute(
      SUPERSEDE_QUERY,
      params!(user_id.to_string(), kind.as_str()),
    )
    .await?;

  const INSERT_QUERY: &str = formatcp!(
    "INSERT INTO {VERIFICATION_TOKENS_TABLE}
       (id, user_id, collection_name, token_hash, type, expires_at, used, created_at)
     VALUES ($1, $2, $3, $4, $5, $6, 0, $7)"
  );

  let expires_at =
    (chrono::Utc::now() + kind.ttl()).to_rfc3339_opts(chrono::SecondsFormat::Micros, true);

  conn
    .execute(
      INSERT_QUERY,
      params!(
        new_record_id(),
        user_id.to_string(),
        collection_name.to_string(),
        hash_token(&token),
        kind.as_str(),
        expires_at,
        now_rfc3339(),
      ),
    )
    .await?;

  return Ok(token);
}

pub(crate) struct ConsumedToken {
  pub user_id: String,
  pub collection_name: String,
}

/// Consume a verification token: the digest must match a stored row of the
/// expected type that is unused and unexpired. Consumption marks the row
/// used; racing consumers lose on the conditional UPDATE.
pub(crate) async fn consume_verification_token(
  conn: &Connection,
  token: &str,
  expected: VerificationType,
) -> Result<ConsumedToken, AuthError> {
  const LOOKUP_QUERY: &str = formatcp!(
    "SELECT id, user_id, collection_name, type, expires_at, used
       FROM {VERIFICATION_TOKENS_TABLE} WHERE token_hash = $1"
  );

  let Some(row) = conn
    .query_row(LOOKUP_QUERY, params!(hash_token(token)))
    .await?
  else {
    return Err(AuthError::BadRequest("invalid or expired token"));
  };

  let internal = |err: rusqlite::types::FromSqlError| AuthError::Internal(err.into());
  let id: String = row.get(0).map_err(internal)?;
  let user_id: String = row.get(1).map_err(internal)?;
  let collection_name: String = row.get(2).map_err(internal)?;
  let kind: String = row.get(3).map_err(internal)?;
  let expires_at: String = row.get(4).map_err(internal)?;
  let used: bool = row.get(5).map_err(internal)?;

  if kind != expected.as_str() || used || expires_at <= now_rfc3339() {
    return Err(AuthError::BadRequest("invalid or expired token"));
  }

  const CONSUME_QUERY: &str =
    formatcp!("UPDATE {VERIFICATION_TOKENS_TABLE} SET used = 1 WHERE id = $1 AND used = 0");
  let updated = conn.execute(CONSUME_QUERY, params!(id)).await?;
  if updated != 1 {
    return Err(AuthError::BadRequest("invalid or expired token"));
  }

  return Ok(ConsumedToken {
    user_id,
    collection_name,
  });
}

/// Drop expired verification rows, used or not.
pub(crate) async fn sweep_expired_verification_tokens(
  conn: &Connection,
) -> Result<usize, AuthError> {
  const QUERY: &str = formatcp!("DELETE FROM {VERIFICATION_TOKENS_TABLE} WHERE expires_at <= $1");
  let n = conn.execute(QUERY, params!(now_rfc3339())).await?;
  return Ok(n);
}
