use argon2::{
  Argon2, PasswordHasher, PasswordVerifier,
  password_hash::{PasswordHash, SaltString, rand_core::OsRng},
};
use mini_moka::sync::Cache;
use std::sync::LazyLock;

use crate::auth::AuthError;
use crate::constants::DEFAULT_MIN_PASSWORD_LENGTH;

const MAX_PASSWORD_LENGTH: usize = 128;

pub fn hash_password(password: &str) -> Result<String, AuthError> {
  let salt = SaltString::generate(&mut OsRng);
  return Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .map(|hash| hash.to_string())
    // NOTE: Wrapping needed since argon2's error doesn't implement the error
    // trait.
    .map_err(|err| AuthError::Internal(err.to_string().into()));
}

pub(crate) fn verify_password(password: &str, password_hash: &str) -> Result<(), AuthError> {
  let parsed =
    PasswordHash::new(password_hash).map_err(|err| AuthError::Internal(err.to_string().into()))?;

  return Argon2::default()
    .verify_password(password.as_bytes(), &parsed)
    .map_err(|_| AuthError::Unauthorized);
}

// Verified against when the account does not exist, so that hashing work is
// performed either way with the same cost parameters.
static DUMMY_HASH: LazyLock<String> =
  LazyLock::new(|| hash_password("bunbase-dummy-password").expect("startup"));

/// Check `password` against an account that may not exist. Both the
/// missing-account and the wrong-password case return the same generic
/// credential error after comparable work.
pub(crate) fn verify_password_timing_safe(
  password: &str,
  stored_hash: Option<&str>,
) -> Result<(), AuthError> {
  return match stored_hash {
    Some(hash) => verify_password(password, hash),
    None => {
      let _ = verify_password(password, &DUMMY_HASH);
      Err(AuthError::Unauthorized)
    }
  };
}

pub(crate) fn validate_password_policy(
  password: &str,
  min_length: Option<usize>,
) -> Result<(), AuthError> {
  if password.len() < min_length.unwrap_or(DEFAULT_MIN_PASSWORD_LENGTH) {
    return Err(AuthError::BadRequest("Password too short"));
  }
  if password.len() > MAX_PASSWORD_LENGTH {
    return Err(AuthError::BadRequest("Password too long"));
  }
  return Ok(());
}

#[derive(Clone)]
struct FailedAttempt {
  tries: usize,
}

impl Default for FailedAttempt {
  fn default() -> Self {
    return Self { tries: 1 };
  }
}

// Track login attempts for abuse prevention.
static ATTEMPTS: LazyLock<Cache<String, FailedAttempt>> = LazyLock::new(|| {
  Cache::builder()
    .time_to_live(std::time::Duration::from_secs(60))
    .max_capacity(1024)
    .build()
});

// HACK: Increase the limit in tests to stay out of the way.
#[cfg(test)]
const LOGIN_RATE_LIMIT: usize = 100;

#[cfg(not(test))]
const LOGIN_RATE_LIMIT: usize = 5;

pub(crate) fn check_login_rate_limit(email: &str) -> Result<(), AuthError> {
  let attempts = ATTEMPTS.get(&email.to_string());
  if attempts.map(|a| a.tries).unwrap_or(0) >= LOGIN_RATE_LIMIT {
    return Err(AuthError::TooManyRequests);
  }
  return Ok(());
}

pub(crate) fn record_failed_login(email: &str) {
  let attempts = ATTEMPTS.get(&email.to_string());
  ATTEMPTS.insert(
    email.to_string(),
    attempts
      .map(|a| FailedAttempt { tries: a.tries + 1 })
      .unwrap_or_default(),
  );
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_hash_and_verify() {
    let password = "0123456789.";
    let hash = hash_password(password).unwrap();

    assert!(verify_password(password, &hash).is_ok());
    assert!(verify_password("mismatch", &hash).is_err());
  }

  #[test]
  fn test_timing_safe_verify_is_generic() {
    let hash = hash_password("correct").unwrap();

    let existing = verify_password_timing_safe("wrong", Some(&hash));
    let missing = verify_password_timing_safe("wrong", None);

    // The two failure modes are indistinguishable.
    assert!(matches!(existing, Err(AuthError::Unauthorized)));
    assert!(matches!(missing, Err(AuthError::Unauthorized)));
  }

  #[test]
  fn test_password_policy() {
    assert!(validate_password_policy("12345678", None).is_ok());
    assert!(validate_password_policy("1234567", None).is_err());
    assert!(validate_password_policy("123", Some(3)).is_ok());
    assert!(validate_password_policy(&"x".repeat(200), None).is_err());
  }
}
