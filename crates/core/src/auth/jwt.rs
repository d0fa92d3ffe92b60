use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, errors::Error as JwtError};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::auth::AuthError;
use crate::auth::user::User;
use crate::constants::{ACCESS_TOKEN_TTL, ADMIN_TOKEN_TTL, REFRESH_TOKEN_TTL};

pub(crate) const TOKEN_TYPE_ADMIN: &str = "admin";
pub(crate) const TOKEN_TYPE_ACCESS: &str = "access";
pub(crate) const TOKEN_TYPE_REFRESH: &str = "refresh";

/// Compact-JWS HMAC-SHA256 signer/verifier.
///
/// The secret is supplied via the environment at startup and must be
/// non-empty; admin and user tokens share the key but are distinguished by a
/// mandatory `type` claim checked on every decode.
pub struct JwtHelper {
  header: Header,
  validation: Validation,
  encoding_key: EncodingKey,
  decoding_key: DecodingKey,
}

impl JwtHelper {
  pub fn new(secret: &str) -> Result<Self, AuthError> {
    if secret.is_empty() {
      return Err(AuthError::Internal("empty token signing secret".into()));
    }

    return Ok(JwtHelper {
      header: Header::new(jsonwebtoken::Algorithm::HS256),
      validation: Validation::new(jsonwebtoken::Algorithm::HS256),
      encoding_key: EncodingKey::from_secret(secret.as_bytes()),
      decoding_key: DecodingKey::from_secret(secret.as_bytes()),
    });
  }

  pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<T, JwtError> {
    // Note: we don't need to expose the token headers.
    return jsonwebtoken::decode::<T>(token, &self.decoding_key, &self.validation)
      .map(|data| data.claims);
  }

  pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
    return jsonwebtoken::encode::<T>(&self.header, claims, &self.encoding_key);
  }
}

/// Claims of the admin bearer token: 24h lifetime, no rotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminTokenClaims {
  /// Admin id.
  pub sub: String,
  pub r#type: String,
  /// Unix timestamp in seconds when the token was minted.
  pub iat: i64,
  /// Expiration timestamp.
  pub exp: i64,
}

impl AdminTokenClaims {
  pub(crate) fn new(admin_id: &str) -> Self {
    let now = chrono::Utc::now();
    return AdminTokenClaims {
      sub: admin_id.to_string(),
      r#type: TOKEN_TYPE_ADMIN.to_string(),
      iat: now.timestamp(),
      exp: (now + ADMIN_TOKEN_TTL).timestamp(),
    };
  }

  pub fn from_token(jwt: &JwtHelper, token: &str) -> Result<Self, AuthError> {
    let claims: Self = jwt.decode(token).map_err(|_| AuthError::Unauthorized)?;
    if claims.r#type != TOKEN_TYPE_ADMIN {
      return Err(AuthError::Unauthorized);
    }
    return Ok(claims);
  }
}

/// Claims shared by user access and refresh tokens. The holder is always
/// bound to one auth collection; refresh tokens additionally carry the
/// rotation-tracked `tokenId`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserTokenClaims {
  /// User id.
  pub sub: String,
  pub collection_id: String,
  pub collection_name: String,
  pub r#type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub token_id: Option<String>,
  pub iat: i64,
  pub exp: i64,
}

impl UserTokenClaims {
  pub(crate) fn new_access(user: &User) -> Self {
    let now = chrono::Utc::now();
    return UserTokenClaims {
      sub: user.id.clone(),
      collection_id: user.collection_id.clone(),
      collection_name: user.collection_name.clone(),
      r#type: TOKEN_TYPE_ACCESS.to_string(),
      token_id: None,
      iat: now.timestamp(),
      exp: (now + ACCESS_TOKEN_TTL).timestamp(),
    };
  }

  pub(crate) fn new_refresh(user: &User, token_id: String) -> Self {
    let now = chrono::Utc::now();
    return UserTokenClaims {
      sub: user.id.clone(),
      collection_id: user.collection_id.clone(),
      collection_name: user.collection_name.clone(),
      r#type: TOKEN_TYPE_REFRESH.to_string(),
      token_id: Some(token_id),
      iat: now.timestamp(),
      exp: (now + REFRESH_TOKEN_TTL).timestamp(),
    };
  }

  pub fn from_access_token(jwt: &JwtHelper, token: &str) -> Result<Self, AuthError> {
    let claims: Self = jwt.decode(token).map_err(|_| AuthError::Unauthorized)?;
    if claims.r#type != TOKEN_TYPE_ACCESS {
      return Err(AuthError::Unauthorized);
    }
    return Ok(claims);
  }

  pub fn from_refresh_token(jwt: &JwtHelper, token: &str) -> Result<Self, AuthError> {
    let claims: Self = jwt.decode(token).map_err(|_| AuthError::Unauthorized)?;
    if claims.r#type != TOKEN_TYPE_REFRESH {
      return Err(AuthError::Unauthorized);
    }
    return Ok(claims);
  }
}

#[cfg(test)]
pub(crate) fn test_jwt_helper() -> JwtHelper {
  return JwtHelper::new("test-secret-do-not-use").expect("non-empty secret");
}

#[cfg(test)]
mod tests {
  use super::*;

  fn test_user() -> User {
    return User {
      id: "u0".to_string(),
      email: "foo@bar.com".to_string(),
      verified: true,
      collection_id: "c0".to_string(),
      collection_name: "users".to_string(),
    };
  }

  #[test]
  fn test_encode_decode_round_trip() {
    let jwt = test_jwt_helper();

    let claims = UserTokenClaims::new_access(&test_user());
    let token = jwt.encode(&claims).unwrap();
    assert_eq!(claims, UserTokenClaims::from_access_token(&jwt, &token).unwrap());
  }

  #[test]
  fn test_token_types_are_not_interchangeable() {
    let jwt = test_jwt_helper();
    let user = test_user();

    let access = jwt.encode(&UserTokenClaims::new_access(&user)).unwrap();
    let refresh = jwt
      .encode(&UserTokenClaims::new_refresh(&user, "t0".to_string()))
      .unwrap();
    let admin = jwt.encode(&AdminTokenClaims::new("a0")).unwrap();

    // A refresh token is not an access token and vice versa.
    assert!(UserTokenClaims::from_access_token(&jwt, &refresh).is_err());
    assert!(UserTokenClaims::from_refresh_token(&jwt, &access).is_err());

    // Admin and user tokens are never interchangeable.
    assert!(UserTokenClaims::from_access_token(&jwt, &admin).is_err());
    assert!(AdminTokenClaims::from_token(&jwt, &access).is_err());
  }

  #[test]
  fn test_wrong_secret_fails() {
    let jwt = test_jwt_helper();
    let other = JwtHelper::new("another-secret").unwrap();

    let token = other.encode(&AdminTokenClaims::new("a0")).unwrap();
    assert!(AdminTokenClaims::from_token(&jwt, &token).is_err());
  }
}
