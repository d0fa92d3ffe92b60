use axum::{
  extract::{FromRef, FromRequestParts, OptionalFromRequestParts},
  http::request::Parts,
};
use const_format::formatcp;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::AuthError;
use crate::auth::jwt::{AdminTokenClaims, TOKEN_TYPE_ACCESS, TOKEN_TYPE_ADMIN, UserTokenClaims};
use crate::constants::ADMINS_TABLE;
use crate::schema::{Collection, is_safe_identifier};
use crate::util::get_header;
use bunbase_sqlite::{Connection, params};

/// An authenticated admin. Never exposes the password hash.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Admin {
  pub id: String,
  pub email: String,
}

/// An authenticated, *currently existing* user of one auth collection.
///
/// Unlike the raw claims this is re-read from the store per request, so
/// deleted users and stale `verified` bits don't linger for the token
/// lifetime.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
  pub id: String,
  pub email: String,
  pub verified: bool,
  pub collection_id: String,
  pub collection_name: String,
}

/// Raw auth-collection row, including secrets. Internal only.
#[derive(Clone, Debug)]
pub(crate) struct DbUser {
  pub id: String,
  pub email: String,
  pub password_hash: String,
  pub verified: bool,
}

impl DbUser {
  pub(crate) fn into_user(self, collection: &Collection) -> User {
    return User {
      id: self.id,
      email: self.email,
      verified: self.verified,
      collection_id: collection.id.clone(),
      collection_name: collection.name.clone(),
    };
  }
}

fn row_to_db_user(row: &bunbase_sqlite::Row) -> Result<DbUser, AuthError> {
  let get = |name: &str| -> Result<String, AuthError> {
    return row
      .get_by_name::<String>(name)
      .map_err(|err| AuthError::Internal(err.into()));
  };

  return Ok(DbUser {
    id: get("id")?,
    email: get("email")?,
    password_hash: get("password_hash")?,
    verified: row
      .get_by_name::<bool>("verified")
      .map_err(|err| AuthError::Internal(err.into()))?,
  });
}

pub(crate) async fn load_db_user_by_email(
  conn: &Connection,
  collection: &Collection,
  email: &str,
) -> Result<Option<DbUser>, AuthError> {
  assert!(is_safe_identifier(&collection.name));

  let row = conn
    .query_row(
      format!(
        r#"SELECT id, email, password_hash, verified FROM "{table}" WHERE email = $1"#,
        table = collection.name
      ),
      params!(email.to_string()),
    )
    .await?;

  return row.as_ref().map(row_to_db_user).transpose();
}

pub(crate) async fn load_db_user_by_id(
  conn: &Connection,
  collection: &Collection,
  id: &str,
) -> Result<Option<DbUser>, AuthError> {
  assert!(is_safe_identifier(&collection.name));

  let row = conn
    .query_row(
      format!(
        r#"SELECT id, email, password_hash, verified FROM "{table}" WHERE id = $1"#,
        table = collection.name
      ),
      params!(id.to_string()),
    )
    .await?;

  return row.as_ref().map(row_to_db_user).transpose();
}

pub(crate) async fn load_admin_by_email(
  conn: &Connection,
  email: &str,
) -> Result<Option<(Admin, String)>, AuthError> {
  const QUERY: &str =
    formatcp!("SELECT id, email, password_hash FROM {ADMINS_TABLE} WHERE email = $1");

  let Some(row) = conn.query_row(QUERY, params!(email.to_string())).await? else {
    return Ok(None);
  };

  let admin = Admin {
    id: row
      .get(0)
      .map_err(|err| AuthError::Internal(err.into()))?,
    email: row
      .get(1)
      .map_err(|err| AuthError::Internal(err.into()))?,
  };
  let password_hash: String = row
    .get(2)
    .map_err(|err| AuthError::Internal(err.into()))?;

  return Ok(Some((admin, password_hash)));
}

pub(crate) async fn load_admin_by_id(
  conn: &Connection,
  id: &str,
) -> Result<Option<Admin>, AuthError> {
  const QUERY: &str = formatcp!("SELECT id, email FROM {ADMINS_TABLE} WHERE id = $1");

  let Some(row) = conn.query_row(QUERY, params!(id.to_string())).await? else {
    return Ok(None);
  };

  return Ok(Some(Admin {
    id: row
      .get(0)
      .map_err(|err| AuthError::Internal(err.into()))?,
    email: row
      .get(1)
      .map_err(|err| AuthError::Internal(err.into()))?,
  }));
}

/// The caller's identity for rule evaluation: admin, user or anonymous.
#[derive(Clone, Debug, Default)]
pub enum RequestAuth {
  Admin(Admin),
  User(User),
  #[default]
  Anonymous,
}

impl RequestAuth {
  pub fn is_admin(&self) -> bool {
    return matches!(self, Self::Admin(_));
  }

  pub fn user(&self) -> Option<&User> {
    return match self {
      Self::User(user) => Some(user),
      _ => None,
    };
  }

  pub fn is_anonymous(&self) -> bool {
    return matches!(self, Self::Anonymous);
  }
}

/// Pull the bearer token from the Authorization header or, as a fallback for
/// direct links like file downloads, from the `token` query parameter.
fn extract_raw_token(parts: &Parts) -> Option<String> {
  if let Some(token) = get_header(&parts.headers, "authorization")
    .and_then(|value| value.strip_prefix("Bearer "))
  {
    return Some(token.to_string());
  }

  let query = parts.uri.query()?;
  for (key, value) in form_urlencoded::parse(query.as_bytes()) {
    if key == "token" {
      return Some(value.into_owned());
    }
  }
  return None;
}

#[derive(Deserialize)]
struct TypeProbe {
  r#type: String,
}

pub(crate) async fn authenticate(state: &AppState, parts: &Parts) -> Result<RequestAuth, AuthError> {
  let Some(token) = extract_raw_token(parts) else {
    return Ok(RequestAuth::Anonymous);
  };

  let probe: TypeProbe = state
    .jwt()
    .decode(&token)
    .map_err(|_| AuthError::Unauthorized)?;

  return match probe.r#type.as_str() {
    TOKEN_TYPE_ADMIN => {
      let claims = AdminTokenClaims::from_token(state.jwt(), &token)?;
      let Some(admin) = load_admin_by_id(state.conn(), &claims.sub).await? else {
        return Err(AuthError::Unauthorized);
      };
      Ok(RequestAuth::Admin(admin))
    }
    TOKEN_TYPE_ACCESS => {
      let claims = UserTokenClaims::from_access_token(state.jwt(), &token)?;
      let Some(collection) = state.schema().get(&claims.collection_name) else {
        return Err(AuthError::Unauthorized);
      };
      if !collection.is_auth() || collection.id != claims.collection_id {
        return Err(AuthError::Unauthorized);
      }
      let Some(db_user) = load_db_user_by_id(state.conn(), &collection, &claims.sub).await? else {
        return Err(AuthError::Unauthorized);
      };
      Ok(RequestAuth::User(db_user.into_user(&collection)))
    }
    // Refresh tokens only ever hit the refresh endpoint.
    _ => Err(AuthError::Unauthorized),
  };
}

impl<S> FromRequestParts<S> for RequestAuth
where
  AppState: FromRef<S>,
  S: Send + Sync,
{
  type Rejection = AuthError;

  async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
    let state = AppState::from_ref(state);
    return authenticate(&state, parts).await;
  }
}

impl<S> FromRequestParts<S> for User
where
  AppState: FromRef<S>,
  S: Send + Sync,
{
  type Rejection = AuthError;

  async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
    let state = AppState::from_ref(state);
    return match authenticate(&state, parts).await? {
      RequestAuth::User(user) => Ok(user),
      _ => Err(AuthError::Unauthorized),
    };
  }
}

impl<S> OptionalFromRequestParts<S> for User
where
  AppState: FromRef<S>,
  S: Send + Sync,
{
  type Rejection = AuthError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &S,
  ) -> Result<Option<Self>, Self::Rejection> {
    let state = AppState::from_ref(state);
    return match authenticate(&state, parts).await {
      Ok(RequestAuth::User(user)) => Ok(Some(user)),
      _ => Ok(None),
    };
  }
}

impl<S> FromRequestParts<S> for Admin
where
  AppState: FromRef<S>,
  S: Send + Sync,
{
  type Rejection = AuthError;

  async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
    let state = AppState::from_ref(state);
    return match authenticate(&state, parts).await? {
      RequestAuth::Admin(admin) => Ok(admin),
      RequestAuth::User(_) => Err(AuthError::Forbidden),
      RequestAuth::Anonymous => Err(AuthError::Unauthorized),
    };
  }
}
