use axum::{
  Router,
  routing::{delete, get, patch, post},
};
use std::sync::Arc;

pub(crate) mod create_record;
pub(crate) mod delete_record;
pub(crate) mod expand;
pub(crate) mod list_records;
pub(crate) mod query;
pub(crate) mod read_record;
pub(crate) mod update_record;
pub(crate) mod validate;
pub(crate) mod value;

mod error;

pub use error::RecordError;
pub use query::ListQuery;

pub use create_record::create_record;
pub use delete_record::delete_record;
pub use list_records::{ListResponse, list_records};
pub use read_record::read_record;
pub use update_record::update_record;

use crate::AppState;
use crate::auth::RequestAuth;
use crate::constants::RECORD_API_PATH;
use crate::rules::{RuleInput, check_access};
use crate::schema::Collection;

pub(crate) fn router() -> Router<AppState> {
  return Router::new()
    .route(
      &format!("/{RECORD_API_PATH}/{{name}}/records"),
      get(list_records::list_records_handler),
    )
    .route(
      &format!("/{RECORD_API_PATH}/{{name}}/records"),
      post(create_record::create_record_handler),
    )
    .route(
      &format!("/{RECORD_API_PATH}/{{name}}/records/{{record}}"),
      get(read_record::read_record_handler),
    )
    .route(
      &format!("/{RECORD_API_PATH}/{{name}}/records/{{record}}"),
      patch(update_record::update_record_handler),
    )
    .route(
      &format!("/{RECORD_API_PATH}/{{name}}/records/{{record}}"),
      delete(delete_record::delete_record_handler),
    );
}

/// The five rule-guarded operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Operation {
  List,
  View,
  Create,
  Update,
  Delete,
}

impl Operation {
  fn rule<'a>(&self, collection: &'a Collection) -> Option<&'a str> {
    let rules = &collection.rules;
    return match self {
      Self::List => rules.list_rule.as_deref(),
      Self::View => rules.view_rule.as_deref(),
      Self::Create => rules.create_rule.as_deref(),
      Self::Update => rules.update_rule.as_deref(),
      Self::Delete => rules.delete_rule.as_deref(),
    };
  }
}

/// Authorize one operation: select the rule string and evaluate it against
/// the caller plus, depending on the operation, the loaded record or the
/// request body.
///
/// Rule denial on a view is 403 regardless of the caller's identity; for the
/// remaining operations anonymous callers get 401. 401 otherwise only means
/// a missing or invalid token.
pub(crate) fn check_record_access(
  collection: &Collection,
  operation: Operation,
  auth: &RequestAuth,
  record: Option<&serde_json::Map<String, serde_json::Value>>,
  body: Option<&serde_json::Map<String, serde_json::Value>>,
) -> Result<(), RecordError> {
  let input = RuleInput {
    is_admin: auth.is_admin(),
    auth: auth.user(),
    record,
    body,
  };

  if check_access(operation.rule(collection), &input) {
    return Ok(());
  }

  return match auth {
    RequestAuth::Anonymous if operation != Operation::View => Err(RecordError::Unauthorized),
    _ => Err(RecordError::Forbidden),
  };
}

pub(crate) fn lookup_collection(
  state: &AppState,
  name: &str,
) -> Result<Arc<Collection>, RecordError> {
  return state.schema().get(name).ok_or(RecordError::NotFound);
}

/// Load one record by id, decoded to its public JSON shape.
pub(crate) async fn load_record(
  state: &AppState,
  collection: &Collection,
  id: &str,
) -> Result<serde_json::Value, RecordError> {
  let Some(row) = state
    .conn()
    .query_row(
      format!(
        r#"SELECT * FROM "{table}" WHERE id = $1"#,
        table = collection.name
      ),
      bunbase_sqlite::params!(id.to_string()),
    )
    .await?
  else {
    return Err(RecordError::NotFound);
  };

  return Ok(value::row_to_record(collection, &row));
}

#[cfg(test)]
mod records_test;
