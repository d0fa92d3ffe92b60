use axum::{
  Router,
  routing::{delete, get, patch, post},
};

pub(crate) mod auth;
pub(crate) mod collections;

use crate::AppState;
use crate::constants::ADMIN_API_PATH;

/// Admin surface under `/_/api`: admin auth plus the schema engine's
/// operational endpoints. Everything except login requires an admin token.
pub(super) fn router() -> Router<AppState> {
  return Router::new()
    .route(
      &format!("/{ADMIN_API_PATH}/auth/login"),
      post(auth::admin_login_handler),
    )
    .route(
      &format!("/{ADMIN_API_PATH}/auth/password"),
      post(auth::admin_change_password_handler),
    )
    .route(&format!("/{ADMIN_API_PATH}/auth/me"), get(auth::admin_me_handler))
    .route(
      &format!("/{ADMIN_API_PATH}/collections"),
      get(collections::list_collections_handler),
    )
    .route(
      &format!("/{ADMIN_API_PATH}/collections"),
      post(collections::create_collection_handler),
    )
    .route(
      &format!("/{ADMIN_API_PATH}/collections/{{name}}"),
      get(collections::get_collection_handler),
    )
    .route(
      &format!("/{ADMIN_API_PATH}/collections/{{name}}"),
      patch(collections::update_collection_handler),
    )
    .route(
      &format!("/{ADMIN_API_PATH}/collections/{{name}}"),
      delete(collections::delete_collection_handler),
    )
    .route(
      &format!("/{ADMIN_API_PATH}/collections/{{name}}/fields"),
      post(collections::add_field_handler),
    )
    .route(
      &format!("/{ADMIN_API_PATH}/collections/{{name}}/fields/{{field}}"),
      patch(collections::update_field_handler),
    )
    .route(
      &format!("/{ADMIN_API_PATH}/collections/{{name}}/fields/{{field}}"),
      delete(collections::drop_field_handler),
    );
}
