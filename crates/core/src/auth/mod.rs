use axum::{Router, routing::post};

pub mod jwt;
pub mod user;

pub(crate) mod api;
pub(crate) mod password;
pub(crate) mod tokens;
pub(crate) mod util;
pub(crate) mod verification;

mod error;

pub use error::AuthError;
pub use jwt::JwtHelper;
pub use user::{Admin, RequestAuth, User};

use crate::constants::RECORD_API_PATH;

/// Router for the per-collection user auth endpoints, i.e.
/// `/api/collections/{name}/auth/...`.
///
/// Supported flows:
///  * unauthed: register, login, refresh
///  * unauthed, non-probing: verify-email request/confirm, reset-password
///    request/confirm
///  * authed: change-password (revokes all sessions)
pub(super) fn router() -> Router<crate::AppState> {
  return Router::new()
    .route(
      &format!("/{RECORD_API_PATH}/{{name}}/auth/register"),
      post(api::register::register_handler),
    )
    .route(
      &format!("/{RECORD_API_PATH}/{{name}}/auth/login"),
      post(api::login::login_handler),
    )
    .route(
      &format!("/{RECORD_API_PATH}/{{name}}/auth/refresh"),
      post(api::refresh::refresh_handler),
    )
    .route(
      &format!("/{RECORD_API_PATH}/{{name}}/auth/verify-email/request"),
      post(api::verify_email::request_verification_handler),
    )
    .route(
      &format!("/{RECORD_API_PATH}/{{name}}/auth/verify-email/confirm"),
      post(api::verify_email::confirm_verification_handler),
    )
    .route(
      &format!("/{RECORD_API_PATH}/{{name}}/auth/reset-password/request"),
      post(api::reset_password::reset_password_request_handler),
    )
    .route(
      &format!("/{RECORD_API_PATH}/{{name}}/auth/reset-password/confirm"),
      post(api::reset_password::reset_password_confirm_handler),
    )
    .route(
      &format!("/{RECORD_API_PATH}/{{name}}/auth/change-password"),
      post(api::change_password::change_password_handler),
    );
}
