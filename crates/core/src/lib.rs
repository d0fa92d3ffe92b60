#![forbid(unsafe_code, clippy::unwrap_used)]
#![allow(clippy::needless_return)]
#![warn(clippy::await_holding_lock, clippy::inefficient_to_string)]

pub mod app_state;
pub mod config;
pub mod constants;
pub mod hooks;
pub mod records;
pub mod rules;
pub mod schema;
pub mod util;

mod admin;
mod auth;
mod data_dir;
mod email;
mod extract;
mod files;
mod migrations;
mod realtime;
mod server;

pub use app_state::AppState;
pub use auth::{Admin, AuthError, JwtHelper, RequestAuth, User};
pub use config::Config;
pub use data_dir::DataDir;
pub use server::{InitError, init_app_state, serve};

pub mod api {
  pub use crate::auth::password::hash_password;
  pub use crate::auth::tokens::TokenPair;
  pub use crate::auth::util::login_with_password;
  pub use crate::email::{Email, Mailer};
  pub use crate::files::{FileStore, FileUpload};
  pub use crate::hooks::{HookContext, HookEvent, HookRegistry, Next};
  pub use crate::realtime::RealtimeBroker;
  pub use crate::records::{
    ListResponse, create_record, delete_record, list_records, read_record, update_record,
  };
  pub use crate::server::build_router;
}

pub(crate) mod rand {
  use rand::{
    CryptoRng,
    distr::{Alphanumeric, SampleString},
  };

  pub(crate) fn generate_random_string(length: usize) -> String {
    let mut rng = rand::rng();
    let _: &dyn CryptoRng = &rng;

    return Alphanumeric.sample_string(&mut rng, length);
  }

  #[cfg(test)]
  mod tests {
    use super::*;

    #[test]
    fn test_generate_random_string() {
      let n = 20;
      let first = generate_random_string(n);
      assert_eq!(n, first.len());
      let second = generate_random_string(n);
      assert_eq!(n, second.len());
      assert_ne!(first, second);
    }
  }
}
