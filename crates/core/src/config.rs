use std::path::PathBuf;
use thiserror::Error;

use crate::data_dir::DataDir;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("Missing config: {0}")]
  Missing(&'static str),
  #[error("Invalid config: {0}")]
  Invalid(String),
}

/// Process configuration, read from the environment (§ external interfaces:
/// CLI parsing is not part of the core).
#[derive(Clone, Debug)]
pub struct Config {
  /// TCP listen port.
  pub port: u16,
  /// Base data directory holding the database file.
  pub data_dir: DataDir,
  /// File-storage root. Defaults to `<data_dir>/storage`.
  pub storage_dir: Option<PathBuf>,
  /// HMAC signing secret for tokens. Required and non-empty.
  pub jwt_secret: String,
  /// Initial admin password. Generated and logged once when absent.
  pub admin_password: Option<String>,
  /// Development mode: internal error messages are returned verbatim.
  pub dev: bool,
}

impl Config {
  pub fn from_env() -> Result<Self, ConfigError> {
    let jwt_secret = std::env::var("BUNBASE_JWT_SECRET")
      .ok()
      .filter(|s| !s.is_empty())
      .ok_or(ConfigError::Missing("BUNBASE_JWT_SECRET"))?;

    let port = match std::env::var("BUNBASE_PORT") {
      Ok(value) => value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(format!("invalid port: {value}")))?,
      Err(_) => 8090,
    };

    return Ok(Config {
      port,
      data_dir: std::env::var("BUNBASE_DATA_DIR")
        .map(|dir| DataDir(PathBuf::from(dir)))
        .unwrap_or_default(),
      storage_dir: std::env::var("BUNBASE_STORAGE_DIR").ok().map(PathBuf::from),
      jwt_secret,
      admin_password: std::env::var("BUNBASE_ADMIN_PASSWORD")
        .ok()
        .filter(|s| !s.is_empty()),
      dev: std::env::var("BUNBASE_DEV").is_ok_and(|v| v == "1" || v == "true"),
    });
  }
}
