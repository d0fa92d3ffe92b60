use axum::{Router, extract::DefaultBodyLimit, routing::get};
use const_format::formatcp;
use log::*;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;

use crate::app_state::{AppState, AppStateArgs};
use crate::auth::JwtHelper;
use crate::auth::password::hash_password;
use crate::auth::tokens::sweep_expired_refresh_tokens;
use crate::auth::verification::sweep_expired_verification_tokens;
use crate::config::{Config, ConfigError};
use crate::constants::{
  ADMINS_TABLE, DEFAULT_ADMIN_EMAIL, FILES_API_PATH, MAX_REQUEST_BODY_SIZE,
  SSE_HEARTBEAT_INTERVAL, SSE_INACTIVITY_TIMEOUT,
};
use crate::email::Mailer;
use crate::files::FileStore;
use crate::migrations::apply_main_migrations;
use crate::rand::generate_random_string;
use crate::schema::SchemaCache;
use crate::util::{new_record_id, now_rfc3339};
use bunbase_sqlite::{Connection, params};

#[derive(Debug, Error)]
pub enum InitError {
  #[error("Config error: {0}")]
  Config(#[from] ConfigError),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Sql error: {0}")]
  Sql(#[from] bunbase_sqlite::Error),
  #[error("Schema error: {0}")]
  Schema(#[from] crate::schema::SchemaError),
  #[error("Init error: {0}")]
  Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Build the application state: open the store, run metadata migrations,
/// ensure the bootstrap admin exists and resolve the storage root.
pub async fn init_app_state(config: Config) -> Result<AppState, InitError> {
  crate::server::set_dev_mode(config.dev);

  config.data_dir.ensure_directory_structure().await?;

  let storage_root = config
    .storage_dir
    .clone()
    .unwrap_or_else(|| config.data_dir.storage_path());
  tokio::fs::create_dir_all(&storage_root).await?;
  // Resolved to an absolute path, external to the executable.
  let storage_root = storage_root.canonicalize()?;

  let conn = Connection::open(config.data_dir.main_db_path())?;
  let new_db = conn
    .call(|conn| {
      return apply_main_migrations(conn)
        .map_err(|err| bunbase_sqlite::Error::Other(err.into()));
    })
    .await?;
  if new_db {
    info!("Initialized fresh database");
  }

  bootstrap_admin(&conn, config.admin_password.as_deref()).await?;

  let jwt = JwtHelper::new(&config.jwt_secret).map_err(|err| InitError::Other(err.into()))?;

  let schema = Arc::new(SchemaCache::default());
  schema.rebuild(&conn).await?;

  return Ok(AppState::new(AppStateArgs {
    data_dir: config.data_dir,
    conn,
    jwt,
    schema,
    files: FileStore::new(storage_root),
    mailer: Mailer::Log,
  }));
}

/// Ensure at least one admin account exists. Without a configured password a
/// random one is generated and logged exactly once.
pub(crate) async fn bootstrap_admin(
  conn: &Connection,
  password: Option<&str>,
) -> Result<(), InitError> {
  const COUNT_QUERY: &str = formatcp!("SELECT COUNT(*) FROM {ADMINS_TABLE}");
  let count: i64 = conn.query_value(COUNT_QUERY, ()).await?.unwrap_or(0);
  if count > 0 {
    return Ok(());
  }

  let password = match password {
    Some(password) => password.to_string(),
    None => {
      let password = generate_random_string(24);
      info!("Generated admin password for '{DEFAULT_ADMIN_EMAIL}': {password}");
      password
    }
  };

  let password_hash =
    hash_password(&password).map_err(|err| InitError::Other(err.to_string().into()))?;

  const INSERT_QUERY: &str = formatcp!(
    "INSERT INTO {ADMINS_TABLE} (id, email, password_hash, created_at, updated_at)
     VALUES ($1, $2, $3, $4, $5)"
  );
  let now = now_rfc3339();
  conn
    .execute(
      INSERT_QUERY,
      params!(
        new_record_id(),
        DEFAULT_ADMIN_EMAIL,
        password_hash,
        now.clone(),
        now
      ),
    )
    .await?;

  return Ok(());
}

/// Assemble the full HTTP surface.
pub fn build_router(state: &AppState) -> Router {
  return Router::new()
    .merge(crate::records::router())
    .merge(crate::auth::router())
    .merge(crate::admin::router())
    .merge(crate::realtime::router())
    .route(
      &format!("/{FILES_API_PATH}/{{collection}}/{{record}}/{{filename}}"),
      get(crate::records::read_record::download_file_handler),
    )
    .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_SIZE))
    .layer(CorsLayer::permissive())
    .with_state(state.clone());
}

/// Run the server until ctrl-c: listen, serve, then tear down SSE clients
/// and close the store.
pub async fn serve(config: Config) -> Result<(), InitError> {
  let port = config.port;
  let state = init_app_state(config).await?;
  let router = build_router(&state);

  let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
  info!("Listening on 0.0.0.0:{port}");

  let maintenance = tokio::spawn(maintenance_loop(state.clone()));

  axum::serve(listener, router)
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  maintenance.abort();
  state.realtime().sweep(std::time::Duration::ZERO);
  state.conn().close().await?;

  return Ok(());
}

/// Periodic housekeeping: SSE heartbeats + eviction and expired-token
/// sweeps.
async fn maintenance_loop(state: AppState) {
  let mut interval = tokio::time::interval(SSE_HEARTBEAT_INTERVAL);
  // The first tick fires immediately.
  interval.tick().await;

  loop {
    interval.tick().await;

    state.realtime().ping_all();
    state.realtime().sweep(SSE_INACTIVITY_TIMEOUT);

    if let Err(err) = sweep_expired_refresh_tokens(state.conn()).await {
      warn!("Refresh token sweep failed: {err}");
    }
    if let Err(err) = sweep_expired_verification_tokens(state.conn()).await {
      warn!("Verification token sweep failed: {err}");
    }
  }
}

async fn shutdown_signal() {
  if let Err(err) = tokio::signal::ctrl_c().await {
    error!("Failed to install shutdown handler: {err}");
  }
  info!("Shutting down");
}
