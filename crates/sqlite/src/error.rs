#[derive(thiserror::Error, Debug)]
pub enum Error {
  #[error("Connection closed error")]
  ConnectionClosed,

  #[error("Rusqlite error: {0}")]
  Rusqlite(#[from] rusqlite::Error),

  #[error("Other error: {0}")]
  Other(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}
