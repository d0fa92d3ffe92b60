use kanal::{Receiver, Sender};
use log::*;
use std::path::{Path, PathBuf};
use tokio::sync::oneshot;

use crate::error::Error;
pub use crate::params::Params;
use crate::rows::{Row, Rows};

#[macro_export]
macro_rules! params {
    () => {
        [] as [$crate::params::ToSqlType]
    };
    ($($param:expr),+ $(,)?) => {
        [$(Into::<$crate::params::ToSqlType>::into($param)),+]
    };
}

#[macro_export]
macro_rules! named_params {
    () => {
        [] as [(&str, $crate::params::ToSqlType)]
    };
    ($($param_name:literal: $param_val:expr),+ $(,)?) => {
        [$(($param_name as &str, Into::<$crate::params::ToSqlType>::into($param_val))),+]
    };
}

/// The result returned on method calls in this crate.
pub type Result<T> = std::result::Result<T, Error>;

enum Message {
  Run(Box<dyn FnOnce(&mut rusqlite::Connection) + Send + 'static>),
  Terminate(oneshot::Sender<std::result::Result<(), rusqlite::Error>>),
}

/// Handle to a SQLite database owned by a dedicated background thread.
///
/// All statements, reads and writes alike, are shipped as closures to that
/// one thread and therefore execute strictly serialized, which is the
/// single-writer model SQLite wants. Results are returned asynchronously via
/// oneshot channels.
#[derive(Clone)]
pub struct Connection {
  sender: Sender<Message>,
}

impl Connection {
  pub fn new<E>(
    builder: impl FnOnce() -> std::result::Result<rusqlite::Connection, E> + Send,
  ) -> std::result::Result<Self, E> {
    let conn = builder()?;

    debug!(
      "Opened SQLite DB '{}'",
      conn.path().unwrap_or("<in-memory>")
    );

    let (sender, receiver) = kanal::unbounded::<Message>();
    std::thread::Builder::new()
      .name("bunbase-sqlite".to_string())
      .spawn(move || event_loop(conn, receiver))
      .expect("startup");

    return Ok(Self { sender });
  }

  /// Open the database file at `path`, creating it if absent, with the
  /// standard set of PRAGMAs applied (WAL journaling, foreign keys ON,
  /// normal synchronization).
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path: PathBuf = path.as_ref().to_path_buf();
    return Self::new(move || -> Result<rusqlite::Connection> {
      let conn = rusqlite::Connection::open(&path)?;
      apply_pragmas(&conn)?;
      return Ok(conn);
    });
  }

  /// Open a new connection to an in-memory SQLite database.
  pub fn open_in_memory() -> Result<Self> {
    return Self::new(|| -> Result<rusqlite::Connection> {
      let conn = rusqlite::Connection::open_in_memory()?;
      apply_pragmas(&conn)?;
      return Ok(conn);
    });
  }

  /// Call a function on the connection thread and get the result
  /// asynchronously.
  ///
  /// # Failure
  ///
  /// Will return `Err` if the database connection has been closed.
  pub async fn call<F, R>(&self, function: F) -> Result<R>
  where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    let (sender, receiver) = oneshot::channel::<Result<R>>();

    self
      .sender
      .send(Message::Run(Box::new(move |conn| {
        if !sender.is_closed() {
          let _ = sender.send(function(conn));
        }
      })))
      .map_err(|_| Error::ConnectionClosed)?;

    receiver.await.map_err(|_| Error::ConnectionClosed)?
  }

  /// Fire-and-forget variant of [Connection::call].
  pub fn call_and_forget(&self, function: impl FnOnce(&mut rusqlite::Connection) + Send + 'static) {
    let _ = self
      .sender
      .send(Message::Run(Box::new(move |conn| function(conn))));
  }

  /// Execute a single statement, returning the number of affected rows.
  pub async fn execute(
    &self,
    sql: impl AsRef<str> + Send + 'static,
    params: impl Params + Send + 'static,
  ) -> Result<usize> {
    return self
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(sql.as_ref())?;
        params.bind(&mut stmt)?;
        let n = stmt.raw_execute()?;
        return Ok(n);
      })
      .await;
  }

  /// Execute a batch of statements, e.g. migration scripts.
  pub async fn execute_batch(&self, sql: impl AsRef<str> + Send + 'static) -> Result<()> {
    return self
      .call(move |conn| {
        conn.execute_batch(sql.as_ref())?;
        return Ok(());
      })
      .await;
  }

  /// Query and materialize all result rows.
  pub async fn query_rows(
    &self,
    sql: impl AsRef<str> + Send + 'static,
    params: impl Params + Send + 'static,
  ) -> Result<Rows> {
    return self
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(sql.as_ref())?;
        params.bind(&mut stmt)?;
        let rows = stmt.raw_query();
        return Ok(Rows::from_rows(rows)?);
      })
      .await;
  }

  /// Query the first result row, if any.
  pub async fn query_row(
    &self,
    sql: impl AsRef<str> + Send + 'static,
    params: impl Params + Send + 'static,
  ) -> Result<Option<Row>> {
    let rows = self.query_rows(sql, params).await?;
    return Ok(rows.into_iter().next());
  }

  /// Query the first column of the first result row, if any.
  pub async fn query_value<T>(
    &self,
    sql: impl AsRef<str> + Send + 'static,
    params: impl Params + Send + 'static,
  ) -> Result<Option<T>>
  where
    T: rusqlite::types::FromSql + Send + 'static,
  {
    return self
      .call(move |conn| {
        let mut stmt = conn.prepare_cached(sql.as_ref())?;
        params.bind(&mut stmt)?;
        let mut rows = stmt.raw_query();
        return match rows.next()? {
          Some(row) => Ok(Some(row.get(0)?)),
          None => Ok(None),
        };
      })
      .await;
  }

  /// Close the underlying connection and join the connection thread's work
  /// queue. Subsequent calls on any clone of this handle fail with
  /// [Error::ConnectionClosed].
  pub async fn close(&self) -> Result<()> {
    let (ack, receiver) = oneshot::channel();
    self
      .sender
      .send(Message::Terminate(ack))
      .map_err(|_| Error::ConnectionClosed)?;

    receiver
      .await
      .map_err(|_| Error::ConnectionClosed)?
      .map_err(Error::Rusqlite)?;

    return Ok(());
  }
}

fn apply_pragmas(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
  conn.pragma_update(None, "journal_mode", "WAL")?;
  conn.pragma_update(None, "synchronous", "NORMAL")?;
  conn.pragma_update(None, "foreign_keys", "ON")?;
  conn.busy_timeout(std::time::Duration::from_secs(5))?;
  return Ok(());
}

fn event_loop(mut conn: rusqlite::Connection, receiver: Receiver<Message>) {
  while let Ok(message) = receiver.recv() {
    match message {
      Message::Run(f) => f(&mut conn),
      Message::Terminate(ack) => {
        let result = conn.close().map_err(|(_conn, err)| err);
        if let Err(ref err) = result {
          warn!("Failed to cleanly close connection: {err}");
        }
        let _ = ack.send(result);
        return;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_execute_and_query() {
    let conn = Connection::open_in_memory().unwrap();

    conn
      .execute_batch("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
      .await
      .unwrap();

    let n = conn
      .execute(
        "INSERT INTO test (name) VALUES (:name)",
        crate::named_params! { ":name": "first" },
      )
      .await
      .unwrap();
    assert_eq!(n, 1);

    conn
      .execute("INSERT INTO test (name) VALUES ($1)", crate::params!("second"))
      .await
      .unwrap();

    let rows = conn
      .query_rows("SELECT id, name FROM test ORDER BY id", ())
      .await
      .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.column_name(1), Some("name"));
    assert_eq!(rows[0].get::<String>(1).unwrap(), "first");
    assert_eq!(rows[1].get_by_name::<String>("name").unwrap(), "second");

    let count: Option<i64> = conn
      .query_value("SELECT COUNT(*) FROM test", ())
      .await
      .unwrap();
    assert_eq!(count, Some(2));
  }

  #[tokio::test]
  async fn test_foreign_keys_are_enforced() {
    let conn = Connection::open_in_memory().unwrap();

    conn
      .execute_batch(
        r#"
        CREATE TABLE parent (id TEXT PRIMARY KEY);
        CREATE TABLE child (id TEXT PRIMARY KEY, parent TEXT REFERENCES parent(id));
        "#,
      )
      .await
      .unwrap();

    let result = conn
      .execute(
        "INSERT INTO child (id, parent) VALUES ('c0', 'missing')",
        (),
      )
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_close() {
    let conn = Connection::open_in_memory().unwrap();
    conn.close().await.unwrap();

    assert!(matches!(
      conn.query_value::<i64>("SELECT 1", ()).await,
      Err(Error::ConnectionClosed)
    ));
  }
}
