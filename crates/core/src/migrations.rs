use itertools::Itertools;
use log::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
  #[error("Invalid migration filename: {0}")]
  InvalidFilename(String),
  #[error("SQL error: {0}")]
  Sql(#[from] rusqlite::Error),
}

#[derive(Clone, rust_embed::RustEmbed)]
#[folder = "migrations/main"]
struct MainMigrations;

struct Migration {
  version: i64,
  name: String,
  sql: String,
}

/// Apply the embedded system-table migrations.
///
/// Applied versions are tracked in `_migrations`; each pending migration runs
/// together with its bookkeeping row in one transaction. Returns true if V1
/// was applied, i.e. the database was initialized for the first time.
pub(crate) fn apply_main_migrations(conn: &mut rusqlite::Connection) -> Result<bool, MigrationError> {
  conn.execute_batch(
    "CREATE TABLE IF NOT EXISTS _migrations (
        version     INTEGER PRIMARY KEY,
        name        TEXT NOT NULL,
        applied_at  TEXT NOT NULL
     ) STRICT",
  )?;

  let migrations: Vec<Migration> = load_embedded_migrations::<MainMigrations>()?;

  let mut new_db = false;
  for migration in migrations {
    let applied: bool = conn
      .query_row(
        "SELECT EXISTS(SELECT 1 FROM _migrations WHERE version = $1)",
        [migration.version],
        |row| row.get(0),
      )?;
    if applied {
      continue;
    }

    let tx = conn.transaction()?;
    tx.execute_batch(&migration.sql)?;
    tx.execute(
      "INSERT INTO _migrations (version, name, applied_at) VALUES ($1, $2, $3)",
      rusqlite::params![
        migration.version,
        migration.name,
        crate::util::now_rfc3339()
      ],
    )?;
    tx.commit()?;

    if migration.version == 1 {
      new_db = true;
    }

    if !cfg!(test) {
      info!(
        "Applied migration 'V{version}__{name}'",
        version = migration.version,
        name = migration.name
      );
    }
  }

  return Ok(new_db);
}

/// Filenames follow the teacher-of-record convention `V{version}__{name}.sql`.
fn load_embedded_migrations<T: rust_embed::RustEmbed>() -> Result<Vec<Migration>, MigrationError> {
  return T::iter()
    .map(|filename| {
      let sql = String::from_utf8_lossy(
        &T::get(&filename)
          .ok_or_else(|| MigrationError::InvalidFilename(filename.to_string()))?
          .data,
      )
      .to_string();

      let stem = filename
        .strip_suffix(".sql")
        .ok_or_else(|| MigrationError::InvalidFilename(filename.to_string()))?;
      let (version, name) = stem
        .strip_prefix("V")
        .and_then(|s| s.split_once("__"))
        .ok_or_else(|| MigrationError::InvalidFilename(filename.to_string()))?;

      return Ok(Migration {
        version: version
          .parse()
          .map_err(|_| MigrationError::InvalidFilename(filename.to_string()))?,
        name: name.to_string(),
        sql,
      });
    })
    .process_results(|iter| iter.sorted_by_key(|m: &Migration| m.version).collect());
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_migrations_apply_and_are_idempotent() {
    let mut conn = rusqlite::Connection::open_in_memory().unwrap();

    let new_db = apply_main_migrations(&mut conn).unwrap();
    assert!(new_db);

    // Second run is a no-op.
    let new_db = apply_main_migrations(&mut conn).unwrap();
    assert!(!new_db);

    let tables: Vec<String> = conn
      .prepare("SELECT name FROM sqlite_schema WHERE type = 'table' ORDER BY name")
      .unwrap()
      .query_map([], |row| row.get(0))
      .unwrap()
      .collect::<Result<_, _>>()
      .unwrap();

    for table in [
      "_admins",
      "_collections",
      "_fields",
      "_files",
      "_migrations",
      "_refresh_tokens",
      "_verification_tokens",
    ] {
      assert!(tables.iter().any(|t| t == table), "missing {table}");
    }
  }
}
