use itertools::Itertools;
use log::*;

use crate::schema::SchemaError;

/// Rebuilds `table` with the given new shape by copying it, used whenever a
/// column cannot be altered or dropped in place.
///
/// Must run inside an open transaction with foreign-key enforcement already
/// disabled; the caller re-enables enforcement after commit/rollback.
///
/// Steps performed here: snapshot dependent indexes and triggers, create the
/// temporary table, copy the intersection of old and new columns, drop the
/// old table, rename, re-create the snapshot (best-effort, silently skipping
/// statements that reference removed columns) and run the foreign-key
/// integrity check, failing the whole operation on any violation.
pub(crate) fn copy_rebuild(
  tx: &rusqlite::Transaction,
  table: &str,
  create_body: &str,
  copy_columns: &[String],
) -> Result<(), SchemaError> {
  let dependent_sql: Vec<String> = {
    let mut stmt = tx.prepare(
      "SELECT sql FROM sqlite_schema
         WHERE tbl_name = $1 AND type IN ('index', 'trigger') AND sql IS NOT NULL",
    )?;
    let rows = stmt.query_map([table], |row| row.get::<_, String>(0))?;
    rows.collect::<Result<_, _>>()?
  };

  let tmp_table = format!("__copy_{table}");
  tx.execute_batch(&format!(
    r#"CREATE TABLE "{tmp_table}" (
  {create_body}
)"#
  ))?;

  let column_list = copy_columns
    .iter()
    .map(|c| format!(r#""{c}""#))
    .join(", ");
  tx.execute(
    &format!(r#"INSERT INTO "{tmp_table}" ({column_list}) SELECT {column_list} FROM "{table}""#),
    (),
  )?;

  tx.execute(&format!(r#"DROP TABLE "{table}""#), ())?;
  tx.execute(
    &format!(r#"ALTER TABLE "{tmp_table}" RENAME TO "{table}""#),
    (),
  )?;

  for sql in dependent_sql {
    // Index or trigger may reference a column that no longer exists.
    if let Err(err) = tx.execute_batch(&sql) {
      debug!("Skipping dependent schema object during table copy: {err}");
    }
  }

  return foreign_key_check(tx, table);
}

pub(crate) fn foreign_key_check(
  tx: &rusqlite::Transaction,
  table: &str,
) -> Result<(), SchemaError> {
  let violations: Vec<String> = {
    let mut stmt = tx.prepare(&format!(r#"PRAGMA foreign_key_check("{table}")"#))?;
    let rows = stmt.query_map([], |row| {
      let table: String = row.get(0)?;
      let referenced: String = row.get(2)?;
      return Ok(format!("{table} -> {referenced}"));
    })?;
    rows.collect::<Result<_, _>>()?
  };

  if !violations.is_empty() {
    return Err(SchemaError::IntegrityCheckFailed(violations.join(", ")));
  }
  return Ok(());
}
