use rusqlite::{Statement, types};
use std::fmt::Debug;
use std::ops::Index;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
  name: String,
}

/// Materialized result set, detached from the connection thread.
#[derive(Debug)]
pub struct Rows(pub(crate) Vec<Row>, pub(crate) Arc<Vec<Column>>);

impl Rows {
  pub fn from_rows(mut rows: rusqlite::Rows) -> rusqlite::Result<Self> {
    let columns: Arc<Vec<Column>> = Arc::new(rows.as_ref().map_or_else(Vec::new, columns));

    let mut result = vec![];
    while let Some(row) = rows.next()? {
      result.push(Row::from_row(row, columns.clone())?);
    }

    return Ok(Self(result, columns));
  }

  pub fn len(&self) -> usize {
    return self.0.len();
  }

  pub fn is_empty(&self) -> bool {
    return self.0.is_empty();
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Row> {
    return self.0.iter();
  }

  pub fn get(&self, idx: usize) -> Option<&Row> {
    return self.0.get(idx);
  }

  pub fn column_count(&self) -> usize {
    return self.1.len();
  }

  pub fn column_name(&self, idx: usize) -> Option<&str> {
    return self.1.get(idx).map(|c| c.name.as_str());
  }
}

impl Index<usize> for Rows {
  type Output = Row;

  fn index(&self, idx: usize) -> &Self::Output {
    return &self.0[idx];
  }
}

impl IntoIterator for Rows {
  type Item = Row;
  type IntoIter = std::vec::IntoIter<Self::Item>;

  fn into_iter(self) -> Self::IntoIter {
    return self.0.into_iter();
  }
}

pub(crate) fn columns(stmt: &Statement<'_>) -> Vec<Column> {
  return stmt
    .columns()
    .into_iter()
    .map(|c| Column {
      name: c.name().to_string(),
    })
    .collect();
}

/// A single materialized row. Values are accessed by index or name.
#[derive(Debug)]
pub struct Row(pub(crate) Vec<types::Value>, pub(crate) Arc<Vec<Column>>);

impl Row {
  pub(crate) fn from_row(row: &rusqlite::Row, cols: Arc<Vec<Column>>) -> rusqlite::Result<Self> {
    // We have to access by index here, since names can be duplicate.
    let values = (0..cols.len())
      .map(|idx| row.get(idx).unwrap_or(types::Value::Null))
      .collect();

    return Ok(Self(values, cols));
  }

  pub fn get<T>(&self, idx: usize) -> types::FromSqlResult<T>
  where
    T: types::FromSql,
  {
    let Some(value) = self.0.get(idx) else {
      return Err(types::FromSqlError::OutOfRange(idx as i64));
    };
    return T::column_result(value.into());
  }

  pub fn get_by_name<T>(&self, name: &str) -> types::FromSqlResult<T>
  where
    T: types::FromSql,
  {
    let Some(idx) = self.1.iter().position(|c| c.name == name) else {
      return Err(types::FromSqlError::InvalidType);
    };
    return self.get(idx);
  }

  pub fn get_value(&self, idx: usize) -> Option<&types::Value> {
    return self.0.get(idx);
  }

  pub fn len(&self) -> usize {
    return self.0.len();
  }

  pub fn is_empty(&self) -> bool {
    return self.0.is_empty();
  }

  pub fn column_count(&self) -> usize {
    return self.1.len();
  }

  pub fn column_name(&self, idx: usize) -> Option<&str> {
    return self.1.get(idx).map(|c| c.name.as_str());
  }
}

impl Index<usize> for Row {
  type Output = types::Value;

  fn index(&self, idx: usize) -> &Self::Output {
    return &self.0[idx];
  }
}
