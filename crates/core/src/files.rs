use const_format::formatcp;
use log::*;
use std::path::PathBuf;
use thiserror::Error;

use crate::constants::FILES_TABLE;
use crate::schema::Field;
use crate::util::new_record_id;
use bunbase_sqlite::{Connection, params};

#[derive(Debug, Error)]
pub enum FileError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Invalid path component: {0}")]
  InvalidPath(String),
}

/// Only plain, dot-safe names may become path components under the storage
/// root. Record ids and generated filenames satisfy this by construction;
/// anything client-supplied is checked.
pub(crate) fn is_safe_path_component(name: &str) -> bool {
  return !name.is_empty()
    && !name.starts_with('.')
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
}

/// Per-record file tree on the local filesystem:
/// `<root>/<collection>/<recordId>/<filename>`.
///
/// The root is resolved to an absolute path at startup and lives outside the
/// executable.
#[derive(Clone, Debug)]
pub struct FileStore {
  root: PathBuf,
}

impl FileStore {
  pub fn new(root: PathBuf) -> Self {
    return Self { root };
  }

  pub fn root(&self) -> &PathBuf {
    return &self.root;
  }

  fn record_dir(&self, collection: &str, record_id: &str) -> Result<PathBuf, FileError> {
    for component in [collection, record_id] {
      if !is_safe_path_component(component) {
        return Err(FileError::InvalidPath(component.to_string()));
      }
    }
    return Ok(self.root.join(collection).join(record_id));
  }

  fn file_path(
    &self,
    collection: &str,
    record_id: &str,
    filename: &str,
  ) -> Result<PathBuf, FileError> {
    if !is_safe_path_component(filename) {
      return Err(FileError::InvalidPath(filename.to_string()));
    }
    return Ok(self.record_dir(collection, record_id)?.join(filename));
  }

  pub async fn write(
    &self,
    collection: &str,
    record_id: &str,
    filename: &str,
    contents: &[u8],
  ) -> Result<(), FileError> {
    let path = self.file_path(collection, record_id, filename)?;
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    return Ok(());
  }

  pub async fn read(
    &self,
    collection: &str,
    record_id: &str,
    filename: &str,
  ) -> Result<Vec<u8>, FileError> {
    let path = self.file_path(collection, record_id, filename)?;
    return Ok(tokio::fs::read(path).await?);
  }

  pub async fn remove_file(
    &self,
    collection: &str,
    record_id: &str,
    filename: &str,
  ) -> Result<(), FileError> {
    let path = self.file_path(collection, record_id, filename)?;
    match tokio::fs::remove_file(path).await {
      Ok(()) => Ok(()),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(err) => Err(err.into()),
    }
  }

  /// Remove a record's whole directory, e.g. on record deletion.
  pub async fn remove_record_dir(
    &self,
    collection: &str,
    record_id: &str,
  ) -> Result<(), FileError> {
    let path = self.record_dir(collection, record_id)?;
    match tokio::fs::remove_dir_all(path).await {
      Ok(()) => Ok(()),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(err) => Err(err.into()),
    }
  }

  pub async fn remove_collection_dir(&self, collection: &str) -> Result<(), FileError> {
    if !is_safe_path_component(collection) {
      return Err(FileError::InvalidPath(collection.to_string()));
    }
    match tokio::fs::remove_dir_all(self.root.join(collection)).await {
      Ok(()) => Ok(()),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(err) => Err(err.into()),
    }
  }
}

/// One uploaded file as separated from the scalar fields at the multipart
/// boundary.
#[derive(Clone, Debug)]
pub struct FileUpload {
  pub field: String,
  pub original_name: String,
  pub content_type: Option<String>,
  pub data: Vec<u8>,
}

/// Generated opaque filename preserving the (sanitized) original extension.
pub(crate) fn generate_filename(original_name: &str) -> String {
  let extension: Option<&str> = original_name.rsplit_once('.').map(|(_, ext)| ext).filter(|ext| {
    return !ext.is_empty()
      && ext.len() <= 10
      && ext.chars().all(|c| c.is_ascii_alphanumeric());
  });

  return match extension {
    Some(ext) => format!("{id}.{ext}", id = new_record_id(), ext = ext.to_lowercase()),
    None => new_record_id(),
  };
}

fn mime_matches(pattern: &str, content_type: &str) -> bool {
  if let Some(prefix) = pattern.strip_suffix("/*") {
    return content_type
      .split(';')
      .next()
      .and_then(|t| t.split('/').next())
      .is_some_and(|t| t.eq_ignore_ascii_case(prefix));
  }
  return content_type
    .split(';')
    .next()
    .is_some_and(|t| t.eq_ignore_ascii_case(pattern));
}

/// Validate one upload against its field's options: max byte size and the
/// MIME allow-list (wildcards like `image/*` permitted). The declared
/// content type is client-provided and not trusted beyond this gate.
pub(crate) fn validate_upload(field: &Field, upload: &FileUpload) -> Result<(), String> {
  if let Some(max_size) = field.options.max_size
    && upload.data.len() as u64 > max_size
  {
    return Err(format!("file exceeds maximum size of {max_size} bytes"));
  }

  if let Some(ref allowed) = field.options.mime_types {
    let Some(ref content_type) = upload.content_type else {
      return Err("missing content type".to_string());
    };
    if !allowed.iter().any(|pattern| mime_matches(pattern, content_type)) {
      return Err(format!("unsupported content type: {content_type}"));
    }
  }

  return Ok(());
}

/// File metadata tracked in `_files`, keyed by
/// `(collection, recordId, field, filename)`.
pub(crate) struct FileMetadata {
  pub field: String,
  pub filename: String,
  pub original_name: String,
  pub content_type: Option<String>,
  pub size: u64,
}

pub(crate) async fn delete_file_metadata(
  conn: &Connection,
  collection: &str,
  record_id: &str,
  filenames: Option<&[String]>,
) -> Result<(), bunbase_sqlite::Error> {
  match filenames {
    None => {
      const QUERY: &str =
        formatcp!("DELETE FROM {FILES_TABLE} WHERE collection = $1 AND record_id = $2");
      conn
        .execute(QUERY, params!(collection.to_string(), record_id.to_string()))
        .await?;
    }
    Some(filenames) => {
      const QUERY: &str = formatcp!(
        "DELETE FROM {FILES_TABLE}
         WHERE collection = $1 AND record_id = $2 AND filename = $3"
      );
      for filename in filenames {
        conn
          .execute(
            QUERY,
            params!(
              collection.to_string(),
              record_id.to_string(),
              filename.clone()
            ),
          )
          .await?;
      }
    }
  }
  return Ok(());
}

pub(crate) async fn lookup_file_content_type(
  conn: &Connection,
  collection: &str,
  record_id: &str,
  filename: &str,
) -> Result<Option<String>, bunbase_sqlite::Error> {
  const QUERY: &str = formatcp!(
    "SELECT content_type FROM {FILES_TABLE}
     WHERE collection = $1 AND record_id = $2 AND filename = $3"
  );

  let row = conn
    .query_row(
      QUERY,
      params!(
        collection.to_string(),
        record_id.to_string(),
        filename.to_string()
      ),
    )
    .await?;

  return Ok(row.and_then(|r| r.get::<Option<String>>(0).ok()).flatten());
}

/// Drop-guard around freshly written files: unless released after the record
/// write commits, the files are cleaned back up.
pub(crate) struct WrittenFiles {
  store: FileStore,
  collection: String,
  record_id: String,
  filenames: Vec<String>,
  released: bool,
}

impl WrittenFiles {
  pub(crate) fn new(store: FileStore, collection: &str, record_id: &str) -> Self {
    return Self {
      store,
      collection: collection.to_string(),
      record_id: record_id.to_string(),
      filenames: vec![],
      released: false,
    };
  }

  pub(crate) fn track(&mut self, filename: String) {
    self.filenames.push(filename);
  }

  pub(crate) fn release(&mut self) {
    self.released = true;
  }
}

impl Drop for WrittenFiles {
  fn drop(&mut self) {
    if self.released || self.filenames.is_empty() {
      return;
    }

    let store = self.store.clone();
    let collection = std::mem::take(&mut self.collection);
    let record_id = std::mem::take(&mut self.record_id);
    let filenames = std::mem::take(&mut self.filenames);

    tokio::spawn(async move {
      for filename in filenames {
        if let Err(err) = store.remove_file(&collection, &record_id, &filename).await {
          warn!("Failed to clean up just-written file: {err}");
        }
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::{FieldOptions, FieldType};

  fn file_field(options: FieldOptions) -> Field {
    return Field {
      id: "f0".to_string(),
      collection_id: "c0".to_string(),
      name: "attachment".to_string(),
      field_type: FieldType::File,
      required: false,
      options,
      created_at: String::new(),
    };
  }

  fn upload(content_type: Option<&str>, size: usize) -> FileUpload {
    return FileUpload {
      field: "attachment".to_string(),
      original_name: "photo.PNG".to_string(),
      content_type: content_type.map(str::to_string),
      data: vec![0; size],
    };
  }

  #[test]
  fn test_path_component_safety() {
    assert!(is_safe_path_component("posts"));
    assert!(is_safe_path_component("abc-123_x.png"));

    assert!(!is_safe_path_component(".."));
    assert!(!is_safe_path_component(".hidden"));
    assert!(!is_safe_path_component("a/b"));
    assert!(!is_safe_path_component(""));
  }

  #[test]
  fn test_generated_filenames_keep_extension() {
    let name = generate_filename("photo.PNG");
    assert!(name.ends_with(".png"));

    let name = generate_filename("no_extension");
    assert!(!name.contains('.'));

    // Hostile extensions are dropped.
    let name = generate_filename("x.sh;rm -rf");
    assert!(!name.contains(';'));
  }

  #[test]
  fn test_upload_validation() {
    let field = file_field(FieldOptions {
      max_size: Some(10),
      mime_types: Some(vec!["image/*".to_string(), "application/pdf".to_string()]),
      ..Default::default()
    });

    assert!(validate_upload(&field, &upload(Some("image/png"), 5)).is_ok());
    assert!(validate_upload(&field, &upload(Some("application/pdf"), 5)).is_ok());

    // Too big.
    assert!(validate_upload(&field, &upload(Some("image/png"), 11)).is_err());
    // Wrong type.
    assert!(validate_upload(&field, &upload(Some("text/html"), 5)).is_err());
    // No declared type while an allow-list is set.
    assert!(validate_upload(&field, &upload(None, 5)).is_err());
  }

  #[tokio::test]
  async fn test_store_write_read_remove() {
    let tmp = temp_dir::TempDir::new().unwrap();
    let store = FileStore::new(tmp.path().to_path_buf());

    store
      .write("posts", "r1", "a.txt", b"hello")
      .await
      .unwrap();
    assert_eq!(store.read("posts", "r1", "a.txt").await.unwrap(), b"hello");

    store.remove_record_dir("posts", "r1").await.unwrap();
    assert!(store.read("posts", "r1", "a.txt").await.is_err());

    // Traversal attempts are rejected outright.
    assert!(store.read("posts", "..", "a.txt").await.is_err());
  }
}
