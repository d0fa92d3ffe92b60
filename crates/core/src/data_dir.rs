use std::path::PathBuf;
use tokio::fs;

/// The base data directory where the sqlite database and uploaded files live.
#[derive(Debug, Clone)]
pub struct DataDir(pub PathBuf);

impl Default for DataDir {
  fn default() -> Self {
    Self(format!("./{}/", Self::DEFAULT).into())
  }
}

impl DataDir {
  pub const DEFAULT: &str = "bunbase_data";

  pub fn root(&self) -> &PathBuf {
    return &self.0;
  }

  pub fn main_db_path(&self) -> PathBuf {
    return self.data_path().join("main.db");
  }

  pub fn data_path(&self) -> PathBuf {
    return self.0.join("data/");
  }

  pub fn storage_path(&self) -> PathBuf {
    return self.0.join("storage/");
  }

  pub(crate) async fn ensure_directory_structure(&self) -> std::io::Result<()> {
    let directories = [self.data_path(), self.storage_path()];

    for dir in directories {
      if !fs::try_exists(&dir).await.unwrap_or(false) {
        fs::create_dir_all(dir).await?;
      }
    }

    return Ok(());
  }
}
