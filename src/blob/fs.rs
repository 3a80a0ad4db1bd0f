use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::fs;
use tracing::debug;

use super::{BlobError, BlobStore, check_name};

/// Filesystem-backed blob container: `{root}/{blob name}`.
///
/// Uploads are written to `{root}/.tmp` first and renamed into place so a
/// concurrent reader never sees a partial blob.
pub struct FsBlobStore {
    root: PathBuf,
    base_url: String,
}

impl FsBlobStore {
    pub async fn new(root: PathBuf, base_url: &str) -> Result<Self, BlobError> {
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join(".tmp")).await?;
        Ok(Self {
            root,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn blob_path(&self, name: &str) -> Result<PathBuf, BlobError> {
        check_name(name)?;
        Ok(self.root.join(name))
    }

    fn temp_path(&self) -> PathBuf {
        self.root
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }
}

#[rocket::async_trait]
impl BlobStore for FsBlobStore {
    async fn exists(&self, name: &str) -> Result<bool, BlobError> {
        let path = self.blob_path(name)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn upload(&self, name: &str, data: &[u8]) -> Result<(), BlobError> {
        let path = self.blob_path(name)?;
        let temp_path = self.temp_path();

        if let Err(e) = fs::write(&temp_path, data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(blob = %name, bytes = data.len(), "Uploaded blob");
        Ok(())
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.blob_path(name)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, name: &str) -> Result<(), BlobError> {
        let path = self.blob_path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>, BlobError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if check_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    fn url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }
}
