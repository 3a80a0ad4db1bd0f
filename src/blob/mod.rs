mod fs;

pub use fs::FsBlobStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("invalid blob name: {0}")]
    InvalidName(String),

    #[error("blob service unavailable: {0}")]
    Unavailable(String),

    #[error("blob storage IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Object storage keyed by blob name. One store is one container.
#[rocket::async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool, BlobError>;

    async fn upload(&self, name: &str, data: &[u8]) -> Result<(), BlobError>;

    async fn download(&self, name: &str) -> Result<Vec<u8>, BlobError>;

    /// Fails with [`BlobError::NotFound`] when the blob is absent.
    async fn delete(&self, name: &str) -> Result<(), BlobError>;

    /// Names of every blob in the container.
    async fn list(&self) -> Result<Vec<String>, BlobError>;

    /// Public URL a client can fetch the blob from.
    fn url(&self, name: &str) -> String;
}

/// Deletes a blob, treating "already absent" as success.
///
/// Returns `true` when a blob was actually removed.
pub async fn delete_if_present(blobs: &dyn BlobStore, name: &str) -> Result<bool, BlobError> {
    match blobs.delete(name).await {
        Ok(()) => Ok(true),
        Err(BlobError::NotFound(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

pub(crate) fn check_name(name: &str) -> Result<(), BlobError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0']);

    if valid {
        Ok(())
    } else {
        Err(BlobError::InvalidName(name.to_string()))
    }
}
