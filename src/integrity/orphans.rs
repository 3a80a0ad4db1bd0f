use std::collections::HashSet;

use tracing::{info, instrument};

use crate::blob::{BlobStore, delete_if_present};
use crate::error::AppError;
use crate::models::{CloudMedia, Student};
use crate::store::{EntityStore, Filter, find_many};

/// Deletes every blob that neither a student image nor a cloud media record
/// names. Returns the number of blobs removed.
///
/// A blob uploaded just before its record is written can be swept as a false
/// positive.
#[instrument(skip_all)]
pub async fn reconcile_orphan_blobs(
    store: &dyn EntityStore,
    blobs: &dyn BlobStore,
) -> Result<u64, AppError> {
    let students: Vec<Student> = find_many(store, &Filter::all()).await?;
    let media: Vec<CloudMedia> = find_many(store, &Filter::all()).await?;

    let referenced: HashSet<String> = students
        .into_iter()
        .map(|s| s.image_name)
        .chain(media.into_iter().map(|m| m.media_name))
        .filter(|name| !name.is_empty())
        .collect();

    let mut deleted = 0;
    for name in blobs.list().await? {
        if referenced.contains(&name) {
            continue;
        }

        if delete_if_present(blobs, &name).await? {
            info!(blob = %name, "Blob is neither a student image nor cloud media, deleted it");
            deleted += 1;
        }
    }

    info!(deleted, "Orphan blob sweep finished");
    Ok(deleted)
}
