use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tracing::{debug, info};

use super::graph::{OnDelete, dependents_of, owned_blob_field};
use super::guard::{assert_no_dependents, document_pid};
use crate::blob::{BlobStore, delete_if_present};
use crate::error::AppError;
use crate::models::EntityKind;
use crate::store::{Document, EntityStore, Filter};

type CascadeFuture<'a> = Pin<Box<dyn Future<Output = Result<u64, AppError>> + Send + 'a>>;

/// Deletes records together with everything the dependency graph says they own.
///
/// For a set of matched roots the deleter first runs every block rule against
/// every root, so a blocked delete removes nothing. Roots are then removed one
/// at a time: cascaded children in edge order, the owned blob, then the record.
/// The first failure stops the walk and is reported as
/// [`AppError::PartialCascade`] carrying the number of roots already removed.
/// Nothing is rolled back.
pub struct CascadeDeleter<'a> {
    store: &'a dyn EntityStore,
    blobs: &'a dyn BlobStore,
}

impl<'a> CascadeDeleter<'a> {
    pub fn new(store: &'a dyn EntityStore, blobs: &'a dyn BlobStore) -> Self {
        Self { store, blobs }
    }

    /// Returns the number of `kind` records removed.
    pub fn delete_matching(&self, kind: EntityKind, filter: Filter) -> CascadeFuture<'_> {
        Box::pin(async move {
            let roots = self.store.find_by_filter(kind, &filter).await?;

            for root in &roots {
                assert_no_dependents(self.store, kind, document_pid(root)?).await?;
            }

            let mut deleted = 0;
            for root in &roots {
                if let Err(err) = self.delete_root(kind, root).await {
                    return Err(AppError::partial(deleted, err));
                }
                deleted += 1;
            }

            if deleted > 0 {
                info!(kind = %kind.as_str(), deleted, "Cascade delete completed");
            }

            Ok(deleted)
        })
    }

    async fn delete_root(&self, kind: EntityKind, root: &Document) -> Result<(), AppError> {
        let pid = document_pid(root)?;
        if pid.is_nil() {
            return Err(AppError::Internal(format!("Stored {} has a nil pid", kind)));
        }

        for dep in dependents_of(kind, OnDelete::Cascade) {
            if let Some(filter) = dep.child_filter(root) {
                self.delete_matching(dep.child, filter).await?;
            }
        }

        if let Some(field) = owned_blob_field(kind) {
            let blob = root
                .get(field)
                .and_then(Value::as_str)
                .filter(|name| !name.is_empty());

            if let Some(name) = blob {
                if delete_if_present(self.blobs, name).await? {
                    debug!(kind = %kind.as_str(), pid = %pid, blob = %name, "Deleted owned blob");
                } else {
                    debug!(kind = %kind.as_str(), pid = %pid, blob = %name, "Owned blob already absent");
                }
            }
        }

        self.store.delete_by_filter(kind, &Filter::by_pid(pid)).await?;
        debug!(kind = %kind.as_str(), pid = %pid, "Deleted record");

        Ok(())
    }
}
