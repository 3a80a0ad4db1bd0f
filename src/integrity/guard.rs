use tracing::{debug, instrument};

use super::graph::{OnDelete, dependents_of};
use crate::error::AppError;
use crate::models::{EntityKind, Pid};
use crate::store::{Document, EntityStore};

/// Refuses deletion of `pid` while any blocking dependent references it.
#[instrument(skip(store))]
pub async fn assert_no_dependents(
    store: &dyn EntityStore,
    kind: EntityKind,
    pid: Pid,
) -> Result<(), AppError> {
    if pid.is_nil() {
        return Err(AppError::Validation(format!("No {} PID specified", kind)));
    }

    let doc = store
        .find_by_id(kind, pid)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No {} found with PID {}", kind, pid)))?;

    check_document(store, kind, &doc).await
}

/// Runs every block rule of `kind` against a loaded document.
/// Rules are checked in declaration order and the first hit is reported.
async fn check_document(
    store: &dyn EntityStore,
    kind: EntityKind,
    doc: &Document,
) -> Result<(), AppError> {
    let parent_pid = document_pid(doc)?;

    for dep in dependents_of(kind, OnDelete::Block) {
        let Some(filter) = dep.child_filter(doc) else {
            continue;
        };

        let children = store.find_by_filter(dep.child, &filter).await?;
        if let Some(child) = children.first() {
            let child_pid = document_pid(child)?;
            debug!(
                parent = %kind.as_str(),
                child = %dep.child.as_str(),
                child_pid = %child_pid,
                "Deletion blocked by dependent"
            );
            return Err(AppError::DependencyConflict {
                parent_kind: kind,
                parent_pid,
                child_kind: dep.child,
                child_pid,
            });
        }
    }

    Ok(())
}

pub(crate) fn document_pid(doc: &Document) -> Result<Pid, AppError> {
    doc.get("pid")
        .and_then(|value| value.as_str())
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| AppError::Internal("Stored document has no valid pid".to_string()))
}
