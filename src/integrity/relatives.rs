use tracing::debug;

use crate::error::AppError;
use crate::models::{Pid, StudentRelativeRef};
use crate::store::{EntityStore, Filter, find_many};

async fn refs_of_student(
    store: &dyn EntityStore,
    student_pid: Pid,
    excluding: Pid,
) -> Result<Vec<StudentRelativeRef>, AppError> {
    let refs: Vec<StudentRelativeRef> =
        find_many(store, &Filter::all().eq("student_pid", student_pid)).await?;

    Ok(refs
        .into_iter()
        .filter(|r| excluding.is_nil() || r.pid != excluding)
        .collect())
}

/// Keeps exactly one main relative per student across a create or update of
/// `incoming`.
///
/// `previous` is the stored state of the reference being updated, `None` on
/// create. The reference's own stored state is left out of the scan, so
/// re-submitting an unchanged main reference is accepted.
pub async fn enforce_single_main(
    store: &dyn EntityStore,
    incoming: &StudentRelativeRef,
    previous: Option<&StudentRelativeRef>,
) -> Result<(), AppError> {
    let own_pid = previous.map(|p| p.pid).unwrap_or(Pid::NIL);
    let siblings = refs_of_student(store, incoming.student_pid, own_pid).await?;

    if let Some(main) = siblings.iter().find(|r| r.is_main) {
        if incoming.is_main {
            return Err(AppError::InvariantConflict(format!(
                "Student {} already has main relative {} (reference {})",
                incoming.student_pid, main.relative_pid, main.pid
            )));
        }
    } else if !incoming.is_main {
        return Err(AppError::InvariantConflict(format!(
            "Student {} must keep exactly one main relative",
            incoming.student_pid
        )));
    }

    if let Some(previous) = previous {
        if previous.is_main && previous.student_pid != incoming.student_pid {
            let left_behind = refs_of_student(store, previous.student_pid, previous.pid).await?;
            if !left_behind.is_empty() {
                return Err(AppError::InvariantConflict(format!(
                    "Moving the main relative away would leave student {} without one",
                    previous.student_pid
                )));
            }
        }
    }

    debug!(
        student_pid = %incoming.student_pid,
        is_main = incoming.is_main,
        "Main relative invariant holds"
    );
    Ok(())
}
