use serde_json::Value;

use crate::models::EntityKind;
use crate::store::{Document, Filter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    /// Refuse to delete the parent while a child exists.
    Block,
    /// Delete the children before the parent.
    Cascade,
}

/// A parent-to-child edge. `keys` maps parent fields onto the child fields
/// that must equal them.
#[derive(Debug, Clone, Copy)]
pub struct Dependency {
    pub parent: EntityKind,
    pub child: EntityKind,
    pub keys: &'static [(&'static str, &'static str)],
    pub on_delete: OnDelete,
}

const fn edge(
    parent: EntityKind,
    child: EntityKind,
    keys: &'static [(&'static str, &'static str)],
    on_delete: OnDelete,
) -> Dependency {
    Dependency {
        parent,
        child,
        keys,
        on_delete,
    }
}

// Cascade edges of one parent run in the order listed here.
pub const DEPENDENCIES: &[Dependency] = &[
    edge(
        EntityKind::Institute,
        EntityKind::Teacher,
        &[("pid", "institute_pid")],
        OnDelete::Block,
    ),
    edge(
        EntityKind::Institute,
        EntityKind::Course,
        &[("pid", "institute_pid")],
        OnDelete::Block,
    ),
    edge(
        EntityKind::Teacher,
        EntityKind::Course,
        &[("pid", "teacher_pid")],
        OnDelete::Block,
    ),
    edge(
        EntityKind::Teacher,
        EntityKind::Course,
        &[("pid", "assistant_pid")],
        OnDelete::Block,
    ),
    edge(
        EntityKind::Teacher,
        EntityKind::Student,
        &[("pid", "teacher_pid")],
        OnDelete::Block,
    ),
    edge(
        EntityKind::Course,
        EntityKind::StudentCourseRef,
        &[("pid", "course_pid")],
        OnDelete::Block,
    ),
    edge(
        EntityKind::Student,
        EntityKind::StudentCourseRef,
        &[("pid", "student_pid")],
        OnDelete::Block,
    ),
    edge(
        EntityKind::Student,
        EntityKind::StudentRelativeRef,
        &[("pid", "student_pid")],
        OnDelete::Block,
    ),
    edge(
        EntityKind::Student,
        EntityKind::CloudMedia,
        &[("pid", "student_pid")],
        OnDelete::Cascade,
    ),
    edge(
        EntityKind::Relative,
        EntityKind::StudentRelativeRef,
        &[("pid", "relative_pid")],
        OnDelete::Block,
    ),
    edge(
        EntityKind::StudentCourseRef,
        EntityKind::CourseRecord,
        &[("student_pid", "student_pid"), ("course_pid", "course_pid")],
        OnDelete::Cascade,
    ),
    edge(
        EntityKind::CourseRecord,
        EntityKind::CourseComment,
        &[("pid", "course_record_pid")],
        OnDelete::Cascade,
    ),
    edge(
        EntityKind::CourseRecord,
        EntityKind::CloudMedia,
        &[("pid", "course_record_pid")],
        OnDelete::Cascade,
    ),
];

pub fn dependents_of(
    kind: EntityKind,
    on_delete: OnDelete,
) -> impl Iterator<Item = &'static Dependency> {
    DEPENDENCIES
        .iter()
        .filter(move |dep| dep.parent == kind && dep.on_delete == on_delete)
}

/// The document field naming the blob a record of `kind` owns, if any.
pub fn owned_blob_field(kind: EntityKind) -> Option<&'static str> {
    match kind {
        EntityKind::Student => Some("image_name"),
        EntityKind::CloudMedia => Some("media_name"),
        _ => None,
    }
}

impl Dependency {
    /// Filter selecting the children of `parent` along this edge.
    ///
    /// Returns `None` when a key field is unset on the parent, in which case
    /// the parent has no children here.
    pub fn child_filter(&self, parent: &Document) -> Option<Filter> {
        let mut filter = Filter::all();

        for &(parent_field, child_field) in self.keys {
            match parent.get(parent_field) {
                None | Some(Value::Null) => return None,
                Some(Value::String(s)) if s.is_empty() => return None,
                Some(value) => filter = filter.eq(child_field, value.clone()),
            }
        }

        Some(filter)
    }
}
