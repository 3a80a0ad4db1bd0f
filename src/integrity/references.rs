use std::collections::HashSet;

use tracing::debug;

use crate::blob::BlobStore;
use crate::error::AppError;
use crate::models::{
    CloudMedia, CommentPersonType, Course, CourseComment, CourseRecord, Entity, EntityKind, Pid,
    Student, StudentCourseRef, StudentRelativeRef, Teacher,
};
use crate::store::{Document, EntityStore, Filter, find_many, from_document};

/// Resolves `pid` as a `kind` record.
///
/// A nil identifier is an input error and is reported before any lookup.
pub async fn validate_reference(
    store: &dyn EntityStore,
    kind: EntityKind,
    pid: Pid,
) -> Result<Document, AppError> {
    if pid.is_nil() {
        return Err(AppError::Validation(format!("No {} PID specified", kind)));
    }

    store
        .find_by_id(kind, pid)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No {} found with PID {}", kind, pid)))
}

pub async fn resolve<T: Entity>(store: &dyn EntityStore, pid: Pid) -> Result<T, AppError> {
    from_document(validate_reference(store, T::KIND, pid).await?)
}

pub async fn validate_teacher(store: &dyn EntityStore, teacher: &Teacher) -> Result<(), AppError> {
    validate_reference(store, EntityKind::Institute, teacher.institute_pid).await?;
    Ok(())
}

pub async fn validate_course(store: &dyn EntityStore, course: &Course) -> Result<(), AppError> {
    validate_reference(store, EntityKind::Institute, course.institute_pid).await?;
    validate_reference(store, EntityKind::Teacher, course.teacher_pid).await?;

    if let Some(assistant) = course.assistant() {
        if assistant == course.teacher_pid {
            return Err(AppError::Validation(
                "Course assistant must be different from the course teacher".to_string(),
            ));
        }
        validate_reference(store, EntityKind::Teacher, assistant).await?;
    }

    let mut seen = HashSet::new();
    for target in &course.course_targets {
        if target.tag.is_empty() {
            return Err(AppError::Validation(
                "Course target tags must not be empty".to_string(),
            ));
        }
        if !seen.insert(target.tag.as_str()) {
            return Err(AppError::Validation(format!(
                "Course target tag '{}' is declared more than once",
                target.tag
            )));
        }
    }

    Ok(())
}

pub async fn validate_student(store: &dyn EntityStore, student: &Student) -> Result<(), AppError> {
    validate_reference(store, EntityKind::Teacher, student.teacher_pid).await?;
    Ok(())
}

pub async fn validate_student_course_ref(
    store: &dyn EntityStore,
    course_ref: &StudentCourseRef,
) -> Result<(), AppError> {
    validate_reference(store, EntityKind::Student, course_ref.student_pid).await?;
    validate_reference(store, EntityKind::Course, course_ref.course_pid).await?;
    Ok(())
}

pub async fn validate_student_relative_ref(
    store: &dyn EntityStore,
    relative_ref: &StudentRelativeRef,
) -> Result<(), AppError> {
    validate_reference(store, EntityKind::Student, relative_ref.student_pid).await?;
    validate_reference(store, EntityKind::Relative, relative_ref.relative_pid).await?;
    Ok(())
}

/// Target tags are matched exactly against the tags declared on the course.
pub fn check_target_tag(course: &Course, tag: &str) -> Result<(), AppError> {
    if tag.is_empty() {
        return Err(AppError::Validation(
            "No course record target tag specified".to_string(),
        ));
    }

    if !course.has_target(tag) {
        return Err(AppError::Validation(format!(
            "Target tag '{}' is not declared on course {}",
            tag, course.pid
        )));
    }

    Ok(())
}

/// A course record needs a live enrollment for its (student, course) pair and
/// a target tag declared on that course.
pub async fn validate_course_record(
    store: &dyn EntityStore,
    record: &CourseRecord,
) -> Result<(), AppError> {
    if record.student_pid.is_nil() {
        return Err(AppError::Validation(format!(
            "No {} PID specified",
            EntityKind::Student
        )));
    }
    if record.course_pid.is_nil() {
        return Err(AppError::Validation(format!(
            "No {} PID specified",
            EntityKind::Course
        )));
    }

    let enrollment = Filter::all()
        .eq("student_pid", record.student_pid)
        .eq("course_pid", record.course_pid);
    let refs: Vec<StudentCourseRef> = find_many(store, &enrollment).await?;
    if refs.is_empty() {
        return Err(AppError::NotFound(format!(
            "Student {} is not enrolled in course {}",
            record.student_pid, record.course_pid
        )));
    }

    let course: Course = resolve(store, record.course_pid).await?;
    check_target_tag(&course, &record.target_tag)
}

pub async fn validate_course_comment(
    store: &dyn EntityStore,
    comment: &CourseComment,
) -> Result<(), AppError> {
    validate_reference(store, EntityKind::CourseRecord, comment.course_record_pid).await?;

    let person_type = CommentPersonType::parse(&comment.comment_person_type)?;
    validate_reference(store, person_type.kind(), comment.comment_person_pid).await?;

    Ok(())
}

/// Media metadata may only be stored once its blob has been uploaded. A linked
/// course record must belong to the same student.
pub async fn validate_cloud_media(
    store: &dyn EntityStore,
    blobs: &dyn BlobStore,
    media: &CloudMedia,
) -> Result<(), AppError> {
    validate_reference(store, EntityKind::Student, media.student_pid).await?;

    if let Some(record_pid) = media.course_record() {
        let record: CourseRecord = resolve(store, record_pid).await?;
        if record.student_pid != media.student_pid {
            return Err(AppError::Validation(format!(
                "Course record {} belongs to student {}, not {}",
                record_pid, record.student_pid, media.student_pid
            )));
        }
    }

    if !blobs.exists(&media.media_name).await? {
        return Err(AppError::NotFound(format!(
            "No media blob named '{}' has been uploaded",
            media.media_name
        )));
    }

    debug!(media_name = %media.media_name, "Cloud media references validated");
    Ok(())
}
