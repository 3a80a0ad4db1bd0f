use chrono::Utc;
use tracing::{info, instrument};
use validator::Validate;

use crate::error::AppError;
use crate::integrity::references::{
    validate_cloud_media, validate_course, validate_course_comment, validate_course_record,
    validate_student, validate_student_course_ref, validate_student_relative_ref,
    validate_teacher,
};
use crate::integrity::relatives::enforce_single_main;
use crate::models::{
    CloudMedia, Course, CourseComment, CourseRecord, Entity, EntityKind, Institute, Pid, Relative,
    Student, StudentCourseRef, StudentRelativeRef, Teacher,
};
use crate::state::AppState;
use crate::store::{Filter, UpdateOutcome, find_many, find_one, insert_entity, update_entity};

fn require_pid(kind: EntityKind, pid: Pid) -> Result<(), AppError> {
    if pid.is_nil() {
        return Err(AppError::Validation(format!("No {} PID specified", kind)));
    }
    Ok(())
}

fn check_outcome(kind: EntityKind, pid: Pid, outcome: UpdateOutcome) -> Result<(), AppError> {
    if outcome.matched == 0 {
        return Err(AppError::NotFound(format!("No {} found with PID {}", kind, pid)));
    }
    if outcome.modified == 0 {
        return Err(AppError::Unchanged(format!(
            "{} {} already holds the submitted values",
            kind, pid
        )));
    }
    Ok(())
}

async fn load<T: Entity>(state: &AppState, pid: Pid) -> Result<T, AppError> {
    require_pid(T::KIND, pid)?;
    find_one(state.store(), pid)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No {} found with PID {}", T::KIND, pid)))
}

async fn find_by_pid<T: Entity>(state: &AppState, pid: Pid) -> Result<Vec<T>, AppError> {
    let found: Vec<T> = find_many(state.store(), &Filter::by_pid(pid)).await?;
    info!(count = found.len(), "Found {} record(s)", T::KIND);
    Ok(found)
}

async fn store_update<T: Entity>(state: &AppState, entity: &T) -> Result<(), AppError> {
    let outcome = update_entity(state.store(), entity.pid(), entity).await?;
    check_outcome(T::KIND, entity.pid(), outcome)
}

// Institutes

#[instrument(skip(state))]
pub async fn find_institutes(state: &AppState, pid: Pid) -> Result<Vec<Institute>, AppError> {
    find_by_pid(state, pid).await
}

#[instrument(skip(state))]
pub async fn create_institute(state: &AppState, institute: Institute) -> Result<Pid, AppError> {
    info!("Creating institute");
    institute.validate()?;
    insert_entity(state.store(), &institute).await
}

#[instrument(skip(state))]
pub async fn update_institute(state: &AppState, institute: Institute) -> Result<(), AppError> {
    info!("Updating institute");
    require_pid(EntityKind::Institute, institute.pid)?;
    institute.validate()?;
    store_update(state, &institute).await
}

#[instrument(skip(state))]
pub async fn delete_institutes(state: &AppState, pid: Pid) -> Result<u64, AppError> {
    info!("Deleting institute(s)");
    state
        .cascade()
        .delete_matching(EntityKind::Institute, Filter::by_pid(pid))
        .await
}

// Teachers

#[instrument(skip(state))]
pub async fn find_teachers(state: &AppState, pid: Pid) -> Result<Vec<Teacher>, AppError> {
    find_by_pid(state, pid).await
}

#[instrument(skip(state))]
pub async fn create_teacher(state: &AppState, teacher: Teacher) -> Result<Pid, AppError> {
    info!("Creating teacher");
    teacher.validate()?;
    validate_teacher(state.store(), &teacher).await?;
    insert_entity(state.store(), &teacher).await
}

#[instrument(skip(state))]
pub async fn update_teacher(state: &AppState, teacher: Teacher) -> Result<(), AppError> {
    info!("Updating teacher");
    require_pid(EntityKind::Teacher, teacher.pid)?;
    teacher.validate()?;
    validate_teacher(state.store(), &teacher).await?;
    store_update(state, &teacher).await
}

#[instrument(skip(state))]
pub async fn delete_teachers(state: &AppState, pid: Pid) -> Result<u64, AppError> {
    info!("Deleting teacher(s)");
    state
        .cascade()
        .delete_matching(EntityKind::Teacher, Filter::by_pid(pid))
        .await
}

// Courses

#[instrument(skip(state))]
pub async fn find_courses(state: &AppState, pid: Pid) -> Result<Vec<Course>, AppError> {
    find_by_pid(state, pid).await
}

#[instrument(skip(state))]
pub async fn create_course(state: &AppState, course: Course) -> Result<Pid, AppError> {
    info!("Creating course");
    course.validate()?;
    validate_course(state.store(), &course).await?;
    insert_entity(state.store(), &course).await
}

#[instrument(skip(state))]
pub async fn update_course(state: &AppState, course: Course) -> Result<(), AppError> {
    info!("Updating course");
    require_pid(EntityKind::Course, course.pid)?;
    course.validate()?;
    validate_course(state.store(), &course).await?;
    store_update(state, &course).await
}

#[instrument(skip(state))]
pub async fn delete_courses(state: &AppState, pid: Pid) -> Result<u64, AppError> {
    info!("Deleting course(s)");
    state
        .cascade()
        .delete_matching(EntityKind::Course, Filter::by_pid(pid))
        .await
}

// Students

/// Points the image fields at the derived image blob when it has been
/// uploaded and clears them otherwise.
async fn apply_student_image(state: &AppState, student: &mut Student) -> Result<(), AppError> {
    let image_name = Student::image_blob_name(student.pid);

    if state.blobs().exists(&image_name).await? {
        student.image_url = state.blobs().url(&image_name);
        student.image_name = image_name;
    } else {
        student.image_name.clear();
        student.image_url.clear();
    }

    Ok(())
}

#[instrument(skip(state))]
pub async fn find_students(state: &AppState, pid: Pid) -> Result<Vec<Student>, AppError> {
    find_by_pid(state, pid).await
}

#[instrument(skip(state))]
pub async fn create_student(state: &AppState, mut student: Student) -> Result<Pid, AppError> {
    info!("Creating student");
    student.validate()?;
    validate_student(state.store(), &student).await?;

    student.image_name.clear();
    student.image_url.clear();
    let pid = insert_entity(state.store(), &student).await?;

    // The image name derives from the pid, so it can only be checked now.
    student.pid = pid;
    apply_student_image(state, &mut student).await?;
    if !student.image_name.is_empty() {
        update_entity(state.store(), pid, &student).await?;
    }

    Ok(pid)
}

#[instrument(skip(state))]
pub async fn update_student(state: &AppState, mut student: Student) -> Result<(), AppError> {
    info!("Updating student");
    require_pid(EntityKind::Student, student.pid)?;
    student.validate()?;
    validate_student(state.store(), &student).await?;
    apply_student_image(state, &mut student).await?;
    store_update(state, &student).await
}

#[instrument(skip(state))]
pub async fn delete_students(state: &AppState, pid: Pid) -> Result<u64, AppError> {
    info!("Deleting student(s)");
    state
        .cascade()
        .delete_matching(EntityKind::Student, Filter::by_pid(pid))
        .await
}

// Relatives

#[instrument(skip(state))]
pub async fn find_relatives(state: &AppState, pid: Pid) -> Result<Vec<Relative>, AppError> {
    find_by_pid(state, pid).await
}

#[instrument(skip(state))]
pub async fn create_relative(state: &AppState, relative: Relative) -> Result<Pid, AppError> {
    info!("Creating relative");
    relative.validate()?;
    insert_entity(state.store(), &relative).await
}

#[instrument(skip(state))]
pub async fn update_relative(state: &AppState, relative: Relative) -> Result<(), AppError> {
    info!("Updating relative");
    require_pid(EntityKind::Relative, relative.pid)?;
    relative.validate()?;
    store_update(state, &relative).await
}

#[instrument(skip(state))]
pub async fn delete_relatives(state: &AppState, pid: Pid) -> Result<u64, AppError> {
    info!("Deleting relative(s)");
    state
        .cascade()
        .delete_matching(EntityKind::Relative, Filter::by_pid(pid))
        .await
}

// Student-course references

fn course_ref_filter(student_pid: Pid, course_pid: Pid) -> Filter {
    Filter::all()
        .pid_eq("student_pid", student_pid)
        .pid_eq("course_pid", course_pid)
}

async fn reject_duplicate_enrollment(
    state: &AppState,
    course_ref: &StudentCourseRef,
) -> Result<(), AppError> {
    let existing: Vec<StudentCourseRef> = find_many(
        state.store(),
        &course_ref_filter(course_ref.student_pid, course_ref.course_pid),
    )
    .await?;

    if let Some(other) = existing.iter().find(|r| r.pid != course_ref.pid) {
        return Err(AppError::InvariantConflict(format!(
            "Student {} is already enrolled in course {} (reference {})",
            course_ref.student_pid, course_ref.course_pid, other.pid
        )));
    }

    Ok(())
}

#[instrument(skip(state))]
pub async fn find_student_course_refs(
    state: &AppState,
    student_pid: Pid,
    course_pid: Pid,
) -> Result<Vec<StudentCourseRef>, AppError> {
    let refs: Vec<StudentCourseRef> =
        find_many(state.store(), &course_ref_filter(student_pid, course_pid)).await?;
    info!(count = refs.len(), "Found student-course references");
    Ok(refs)
}

#[instrument(skip(state))]
pub async fn create_student_course_ref(
    state: &AppState,
    course_ref: StudentCourseRef,
) -> Result<Pid, AppError> {
    info!("Creating student-course reference");
    validate_student_course_ref(state.store(), &course_ref).await?;
    reject_duplicate_enrollment(state, &course_ref).await?;
    insert_entity(state.store(), &course_ref).await
}

#[instrument(skip(state))]
pub async fn update_student_course_ref(
    state: &AppState,
    course_ref: StudentCourseRef,
) -> Result<(), AppError> {
    info!("Updating student-course reference");
    let previous: StudentCourseRef = load(state, course_ref.pid).await?;
    validate_student_course_ref(state.store(), &course_ref).await?;
    reject_duplicate_enrollment(state, &course_ref).await?;

    let pair_changed = previous.student_pid != course_ref.student_pid
        || previous.course_pid != course_ref.course_pid;
    if pair_changed {
        let records: Vec<CourseRecord> = find_many(
            state.store(),
            &Filter::all()
                .eq("student_pid", previous.student_pid)
                .eq("course_pid", previous.course_pid),
        )
        .await?;

        if let Some(record) = records.first() {
            return Err(AppError::DependencyConflict {
                parent_kind: EntityKind::StudentCourseRef,
                parent_pid: previous.pid,
                child_kind: EntityKind::CourseRecord,
                child_pid: record.pid,
            });
        }
    }

    store_update(state, &course_ref).await
}

#[instrument(skip(state))]
pub async fn delete_student_course_refs(
    state: &AppState,
    student_pid: Pid,
    course_pid: Pid,
) -> Result<u64, AppError> {
    info!("Deleting student-course reference(s)");
    state
        .cascade()
        .delete_matching(
            EntityKind::StudentCourseRef,
            course_ref_filter(student_pid, course_pid),
        )
        .await
}

// Student-relative references

fn relative_ref_filter(student_pid: Pid, relative_pid: Pid) -> Filter {
    Filter::all()
        .pid_eq("student_pid", student_pid)
        .pid_eq("relative_pid", relative_pid)
}

#[instrument(skip(state))]
pub async fn find_student_relative_refs(
    state: &AppState,
    student_pid: Pid,
    relative_pid: Pid,
) -> Result<Vec<StudentRelativeRef>, AppError> {
    let refs: Vec<StudentRelativeRef> =
        find_many(state.store(), &relative_ref_filter(student_pid, relative_pid)).await?;
    info!(count = refs.len(), "Found student-relative references");
    Ok(refs)
}

#[instrument(skip(state))]
pub async fn create_student_relative_ref(
    state: &AppState,
    relative_ref: StudentRelativeRef,
) -> Result<Pid, AppError> {
    info!("Creating student-relative reference");
    validate_student_relative_ref(state.store(), &relative_ref).await?;
    enforce_single_main(state.store(), &relative_ref, None).await?;
    insert_entity(state.store(), &relative_ref).await
}

#[instrument(skip(state))]
pub async fn update_student_relative_ref(
    state: &AppState,
    relative_ref: StudentRelativeRef,
) -> Result<(), AppError> {
    info!("Updating student-relative reference");
    let previous: StudentRelativeRef = load(state, relative_ref.pid).await?;
    validate_student_relative_ref(state.store(), &relative_ref).await?;
    enforce_single_main(state.store(), &relative_ref, Some(&previous)).await?;
    store_update(state, &relative_ref).await
}

#[instrument(skip(state))]
pub async fn delete_student_relative_refs(
    state: &AppState,
    student_pid: Pid,
    relative_pid: Pid,
) -> Result<u64, AppError> {
    info!("Deleting student-relative reference(s)");
    state
        .cascade()
        .delete_matching(
            EntityKind::StudentRelativeRef,
            relative_ref_filter(student_pid, relative_pid),
        )
        .await
}

// Course records

#[instrument(skip(state))]
pub async fn find_course_records(
    state: &AppState,
    pid: Pid,
) -> Result<Vec<CourseRecord>, AppError> {
    find_by_pid(state, pid).await
}

#[instrument(skip(state))]
pub async fn find_course_records_by_pair(
    state: &AppState,
    student_pid: Pid,
    course_pid: Pid,
) -> Result<Vec<CourseRecord>, AppError> {
    let records: Vec<CourseRecord> =
        find_many(state.store(), &course_ref_filter(student_pid, course_pid)).await?;
    info!(count = records.len(), "Found course records");
    Ok(records)
}

#[instrument(skip(state))]
pub async fn create_course_record(
    state: &AppState,
    mut record: CourseRecord,
) -> Result<Pid, AppError> {
    info!("Creating course record");
    validate_course_record(state.store(), &record).await?;
    record.created_at = Some(Utc::now());
    insert_entity(state.store(), &record).await
}

#[instrument(skip(state))]
pub async fn update_course_record(state: &AppState, record: CourseRecord) -> Result<(), AppError> {
    info!("Updating course record");
    let previous: CourseRecord = load(state, record.pid).await?;
    validate_course_record(state.store(), &record).await?;

    // Linked media must stay with the record's student.
    if previous.student_pid != record.student_pid {
        let media: Vec<CloudMedia> = find_many(
            state.store(),
            &Filter::all().eq("course_record_pid", previous.pid),
        )
        .await?;

        if let Some(linked) = media.first() {
            return Err(AppError::DependencyConflict {
                parent_kind: EntityKind::CourseRecord,
                parent_pid: previous.pid,
                child_kind: EntityKind::CloudMedia,
                child_pid: linked.pid,
            });
        }
    }

    store_update(state, &record).await
}

#[instrument(skip(state))]
pub async fn delete_course_records(state: &AppState, pid: Pid) -> Result<u64, AppError> {
    info!("Deleting course record(s)");
    state
        .cascade()
        .delete_matching(EntityKind::CourseRecord, Filter::by_pid(pid))
        .await
}

// Course comments

#[instrument(skip(state))]
pub async fn find_course_comments(
    state: &AppState,
    pid: Pid,
) -> Result<Vec<CourseComment>, AppError> {
    find_by_pid(state, pid).await
}

#[instrument(skip(state))]
pub async fn create_course_comment(
    state: &AppState,
    mut comment: CourseComment,
) -> Result<Pid, AppError> {
    info!("Creating course comment");
    validate_course_comment(state.store(), &comment).await?;
    comment.created_at = Some(Utc::now());
    insert_entity(state.store(), &comment).await
}

#[instrument(skip(state))]
pub async fn update_course_comment(
    state: &AppState,
    comment: CourseComment,
) -> Result<(), AppError> {
    info!("Updating course comment");
    require_pid(EntityKind::CourseComment, comment.pid)?;
    validate_course_comment(state.store(), &comment).await?;
    store_update(state, &comment).await
}

#[instrument(skip(state))]
pub async fn delete_course_comments(state: &AppState, pid: Pid) -> Result<u64, AppError> {
    info!("Deleting course comment(s)");
    state
        .cascade()
        .delete_matching(EntityKind::CourseComment, Filter::by_pid(pid))
        .await
}

// Cloud media

#[instrument(skip(state))]
pub async fn find_cloud_media(state: &AppState, pid: Pid) -> Result<Vec<CloudMedia>, AppError> {
    find_by_pid(state, pid).await
}

/// Media of one student, highest rank first.
#[instrument(skip(state))]
pub async fn find_student_media(
    state: &AppState,
    student_pid: Pid,
) -> Result<Vec<CloudMedia>, AppError> {
    require_pid(EntityKind::Student, student_pid)?;

    let mut media: Vec<CloudMedia> = find_many(
        state.store(),
        &Filter::all().eq("student_pid", student_pid),
    )
    .await?;
    media.sort_by(|a, b| b.rank_score.total_cmp(&a.rank_score));

    info!(count = media.len(), "Found student media");
    Ok(media)
}

#[instrument(skip(state))]
pub async fn create_cloud_media(state: &AppState, mut media: CloudMedia) -> Result<Pid, AppError> {
    info!("Creating cloud media");
    media.validate()?;
    validate_cloud_media(state.store(), state.blobs(), &media).await?;
    media.media_url = state.blobs().url(&media.media_name);
    media.created_at = Some(Utc::now());
    insert_entity(state.store(), &media).await
}

#[instrument(skip(state))]
pub async fn update_cloud_media(state: &AppState, mut media: CloudMedia) -> Result<(), AppError> {
    info!("Updating cloud media");
    require_pid(EntityKind::CloudMedia, media.pid)?;
    media.validate()?;
    validate_cloud_media(state.store(), state.blobs(), &media).await?;
    media.media_url = state.blobs().url(&media.media_name);
    store_update(state, &media).await
}

#[instrument(skip(state))]
pub async fn delete_cloud_media(state: &AppState, pid: Pid) -> Result<u64, AppError> {
    info!("Deleting cloud media");
    state
        .cascade()
        .delete_matching(EntityKind::CloudMedia, Filter::by_pid(pid))
        .await
}
