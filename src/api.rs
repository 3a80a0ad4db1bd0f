use std::path::Path;

use rocket::State;
use rocket::data::{Data, ToByteUnit};
use rocket::http::{ContentType, Status};
use rocket::serde::{Deserialize, Serialize, json::Json};

use crate::blob::BlobError;
use crate::db::*;
use crate::error::AppError;
use crate::integrity::orphans::reconcile_orphan_blobs;
use crate::models::{
    CloudMedia, Course, CourseComment, CourseRecord, Institute, Pid, Relative, Student,
    StudentCourseRef, StudentRelativeRef, Teacher,
};
use crate::state::AppState;

#[derive(Serialize, Deserialize, Debug)]
pub struct CreatedResponse {
    pub pid: Pid,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DeletedResponse {
    pub deleted: u64,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UploadResponse {
    pub name: String,
    pub url: String,
}

fn pid_param(name: &str, raw: Option<&str>) -> Result<Pid, AppError> {
    match raw {
        Some(raw) => Pid::parse_param(raw),
        None => Err(AppError::Validation(format!(
            "Please specify '{}' (a PID or 'all')",
            name
        ))),
    }
}

#[get("/config/institute?<pid>")]
pub async fn api_get_institute(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<Vec<Institute>>, AppError> {
    let pid = pid_param("pid", pid)?;
    Ok(Json(find_institutes(state, pid).await?))
}

#[post("/config/institute", data = "<institute>")]
pub async fn api_create_institute(
    institute: Json<Institute>,
    state: &State<AppState>,
) -> Result<Json<CreatedResponse>, AppError> {
    let pid = create_institute(state, institute.into_inner()).await?;
    Ok(Json(CreatedResponse { pid }))
}

#[put("/config/institute", data = "<institute>")]
pub async fn api_update_institute(
    institute: Json<Institute>,
    state: &State<AppState>,
) -> Result<Status, AppError> {
    update_institute(state, institute.into_inner()).await?;
    Ok(Status::Ok)
}

#[delete("/config/institute?<pid>")]
pub async fn api_delete_institute(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<DeletedResponse>, AppError> {
    let pid = pid_param("pid", pid)?;
    let deleted = delete_institutes(state, pid).await?;
    Ok(Json(DeletedResponse { deleted }))
}

#[get("/config/teacher?<pid>")]
pub async fn api_get_teacher(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<Vec<Teacher>>, AppError> {
    let pid = pid_param("pid", pid)?;
    Ok(Json(find_teachers(state, pid).await?))
}

#[post("/config/teacher", data = "<teacher>")]
pub async fn api_create_teacher(
    teacher: Json<Teacher>,
    state: &State<AppState>,
) -> Result<Json<CreatedResponse>, AppError> {
    let pid = create_teacher(state, teacher.into_inner()).await?;
    Ok(Json(CreatedResponse { pid }))
}

#[put("/config/teacher", data = "<teacher>")]
pub async fn api_update_teacher(
    teacher: Json<Teacher>,
    state: &State<AppState>,
) -> Result<Status, AppError> {
    update_teacher(state, teacher.into_inner()).await?;
    Ok(Status::Ok)
}

#[delete("/config/teacher?<pid>")]
pub async fn api_delete_teacher(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<DeletedResponse>, AppError> {
    let pid = pid_param("pid", pid)?;
    let deleted = delete_teachers(state, pid).await?;
    Ok(Json(DeletedResponse { deleted }))
}

#[get("/config/course?<pid>")]
pub async fn api_get_course(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<Vec<Course>>, AppError> {
    let pid = pid_param("pid", pid)?;
    Ok(Json(find_courses(state, pid).await?))
}

#[post("/config/course", data = "<course>")]
pub async fn api_create_course(
    course: Json<Course>,
    state: &State<AppState>,
) -> Result<Json<CreatedResponse>, AppError> {
    let pid = create_course(state, course.into_inner()).await?;
    Ok(Json(CreatedResponse { pid }))
}

#[put("/config/course", data = "<course>")]
pub async fn api_update_course(
    course: Json<Course>,
    state: &State<AppState>,
) -> Result<Status, AppError> {
    update_course(state, course.into_inner()).await?;
    Ok(Status::Ok)
}

#[delete("/config/course?<pid>")]
pub async fn api_delete_course(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<DeletedResponse>, AppError> {
    let pid = pid_param("pid", pid)?;
    let deleted = delete_courses(state, pid).await?;
    Ok(Json(DeletedResponse { deleted }))
}

#[get("/config/student?<pid>")]
pub async fn api_get_student(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<Vec<Student>>, AppError> {
    let pid = pid_param("pid", pid)?;
    Ok(Json(find_students(state, pid).await?))
}

#[post("/config/student", data = "<student>")]
pub async fn api_create_student(
    student: Json<Student>,
    state: &State<AppState>,
) -> Result<Json<CreatedResponse>, AppError> {
    let pid = create_student(state, student.into_inner()).await?;
    Ok(Json(CreatedResponse { pid }))
}

#[put("/config/student", data = "<student>")]
pub async fn api_update_student(
    student: Json<Student>,
    state: &State<AppState>,
) -> Result<Status, AppError> {
    update_student(state, student.into_inner()).await?;
    Ok(Status::Ok)
}

#[delete("/config/student?<pid>")]
pub async fn api_delete_student(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<DeletedResponse>, AppError> {
    let pid = pid_param("pid", pid)?;
    let deleted = delete_students(state, pid).await?;
    Ok(Json(DeletedResponse { deleted }))
}

#[get("/config/relative?<pid>")]
pub async fn api_get_relative(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<Vec<Relative>>, AppError> {
    let pid = pid_param("pid", pid)?;
    Ok(Json(find_relatives(state, pid).await?))
}

#[post("/config/relative", data = "<relative>")]
pub async fn api_create_relative(
    relative: Json<Relative>,
    state: &State<AppState>,
) -> Result<Json<CreatedResponse>, AppError> {
    let pid = create_relative(state, relative.into_inner()).await?;
    Ok(Json(CreatedResponse { pid }))
}

#[put("/config/relative", data = "<relative>")]
pub async fn api_update_relative(
    relative: Json<Relative>,
    state: &State<AppState>,
) -> Result<Status, AppError> {
    update_relative(state, relative.into_inner()).await?;
    Ok(Status::Ok)
}

#[delete("/config/relative?<pid>")]
pub async fn api_delete_relative(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<DeletedResponse>, AppError> {
    let pid = pid_param("pid", pid)?;
    let deleted = delete_relatives(state, pid).await?;
    Ok(Json(DeletedResponse { deleted }))
}

#[get("/config/course_record?<pid>")]
pub async fn api_get_course_record(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<Vec<CourseRecord>>, AppError> {
    let pid = pid_param("pid", pid)?;
    Ok(Json(find_course_records(state, pid).await?))
}

#[post("/config/course_record", data = "<course_record>")]
pub async fn api_create_course_record(
    course_record: Json<CourseRecord>,
    state: &State<AppState>,
) -> Result<Json<CreatedResponse>, AppError> {
    let pid = create_course_record(state, course_record.into_inner()).await?;
    Ok(Json(CreatedResponse { pid }))
}

#[put("/config/course_record", data = "<course_record>")]
pub async fn api_update_course_record(
    course_record: Json<CourseRecord>,
    state: &State<AppState>,
) -> Result<Status, AppError> {
    update_course_record(state, course_record.into_inner()).await?;
    Ok(Status::Ok)
}

#[delete("/config/course_record?<pid>")]
pub async fn api_delete_course_record(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<DeletedResponse>, AppError> {
    let pid = pid_param("pid", pid)?;
    let deleted = delete_course_records(state, pid).await?;
    Ok(Json(DeletedResponse { deleted }))
}

#[get("/config/course_comment?<pid>")]
pub async fn api_get_course_comment(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<Vec<CourseComment>>, AppError> {
    let pid = pid_param("pid", pid)?;
    Ok(Json(find_course_comments(state, pid).await?))
}

#[post("/config/course_comment", data = "<course_comment>")]
pub async fn api_create_course_comment(
    course_comment: Json<CourseComment>,
    state: &State<AppState>,
) -> Result<Json<CreatedResponse>, AppError> {
    let pid = create_course_comment(state, course_comment.into_inner()).await?;
    Ok(Json(CreatedResponse { pid }))
}

#[put("/config/course_comment", data = "<course_comment>")]
pub async fn api_update_course_comment(
    course_comment: Json<CourseComment>,
    state: &State<AppState>,
) -> Result<Status, AppError> {
    update_course_comment(state, course_comment.into_inner()).await?;
    Ok(Status::Ok)
}

#[delete("/config/course_comment?<pid>")]
pub async fn api_delete_course_comment(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<DeletedResponse>, AppError> {
    let pid = pid_param("pid", pid)?;
    let deleted = delete_course_comments(state, pid).await?;
    Ok(Json(DeletedResponse { deleted }))
}

#[get("/config/cloud_media?<pid>")]
pub async fn api_get_cloud_media(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<Vec<CloudMedia>>, AppError> {
    let pid = pid_param("pid", pid)?;
    Ok(Json(find_cloud_media(state, pid).await?))
}

#[post("/config/cloud_media", data = "<cloud_media>")]
pub async fn api_create_cloud_media(
    cloud_media: Json<CloudMedia>,
    state: &State<AppState>,
) -> Result<Json<CreatedResponse>, AppError> {
    let pid = create_cloud_media(state, cloud_media.into_inner()).await?;
    Ok(Json(CreatedResponse { pid }))
}

#[put("/config/cloud_media", data = "<cloud_media>")]
pub async fn api_update_cloud_media(
    cloud_media: Json<CloudMedia>,
    state: &State<AppState>,
) -> Result<Status, AppError> {
    update_cloud_media(state, cloud_media.into_inner()).await?;
    Ok(Status::Ok)
}

#[delete("/config/cloud_media?<pid>")]
pub async fn api_delete_cloud_media(
    pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<DeletedResponse>, AppError> {
    let pid = pid_param("pid", pid)?;
    let deleted = delete_cloud_media(state, pid).await?;
    Ok(Json(DeletedResponse { deleted }))
}

#[get("/config/student_course_ref?<student_pid>&<course_pid>")]
pub async fn api_get_student_course_ref(
    student_pid: Option<&str>,
    course_pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<Vec<StudentCourseRef>>, AppError> {
    let student_pid = pid_param("student_pid", student_pid)?;
    let course_pid = pid_param("course_pid", course_pid)?;
    Ok(Json(find_student_course_refs(state, student_pid, course_pid).await?))
}

#[post("/config/student_course_ref", data = "<student_course_ref>")]
pub async fn api_create_student_course_ref(
    student_course_ref: Json<StudentCourseRef>,
    state: &State<AppState>,
) -> Result<Json<CreatedResponse>, AppError> {
    let pid = create_student_course_ref(state, student_course_ref.into_inner()).await?;
    Ok(Json(CreatedResponse { pid }))
}

#[put("/config/student_course_ref", data = "<student_course_ref>")]
pub async fn api_update_student_course_ref(
    student_course_ref: Json<StudentCourseRef>,
    state: &State<AppState>,
) -> Result<Status, AppError> {
    update_student_course_ref(state, student_course_ref.into_inner()).await?;
    Ok(Status::Ok)
}

#[delete("/config/student_course_ref?<student_pid>&<course_pid>")]
pub async fn api_delete_student_course_ref(
    student_pid: Option<&str>,
    course_pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<DeletedResponse>, AppError> {
    let student_pid = pid_param("student_pid", student_pid)?;
    let course_pid = pid_param("course_pid", course_pid)?;
    let deleted = delete_student_course_refs(state, student_pid, course_pid).await?;
    Ok(Json(DeletedResponse { deleted }))
}

#[get("/config/student_relative_ref?<student_pid>&<relative_pid>")]
pub async fn api_get_student_relative_ref(
    student_pid: Option<&str>,
    relative_pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<Vec<StudentRelativeRef>>, AppError> {
    let student_pid = pid_param("student_pid", student_pid)?;
    let relative_pid = pid_param("relative_pid", relative_pid)?;
    Ok(Json(find_student_relative_refs(state, student_pid, relative_pid).await?))
}

#[post("/config/student_relative_ref", data = "<student_relative_ref>")]
pub async fn api_create_student_relative_ref(
    student_relative_ref: Json<StudentRelativeRef>,
    state: &State<AppState>,
) -> Result<Json<CreatedResponse>, AppError> {
    let pid = create_student_relative_ref(state, student_relative_ref.into_inner()).await?;
    Ok(Json(CreatedResponse { pid }))
}

#[put("/config/student_relative_ref", data = "<student_relative_ref>")]
pub async fn api_update_student_relative_ref(
    student_relative_ref: Json<StudentRelativeRef>,
    state: &State<AppState>,
) -> Result<Status, AppError> {
    update_student_relative_ref(state, student_relative_ref.into_inner()).await?;
    Ok(Status::Ok)
}

#[delete("/config/student_relative_ref?<student_pid>&<relative_pid>")]
pub async fn api_delete_student_relative_ref(
    student_pid: Option<&str>,
    relative_pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<DeletedResponse>, AppError> {
    let student_pid = pid_param("student_pid", student_pid)?;
    let relative_pid = pid_param("relative_pid", relative_pid)?;
    let deleted = delete_student_relative_refs(state, student_pid, relative_pid).await?;
    Ok(Json(DeletedResponse { deleted }))
}

#[get("/workflow/student/media?<student_pid>")]
pub async fn api_get_student_media(
    student_pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<Vec<CloudMedia>>, AppError> {
    let student_pid = pid_param("student_pid", student_pid)?;
    Ok(Json(find_student_media(state, student_pid).await?))
}

#[get("/workflow/student/course_records?<student_pid>&<course_pid>")]
pub async fn api_get_student_course_records(
    student_pid: Option<&str>,
    course_pid: Option<&str>,
    state: &State<AppState>,
) -> Result<Json<Vec<CourseRecord>>, AppError> {
    let student_pid = pid_param("student_pid", student_pid)?;
    let course_pid = pid_param("course_pid", course_pid)?;
    Ok(Json(
        find_course_records_by_pair(state, student_pid, course_pid).await?,
    ))
}

#[put("/media/<name>", data = "<data>")]
pub async fn api_upload_media(
    name: &str,
    data: Data<'_>,
    state: &State<AppState>,
) -> Result<Json<UploadResponse>, AppError> {
    let bytes = data
        .open(64.mebibytes())
        .into_bytes()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to read upload body: {}", e)))?;

    if !bytes.is_complete() {
        return Err(AppError::Validation(format!(
            "Upload of '{}' exceeds the 64 MiB limit",
            name
        )));
    }

    state.blobs().upload(name, &bytes.value).await?;

    Ok(Json(UploadResponse {
        name: name.to_string(),
        url: state.blobs().url(name),
    }))
}

#[get("/media/<name>")]
pub async fn api_download_media(
    name: &str,
    state: &State<AppState>,
) -> Result<(ContentType, Vec<u8>), AppError> {
    let data = state.blobs().download(name).await.map_err(|e| match e {
        BlobError::NotFound(name) => AppError::NotFound(format!("No media blob named '{}'", name)),
        other => other.into(),
    })?;

    let content_type = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ContentType::from_extension)
        .unwrap_or(ContentType::Binary);

    Ok((content_type, data))
}

#[post("/maintenance/orphan-blobs")]
pub async fn api_reconcile_orphan_blobs(
    state: &State<AppState>,
) -> Result<Json<DeletedResponse>, AppError> {
    let deleted = reconcile_orphan_blobs(state.store(), state.blobs()).await?;
    Ok(Json(DeletedResponse { deleted }))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
