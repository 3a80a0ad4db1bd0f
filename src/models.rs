use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

/// Opaque entity identifier assigned by the entity store on insert.
///
/// Backed by a UUID v7 so identifiers sort in insertion order. The nil value
/// means "unset" on documents and "match all" in lookups.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Pid(Uuid);

impl Pid {
    pub const NIL: Pid = Pid(Uuid::nil());

    pub fn generate() -> Self {
        Pid(Uuid::now_v7())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Parses a query-string identifier. `all` selects every document.
    pub fn parse_param(raw: &str) -> Result<Self, AppError> {
        if raw == "all" {
            return Ok(Pid::NIL);
        }

        raw.parse().map_err(|_| {
            AppError::Validation(format!("Please specify a valid PID (got '{}')", raw))
        })
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for Pid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Pid)
    }
}

impl From<Pid> for Value {
    fn from(pid: Pid) -> Self {
        Value::String(pid.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Institute,
    Teacher,
    Course,
    Student,
    Relative,
    StudentCourseRef,
    StudentRelativeRef,
    CourseRecord,
    CourseComment,
    CloudMedia,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Institute => "institute",
            EntityKind::Teacher => "teacher",
            EntityKind::Course => "course",
            EntityKind::Student => "student",
            EntityKind::Relative => "relative",
            EntityKind::StudentCourseRef => "student_course_ref",
            EntityKind::StudentRelativeRef => "student_relative_ref",
            EntityKind::CourseRecord => "course_record",
            EntityKind::CourseComment => "course_comment",
            EntityKind::CloudMedia => "cloud_media",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::StudentCourseRef => write!(f, "student-course reference"),
            EntityKind::StudentRelativeRef => write!(f, "student-relative reference"),
            EntityKind::CourseRecord => write!(f, "course record"),
            EntityKind::CourseComment => write!(f, "course comment"),
            EntityKind::CloudMedia => write!(f, "cloud media"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// A typed document living in one entity-store collection.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + fmt::Debug {
    const KIND: EntityKind;

    fn pid(&self) -> Pid;
}

macro_rules! entity {
    ($ty:ty, $kind:expr) => {
        impl Entity for $ty {
            const KIND: EntityKind = $kind;

            fn pid(&self) -> Pid {
                self.pid
            }
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressInfo {
    pub street: String,
    pub code: String,
    pub city: String,
    pub state: String,
    pub country: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Institute {
    pub pid: Pid,
    pub institute_uid: String,
    #[validate(length(min = 1, message = "Institute name must not be empty"))]
    pub institute_name: String,
    pub address: AddressInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Teacher {
    pub pid: Pid,
    pub teacher_uid: String,
    #[validate(length(min = 1, message = "Teacher name must not be empty"))]
    pub teacher_name: String,
    pub phone_number: String,
    pub email: String,
    pub institute_pid: Pid,
}

/// A learning target a course record can be filed against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseTarget {
    pub tag: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Course {
    pub pid: Pid,
    pub course_uid: String,
    #[validate(length(min = 1, message = "Course name must not be empty"))]
    pub course_name: String,
    pub institute_pid: Pid,
    pub teacher_pid: Pid,
    pub assistant_pid: Option<Pid>,
    pub course_targets: Vec<CourseTarget>,
}

impl Course {
    /// The assistant, if one is set. A nil identifier counts as absent.
    pub fn assistant(&self) -> Option<Pid> {
        self.assistant_pid.filter(|pid| !pid.is_nil())
    }

    pub fn has_target(&self, tag: &str) -> bool {
        self.course_targets.iter().any(|target| target.tag == tag)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Student {
    pub pid: Pid,
    #[validate(length(min = 1, message = "Student name must not be empty"))]
    pub student_name: String,
    pub teacher_pid: Pid,
    pub image_name: String,
    pub image_url: String,
}

impl Student {
    /// Blob name of the profile image, derived from the student identifier.
    pub fn image_blob_name(pid: Pid) -> String {
        format!("image-student-{}.jpg", pid)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Relative {
    pub pid: Pid,
    #[validate(length(min = 1, message = "Relative name must not be empty"))]
    pub relative_name: String,
    pub relationship: String,
    pub phone_number: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentCourseRef {
    pub pid: Pid,
    pub student_pid: Pid,
    pub course_pid: Pid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentRelativeRef {
    pub pid: Pid,
    pub student_pid: Pid,
    pub relative_pid: Pid,
    pub is_main: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseRecord {
    pub pid: Pid,
    pub student_pid: Pid,
    pub course_pid: Pid,
    pub target_tag: String,
    pub record_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentPersonType {
    Teacher,
    Relative,
}

impl CommentPersonType {
    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "teacher" => Ok(CommentPersonType::Teacher),
            "relative" => Ok(CommentPersonType::Relative),
            _ => Err(AppError::Validation(format!(
                "Comment person type must be teacher or relative (got '{}')",
                s
            ))),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            CommentPersonType::Teacher => EntityKind::Teacher,
            CommentPersonType::Relative => EntityKind::Relative,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseComment {
    pub pid: Pid,
    pub course_record_pid: Pid,
    pub comment_person_type: String,
    pub comment_person_pid: Pid,
    pub comment_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Image,
    #[default]
    Others,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CloudMedia {
    pub pid: Pid,
    pub student_pid: Pid,
    pub course_record_pid: Option<Pid>,
    pub media_type: MediaType,
    #[validate(length(min = 1, message = "Media name must not be empty"))]
    pub media_name: String,
    pub media_url: String,
    pub rank_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl CloudMedia {
    pub fn course_record(&self) -> Option<Pid> {
        self.course_record_pid.filter(|pid| !pid.is_nil())
    }
}

entity!(Institute, EntityKind::Institute);
entity!(Teacher, EntityKind::Teacher);
entity!(Course, EntityKind::Course);
entity!(Student, EntityKind::Student);
entity!(Relative, EntityKind::Relative);
entity!(StudentCourseRef, EntityKind::StudentCourseRef);
entity!(StudentRelativeRef, EntityKind::StudentRelativeRef);
entity!(CourseRecord, EntityKind::CourseRecord);
entity!(CourseComment, EntityKind::CourseComment);
entity!(CloudMedia, EntityKind::CloudMedia);
