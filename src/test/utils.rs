#[cfg(test)]
pub mod test_utils {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, Once};

    use rocket::local::asynchronous::Client;
    use serde_json::Value;

    use crate::blob::{BlobError, BlobStore, check_name};
    use crate::db::{
        create_cloud_media, create_course, create_course_comment, create_course_record,
        create_institute, create_relative, create_student, create_student_course_ref,
        create_student_relative_ref, create_teacher, update_student,
    };
    use crate::error::AppError;
    use crate::models::{
        CloudMedia, Course, CourseComment, CourseRecord, CourseTarget, EntityKind, Institute,
        MediaType, Pid, Relative, Student, StudentCourseRef, StudentRelativeRef, Teacher,
    };
    use crate::state::AppState;
    use crate::store::{Document, EntityStore, Filter, SqliteStore, UpdateOutcome, find_one};

    static INIT: Once = Once::new();

    pub fn init_test_logging() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter("debug")
                .with_test_writer()
                .try_init();
        });
    }

    /// In-memory blob container. `set_unavailable(true)` makes every call fail
    /// the way an unreachable blob service would.
    #[derive(Default)]
    pub struct MemoryBlobStore {
        blobs: Mutex<BTreeMap<String, Vec<u8>>>,
        unavailable: AtomicBool,
    }

    impl MemoryBlobStore {
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub fn contains(&self, name: &str) -> bool {
            self.blobs.lock().unwrap().contains_key(name)
        }

        pub fn put(&self, name: &str) {
            self.blobs
                .lock()
                .unwrap()
                .insert(name.to_string(), name.as_bytes().to_vec());
        }

        pub fn remove(&self, name: &str) {
            self.blobs.lock().unwrap().remove(name);
        }

        fn check_available(&self) -> Result<(), BlobError> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(BlobError::Unavailable("operation timed out".to_string()));
            }
            Ok(())
        }
    }

    #[rocket::async_trait]
    impl BlobStore for MemoryBlobStore {
        async fn exists(&self, name: &str) -> Result<bool, BlobError> {
            self.check_available()?;
            check_name(name)?;
            Ok(self.contains(name))
        }

        async fn upload(&self, name: &str, data: &[u8]) -> Result<(), BlobError> {
            self.check_available()?;
            check_name(name)?;
            self.blobs
                .lock()
                .unwrap()
                .insert(name.to_string(), data.to_vec());
            Ok(())
        }

        async fn download(&self, name: &str) -> Result<Vec<u8>, BlobError> {
            self.check_available()?;
            self.blobs
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| BlobError::NotFound(name.to_string()))
        }

        async fn delete(&self, name: &str) -> Result<(), BlobError> {
            self.check_available()?;
            self.blobs
                .lock()
                .unwrap()
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| BlobError::NotFound(name.to_string()))
        }

        async fn list(&self) -> Result<Vec<String>, BlobError> {
            self.check_available()?;
            Ok(self.blobs.lock().unwrap().keys().cloned().collect())
        }

        fn url(&self, name: &str) -> String {
            format!("http://blobs.test/media/{}", name)
        }
    }

    /// Entity store wrapper that fails `delete_by_filter` for one matching
    /// condition, so cascades can be interrupted at a chosen step.
    pub struct FaultyStore {
        inner: SqliteStore,
        fail_delete: Mutex<Option<(EntityKind, &'static str, Value)>>,
    }

    impl FaultyStore {
        pub fn new(inner: SqliteStore) -> Self {
            Self {
                inner,
                fail_delete: Mutex::new(None),
            }
        }

        pub fn fail_deletes(&self, kind: EntityKind, field: &'static str, pid: Pid) {
            *self.fail_delete.lock().unwrap() = Some((kind, field, Value::from(pid)));
        }

        fn should_fail(&self, kind: EntityKind, filter: &Filter) -> bool {
            match &*self.fail_delete.lock().unwrap() {
                Some((fail_kind, field, value)) => {
                    *fail_kind == kind
                        && filter
                            .conditions()
                            .iter()
                            .any(|(f, v)| f == field && v == value)
                }
                None => false,
            }
        }
    }

    #[rocket::async_trait]
    impl EntityStore for FaultyStore {
        async fn find_by_id(
            &self,
            kind: EntityKind,
            pid: Pid,
        ) -> Result<Option<Document>, AppError> {
            self.inner.find_by_id(kind, pid).await
        }

        async fn find_by_filter(
            &self,
            kind: EntityKind,
            filter: &Filter,
        ) -> Result<Vec<Document>, AppError> {
            self.inner.find_by_filter(kind, filter).await
        }

        async fn insert(&self, kind: EntityKind, doc: Document) -> Result<Pid, AppError> {
            self.inner.insert(kind, doc).await
        }

        async fn update_by_id(
            &self,
            kind: EntityKind,
            pid: Pid,
            changes: Document,
        ) -> Result<UpdateOutcome, AppError> {
            self.inner.update_by_id(kind, pid, changes).await
        }

        async fn delete_by_filter(
            &self,
            kind: EntityKind,
            filter: &Filter,
        ) -> Result<u64, AppError> {
            if self.should_fail(kind, filter) {
                return Err(AppError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.delete_by_filter(kind, filter).await
        }
    }

    struct TestCourse {
        name: String,
        institute: String,
        teacher: String,
        tags: Vec<String>,
    }

    struct TestRecord {
        name: String,
        student: String,
        course: String,
        tag: String,
    }

    struct TestMedia {
        name: String,
        student: String,
        record: Option<String>,
        blob: String,
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        institutes: Vec<String>,
        teachers: Vec<(String, String)>,
        courses: Vec<TestCourse>,
        students: Vec<(String, String)>,
        student_images: Vec<String>,
        relatives: Vec<String>,
        enrollments: Vec<(String, String)>,
        relative_refs: Vec<(String, String, bool)>,
        records: Vec<TestRecord>,
        comments: Vec<(String, String, String)>,
        media: Vec<TestMedia>,
        stray_blobs: Vec<String>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn institute(mut self, name: &str) -> Self {
            self.institutes.push(name.to_string());
            self
        }

        pub fn teacher(mut self, name: &str, institute: &str) -> Self {
            self.teachers
                .push((name.to_string(), institute.to_string()));
            self
        }

        pub fn course(mut self, name: &str, institute: &str, teacher: &str, tags: &[&str]) -> Self {
            self.courses.push(TestCourse {
                name: name.to_string(),
                institute: institute.to_string(),
                teacher: teacher.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
            });
            self
        }

        pub fn student(mut self, name: &str, teacher: &str) -> Self {
            self.students.push((name.to_string(), teacher.to_string()));
            self
        }

        /// Uploads the student's profile image after the student exists.
        pub fn student_image(mut self, student: &str) -> Self {
            self.student_images.push(student.to_string());
            self
        }

        pub fn relative(mut self, name: &str) -> Self {
            self.relatives.push(name.to_string());
            self
        }

        pub fn enroll(mut self, student: &str, course: &str) -> Self {
            self.enrollments
                .push((student.to_string(), course.to_string()));
            self
        }

        pub fn relative_ref(mut self, student: &str, relative: &str, is_main: bool) -> Self {
            self.relative_refs
                .push((student.to_string(), relative.to_string(), is_main));
            self
        }

        pub fn course_record(mut self, name: &str, student: &str, course: &str, tag: &str) -> Self {
            self.records.push(TestRecord {
                name: name.to_string(),
                student: student.to_string(),
                course: course.to_string(),
                tag: tag.to_string(),
            });
            self
        }

        /// A comment on `record` authored by the teacher named `teacher`.
        pub fn comment(mut self, name: &str, record: &str, teacher: &str) -> Self {
            self.comments
                .push((name.to_string(), record.to_string(), teacher.to_string()));
            self
        }

        /// Uploads `blob` and stores a media record for it.
        pub fn media(mut self, name: &str, student: &str, record: Option<&str>, blob: &str) -> Self {
            self.media.push(TestMedia {
                name: name.to_string(),
                student: student.to_string(),
                record: record.map(String::from),
                blob: blob.to_string(),
            });
            self
        }

        /// A blob no record refers to.
        pub fn stray_blob(mut self, name: &str) -> Self {
            self.stray_blobs.push(name.to_string());
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            init_test_logging();

            let store = Arc::new(FaultyStore::new(SqliteStore::in_memory().await?));
            let blobs = Arc::new(MemoryBlobStore::default());
            let state = AppState::new(store.clone(), blobs.clone());

            let mut pids: HashMap<String, Pid> = HashMap::new();
            let pid = |pids: &HashMap<String, Pid>, name: &str| -> Result<Pid, AppError> {
                pids.get(name)
                    .copied()
                    .ok_or_else(|| AppError::Internal(format!("unknown fixture '{}'", name)))
            };

            for name in &self.institutes {
                let institute = Institute {
                    institute_name: name.clone(),
                    ..Default::default()
                };
                pids.insert(name.clone(), create_institute(&state, institute).await?);
            }

            for (name, institute) in &self.teachers {
                let teacher = Teacher {
                    teacher_name: name.clone(),
                    institute_pid: pid(&pids, institute)?,
                    ..Default::default()
                };
                pids.insert(name.clone(), create_teacher(&state, teacher).await?);
            }

            for course in &self.courses {
                let record = Course {
                    course_name: course.name.clone(),
                    institute_pid: pid(&pids, &course.institute)?,
                    teacher_pid: pid(&pids, &course.teacher)?,
                    course_targets: course
                        .tags
                        .iter()
                        .map(|tag| CourseTarget {
                            tag: tag.clone(),
                            description: format!("{} target", tag),
                        })
                        .collect(),
                    ..Default::default()
                };
                pids.insert(course.name.clone(), create_course(&state, record).await?);
            }

            for (name, teacher) in &self.students {
                let student = Student {
                    student_name: name.clone(),
                    teacher_pid: pid(&pids, teacher)?,
                    ..Default::default()
                };
                pids.insert(name.clone(), create_student(&state, student).await?);
            }

            for name in &self.student_images {
                let student_pid = pid(&pids, name)?;
                blobs.put(&Student::image_blob_name(student_pid));
                let student: Student = find_one(state.store(), student_pid)
                    .await?
                    .ok_or_else(|| AppError::NotFound(name.clone()))?;
                update_student(&state, student).await?;
            }

            for name in &self.relatives {
                let relative = Relative {
                    relative_name: name.clone(),
                    ..Default::default()
                };
                pids.insert(name.clone(), create_relative(&state, relative).await?);
            }

            for (student, course) in &self.enrollments {
                let course_ref = StudentCourseRef {
                    student_pid: pid(&pids, student)?,
                    course_pid: pid(&pids, course)?,
                    ..Default::default()
                };
                let ref_pid = create_student_course_ref(&state, course_ref).await?;
                pids.insert(format!("{}:{}", student, course), ref_pid);
            }

            for (student, relative, is_main) in &self.relative_refs {
                let relative_ref = StudentRelativeRef {
                    student_pid: pid(&pids, student)?,
                    relative_pid: pid(&pids, relative)?,
                    is_main: *is_main,
                    ..Default::default()
                };
                let ref_pid = create_student_relative_ref(&state, relative_ref).await?;
                pids.insert(format!("{}:{}", student, relative), ref_pid);
            }

            for record in &self.records {
                let course_record = CourseRecord {
                    student_pid: pid(&pids, &record.student)?,
                    course_pid: pid(&pids, &record.course)?,
                    target_tag: record.tag.clone(),
                    record_text: format!("{} notes", record.name),
                    ..Default::default()
                };
                pids.insert(
                    record.name.clone(),
                    create_course_record(&state, course_record).await?,
                );
            }

            for (name, record, teacher) in &self.comments {
                let comment = CourseComment {
                    course_record_pid: pid(&pids, record)?,
                    comment_person_type: "teacher".to_string(),
                    comment_person_pid: pid(&pids, teacher)?,
                    comment_text: format!("{} text", name),
                    ..Default::default()
                };
                pids.insert(name.clone(), create_course_comment(&state, comment).await?);
            }

            for media in &self.media {
                blobs.put(&media.blob);
                let course_record_pid = match &media.record {
                    Some(record) => Some(pid(&pids, record)?),
                    None => None,
                };
                let cloud_media = CloudMedia {
                    student_pid: pid(&pids, &media.student)?,
                    course_record_pid,
                    media_type: MediaType::Video,
                    media_name: media.blob.clone(),
                    ..Default::default()
                };
                pids.insert(
                    media.name.clone(),
                    create_cloud_media(&state, cloud_media).await?,
                );
            }

            for name in &self.stray_blobs {
                blobs.put(name);
            }

            Ok(TestDb {
                state,
                store,
                blobs,
                pids,
            })
        }
    }

    pub struct TestDb {
        pub state: AppState,
        pub store: Arc<FaultyStore>,
        pub blobs: Arc<MemoryBlobStore>,
        pub pids: HashMap<String, Pid>,
    }

    impl TestDb {
        /// Identifier of a named fixture. Join references are named
        /// `"student:course"` or `"student:relative"`.
        pub fn pid(&self, name: &str) -> Pid {
            *self
                .pids
                .get(name)
                .unwrap_or_else(|| panic!("No fixture named {}", name))
        }

        pub async fn exists(&self, kind: EntityKind, name: &str) -> bool {
            self.state
                .store()
                .find_by_id(kind, self.pid(name))
                .await
                .expect("Failed to look up fixture")
                .is_some()
        }

        pub async fn count(&self, kind: EntityKind) -> usize {
            self.state
                .store()
                .find_by_filter(kind, &Filter::all())
                .await
                .expect("Failed to count documents")
                .len()
        }
    }

    /// School with one teacher, one course, one enrolled student with a main
    /// relative, and a course record.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .institute("north")
            .teacher("alice", "north")
            .teacher("bob", "north")
            .course("piano", "north", "alice", &["scales", "chords"])
            .student("sam", "alice")
            .relative("rita")
            .enroll("sam", "piano")
            .relative_ref("sam", "rita", true)
            .course_record("week1", "sam", "piano", "scales")
            .build()
            .await
            .expect("Failed to build test database")
    }

    pub async fn setup_test_client(test_db: &TestDb) -> Client {
        Client::tracked(crate::init_rocket(test_db.state.clone()))
            .await
            .expect("Failed to create test client")
    }
}
