#[cfg(test)]
mod tests {
    use crate::db::{
        create_cloud_media, create_course, create_course_comment, create_course_record,
        create_student, create_teacher, find_course_records, find_students, update_course,
        update_course_record, update_student, update_teacher,
    };
    use crate::error::{AppError, ErrorKind};
    use crate::models::{
        CloudMedia, Course, CourseComment, CourseRecord, CourseTarget, EntityKind, Pid, Student,
        Teacher,
    };
    use crate::test::test_utils::{TestDbBuilder, create_standard_test_db};

    fn record(test_db: &crate::test::test_utils::TestDb, course: &str, tag: &str) -> CourseRecord {
        CourseRecord {
            student_pid: test_db.pid("sam"),
            course_pid: test_db.pid(course),
            target_tag: tag.to_string(),
            record_text: "practised".to_string(),
            ..Default::default()
        }
    }

    #[rocket::async_test]
    async fn test_course_record_requires_enrollment() {
        let test_db = TestDbBuilder::new()
            .institute("north")
            .teacher("alice", "north")
            .course("piano", "north", "alice", &["scales"])
            .course("guitar", "north", "alice", &["scales"])
            .student("sam", "alice")
            .enroll("sam", "piano")
            .build()
            .await
            .expect("Failed to build test database");

        let err = create_course_record(&test_db.state, record(&test_db, "guitar", "scales"))
            .await
            .expect_err("Record without enrollment should be rejected");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(test_db.count(EntityKind::CourseRecord).await, 0);

        create_course_record(&test_db.state, record(&test_db, "piano", "scales"))
            .await
            .expect("Failed to create enrolled course record");
        assert_eq!(test_db.count(EntityKind::CourseRecord).await, 1);
    }

    #[rocket::async_test]
    async fn test_course_record_nil_student_is_input_error() {
        let test_db = create_standard_test_db().await;

        let mut bad = record(&test_db, "piano", "scales");
        bad.student_pid = Pid::NIL;

        let err = create_course_record(&test_db.state, bad)
            .await
            .expect_err("Nil student should be rejected");
        assert_eq!(err.kind(), ErrorKind::InputInvalid);
    }

    #[rocket::async_test]
    async fn test_course_record_target_tag_membership() {
        let test_db = create_standard_test_db().await;

        let err = create_course_record(&test_db.state, record(&test_db, "piano", "arpeggios"))
            .await
            .expect_err("Undeclared tag should be rejected");
        assert_eq!(err.kind(), ErrorKind::InputInvalid);

        let err = create_course_record(&test_db.state, record(&test_db, "piano", "Scales"))
            .await
            .expect_err("Tag match is case-sensitive");
        assert_eq!(err.kind(), ErrorKind::InputInvalid);

        let err = create_course_record(&test_db.state, record(&test_db, "piano", ""))
            .await
            .expect_err("Empty tag should be rejected");
        assert_eq!(err.kind(), ErrorKind::InputInvalid);

        let pid = create_course_record(&test_db.state, record(&test_db, "piano", "chords"))
            .await
            .expect("Failed to create record with declared tag");

        let stored = find_course_records(&test_db.state, pid)
            .await
            .expect("Failed to find course record");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].target_tag, "chords");
        assert!(stored[0].created_at.is_some());
    }

    #[rocket::async_test]
    async fn test_course_record_update_rechecks_tag() {
        let test_db = create_standard_test_db().await;
        let week1 = test_db.pid("week1");

        let mut changed = record(&test_db, "piano", "improvisation");
        changed.pid = week1;
        let err = update_course_record(&test_db.state, changed)
            .await
            .expect_err("Update to undeclared tag should be rejected");
        assert_eq!(err.kind(), ErrorKind::InputInvalid);

        let stored = find_course_records(&test_db.state, week1)
            .await
            .expect("Failed to find course record");
        assert_eq!(stored[0].target_tag, "scales");

        let mut changed = record(&test_db, "piano", "chords");
        changed.pid = week1;
        update_course_record(&test_db.state, changed)
            .await
            .expect("Failed to update course record");
    }

    #[rocket::async_test]
    async fn test_course_record_with_media_keeps_its_student() {
        let test_db = TestDbBuilder::new()
            .institute("north")
            .teacher("alice", "north")
            .course("piano", "north", "alice", &["scales"])
            .student("sam", "alice")
            .student("ann", "alice")
            .enroll("sam", "piano")
            .enroll("ann", "piano")
            .course_record("r1", "sam", "piano", "scales")
            .course_record("r2", "sam", "piano", "scales")
            .media("m1", "sam", Some("r1"), "r1-clip.mp4")
            .build()
            .await
            .expect("Failed to build test database");

        let mut moved = record(&test_db, "piano", "scales");
        moved.pid = test_db.pid("r1");
        moved.student_pid = test_db.pid("ann");
        let err = update_course_record(&test_db.state, moved)
            .await
            .expect_err("Record with linked media should keep its student");

        match err {
            AppError::DependencyConflict {
                parent_kind,
                parent_pid,
                child_kind,
                child_pid,
            } => {
                assert_eq!(parent_kind, EntityKind::CourseRecord);
                assert_eq!(parent_pid, test_db.pid("r1"));
                assert_eq!(child_kind, EntityKind::CloudMedia);
                assert_eq!(child_pid, test_db.pid("m1"));
            }
            other => panic!("Expected dependency conflict, got {:?}", other),
        }

        let stored = find_course_records(&test_db.state, test_db.pid("r1"))
            .await
            .expect("Failed to find course record");
        assert_eq!(stored[0].student_pid, test_db.pid("sam"));

        let mut moved = record(&test_db, "piano", "scales");
        moved.pid = test_db.pid("r2");
        moved.student_pid = test_db.pid("ann");
        update_course_record(&test_db.state, moved)
            .await
            .expect("Record without media may move to another enrolled student");
    }

    #[rocket::async_test]
    async fn test_course_assistant_rules() {
        let test_db = create_standard_test_db().await;

        let course = |assistant: Option<Pid>| Course {
            course_name: "violin".to_string(),
            institute_pid: test_db.pid("north"),
            teacher_pid: test_db.pid("alice"),
            assistant_pid: assistant,
            ..Default::default()
        };

        let err = create_course(&test_db.state, course(Some(test_db.pid("alice"))))
            .await
            .expect_err("Assistant equal to teacher should be rejected");
        assert_eq!(err.kind(), ErrorKind::InputInvalid);

        let err = create_course(&test_db.state, course(Some(Pid::generate())))
            .await
            .expect_err("Unknown assistant should be rejected");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        create_course(&test_db.state, course(None))
            .await
            .expect("Course without assistant should be accepted");
        create_course(&test_db.state, course(Some(Pid::NIL)))
            .await
            .expect("Nil assistant counts as absent");
        create_course(&test_db.state, course(Some(test_db.pid("bob"))))
            .await
            .expect("Course with a distinct assistant should be accepted");
    }

    #[rocket::async_test]
    async fn test_course_target_tags_must_be_unique() {
        let test_db = create_standard_test_db().await;

        let target = |tag: &str| CourseTarget {
            tag: tag.to_string(),
            description: String::new(),
        };
        let course = Course {
            pid: test_db.pid("piano"),
            course_name: "piano".to_string(),
            institute_pid: test_db.pid("north"),
            teacher_pid: test_db.pid("alice"),
            course_targets: vec![target("scales"), target("scales")],
            ..Default::default()
        };

        let err = update_course(&test_db.state, course)
            .await
            .expect_err("Duplicate tags should be rejected");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[rocket::async_test]
    async fn test_teacher_requires_institute() {
        let test_db = create_standard_test_db().await;

        let err = create_teacher(
            &test_db.state,
            Teacher {
                teacher_name: "carol".to_string(),
                ..Default::default()
            },
        )
        .await
        .expect_err("Teacher without institute should be rejected");
        assert_eq!(err.kind(), ErrorKind::InputInvalid);

        let err = create_teacher(
            &test_db.state,
            Teacher {
                teacher_name: "carol".to_string(),
                institute_pid: Pid::generate(),
                ..Default::default()
            },
        )
        .await
        .expect_err("Unknown institute should be rejected");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(test_db.count(EntityKind::Teacher).await, 2);
    }

    #[rocket::async_test]
    async fn test_update_outcomes() {
        let test_db = create_standard_test_db().await;

        let unchanged = Teacher {
            pid: test_db.pid("bob"),
            teacher_name: "bob".to_string(),
            institute_pid: test_db.pid("north"),
            ..Default::default()
        };
        let err = update_teacher(&test_db.state, unchanged.clone())
            .await
            .expect_err("Identical update should be reported");
        assert!(matches!(err, AppError::Unchanged(_)));

        let missing = Teacher {
            pid: Pid::generate(),
            ..unchanged.clone()
        };
        let err = update_teacher(&test_db.state, missing)
            .await
            .expect_err("Update of unknown teacher should fail");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let renamed = Teacher {
            teacher_name: "Robert".to_string(),
            ..unchanged
        };
        update_teacher(&test_db.state, renamed)
            .await
            .expect("Failed to rename teacher");
    }

    #[rocket::async_test]
    async fn test_comment_author_dispatch() {
        let test_db = create_standard_test_db().await;

        let comment = |person_type: &str, person: Pid| CourseComment {
            course_record_pid: test_db.pid("week1"),
            comment_person_type: person_type.to_string(),
            comment_person_pid: person,
            comment_text: "nice".to_string(),
            ..Default::default()
        };

        let err = create_course_comment(&test_db.state, comment("parent", test_db.pid("rita")))
            .await
            .expect_err("Unknown person type should be rejected");
        assert_eq!(err.kind(), ErrorKind::InputInvalid);

        let err = create_course_comment(&test_db.state, comment("teacher", test_db.pid("rita")))
            .await
            .expect_err("A relative is not a teacher");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        create_course_comment(&test_db.state, comment("relative", test_db.pid("rita")))
            .await
            .expect("Relative comment should be accepted");
        create_course_comment(&test_db.state, comment("teacher", test_db.pid("alice")))
            .await
            .expect("Teacher comment should be accepted");
    }

    #[rocket::async_test]
    async fn test_cloud_media_requires_uploaded_blob() {
        let test_db = TestDbBuilder::new()
            .institute("north")
            .teacher("alice", "north")
            .course("piano", "north", "alice", &["scales"])
            .student("sam", "alice")
            .student("sue", "alice")
            .enroll("sue", "piano")
            .course_record("sue-week1", "sue", "piano", "scales")
            .build()
            .await
            .expect("Failed to build test database");

        let media = |record: Option<Pid>| CloudMedia {
            student_pid: test_db.pid("sam"),
            course_record_pid: record,
            media_name: "recital.mp4".to_string(),
            ..Default::default()
        };

        let err = create_cloud_media(&test_db.state, media(None))
            .await
            .expect_err("Media without a blob should be rejected");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        test_db.blobs.put("recital.mp4");

        let err = create_cloud_media(&test_db.state, media(Some(test_db.pid("sue-week1"))))
            .await
            .expect_err("Record of another student should be rejected");
        assert_eq!(err.kind(), ErrorKind::InputInvalid);

        let pid = create_cloud_media(&test_db.state, media(None))
            .await
            .expect("Failed to create cloud media");
        let stored = crate::db::find_cloud_media(&test_db.state, pid)
            .await
            .expect("Failed to find cloud media");
        assert_eq!(stored[0].media_url, "http://blobs.test/media/recital.mp4");
    }

    #[rocket::async_test]
    async fn test_student_image_fields_follow_blob() {
        let test_db = create_standard_test_db().await;

        let pid = create_student(
            &test_db.state,
            Student {
                student_name: "max".to_string(),
                teacher_pid: test_db.pid("alice"),
                image_name: "stale.jpg".to_string(),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to create student");

        let student = find_students(&test_db.state, pid)
            .await
            .expect("Failed to find student")
            .remove(0);
        assert!(student.image_name.is_empty());
        assert!(student.image_url.is_empty());

        let image = Student::image_blob_name(pid);
        test_db.blobs.put(&image);
        update_student(&test_db.state, student.clone())
            .await
            .expect("Failed to update student");

        let student = find_students(&test_db.state, pid)
            .await
            .expect("Failed to find student")
            .remove(0);
        assert_eq!(student.image_name, image);
        assert_eq!(student.image_url, format!("http://blobs.test/media/{}", image));

        test_db.blobs.remove(&image);
        update_student(&test_db.state, student)
            .await
            .expect("Failed to update student");

        let student = find_students(&test_db.state, pid)
            .await
            .expect("Failed to find student")
            .remove(0);
        assert!(student.image_name.is_empty());
    }
}
