mod test_support;

use serde_json::json;
use test_support::{
    assign_letter, create_course, create_semester, create_student, enroll, request_err_code,
    request_ok, select_workspace, spawn_sidecar, temp_dir,
};

#[test]
fn grade_flows_from_scores_to_finalized() {
    let workspace = temp_dir("gradebook-lifecycle");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let semester = create_semester(&mut stdin, &mut reader, 2024, 1);
    let course = create_course(&mut stdin, &mut reader, &semester, "MATH101", 3.0);
    let student = create_student(&mut stdin, &mut reader, "Ng");
    let enrollment = enroll(&mut stdin, &mut reader, &student, &course);

    let scores = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "enrollments.updateScores",
        json!({
            "enrollmentId": enrollment,
            "patch": {
                "assignments": [
                    { "score": 9, "maxScore": 10 },
                    { "score": 7, "maxScore": 10 },
                    { "score": null, "maxScore": 10 }
                ],
                "midterm": { "score": 42, "maxScore": 50 },
                "final": { "score": 90, "maxScore": 100 },
                "participation": { "score": 10, "maxScore": 10 },
                "attendance": { "present": 18, "total": 20 }
            }
        }),
    );
    assert_eq!(
        scores["componentScores"]["assignments"]
            .as_array()
            .map(|a| a.len()),
        Some(3)
    );

    let assigned = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.assign",
        json!({ "studentId": student, "courseId": course }),
    );
    let grade = &assigned["grade"];
    // 16 + 16.8 + 36 + 9 + 10 = 87.8
    assert_eq!(grade["totalPercentage"].as_i64(), Some(88));
    assert_eq!(grade["letterGrade"].as_str(), Some("B+"));
    assert_eq!(grade["gradePoints"].as_f64(), Some(3.3));
    assert_eq!(grade["status"].as_str(), Some("graded"));
    let grade_id = grade["id"].as_str().expect("grade id").to_string();
    let graded_at = grade["gradedAt"].as_str().expect("gradedAt").to_string();

    let enr = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "enrollments.get",
        json!({ "enrollmentId": enrollment }),
    );
    assert_eq!(enr["enrollment"]["status"].as_str(), Some("graded"));

    // Unchanged inputs leave the stored row alone.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.assign",
        json!({ "studentId": student, "courseId": course }),
    );
    assert_eq!(again["grade"]["id"].as_str(), Some(grade_id.as_str()));
    assert_eq!(again["grade"]["gradedAt"].as_str(), Some(graded_at.as_str()));

    // A score change before finalization regrades the same row.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "enrollments.updateScores",
        json!({
            "enrollmentId": enrollment,
            "patch": { "final": { "score": 100, "maxScore": 100 } }
        }),
    );
    let regraded = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grades.assign",
        json!({ "studentId": student, "courseId": course }),
    );
    assert_eq!(regraded["grade"]["id"].as_str(), Some(grade_id.as_str()));
    assert_eq!(regraded["grade"]["totalPercentage"].as_i64(), Some(92));
    assert_eq!(regraded["grade"]["letterGrade"].as_str(), Some("A-"));

    let finalized = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "grades.finalize",
        json!({ "gradeId": grade_id }),
    );
    assert_eq!(finalized["grade"]["status"].as_str(), Some("finalized"));
    assert!(finalized["grade"]["finalizedAt"].as_str().is_some());

    let enr = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "enrollments.get",
        json!({ "enrollmentId": enrollment }),
    );
    assert_eq!(enr["enrollment"]["status"].as_str(), Some("completed"));

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "9",
        "grades.assign",
        json!({ "studentId": student, "courseId": course, "letterGrade": "F" }),
    );
    assert_eq!(code, "grade_finalized");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "10",
        "grades.finalize",
        json!({ "gradeId": grade_id }),
    );
    assert_eq!(code, "grade_already_finalized");

    let reloaded = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "grades.get",
        json!({ "studentId": student, "courseId": course }),
    );
    assert_eq!(reloaded["grade"], finalized["grade"]);
}

#[test]
fn failing_letter_marks_enrollment_failed() {
    let workspace = temp_dir("gradebook-lifecycle-failed");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let semester = create_semester(&mut stdin, &mut reader, 2024, 2);
    let course = create_course(&mut stdin, &mut reader, &semester, "PHYS150", 4.0);
    let student = create_student(&mut stdin, &mut reader, "Reyes");
    let enrollment = enroll(&mut stdin, &mut reader, &student, &course);

    let grade = assign_letter(&mut stdin, &mut reader, &student, &course, "f");
    assert_eq!(grade["letterGrade"].as_str(), Some("F"));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.finalize",
        json!({ "gradeId": grade["id"] }),
    );
    let enr = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "enrollments.get",
        json!({ "enrollmentId": enrollment }),
    );
    assert_eq!(enr["enrollment"]["status"].as_str(), Some("failed"));
}

#[test]
fn assign_rejects_unknown_letters_and_missing_enrollment() {
    let workspace = temp_dir("gradebook-lifecycle-params");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let semester = create_semester(&mut stdin, &mut reader, 2025, 1);
    let course = create_course(&mut stdin, &mut reader, &semester, "ART100", 2.0);
    let student = create_student(&mut stdin, &mut reader, "Lee");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "1",
        "grades.assign",
        json!({ "studentId": student, "courseId": course, "letterGrade": "E" }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "grades.assign",
        json!({ "studentId": student, "courseId": course, "letterGrade": "A" }),
    );
    assert_eq!(code, "not_found");

    enroll(&mut stdin, &mut reader, &student, &course);
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "enrollments.create",
        json!({ "studentId": student, "courseId": course }),
    );
    assert_eq!(code, "duplicate");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "enrollments.updateScores",
        json!({ "enrollmentId": "x", "patch": { "bonus": 5 } }),
    );
    assert_eq!(code, "bad_params");
}
