mod test_support;

use serde_json::json;
use test_support::{
    assign_letter, create_course, create_semester, create_student, enroll, request_ok,
    select_workspace, spawn_sidecar, temp_dir,
};

#[test]
fn gpa_is_credit_weighted_over_finalized_grades() {
    let workspace = temp_dir("gradebook-gpa");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let semester = create_semester(&mut stdin, &mut reader, 2024, 1);
    let eng = create_course(&mut stdin, &mut reader, &semester, "ENG101", 3.0);
    let cs = create_course(&mut stdin, &mut reader, &semester, "CS101", 4.0);
    let student = create_student(&mut stdin, &mut reader, "Tran");
    enroll(&mut stdin, &mut reader, &student, &eng);
    enroll(&mut stdin, &mut reader, &student, &cs);

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "gpa.compute",
        json!({ "studentId": student }),
    );
    assert_eq!(empty["gpa"].as_f64(), Some(0.0));
    assert_eq!(empty["totalCredits"].as_f64(), Some(0.0));

    let a = assign_letter(&mut stdin, &mut reader, &student, &eng, "A");
    let b = assign_letter(&mut stdin, &mut reader, &student, &cs, "B");

    // Graded rows are not yet on the record.
    let pending = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "gpa.compute",
        json!({ "studentId": student }),
    );
    assert_eq!(pending["gpa"].as_f64(), Some(0.0));

    for (i, g) in [&a, &b].into_iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("f{}", i),
            "grades.finalize",
            json!({ "gradeId": g["id"] }),
        );
    }

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "gpa.compute",
        json!({ "studentId": student }),
    );
    // (4.0 * 3 + 3.0 * 4) / 7 = 3.428..
    assert_eq!(summary["gpa"].as_f64(), Some(3.43));
    assert_eq!(summary["totalCredits"].as_f64(), Some(7.0));
    assert_eq!(summary["totalQualityPoints"].as_f64(), Some(24.0));

    let profile = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.get",
        json!({ "studentId": student }),
    );
    assert_eq!(profile["student"]["cgpa"].as_f64(), Some(3.43));
    assert_eq!(profile["student"]["totalCredits"].as_f64(), Some(7.0));
}

#[test]
fn semester_scope_and_non_gpa_letters() {
    let workspace = temp_dir("gradebook-gpa-scope");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let fall = create_semester(&mut stdin, &mut reader, 2023, 2);
    let spring = create_semester(&mut stdin, &mut reader, 2024, 1);
    let art = create_course(&mut stdin, &mut reader, &fall, "ART100", 2.0);
    let mus = create_course(&mut stdin, &mut reader, &spring, "MUS100", 3.0);
    let student = create_student(&mut stdin, &mut reader, "Udall");
    enroll(&mut stdin, &mut reader, &student, &art);
    enroll(&mut stdin, &mut reader, &student, &mus);

    let p = assign_letter(&mut stdin, &mut reader, &student, &art, "P");
    let a = assign_letter(&mut stdin, &mut reader, &student, &mus, "A");
    for (i, g) in [&p, &a].into_iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("f{}", i),
            "grades.finalize",
            json!({ "gradeId": g["id"] }),
        );
    }

    let spring_only = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "gpa.compute",
        json!({ "studentId": student, "semesterId": spring }),
    );
    assert_eq!(spring_only["gpa"].as_f64(), Some(4.0));
    assert_eq!(spring_only["totalCredits"].as_f64(), Some(3.0));

    // P carries zero points but its credits count by default.
    let all = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "gpa.compute",
        json!({ "studentId": student }),
    );
    assert_eq!(all["gpa"].as_f64(), Some(2.4));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "grading", "patch": { "excludeNonGpaLetters": true } }),
    );
    let strict = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "gpa.compute",
        json!({ "studentId": student }),
    );
    assert_eq!(strict["gpa"].as_f64(), Some(4.0));
    assert_eq!(strict["totalCredits"].as_f64(), Some(3.0));
}
