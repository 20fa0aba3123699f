mod test_support;

use rusqlite::Connection;
use serde_json::json;
use test_support::{
    assign_letter, create_course, create_semester, create_student, db_path, enroll,
    request_err_code, request_ok, select_workspace, spawn_sidecar, temp_dir,
};

fn lock_student_profiles(conn: &Connection) {
    conn.execute_batch(
        "CREATE TRIGGER fail_student_update BEFORE UPDATE ON students
         BEGIN SELECT RAISE(ABORT, 'student profile locked'); END;",
    )
    .expect("create student trigger");
}

fn forbid_unfinalize(conn: &Connection) {
    conn.execute_batch(
        "CREATE TRIGGER fail_unfinalize BEFORE UPDATE OF status ON grades
         WHEN OLD.status = 'finalized' AND NEW.status != 'finalized'
         BEGIN SELECT RAISE(ABORT, 'finalized rows are locked'); END;",
    )
    .expect("create grade trigger");
}

fn run_failed_finalize(mode: &str, block_compensation: bool) -> (String, String, String) {
    let workspace = temp_dir(&format!("gradebook-fault-{}", mode));
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "mode",
        "setup.update",
        json!({ "section": "grading", "patch": { "finalizeMode": mode } }),
    );
    let semester = create_semester(&mut stdin, &mut reader, 2024, 1);
    let course = create_course(&mut stdin, &mut reader, &semester, "GEO101", 3.0);
    let student = create_student(&mut stdin, &mut reader, "Vance");
    let enrollment = enroll(&mut stdin, &mut reader, &student, &course);
    let grade = assign_letter(&mut stdin, &mut reader, &student, &course, "A");

    let conn = Connection::open(db_path(&workspace)).expect("open workspace db");
    lock_student_profiles(&conn);
    if block_compensation {
        forbid_unfinalize(&conn);
    }

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "finalize",
        "grades.finalize",
        json!({ "gradeId": grade["id"] }),
    );

    let reloaded = request_ok(
        &mut stdin,
        &mut reader,
        "reload",
        "grades.get",
        json!({ "gradeId": grade["id"] }),
    );
    let enr = request_ok(
        &mut stdin,
        &mut reader,
        "enrollment",
        "enrollments.get",
        json!({ "enrollmentId": enrollment }),
    );
    (
        code,
        reloaded["grade"]["status"]
            .as_str()
            .expect("grade status")
            .to_string(),
        enr["enrollment"]["status"]
            .as_str()
            .expect("enrollment status")
            .to_string(),
    )
}

#[test]
fn transaction_mode_rolls_back_every_write() {
    let (code, grade_status, enrollment_status) = run_failed_finalize("transaction", false);
    assert_eq!(code, "db_update_failed");
    assert_eq!(grade_status, "graded");
    assert_eq!(enrollment_status, "graded");
}

#[test]
fn saga_mode_compensates_completed_steps() {
    let (code, grade_status, enrollment_status) = run_failed_finalize("saga", false);
    assert_eq!(code, "db_update_failed");
    assert_eq!(grade_status, "graded");
    assert_eq!(enrollment_status, "graded");
}

#[test]
fn saga_mode_reports_failed_compensation() {
    let (code, grade_status, enrollment_status) = run_failed_finalize("saga", true);
    assert_eq!(code, "finalize_incomplete");
    assert_eq!(grade_status, "finalized");
    assert_eq!(enrollment_status, "graded");
}

#[test]
fn transaction_mode_is_unaffected_by_compensation_guards() {
    let (code, grade_status, _) = run_failed_finalize("transaction", true);
    assert_eq!(code, "db_update_failed");
    assert_eq!(grade_status, "graded");
}
