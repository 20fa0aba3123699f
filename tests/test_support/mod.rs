#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join("gradebook.sqlite3")
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Error code of a failed response; panics if the call succeeded.
pub fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"]
        .as_str()
        .expect("error code")
        .to_string()
}

pub fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing string field {} in {}", key, v))
        .to_string()
}

pub fn default_policy() -> serde_json::Value {
    json!({
        "assignments": 20,
        "midterm": 20,
        "final": 40,
        "attendance": 10,
        "participation": 10
    })
}

pub fn select_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &Path,
) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

pub fn create_semester(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    year: i64,
    term: i64,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        "seed-semester",
        "semesters.create",
        json!({ "year": year, "term": term }),
    );
    str_field(&res, "semesterId")
}

/// Creates a subject with `code` and a course for it in `semester_id` using [`default_policy`].
pub fn create_course(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    semester_id: &str,
    code: &str,
    credits: f64,
) -> String {
    let subject = request_ok(
        stdin,
        reader,
        "seed-subject",
        "subjects.create",
        json!({ "code": code, "name": format!("Subject {}", code), "credits": credits }),
    );
    let course = request_ok(
        stdin,
        reader,
        "seed-course",
        "courses.create",
        json!({
            "subjectId": str_field(&subject, "subjectId"),
            "semesterId": semester_id,
            "gradingPolicy": default_policy()
        }),
    );
    str_field(&course, "courseId")
}

pub fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    last_name: &str,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        "seed-student",
        "students.create",
        json!({ "firstName": "Test", "lastName": last_name }),
    );
    str_field(&res, "studentId")
}

pub fn enroll(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_id: &str,
    course_id: &str,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        "seed-enroll",
        "enrollments.create",
        json!({ "studentId": student_id, "courseId": course_id }),
    );
    str_field(&res, "enrollmentId")
}

pub fn assign_letter(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_id: &str,
    course_id: &str,
    letter: &str,
) -> serde_json::Value {
    let res = request_ok(
        stdin,
        reader,
        "seed-assign",
        "grades.assign",
        json!({ "studentId": student_id, "courseId": course_id, "letterGrade": letter }),
    );
    res["grade"].clone()
}
