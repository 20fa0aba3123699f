use crate::calc::GradingPolicy;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{missing, str_param};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

const COURSE_SELECT: &str = "SELECT
       c.id, c.subject_id, s.code, s.name, s.credits, c.semester_id, c.name, c.teacher,
       c.weight_assignments, c.weight_midterm, c.weight_final,
       c.weight_attendance, c.weight_participation
     FROM courses c
     JOIN subjects s ON s.id = c.subject_id";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CourseCreate {
    subject_id: String,
    semester_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    teacher: Option<String>,
    grading_policy: GradingPolicy,
}

/// Fields a course edit may touch. Subject and semester are fixed at creation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CoursePatch {
    name: Option<String>,
    teacher: Option<String>,
    grading_policy: Option<GradingPolicy>,
}

fn course_json(row: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let subject_id: String = row.get(1)?;
    let subject_code: String = row.get(2)?;
    let subject_name: String = row.get(3)?;
    let credits: f64 = row.get(4)?;
    let semester_id: String = row.get(5)?;
    let name: String = row.get(6)?;
    let teacher: Option<String> = row.get(7)?;
    let policy = GradingPolicy {
        assignments: row.get(8)?,
        midterm: row.get(9)?,
        final_exam: row.get(10)?,
        attendance: row.get(11)?,
        participation: row.get(12)?,
    };
    Ok(json!({
        "id": id,
        "subjectId": subject_id,
        "subjectCode": subject_code,
        "subjectName": subject_name,
        "credits": credits,
        "semesterId": semester_id,
        "name": name,
        "teacher": teacher,
        "gradingPolicy": policy
    }))
}

fn load_course(conn: &Connection, course_id: &str) -> rusqlite::Result<Option<serde_json::Value>> {
    let sql = format!("{} WHERE c.id = ?", COURSE_SELECT);
    conn.query_row(&sql, [course_id], course_json).optional()
}

fn policy_error(req: &Request, e: crate::calc::CalcError) -> serde_json::Value {
    err(&req.id, e.code(), e.to_string(), None)
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let input: CourseCreate = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    if let Err(e) = input.grading_policy.validate() {
        return policy_error(req, e);
    }

    let subject_name: Option<String> = match conn
        .query_row(
            "SELECT name FROM subjects WHERE id = ?",
            [&input.subject_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(subject_name) = subject_name else {
        return err(
            &req.id,
            "not_found",
            "subject not found",
            Some(json!({ "subjectId": input.subject_id })),
        );
    };

    let semester_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM semesters WHERE id = ?",
            [&input.semester_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if semester_exists.is_none() {
        return err(
            &req.id,
            "not_found",
            "semester not found",
            Some(json!({ "semesterId": input.semester_id })),
        );
    }

    let name = input
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or(subject_name);
    let teacher = input
        .teacher
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let p = &input.grading_policy;

    let course_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO courses(
            id, subject_id, semester_id, name, teacher,
            weight_assignments, weight_midterm, weight_final,
            weight_attendance, weight_participation
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            course_id,
            input.subject_id,
            input.semester_id,
            name,
            teacher,
            p.assignments,
            p.midterm,
            p.final_exam,
            p.attendance,
            p.participation,
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "courses" })),
        );
    }

    match load_course(conn, &course_id) {
        Ok(Some(course)) => ok(&req.id, json!({ "courseId": course_id, "course": course })),
        Ok(None) => err(&req.id, "not_found", "course not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(course_id) = str_param(req, "courseId") else {
        return missing(req, "courseId");
    };

    match load_course(conn, course_id) {
        Ok(Some(course)) => ok(&req.id, json!({ "course": course })),
        Ok(None) => err(
            &req.id,
            "not_found",
            "course not found",
            Some(json!({ "courseId": course_id })),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "courses": [] }));
    };
    let semester_id = str_param(req, "semesterId");

    let sql = format!(
        "{} WHERE (?1 IS NULL OR c.semester_id = ?1) ORDER BY s.code, c.name",
        COURSE_SELECT
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([semester_id], course_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(course_id) = str_param(req, "courseId") else {
        return missing(req, "courseId");
    };
    let Some(raw_patch) = req.params.get("patch").filter(|v| v.is_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    let patch: CoursePatch = match serde_json::from_value(raw_patch.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    if let Some(policy) = &patch.grading_policy {
        if let Err(e) = policy.validate() {
            return policy_error(req, e);
        }
    }

    match load_course(conn, course_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                "course not found",
                Some(json!({ "courseId": course_id })),
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Some(name) = patch.name.as_deref().map(str::trim) {
        if name.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        if let Err(e) = tx.execute("UPDATE courses SET name = ? WHERE id = ?", (name, course_id)) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(teacher) = patch.teacher.as_deref().map(str::trim) {
        let teacher = if teacher.is_empty() { None } else { Some(teacher) };
        if let Err(e) = tx.execute(
            "UPDATE courses SET teacher = ? WHERE id = ?",
            (teacher, course_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(p) = &patch.grading_policy {
        if let Err(e) = tx.execute(
            "UPDATE courses
             SET weight_assignments = ?, weight_midterm = ?, weight_final = ?,
                 weight_attendance = ?, weight_participation = ?
             WHERE id = ?",
            params![
                p.assignments,
                p.midterm,
                p.final_exam,
                p.attendance,
                p.participation,
                course_id
            ],
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    match load_course(conn, course_id) {
        Ok(Some(course)) => ok(&req.id, json!({ "course": course })),
        Ok(None) => err(&req.id, "not_found", "course not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.get" => Some(handle_courses_get(state, req)),
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        _ => None,
    }
}
