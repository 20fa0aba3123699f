use crate::calc::{self, AttendanceTally, ScorePair};
use crate::engine::{self, EnrollmentStatus};
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{missing, str_param};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

const ENROLLMENT_SELECT: &str = "SELECT e.id, e.student_id, e.course_id, e.status FROM enrollments e";

/// Recorded-score edit. Absent components keep their stored values; `assignments`
/// replaces the whole list when present.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ScoresPatch {
    assignments: Option<Vec<ScorePair>>,
    midterm: Option<ScorePair>,
    #[serde(rename = "final")]
    final_exam: Option<ScorePair>,
    participation: Option<ScorePair>,
    attendance: Option<AttendanceTally>,
}

fn enrollment_json(conn: &Connection, row: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let student_id: String = row.get(1)?;
    let course_id: String = row.get(2)?;
    let status: String = row.get(3)?;
    if EnrollmentStatus::parse(&status).is_none() {
        tracing::warn!(enrollment_id = %id, status = %status, "unexpected enrollment status");
    }
    let scores = match engine::load_component_scores(conn, &id) {
        Ok(s) => s,
        Err(engine::EngineError::Db(e)) => return Err(e),
        Err(_) => calc::ComponentScores::default(),
    };
    Ok(json!({
        "id": id,
        "studentId": student_id,
        "courseId": course_id,
        "status": status,
        "componentScores": scores
    }))
}

fn load_enrollment(
    conn: &Connection,
    enrollment_id: &str,
) -> rusqlite::Result<Option<serde_json::Value>> {
    let sql = format!("{} WHERE e.id = ?", ENROLLMENT_SELECT);
    conn.query_row(&sql, [enrollment_id], |r| enrollment_json(conn, r))
        .optional()
}

fn exists(conn: &Connection, sql: &str, id: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn.query_row(sql, [id], |r| r.get(0)).optional()?;
    Ok(found.is_some())
}

fn handle_enrollments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = str_param(req, "studentId") else {
        return missing(req, "studentId");
    };
    let Some(course_id) = str_param(req, "courseId") else {
        return missing(req, "courseId");
    };

    for (sql, id, entity, key) in [
        ("SELECT 1 FROM students WHERE id = ?", student_id, "student", "studentId"),
        ("SELECT 1 FROM courses WHERE id = ?", course_id, "course", "courseId"),
    ] {
        match exists(conn, sql, id) {
            Ok(true) => {}
            Ok(false) => {
                return err(
                    &req.id,
                    "not_found",
                    format!("{} not found", entity),
                    Some(json!({ key: id })),
                )
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM enrollments WHERE student_id = ? AND course_id = ?",
            (student_id, course_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(id) = existing {
        return err(
            &req.id,
            "duplicate",
            "student is already enrolled in this course",
            Some(json!({ "enrollmentId": id })),
        );
    }

    let enrollment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO enrollments(id, student_id, course_id, status) VALUES(?, ?, ?, ?)",
        (
            &enrollment_id,
            student_id,
            course_id,
            EnrollmentStatus::Enrolled.as_str(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

    ok(&req.id, json!({ "enrollmentId": enrollment_id }))
}

fn handle_enrollments_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(enrollment_id) = str_param(req, "enrollmentId") else {
        return missing(req, "enrollmentId");
    };

    match load_enrollment(conn, enrollment_id) {
        Ok(Some(enrollment)) => ok(&req.id, json!({ "enrollment": enrollment })),
        Ok(None) => err(
            &req.id,
            "not_found",
            "enrollment not found",
            Some(json!({ "enrollmentId": enrollment_id })),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_enrollments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "enrollments": [] }));
    };

    let (filter, id) = match (str_param(req, "courseId"), str_param(req, "studentId")) {
        (Some(course_id), None) => ("e.course_id", course_id),
        (None, Some(student_id)) => ("e.student_id", student_id),
        _ => {
            return err(
                &req.id,
                "bad_params",
                "expected exactly one of courseId or studentId",
                None,
            )
        }
    };

    let sql = format!(
        "{} WHERE {} = ? ORDER BY e.rowid",
        ENROLLMENT_SELECT, filter
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([id], |r| enrollment_json(conn, r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(enrollments) => ok(&req.id, json!({ "enrollments": enrollments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_enrollments_update_scores(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(enrollment_id) = str_param(req, "enrollmentId") else {
        return missing(req, "enrollmentId");
    };
    let Some(raw_patch) = req.params.get("patch").filter(|v| v.is_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    let patch: ScoresPatch = match serde_json::from_value(raw_patch.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };

    let mut scores = match engine::load_component_scores(conn, enrollment_id) {
        Ok(s) => s,
        Err(e) => return engine_err(&req.id, &e),
    };
    if let Some(v) = patch.assignments {
        scores.assignments = v;
    }
    if let Some(v) = patch.midterm {
        scores.midterm = v;
    }
    if let Some(v) = patch.final_exam {
        scores.final_exam = v;
    }
    if let Some(v) = patch.participation {
        scores.participation = v;
    }
    if let Some(v) = patch.attendance {
        scores.attendance = v;
    }

    let options = match setup::engine_options(conn) {
        Ok(o) => o,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if options.reject_malformed_scores {
        if let Err(e) = calc::validate_component_scores(&scores) {
            return err(&req.id, e.code(), e.to_string(), None);
        }
    }

    if let Err(e) = engine::save_component_scores(conn, enrollment_id, &scores) {
        return engine_err(&req.id, &e);
    }
    tracing::debug!(enrollment_id, assignments = scores.assignments.len(), "scores recorded");
    ok(&req.id, json!({ "componentScores": scores }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollments.create" => Some(handle_enrollments_create(state, req)),
        "enrollments.get" => Some(handle_enrollments_get(state, req)),
        "enrollments.list" => Some(handle_enrollments_list(state, req)),
        "enrollments.updateScores" => Some(handle_enrollments_update_scores(state, req)),
        _ => None,
    }
}
