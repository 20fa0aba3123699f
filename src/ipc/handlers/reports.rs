use crate::engine::{GradeEngine, GradeRecord, GradeStatus, Transcript};
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn student_header(
    conn: &Connection,
    req: &Request,
    student_id: &str,
) -> Result<serde_json::Value, serde_json::Value> {
    let row = conn
        .query_row(
            "SELECT first_name, last_name, student_no FROM students WHERE id = ?",
            [student_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let Some((first_name, last_name, student_no)) = row else {
        return Err(err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({ "studentId": student_id })),
        ));
    };
    Ok(json!({
        "id": student_id,
        "displayName": format!("{}, {}", last_name, first_name),
        "studentNo": student_no
    }))
}

/// Grade row as printed on a transcript. Rows that are not finalized are marked provisional.
fn transcript_row(grade: &GradeRecord) -> serde_json::Value {
    json!({
        "gradeId": grade.id,
        "courseId": grade.course_id,
        "subjectCode": grade.subject_code,
        "courseName": grade.course_name,
        "credits": grade.credits,
        "totalPercentage": grade.total_percentage,
        "letterGrade": grade.letter_grade,
        "gradePoints": grade.grade_points,
        "qualityPoints": grade.quality_points,
        "status": grade.status,
        "provisional": grade.status != GradeStatus::Finalized
    })
}

fn transcript_json(t: &Transcript) -> serde_json::Value {
    let semesters: Vec<serde_json::Value> = t
        .semesters
        .iter()
        .map(|s| {
            json!({
                "semester": {
                    "id": s.semester_id,
                    "year": s.year,
                    "term": s.term,
                    "name": s.name
                },
                "grades": s.grades.iter().map(transcript_row).collect::<Vec<_>>(),
                "gpa": s.gpa
            })
        })
        .collect();
    json!({
        "semesters": semesters,
        "cumulative": t.cumulative
    })
}

fn handle_transcript_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student = match student_header(conn, req, &student_id) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let (engine_options, report_options) =
        match (setup::engine_options(conn), setup::report_options(conn)) {
            (Ok(e), Ok(r)) => (e, r),
            (Err(e), _) | (_, Err(e)) => {
                return err(&req.id, "db_query_failed", e.to_string(), None)
            }
        };
    let engine = GradeEngine::new(conn, engine_options);
    let transcript = match engine.transcript(&student_id, report_options.include_unfinalized) {
        Ok(t) => t,
        Err(e) => return engine_err(&req.id, &e),
    };

    let mut model = transcript_json(&transcript);
    model["student"] = student;
    if report_options.show_generated_at {
        model["generatedAt"] = json!(chrono::Utc::now().to_rfc3339());
    }
    ok(&req.id, model)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.transcriptModel" => Some(handle_transcript_model(state, req)),
        _ => None,
    }
}
