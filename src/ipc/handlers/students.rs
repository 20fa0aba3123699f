use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{missing, str_param};
use crate::ipc::types::{AppState, Request};
use rusqlite::{OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const STUDENT_SELECT: &str =
    "SELECT id, first_name, last_name, student_no, cgpa, total_credits FROM students";

fn student_json(row: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let first_name: String = row.get(1)?;
    let last_name: String = row.get(2)?;
    let student_no: Option<String> = row.get(3)?;
    let cgpa: f64 = row.get(4)?;
    let total_credits: f64 = row.get(5)?;
    Ok(json!({
        "id": id,
        "firstName": first_name,
        "lastName": last_name,
        "displayName": format!("{}, {}", last_name, first_name),
        "studentNo": student_no,
        "cgpa": cgpa,
        "totalCredits": total_credits
    }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(first_name) = str_param(req, "firstName") else {
        return missing(req, "firstName");
    };
    let Some(last_name) = str_param(req, "lastName") else {
        return missing(req, "lastName");
    };
    let student_no = str_param(req, "studentNo");

    if let Some(no) = student_no {
        let taken: Option<i64> = match conn
            .query_row("SELECT 1 FROM students WHERE student_no = ?", [no], |r| {
                r.get(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if taken.is_some() {
            return err(
                &req.id,
                "duplicate",
                "student number already in use",
                Some(json!({ "studentNo": no })),
            );
        }
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, first_name, last_name, student_no) VALUES(?, ?, ?, ?)",
        (&student_id, first_name, last_name, student_no),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = str_param(req, "studentId") else {
        return missing(req, "studentId");
    };

    let sql = format!("{} WHERE id = ?", STUDENT_SELECT);
    match conn.query_row(&sql, [student_id], student_json).optional() {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({ "studentId": student_id })),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let sql = format!("{} ORDER BY last_name, first_name, id", STUDENT_SELECT);
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        _ => None,
    }
}
