use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{missing, str_param};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_semesters_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(year) = req.params.get("year").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "year must be an integer", None);
    };
    let Some(term) = req.params.get("term").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "term must be an integer", None);
    };
    if !(1900..=9999).contains(&year) {
        return err(&req.id, "bad_params", "year must be in 1900..=9999", None);
    }
    if term < 1 {
        return err(&req.id, "bad_params", "term must be >= 1", None);
    }
    let name = str_param(req, "name")
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} Term {}", year, term));

    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM semesters WHERE year = ? AND term = ?",
            (year, term),
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
            "semester already exists",
            Some(json!({ "semesterId": id })),
        );
    }

    let semester_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO semesters(id, year, term, name) VALUES(?, ?, ?, ?)",
        (&semester_id, year, term, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "semesters" })),
        );
    }

    ok(
        &req.id,
        json!({ "semesterId": semester_id, "year": year, "term": term, "name": name }),
    )
}

fn handle_semesters_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "semesters": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, year, term, name FROM semesters ORDER BY year, term",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let year: i64 = row.get(1)?;
            let term: i64 = row.get(2)?;
            let name: String = row.get(3)?;
            Ok(json!({ "id": id, "year": year, "term": term, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(semesters) => ok(&req.id, json!({ "semesters": semesters })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(code) = str_param(req, "code") else {
        return missing(req, "code");
    };
    let code = code.to_ascii_uppercase();
    let Some(name) = str_param(req, "name") else {
        return missing(req, "name");
    };
    let Some(credits) = req.params.get("credits").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "credits must be a number", None);
    };
    if !credits.is_finite() || credits <= 0.0 {
        return err(
            &req.id,
            "bad_params",
            "credits must be > 0",
            Some(json!({ "credits": credits })),
        );
    }

    let taken: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE code = ?", [&code], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if taken.is_some() {
        return err(
            &req.id,
            "duplicate",
            "subject code already exists",
            Some(json!({ "code": code })),
        );
    }

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, code, name, credits) VALUES(?, ?, ?, ?)",
        (&subject_id, &code, name, credits),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(
        &req.id,
        json!({ "subjectId": subject_id, "code": code, "name": name, "credits": credits }),
    )
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };

    let mut stmt = match conn.prepare("SELECT id, code, name, credits FROM subjects ORDER BY code")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let code: String = row.get(1)?;
            let name: String = row.get(2)?;
            let credits: f64 = row.get(3)?;
            Ok(json!({ "id": id, "code": code, "name": name, "credits": credits }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "semesters.create" => Some(handle_semesters_create(state, req)),
        "semesters.list" => Some(handle_semesters_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        _ => None,
    }
}
