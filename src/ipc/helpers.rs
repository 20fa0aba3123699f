use crate::engine::{EngineError, GradeEngine};
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::handlers::setup;
use crate::ipc::types::{AppState, Request};

/// Trimmed, non-empty string param.
pub fn str_param<'r>(req: &'r Request, key: &str) -> Option<&'r str> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn missing(req: &Request, key: &str) -> serde_json::Value {
    err(&req.id, "bad_params", format!("missing {}", key), None)
}

/// Runs `f` against a grade engine configured from the workspace `grading` setup section.
pub fn with_engine<F>(state: &AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&GradeEngine<'_>) -> Result<serde_json::Value, EngineError>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let options = match setup::engine_options(conn) {
        Ok(o) => o,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let engine = GradeEngine::new(conn, options);
    match f(&engine) {
        Ok(result) => ok(&req.id, result),
        Err(e) => {
            tracing::debug!(method = %req.method, code = e.code(), error = %e, "engine error");
            engine_err(&req.id, &e)
        }
    }
}
