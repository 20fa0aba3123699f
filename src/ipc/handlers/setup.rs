use crate::db;
use crate::engine::{EngineOptions, FinalizeMode};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Grading,
    Reports,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "reports" => Some(Self::Reports),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Reports => "setup.reports",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "finalizeMode": FinalizeMode::default().as_str(),
            "rejectMalformedScores": false,
            "excludeNonGpaLetters": false
        }),
        SetupSection::Reports => json!({
            "showGeneratedAt": true,
            "includeUnfinalized": false
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "finalizeMode" => {
                    let raw = v
                        .as_str()
                        .ok_or_else(|| format!("{} must be string", k))?
                        .trim()
                        .to_ascii_lowercase();
                    let Some(mode) = FinalizeMode::parse(&raw) else {
                        return Err("finalizeMode must be one of: transaction, saga".into());
                    };
                    obj.insert(k.clone(), Value::String(mode.as_str().to_string()));
                }
                "rejectMalformedScores" | "excludeNonGpaLetters" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Reports => match k.as_str() {
                "showGeneratedAt" | "includeUnfinalized" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Each stored field merges on its own; a bad one keeps its default.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                if let Err(msg) = merge_section_patch(section, &mut current, &single) {
                    tracing::warn!(section = section.key(), field = %k, error = %msg, "ignoring stored setup value");
                }
            }
        }
    }
    Ok(current)
}

pub fn engine_options(conn: &rusqlite::Connection) -> anyhow::Result<EngineOptions> {
    let grading = load_section(conn, SetupSection::Grading)?;
    Ok(EngineOptions {
        finalize_mode: grading
            .get("finalizeMode")
            .and_then(|v| v.as_str())
            .and_then(FinalizeMode::parse)
            .unwrap_or_default(),
        reject_malformed_scores: grading
            .get("rejectMalformedScores")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        exclude_non_gpa_letters: grading
            .get("excludeNonGpaLetters")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    })
}

#[derive(Debug, Clone, Copy)]
pub struct ReportOptions {
    pub show_generated_at: bool,
    pub include_unfinalized: bool,
}

pub fn report_options(conn: &rusqlite::Connection) -> anyhow::Result<ReportOptions> {
    let reports = load_section(conn, SetupSection::Reports)?;
    Ok(ReportOptions {
        show_generated_at: reports
            .get("showGeneratedAt")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
        include_unfinalized: reports
            .get("includeUnfinalized")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let grading = match load_section(conn, SetupSection::Grading) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let reports = match load_section(conn, SetupSection::Reports) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "grading": grading,
            "reports": reports
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.key(), value = %current, "setup updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> rusqlite::Connection {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("init");
        conn
    }

    #[test]
    fn defaults_map_to_default_engine_options() {
        let conn = conn();
        assert_eq!(engine_options(&conn).expect("options"), EngineOptions::default());
    }

    #[test]
    fn stored_values_override_defaults() {
        let conn = conn();
        db::settings_set_json(
            &conn,
            "setup.grading",
            &json!({ "finalizeMode": "saga", "excludeNonGpaLetters": true }),
        )
        .expect("store");
        let options = engine_options(&conn).expect("options");
        assert_eq!(options.finalize_mode, FinalizeMode::Saga);
        assert!(options.exclude_non_gpa_letters);
        assert!(!options.reject_malformed_scores);
    }

    #[test]
    fn bad_stored_field_keeps_default_without_dropping_others() {
        let conn = conn();
        db::settings_set_json(
            &conn,
            "setup.grading",
            &json!({
                "finalizeMode": "eventually",
                "excludeNonGpaLetters": true,
                "legacyColumn": 3,
                "rejectMalformedScores": true
            }),
        )
        .expect("store");
        let options = engine_options(&conn).expect("options");
        assert_eq!(options.finalize_mode, FinalizeMode::Transaction);
        assert!(options.exclude_non_gpa_letters);
        assert!(options.reject_malformed_scores);
    }

    #[test]
    fn patch_rejects_unknown_fields_and_bad_modes() {
        let mut current = default_section(SetupSection::Grading);
        let bad_mode = json!({ "finalizeMode": "eventually" });
        assert!(merge_section_patch(
            SetupSection::Grading,
            &mut current,
            bad_mode.as_object().expect("object"),
        )
        .is_err());

        let unknown = json!({ "curveGrades": true });
        assert!(merge_section_patch(
            SetupSection::Grading,
            &mut current,
            unknown.as_object().expect("object"),
        )
        .is_err());
    }
}
