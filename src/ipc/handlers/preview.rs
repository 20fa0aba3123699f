use crate::calc::{self, ComponentScores, GradingPolicy};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// `calc.preview` works without a workspace: it only runs the pure grade calculation.
fn handle_calc_preview(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(raw_policy) = req.params.get("gradingPolicy") else {
        return err(&req.id, "bad_params", "missing gradingPolicy", None);
    };
    let policy: GradingPolicy = match serde_json::from_value(raw_policy.clone()) {
        Ok(p) => p,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };
    if let Err(e) = policy.validate() {
        return err(&req.id, e.code(), e.to_string(), None);
    }

    let raw: ComponentScores = match req.params.get("componentScores") {
        None => ComponentScores::default(),
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
        },
    };
    let strict = req
        .params
        .get("rejectMalformedScores")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if strict {
        if let Err(e) = calc::validate_component_scores(&raw) {
            return err(&req.id, e.code(), e.to_string(), None);
        }
    }

    let weighted = calc::compute_component_scores(&raw, &policy);
    let total = calc::total_percentage(&weighted);
    let letter = calc::letter_grade_of(total);
    ok(
        &req.id,
        json!({
            "componentScores": weighted,
            "totalPercentage": total,
            "letterGrade": letter,
            "gradePoints": letter.grade_points()
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calc.preview" => Some(handle_calc_preview(state, req)),
        _ => None,
    }
}
