use crate::calc::LetterGrade;
use crate::engine::{AssignGrade, EngineError, GradeInput};
use crate::ipc::error::err;
use crate::ipc::helpers::{missing, str_param, with_engine};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn optional_text(req: &Request, key: &str) -> Option<String> {
    str_param(req, key).map(str::to_string)
}

fn parse_grade_input(req: &Request) -> Result<GradeInput, serde_json::Value> {
    let letter = match req.params.get("letterGrade") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => {
            let raw = v.as_str().unwrap_or_default();
            match LetterGrade::parse(raw) {
                Some(l) => Some(l),
                None => {
                    return Err(err(
                        &req.id,
                        "bad_params",
                        "letterGrade must be one of the known letter grades",
                        Some(json!({
                            "letterGrade": v,
                            "allowed": LetterGrade::ALL.iter().map(|l| l.as_str()).collect::<Vec<_>>()
                        })),
                    ))
                }
            }
        }
    };
    let total_percentage = match req.params.get("totalPercentage") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_i64().filter(|p| (0..=100).contains(p)) {
            Some(p) => Some(p),
            None => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "totalPercentage must be an integer in 0..=100",
                    None,
                ))
            }
        },
    };

    match (letter, total_percentage) {
        (Some(letter), pct) => Ok(GradeInput::Direct {
            letter,
            total_percentage: pct,
        }),
        (None, Some(_)) => Err(err(
            &req.id,
            "bad_params",
            "totalPercentage requires letterGrade",
            None,
        )),
        (None, None) => Ok(GradeInput::FromComponents),
    }
}

fn handle_grades_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(student_id) = str_param(req, "studentId") else {
        return missing(req, "studentId");
    };
    let Some(course_id) = str_param(req, "courseId") else {
        return missing(req, "courseId");
    };
    let input = match parse_grade_input(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let assign = AssignGrade {
        student_id,
        course_id,
        input,
        graded_by: optional_text(req, "gradedBy"),
        remarks: optional_text(req, "remarks"),
    };

    with_engine(state, req, |engine| {
        let grade = engine.assign_or_update_grade(&assign)?;
        Ok(json!({ "grade": grade }))
    })
}

fn handle_grades_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(grade_id) = str_param(req, "gradeId") {
        return with_engine(state, req, |engine| {
            Ok(json!({ "grade": engine.grade_by_id(grade_id)? }))
        });
    }
    let (Some(student_id), Some(course_id)) =
        (str_param(req, "studentId"), str_param(req, "courseId"))
    else {
        return err(
            &req.id,
            "bad_params",
            "expected gradeId or studentId with courseId",
            None,
        );
    };
    with_engine(state, req, |engine| {
        let grade = engine
            .grade_for(student_id, course_id)?
            .ok_or_else(|| EngineError::NotFound {
                entity: "grade",
                id: format!("{}/{}", student_id, course_id),
            })?;
        Ok(json!({ "grade": grade }))
    })
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    match (str_param(req, "courseId"), str_param(req, "studentId")) {
        (Some(course_id), None) => with_engine(state, req, |engine| {
            Ok(json!({ "grades": engine.course_grades(course_id)? }))
        }),
        (None, Some(student_id)) => {
            let finalized_only = req
                .params
                .get("finalizedOnly")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            with_engine(state, req, |engine| {
                Ok(json!({ "grades": engine.student_grades(student_id, finalized_only)? }))
            })
        }
        _ => err(
            &req.id,
            "bad_params",
            "expected exactly one of courseId or studentId",
            None,
        ),
    }
}

fn handle_grades_finalize(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(grade_id) = str_param(req, "gradeId") else {
        return missing(req, "gradeId");
    };
    with_engine(state, req, |engine| {
        Ok(json!({ "grade": engine.finalize_grade(grade_id)? }))
    })
}

fn handle_grades_bulk_finalize(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(course_id) = str_param(req, "courseId") else {
        return missing(req, "courseId");
    };
    with_engine(state, req, |engine| {
        Ok(json!({ "count": engine.bulk_finalize(course_id)? }))
    })
}

fn handle_gpa_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(student_id) = str_param(req, "studentId") else {
        return missing(req, "studentId");
    };
    let semester_id = str_param(req, "semesterId");
    with_engine(state, req, |engine| {
        let summary = engine.compute_gpa(student_id, semester_id)?;
        Ok(json!({
            "studentId": student_id,
            "semesterId": semester_id,
            "gpa": summary.gpa,
            "totalCredits": summary.total_credits,
            "totalQualityPoints": summary.total_quality_points
        }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.assign" => Some(handle_grades_assign(state, req)),
        "grades.get" => Some(handle_grades_get(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.finalize" => Some(handle_grades_finalize(state, req)),
        "grades.bulkFinalize" => Some(handle_grades_bulk_finalize(state, req)),
        "gpa.compute" => Some(handle_gpa_compute(state, req)),
        _ => None,
    }
}
