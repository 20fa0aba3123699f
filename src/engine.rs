//! Persistence-backed grade lifecycle: assign, finalize, GPA aggregation.
//!
//! All operations run against a single workspace connection. Finalization touches three
//! tables (grades, enrollments, students); how those writes are grouped is controlled by
//! [`FinalizeMode`].

use crate::calc::{
    self, AttendanceTally, CalcError, ComponentScores, GpaSummary, GradingPolicy, LetterGrade,
    ScorePair, WeightedComponents,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Calc(#[from] CalcError),
    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("grade {grade_id} is finalized and can no longer be changed")]
    GradeFinalized { grade_id: String },
    #[error("grade {grade_id} is already finalized")]
    GradeAlreadyFinalized { grade_id: String },
    #[error("finalize of grade {grade_id} failed at step `{step}`: {message}")]
    FinalizeIncomplete {
        grade_id: String,
        step: &'static str,
        message: String,
    },
    #[error("bulk finalize stopped after {finalized} grade(s): {source}")]
    BulkFinalizeInterrupted {
        finalized: usize,
        #[source]
        source: Box<EngineError>,
    },
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("database write failed: {0}")]
    DbWrite(#[source] rusqlite::Error),
}

impl EngineError {
    fn not_found(entity: &'static str, id: &str) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Calc(e) => e.code(),
            Self::NotFound { .. } => "not_found",
            Self::GradeFinalized { .. } => "grade_finalized",
            Self::GradeAlreadyFinalized { .. } => "grade_already_finalized",
            Self::FinalizeIncomplete { .. } => "finalize_incomplete",
            Self::BulkFinalizeInterrupted { .. } => "bulk_finalize_interrupted",
            Self::Db(_) => "db_query_failed",
            Self::DbWrite(_) => "db_update_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            Self::GradeFinalized { grade_id } | Self::GradeAlreadyFinalized { grade_id } => {
                Some(json!({ "gradeId": grade_id }))
            }
            Self::FinalizeIncomplete { grade_id, step, .. } => {
                Some(json!({ "gradeId": grade_id, "step": step }))
            }
            Self::BulkFinalizeInterrupted { finalized, source } => Some(json!({
                "finalized": finalized,
                "cause": { "code": source.code(), "message": source.to_string() }
            })),
            Self::Calc(_) | Self::Db(_) | Self::DbWrite(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeStatus {
    Pending,
    Graded,
    Finalized,
    Appealed,
}

impl GradeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Graded => "graded",
            Self::Finalized => "finalized",
            Self::Appealed => "appealed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "graded" => Some(Self::Graded),
            "finalized" => Some(Self::Finalized),
            "appealed" => Some(Self::Appealed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Enrolled,
    Graded,
    Completed,
    Failed,
}

impl EnrollmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enrolled => "enrolled",
            Self::Graded => "graded",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "enrolled" => Some(Self::Enrolled),
            "graded" => Some(Self::Graded),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// How the Grade, Enrollment and Student writes of a finalize are grouped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FinalizeMode {
    /// One SQLite transaction; any failure rolls all three writes back.
    #[default]
    Transaction,
    /// Independent writes; a failed later step compensates the earlier ones in reverse order.
    Saga,
}

impl FinalizeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Saga => "saga",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transaction" => Some(Self::Transaction),
            "saga" => Some(Self::Saga),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    pub finalize_mode: FinalizeMode,
    pub reject_malformed_scores: bool,
    pub exclude_non_gpa_letters: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    pub id: String,
    pub student_id: String,
    pub course_id: String,
    pub enrollment_id: String,
    pub semester_id: String,
    pub course_name: String,
    pub subject_code: String,
    pub semester_year: i64,
    pub semester_term: i64,
    pub component_scores: Option<WeightedComponents>,
    pub total_percentage: Option<i64>,
    pub letter_grade: LetterGrade,
    pub grade_points: f64,
    pub credits: f64,
    pub quality_points: f64,
    pub status: GradeStatus,
    pub graded_by: Option<String>,
    pub graded_at: Option<String>,
    pub finalized_at: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradeInput {
    /// Compute from the enrollment's recorded component scores and the course policy.
    FromComponents,
    /// Teacher-entered letter, optionally with the percentage it came from.
    Direct {
        letter: LetterGrade,
        total_percentage: Option<i64>,
    },
}

#[derive(Debug, Clone)]
pub struct AssignGrade<'r> {
    pub student_id: &'r str,
    pub course_id: &'r str,
    pub input: GradeInput,
    pub graded_by: Option<String>,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterTranscript {
    pub semester_id: String,
    pub year: i64,
    pub term: i64,
    pub name: String,
    pub grades: Vec<GradeRecord>,
    pub gpa: GpaSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub semesters: Vec<SemesterTranscript>,
    pub cumulative: GpaSummary,
}

const GRADE_SELECT: &str = "SELECT
       g.id, g.student_id, g.course_id, g.enrollment_id, c.semester_id,
       g.assignments_score, g.midterm_score, g.final_score, g.attendance_score,
       g.participation_score, g.total_percentage, g.letter_grade, g.grade_points,
       g.credits, g.quality_points, g.status, g.graded_by, g.graded_at,
       g.finalized_at, g.remarks, c.name, sub.code, sem.year, sem.term
     FROM grades g
     JOIN courses c ON c.id = g.course_id
     JOIN subjects sub ON sub.id = c.subject_id
     JOIN semesters sem ON sem.id = c.semester_id";

fn parse_text_column<T>(
    idx: usize,
    raw: String,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value: {}", raw).into(),
        )
    })
}

fn grade_from_row(r: &Row<'_>) -> rusqlite::Result<GradeRecord> {
    let component_scores = match r.get::<_, Option<f64>>(5)? {
        None => None,
        Some(assignments) => Some(WeightedComponents {
            assignments,
            midterm: r.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
            final_exam: r.get::<_, Option<f64>>(7)?.unwrap_or(0.0),
            attendance: r.get::<_, Option<f64>>(8)?.unwrap_or(0.0),
            participation: r.get::<_, Option<f64>>(9)?.unwrap_or(0.0),
        }),
    };
    Ok(GradeRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        course_id: r.get(2)?,
        enrollment_id: r.get(3)?,
        semester_id: r.get(4)?,
        component_scores,
        total_percentage: r.get(10)?,
        letter_grade: parse_text_column(11, r.get(11)?, LetterGrade::parse)?,
        grade_points: r.get(12)?,
        credits: r.get(13)?,
        quality_points: r.get(14)?,
        status: parse_text_column(15, r.get(15)?, GradeStatus::parse)?,
        graded_by: r.get(16)?,
        graded_at: r.get(17)?,
        finalized_at: r.get(18)?,
        remarks: r.get(19)?,
        course_name: r.get(20)?,
        subject_code: r.get(21)?,
        semester_year: r.get(22)?,
        semester_term: r.get(23)?,
    })
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn require_row(
    conn: &Connection,
    sql: &str,
    id: &str,
    entity: &'static str,
) -> Result<(), EngineError> {
    let found: Option<i64> = conn.query_row(sql, [id], |r| r.get(0)).optional()?;
    found
        .map(|_| ())
        .ok_or_else(|| EngineError::not_found(entity, id))
}

pub fn load_component_scores(
    conn: &Connection,
    enrollment_id: &str,
) -> Result<ComponentScores, EngineError> {
    let scores = conn
        .query_row(
            "SELECT midterm_score, midterm_max, final_score, final_max,
                    participation_score, participation_max,
                    attendance_present, attendance_total
             FROM enrollments
             WHERE id = ?",
            [enrollment_id],
            |r| {
                Ok(ComponentScores {
                    assignments: Vec::new(),
                    midterm: ScorePair {
                        score: r.get(0)?,
                        max_score: r.get(1)?,
                    },
                    final_exam: ScorePair {
                        score: r.get(2)?,
                        max_score: r.get(3)?,
                    },
                    participation: ScorePair {
                        score: r.get(4)?,
                        max_score: r.get(5)?,
                    },
                    attendance: AttendanceTally {
                        present: r.get(6)?,
                        total: r.get(7)?,
                    },
                })
            },
        )
        .optional()?;
    let Some(mut scores) = scores else {
        return Err(EngineError::not_found("enrollment", enrollment_id));
    };

    let mut stmt = conn.prepare(
        "SELECT score, max_score
         FROM enrollment_assignments
         WHERE enrollment_id = ?
         ORDER BY position",
    )?;
    scores.assignments = stmt
        .query_map([enrollment_id], |r| {
            Ok(ScorePair {
                score: r.get(0)?,
                max_score: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(scores)
}

/// Replaces every recorded component of an enrollment, assignment list included.
pub fn save_component_scores(
    conn: &Connection,
    enrollment_id: &str,
    scores: &ComponentScores,
) -> Result<(), EngineError> {
    let tx = conn.unchecked_transaction()?;
    let changed = tx
        .execute(
            "UPDATE enrollments
             SET midterm_score = ?, midterm_max = ?, final_score = ?, final_max = ?,
                 participation_score = ?, participation_max = ?,
                 attendance_present = ?, attendance_total = ?
             WHERE id = ?",
            params![
                scores.midterm.score,
                scores.midterm.max_score,
                scores.final_exam.score,
                scores.final_exam.max_score,
                scores.participation.score,
                scores.participation.max_score,
                scores.attendance.present,
                scores.attendance.total,
                enrollment_id,
            ],
        )
        .map_err(EngineError::DbWrite)?;
    if changed == 0 {
        return Err(EngineError::not_found("enrollment", enrollment_id));
    }

    tx.execute(
        "DELETE FROM enrollment_assignments WHERE enrollment_id = ?",
        [enrollment_id],
    )
    .map_err(EngineError::DbWrite)?;
    for (position, a) in scores.assignments.iter().enumerate() {
        tx.execute(
            "INSERT INTO enrollment_assignments(id, enrollment_id, position, score, max_score)
             VALUES(?, ?, ?, ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                enrollment_id,
                position as i64,
                a.score,
                a.max_score,
            ],
        )
        .map_err(EngineError::DbWrite)?;
    }
    tx.commit().map_err(EngineError::DbWrite)?;
    Ok(())
}

struct CourseGrading {
    policy: GradingPolicy,
    credits: f64,
}

fn course_grading(conn: &Connection, course_id: &str) -> Result<CourseGrading, EngineError> {
    let row = conn
        .query_row(
            "SELECT c.weight_assignments, c.weight_midterm, c.weight_final,
                    c.weight_attendance, c.weight_participation, s.credits
             FROM courses c
             JOIN subjects s ON s.id = c.subject_id
             WHERE c.id = ?",
            [course_id],
            |r| {
                Ok(CourseGrading {
                    policy: GradingPolicy {
                        assignments: r.get(0)?,
                        midterm: r.get(1)?,
                        final_exam: r.get(2)?,
                        attendance: r.get(3)?,
                        participation: r.get(4)?,
                    },
                    credits: r.get(5)?,
                })
            },
        )
        .optional()?;
    row.ok_or_else(|| EngineError::not_found("course", course_id))
}

fn gpa_for(
    conn: &Connection,
    options: &EngineOptions,
    student_id: &str,
    semester_id: Option<&str>,
) -> Result<GpaSummary, EngineError> {
    let mut stmt = conn.prepare(
        "SELECT g.credits, g.quality_points, g.letter_grade
         FROM grades g
         JOIN courses c ON c.id = g.course_id
         WHERE g.student_id = ?1
           AND g.status = 'finalized'
           AND (?2 IS NULL OR c.semester_id = ?2)",
    )?;
    let rows = stmt
        .query_map(params![student_id, semester_id], |r| {
            Ok((
                r.get::<_, f64>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let exclude = options.exclude_non_gpa_letters;
    Ok(calc::aggregate_gpa(
        rows.into_iter()
            .filter(|(_, _, letter)| {
                !exclude
                    || LetterGrade::parse(letter)
                        .map(|g| g.counts_toward_gpa())
                        .unwrap_or(true)
            })
            .map(|(credits, quality_points, _)| (credits, quality_points)),
    ))
}

fn persist_student_gpa(
    conn: &Connection,
    options: &EngineOptions,
    student_id: &str,
) -> Result<GpaSummary, EngineError> {
    let summary = gpa_for(conn, options, student_id, None)?;
    let changed = conn
        .execute(
            "UPDATE students SET cgpa = ?, total_credits = ? WHERE id = ?",
            params![summary.gpa, summary.total_credits, student_id],
        )
        .map_err(EngineError::DbWrite)?;
    if changed == 0 {
        return Err(EngineError::not_found("student", student_id));
    }
    Ok(summary)
}

/// Compare-and-set: only a non-finalized row flips, so a concurrent second finalize loses.
fn mark_finalized(conn: &Connection, grade_id: &str, now: &str) -> Result<(), EngineError> {
    let changed = conn
        .execute(
            "UPDATE grades SET status = 'finalized', finalized_at = ?
             WHERE id = ? AND status != 'finalized'",
            (now, grade_id),
        )
        .map_err(EngineError::DbWrite)?;
    if changed == 0 {
        return Err(EngineError::GradeAlreadyFinalized {
            grade_id: grade_id.to_string(),
        });
    }
    Ok(())
}

fn set_enrollment_status(
    conn: &Connection,
    enrollment_id: &str,
    status: EnrollmentStatus,
) -> Result<(), EngineError> {
    let changed = conn
        .execute(
            "UPDATE enrollments SET status = ? WHERE id = ?",
            (status.as_str(), enrollment_id),
        )
        .map_err(EngineError::DbWrite)?;
    if changed == 0 {
        return Err(EngineError::not_found("enrollment", enrollment_id));
    }
    Ok(())
}

pub struct GradeEngine<'a> {
    conn: &'a Connection,
    options: EngineOptions,
}

impl<'a> GradeEngine<'a> {
    pub fn new(conn: &'a Connection, options: EngineOptions) -> Self {
        Self { conn, options }
    }

    pub fn grade_by_id(&self, grade_id: &str) -> Result<GradeRecord, EngineError> {
        let sql = format!("{} WHERE g.id = ?", GRADE_SELECT);
        self.conn
            .query_row(&sql, [grade_id], grade_from_row)
            .optional()?
            .ok_or_else(|| EngineError::not_found("grade", grade_id))
    }

    pub fn grade_for(
        &self,
        student_id: &str,
        course_id: &str,
    ) -> Result<Option<GradeRecord>, EngineError> {
        let sql = format!("{} WHERE g.student_id = ? AND g.course_id = ?", GRADE_SELECT);
        Ok(self
            .conn
            .query_row(&sql, (student_id, course_id), grade_from_row)
            .optional()?)
    }

    pub fn course_grades(&self, course_id: &str) -> Result<Vec<GradeRecord>, EngineError> {
        require_row(
            self.conn,
            "SELECT 1 FROM courses WHERE id = ?",
            course_id,
            "course",
        )?;
        let sql = format!("{} WHERE g.course_id = ? ORDER BY g.rowid", GRADE_SELECT);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([course_id], grade_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Grades in (semester year, semester term, subject code) order.
    pub fn student_grades(
        &self,
        student_id: &str,
        finalized_only: bool,
    ) -> Result<Vec<GradeRecord>, EngineError> {
        self.require_student(student_id)?;
        let sql = format!(
            "{} WHERE g.student_id = ?1 AND (?2 = 0 OR g.status = 'finalized')
             ORDER BY sem.year, sem.term, sub.code, g.id",
            GRADE_SELECT
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![student_id, finalized_only], grade_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn require_student(&self, student_id: &str) -> Result<(), EngineError> {
        require_row(
            self.conn,
            "SELECT 1 FROM students WHERE id = ?",
            student_id,
            "student",
        )
    }

    pub fn assign_or_update_grade(&self, req: &AssignGrade<'_>) -> Result<GradeRecord, EngineError> {
        let course = course_grading(self.conn, req.course_id)?;
        self.require_student(req.student_id)?;

        let enrollment_id: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM enrollments WHERE student_id = ? AND course_id = ?",
                (req.student_id, req.course_id),
                |r| r.get(0),
            )
            .optional()?;
        let Some(enrollment_id) = enrollment_id else {
            return Err(EngineError::not_found(
                "enrollment",
                &format!("{}/{}", req.student_id, req.course_id),
            ));
        };

        let existing = self.grade_for(req.student_id, req.course_id)?;
        if let Some(g) = &existing {
            if g.status == GradeStatus::Finalized {
                return Err(EngineError::GradeFinalized {
                    grade_id: g.id.clone(),
                });
            }
        }

        let (weighted, total_percentage, letter) = match req.input {
            GradeInput::FromComponents => {
                let raw = load_component_scores(self.conn, &enrollment_id)?;
                if self.options.reject_malformed_scores {
                    calc::validate_component_scores(&raw)?;
                }
                let weighted = calc::compute_component_scores(&raw, &course.policy);
                let pct = calc::total_percentage(&weighted);
                (Some(weighted), Some(pct), calc::letter_grade_of(pct))
            }
            GradeInput::Direct {
                letter,
                total_percentage,
            } => (None, total_percentage, letter),
        };
        let grade_points = letter.grade_points();
        let quality_points = grade_points * course.credits;

        if let Some(g) = &existing {
            let unchanged = g.status == GradeStatus::Graded
                && g.enrollment_id == enrollment_id
                && g.component_scores == weighted
                && g.total_percentage == total_percentage
                && g.letter_grade == letter
                && g.credits == course.credits
                && g.graded_by == req.graded_by
                && g.remarks == req.remarks;
            if unchanged {
                tracing::debug!(grade_id = %g.id, "grade inputs unchanged, skipping write");
                return Ok(g.clone());
            }
        }

        let tx = self.conn.unchecked_transaction()?;
        // The WHERE on the conflict branch keeps a finalized row untouched even if it was
        // finalized after the check above.
        let changed = tx.execute(
            "INSERT INTO grades(
                id, student_id, course_id, enrollment_id,
                assignments_score, midterm_score, final_score, attendance_score,
                participation_score, total_percentage, letter_grade, grade_points,
                credits, quality_points, status, graded_by, graded_at, finalized_at, remarks
             ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                      'graded', ?15, ?16, NULL, ?17)
             ON CONFLICT(student_id, course_id) DO UPDATE SET
                enrollment_id = excluded.enrollment_id,
                assignments_score = excluded.assignments_score,
                midterm_score = excluded.midterm_score,
                final_score = excluded.final_score,
                attendance_score = excluded.attendance_score,
                participation_score = excluded.participation_score,
                total_percentage = excluded.total_percentage,
                letter_grade = excluded.letter_grade,
                grade_points = excluded.grade_points,
                credits = excluded.credits,
                quality_points = excluded.quality_points,
                status = 'graded',
                graded_by = excluded.graded_by,
                graded_at = excluded.graded_at,
                remarks = excluded.remarks
             WHERE grades.status != 'finalized'",
            params![
                Uuid::new_v4().to_string(),
                req.student_id,
                req.course_id,
                enrollment_id,
                weighted.map(|w| w.assignments),
                weighted.map(|w| w.midterm),
                weighted.map(|w| w.final_exam),
                weighted.map(|w| w.attendance),
                weighted.map(|w| w.participation),
                total_percentage,
                letter.as_str(),
                grade_points,
                course.credits,
                quality_points,
                req.graded_by,
                now_rfc3339(),
                req.remarks,
            ],
        )
        .map_err(EngineError::DbWrite)?;
        if changed == 0 {
            return Err(EngineError::GradeFinalized {
                grade_id: existing.map(|g| g.id).unwrap_or_default(),
            });
        }
        set_enrollment_status(&tx, &enrollment_id, EnrollmentStatus::Graded)?;
        tx.commit().map_err(EngineError::DbWrite)?;

        let grade = self
            .grade_for(req.student_id, req.course_id)?
            .ok_or_else(|| EngineError::not_found("grade", &enrollment_id))?;
        tracing::debug!(
            grade_id = %grade.id,
            letter = letter.as_str(),
            total_percentage = ?total_percentage,
            "grade assigned"
        );
        Ok(grade)
    }

    pub fn finalize_grade(&self, grade_id: &str) -> Result<GradeRecord, EngineError> {
        let grade = self.grade_by_id(grade_id)?;
        if grade.status == GradeStatus::Finalized {
            return Err(EngineError::GradeAlreadyFinalized {
                grade_id: grade.id.clone(),
            });
        }
        let outcome = if grade.letter_grade.is_failing() {
            EnrollmentStatus::Failed
        } else {
            EnrollmentStatus::Completed
        };

        let summary = match self.options.finalize_mode {
            FinalizeMode::Transaction => self.finalize_in_transaction(&grade, outcome)?,
            FinalizeMode::Saga => self.finalize_as_saga(&grade, outcome)?,
        };
        tracing::info!(
            grade_id = %grade.id,
            student_id = %grade.student_id,
            enrollment_status = outcome.as_str(),
            cgpa = summary.gpa,
            "grade finalized"
        );
        self.grade_by_id(grade_id)
    }

    fn finalize_in_transaction(
        &self,
        grade: &GradeRecord,
        outcome: EnrollmentStatus,
    ) -> Result<GpaSummary, EngineError> {
        let tx = self.conn.unchecked_transaction()?;
        mark_finalized(&tx, &grade.id, &now_rfc3339())?;
        set_enrollment_status(&tx, &grade.enrollment_id, outcome)?;
        let summary = persist_student_gpa(&tx, &self.options, &grade.student_id)?;
        tx.commit().map_err(EngineError::DbWrite)?;
        Ok(summary)
    }

    fn finalize_as_saga(
        &self,
        grade: &GradeRecord,
        outcome: EnrollmentStatus,
    ) -> Result<GpaSummary, EngineError> {
        let prior_enrollment: String = self.conn.query_row(
            "SELECT status FROM enrollments WHERE id = ?",
            [&grade.enrollment_id],
            |r| r.get(0),
        )?;

        mark_finalized(self.conn, &grade.id, &now_rfc3339())?;

        if let Err(e) = set_enrollment_status(self.conn, &grade.enrollment_id, outcome) {
            return Err(self.compensate_finalize(grade, None, "enrollment", e));
        }

        match persist_student_gpa(self.conn, &self.options, &grade.student_id) {
            Ok(summary) => Ok(summary),
            Err(e) => Err(self.compensate_finalize(
                grade,
                Some(prior_enrollment.as_str()),
                "student_gpa",
                e,
            )),
        }
    }

    /// Undo the completed finalize steps in reverse order. Returns the error to surface.
    fn compensate_finalize(
        &self,
        grade: &GradeRecord,
        prior_enrollment: Option<&str>,
        step: &'static str,
        cause: EngineError,
    ) -> EngineError {
        tracing::warn!(grade_id = %grade.id, step, error = %cause, "finalize step failed, compensating");

        let mut failures: Vec<String> = Vec::new();
        if let Some(prev) = prior_enrollment {
            if let Err(e) = self.conn.execute(
                "UPDATE enrollments SET status = ? WHERE id = ?",
                (prev, &grade.enrollment_id),
            ) {
                failures.push(format!("enrollment: {}", e));
            }
        }
        if let Err(e) = self.conn.execute(
            "UPDATE grades SET status = ?, finalized_at = NULL WHERE id = ?",
            (grade.status.as_str(), &grade.id),
        ) {
            failures.push(format!("grade: {}", e));
        }

        if failures.is_empty() {
            return cause;
        }
        tracing::error!(
            grade_id = %grade.id,
            step,
            failures = ?failures,
            "finalize compensation failed, records left partially updated"
        );
        EngineError::FinalizeIncomplete {
            grade_id: grade.id.clone(),
            step,
            message: format!("{}; compensation failed: {}", cause, failures.join("; ")),
        }
    }

    pub fn compute_gpa(
        &self,
        student_id: &str,
        semester_id: Option<&str>,
    ) -> Result<GpaSummary, EngineError> {
        self.require_student(student_id)?;
        if let Some(sem) = semester_id {
            require_row(
                self.conn,
                "SELECT 1 FROM semesters WHERE id = ?",
                sem,
                "semester",
            )?;
        }
        gpa_for(self.conn, &self.options, student_id, semester_id)
    }

    /// Finalizes every `graded` row of a course, one at a time. Rows finalized before a
    /// failure stay finalized.
    pub fn bulk_finalize(&self, course_id: &str) -> Result<usize, EngineError> {
        require_row(
            self.conn,
            "SELECT 1 FROM courses WHERE id = ?",
            course_id,
            "course",
        )?;
        let mut stmt = self.conn.prepare(
            "SELECT id FROM grades WHERE course_id = ? AND status = 'graded' ORDER BY rowid",
        )?;
        let ids = stmt
            .query_map([course_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut finalized = 0_usize;
        for id in ids {
            if let Err(e) = self.finalize_grade(&id) {
                tracing::warn!(course_id, grade_id = %id, finalized, error = %e, "bulk finalize interrupted");
                return Err(EngineError::BulkFinalizeInterrupted {
                    finalized,
                    source: Box::new(e),
                });
            }
            finalized += 1;
        }
        tracing::info!(course_id, finalized, "bulk finalize complete");
        Ok(finalized)
    }

    pub fn transcript(
        &self,
        student_id: &str,
        include_unfinalized: bool,
    ) -> Result<Transcript, EngineError> {
        let grades = self.student_grades(student_id, !include_unfinalized)?;

        let mut semesters: Vec<SemesterTranscript> = Vec::new();
        for g in grades {
            let starts_semester = semesters
                .last()
                .map(|s| s.semester_id != g.semester_id)
                .unwrap_or(true);
            if starts_semester {
                let name: String = self.conn.query_row(
                    "SELECT name FROM semesters WHERE id = ?",
                    [&g.semester_id],
                    |r| r.get(0),
                )?;
                let gpa = gpa_for(self.conn, &self.options, student_id, Some(&g.semester_id))?;
                semesters.push(SemesterTranscript {
                    semester_id: g.semester_id.clone(),
                    year: g.semester_year,
                    term: g.semester_term,
                    name,
                    grades: Vec::new(),
                    gpa,
                });
            }
            if let Some(current) = semesters.last_mut() {
                current.grades.push(g);
            }
        }

        let cumulative = gpa_for(self.conn, &self.options, student_id, None)?;
        Ok(Transcript {
            semesters,
            cumulative,
        })
    }
}
