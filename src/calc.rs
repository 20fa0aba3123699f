use serde::{Deserialize, Serialize};

const POLICY_TOTAL: f64 = 100.0;
const POLICY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalcError {
    #[error("grading policy weights must sum to 100 (got {sum})")]
    PolicyInvalid { sum: f64 },
    #[error("grading policy weight `{field}` must be a finite, non-negative number")]
    WeightInvalid { field: &'static str },
    #[error("malformed component scores: {0}")]
    ScoresInvalid(String),
}

impl CalcError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PolicyInvalid { .. } | Self::WeightInvalid { .. } => "policy_invalid",
            Self::ScoresInvalid(_) => "scores_invalid",
        }
    }
}

/// Percentage weights a course assigns to each grading component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GradingPolicy {
    pub assignments: f64,
    pub midterm: f64,
    #[serde(rename = "final")]
    pub final_exam: f64,
    pub attendance: f64,
    pub participation: f64,
}

impl GradingPolicy {
    fn fields(&self) -> [(&'static str, f64); 5] {
        [
            ("assignments", self.assignments),
            ("midterm", self.midterm),
            ("final", self.final_exam),
            ("attendance", self.attendance),
            ("participation", self.participation),
        ]
    }

    pub fn validate(&self) -> Result<(), CalcError> {
        let mut sum = 0.0_f64;
        for (field, weight) in self.fields() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(CalcError::WeightInvalid { field });
            }
            sum += weight;
        }
        if (sum - POLICY_TOTAL).abs() > POLICY_EPSILON {
            return Err(CalcError::PolicyInvalid { sum });
        }
        Ok(())
    }
}

/// A raw `score` out of `maxScore`. Either side stays null until a teacher records it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScorePair {
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub max_score: Option<f64>,
}

impl ScorePair {
    #[cfg(test)]
    pub fn new(score: f64, max_score: f64) -> Self {
        Self {
            score: Some(score),
            max_score: Some(max_score),
        }
    }

    fn is_recorded(&self) -> bool {
        self.score.is_some()
    }

    /// 0-100 scale; a missing score or a non-positive max degrades to 0.
    fn percent(&self) -> f64 {
        match (self.score, self.max_score) {
            (Some(score), Some(max)) if max > 0.0 => score / max * 100.0,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AttendanceTally {
    #[serde(default)]
    pub present: Option<i64>,
    #[serde(default)]
    pub total: Option<i64>,
}

impl AttendanceTally {
    fn percent(&self) -> f64 {
        let total = self.total.unwrap_or(0);
        if total <= 0 {
            return 0.0;
        }
        self.present.unwrap_or(0) as f64 / total as f64 * 100.0
    }
}

/// Per-enrollment raw inputs recorded by a teacher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ComponentScores {
    #[serde(default)]
    pub assignments: Vec<ScorePair>,
    #[serde(default)]
    pub midterm: ScorePair,
    #[serde(default, rename = "final")]
    pub final_exam: ScorePair,
    #[serde(default)]
    pub participation: ScorePair,
    #[serde(default)]
    pub attendance: AttendanceTally,
}

/// Weighted contribution of each component, on the 0-100 scale of the final percentage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedComponents {
    pub assignments: f64,
    pub midterm: f64,
    #[serde(rename = "final")]
    pub final_exam: f64,
    pub attendance: f64,
    pub participation: f64,
}

impl WeightedComponents {
    pub fn sum(&self) -> f64 {
        self.assignments + self.midterm + self.final_exam + self.attendance + self.participation
    }
}

/// Rejects inputs that would otherwise divide by zero or go negative.
/// Scores above their max are allowed through (extra credit).
pub fn validate_component_scores(raw: &ComponentScores) -> Result<(), CalcError> {
    fn check_pair(label: &str, pair: &ScorePair) -> Result<(), CalcError> {
        let Some(score) = pair.score else {
            return Ok(());
        };
        if !score.is_finite() || score < 0.0 {
            return Err(CalcError::ScoresInvalid(format!(
                "{} score must be a non-negative number",
                label
            )));
        }
        match pair.max_score {
            Some(max) if max.is_finite() && max > 0.0 => Ok(()),
            _ => Err(CalcError::ScoresInvalid(format!(
                "{} maxScore must be > 0 when a score is recorded",
                label
            ))),
        }
    }

    for (i, pair) in raw.assignments.iter().enumerate() {
        check_pair(&format!("assignments[{}]", i), pair)?;
    }
    check_pair("midterm", &raw.midterm)?;
    check_pair("final", &raw.final_exam)?;
    check_pair("participation", &raw.participation)?;

    let att = &raw.attendance;
    if att.present.is_some() || att.total.is_some() {
        let present = att.present.unwrap_or(0);
        let total = att.total.unwrap_or(0);
        if total <= 0 {
            return Err(CalcError::ScoresInvalid(
                "attendance total must be > 0 once attendance is recorded".to_string(),
            ));
        }
        if present < 0 || present > total {
            return Err(CalcError::ScoresInvalid(
                "attendance present must be within 0..=total".to_string(),
            ));
        }
    }
    Ok(())
}

pub fn compute_component_scores(raw: &ComponentScores, policy: &GradingPolicy) -> WeightedComponents {
    let recorded: Vec<f64> = raw
        .assignments
        .iter()
        .filter(|a| a.is_recorded())
        .map(|a| a.percent())
        .collect();
    let assignments_avg = if recorded.is_empty() {
        0.0
    } else {
        recorded.iter().sum::<f64>() / (recorded.len() as f64)
    };

    WeightedComponents {
        assignments: assignments_avg * policy.assignments / 100.0,
        midterm: raw.midterm.percent() * policy.midterm / 100.0,
        final_exam: raw.final_exam.percent() * policy.final_exam / 100.0,
        attendance: raw.attendance.percent() * policy.attendance / 100.0,
        participation: raw.participation.percent() * policy.participation / 100.0,
    }
}

/// Half-up to the nearest integer. No clamping: out-of-range inputs propagate.
pub fn total_percentage(weighted: &WeightedComponents) -> i64 {
    round_half_up(weighted.sum()) as i64
}

/// Drops binary noise below 1e-9 so a decimal .5 stored as .4999.. still rounds up.
fn snap(x: f64) -> f64 {
    (x * 1e9).round() / 1e9
}

pub fn round_half_up(x: f64) -> f64 {
    (snap(x) + 0.5).floor()
}

/// `Int(100*x + 0.5) / 100`
pub fn round_off_2_decimal(x: f64) -> f64 {
    (snap(100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LetterGrade {
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "B+")]
    BPlus,
    B,
    #[serde(rename = "B-")]
    BMinus,
    #[serde(rename = "C+")]
    CPlus,
    C,
    #[serde(rename = "C-")]
    CMinus,
    #[serde(rename = "D+")]
    DPlus,
    D,
    #[serde(rename = "D-")]
    DMinus,
    F,
    W,
    I,
    P,
    NP,
}

const LETTER_BREAKPOINTS: [(i64, LetterGrade); 12] = [
    (97, LetterGrade::APlus),
    (93, LetterGrade::A),
    (90, LetterGrade::AMinus),
    (87, LetterGrade::BPlus),
    (83, LetterGrade::B),
    (80, LetterGrade::BMinus),
    (77, LetterGrade::CPlus),
    (73, LetterGrade::C),
    (70, LetterGrade::CMinus),
    (67, LetterGrade::DPlus),
    (63, LetterGrade::D),
    (60, LetterGrade::DMinus),
];

impl LetterGrade {
    pub const ALL: [LetterGrade; 17] = [
        Self::APlus,
        Self::A,
        Self::AMinus,
        Self::BPlus,
        Self::B,
        Self::BMinus,
        Self::CPlus,
        Self::C,
        Self::CMinus,
        Self::DPlus,
        Self::D,
        Self::DMinus,
        Self::F,
        Self::W,
        Self::I,
        Self::P,
        Self::NP,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::APlus => "A+",
            Self::A => "A",
            Self::AMinus => "A-",
            Self::BPlus => "B+",
            Self::B => "B",
            Self::BMinus => "B-",
            Self::CPlus => "C+",
            Self::C => "C",
            Self::CMinus => "C-",
            Self::DPlus => "D+",
            Self::D => "D",
            Self::DMinus => "D-",
            Self::F => "F",
            Self::W => "W",
            Self::I => "I",
            Self::P => "P",
            Self::NP => "NP",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let t = s.trim().to_ascii_uppercase();
        Self::ALL.iter().copied().find(|g| g.as_str() == t)
    }

    pub fn grade_points(self) -> f64 {
        match self {
            Self::APlus | Self::A => 4.0,
            Self::AMinus => 3.7,
            Self::BPlus => 3.3,
            Self::B => 3.0,
            Self::BMinus => 2.7,
            Self::CPlus => 2.3,
            Self::C => 2.0,
            Self::CMinus => 1.7,
            Self::DPlus => 1.3,
            Self::D => 1.0,
            Self::DMinus => 0.7,
            Self::F | Self::W | Self::I | Self::P | Self::NP => 0.0,
        }
    }

    /// W, I, P and NP carry no grade points of their own.
    pub fn counts_toward_gpa(self) -> bool {
        !matches!(self, Self::W | Self::I | Self::P | Self::NP)
    }

    pub fn is_failing(self) -> bool {
        self == Self::F
    }
}

/// Total over integer percentages; above 100 saturates at A+, below 0 at F.
pub fn letter_grade_of(percentage: i64) -> LetterGrade {
    LETTER_BREAKPOINTS
        .iter()
        .find(|(min, _)| percentage >= *min)
        .map(|(_, g)| *g)
        .unwrap_or(LetterGrade::F)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpaSummary {
    pub gpa: f64,
    pub total_credits: f64,
    pub total_quality_points: f64,
}

/// Credit-weighted average over `(credits, quality_points)` rows.
pub fn aggregate_gpa<I>(rows: I) -> GpaSummary
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut total_credits = 0.0_f64;
    let mut total_quality_points = 0.0_f64;
    for (credits, quality_points) in rows {
        total_credits += credits;
        total_quality_points += quality_points;
    }

    let gpa = if total_credits > 0.0 {
        round_off_2_decimal(total_quality_points / total_credits)
    } else {
        0.0
    };
    GpaSummary {
        gpa,
        total_credits,
        total_quality_points,
    }
}
