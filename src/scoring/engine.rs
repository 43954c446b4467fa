//! Weighted audit scoring.
//!
//! Scores are computed bottom-up:
//!
//! 1. Each answered, scorable question gets a score in `[0, 1]`.
//! 2. A section score is the weight-averaged score of its scored questions.
//! 3. The overall percentage is the weight-averaged score of the sections
//!    that have at least one scored question, times 100.
//!
//! `n/a` answers and text questions do not take part in any average.

use serde::{Deserialize, Serialize};

use super::response::{ResponseValue, Responses};
use super::template::{AuditTemplate, Question, QuestionKind};
use crate::error::ScoringError;

/// Final result of a scored audit run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    /// Nothing scorable was answered, or required answers are missing.
    Incomplete,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
            Outcome::Incomplete => "incomplete",
        }
    }
}

/// Grade band of the overall percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Excellent,
    Good,
    NeedsImprovement,
    Poor,
}

impl Grade {
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage >= 90.0 {
            Grade::Excellent
        } else if percentage >= 75.0 {
            Grade::Good
        } else if percentage >= 50.0 {
            Grade::NeedsImprovement
        } else {
            Grade::Poor
        }
    }
}

/// Severity of a finding raised by a question that lost marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    /// Raised by critical questions.
    Major,
    Minor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub question_id: String,
    pub section_id: String,
    pub severity: FindingSeverity,
    pub score: f64,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionScore {
    pub section_id: String,
    pub title: String,
    pub weight: f64,
    /// Weighted score in `[0, 1]`; `None` when nothing in the section was scored.
    pub score: Option<f64>,
    pub answered: usize,
    pub scored: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub template_id: String,
    pub template_version: u32,
    pub outcome: Outcome,
    /// Overall percentage rounded to two decimals.
    pub percentage: Option<f64>,
    pub grade: Option<Grade>,
    pub pass_threshold: f64,
    pub sections: Vec<SectionScore>,
    pub findings: Vec<Finding>,
    /// Required questions without an answer (lenient mode only).
    pub unanswered: Vec<String>,
    pub critical_failures: usize,
}

impl ScoreReport {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }
}

/// Scores audit runs against their template.
#[derive(Debug, Clone, Default)]
pub struct AuditScorer {
    strict: bool,
}

impl AuditScorer {
    /// Lenient scorer: missing required answers are reported, not rejected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Strict scorer: any missing required answer is an error.
    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Scores `responses` against `template`.
    ///
    /// # Errors
    ///
    /// - `InvalidTemplate` if the template fails validation
    /// - `UnknownQuestion` if a response names a question not in the template
    /// - `InvalidResponse` if an answer does not fit its question
    /// - `MissingResponse` in strict mode when required answers are missing
    pub fn score(
        &self,
        template: &AuditTemplate,
        responses: &Responses,
    ) -> Result<ScoreReport, ScoringError> {
        template.validate()?;

        if let Some(unknown) = responses
            .keys()
            .find(|id| template.find_question(id).is_none())
        {
            return Err(ScoringError::UnknownQuestion(unknown.clone()));
        }

        let unanswered: Vec<String> = template
            .questions()
            .filter(|(_, q)| q.required && !responses.contains_key(&q.id))
            .map(|(_, q)| q.id.clone())
            .collect();
        if self.strict && !unanswered.is_empty() {
            return Err(ScoringError::MissingResponse(unanswered));
        }

        let mut sections = Vec::with_capacity(template.sections.len());
        let mut findings = Vec::new();
        let mut critical_failures = 0;
        let mut weighted_total = 0.0;
        let mut weight_sum = 0.0;

        for section in &template.sections {
            let mut answered = 0;
            let mut scored = 0;
            let mut section_total = 0.0;
            let mut section_weight = 0.0;

            for question in &section.questions {
                let Some(answer) = responses.get(&question.id) else {
                    continue;
                };
                answered += 1;

                let Some(score) = question_score(question, answer)? else {
                    continue;
                };
                scored += 1;
                section_total += question.weight * score;
                section_weight += question.weight;

                if score < 1.0 {
                    if question.critical {
                        critical_failures += 1;
                    }
                    findings.push(Finding {
                        question_id: question.id.clone(),
                        section_id: section.id.clone(),
                        severity: if question.critical {
                            FindingSeverity::Major
                        } else {
                            FindingSeverity::Minor
                        },
                        score,
                        answer: answer.to_string(),
                    });
                }
            }

            let score = (section_weight > 0.0).then(|| section_total / section_weight);
            if let Some(score) = score {
                weighted_total += section.weight * score;
                weight_sum += section.weight;
            }

            sections.push(SectionScore {
                section_id: section.id.clone(),
                title: section.title.clone(),
                weight: section.weight,
                score,
                answered,
                scored,
            });
        }

        let raw_percentage = (weight_sum > 0.0).then(|| 100.0 * weighted_total / weight_sum);

        let outcome = match raw_percentage {
            _ if critical_failures > 0 => Outcome::Fail,
            None => Outcome::Incomplete,
            Some(_) if !unanswered.is_empty() => Outcome::Incomplete,
            Some(p) if p >= template.pass_threshold => Outcome::Pass,
            Some(_) => Outcome::Fail,
        };

        tracing::debug!(
            template_id = %template.id,
            outcome = ?outcome,
            percentage = ?raw_percentage,
            findings = findings.len(),
            "Scored audit run"
        );

        Ok(ScoreReport {
            template_id: template.id.clone(),
            template_version: template.version,
            outcome,
            percentage: raw_percentage.map(round2),
            grade: raw_percentage.map(Grade::from_percentage),
            pass_threshold: template.pass_threshold,
            sections,
            findings,
            unanswered,
            critical_failures,
        })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Normalized score of one answer, or `None` when the answer is not scored.
fn question_score(question: &Question, answer: &ResponseValue) -> Result<Option<f64>, ScoringError> {
    let invalid = |reason: String| ScoringError::InvalidResponse {
        question: question.id.clone(),
        reason,
    };

    if answer.is_not_applicable() {
        return Ok(None);
    }

    match (&question.kind, answer) {
        (QuestionKind::Text, _) => Ok(None),
        (QuestionKind::YesNo, ResponseValue::Yes) => Ok(Some(1.0)),
        (QuestionKind::YesNo, ResponseValue::No) => Ok(Some(0.0)),
        (QuestionKind::PassFail, ResponseValue::Pass) => Ok(Some(1.0)),
        (QuestionKind::PassFail, ResponseValue::Fail) => Ok(Some(0.0)),
        (QuestionKind::Scale { min, max }, ResponseValue::Scale(v)) => {
            if v < min || v > max {
                return Err(invalid(format!("{} is outside the scale [{}, {}]", v, min, max)));
            }
            Ok(Some(linear(*v as f64, *min as f64, *max as f64)))
        }
        (QuestionKind::Numeric { min, max }, ResponseValue::Scale(v)) => {
            Ok(Some(linear(*v as f64, *min, *max)))
        }
        (QuestionKind::Numeric { min, max }, ResponseValue::Number(v)) => {
            if !v.is_finite() {
                return Err(invalid("value must be a finite number".to_string()));
            }
            Ok(Some(linear(*v, *min, *max)))
        }
        (kind, other) => Err(invalid(format!(
            "answer '{}' does not fit a {} question",
            other,
            kind_name(kind)
        ))),
    }
}

fn linear(value: f64, min: f64, max: f64) -> f64 {
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}

fn kind_name(kind: &QuestionKind) -> &'static str {
    match kind {
        QuestionKind::YesNo => "yes/no",
        QuestionKind::PassFail => "pass/fail",
        QuestionKind::Scale { .. } => "scale",
        QuestionKind::Numeric { .. } => "numeric",
        QuestionKind::Text => "text",
    }
}
