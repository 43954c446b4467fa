//! Audit scoring: templates, responses and the weighted scorer.

pub mod engine;
pub mod response;
pub mod template;

pub use engine::{AuditScorer, Finding, FindingSeverity, Grade, Outcome, ScoreReport, SectionScore};
pub use response::{ResponseValue, Responses};
pub use template::{AuditTemplate, Question, QuestionKind, Section};
