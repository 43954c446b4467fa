//! Audit template definitions and validation.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ScoringError;

/// Answer type expected by a question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    YesNo,
    PassFail,
    /// Integer rating between `min` and `max` inclusive.
    Scale { min: i64, max: i64 },
    /// Measured value; scored linearly between `min` and `max`, clamped.
    Numeric { min: f64, max: f64 },
    /// Free text, recorded but never scored.
    Text,
}

impl QuestionKind {
    pub fn is_scored(&self) -> bool {
        !matches!(self, QuestionKind::Text)
    }
}

fn default_weight() -> f64 {
    1.0
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub kind: QuestionKind,
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// A critical question that does not score full marks fails the audit.
    #[serde(default)]
    pub critical: bool,
    #[serde(default = "default_required")]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub questions: Vec<Question>,
}

/// An audit checklist: weighted sections of weighted questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTemplate {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    /// Minimum overall percentage (0-100) for a passing audit.
    pub pass_threshold: f64,
    pub sections: Vec<Section>,
}

fn default_version() -> u32 {
    1
}

impl AuditTemplate {
    /// Loads a template from a YAML (or JSON, which is valid YAML) file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScoringError> {
        let content = std::fs::read_to_string(path)?;
        let template: AuditTemplate = serde_yaml::from_str(&content)?;
        template.validate()?;
        Ok(template)
    }

    /// Iterates over `(section, question)` pairs in declaration order.
    pub fn questions(&self) -> impl Iterator<Item = (&Section, &Question)> {
        self.sections
            .iter()
            .flat_map(|s| s.questions.iter().map(move |q| (s, q)))
    }

    pub fn find_question(&self, id: &str) -> Option<(&Section, &Question)> {
        self.questions().find(|(_, q)| q.id == id)
    }

    /// Checks structural invariants of the template.
    pub fn validate(&self) -> Result<(), ScoringError> {
        let invalid = |msg: String| Err(ScoringError::InvalidTemplate(msg));

        if self.id.trim().is_empty() {
            return invalid("template id must not be empty".to_string());
        }
        if !(0.0..=100.0).contains(&self.pass_threshold) {
            return invalid(format!(
                "pass_threshold {} must be between 0 and 100",
                self.pass_threshold
            ));
        }
        if self.sections.iter().all(|s| s.questions.is_empty()) {
            return invalid("template must contain at least one question".to_string());
        }

        let mut section_ids = HashSet::new();
        let mut question_ids = HashSet::new();
        for section in &self.sections {
            if !section_ids.insert(section.id.as_str()) {
                return invalid(format!("duplicate section id '{}'", section.id));
            }
            if !(section.weight > 0.0 && section.weight.is_finite()) {
                return invalid(format!("section '{}' must have a positive weight", section.id));
            }
            for question in &section.questions {
                if !question_ids.insert(question.id.as_str()) {
                    return invalid(format!("duplicate question id '{}'", question.id));
                }
                if !(question.weight > 0.0 && question.weight.is_finite()) {
                    return invalid(format!(
                        "question '{}' must have a positive weight",
                        question.id
                    ));
                }
                match question.kind {
                    QuestionKind::Scale { min, max } if min >= max => {
                        return invalid(format!(
                            "question '{}' has an empty scale [{}, {}]",
                            question.id, min, max
                        ));
                    }
                    QuestionKind::Numeric { min, max }
                        if !min.is_finite() || !max.is_finite() || min >= max =>
                    {
                        return invalid(format!(
                            "question '{}' has an invalid range [{}, {}]",
                            question.id, min, max
                        ));
                    }
                    QuestionKind::Text if question.critical => {
                        return invalid(format!(
                            "text question '{}' cannot be critical",
                            question.id
                        ));
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE_YAML: &str = r#"
id: iso9001-internal
name: ISO 9001 internal audit
pass_threshold: 75
sections:
  - id: leadership
    title: Leadership
    weight: 2
    questions:
      - id: policy-communicated
        text: Is the quality policy communicated?
        kind: { type: yes_no }
        critical: true
      - id: objectives-rating
        text: Rate the quality objectives
        kind: { type: scale, min: 1, max: 5 }
  - id: operations
    title: Operations
    questions:
      - id: calibration
        text: Calibration records present?
        kind: { type: pass_fail }
        weight: 3
      - id: notes
        text: Auditor notes
        kind: { type: text }
        required: false
"#;

    fn template() -> AuditTemplate {
        serde_yaml::from_str(TEMPLATE_YAML).unwrap()
    }

    #[test]
    fn test_parse_defaults() {
        let t = template();
        assert_eq!(t.version, 1);
        assert_eq!(t.sections[1].weight, 1.0);
        let (_, q) = t.find_question("objectives-rating").unwrap();
        assert_eq!(q.weight, 1.0);
        assert!(q.required);
        assert!(!q.critical);
        assert_eq!(q.kind, QuestionKind::Scale { min: 1, max: 5 });
        assert!(t.validate().is_ok());
    }

    #[test]
    fn test_questions_iterate_in_order() {
        let t = template();
        let ids: Vec<&str> = t.questions().map(|(_, q)| q.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["policy-communicated", "objectives-rating", "calibration", "notes"]
        );
    }

    #[test]
    fn test_duplicate_question_ids() {
        let mut t = template();
        t.sections[1].questions[0].id = "policy-communicated".to_string();
        let err = t.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate question id"));
    }

    #[test]
    fn test_threshold_range() {
        let mut t = template();
        t.pass_threshold = 120.0;
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_empty_scale() {
        let mut t = template();
        t.sections[0].questions[1].kind = QuestionKind::Scale { min: 3, max: 3 };
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_non_finite_numeric_range() {
        for (min, max) in [
            (0.0, f64::INFINITY),
            (f64::NEG_INFINITY, 10.0),
            (f64::NAN, 10.0),
            (5.0, 5.0),
        ] {
            let mut t = template();
            t.sections[1].questions[0].kind = QuestionKind::Numeric { min, max };
            let err = t.validate().unwrap_err();
            assert!(err.to_string().contains("invalid range"), "{}", err);
        }
    }

    #[test]
    fn test_non_positive_weight() {
        let mut t = template();
        t.sections[0].weight = 0.0;
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_critical_text_question() {
        let mut t = template();
        t.sections[1].questions[1].critical = true;
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.yaml");
        std::fs::write(&path, TEMPLATE_YAML).unwrap();

        let t = AuditTemplate::from_file(&path).unwrap();
        assert_eq!(t.id, "iso9001-internal");
    }
}
