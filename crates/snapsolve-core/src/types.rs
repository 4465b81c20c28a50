use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SnapSolveError};

/// A single step in solving a math problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionStep {
    pub step_number: u32,
    pub description: String,
    #[serde(default)]
    pub calculation: Option<String>,
}

/// The structured answer to a math problem, as shaped from the AI response.
///
/// Immutable once produced; there is no edit path anywhere in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MathAnswer {
    pub question: String,
    #[serde(default)]
    pub answer_label: Option<String>,
    pub answer_value: String,
    pub explanation: String,
    pub steps: Vec<SolutionStep>,
    pub confidence: f64,
}

impl MathAnswer {
    /// Builds an answer, rejecting a confidence score outside `[0.0, 1.0]`.
    pub fn new(
        question: String,
        answer_label: Option<String>,
        answer_value: String,
        explanation: String,
        steps: Vec<SolutionStep>,
        confidence: f64,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(SnapSolveError::Upstream(format!(
                "confidence must be between 0.0 and 1.0, got {confidence}"
            )));
        }
        Ok(Self {
            question,
            answer_label,
            answer_value,
            explanation,
            steps,
            confidence,
        })
    }
}

/// A submitted problem together with its (eventual) answer and history metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MathProblem {
    pub id: Option<String>,
    pub question: String,
    pub answer: Option<MathAnswer>,
    pub user_id: String,
    pub file_name: String,
    pub content_type: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Identity extracted from a verified bearer token.
///
/// A transient view over the identity provider's claims; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub email_verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps() -> Vec<SolutionStep> {
        vec![SolutionStep {
            step_number: 1,
            description: "Add the operands".to_string(),
            calculation: Some("2 + 2 = 4".to_string()),
        }]
    }

    #[test]
    fn answer_accepts_confidence_bounds() {
        for confidence in [0.0, 0.5, 1.0] {
            let answer = MathAnswer::new(
                "What is 2 + 2?".to_string(),
                None,
                "4".to_string(),
                "Basic addition".to_string(),
                steps(),
                confidence,
            );
            assert!(answer.is_ok());
        }
    }

    #[test]
    fn answer_rejects_out_of_range_confidence() {
        for confidence in [-0.1, 1.5, f64::NAN] {
            let answer = MathAnswer::new(
                "What is 2 + 2?".to_string(),
                None,
                "4".to_string(),
                "Basic addition".to_string(),
                steps(),
                confidence,
            );
            assert!(matches!(answer, Err(SnapSolveError::Upstream(_))));
        }
    }

    #[test]
    fn answer_serializes_null_label() {
        let answer = MathAnswer::new(
            "q".to_string(),
            None,
            "4".to_string(),
            "e".to_string(),
            steps(),
            0.9,
        )
        .unwrap();
        let json = serde_json::to_value(&answer).unwrap();
        assert!(json["answer_label"].is_null());
        assert_eq!(json["steps"][0]["step_number"], 1);
    }

    #[test]
    fn problem_round_trips_through_json() {
        let problem = MathProblem {
            id: Some("abc".to_string()),
            question: "What is 2 + 2?".to_string(),
            answer: None,
            user_id: "user-1".to_string(),
            file_name: "photo.png".to_string(),
            content_type: "image/png".to_string(),
            created_at: Some(Utc::now()),
            updated_at: None,
        };
        let json = serde_json::to_string(&problem).unwrap();
        let back: MathProblem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, problem);
    }
}
