use serde::Deserialize;

use snapsolve_core::{MathAnswer, Result, SnapSolveError, SolutionStep};

/// Caption used when the model did not echo the problem statement back.
const FALLBACK_QUESTION: &str = "Math problem from uploaded image";

#[derive(Debug, Deserialize)]
struct RawStep {
    step_number: u32,
    description: String,
    #[serde(default)]
    calculation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAnswer {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    answer_label: Option<String>,
    #[serde(default)]
    answer_value: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    steps: Option<Vec<RawStep>>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Maps the raw AI payload onto the `MathAnswer` schema.
///
/// Missing optional fields (answer_label, per-step calculation) default to
/// `None`; missing required fields (answer_value, steps) fail as an upstream
/// error. Step ordering is preserved exactly as returned.
pub fn shape_answer(payload: &str) -> Result<MathAnswer> {
    let raw: RawAnswer = serde_json::from_str(payload).map_err(|err| {
        SnapSolveError::Upstream(format!("unparsable solver payload: {err}"))
    })?;

    let answer_value = raw
        .answer_value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SnapSolveError::Upstream("solver payload missing answer_value".into()))?;

    let steps = raw
        .steps
        .ok_or_else(|| SnapSolveError::Upstream("solver payload missing steps".into()))?
        .into_iter()
        .map(|step| SolutionStep {
            step_number: step.step_number,
            description: step.description,
            calculation: step.calculation,
        })
        .collect();

    MathAnswer::new(
        raw.question.unwrap_or_else(|| FALLBACK_QUESTION.to_string()),
        raw.answer_label,
        answer_value,
        raw.explanation.unwrap_or_default(),
        steps,
        raw.confidence.unwrap_or(0.0),
    )
}
