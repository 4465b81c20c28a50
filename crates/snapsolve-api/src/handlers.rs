use axum::{
    extract::{Extension, Multipart, Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use snapsolve_core::{AuthUser, MathAnswer, MathProblem, SnapSolveError, SolutionStep};

use crate::{metrics, ApiError, ApiResult, AppState};

const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct RootResponse {
    pub message: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct SolutionStepDto {
    pub step_number: u32,
    pub description: String,
    pub calculation: Option<String>,
}

#[derive(Serialize)]
pub struct MathAnswerDto {
    pub question: String,
    pub answer_label: Option<String>,
    pub answer_value: String,
    pub explanation: String,
    pub steps: Vec<SolutionStepDto>,
    pub confidence: f64,
}

impl From<&MathAnswer> for MathAnswerDto {
    fn from(answer: &MathAnswer) -> Self {
        Self {
            question: answer.question.clone(),
            answer_label: answer.answer_label.clone(),
            answer_value: answer.answer_value.clone(),
            explanation: answer.explanation.clone(),
            steps: answer
                .steps
                .iter()
                .map(|step: &SolutionStep| SolutionStepDto {
                    step_number: step.step_number,
                    description: step.description.clone(),
                    calculation: step.calculation.clone(),
                })
                .collect(),
            confidence: answer.confidence,
        }
    }
}

#[derive(Serialize)]
pub struct ProblemResponse {
    pub question: String,
    pub answer: MathAnswerDto,
}

#[derive(Serialize)]
pub struct HistoryItemDto {
    pub id: String,
    pub question: String,
    pub answer: MathAnswerDto,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct UserHistoryResponse {
    pub history: Vec<HistoryItemDto>,
    pub user_id: String,
    pub total_problems: usize,
}

#[derive(Serialize)]
pub struct DeleteProblemResponse {
    pub message: String,
    pub problem_id: String,
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "SnapSolve API".to_string(),
        version: option_env!("CARGO_PKG_VERSION").unwrap_or("0.1.0").to_string(),
    })
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: option_env!("CARGO_PKG_VERSION").unwrap_or("0.1.0").to_string(),
    })
}

/// Pulls the `file` part out of the multipart body and validates it against
/// the configured allow-list and size ceiling.
async fn read_upload(
    state: &AppState,
    multipart: &mut Multipart,
) -> ApiResult<(String, String, Vec<u8>)> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("unknown").to_string();
        let content_type = field.content_type().unwrap_or("unknown").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read upload: {e}")))?;

        upload = Some((file_name, content_type, bytes.to_vec()));
        break;
    }

    let (file_name, content_type, bytes) = upload.ok_or_else(|| {
        SnapSolveError::InvalidInput("multipart field 'file' is required".into())
    })?;

    let limits = &state.config.limits;
    if !limits
        .allowed_content_types
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&content_type))
    {
        return Err(SnapSolveError::InvalidInput(format!(
            "unsupported content type '{content_type}', expected one of: {}",
            limits.allowed_content_types.join(", ")
        ))
        .into());
    }
    if bytes.is_empty() {
        return Err(SnapSolveError::InvalidInput("uploaded file is empty".into()).into());
    }
    if bytes.len() > limits.max_upload_bytes {
        return Err(SnapSolveError::InvalidInput(format!(
            "file of {} bytes exceeds the {} byte limit",
            bytes.len(),
            limits.max_upload_bytes
        ))
        .into());
    }

    Ok((file_name, content_type, bytes))
}

/// Process and solve a photographed math problem (requires authentication).
pub async fn solve(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> ApiResult<Json<ProblemResponse>> {
    tracing::info!(uid = %user.uid, "processing math problem");
    metrics::SOLVE_REQUESTS_TOTAL.inc();
    let timer = metrics::SOLVE_DURATION_SECONDS.start_timer();

    let (file_name, content_type, bytes) = read_upload(&state, &mut multipart).await?;

    let answer = state
        .solver
        .solve(&bytes, &content_type)
        .await
        .inspect_err(|_| metrics::SOLVE_FAILURES_TOTAL.inc())?;

    let question = answer.question.clone();
    let answer_dto = MathAnswerDto::from(&answer);

    let problem = MathProblem {
        id: None,
        question: question.clone(),
        answer: Some(answer),
        user_id: user.uid.clone(),
        file_name,
        content_type,
        created_at: Some(Utc::now()),
        updated_at: None,
    };

    // Best effort: a history-write failure must not erase the computed answer.
    match state.store.save(&problem).await {
        Ok(problem_id) => {
            tracing::info!(uid = %user.uid, problem_id = %problem_id, "problem saved to history");
        }
        Err(e) => {
            tracing::warn!(uid = %user.uid, error = %e, "failed to save problem to history");
        }
    }

    timer.observe_duration();

    Ok(Json(ProblemResponse {
        question,
        answer: answer_dto,
    }))
}

/// Get the caller's problem solving history (requires authentication).
pub async fn get_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<HistoryQuery>,
) -> ApiResult<Json<UserHistoryResponse>> {
    tracing::info!(uid = %user.uid, "retrieving history");
    metrics::HISTORY_REQUESTS_TOTAL.inc();

    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let problems = state.store.list(&user.uid, limit).await?;

    let history: Vec<HistoryItemDto> = problems
        .into_iter()
        .filter_map(|problem| {
            let id = problem.id?;
            let created_at = problem.created_at?;
            let answer = problem.answer?;
            Some(HistoryItemDto {
                id,
                question: problem.question,
                answer: MathAnswerDto::from(&answer),
                file_name: problem.file_name,
                created_at,
            })
        })
        .collect();

    Ok(Json(UserHistoryResponse {
        user_id: user.uid,
        total_problems: history.len(),
        history,
    }))
}

/// Delete one problem from the caller's history (requires authentication).
pub async fn delete_problem(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(problem_id): Path<String>,
) -> ApiResult<Json<DeleteProblemResponse>> {
    tracing::info!(uid = %user.uid, problem_id = %problem_id, "deleting problem");

    state.store.delete(&user.uid, &problem_id).await?;

    Ok(Json(DeleteProblemResponse {
        message: "Problem deleted successfully".to_string(),
        problem_id,
        user_id: user.uid,
    }))
}
