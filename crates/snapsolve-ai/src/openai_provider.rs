use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use snapsolve_core::{AiConfig, MathAnswer, ProblemSolver, Result, SnapSolveError};

use crate::shaper::shape_answer;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-5.1";

const SOLVER_INSTRUCTIONS: &str = "You are a mathematics tutor helping students solve homework problems.\n\
Given a math problem, provide:\n\
1. The final answer\n\
2. Step-by-step solution\n\
3. Clear explanation of concepts used\n\n\
Be thorough but concise. Show all work clearly.";

const SOLVE_USER_TEXT: &str = "Solve this math problem";

/// Configuration for the OpenAI solving provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiSolverConfig {
    /// API key for OpenAI
    pub api_key: String,
    /// Base URL for API (default: https://api.openai.com/v1)
    pub base_url: String,
    /// Model to use (must support image input)
    pub model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum output tokens per solving call
    pub max_output_tokens: usize,
}

impl Default for OpenAiSolverConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            base_url: OPENAI_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 120,
            max_output_tokens: 4096,
        }
    }
}

impl From<&AiConfig> for OpenAiSolverConfig {
    fn from(config: &AiConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

/// Math solving provider backed by the OpenAI Responses API.
pub struct OpenAiSolver {
    config: OpenAiSolverConfig,
    client: Client,
}

impl OpenAiSolver {
    /// Create a new solver
    pub fn new(config: OpenAiSolverConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(SnapSolveError::Config(
                "OpenAI API key is required. Set OPENAI_API_KEY environment variable.".into(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SnapSolveError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAiSolverConfig::default())
    }

    fn build_request(&self, image: &[u8], content_type: &str) -> SolveRequest {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let image_url = format!("data:{content_type};base64,{encoded}");

        SolveRequest {
            model: self.config.model.clone(),
            instructions: SOLVER_INSTRUCTIONS.to_string(),
            input: vec![InputMessage {
                role: "user".to_string(),
                content: vec![
                    InputContent::InputText {
                        text: SOLVE_USER_TEXT.to_string(),
                    },
                    InputContent::InputImage { image_url },
                ],
            }],
            max_output_tokens: self.config.max_output_tokens,
            text: TextConfig {
                format: TextFormat::JsonSchema {
                    name: "math_answer".to_string(),
                    schema: math_answer_schema(),
                    strict: true,
                },
            },
        }
    }

    /// One request to the Responses API. No retry loop: only the client-level
    /// timeout bounds a slow upstream.
    async fn send_request(&self, request: &SolveRequest) -> Result<SolveResponse> {
        let response = self
            .client
            .post(format!("{}/responses", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| SnapSolveError::Upstream(format!("solver request failed: {e}")))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(SnapSolveError::Upstream(format!(
                "solver API error ({status}): {error_text}"
            )));
        }

        response
            .json::<SolveResponse>()
            .await
            .map_err(|e| SnapSolveError::Upstream(format!("failed to parse solver response: {e}")))
    }
}

#[async_trait]
impl ProblemSolver for OpenAiSolver {
    async fn solve(&self, image: &[u8], content_type: &str) -> Result<MathAnswer> {
        let request = self.build_request(image, content_type);
        let response = self.send_request(&request).await?;

        let content = response
            .output
            .iter()
            .filter(|item| item.output_type == "message")
            .flat_map(|item| &item.content)
            .filter(|c| c.content_type == "output_text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if content.is_empty() {
            return Err(SnapSolveError::Upstream(
                "solver returned no text output".into(),
            ));
        }

        tracing::debug!(model = %self.config.model, payload = %content, "raw solver payload");

        shape_answer(&content)
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// JSON schema pinned onto the model output so the payload shapes cleanly.
fn math_answer_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "question": {"type": "string"},
            "answer_label": {"type": ["string", "null"]},
            "answer_value": {"type": "string"},
            "explanation": {"type": "string"},
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "step_number": {"type": "integer"},
                        "description": {"type": "string"},
                        "calculation": {"type": ["string", "null"]}
                    },
                    "required": ["step_number", "description", "calculation"],
                    "additionalProperties": false
                }
            },
            "confidence": {"type": "number", "minimum": 0.0, "maximum": 1.0}
        },
        "required": ["question", "answer_label", "answer_value", "explanation", "steps", "confidence"],
        "additionalProperties": false
    })
}

// Responses API request/response types

#[derive(Debug, Serialize)]
struct SolveRequest {
    model: String,
    instructions: String,
    input: Vec<InputMessage>,
    max_output_tokens: usize,
    /// Responses API uses text.format instead of response_format
    text: TextConfig,
}

#[derive(Debug, Serialize)]
struct InputMessage {
    role: String,
    content: Vec<InputContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputContent {
    InputText { text: String },
    InputImage { image_url: String },
}

#[derive(Debug, Serialize)]
struct TextConfig {
    format: TextFormat,
}

/// Flattened structure: {"type": "json_schema", "name": "...", "schema": {...},
/// "strict": true} — NOT a nested "json_schema" object.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TextFormat {
    JsonSchema {
        name: String,
        schema: serde_json::Value,
        strict: bool,
    },
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct SolveResponse {
    id: String,
    object: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    output_type: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
    total_tokens: usize,
}
