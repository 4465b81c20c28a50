use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use chrono::Utc;

use snapsolve_api::{create_router, AppState};
use snapsolve_core::{
    AuthUser, HistoryStore, MathAnswer, MathProblem, ProblemSolver, Result, SnapSolveConfig,
    SnapSolveError, SolutionStep, TokenVerifier,
};

struct StubVerifier {
    users: HashMap<String, AuthUser>,
}

impl StubVerifier {
    fn with_users(users: &[(&str, &str)]) -> Self {
        let users = users
            .iter()
            .map(|(token, uid)| {
                (
                    token.to_string(),
                    AuthUser {
                        uid: uid.to_string(),
                        email: Some(format!("{uid}@example.com")),
                        name: Some(uid.to_string()),
                        email_verified: true,
                    },
                )
            })
            .collect();
        Self { users }
    }
}

#[async_trait]
impl TokenVerifier for StubVerifier {
    async fn verify(&self, token: &str) -> Result<AuthUser> {
        self.users
            .get(token)
            .cloned()
            .ok_or_else(|| SnapSolveError::Unauthenticated("Invalid or expired token".into()))
    }
}

struct StubSolver {
    calls: AtomicUsize,
    fail: bool,
}

impl StubSolver {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProblemSolver for StubSolver {
    async fn solve(&self, _image: &[u8], _content_type: &str) -> Result<MathAnswer> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SnapSolveError::Upstream("solver API error (500)".into()));
        }
        MathAnswer::new(
            "What is 2 + 2?".to_string(),
            None,
            "4".to_string(),
            "Add the two numbers.".to_string(),
            vec![SolutionStep {
                step_number: 1,
                description: "Add 2 and 2".to_string(),
                calculation: Some("2 + 2 = 4".to_string()),
            }],
            0.95,
        )
    }

    fn provider_name(&self) -> &str {
        "stub"
    }

    fn model_name(&self) -> &str {
        "stub-model"
    }
}

struct MemoryHistoryStore {
    calls: AtomicUsize,
    next_id: AtomicUsize,
    fail_saves: bool,
    records: Mutex<HashMap<String, Vec<MathProblem>>>,
}

impl MemoryHistoryStore {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
            fail_saves: false,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn with_failing_saves() -> Self {
        Self {
            fail_saves: true,
            ..Self::new()
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn save(&self, problem: &MathProblem) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves {
            return Err(SnapSolveError::Upstream("firestore save error".into()));
        }
        let id = format!("rec-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut record = problem.clone();
        record.id = Some(id.clone());
        record.created_at = Some(record.created_at.unwrap_or_else(Utc::now));
        let mut records = self.records.lock().unwrap();
        // Most recent first
        records
            .entry(problem.user_id.clone())
            .or_default()
            .insert(0, record);
        Ok(id)
    }

    async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<MathProblem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let records = self.records.lock().unwrap();
        Ok(records
            .get(user_id)
            .map(|problems| problems.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, user_id: &str, problem_id: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().unwrap();
        let problems = records
            .get_mut(user_id)
            .ok_or_else(|| SnapSolveError::NotFound(format!("problem {problem_id} not found")))?;
        let before = problems.len();
        problems.retain(|p| p.id.as_deref() != Some(problem_id));
        if problems.len() == before {
            return Err(SnapSolveError::NotFound(format!(
                "problem {problem_id} not found"
            )));
        }
        Ok(())
    }
}

struct TestHarness {
    server: TestServer,
    solver: Arc<StubSolver>,
    store: Arc<MemoryHistoryStore>,
}

fn harness_with(
    config: SnapSolveConfig,
    solver: Arc<StubSolver>,
    store: Arc<MemoryHistoryStore>,
) -> TestHarness {
    let verifier = Arc::new(StubVerifier::with_users(&[
        ("alice-token", "alice"),
        ("bob-token", "bob"),
    ]));
    let state = AppState::with_components(
        Arc::new(config),
        verifier,
        solver.clone(),
        store.clone(),
    );
    let server = TestServer::new(create_router(state)).expect("test server");
    TestHarness {
        server,
        solver,
        store,
    }
}

fn harness() -> TestHarness {
    harness_with(
        SnapSolveConfig::default(),
        Arc::new(StubSolver::new()),
        Arc::new(MemoryHistoryStore::new()),
    )
}

fn png_upload() -> MultipartForm {
    MultipartForm::new().add_part(
        "file",
        Part::bytes(vec![0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a])
            .file_name("photo.png")
            .mime_type("image/png"),
    )
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let harness = harness();

    let resp = harness.server.get("/health").await;
    assert_eq!(resp.status_code(), 200);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn root_banner_is_public() {
    let harness = harness();

    let resp = harness.server.get("/").await;
    assert_eq!(resp.status_code(), 200);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["message"], "SnapSolve API");
}

#[tokio::test]
async fn metrics_endpoint_is_public() {
    let harness = harness();

    let resp = harness.server.get("/metrics").await;
    assert_eq!(resp.status_code(), 200);
}

#[tokio::test]
async fn protected_routes_require_auth() {
    let harness = harness();

    let solve = harness
        .server
        .post("/api/v1/solve")
        .multipart(png_upload())
        .await;
    assert_eq!(solve.status_code(), 401);
    assert_eq!(
        solve.headers().get("www-authenticate").unwrap(),
        "Bearer"
    );

    let history = harness.server.get("/api/v1/history").await;
    assert_eq!(history.status_code(), 401);

    let delete = harness.server.delete("/api/v1/history/rec-1").await;
    assert_eq!(delete.status_code(), 401);

    // Rejection happens before the solver or store is ever invoked
    assert_eq!(harness.solver.call_count(), 0);
    assert_eq!(harness.store.call_count(), 0);
}

#[tokio::test]
async fn invalid_token_rejected() {
    let harness = harness();

    let resp = harness
        .server
        .get("/api/v1/history")
        .authorization_bearer("forged-token")
        .await;
    assert_eq!(resp.status_code(), 401);
    let body: serde_json::Value = resp.json();
    assert!(body["detail"].as_str().unwrap().contains("Invalid"));
    assert_eq!(harness.store.call_count(), 0);
}

#[tokio::test]
async fn solve_history_delete_round_trip() {
    let harness = harness();

    let solve = harness
        .server
        .post("/api/v1/solve")
        .authorization_bearer("alice-token")
        .multipart(png_upload())
        .await;
    assert_eq!(solve.status_code(), 200);
    let body: serde_json::Value = solve.json();
    assert_eq!(body["question"], "What is 2 + 2?");
    assert_eq!(body["answer"]["answer_value"], "4");
    let confidence = body["answer"]["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    assert!(!body["answer"]["steps"].as_array().unwrap().is_empty());

    let history = harness
        .server
        .get("/api/v1/history")
        .authorization_bearer("alice-token")
        .await;
    assert_eq!(history.status_code(), 200);
    let body: serde_json::Value = history.json();
    assert_eq!(body["user_id"], "alice");
    assert_eq!(body["total_problems"], 1);
    let item = &body["history"][0];
    assert_eq!(item["question"], "What is 2 + 2?");
    assert_eq!(item["answer"]["answer_value"], "4");
    assert_eq!(item["file_name"], "photo.png");
    let problem_id = item["id"].as_str().unwrap().to_string();

    let delete = harness
        .server
        .delete(&format!("/api/v1/history/{problem_id}"))
        .authorization_bearer("alice-token")
        .await;
    assert_eq!(delete.status_code(), 200);
    let body: serde_json::Value = delete.json();
    assert_eq!(body["message"], "Problem deleted successfully");
    assert_eq!(body["problem_id"], problem_id);
    assert_eq!(body["user_id"], "alice");

    // Deleting the same record again is a 404
    let delete_again = harness
        .server
        .delete(&format!("/api/v1/history/{problem_id}"))
        .authorization_bearer("alice-token")
        .await;
    assert_eq!(delete_again.status_code(), 404);

    let history = harness
        .server
        .get("/api/v1/history")
        .authorization_bearer("alice-token")
        .await;
    let body: serde_json::Value = history.json();
    assert_eq!(body["total_problems"], 0);
}

#[tokio::test]
async fn solve_rejects_unsupported_content_type() {
    let harness = harness();

    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(b"%PDF-1.4".to_vec())
            .file_name("homework.pdf")
            .mime_type("application/pdf"),
    );
    let resp = harness
        .server
        .post("/api/v1/solve")
        .authorization_bearer("alice-token")
        .multipart(form)
        .await;

    assert_eq!(resp.status_code(), 400);
    let body: serde_json::Value = resp.json();
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .contains("unsupported content type"));
    assert_eq!(harness.solver.call_count(), 0);
}

#[tokio::test]
async fn solve_rejects_oversized_upload() {
    let mut config = SnapSolveConfig::default();
    config.limits.max_upload_bytes = 1024;
    let harness = harness_with(
        config,
        Arc::new(StubSolver::new()),
        Arc::new(MemoryHistoryStore::new()),
    );

    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(vec![0u8; 2048])
            .file_name("big.png")
            .mime_type("image/png"),
    );
    let resp = harness
        .server
        .post("/api/v1/solve")
        .authorization_bearer("alice-token")
        .multipart(form)
        .await;

    assert_eq!(resp.status_code(), 400);
    assert_eq!(harness.solver.call_count(), 0);
}

#[tokio::test]
async fn solve_rejects_empty_upload() {
    let harness = harness();

    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(Vec::new())
            .file_name("empty.png")
            .mime_type("image/png"),
    );
    let resp = harness
        .server
        .post("/api/v1/solve")
        .authorization_bearer("alice-token")
        .multipart(form)
        .await;

    assert_eq!(resp.status_code(), 400);
}

#[tokio::test]
async fn solve_rejects_missing_file_field() {
    let harness = harness();

    let form = MultipartForm::new().add_part(
        "attachment",
        Part::bytes(vec![1, 2, 3])
            .file_name("photo.png")
            .mime_type("image/png"),
    );
    let resp = harness
        .server
        .post("/api/v1/solve")
        .authorization_bearer("alice-token")
        .multipart(form)
        .await;

    assert_eq!(resp.status_code(), 400);
    let body: serde_json::Value = resp.json();
    assert!(body["detail"].as_str().unwrap().contains("'file'"));
}

#[tokio::test]
async fn history_respects_limit_param() {
    let harness = harness();

    for _ in 0..3 {
        let resp = harness
            .server
            .post("/api/v1/solve")
            .authorization_bearer("alice-token")
            .multipart(png_upload())
            .await;
        assert_eq!(resp.status_code(), 200);
    }

    let resp = harness
        .server
        .get("/api/v1/history")
        .add_query_param("limit", 2)
        .authorization_bearer("alice-token")
        .await;
    assert_eq!(resp.status_code(), 200);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["total_problems"], 2);
    assert_eq!(body["history"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn cross_user_delete_returns_not_found() {
    let harness = harness();

    let resp = harness
        .server
        .post("/api/v1/solve")
        .authorization_bearer("alice-token")
        .multipart(png_upload())
        .await;
    assert_eq!(resp.status_code(), 200);

    let history = harness
        .server
        .get("/api/v1/history")
        .authorization_bearer("alice-token")
        .await;
    let body: serde_json::Value = history.json();
    let problem_id = body["history"][0]["id"].as_str().unwrap().to_string();

    // Bob cannot delete Alice's record, and cannot learn that it exists
    let delete = harness
        .server
        .delete(&format!("/api/v1/history/{problem_id}"))
        .authorization_bearer("bob-token")
        .await;
    assert_eq!(delete.status_code(), 404);

    // Alice still sees her record
    let history = harness
        .server
        .get("/api/v1/history")
        .authorization_bearer("alice-token")
        .await;
    let body: serde_json::Value = history.json();
    assert_eq!(body["total_problems"], 1);
}

#[tokio::test]
async fn upstream_failure_returns_500() {
    let harness = harness_with(
        SnapSolveConfig::default(),
        Arc::new(StubSolver::failing()),
        Arc::new(MemoryHistoryStore::new()),
    );

    let resp = harness
        .server
        .post("/api/v1/solve")
        .authorization_bearer("alice-token")
        .multipart(png_upload())
        .await;

    assert_eq!(resp.status_code(), 500);
    let body: serde_json::Value = resp.json();
    assert!(body["detail"].as_str().unwrap().contains("Upstream"));
}

#[tokio::test]
async fn history_write_failure_still_returns_answer() {
    let harness = harness_with(
        SnapSolveConfig::default(),
        Arc::new(StubSolver::new()),
        Arc::new(MemoryHistoryStore::with_failing_saves()),
    );

    let resp = harness
        .server
        .post("/api/v1/solve")
        .authorization_bearer("alice-token")
        .multipart(png_upload())
        .await;

    assert_eq!(resp.status_code(), 200);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["answer"]["answer_value"], "4");
}
