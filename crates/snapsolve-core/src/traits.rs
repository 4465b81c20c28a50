use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AuthUser, MathAnswer, MathProblem};

/// Verifies a bearer credential against the external identity provider.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Returns the decoded identity, or `Unauthenticated` when the token is
    /// missing a subject, malformed, expired, or signed by an untrusted issuer.
    async fn verify(&self, token: &str) -> Result<AuthUser>;
}

/// Delegates the actual problem solving to an external multimodal AI endpoint.
#[async_trait]
pub trait ProblemSolver: Send + Sync {
    /// Solves the math problem captured in `image`, returning a shaped answer.
    ///
    /// Any provider error or unshapeable payload surfaces as `Upstream`.
    async fn solve(&self, image: &[u8], content_type: &str) -> Result<MathAnswer>;

    /// Name of the backing provider (e.g. "openai").
    fn provider_name(&self) -> &str;

    /// Model identifier used for solving.
    fn model_name(&self) -> &str;
}

/// Repository over the external document database, scoped by user id.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persists a solved problem and returns the generated record id.
    async fn save(&self, problem: &MathProblem) -> Result<String>;

    /// Returns up to `limit` records for `user_id`, most recent first.
    async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<MathProblem>>;

    /// Deletes one record. Fails with `NotFound` when the record is absent or
    /// owned by another user; existence is never revealed across users.
    async fn delete(&self, user_id: &str, problem_id: &str) -> Result<()>;
}
