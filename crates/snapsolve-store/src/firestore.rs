use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use snapsolve_core::{FirestoreConfig, HistoryStore, MathProblem, Result, SnapSolveError};

use crate::codec;
use crate::token::{ServiceAccountTokenSource, TokenSource};

const DEFAULT_LIST_LIMIT: usize = 50;

/// History repository over the Firestore REST surface.
///
/// Records live under `users/{uid}/solutions`, so every operation is scoped to
/// the owning user by construction.
pub struct FirestoreHistoryStore {
    config: FirestoreConfig,
    client: Client,
    tokens: Arc<dyn TokenSource>,
}

impl FirestoreHistoryStore {
    pub fn new(config: FirestoreConfig) -> Result<Self> {
        let tokens: Arc<dyn TokenSource> = Arc::new(ServiceAccountTokenSource::new(&config)?);
        Self::with_token_source(config, tokens)
    }

    /// Build with an explicit token source (emulator, tests).
    pub fn with_token_source(
        config: FirestoreConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self> {
        if config.project_id.is_empty() {
            return Err(SnapSolveError::Config(
                "Firestore project id is required. Set FIREBASE_PROJECT_ID.".into(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SnapSolveError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            client,
            tokens,
        })
    }

    fn collection_url(&self, user_id: &str) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/users/{}/solutions",
            self.config.base_url, self.config.project_id, user_id
        )
    }

    fn document_url(&self, user_id: &str, problem_id: &str) -> String {
        format!("{}/{}", self.collection_url(user_id), problem_id)
    }

    async fn bearer(&self) -> Result<String> {
        self.tokens.token().await
    }
}

/// A delete with `currentDocument.exists=true` fails when the document is
/// absent; both the missing-document and failed-precondition statuses mean the
/// caller owns no such record.
pub(crate) fn map_delete_status(status: StatusCode, problem_id: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::NOT_FOUND | StatusCode::CONFLICT => Err(SnapSolveError::NotFound(format!(
            "problem {problem_id} not found"
        ))),
        other => Err(SnapSolveError::Upstream(format!(
            "firestore delete failed with status {other}"
        ))),
    }
}

#[async_trait]
impl HistoryStore for FirestoreHistoryStore {
    async fn save(&self, problem: &MathProblem) -> Result<String> {
        let mut record = problem.clone();
        record.created_at = Some(record.created_at.unwrap_or_else(Utc::now));
        record.updated_at = Some(Utc::now());
        let fields = codec::problem_to_fields(&record);

        let token = self.bearer().await?;
        let response = self
            .client
            .post(self.collection_url(&record.user_id))
            .bearer_auth(token)
            .json(&serde_json::json!({ "fields": fields }))
            .send()
            .await
            .map_err(|e| SnapSolveError::Upstream(format!("firestore save failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SnapSolveError::Upstream(format!(
                "firestore save error ({status}): {body}"
            )));
        }

        let document: Value = response
            .json()
            .await
            .map_err(|e| SnapSolveError::Upstream(format!("malformed save response: {e}")))?;

        let id = document
            .get("name")
            .and_then(|n| n.as_str())
            .and_then(codec::document_id_from_name)
            .ok_or_else(|| SnapSolveError::Upstream("save response missing document name".into()))?
            .to_string();

        tracing::info!(user_id = %record.user_id, problem_id = %id, "solution saved");
        Ok(id)
    }

    async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<MathProblem>> {
        let limit = if limit == 0 { DEFAULT_LIST_LIMIT } else { limit };
        let token = self.bearer().await?;
        let response = self
            .client
            .get(self.collection_url(user_id))
            .bearer_auth(token)
            .query(&[
                ("orderBy", "created_at desc".to_string()),
                ("pageSize", limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| SnapSolveError::Upstream(format!("firestore list failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SnapSolveError::Upstream(format!(
                "firestore list error ({status}): {body}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SnapSolveError::Upstream(format!("malformed list response: {e}")))?;

        // An empty collection returns a body with no `documents` key
        let documents = match body.get("documents").and_then(|d| d.as_array()) {
            Some(documents) => documents,
            None => return Ok(Vec::new()),
        };

        documents.iter().map(codec::document_to_problem).collect()
    }

    async fn delete(&self, user_id: &str, problem_id: &str) -> Result<()> {
        let token = self.bearer().await?;
        let response = self
            .client
            .delete(self.document_url(user_id, problem_id))
            .bearer_auth(token)
            .query(&[("currentDocument.exists", "true")])
            .send()
            .await
            .map_err(|e| SnapSolveError::Upstream(format!("firestore delete failed: {e}")))?;

        map_delete_status(response.status(), problem_id)?;
        tracing::info!(user_id = %user_id, problem_id = %problem_id, "problem deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::StaticTokenSource;

    fn store() -> FirestoreHistoryStore {
        let config = FirestoreConfig {
            project_id: "demo-project".to_string(),
            base_url: "http://localhost:8080/v1".to_string(),
            ..Default::default()
        };
        FirestoreHistoryStore::with_token_source(
            config,
            Arc::new(StaticTokenSource("owner".to_string())),
        )
        .unwrap()
    }

    #[test]
    fn urls_scope_records_to_the_user() {
        let store = store();
        assert_eq!(
            store.collection_url("user-1"),
            "http://localhost:8080/v1/projects/demo-project/databases/(default)/documents/users/user-1/solutions"
        );
        assert_eq!(
            store.document_url("user-1", "rec-9"),
            "http://localhost:8080/v1/projects/demo-project/databases/(default)/documents/users/user-1/solutions/rec-9"
        );
    }

    #[test]
    fn missing_project_id_rejected() {
        let config = FirestoreConfig::default();
        let result = FirestoreHistoryStore::with_token_source(
            config,
            Arc::new(StaticTokenSource("owner".to_string())),
        );
        assert!(result.is_err());
    }

    #[test]
    fn delete_status_mapping() {
        assert!(map_delete_status(StatusCode::OK, "p").is_ok());
        assert!(matches!(
            map_delete_status(StatusCode::NOT_FOUND, "p"),
            Err(SnapSolveError::NotFound(_))
        ));
        // Failed `currentDocument.exists` precondition
        assert!(matches!(
            map_delete_status(StatusCode::CONFLICT, "p"),
            Err(SnapSolveError::NotFound(_))
        ));
        assert!(matches!(
            map_delete_status(StatusCode::INTERNAL_SERVER_ERROR, "p"),
            Err(SnapSolveError::Upstream(_))
        ));
    }
}
