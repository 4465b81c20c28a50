use std::sync::Arc;
use std::time::Duration;

use snapsolve_ai::{OpenAiSolver, OpenAiSolverConfig};
use snapsolve_auth::{IdTokenVerifier, VerifierConfig};
use snapsolve_core::{
    HistoryStore, ProblemSolver, Result, SnapSolveConfig, SnapSolveError, TokenVerifier,
};
use snapsolve_store::FirestoreHistoryStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<SnapSolveConfig>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub solver: Arc<dyn ProblemSolver>,
    pub store: Arc<dyn HistoryStore>,
}

impl AppState {
    /// Wires the production collaborators from configuration.
    pub fn new(config: Arc<SnapSolveConfig>) -> Result<Self> {
        if config.auth.project_id.is_empty() {
            return Err(SnapSolveError::Config(
                "identity project id is required. Set FIREBASE_PROJECT_ID.".into(),
            ));
        }

        let verifier = IdTokenVerifier::new(VerifierConfig::firebase(
            &config.auth.project_id,
            &config.auth.jwks_url,
            Duration::from_secs(config.auth.jwks_cache_ttl_secs),
        ))?;
        let solver = OpenAiSolver::new(OpenAiSolverConfig::from(&config.ai))?;
        let store = FirestoreHistoryStore::new(config.firestore.clone())?;

        Ok(Self::with_components(
            config,
            Arc::new(verifier),
            Arc::new(solver),
            Arc::new(store),
        ))
    }

    /// Assembles state from explicit collaborators. Used by tests to swap in
    /// stub implementations.
    pub fn with_components(
        config: Arc<SnapSolveConfig>,
        verifier: Arc<dyn TokenVerifier>,
        solver: Arc<dyn ProblemSolver>,
        store: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            config,
            verifier,
            solver,
            store,
        }
    }
}
