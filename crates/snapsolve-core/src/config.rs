use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Result, SnapSolveError};

/// Main configuration for the SnapSolve backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SnapSolveConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Identity-provider token verification
    #[serde(default)]
    pub auth: AuthConfig,

    /// External AI solving endpoint
    #[serde(default)]
    pub ai: AiConfig,

    /// Firestore history store
    #[serde(default)]
    pub firestore: FirestoreConfig,

    /// Upload validation limits
    #[serde(default)]
    pub limits: LimitConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins allowed by the CORS layer
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Identity-provider project id; also the expected token audience
    #[serde(default)]
    pub project_id: String,

    /// JWKS endpoint for the token signing keys
    #[serde(default = "default_jwks_url")]
    pub jwks_url: String,

    /// How long fetched signing keys stay cached
    #[serde(default = "default_jwks_cache_ttl_secs")]
    pub jwks_cache_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            jwks_url: default_jwks_url(),
            jwks_cache_ttl_secs: default_jwks_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// API key for the solving endpoint
    #[serde(default)]
    pub api_key: String,

    /// Base URL of the Responses API
    #[serde(default = "default_ai_base_url")]
    pub base_url: String,

    /// Model identifier (e.g. "gpt-5.1")
    #[serde(default = "default_ai_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_ai_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum output tokens per solving call
    #[serde(default = "default_ai_max_output_tokens")]
    pub max_output_tokens: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_ai_base_url(),
            model: default_ai_model(),
            timeout_secs: default_ai_timeout_secs(),
            max_output_tokens: default_ai_max_output_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirestoreConfig {
    /// Google Cloud project hosting the Firestore database
    #[serde(default)]
    pub project_id: String,

    /// Service-account client email used for the OAuth2 JWT grant
    #[serde(default)]
    pub client_email: String,

    /// Service-account private key (PEM; `\n` escapes accepted)
    #[serde(default)]
    pub private_key: String,

    /// OAuth2 token exchange endpoint
    #[serde(default = "default_token_uri")]
    pub token_uri: String,

    /// Firestore REST base URL (overridable for the emulator)
    #[serde(default = "default_firestore_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_firestore_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FirestoreConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            client_email: String::new(),
            private_key: String::new(),
            token_uri: default_token_uri(),
            base_url: default_firestore_base_url(),
            timeout_secs: default_firestore_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Upload ceiling in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Declared content types accepted for uploads
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            allowed_content_types: default_allowed_content_types(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:8080".to_string(),
    ]
}
fn default_jwks_url() -> String {
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com"
        .to_string()
}
fn default_jwks_cache_ttl_secs() -> u64 {
    300
}
fn default_ai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_ai_model() -> String {
    "gpt-5.1".to_string()
}
fn default_ai_timeout_secs() -> u64 {
    120
}
fn default_ai_max_output_tokens() -> usize {
    4096
}
fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
fn default_firestore_base_url() -> String {
    "https://firestore.googleapis.com/v1".to_string()
}
fn default_firestore_timeout_secs() -> u64 {
    30
}
fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_allowed_content_types() -> Vec<String> {
    vec!["image/png".to_string(), "image/jpeg".to_string()]
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration manager with file discovery and environment overrides.
pub struct ConfigManager {
    config: SnapSolveConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (.env file honored)
    /// 2. Config file (snapsolve.toml)
    /// 3. Defaults
    pub fn load() -> Result<Self> {
        Self::load_dotenv();

        let (config, config_path) = Self::load_config_file()?;
        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        if let Some(ref path) = config_path {
            info!("Config file: {}", path.display());
        } else {
            info!("Config file: none (using defaults)");
        }
        info!("AI model: {}", config.ai.model);
        info!(
            "Firestore project: {}",
            if config.firestore.project_id.is_empty() {
                "<unset>"
            } else {
                &config.firestore.project_id
            }
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn config(&self) -> &SnapSolveConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
        }
    }

    /// Search order:
    /// 1. ./snapsolve.toml (current directory)
    /// 2. ~/.snapsolve/config.toml (user config)
    /// 3. Defaults
    fn load_config_file() -> Result<(SnapSolveConfig, Option<PathBuf>)> {
        let local_config = Path::new("snapsolve.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".snapsolve").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((SnapSolveConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<SnapSolveConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SnapSolveError::Config(format!("failed to read {}: {e}", path.display())))?;

        toml::from_str(&content)
            .map_err(|e| SnapSolveError::Config(format!("failed to parse {}: {e}", path.display())))
    }

    fn apply_env_overrides(mut config: SnapSolveConfig) -> SnapSolveConfig {
        if let Ok(host) = std::env::var("SNAPSOLVE_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("SNAPSOLVE_PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Ok(origins) = std::env::var("SNAPSOLVE_ALLOWED_ORIGINS") {
            config.server.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(level) = std::env::var("SNAPSOLVE_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.ai.api_key = key;
        }
        if let Ok(model) = std::env::var("SNAPSOLVE_AI_MODEL") {
            config.ai.model = model;
        }
        if let Ok(url) = std::env::var("SNAPSOLVE_AI_BASE_URL") {
            config.ai.base_url = url;
        }

        if let Ok(project) = std::env::var("FIREBASE_PROJECT_ID") {
            config.auth.project_id = project.clone();
            config.firestore.project_id = project;
        }
        if let Ok(email) = std::env::var("FIREBASE_CLIENT_EMAIL") {
            config.firestore.client_email = email;
        }
        if let Ok(key) = std::env::var("FIREBASE_PRIVATE_KEY") {
            config.firestore.private_key = key;
        }
        if let Ok(url) = std::env::var("SNAPSOLVE_FIRESTORE_BASE_URL") {
            config.firestore.base_url = url;
        }

        config
    }

    fn validate_config(config: &SnapSolveConfig) -> Result<()> {
        if config.server.port == 0 {
            return Err(SnapSolveError::Config("server.port must be non-zero".into()));
        }
        if config.limits.max_upload_bytes == 0 {
            return Err(SnapSolveError::Config(
                "limits.max_upload_bytes must be non-zero".into(),
            ));
        }
        if config.limits.allowed_content_types.is_empty() {
            return Err(SnapSolveError::Config(
                "limits.allowed_content_types must not be empty".into(),
            ));
        }
        Ok(())
    }
}
