use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use snapsolve_core::{AuthUser, Result, SnapSolveError, TokenVerifier};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// A single signing key as served by the identity provider's JWKS endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Jwk {
    pub kid: String,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub kty: String,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
    #[serde(default)]
    pub k: Option<String>,
}

/// Where signing keys come from: a fixed set (tests, local development) or a
/// JWKS endpoint refreshed on a TTL.
#[derive(Clone, Debug)]
pub enum KeySource {
    Static(Vec<Jwk>),
    Http { url: String, cache_ttl: Duration },
}

#[derive(Clone, Debug)]
pub struct VerifierConfig {
    pub issuer: String,
    pub audience: Vec<String>,
    pub algorithms: Vec<jsonwebtoken::Algorithm>,
    pub key_source: KeySource,
}

impl VerifierConfig {
    /// Configuration for Firebase-issued ID tokens: issuer and audience are
    /// derived from the project id, keys come from the Google securetoken
    /// JWKS endpoint, RS256 only.
    pub fn firebase(project_id: &str, jwks_url: &str, cache_ttl: Duration) -> Self {
        Self {
            issuer: format!("https://securetoken.google.com/{project_id}"),
            audience: vec![project_id.to_string()],
            algorithms: vec![jsonwebtoken::Algorithm::RS256],
            key_source: KeySource::Http {
                url: jwks_url.to_string(),
                cache_ttl,
            },
        }
    }

    /// Configuration backed by a fixed key set. Used by tests and local
    /// development where no identity provider is reachable.
    pub fn with_static_keys(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        algorithms: Vec<jsonwebtoken::Algorithm>,
        keys: Vec<Jwk>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: vec![audience.into()],
            algorithms,
            key_source: KeySource::Static(keys),
        }
    }
}

#[derive(Clone)]
struct CachedKeys {
    keys: HashMap<String, Jwk>,
    expires_at: Option<Instant>,
}

/// Verifies bearer ID tokens against the configured issuer.
///
/// Signing keys are resolved by `kid` and cached between requests; a
/// verification failure is surfaced immediately, there is no retry.
pub struct IdTokenVerifier {
    config: VerifierConfig,
    client: Option<reqwest::Client>,
    cache: RwLock<Option<CachedKeys>>,
}

impl IdTokenVerifier {
    pub fn new(config: VerifierConfig) -> Result<Self> {
        let client = match &config.key_source {
            KeySource::Http { .. } => Some(reqwest::Client::new()),
            KeySource::Static(_) => None,
        };
        Ok(Self {
            config,
            client,
            cache: RwLock::new(None),
        })
    }

    async fn ensure_keys(&self) -> Result<()> {
        let needs_refresh = {
            let guard = self.cache.read();
            match guard.as_ref() {
                Some(cache) => match cache.expires_at {
                    Some(expiry) => expiry <= Instant::now(),
                    None => false,
                },
                None => true,
            }
        };
        if !needs_refresh {
            return Ok(());
        }

        let cache = match &self.config.key_source {
            KeySource::Static(keys) => CachedKeys {
                keys: keys.iter().map(|k| (k.kid.clone(), k.clone())).collect(),
                expires_at: None,
            },
            KeySource::Http { url, cache_ttl } => {
                let client = self.client.as_ref().ok_or_else(|| {
                    SnapSolveError::Upstream("http client not initialised".into())
                })?;
                let response = client.get(url).send().await.map_err(|err| {
                    SnapSolveError::Upstream(format!("jwks fetch error: {err}"))
                })?;
                if !response.status().is_success() {
                    return Err(SnapSolveError::Upstream(format!(
                        "jwks fetch status: {}",
                        response.status()
                    )));
                }
                let body: JwkSet = response.json().await.map_err(|err| {
                    SnapSolveError::Upstream(format!("jwks decode error: {err}"))
                })?;
                tracing::debug!(keys = body.keys.len(), "refreshed signing keys");
                CachedKeys {
                    keys: body.keys.into_iter().map(|k| (k.kid.clone(), k)).collect(),
                    expires_at: Some(Instant::now() + *cache_ttl),
                }
            }
        };

        let mut guard = self.cache.write();
        *guard = Some(cache);
        Ok(())
    }

    fn select_algorithm(&self, alg: Option<&str>) -> Result<jsonwebtoken::Algorithm> {
        if let Some(alg) = alg {
            let parsed: jsonwebtoken::Algorithm = alg.parse().map_err(|_| {
                SnapSolveError::Unauthenticated(format!("unsupported jwk algorithm: {alg}"))
            })?;
            if self.config.algorithms.contains(&parsed) {
                return Ok(parsed);
            }
            return Err(SnapSolveError::Unauthenticated(format!(
                "algorithm {alg} not allowed"
            )));
        }
        self.config
            .algorithms
            .first()
            .cloned()
            .ok_or_else(|| SnapSolveError::Unauthenticated("no algorithms configured".into()))
    }

    fn decoding_key(&self, jwk: &Jwk) -> Result<jsonwebtoken::DecodingKey> {
        match jwk.kty.as_str() {
            "RSA" => {
                let n = jwk.n.as_ref().ok_or_else(|| {
                    SnapSolveError::Unauthenticated("jwks rsa modulus missing".into())
                })?;
                let e = jwk.e.as_ref().ok_or_else(|| {
                    SnapSolveError::Unauthenticated("jwks rsa exponent missing".into())
                })?;
                jsonwebtoken::DecodingKey::from_rsa_components(n, e).map_err(|err| {
                    SnapSolveError::Unauthenticated(format!("failed to build rsa key: {err}"))
                })
            }
            "oct" => {
                let secret = jwk.k.as_ref().ok_or_else(|| {
                    SnapSolveError::Unauthenticated("jwks secret missing".into())
                })?;
                let bytes = base64::engine::general_purpose::URL_SAFE
                    .decode(secret)
                    .map_err(|err| {
                        SnapSolveError::Unauthenticated(format!("secret decode error: {err}"))
                    })?;
                Ok(jsonwebtoken::DecodingKey::from_secret(&bytes))
            }
            other => Err(SnapSolveError::Unauthenticated(format!(
                "unsupported jwk key type: {other}"
            ))),
        }
    }

    async fn get_key(
        &self,
        kid: Option<&str>,
    ) -> Result<(jsonwebtoken::DecodingKey, jsonwebtoken::Algorithm)> {
        self.ensure_keys().await?;
        let guard = self.cache.read();
        let cache = guard
            .as_ref()
            .ok_or_else(|| SnapSolveError::Upstream("jwks cache missing".into()))?;
        let kid = kid.ok_or_else(|| {
            SnapSolveError::Unauthenticated("token missing kid header".into())
        })?;
        let jwk = cache
            .keys
            .get(kid)
            .ok_or_else(|| SnapSolveError::Unauthenticated("matching jwk not found".into()))?
            .clone();
        drop(guard);
        let alg = self.select_algorithm(jwk.alg.as_deref())?;
        let key = self.decoding_key(&jwk)?;
        Ok((key, alg))
    }

    fn build_validation(&self, alg: jsonwebtoken::Algorithm) -> jsonwebtoken::Validation {
        let mut validation = jsonwebtoken::Validation::new(alg);
        validation.set_required_spec_claims(&["exp", "iat"]);
        validation.validate_exp = true;
        validation.set_issuer(std::slice::from_ref(&self.config.issuer));
        if !self.config.audience.is_empty() {
            validation.set_audience(&self.config.audience);
        } else {
            validation.validate_aud = false;
        }
        validation
    }
}

#[async_trait]
impl TokenVerifier for IdTokenVerifier {
    async fn verify(&self, token: &str) -> Result<AuthUser> {
        let header = jsonwebtoken::decode_header(token).map_err(|err| {
            SnapSolveError::Unauthenticated(format!("invalid token header: {err}"))
        })?;
        let (key, alg) = self.get_key(header.kid.as_deref()).await?;
        let validation = self.build_validation(alg);

        let data = jsonwebtoken::decode::<IdTokenClaims>(token, &key, &validation)
            .map_err(|err| {
                SnapSolveError::Unauthenticated(format!("token verification failed: {err}"))
            })?;

        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(SnapSolveError::Unauthenticated(
                "token subject missing".into(),
            ));
        }

        tracing::info!(uid = %claims.sub, "user authenticated");

        Ok(AuthUser {
            uid: claims.sub,
            email: claims.email,
            name: claims.name,
            email_verified: claims.email_verified,
        })
    }
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

#[derive(Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}
