//! Identity Resolution for the Tollgate API
//!
//! This module turns the API key on a request into a [`TenantIdentity`]:
//! - Credential extraction from the configured header (bearer fallback)
//! - Verification through an injected [`KeyVerifier`]
//! - Owner-to-workspace lookup through a [`WorkspaceDirectory`]
//! - Caching of resolved identities in an [`ExpiringCache`]
//!
//! Warm resolutions make no external calls. Cold resolutions make one
//! verification call and one directory lookup, shared by every concurrent
//! request carrying the same key.

use crate::directory::{DirectoryError, WorkspaceDirectory};
use crate::telemetry::metrics::record_identity_cache;
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tollgate_core::{ExecutionMode, GovernanceError, GovernanceResult, TenantIdentity};
use tollgate_storage::ExpiringCache;
use tokio::sync::OnceCell;

// ============================================================================
// CREDENTIAL EXTRACTION
// ============================================================================

/// Extract the API key from the request headers.
///
/// The configured credential header wins; `Authorization: Bearer <key>` is
/// accepted as a fallback. Empty values count as absent.
pub fn extract_credential(headers: &HeaderMap, credential_header: &str) -> Option<String> {
    let from_header = headers
        .get(credential_header)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let from_bearer = || {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    from_header.or_else(from_bearer).map(str::to_string)
}

// ============================================================================
// KEY VERIFICATION
// ============================================================================

/// Outcome of a successful verification call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub valid: bool,
    /// Owner of the key; present when `valid` is true.
    #[serde(default)]
    pub owner_id: Option<String>,
}

impl Verification {
    pub fn valid(owner_id: impl Into<String>) -> Self {
        Self {
            valid: true,
            owner_id: Some(owner_id.into()),
        }
    }

    pub fn invalid() -> Self {
        Self {
            valid: false,
            owner_id: None,
        }
    }
}

/// Errors raised by a key verifier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// The service answered with a non-2xx status or a malformed body.
    #[error("Verification transport error: {reason}")]
    Transport { reason: String },

    /// The service could not be reached at all.
    #[error("Verification service unreachable: {reason}")]
    Unreachable { reason: String },
}

/// External credential verification service.
#[async_trait]
pub trait KeyVerifier: Send + Sync {
    async fn verify(&self, key: &str) -> Result<Verification, VerifyError>;
}

/// Settings for [`HttpKeyVerifier`].
#[derive(Debug, Clone)]
pub struct HttpVerifierConfig {
    pub base_url: String,
    pub api_id: String,
    pub root_key: SecretString,
    pub timeout: Duration,
}

/// Key verifier speaking the `keys.verifyKey` HTTP protocol.
#[derive(Debug, Clone)]
pub struct HttpKeyVerifier {
    client: reqwest::Client,
    config: HttpVerifierConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyKeyRequest<'a> {
    api_id: &'a str,
    key: &'a str,
}

impl HttpKeyVerifier {
    pub fn new(config: HttpVerifierConfig) -> Result<Self, VerifyError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| VerifyError::Unreachable {
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/keys.verifyKey",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl KeyVerifier for HttpKeyVerifier {
    async fn verify(&self, key: &str) -> Result<Verification, VerifyError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.config.root_key.expose_secret())
            .json(&VerifyKeyRequest {
                api_id: &self.config.api_id,
                key,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    VerifyError::Unreachable {
                        reason: e.to_string(),
                    }
                } else {
                    VerifyError::Transport {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::Transport {
                reason: format!("verification service returned {}", status),
            });
        }

        response
            .json::<Verification>()
            .await
            .map_err(|e| VerifyError::Transport {
                reason: format!("malformed verification response: {}", e),
            })
    }
}

// ============================================================================
// IDENTITY RESOLVER
// ============================================================================

/// Outcome of one cold resolution, shared by the requests waiting on it.
type Flight = Arc<OnceCell<GovernanceResult<TenantIdentity>>>;

/// Resolves API keys to tenant identities, caching the result per key.
pub struct IdentityResolver {
    mode: ExecutionMode,
    verifier: Arc<dyn KeyVerifier>,
    directory: Arc<dyn WorkspaceDirectory>,
    cache: ExpiringCache<TenantIdentity>,
    cache_ttl: Duration,
    in_flight: DashMap<String, Flight>,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("mode", &self.mode)
            .field("cache", &self.cache)
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}

impl IdentityResolver {
    pub fn new(
        mode: ExecutionMode,
        verifier: Arc<dyn KeyVerifier>,
        directory: Arc<dyn WorkspaceDirectory>,
        cache: ExpiringCache<TenantIdentity>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            mode,
            verifier,
            directory,
            cache,
            cache_ttl,
            in_flight: DashMap::new(),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn cache(&self) -> &ExpiringCache<TenantIdentity> {
        &self.cache
    }

    /// Resolve `credential` to the workspace that owns it.
    ///
    /// Concurrent misses for the same key join one in-flight resolution, so
    /// a cold burst costs one verification call.
    pub async fn resolve(&self, credential: Option<&str>) -> GovernanceResult<TenantIdentity> {
        if self.mode == ExecutionMode::Local {
            return Ok(TenantIdentity::development());
        }

        let credential = credential
            .filter(|c| !c.is_empty())
            .ok_or(GovernanceError::MissingCredential)?;

        if let Some(identity) = self.cache.get(credential) {
            record_identity_cache("hit");
            return Ok(identity);
        }
        record_identity_cache("miss");

        let flight = self
            .in_flight
            .entry(credential.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();
        let result = flight
            .get_or_init(|| async {
                // A flight that finished just before this one started has
                // already filled the cache.
                match self.cache.get(credential) {
                    Some(identity) => Ok(identity),
                    None => self.resolve_uncached(credential).await,
                }
            })
            .await
            .clone();
        self.in_flight
            .remove_if(credential, |_, current| Arc::ptr_eq(current, &flight));
        result
    }

    async fn resolve_uncached(&self, credential: &str) -> GovernanceResult<TenantIdentity> {
        let verification = self.verifier.verify(credential).await.map_err(|e| match e {
            VerifyError::Transport { reason } => {
                GovernanceError::VerificationTransportError { reason }
            }
            VerifyError::Unreachable { reason } => {
                GovernanceError::dependency_unavailable("key-verifier", reason)
            }
        })?;

        if !verification.valid {
            return Err(GovernanceError::InvalidCredential);
        }
        let owner_id =
            verification
                .owner_id
                .ok_or_else(|| GovernanceError::VerificationTransportError {
                    reason: "valid key without owner".to_string(),
                })?;

        let identity = self
            .directory
            .find(&owner_id)
            .await
            .map_err(|e: DirectoryError| {
                GovernanceError::dependency_unavailable("workspace-directory", e)
            })?
            .ok_or_else(|| {
                tracing::warn!(%owner_id, "Verified key has no workspace");
                GovernanceError::InvalidCredential
            })?;

        tracing::debug!(
            workspace_id = %identity.workspace_id,
            plan = %identity.plan_tier,
            "Resolved API key"
        );
        Ok(self
            .cache
            .set(credential, identity, Some(self.cache_ttl)))
    }
}
