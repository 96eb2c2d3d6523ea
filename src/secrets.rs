//! GitHub credential resolution.
//!
//! The token lives in Secrets Manager as a JSON document with an
//! `oAuthToken` field. It is fetched at most once per process: the cache
//! below keeps both the raw secret document and the extracted token for
//! the lifetime of the execution environment and is never refreshed, so a
//! revoked token only surfaces as a GitHub API failure on its next use.

use crate::aws::{AwsClient, SECRETS_MANAGER};
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Error codes Secrets Manager documents for GetSecretValue. Any other
/// code still fails the job; the list only drives the more specific log
/// line.
const DOCUMENTED_ERROR_CODES: &[&str] = &[
    "DecryptionFailureException",
    "InternalServiceErrorException",
    "InvalidParameterException",
    "InvalidRequestException",
    "ResourceNotFoundException",
];

/// Terminal credential-resolution failure. The rendering is the message
/// reported to the pipeline.
#[derive(Debug, Error)]
pub enum SecretError {
    /// The store rejected the request; `code` is the AWS exception name.
    #[error("Secrets Manager Error: {code}")]
    Store { code: String },
    /// The stored payload could not be decoded into a token.
    #[error("Secrets Manager Error: MalformedSecret")]
    Malformed {
        #[source]
        detail: anyhow::Error,
    },
}

/// One resolved credential: the raw secret document plus the token pulled
/// out of it. The raw document is retained for the process lifetime even
/// though only the token is read downstream.
#[derive(Debug, Clone)]
pub struct ResolvedSecret {
    pub raw: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
struct GetSecretValueResponse {
    #[serde(rename = "SecretString")]
    secret_string: Option<String>,
    #[serde(rename = "SecretBinary")]
    secret_binary: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretDocument {
    #[serde(rename = "oAuthToken")]
    oauth_token: String,
}

/// Secrets Manager wrapper for the GitHub token secret.
pub struct SecretStore {
    aws: AwsClient,
    secret_id: String,
}

impl SecretStore {
    pub fn new(aws: AwsClient, secret_id: impl Into<String>) -> Self {
        Self {
            aws,
            secret_id: secret_id.into(),
        }
    }

    /// Fetch and decode the secret. Every failure is fatal for the
    /// invocation; nothing is retried.
    pub async fn fetch(&self) -> Result<ResolvedSecret, SecretError> {
        debug!(secret_id = %self.secret_id, "fetching GitHub token secret");

        let body = json!({ "SecretId": self.secret_id }).to_string();
        let response = self
            .aws
            .json_request(&SECRETS_MANAGER, "GetSecretValue", &body)
            .await
            .map_err(|err| {
                let code = err.code().to_string();
                if DOCUMENTED_ERROR_CODES.contains(&code.as_str()) {
                    warn!(code = %code, "Secrets Manager rejected GetSecretValue");
                } else {
                    warn!(code = %code, error = %err, "unexpected Secrets Manager failure");
                }
                SecretError::Store { code }
            })?;

        let payload: GetSecretValueResponse =
            serde_json::from_str(&response).map_err(|err| SecretError::Malformed {
                detail: anyhow::Error::new(err).context("GetSecretValue response is not valid JSON"),
            })?;

        let raw = match (payload.secret_string, payload.secret_binary) {
            (Some(secret), _) => secret,
            (None, Some(encoded)) => decode_binary_secret(&encoded)?,
            (None, None) => {
                return Err(SecretError::Malformed {
                    detail: anyhow::anyhow!("secret carries neither SecretString nor SecretBinary"),
                })
            }
        };

        let document: SecretDocument =
            serde_json::from_str(&raw).map_err(|err| SecretError::Malformed {
                detail: anyhow::Error::new(err).context("secret document has no usable oAuthToken"),
            })?;

        info!("GitHub token secret resolved");

        Ok(ResolvedSecret {
            raw,
            token: document.oauth_token,
        })
    }
}

fn decode_binary_secret(encoded: &str) -> Result<String, SecretError> {
    let bytes = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|err| SecretError::Malformed {
            detail: anyhow::Error::new(err).context("SecretBinary is not valid base64"),
        })?;
    String::from_utf8(bytes).map_err(|err| SecretError::Malformed {
        detail: anyhow::Error::new(err).context("SecretBinary does not decode to text"),
    })
}

/// Process-wide, single-slot credential cache with get-or-fetch
/// semantics.
///
/// Populated on first use and reused by every later invocation in the
/// same execution environment. Concurrent first calls are serialized by
/// the once-cell, so the fetch runs at most once; a failed fetch leaves
/// the slot empty for the next invocation to try again.
pub struct TokenCache {
    slot: OnceCell<ResolvedSecret>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self {
            slot: OnceCell::new(),
        }
    }

    /// `const` constructor for a `static` process-wide cache.
    pub const fn const_new() -> Self {
        Self {
            slot: OnceCell::const_new(),
        }
    }

    /// The cached credential, when one has been resolved.
    pub fn get(&self) -> Option<&ResolvedSecret> {
        self.slot.get()
    }

    /// Return the cached credential, running `fetch` only when the slot
    /// is empty.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<&ResolvedSecret, SecretError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResolvedSecret, SecretError>>,
    {
        self.slot.get_or_try_init(fetch).await
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn secret() -> ResolvedSecret {
        ResolvedSecret {
            raw: r#"{"oAuthToken":"ghp_test"}"#.to_string(),
            token: "ghp_test".to_string(),
        }
    }

    #[tokio::test]
    async fn fetch_runs_once_per_process() {
        let cache = TokenCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let resolved = cache
                .get_or_fetch(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(secret())
                })
                .await
                .unwrap();
            assert_eq!(resolved.token, "ghp_test");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.get().is_some());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_slot_empty() {
        let cache = TokenCache::new();
        let calls = AtomicUsize::new(0);

        let err = cache
            .get_or_fetch(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SecretError::Store {
                    code: "InternalServiceErrorException".to_string(),
                })
            })
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Secrets Manager Error: InternalServiceErrorException"
        );
        assert!(cache.get().is_none());

        cache
            .get_or_fetch(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(secret())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn binary_secret_decodes_to_document() {
        let encoded = general_purpose::STANDARD.encode(r#"{"oAuthToken":"ghp_bin"}"#);
        let raw = decode_binary_secret(&encoded).unwrap();
        let document: SecretDocument = serde_json::from_str(&raw).unwrap();
        assert_eq!(document.oauth_token, "ghp_bin");
    }

    #[test]
    fn malformed_binary_secret_is_rejected() {
        let err = decode_binary_secret("not-base64!!!").unwrap_err();
        assert_eq!(err.to_string(), "Secrets Manager Error: MalformedSecret");
    }

    #[test]
    fn store_error_renders_the_code() {
        let err = SecretError::Store {
            code: "ResourceNotFoundException".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Secrets Manager Error: ResourceNotFoundException"
        );
    }
}
