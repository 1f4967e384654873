//! Bearer token resolution for the Google APIs
//!
//! Resolution order, decided once at startup: explicit token from
//! `GCP_ACCESS_TOKEN`, token file from `GCP_ACCESS_TOKEN_FILE`, then
//! the GCE metadata server when running inside Google Cloud. Validity
//! is only checked when a token is first used.

use serde::Deserialize;
use skyfleet_cloud::{ProviderError, ProviderKind, Result};
use tracing::debug;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Where bearer tokens come from for this process
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// Fixed token handed in through the environment
    Static(String),
    /// Fetch from the GCE metadata server per call
    Metadata,
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
}

impl TokenSource {
    /// Resolve the source from the environment. Never fails: when no
    /// token is configured the metadata server is assumed, and a
    /// process outside GCE gets `AuthFailed` on first use.
    pub fn from_env() -> Self {
        if let Ok(token) = std::env::var("GCP_ACCESS_TOKEN") {
            let token = token.trim().to_string();
            if !token.is_empty() {
                debug!("using GCP token from environment");
                return TokenSource::Static(token);
            }
        }
        if let Ok(path) = std::env::var("GCP_ACCESS_TOKEN_FILE") {
            if let Ok(token) = std::fs::read_to_string(path.trim()) {
                let token = token.trim().to_string();
                if !token.is_empty() {
                    debug!("using GCP token from file");
                    return TokenSource::Static(token);
                }
            }
        }
        debug!("no GCP token configured, falling back to metadata server");
        TokenSource::Metadata
    }

    /// Current bearer token for an outgoing request
    pub async fn bearer(&self, client: &reqwest::Client) -> Result<String> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Metadata => {
                let resp = client
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|e| {
                        ProviderError::auth_failed(
                            ProviderKind::Gcp,
                            "token",
                            "no token configured and the metadata server is unreachable",
                        )
                        .with_cause(e)
                    })?;
                if !resp.status().is_success() {
                    return Err(ProviderError::auth_failed(
                        ProviderKind::Gcp,
                        "token",
                        format!("metadata server returned HTTP {}", resp.status().as_u16()),
                    ));
                }
                let token: MetadataToken = resp.json().await.map_err(|e| {
                    ProviderError::auth_failed(
                        ProviderKind::Gcp,
                        "token",
                        "malformed metadata token response",
                    )
                    .with_cause(e)
                })?;
                Ok(token.access_token)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_token_wins_over_metadata() {
        temp_env::with_vars(
            [
                ("GCP_ACCESS_TOKEN", Some("ya29.token")),
                ("GCP_ACCESS_TOKEN_FILE", None::<&str>),
            ],
            || {
                let source = TokenSource::from_env();
                assert!(matches!(source, TokenSource::Static(t) if t == "ya29.token"));
            },
        );
    }

    #[test]
    fn token_file_is_read_and_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "ya29.from-file\n").unwrap();
        temp_env::with_vars(
            [
                ("GCP_ACCESS_TOKEN", None::<String>),
                (
                    "GCP_ACCESS_TOKEN_FILE",
                    Some(path.to_string_lossy().into_owned()),
                ),
            ],
            || {
                let source = TokenSource::from_env();
                assert!(matches!(source, TokenSource::Static(t) if t == "ya29.from-file"));
            },
        );
    }

    #[test]
    fn absent_env_falls_back_to_metadata() {
        temp_env::with_vars(
            [
                ("GCP_ACCESS_TOKEN", None::<&str>),
                ("GCP_ACCESS_TOKEN_FILE", None::<&str>),
            ],
            || {
                assert!(matches!(TokenSource::from_env(), TokenSource::Metadata));
            },
        );
    }
}
