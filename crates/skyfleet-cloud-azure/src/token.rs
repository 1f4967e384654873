//! Client-credentials token flow for Azure Resource Manager
//!
//! One token is fetched with the app registration's client secret and
//! cached until shortly before expiry. Missing credentials are only an
//! error when a token is first needed, not at startup.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use skyfleet_cloud::{ProviderError, ProviderKind, Result};
use tokio::sync::RwLock;
use tracing::debug;

const TOKEN_SCOPE: &str = "https://management.azure.com/.default";

/// Refresh this long before the token actually expires
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct Credentials {
    tenant_id: String,
    client_id: String,
    client_secret: String,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Lazily-validated, cached ARM bearer token
pub struct TokenCache {
    credentials: Option<Credentials>,
    cached: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    /// Read the app registration from `AZURE_TENANT_ID`,
    /// `AZURE_CLIENT_ID` and `AZURE_CLIENT_SECRET`. Absence is not an
    /// error here; the first `bearer` call reports `AuthFailed`.
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let credentials = match (
            read("AZURE_TENANT_ID"),
            read("AZURE_CLIENT_ID"),
            read("AZURE_CLIENT_SECRET"),
        ) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Some(Credentials {
                tenant_id,
                client_id,
                client_secret,
            }),
            _ => None,
        };
        Self {
            credentials,
            cached: RwLock::new(None),
        }
    }

    /// Current bearer token, fetching or refreshing as needed
    pub async fn bearer(&self, client: &reqwest::Client) -> Result<String> {
        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.expires_at - Utc::now() > ChronoDuration::seconds(EXPIRY_MARGIN_SECS) {
                return Ok(cached.token.clone());
            }
        }

        let credentials = self.credentials.as_ref().ok_or_else(|| {
            ProviderError::auth_failed(
                ProviderKind::Azure,
                "token",
                "AZURE_TENANT_ID, AZURE_CLIENT_ID and AZURE_CLIENT_SECRET are not all set",
            )
        })?;

        debug!("requesting ARM token");
        let url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            credentials.tenant_id
        );
        let resp = client
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("scope", TOKEN_SCOPE),
            ])
            .send()
            .await
            .map_err(|e| {
                ProviderError::auth_failed(ProviderKind::Azure, "token", "token endpoint unreachable")
                    .with_cause(e)
            })?;
        if !resp.status().is_success() {
            return Err(ProviderError::auth_failed(
                ProviderKind::Azure,
                "token",
                format!("token endpoint returned HTTP {}", resp.status().as_u16()),
            ));
        }
        let token: TokenResponse = resp.json().await.map_err(|e| {
            ProviderError::auth_failed(ProviderKind::Azure, "token", "malformed token response")
                .with_cause(e)
        })?;

        let cached = CachedToken {
            token: token.access_token.clone(),
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
        };
        *self.cached.write().await = Some(cached);
        Ok(token.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyfleet_cloud::ErrorKind;

    #[tokio::test]
    async fn missing_credentials_fail_lazily_with_auth_failed() {
        let cache = temp_env::with_vars(
            [
                ("AZURE_TENANT_ID", None::<&str>),
                ("AZURE_CLIENT_ID", None::<&str>),
                ("AZURE_CLIENT_SECRET", None::<&str>),
            ],
            TokenCache::from_env,
        );
        // construction succeeded; only the token fetch reports the problem
        let client = reqwest::Client::new();
        let err = cache.bearer(&client).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AuthFailed);
    }

    #[test]
    fn credentials_are_trimmed() {
        let cache = temp_env::with_vars(
            [
                ("AZURE_TENANT_ID", Some(" tenant \n")),
                ("AZURE_CLIENT_ID", Some("client")),
                ("AZURE_CLIENT_SECRET", Some("secret")),
            ],
            TokenCache::from_env,
        );
        let creds = cache.credentials.expect("credentials should be present");
        assert_eq!(creds.tenant_id, "tenant");
    }
}
