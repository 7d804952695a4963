//! Azure Authentication
//!
//! Supplies bearer tokens for the management API. Tokens either come from
//! the environment (`AZURE_ACCESS_TOKEN`) or from the Azure CLI, which is
//! asked for a fresh token whenever the cached one is close to expiry.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Environment variable holding a pre-acquired bearer token
pub const ACCESS_TOKEN_ENV: &str = "AZURE_ACCESS_TOKEN";

/// Resource the management tokens are issued for
pub const MANAGEMENT_RESOURCE: &str = "https://management.azure.com/";

/// Token expiry buffer - refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Where tokens come from
#[derive(Clone)]
enum TokenSource {
    Static(String),
    AzureCli,
}

/// Azure credentials holder with token caching
#[derive(Clone)]
pub struct AzureCredentials {
    source: TokenSource,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// Subset of `az account get-access-token --output json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    /// Unix timestamp, present in newer CLI versions
    #[serde(default, rename = "expires_on")]
    expires_on: Option<i64>,
    /// Local time string, e.g. "2024-01-01 12:00:00.000000"
    #[serde(default, rename = "expiresOn")]
    expires_on_local: Option<String>,
}

impl AzureCredentials {
    /// Use a token that was acquired elsewhere
    pub fn with_static_token(token: impl Into<String>) -> Self {
        Self {
            source: TokenSource::Static(token.into()),
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Prefer `AZURE_ACCESS_TOKEN`, falling back to the Azure CLI
    pub fn from_environment() -> Self {
        match std::env::var(ACCESS_TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => {
                tracing::info!("Using bearer token from {}", ACCESS_TOKEN_ENV);
                Self::with_static_token(token.trim())
            }
            _ => Self {
                source: TokenSource::AzureCli,
                token_cache: Arc::new(RwLock::new(None)),
            },
        }
    }

    /// Get an access token for API calls
    /// Security: Checks token expiry before returning cached token
    pub async fn get_token(&self) -> Result<String> {
        if let TokenSource::Static(token) = &self.source {
            return Ok(token.clone());
        }

        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let cached = fetch_cli_token().await?;
        let token = cached.token.clone();
        *self.token_cache.write().await = Some(cached);

        Ok(token)
    }
}

async fn fetch_cli_token() -> Result<CachedToken> {
    let output = tokio::process::Command::new("az")
        .args([
            "account",
            "get-access-token",
            "--resource",
            MANAGEMENT_RESOURCE,
            "--output",
            "json",
        ])
        .output()
        .await
        .context("Failed to run the Azure CLI. Install it and run 'az login'")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::error!(
            "az account get-access-token failed: {}",
            super::http::sanitize_for_log(&stderr)
        );
        return Err(anyhow::anyhow!("Azure CLI could not issue a token. Run 'az login'"));
    }

    let parsed: CliToken =
        serde_json::from_slice(&output.stdout).context("Failed to parse Azure CLI token output")?;
    let expires_at = token_expiry(&parsed) - chrono::Duration::from_std(TOKEN_EXPIRY_BUFFER)?;

    tracing::debug!("New token cached, expires at {}", expires_at);

    Ok(CachedToken {
        token: parsed.access_token,
        expires_at,
    })
}

/// Expiry of a CLI token; conservative 5 minutes when the CLI does not say
fn token_expiry(token: &CliToken) -> DateTime<Utc> {
    if let Some(ts) = token.expires_on.and_then(|s| DateTime::from_timestamp(s, 0)) {
        return ts;
    }
    token
        .expires_on_local
        .as_deref()
        .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok())
        .and_then(|naive| naive.and_local_timezone(chrono::Local).single())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| Utc::now() + chrono::Duration::minutes(5))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_is_returned_verbatim() {
        let creds = AzureCredentials::with_static_token("abc");
        assert_eq!(creds.get_token().await.unwrap(), "abc");
    }

    #[test]
    fn test_cli_token_prefers_unix_expiry() {
        let token: CliToken = serde_json::from_str(
            r#"{"accessToken":"t","expires_on":1704067200,
                "expiresOn":"2030-01-01 00:00:00.000000"}"#,
        )
        .unwrap();
        assert_eq!(token_expiry(&token).timestamp(), 1_704_067_200);
    }

    #[test]
    fn test_cli_token_without_expiry_gets_short_lifetime() {
        let token: CliToken = serde_json::from_str(r#"{"accessToken":"t"}"#).unwrap();
        let expiry = token_expiry(&token);
        assert!(expiry > Utc::now());
        assert!(expiry < Utc::now() + chrono::Duration::minutes(6));
    }
}
