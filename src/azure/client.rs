//! Azure Resource Manager client
//!
//! Combines credentials and the HTTP wrapper behind the [`ManagementClient`]
//! contract that expansion handlers consume.

use super::auth::AzureCredentials;
use super::http::AzureHttpClient;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use std::time::Duration;

/// Public cloud management endpoint
pub const DEFAULT_MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";

/// Executor for bearer-authenticated management API requests.
///
/// `path` is either an ARM path with query (`/subscriptions?api-version=...`),
/// resolved against the client's endpoint, or an absolute URL such as an ARM
/// `nextLink`. Implementations must be safe to share between concurrent
/// expansions.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    async fn do_request(&self, method: Method, path: &str) -> Result<String>;
}

/// Main ARM client
#[derive(Clone)]
pub struct ArmClient {
    pub credentials: AzureCredentials,
    pub http: AzureHttpClient,
    endpoint: String,
}

impl ArmClient {
    /// Create a new ARM client
    pub fn new(
        credentials: AzureCredentials,
        endpoint: &str,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        Ok(Self {
            credentials,
            http: AzureHttpClient::new(timeout)?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the URL for an ARM path; absolute URLs pass through unchanged
    pub fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.endpoint, path)
        } else {
            format!("{}/{}", self.endpoint, path)
        }
    }
}

#[async_trait]
impl ManagementClient for ArmClient {
    async fn do_request(&self, method: Method, path: &str) -> Result<String> {
        let token = self.credentials.get_token().await?;
        let url = self.resolve_url(path);
        self.http.send(method, &url, &token).await
    }
}
