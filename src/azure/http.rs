//! HTTP utilities for Azure REST API calls

use anyhow::{Context, Result};
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use uuid::Uuid;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Header ARM echoes back for request correlation
pub const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// A non-2xx reply from an Azure endpoint
#[derive(Debug, thiserror::Error)]
#[error("{method} {url} failed with status {status}")]
pub struct ApiError {
    pub method: Method,
    pub url: String,
    pub status: StatusCode,
}

/// HTTP client wrapper for Azure API calls
#[derive(Clone)]
pub struct AzureHttpClient {
    client: Client,
}

impl AzureHttpClient {
    /// Create a new HTTP client
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder =
            Client::builder().user_agent(concat!("tazure/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Underlying transport, shared with data-plane handlers
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Send a bearer-authenticated request and return the raw response body
    pub async fn send(&self, method: Method, url: &str, token: &str) -> Result<String> {
        let request_id = Uuid::new_v4();
        tracing::debug!("{} {} (request id {})", method, url, request_id);

        let response = self
            .client
            .request(method.clone(), url)
            .bearer_auth(token)
            .header(CLIENT_REQUEST_ID_HEADER, request_id.to_string())
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        read_body(method, url, response).await
    }
}

/// Read a response body, turning non-2xx statuses into [`ApiError`]
pub(crate) async fn read_body(
    method: Method,
    url: &str,
    response: reqwest::Response,
) -> Result<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("Failed to read response body from {}", url))?;

    if !status.is_success() {
        // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
        tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
        return Err(ApiError {
            method,
            url: url.to_string(),
            status,
        }
        .into());
    }

    Ok(body)
}

/// Format an Azure API error for display
/// Security: Sanitizes error messages to avoid leaking sensitive API details
pub fn format_azure_error(error: &anyhow::Error) -> String {
    if let Some(api) = error.chain().find_map(|e| e.downcast_ref::<ApiError>()) {
        return match api.status.as_u16() {
            401 => "Authentication failed. Run 'az login'.".to_string(),
            403 => "Permission denied. Check your Azure role assignments.".to_string(),
            404 => "Resource not found.".to_string(),
            409 => "Resource conflict. The resource may already exist or be in use.".to_string(),
            429 => "Rate limit exceeded. Please try again later.".to_string(),
            400 => "Invalid request. Check your parameters.".to_string(),
            500 | 502 | 503 => {
                "Azure service temporarily unavailable. Please try again.".to_string()
            }
            _ => "Request failed. Check your network connection and try again.".to_string(),
        };
    }

    // Outermost context only; inner causes may carry URLs with secrets
    let error_str = error.to_string();
    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(80)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}
