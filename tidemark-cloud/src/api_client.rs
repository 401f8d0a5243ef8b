//! HTTP client for the Tidemark REST API.
//!
//! Every response is wrapped in `{ success, data?, error? }`. A non-2xx
//! status or `success: false` is a failure; otherwise the caller gets `data`.
//! The access token is read from the [`TokenVault`] on every request, so a
//! refresh or logout elsewhere takes effect immediately.

use crate::config::SyncConfig;
use crate::error::{CloudError, CloudResult};
use crate::types::ApiEnvelope;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tidemark_storage::{Method, TokenVault};
use tracing::debug;

/// The remote authority, as seen by the drainer and the reconciler.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Issues one request and returns the envelope's `data`.
    async fn send(&self, method: Method, url: &str, body: Option<&Value>)
    -> CloudResult<Option<Value>>;

    /// GETs a resource; a missing `data` reads as `null`.
    async fn fetch(&self, url: &str) -> CloudResult<Value> {
        Ok(self.send(Method::Get, url, None).await?.unwrap_or(Value::Null))
    }
}

/// reqwest-backed [`RemoteApi`].
pub struct ApiClient {
    client: Client,
    base_url: String,
    vault: TokenVault,
}

impl ApiClient {
    pub fn new(config: &SyncConfig, vault: TokenVault) -> CloudResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            vault,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URLs pass through; paths are joined to the base URL.
    pub fn resolve(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }
}

#[async_trait]
impl RemoteApi for ApiClient {
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> CloudResult<Option<Value>> {
        let target = self.resolve(url);
        let mut request = self.client.request(http_method(method), &target);
        match self.vault.access_token().await {
            Some(token) => request = request.bearer_auth(token),
            None => debug!("no access token for {method} {url}"),
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiEnvelope<Value>>(&text)
                .ok()
                .and_then(|env| env.error)
                .map(|e| e.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            debug!("{method} {url} failed with {status}");
            return Err(CloudError::Status {
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(None);
        }

        let envelope: ApiEnvelope<Value> = serde_json::from_str(&text)
            .map_err(|e| CloudError::Api(format!("malformed response from {url}: {e}")))?;
        if !envelope.success {
            let error = envelope.error.unwrap_or_default();
            return Err(CloudError::Rejected {
                code: error.code,
                message: error.message,
            });
        }
        Ok(envelope.data)
    }
}

fn http_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}
