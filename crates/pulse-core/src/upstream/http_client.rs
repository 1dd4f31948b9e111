use bytes::Bytes;
use reqwest::{Client, ClientBuilder};
use std::{sync::Arc, time::Duration};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::errors::{FetchError, SkipReason};

const MAX_ERROR_BODY: usize = 256;

/// Configuration for HTTP client concurrency and timeout behavior.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum number of concurrent HTTP requests allowed
    pub concurrent_limit: usize,
    /// Permit acquisition timeout in milliseconds
    pub permit_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            concurrent_limit: 64,
            permit_timeout_ms: 500,
            user_agent: concat!("pulse/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A fully described upstream call, produced by a response normalizer.
///
/// Headers may carry credentials, so the request is never logged as a whole.
#[derive(Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Bytes>,
}

impl UpstreamRequest {
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self { method: HttpMethod::Get, url: url.into(), headers: Vec::new(), body: None }
    }

    #[must_use]
    pub fn post_json(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: vec![("content-type", "application/json".to_string())],
            body: Some(body.into()),
        }
    }

    #[must_use]
    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

impl std::fmt::Debug for UpstreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamRequest")
            .field("method", &self.method)
            .field("headers", &self.headers.iter().map(|(name, _)| *name).collect::<Vec<_>>())
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .finish_non_exhaustive()
    }
}

/// HTTP client with semaphore-based concurrency control.
///
/// Each instance owns its own permit pool, so two clients never starve each other. A call is a
/// single attempt: retries belong to the fetcher.
pub struct HttpClient {
    client: Client,
    concurrent_limit: Arc<Semaphore>,
    config: HttpClientConfig,
}

/// RAII guard ensuring semaphore permits are always released.
struct PermitGuard {
    _permit: OwnedSemaphorePermit,
    semaphore: Arc<Semaphore>,
}

impl PermitGuard {
    fn new(permit: OwnedSemaphorePermit, semaphore: Arc<Semaphore>) -> Self {
        Self { _permit: permit, semaphore }
    }

    fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        tracing::trace!(
            available_permits = self.semaphore.available_permits(),
            "permit guard dropped"
        );
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_config(HttpClientConfig::default())
    }

    /// Creates a new HTTP client with the specified concurrency limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn with_concurrency_limit(concurrent_limit: usize) -> Result<Self, FetchError> {
        Self::with_config(HttpClientConfig { concurrent_limit, ..Default::default() })
    }

    /// Creates a new HTTP client with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn with_config(config: HttpClientConfig) -> Result<Self, FetchError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(16)
            .connect_timeout(Duration::from_secs(5))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::limited(3))
            .user_agent(config.user_agent.clone())
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                FetchError::Transport(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            concurrent_limit: Arc::new(Semaphore::new(config.concurrent_limit)),
            config,
        })
    }

    /// Sanitizes network errors to prevent information disclosure.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_timeout() {
            "connection timed out".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_decode() {
            "response decode error".to_string()
        } else if error.is_redirect() {
            "too many redirects".to_string()
        } else {
            "network error".to_string()
        }
    }

    fn truncate_body(raw: &[u8]) -> String {
        let text = String::from_utf8_lossy(raw);
        if text.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated)", &text[..end])
        } else {
            text.into_owned()
        }
    }

    /// Sends one request and returns the 2xx response body.
    ///
    /// `timeout` bounds the whole exchange including the body read.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Skipped`] with [`SkipReason::PoolExhausted`] if no permit frees up in
    ///   time; no request was sent
    /// - [`FetchError::Timeout`] if the request times out
    /// - [`FetchError::Upstream`] for non-success HTTP status codes
    /// - [`FetchError::Transport`] for network-related failures (sanitized)
    pub async fn send(
        &self,
        request: &UpstreamRequest,
        timeout: Duration,
    ) -> Result<Bytes, FetchError> {
        let permit = tokio::time::timeout(
            Duration::from_millis(self.config.permit_timeout_ms),
            Arc::clone(&self.concurrent_limit).acquire_owned(),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                available_permits = self.concurrent_limit.available_permits(),
                "http client semaphore acquisition timeout"
            );
            FetchError::Skipped(SkipReason::PoolExhausted)
        })?
        .map_err(|_| FetchError::Transport("http client closed".to_string()))?;

        let permit_guard = PermitGuard::new(permit, Arc::clone(&self.concurrent_limit));

        tracing::trace!(
            available_permits = permit_guard.available_permits(),
            "http request started"
        );

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }
        if let Some(body) = &request.body {
            // Bytes::clone is a refcount bump
            builder = builder.body(body.clone());
        }

        let response = builder.timeout(timeout).send().await.map_err(Self::map_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(Self::map_error)?;

        tracing::trace!(
            status = status.as_u16(),
            available_permits = permit_guard.available_permits(),
            "http request completed"
        );

        if status.is_success() {
            Ok(body)
        } else {
            Err(FetchError::Upstream {
                status: status.as_u16(),
                message: Self::truncate_body(&body),
            })
        }
    }

    fn map_error(error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Transport(Self::sanitize_network_error(&error))
        }
    }

    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.concurrent_limit.available_permits()
    }

    #[must_use]
    pub fn concurrent_limit(&self) -> usize {
        self.config.concurrent_limit
    }
}
