//! HTTP plumbing shared by the REST catalog adapters
//!
//! [`CatalogHttp`] wraps a `reqwest` client bound to one server base URL. It
//! applies basic authentication, turns non-success statuses into
//! [`AdapterError::Status`], and retries idempotent requests on transient
//! failures.

use reqwest::{header, Client, Method, Response, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{AdapterError, AdapterResult, ServerContext};
use crate::auth::Credentials;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Request body variants used by the catalog APIs
#[derive(Debug, Clone)]
pub enum Body {
    Empty,
    Json(serde_json::Value),
    Text {
        content: String,
        content_type: &'static str,
    },
    Bytes {
        data: Vec<u8>,
        content_type: &'static str,
    },
}

/// A request relative to the server base URL
#[derive(Debug, Clone)]
pub struct CatalogRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Body,
}

impl CatalogRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    pub fn text(mut self, content: impl Into<String>, content_type: &'static str) -> Self {
        self.body = Body::Text {
            content: content.into(),
            content_type,
        };
        self
    }

    pub fn bytes(mut self, data: Vec<u8>, content_type: &'static str) -> Self {
        self.body = Body::Bytes { data, content_type };
        self
    }

    fn is_idempotent(&self) -> bool {
        matches!(self.method, Method::GET | Method::PUT | Method::DELETE)
    }
}

/// HTTP client bound to one catalog server
#[derive(Debug, Clone)]
pub struct CatalogHttp {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    retry: RetryConfig,
}

impl CatalogHttp {
    /// Build a client for `base_url`
    ///
    /// `cookies` keeps a cookie jar across requests, needed for session-based
    /// APIs.
    pub fn new(
        base_url: &str,
        credentials: Option<Credentials>,
        context: &ServerContext,
        cookies: bool,
    ) -> AdapterResult<Self> {
        let parsed = Url::parse(base_url).map_err(|_| AdapterError::InvalidUrl(base_url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AdapterError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder()
            .timeout(context.timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(&context.user_agent)
            .cookie_store(cookies)
            .gzip(true)
            .build()
            .map_err(|source| AdapterError::Http {
                url: base_url.to_string(),
                source,
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            retry: context.retry.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a path relative to the base URL
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request once, without checking the status
    pub async fn send_raw(&self, request: &CatalogRequest) -> AdapterResult<Response> {
        let url = self.url(&request.path);
        let mut builder = self.client.request(request.method.clone(), &url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(credentials) = &self.credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }
        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(value),
            Body::Text {
                content,
                content_type,
            } => builder
                .header(header::CONTENT_TYPE, *content_type)
                .body(content.clone()),
            Body::Bytes { data, content_type } => builder
                .header(header::CONTENT_TYPE, *content_type)
                .body(data.clone()),
        };

        debug!(method = %request.method, url = %url, "Catalog request");

        builder
            .send()
            .await
            .map_err(|source| AdapterError::Http { url, source })
    }

    async fn send_checked(&self, request: &CatalogRequest) -> AdapterResult<Response> {
        let response = self.send_raw(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        Err(AdapterError::Status {
            method: request.method.to_string(),
            url,
            status: status.as_u16(),
            body: truncate(&body, 500),
        })
    }

    /// Send a request, failing on any non-success status
    ///
    /// Idempotent methods are retried on transient failures.
    pub async fn send(&self, request: CatalogRequest) -> AdapterResult<Response> {
        let retry = if request.is_idempotent() {
            self.retry.clone()
        } else {
            RetryConfig::none()
        };
        with_retry_if(
            &retry,
            || self.send_checked(&request),
            AdapterError::is_transient,
        )
        .await
    }

    /// Like [`send`](Self::send), but a `404` yields `None`
    pub async fn send_optional(&self, request: CatalogRequest) -> AdapterResult<Option<Response>> {
        match self.send(request).await {
            Ok(response) => Ok(Some(response)),
            Err(AdapterError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether a resource exists
    pub async fn exists(&self, path: &str) -> AdapterResult<bool> {
        Ok(self.send_optional(CatalogRequest::get(path)).await?.is_some())
    }

    /// Probe an endpoint, collapsing every failure to `false`
    pub async fn probe(&self, path: &str) -> bool {
        match self.send_raw(&CatalogRequest::get(path)).await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %self.url(path), error = %e, "Connection probe failed");
                false
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push_str("...");
        cut
    }
}
