use crate::context::RequestContext;
use crate::error::{Result, SwitcherError};
use crate::ratelimit::TokenBucket;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// HTTP request as the adapters describe it
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub json: Option<Value>,
    pub basic_auth: Option<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            query: Vec::new(),
            json: None,
            basic_auth: None,
        }
    }

    /// POST with a JSON body (`Content-Type: application/json`)
    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            query: Vec::new(),
            json: Some(body),
            basic_auth: None,
        }
    }

    /// Append a query parameter; values are percent-encoded on the wire
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((username.into(), password.into()));
        self
    }
}

/// HTTP response status and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body of a 2xx reply, or `HttpStatus` otherwise
    pub fn into_success(self) -> Result<String> {
        if !self.is_success() {
            return Err(SwitcherError::HttpStatus {
                status: self.status,
                body: self.body,
            });
        }
        Ok(self.body)
    }
}

/// Something that can carry an [`HttpRequest`] to a device
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, ctx: &RequestContext, request: HttpRequest) -> Result<HttpReply>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    async fn execute(&self, ctx: &RequestContext, request: HttpRequest) -> Result<HttpReply> {
        (**self).execute(ctx, request).await
    }
}

/// [`HttpTransport`] backed by a `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, ctx: &RequestContext, request: HttpRequest) -> Result<HttpReply> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }
        if let Some((username, password)) = &request.basic_auth {
            builder = builder.basic_auth(username, Some(password));
        }

        tracing::debug!("{} {} {:?}", request.method, request.url, request.query);

        ctx.run("HTTP request", async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            tracing::debug!("HTTP {} from {}: {}", status, request.url, body);
            Ok(HttpReply { status, body })
        })
        .await
    }
}

/// Wraps a transport so that requests are paced by a [`TokenBucket`]
///
/// The bucket is consulted before any I/O; when the caller's deadline cannot
/// be met the request fails with `RateLimitDeadlineExceeded` and never
/// reaches the inner transport.
pub struct RateLimitedTransport<T> {
    inner: T,
    bucket: TokenBucket,
}

impl<T: HttpTransport> RateLimitedTransport<T> {
    pub fn new(inner: T, interval: Duration, burst: u32) -> Self {
        Self {
            inner,
            bucket: TokenBucket::new(interval, burst),
        }
    }

    pub fn interval(&self) -> Duration {
        self.bucket.interval()
    }
}

#[async_trait]
impl<T: HttpTransport> HttpTransport for RateLimitedTransport<T> {
    async fn execute(&self, ctx: &RequestContext, request: HttpRequest) -> Result<HttpReply> {
        self.bucket
            .acquire(ctx)
            .await
            .map_err(|e| e.during("waiting for rate limit"))?;
        self.inner.execute(ctx, request).await
    }
}
