//! HTTP transport with bounded retries
//!
//! Retries only what is worth retrying: connection failures, timeouts,
//! interrupted bodies, HTTP 429 and 5xx. Every other status aborts at once.

use crate::config::HttpConfig;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// One fully described upstream request
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub url: String,
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl PageRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            url: url.into(),
            method: Method::Post,
            query: Vec::new(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Streams a response body into a file
#[async_trait]
pub trait Transport: Send + Sync {
    /// Download the response to `dest`, truncating it first, and return the
    /// number of bytes written
    async fn download(&self, request: &PageRequest, dest: &Path) -> Result<u64>;
}

enum AttemptError {
    Retryable(String),
    Fatal(IngestError),
}

impl From<std::io::Error> for AttemptError {
    fn from(e: std::io::Error) -> Self {
        AttemptError::Fatal(e.into())
    }
}

fn classify(e: reqwest::Error) -> AttemptError {
    if e.is_connect() || e.is_timeout() || e.is_body() || e.is_request() {
        AttemptError::Retryable(e.to_string())
    } else {
        AttemptError::Fatal(e.into())
    }
}

/// `reqwest`-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    max_attempts: u32,
    retry_delay: Duration,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(config.accept_invalid_certs);

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        if config.accept_invalid_certs {
            warn!("TLS certificate verification is disabled");
        }

        Ok(Self {
            client: builder.build()?,
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay,
        })
    }

    async fn attempt(&self, request: &PageRequest, dest: &Path) -> std::result::Result<u64, AttemptError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(AttemptError::Retryable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(AttemptError::Fatal(IngestError::HttpStatus {
                url: request.url.clone(),
                status: status.as_u16(),
            }));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify)?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(&self, request: &PageRequest, dest: &Path) -> Result<u64> {
        let mut last_reason = String::new();

        for attempt in 1..=self.max_attempts {
            debug!(url = %request.url, attempt, max_attempts = self.max_attempts, "Requesting page");

            match self.attempt(request, dest).await {
                Ok(bytes) => return Ok(bytes),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable(reason)) => {
                    if attempt < self.max_attempts {
                        let delay = self.retry_delay * attempt;
                        warn!(
                            url = %request.url,
                            attempt,
                            max_attempts = self.max_attempts,
                            reason = %reason,
                            retry_in = ?delay,
                            "Request failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_reason = reason;
                },
            }
        }

        Err(IngestError::TransportFailure {
            url: request.url.clone(),
            attempts: self.max_attempts,
            reason: last_reason,
        })
    }
}
