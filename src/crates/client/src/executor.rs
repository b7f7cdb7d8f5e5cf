//! Retrying HTTP executor.
//!
//! One call to [`RequestExecutor::execute`] makes up to `retries + 1`
//! attempts, each bounded by the spec's timeout, classifying every failure
//! into the [`GatewayError`] taxonomy. Retries happen strictly before any
//! response body is exposed; a streaming body is handed off raw and
//! unbuffered the moment its headers arrive.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::Method;
use tokio::time::timeout;

use crate::error::{GatewayError, GatewayResult};
use crate::retry::RetryPolicy;

/// Cap on error-body text carried inside a classified error.
const ERROR_BODY_LIMIT: usize = 300;

/// Raw response byte channel for streaming media types.
pub type ByteStream = Pin<Box<dyn Stream<Item = GatewayResult<Bytes>> + Send>>;

/// Immutable description of one request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub streaming: bool,
}

impl RequestSpec {
    pub fn post(url: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            method: Method::POST,
            url: url.into(),
            headers,
            body: None,
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            streaming: false,
        }
    }

    pub fn json_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn bearer(mut self, token: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            self.headers.insert(AUTHORIZATION, value);
        }
        self
    }

    /// Request an event-stream response and mark the spec as streaming.
    pub fn event_stream(mut self) -> Self {
        self.headers
            .insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        self.streaming = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Materialized response, negotiated on the declared media type.
pub enum ResponsePayload {
    /// `application/json`, fully parsed.
    Json(serde_json::Value),
    /// `text/event-stream`, handed off unbuffered.
    EventStream(ByteStream),
    /// Other text media, read to completion.
    Text(String),
    /// Anything else, read to completion.
    Bytes(Bytes),
}

impl std::fmt::Debug for ResponsePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponsePayload::Json(v) => f.debug_tuple("Json").field(v).finish(),
            ResponsePayload::EventStream(_) => f.write_str("EventStream(..)"),
            ResponsePayload::Text(t) => f.debug_tuple("Text").field(t).finish(),
            ResponsePayload::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
        }
    }
}

/// Issues single logical requests with retry, classification and backoff.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    client: reqwest::Client,
}

impl RequestExecutor {
    pub fn new() -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Unknown {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Execute `spec`, retrying transient failures per its policy.
    ///
    /// On ceiling exhaustion the last classified error is returned with its
    /// url and attempt count intact.
    pub async fn execute(&self, spec: &RequestSpec) -> GatewayResult<ResponsePayload> {
        let mut attempt: u32 = 1;
        loop {
            match self.attempt_once(spec, attempt).await {
                Ok(payload) => return Ok(payload),
                Err(error) => {
                    let decision = spec.retry.decide(&error, attempt);
                    if !decision.should_retry {
                        return Err(error);
                    }
                    warn!(
                        "Attempt {} for {} failed ({}), retrying in {:?}",
                        attempt, spec.url, error, decision.delay
                    );
                    tokio::time::sleep(decision.delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One attempt, bounded by the spec timeout. The deadline aborts the
    /// in-flight call; for streaming responses it covers everything up to the
    /// handoff of the byte channel, after which no retry is possible anyway.
    async fn attempt_once(&self, spec: &RequestSpec, attempt: u32) -> GatewayResult<ResponsePayload> {
        let fut = self.send_and_materialize(spec, attempt);
        match timeout(spec.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                url: spec.url.clone(),
                attempts: attempt,
            }),
        }
    }

    async fn send_and_materialize(
        &self,
        spec: &RequestSpec,
        attempt: u32,
    ) -> GatewayResult<ResponsePayload> {
        let mut request = self
            .client
            .request(spec.method.clone(), &spec.url)
            .headers(spec.headers.clone());
        if let Some(body) = &spec.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::from_transport(&e, &spec.url, attempt))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(
                status.as_u16(),
                &spec.url,
                attempt,
                retry_after,
                truncate(&message),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        debug!("{} {} -> {} ({})", spec.method, spec.url, status, content_type);

        if content_type.starts_with("text/event-stream") {
            let url = spec.url.clone();
            let stream = response.bytes_stream().map(move |chunk| {
                chunk.map_err(|e| GatewayError::Network {
                    url: url.clone(),
                    attempts: 1,
                    message: e.to_string(),
                })
            });
            return Ok(ResponsePayload::EventStream(Box::pin(stream)));
        }

        if content_type.starts_with("application/json") {
            let text = response
                .text()
                .await
                .map_err(|e| GatewayError::from_transport(&e, &spec.url, attempt))?;
            let value = serde_json::from_str(&text).map_err(|e| GatewayError::Parse {
                message: format!("invalid JSON from {}: {e}", spec.url),
            })?;
            return Ok(ResponsePayload::Json(value));
        }

        if content_type.starts_with("text/") {
            let text = response
                .text()
                .await
                .map_err(|e| GatewayError::from_transport(&e, &spec.url, attempt))?;
            return Ok(ResponsePayload::Text(text));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::from_transport(&e, &spec.url, attempt))?;
        Ok(ResponsePayload::Bytes(bytes))
    }
}

/// Parse `Retry-After` as delta-seconds or an HTTP-date. A date already in
/// the past collapses to zero rather than disappearing.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = chrono::DateTime::parse_from_rfc2822(raw).ok()?;
    let delta = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

fn truncate(message: &str) -> String {
    if message.len() <= ERROR_BODY_LIMIT {
        message.to_string()
    } else {
        let mut end = ERROR_BODY_LIMIT;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &message[..end])
    }
}
