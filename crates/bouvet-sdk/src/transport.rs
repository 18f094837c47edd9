//! HTTP transport session.
//!
//! One pooled [`reqwest::Client`] per SDK client. Every call here is a
//! single attempt; retries live in [`crate::retry`].

use crate::config::ClientConfig;
use crate::error::{Result, SdkError};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// User agent sent on every call.
const USER_AGENT: &str = concat!("bouvet-sdk/", env!("CARGO_PKG_VERSION"));

/// Bodies longer than this are cut when attached to errors.
const MAX_ERROR_BODY: usize = 4096;

/// Pooled HTTP session bound to one platform.
#[derive(Debug, Clone)]
pub(crate) struct Transport {
    http: reqwest::Client,
    config: ClientConfig,
}

impl Transport {
    /// Build the session. Fails on invalid configuration before any I/O.
    pub(crate) fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let mut value = HeaderValue::from_str(key).map_err(|_| {
                SdkError::Configuration("API key contains invalid header characters".into())
            })?;
            value.set_sensitive(true);
            headers.insert(API_KEY_HEADER, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| SdkError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start a request with the configured per-request deadline.
    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.request_with_timeout(method, path, self.config.request_timeout)
    }

    /// Start a request with an explicit deadline.
    pub(crate) fn request_with_timeout(
        &self,
        method: Method,
        path: &str,
        timeout: Duration,
    ) -> RequestBuilder {
        self.http
            .request(method, self.config.endpoint(path))
            .timeout(timeout)
    }

    /// Start a request with no total deadline (long-lived streams).
    pub(crate) fn streaming_request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.config.endpoint(path))
    }

    /// Send one request and classify the outcome.
    ///
    /// 2xx responses are returned untouched. 5xx become [`SdkError::Server`],
    /// other statuses [`SdkError::Client`], elapsed deadlines
    /// [`SdkError::Timeout`] and everything else [`SdkError::Network`].
    pub(crate) async fn send(&self, builder: RequestBuilder, timeout: Duration) -> Result<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport_error(e, timeout))?;

        let status = response.status();
        tracing::trace!(status = status.as_u16(), url = %response.url(), "Response received");
        if status.is_success() {
            return Ok(response);
        }

        let body = match response.text().await {
            Ok(text) => truncate(text),
            Err(e) => format!("<unreadable body: {e}>"),
        };
        Err(status_error(status, body))
    }

    /// Send one request with the default deadline and decode a JSON body.
    pub(crate) async fn send_json<R: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<R> {
        let timeout = self.config.request_timeout;
        let response = self.send(builder, timeout).await?;
        decode_json(response, timeout).await
    }
}

/// Read a 2xx body and decode it.
pub(crate) async fn decode_json<R: DeserializeOwned>(response: Response, timeout: Duration) -> Result<R> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| classify_transport_error(e, timeout))?;
    tracing::trace!(body = %String::from_utf8_lossy(&bytes), "Response body");
    // Empty 2xx bodies decode as JSON null.
    let bytes: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
    Ok(serde_json::from_slice(bytes)?)
}

pub(crate) fn classify_transport_error(err: reqwest::Error, timeout: Duration) -> SdkError {
    if err.is_timeout() {
        SdkError::Timeout(timeout)
    } else if err.is_decode() {
        SdkError::Decode(err.to_string())
    } else if err.is_builder() {
        SdkError::InvalidRequest(err.to_string())
    } else {
        SdkError::Network {
            message: error_chain(&err),
            attempts: 1,
        }
    }
}

fn status_error(status: StatusCode, body: String) -> SdkError {
    if status.is_server_error() {
        SdkError::Server {
            status: status.as_u16(),
            body,
            attempts: 1,
        }
    } else {
        SdkError::Client {
            status: status.as_u16(),
            body,
        }
    }
}

/// Flatten an error and its sources into one line.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push_str("...");
    }
    body
}
