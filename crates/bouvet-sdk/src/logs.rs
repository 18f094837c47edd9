//! Log streaming for a single execution.
//!
//! The stream is pulled one line at a time: nothing is read from the socket
//! until [`LogStream::next_line`] is awaited. It ends when the platform
//! closes the connection and cannot be rewound.

use crate::client::{resource_path, BouvetClient};
use crate::error::{Result, SdkError};
use crate::retry::retry_with_policy;
use crate::transport::classify_transport_error;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Method;
use std::time::Duration;

const LOGS_PATH: &str = "/api/v1/logs";

/// Lazy sequence of log lines.
pub struct LogStream {
    execution_id: String,
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    buffer: BytesMut,
    finished: bool,
    /// Reported on transport errors.
    connect_timeout: Duration,
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("execution_id", &self.execution_id)
            .field("buffered", &self.buffer.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl LogStream {
    pub(crate) fn new(
        execution_id: impl Into<String>,
        body: BoxStream<'static, reqwest::Result<Bytes>>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            body,
            buffer: BytesMut::new(),
            finished: false,
            connect_timeout,
        }
    }

    /// Execution this stream belongs to.
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Read the next line, without its terminator.
    ///
    /// Returns `Ok(None)` once the platform has closed the stream and every
    /// buffered line has been handed out. Invalid UTF-8 is replaced.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                let line = self.buffer.split_to(pos + 1);
                return Ok(Some(decode_line(&line[..pos])));
            }
            if self.finished {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let rest = self.buffer.split();
                return Ok(Some(decode_line(&rest)));
            }
            match self.body.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    self.finished = true;
                    tracing::warn!(execution_id = %self.execution_id, error = %e, "Log stream broken");
                    return Err(classify_transport_error(e, self.connect_timeout));
                }
                None => self.finished = true,
            }
        }
    }

    /// Adapt into a [`Stream`] of lines.
    pub fn into_stream(self) -> impl Stream<Item = Result<String>> {
        stream::unfold(Some(self), |state| async move {
            let mut logs = state?;
            match logs.next_line().await {
                Ok(Some(line)) => Some((Ok(line), Some(logs))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

impl BouvetClient {
    /// Open the log stream of an execution.
    ///
    /// Opening is retried like any other call; the open stream has no total
    /// deadline.
    pub async fn stream_logs(&self, execution_id: &str) -> Result<LogStream> {
        let path = resource_path(LOGS_PATH, execution_id, "/stream")?;
        let transport = self.transport();
        let path = path.as_str();
        let connect_timeout = self.config().connect_timeout;

        let response = retry_with_policy("stream_logs", self.retry_policy(), |_| async move {
            transport
                .send(transport.streaming_request(Method::GET, path), connect_timeout)
                .await
        })
        .await
        .map_err(|e| match e {
            SdkError::Client { status: 404, body } => {
                SdkError::Resource(format!("execution {execution_id} has no logs: {body}"))
            }
            other => other,
        })?;

        tracing::debug!(execution_id, "Log stream opened");
        Ok(LogStream::new(
            execution_id,
            response.bytes_stream().boxed(),
            connect_timeout,
        ))
    }
}
