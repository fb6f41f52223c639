//! Log-based readiness wait
//!
//! Follows a started container's combined stdout/stderr and returns once a
//! target substring has appeared anywhere in the output seen so far. Frames
//! are accumulated as raw bytes, so a match may span frames (and split UTF-8
//! sequences). There is no implicit timeout: callers bound the wait with a
//! [`CancellationToken`] or an explicit timeout.

use crate::docker::EngineBridge;
use crate::error::{ProvisionError, Result};
use bollard::container::LogsOptions;
use futures::StreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct ReadinessWaiter<'a> {
    engine: &'a dyn EngineBridge,
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl<'a> ReadinessWaiter<'a> {
    pub fn new(engine: &'a dyn EngineBridge) -> Self {
        Self {
            engine,
            cancel: CancellationToken::new(),
            timeout: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Blocks until `pattern` shows up in the container's log output.
    pub async fn wait_for(&self, container_id: &str, pattern: &str) -> Result<()> {
        info!(container_id = %container_id, pattern = %pattern, "Waiting for log line");

        let wait = self.follow_logs(container_id, pattern);
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| ProvisionError::ReadinessTimeout {
                    container_id: container_id.to_string(),
                    pattern: pattern.to_string(),
                    timeout,
                })?,
            None => wait.await,
        }
    }

    async fn follow_logs(&self, container_id: &str, pattern: &str) -> Result<()> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };
        let mut stream = self.engine.logs_stream(container_id, options);
        let mut log = LogBuffer::new(pattern);

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(interrupted(container_id, pattern)),
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(output)) => {
                    if log.push(&output.into_bytes()) {
                        info!(container_id = %container_id, "Log line found, container ready");
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(ProvisionError::engine("logs")(e)),
                None => {
                    // The stream only ends once the container has stopped; the
                    // line can no longer appear, but the wait has no deadline of its own.
                    warn!(
                        container_id = %container_id,
                        bytes_seen = log.len(),
                        "Log stream ended before the awaited line appeared"
                    );
                    self.cancel.cancelled().await;
                    return Err(interrupted(container_id, pattern));
                }
            }
        }
    }
}

fn interrupted(container_id: &str, pattern: &str) -> ProvisionError {
    debug!(container_id = %container_id, pattern = %pattern, "Readiness wait cancelled");
    ProvisionError::Interrupted {
        container_id: container_id.to_string(),
        pattern: pattern.to_string(),
    }
}

/// Accumulated log bytes plus an incremental substring search.
struct LogBuffer<'p> {
    pattern: &'p [u8],
    bytes: Vec<u8>,
}

impl<'p> LogBuffer<'p> {
    fn new(pattern: &'p str) -> Self {
        Self {
            pattern: pattern.as_bytes(),
            bytes: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Appends a frame and reports whether the pattern is now present.
    /// Only the region a new match could touch is searched.
    fn push(&mut self, frame: &[u8]) -> bool {
        let start = self
            .bytes
            .len()
            .saturating_sub(self.pattern.len().saturating_sub(1));
        self.bytes.extend_from_slice(frame);
        contains(&self.bytes[start..], self.pattern)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|window| window == needle)
}
