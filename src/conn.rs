use bytes::Bytes;
use rand::{Rng, thread_rng};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::channel::{Enqueued, MessageSender};
use crate::config::{ServerConfig, clamp_read_buffer};
use crate::message::{Message, acknowledgement};
use crate::state::ServerState;

const MAX_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ReadPolicy {
    pub buffer_size: usize,
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        ReadPolicy::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for ReadPolicy {
    fn from(config: &ServerConfig) -> Self {
        Self {
            buffer_size: clamp_read_buffer(config.read_buffer),
            max_retries: config.read_retries,
            base_delay: config.retry_base_delay,
        }
    }
}

impl ReadPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let step = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let jitter = if base_ms == 0 {
            0
        } else {
            thread_rng().gen_range(0..=base_ms)
        };
        step.saturating_add(Duration::from_millis(jitter)).min(MAX_BACKOFF)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFailure {
    Transient,
    Terminal,
}

pub fn classify(err: &io::Error) -> ReadFailure {
    match err.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            ReadFailure::Transient
        }
        _ => ReadFailure::Terminal,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    ReadFailed(io::ErrorKind),
    Cancelled,
    ChannelClosed,
}

/// Reads chunks from `stream` until it closes, queueing one [`Message`] per
/// read and answering each with an acknowledgement.
pub async fn handle<S>(
    mut stream: S,
    origin: String,
    tx: MessageSender,
    state: ServerState,
    cancel: CancellationToken,
    policy: &ReadPolicy,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; policy.buffer_size];
    let mut failures = 0u32;

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return CloseReason::Cancelled,
            r = stream.read(&mut buf) => r,
        };

        let n = match read {
            Ok(0) => {
                debug!(peer = %origin, "connection closed by peer");
                return CloseReason::PeerClosed;
            }
            Ok(n) => {
                failures = 0;
                n
            }
            Err(err) => match classify(&err) {
                ReadFailure::Terminal => {
                    warn!(peer = %origin, error = %err, "read error, closing connection");
                    return CloseReason::ReadFailed(err.kind());
                }
                ReadFailure::Transient => {
                    failures += 1;
                    if failures > policy.max_retries {
                        warn!(peer = %origin, error = %err, attempts = failures, "read kept failing, closing connection");
                        return CloseReason::ReadFailed(err.kind());
                    }

                    let delay = policy.backoff(failures);
                    warn!(peer = %origin, error = %err, attempt = failures, ?delay, "read error, retrying");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return CloseReason::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            },
        };

        // The buffer is reused on the next read, so the payload gets its own copy.
        let message = Message::new(origin.clone(), Bytes::copy_from_slice(&buf[..n]));
        let reply = acknowledgement(&message);
        trace!(peer = %origin, len = n, "queueing message");

        let queued = tokio::select! {
            biased;
            _ = cancel.cancelled() => return CloseReason::Cancelled,
            r = tx.enqueue(message) => r,
        };

        match queued {
            Ok(Enqueued::Accepted) => state.record_forwarded(),
            Ok(Enqueued::Dropped) => {
                state.record_dropped();
                warn!(peer = %origin, len = n, "message channel full, message dropped");
            }
            Err(_) => {
                debug!(peer = %origin, "message channel closed");
                return CloseReason::ChannelClosed;
            }
        }

        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => return CloseReason::Cancelled,
            r = stream.write_all(&reply) => r,
        };
        if let Err(err) = written {
            warn!(peer = %origin, error = %err, "failed to write reply");
        }
    }
}
