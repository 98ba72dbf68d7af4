//! Transport seam between the event hub and whatever carries frames to a
//! subscriber.
//!
//! The hub only ever sees this trait; the production implementation wraps a
//! WebSocket actor (see `ws`), tests substitute recording mocks.

use async_trait::async_trait;
use thiserror::Error;

/// Why a transport is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Graceful teardown (lobby deleted, broadcast send failed).
    Normal,
    /// Admission rejected or liveness lost (invalid token, missed
    /// heartbeats).
    PolicyViolation,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
}

/// A bidirectional text-frame channel to one subscriber.
///
/// Sends are best-effort: the hub treats any error as a dead peer and
/// removes the subscriber. `close` must be idempotent.
#[async_trait]
pub trait EventTransport: Send + Sync {
    fn is_open(&self) -> bool;

    async fn send_text(&self, frame: &str) -> Result<(), TransportError>;

    async fn close(&self, reason: CloseReason);
}
