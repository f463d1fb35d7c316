//! Traits for the transport adapter and injectable delays.

use async_trait::async_trait;
use hdcp_core::caps::RxStatus;
use hdcp_core::error::Result;
use hdcp_protocol::Field;
use std::time::Duration;

/// Moves logical protocol fields to and from the receiver.
///
/// DisplayPort adapters map each [`Field`] to its register window. IIA
/// adapters only ever see [`Field::Message`] and move whole framed messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one field (or one whole IIA message).
    async fn send(&self, field: Field, bytes: &[u8]) -> Result<()>;

    /// Read one field. `len` is exact for fixed fields and an upper bound
    /// for whole IIA messages.
    async fn recv(&self, field: Field, len: usize) -> Result<Vec<u8>>;

    /// Receiver status bits (READY, H' available, pairing available,
    /// REAUTH_REQ, link integrity failure).
    async fn poll_status(&self) -> Result<RxStatus>;

    /// Enable or disable content encryption on the link.
    async fn set_encryption(&self, enabled: bool) -> Result<()>;
}

/// Suspension used between polls.
#[async_trait]
pub trait Delay: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock delays.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Returns immediately; for tests and simulation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

#[async_trait]
impl Delay for NoDelay {
    async fn sleep(&self, _duration: Duration) {
        tokio::task::yield_now().await;
    }
}
