//! Radio driver trait abstraction for pluggable link backends

use super::{SignalQuality, TransportError};
use async_trait::async_trait;

/// One physical (or simulated) half-duplex radio
///
/// The driver moves raw payload bytes; framing, encryption, and role
/// enforcement live above it in [`super::RadioTransport`].
#[async_trait]
pub trait RadioDriver: Send {
    /// Transmit one payload, fire-and-forget
    async fn transmit(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// Bounded-wait poll for one pending payload
    ///
    /// Returns `None` when nothing is pending; must not block longer than a
    /// small fraction of the protocol interval.
    async fn poll(&mut self) -> Result<Option<(Vec<u8>, SignalQuality)>, TransportError>;

    /// Human-readable name for this link
    fn name(&self) -> &'static str;
}
