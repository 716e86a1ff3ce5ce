//! Role-aware radio transport
//!
//! Wraps a [`RadioDriver`] in either transmit-only (rover) or receive-only
//! (base) mode. The device is half-duplex and single-role; switching roles
//! means dropping the transport and constructing a new one from a fresh
//! config snapshot.

pub mod driver;
pub mod mock;
pub mod udp;

pub use driver::RadioDriver;

use crate::config::{RadioConfig, Role};
use thiserror::Error;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Link quality metadata attached to every received payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalQuality {
    /// Received signal strength in dBm
    pub rssi_dbm: i16,
}

/// Per-operation radio faults; logged and survived, never fatal
#[derive(Error, Debug)]
pub enum TransportError {
    /// Send attempted before the rate limit window elapsed
    #[error("radio busy: next transmit allowed in {0:?}")]
    Busy(Duration),

    /// Operation not available in the transport's current mode
    #[error("operation invalid for {0} mode")]
    WrongMode(&'static str),

    /// Link-level I/O failure
    #[error("radio I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link backend is gone
    #[error("radio hardware fault: {0}")]
    Hardware(&'static str),
}

/// Tolerance for timer jitter when enforcing the send rate limit
const RATE_LIMIT_SLACK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    TxOnly,
    RxOnly,
}

/// Role-aware wrapper over one radio link
pub struct RadioTransport {
    driver: Box<dyn RadioDriver>,
    mode: Mode,
    min_send_gap: Duration,
    last_send: Option<Instant>,
}

impl RadioTransport {
    /// Construct the transport for the given role
    pub fn for_role(role: Role, config: &RadioConfig, driver: Box<dyn RadioDriver>) -> Self {
        let mode = match role {
            Role::Rover => Mode::TxOnly,
            Role::Base => Mode::RxOnly,
        };
        debug!(
            "radio transport up: link={} mode={:?} freq={}MHz bw={}kHz sf={} pwr={}dBm",
            driver.name(),
            mode,
            config.frequency_mhz,
            config.bandwidth_khz,
            config.spreading_factor,
            config.tx_power_dbm,
        );

        Self {
            driver,
            mode,
            min_send_gap: Duration::from_secs(config.rate_limit_secs),
            last_send: None,
        }
    }

    /// Transmit one encrypted frame, at-most-once
    ///
    /// Throttled sends and link faults are per-operation failures; the
    /// periodic re-broadcast is the retry mechanism.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if self.mode != Mode::TxOnly {
            return Err(TransportError::WrongMode("receive-only"));
        }

        if let Some(last) = self.last_send {
            let elapsed = last.elapsed();
            // Slack keeps interval-timer jitter from throttling a tick that
            // lands a few milliseconds early
            if elapsed + RATE_LIMIT_SLACK < self.min_send_gap {
                return Err(TransportError::Busy(self.min_send_gap - elapsed));
            }
        }

        self.driver.transmit(payload).await?;
        self.last_send = Some(Instant::now());
        debug!("tx-> {} bytes", payload.len());
        Ok(())
    }

    /// Bounded-wait poll for one received payload with its signal quality
    pub async fn poll(&mut self) -> Result<Option<(Vec<u8>, SignalQuality)>, TransportError> {
        if self.mode != Mode::RxOnly {
            return Err(TransportError::WrongMode("transmit-only"));
        }

        self.driver.poll().await
    }

    /// Name of the underlying link
    pub fn link_name(&self) -> &'static str {
        self.driver.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RadioConfig;

    fn test_radio_config() -> RadioConfig {
        RadioConfig {
            rate_limit_secs: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_base_mode_rejects_send() {
        let (rover, _base) = mock::pair(-50);
        let mut transport =
            RadioTransport::for_role(Role::Base, &test_radio_config(), Box::new(rover));

        let result = transport.send(b"payload").await;
        assert!(matches!(result, Err(TransportError::WrongMode(_))));
    }

    #[tokio::test]
    async fn test_rover_mode_rejects_poll() {
        let (rover, _base) = mock::pair(-50);
        let mut transport =
            RadioTransport::for_role(Role::Rover, &test_radio_config(), Box::new(rover));

        let result = transport.poll().await;
        assert!(matches!(result, Err(TransportError::WrongMode(_))));
    }

    #[tokio::test]
    async fn test_rate_limit_throttles_second_send() {
        let (rover, mut base) = mock::pair(-50);
        let mut transport =
            RadioTransport::for_role(Role::Rover, &test_radio_config(), Box::new(rover));

        transport.send(b"first").await.expect("first send failed");
        let result = transport.send(b"second").await;
        assert!(matches!(result, Err(TransportError::Busy(_))));

        // Only the first payload made it onto the link
        let (payload, quality) = base.poll().await.expect("poll failed").expect("no payload");
        assert_eq!(payload, b"first");
        assert_eq!(quality.rssi_dbm, -50);
        assert!(base.poll().await.expect("poll failed").is_none());
    }
}
