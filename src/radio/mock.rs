//! In-memory link pair for tests
//!
//! Two endpoints joined by unbounded channels; whatever one side transmits
//! the other side polls out, stamped with a fixed RSSI.

use super::{RadioDriver, SignalQuality, TransportError};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// One endpoint of an in-memory radio link
pub struct MockRadio {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    rssi_dbm: i16,
}

/// Create two connected endpoints reporting the given RSSI on receive
pub fn pair(rssi_dbm: i16) -> (MockRadio, MockRadio) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    (
        MockRadio {
            tx: a_tx,
            rx: b_rx,
            rssi_dbm,
        },
        MockRadio {
            tx: b_tx,
            rx: a_rx,
            rssi_dbm,
        },
    )
}

#[async_trait]
impl RadioDriver for MockRadio {
    async fn transmit(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.tx
            .send(payload.to_vec())
            .map_err(|_| TransportError::Hardware("peer endpoint dropped"))
    }

    async fn poll(&mut self) -> Result<Option<(Vec<u8>, SignalQuality)>, TransportError> {
        match timeout(Duration::from_millis(10), self.rx.recv()).await {
            Ok(Some(payload)) => Ok(Some((
                payload,
                SignalQuality {
                    rssi_dbm: self.rssi_dbm,
                },
            ))),
            // Peer gone or nothing pending; both are "no data now"
            Ok(None) | Err(_) => Ok(None),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
