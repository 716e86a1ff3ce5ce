//! UDP broadcast development link
//!
//! Stands in for the LoRa radio when running on a workstation: rover-side
//! endpoints broadcast datagrams on the local network, base-side endpoints
//! listen on the link port. Receive-side RSSI is synthesized, since an IP
//! link has none to report.

use super::{RadioDriver, SignalQuality, TransportError};
use async_trait::async_trait;
use rand::Rng;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// Default port for the development link
pub const DEFAULT_LINK_PORT: u16 = 47901;

/// Largest datagram accepted from the link
const RECV_BUF_SIZE: usize = 512;

/// How long one poll waits before reporting "nothing pending"
const POLL_WAIT: Duration = Duration::from_millis(100);

/// UDP datagram stand-in for the LoRa link
pub struct UdpLink {
    socket: UdpSocket,
    target: Option<SocketAddr>,
    buf: Vec<u8>,
}

impl UdpLink {
    /// Transmit-side endpoint broadcasting to the link port
    pub async fn transmitter(port: u16) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        debug!("udp link transmitter up, broadcasting to port {}", port);

        Ok(Self {
            socket,
            target: Some(SocketAddr::from((Ipv4Addr::BROADCAST, port))),
            buf: vec![0u8; RECV_BUF_SIZE],
        })
    }

    /// Receive-side endpoint listening on the link port
    pub async fn receiver(port: u16) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        debug!("udp link receiver up on port {}", port);

        Ok(Self {
            socket,
            target: None,
            buf: vec![0u8; RECV_BUF_SIZE],
        })
    }
}

#[async_trait]
impl RadioDriver for UdpLink {
    async fn transmit(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let target = self
            .target
            .ok_or(TransportError::Hardware("endpoint is receive-side"))?;
        self.socket.send_to(payload, target).await?;
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<(Vec<u8>, SignalQuality)>, TransportError> {
        match timeout(POLL_WAIT, self.socket.recv_from(&mut self.buf)).await {
            Ok(Ok((len, _addr))) => {
                let quality = SignalQuality {
                    rssi_dbm: synth_rssi(),
                };
                Ok(Some((self.buf[..len].to_vec(), quality)))
            }
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => Ok(None),
        }
    }

    fn name(&self) -> &'static str {
        "udp-dev-link"
    }
}

/// Plausible close-range LoRa RSSI for the simulated link
fn synth_rssi() -> i16 {
    rand::thread_rng().gen_range(-75..=-40)
}
