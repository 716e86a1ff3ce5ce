//! Companion-app telemetry hub
//!
//! The app-facing boundary of the base device: live rover updates fan out
//! to subscribers as plain unencrypted records, the current registry and
//! configuration are readable on demand, and configuration writes and
//! device commands flow back in. The transport carrying this channel (BLE
//! on the real hardware) is outside the core; here it is a set of typed
//! channels any transport can be glued onto.

use crate::config::ConfigStore;
use crate::registry::{RoverRegistry, RoverSnapshot};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::Instant;
use tracing::debug;

/// One live update pushed to the companion app when a frame is ingested
#[derive(Debug, Clone, Serialize)]
pub struct RoverUpdate {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: u64,
    pub satellites: Option<u32>,
    pub rssi_dbm: i16,
}

/// Inbound writes from the companion app
#[derive(Debug, Clone)]
pub enum ConfigCommand {
    /// Apply dotted-key configuration entries
    Update(serde_json::Map<String, Value>),
    /// Factory-reset stored preferences
    Reset,
    /// Restart the device
    Reboot,
}

/// Hub wiring the registry and config store to the companion-app channel
#[derive(Clone)]
pub struct TelemetryHub {
    updates: broadcast::Sender<RoverUpdate>,
    commands: mpsc::Sender<ConfigCommand>,
    registry: Arc<RwLock<RoverRegistry>>,
    config: Arc<ConfigStore>,
}

impl TelemetryHub {
    /// Create the hub; the returned receiver is the device-side command inbox
    pub fn new(
        registry: Arc<RwLock<RoverRegistry>>,
        config: Arc<ConfigStore>,
    ) -> (Self, mpsc::Receiver<ConfigCommand>) {
        let (updates, _) = broadcast::channel(32);
        let (commands, command_rx) = mpsc::channel(16);

        (
            Self {
                updates,
                commands,
                registry,
                config,
            },
            command_rx,
        )
    }

    /// Push one rover update to all subscribers; no subscribers is fine
    pub fn publish(&self, update: RoverUpdate) {
        debug!("telemetry -> {}", update.device_id);
        let _ = self.updates.send(update);
    }

    /// Subscribe to live rover updates
    pub fn subscribe(&self) -> broadcast::Receiver<RoverUpdate> {
        self.updates.subscribe()
    }

    /// Sender half the companion-app transport writes into
    pub fn command_sender(&self) -> mpsc::Sender<ConfigCommand> {
        self.commands.clone()
    }

    /// Read-only export of the current registry contents and selection
    pub async fn registry_snapshot(&self) -> Vec<RoverSnapshot> {
        self.registry.read().await.snapshot(Instant::now())
    }

    /// Registry export as a JSON document for the app
    pub async fn registry_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.registry_snapshot().await)?)
    }

    /// Current preferences as a JSON document for the app
    pub async fn config_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.config.snapshot().await)?)
    }
}
