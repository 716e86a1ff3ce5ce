//! Device configuration store
//!
//! Preferences are persisted as a JSON file and loaded once at startup;
//! the companion-app channel mutates them through dotted-key updates
//! (`radio.frequency_mhz`, `button.tap_ms`, ...) exactly as they arrive
//! from the configuration characteristic. Components never read ambient
//! state: they take a [`TrackerConfig`] snapshot and are rebuilt when the
//! store signals a change.

use anyhow::{anyhow, Context, Result};
use pawtrack_proto::protocol::MAX_DEVICE_ID_LEN;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

/// Which side of the radio link this device is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Broadcasts its own position
    Rover,
    /// Listens for rover broadcasts and tracks them
    Base,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Rover => write!(f, "rover"),
            Role::Base => write!(f, "base"),
        }
    }
}

/// Configuration-time faults; the affected component refuses to start
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("encryption secret is empty")]
    EmptySecret,

    #[error("device id is empty")]
    EmptyDeviceId,

    #[error("button thresholds inverted: tap_ms {tap_ms} >= long_ms {long_ms}")]
    BadThresholds { tap_ms: u64, long_ms: u64 },

    #[error("max_rovers must be at least 1")]
    ZeroCapacity,
}

/// Radio link parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Carrier frequency in MHz
    pub frequency_mhz: f64,
    /// Bandwidth in kHz
    pub bandwidth_khz: u32,
    /// LoRa spreading factor
    pub spreading_factor: u8,
    /// Transmit power in dBm
    pub tx_power_dbm: i8,
    /// Seconds between rover position broadcasts
    pub tx_interval_secs: u64,
    /// Minimum seconds between two transmissions, regardless of caller
    pub rate_limit_secs: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_mhz: 902.5,
            bandwidth_khz: 250,
            spreading_factor: 7,
            tx_power_dbm: 5,
            tx_interval_secs: 5,
            rate_limit_secs: 5,
        }
    }
}

/// Button gesture thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonConfig {
    /// Releases faster than this are taps
    pub tap_ms: u64,
    /// Holds at least this long are long presses (boundary inclusive)
    pub long_ms: u64,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            tap_ms: 1000,
            long_ms: 5000,
        }
    }
}

/// Full device configuration snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Stable identifier broadcast in every frame (rover) / shown per rover (base)
    pub device_id: String,
    /// Device role; changing it rebuilds the radio transport
    pub role: Role,
    /// Shared XOR key; must match on both ends of a deployment
    pub secret: String,
    pub radio: RadioConfig,
    pub button: ButtonConfig,
    /// Registry capacity; least-recently-seen entry is evicted on overflow
    pub max_rovers: usize,
    /// Substitute fixed bench coordinates for the GPS receiver
    pub mock_gps: bool,
    /// Arm the loop-liveness watchdog
    pub watchdog: bool,
    /// Raise default log verbosity to debug
    pub debug: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            role: Role::Base,
            secret: "pawtrack-default".into(),
            radio: RadioConfig::default(),
            button: ButtonConfig::default(),
            max_rovers: 32,
            mock_gps: false,
            watchdog: true,
            debug: false,
        }
    }
}

impl TrackerConfig {
    /// Check the invariants the rest of the firmware relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if self.device_id.is_empty() {
            return Err(ConfigError::EmptyDeviceId);
        }
        if self.button.tap_ms >= self.button.long_ms {
            return Err(ConfigError::BadThresholds {
                tap_ms: self.button.tap_ms,
                long_ms: self.button.long_ms,
            });
        }
        if self.max_rovers == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }

    /// Apply a batch of dotted-key updates, e.g. `radio.tx_interval_secs = 10`
    ///
    /// The whole batch is applied onto a JSON view of the config and
    /// deserialized back, so a bad value rejects the batch without leaving
    /// the config half-mutated.
    pub fn apply_update(&mut self, entries: &serde_json::Map<String, Value>) -> Result<()> {
        let mut view = serde_json::to_value(&*self).context("config serialization")?;

        for (key, value) in entries {
            let mut value = value.clone();
            if key == "device_id" {
                value = truncate_device_id(value);
            }
            set_dotted(&mut view, key, value)?;
            info!("config update: {} set", key);
        }

        let updated: TrackerConfig =
            serde_json::from_value(view).context("updated config does not deserialize")?;
        *self = updated;
        Ok(())
    }
}

/// Cap an incoming device id at the wire limit
fn truncate_device_id(value: Value) -> Value {
    match value {
        Value::String(s) if s.len() > MAX_DEVICE_ID_LEN => {
            let truncated: String = s.chars().take(MAX_DEVICE_ID_LEN).collect();
            warn!("device id longer than {} chars, using {}", MAX_DEVICE_ID_LEN, truncated);
            Value::String(truncated)
        }
        other => other,
    }
}

/// Set a dotted-path key inside a JSON object tree, creating intermediate
/// objects as needed
fn set_dotted(root: &mut Value, key: &str, value: Value) -> Result<()> {
    let mut current = root;
    let mut parts = key.split('.').peekable();

    while let Some(part) = parts.next() {
        if part.is_empty() {
            return Err(anyhow!("empty path segment in config key '{}'", key));
        }

        let map = current
            .as_object_mut()
            .ok_or_else(|| anyhow!("config key '{}' traverses a non-object", key))?;

        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return Ok(());
        }

        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }

    unreachable!("split always yields at least one segment")
}

/// Load preferences from disk, falling back to defaults
///
/// A missing or unreadable file is recreated with defaults; a device in the
/// field must come up even if its preferences were corrupted.
pub fn load_or_default(path: &Path) -> TrackerConfig {
    let mut config = match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<TrackerConfig>(&raw) {
            Ok(config) => {
                info!("preferences loaded from {}", path.display());
                config
            }
            Err(e) => {
                warn!("invalid preferences file {}, recreating with defaults: {}", path.display(), e);
                TrackerConfig::default()
            }
        },
        Err(_) => {
            info!("preferences file {} not found, creating with defaults", path.display());
            TrackerConfig::default()
        }
    };

    if config.device_id.is_empty() {
        config.device_id = generate_device_id(config.role);
        info!("generated device id {}", config.device_id);
    }

    if let Err(e) = save(path, &config) {
        warn!("could not save preferences: {}", e);
    }

    config
}

/// Persist preferences to disk
pub fn save(path: &Path, config: &TrackerConfig) -> Result<()> {
    let raw = serde_json::to_string_pretty(config).context("config serialization")?;
    std::fs::write(path, raw).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Default device id when none is configured: role prefix plus a random
/// hex suffix, mirroring the factory naming scheme
fn generate_device_id(role: Role) -> String {
    let prefix = match role {
        Role::Rover => "TX",
        Role::Base => "RX",
    };
    format!("{}{:06X}", prefix, rand::random::<u32>() & 0xFF_FFFF)
}

/// Shared configuration store with change notification
///
/// The store is the single writer of the live config; everyone else works
/// from snapshots and rebuilds when the generation counter moves.
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<TrackerConfig>,
    generation: watch::Sender<u64>,
}

impl ConfigStore {
    /// Wrap a validated config; refuses to construct around unsafe state
    pub fn new(path: PathBuf, config: TrackerConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let (generation, _) = watch::channel(0);

        Ok(Arc::new(Self {
            path,
            current: RwLock::new(config),
            generation,
        }))
    }

    /// Current configuration snapshot
    pub async fn snapshot(&self) -> TrackerConfig {
        self.current.read().await.clone()
    }

    /// Subscribe to change notifications (generation counter)
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Apply a batch of dotted-key updates, persist, and notify observers
    ///
    /// A batch producing an invalid config is rejected whole; the live
    /// config is untouched.
    pub async fn apply_update(
        &self,
        entries: &serde_json::Map<String, Value>,
    ) -> Result<TrackerConfig> {
        let mut guard = self.current.write().await;

        let mut candidate = guard.clone();
        candidate.apply_update(entries)?;
        candidate.validate().map_err(|e| anyhow!(e))?;

        *guard = candidate.clone();
        drop(guard);

        if let Err(e) = save(&self.path, &candidate) {
            warn!("could not persist preferences: {}", e);
        }
        self.generation.send_modify(|g| *g += 1);

        Ok(candidate)
    }

    /// Reset preferences to factory defaults (deletes the stored file)
    pub async fn reset(&self) -> Result<TrackerConfig> {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("could not delete preferences file {}: {}", self.path.display(), e);
        }

        let fresh = load_or_default(&self.path);
        fresh.validate().map_err(|e| anyhow!(e))?;

        *self.current.write().await = fresh.clone();
        self.generation.send_modify(|g| *g += 1);

        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> TrackerConfig {
        TrackerConfig {
            device_id: "RX000001".into(),
            ..Default::default()
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pawtrack-test-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let radio = RadioConfig::default();
        assert_eq!(radio.frequency_mhz, 902.5);
        assert_eq!(radio.bandwidth_khz, 250);
        assert_eq!(radio.spreading_factor, 7);
        assert_eq!(radio.tx_power_dbm, 5);
        assert_eq!(radio.tx_interval_secs, 5);

        let button = ButtonConfig::default();
        assert_eq!(button.tap_ms, 1000);
        assert_eq!(button.long_ms, 5000);
    }

    #[test]
    fn test_validate_rejects_empty_secret() {
        let config = TrackerConfig {
            secret: String::new(),
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptySecret)));
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let config = TrackerConfig {
            button: ButtonConfig {
                tap_ms: 5000,
                long_ms: 1000,
            },
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BadThresholds { .. })));
    }

    #[test]
    fn test_dotted_key_update() {
        let mut config = valid_config();

        let mut entries = serde_json::Map::new();
        entries.insert("radio.tx_interval_secs".into(), Value::from(10));
        entries.insert("role".into(), Value::from("rover"));
        entries.insert("mock_gps".into(), Value::from(true));

        config.apply_update(&entries).expect("update failed");
        assert_eq!(config.radio.tx_interval_secs, 10);
        assert_eq!(config.role, Role::Rover);
        assert!(config.mock_gps);
    }

    #[test]
    fn test_bad_value_rejects_whole_batch() {
        let mut config = valid_config();
        let before = config.clone();

        let mut entries = serde_json::Map::new();
        entries.insert("radio.tx_interval_secs".into(), Value::from(10));
        entries.insert("role".into(), Value::from("satellite"));

        assert!(config.apply_update(&entries).is_err());
        assert_eq!(config, before);
    }

    #[test]
    fn test_device_id_truncated_to_wire_limit() {
        let mut config = valid_config();

        let mut entries = serde_json::Map::new();
        entries.insert("device_id".into(), Value::from("a-very-long-device-identifier"));

        config.apply_update(&entries).expect("update failed");
        assert_eq!(config.device_id.len(), MAX_DEVICE_ID_LEN);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let path = temp_path("roundtrip");
        let mut config = valid_config();
        config.radio.frequency_mhz = 868.1;
        config.role = Role::Rover;

        save(&path, &config).expect("save failed");
        let loaded = load_or_default(&path);
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_generates_id() {
        let path = temp_path("missing");
        std::fs::remove_file(&path).ok();

        let loaded = load_or_default(&path);
        std::fs::remove_file(&path).ok();

        assert!(loaded.device_id.starts_with("RX"));
        assert!(!loaded.device_id.is_empty());
    }

    #[tokio::test]
    async fn test_store_notifies_on_update() {
        let path = temp_path("store");
        let store = ConfigStore::new(path.clone(), valid_config()).expect("store failed");
        let mut changes = store.subscribe();

        let mut entries = serde_json::Map::new();
        entries.insert("debug".into(), Value::from(true));
        store.apply_update(&entries).await.expect("update failed");
        std::fs::remove_file(&path).ok();

        assert!(changes.has_changed().expect("watch closed"));
        assert!(store.snapshot().await.debug);
    }

    #[tokio::test]
    async fn test_store_rejects_unsafe_update() {
        let path = temp_path("unsafe");
        let store = ConfigStore::new(path.clone(), valid_config()).expect("store failed");

        let mut entries = serde_json::Map::new();
        entries.insert("secret".into(), Value::from(""));
        assert!(store.apply_update(&entries).await.is_err());
        std::fs::remove_file(&path).ok();

        // Live config untouched
        assert!(!store.snapshot().await.secret.is_empty());
    }
}
