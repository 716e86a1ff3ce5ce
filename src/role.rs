//! Role controller
//!
//! Top-level composition: takes a config snapshot, builds the radio
//! transport for the snapshot's role, and runs the matching loop until a
//! control event tears it down. Role and radio changes always rebuild the
//! transport and loop from scratch; no rover-mode state survives into
//! base mode or vice versa.

use crate::config::{ConfigStore, RadioConfig, Role, TrackerConfig};
use crate::gps::{GpsSource, MockGps, NoGps};
use crate::radio::{udp::UdpLink, RadioDriver, RadioTransport};
use crate::registry::RoverRegistry;
use crate::telemetry::{RoverUpdate, TelemetryHub};
use crate::watchdog;
use anyhow::Result;
use async_trait::async_trait;
use pawtrack_proto as proto;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Events that tear down the active role loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Enter device sleep; pending radio work is abandoned, not awaited
    Sleep,
    /// Restart: rebuild everything from the current config snapshot
    Restart,
}

/// How a role loop ended
enum LoopExit {
    Sleep,
    Rebuild,
}

/// Builds the radio link endpoint for a role
#[async_trait]
pub trait LinkFactory: Send + Sync {
    async fn build(&mut self, role: Role, config: &RadioConfig) -> Result<Box<dyn RadioDriver>>;
}

/// Production link factory: UDP broadcast development link
pub struct UdpLinkFactory {
    pub port: u16,
}

#[async_trait]
impl LinkFactory for UdpLinkFactory {
    async fn build(&mut self, role: Role, _config: &RadioConfig) -> Result<Box<dyn RadioDriver>> {
        let link = match role {
            Role::Rover => UdpLink::transmitter(self.port).await?,
            Role::Base => UdpLink::receiver(self.port).await?,
        };
        Ok(Box::new(link))
    }
}

/// Coordinates the transmit/receive loop for the configured role
pub struct RoleController {
    store: Arc<ConfigStore>,
    registry: Arc<RwLock<RoverRegistry>>,
    hub: TelemetryHub,
    links: Box<dyn LinkFactory>,
    wd_feed: Option<mpsc::Sender<()>>,
}

impl RoleController {
    pub fn new(
        store: Arc<ConfigStore>,
        registry: Arc<RwLock<RoverRegistry>>,
        hub: TelemetryHub,
        links: Box<dyn LinkFactory>,
        wd_feed: Option<mpsc::Sender<()>>,
    ) -> Self {
        Self {
            store,
            registry,
            hub,
            links,
            wd_feed,
        }
    }

    /// Run until device sleep
    ///
    /// Each pass of the outer loop owns one transport built from one config
    /// snapshot; any config change or restart discards both.
    pub async fn run(mut self, mut control: mpsc::Receiver<ControlEvent>) -> Result<()> {
        let mut config_changes = self.store.subscribe();

        loop {
            let snapshot = self.store.snapshot().await;

            if let Err(e) = snapshot.validate() {
                // Unsafe configuration: refuse to run the radio rather than
                // broadcast plaintext, but stay up for a corrective update.
                error!("radio loop refusing to start: {}", e);
                match wait_for_event(&mut control, &mut config_changes).await {
                    LoopExit::Sleep => return Ok(()),
                    LoopExit::Rebuild => continue,
                }
            }

            // The capacity bound follows the snapshot like everything else
            self.registry.write().await.set_capacity(snapshot.max_rovers);

            let driver = match self.links.build(snapshot.role, &snapshot.radio).await {
                Ok(driver) => driver,
                Err(e) => {
                    error!("could not bring up radio link: {}", e);
                    sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            let transport = RadioTransport::for_role(snapshot.role, &snapshot.radio, driver);
            info!("{} loop starting on {}", snapshot.role, transport.link_name());

            let exit = match snapshot.role {
                Role::Rover => {
                    let gps = make_gps(&snapshot);
                    self.run_rover(transport, gps, &snapshot, &mut control, &mut config_changes)
                        .await
                }
                Role::Base => {
                    self.run_base(transport, &snapshot, &mut control, &mut config_changes)
                        .await
                }
            };

            match exit {
                LoopExit::Sleep => {
                    info!("{} loop stopped for sleep", snapshot.role);
                    return Ok(());
                }
                LoopExit::Rebuild => {
                    info!("{} loop torn down, rebuilding from new snapshot", snapshot.role);
                }
            }
        }
    }

    /// Rover loop: broadcast the current fix once per interval
    async fn run_rover(
        &mut self,
        mut transport: RadioTransport,
        mut gps: Box<dyn GpsSource>,
        config: &TrackerConfig,
        control: &mut mpsc::Receiver<ControlEvent>,
        config_changes: &mut watch::Receiver<u64>,
    ) -> LoopExit {
        let mut ticker = interval(Duration::from_secs(config.radio.tx_interval_secs));
        // A tick missed while waiting on the GPS must not cause catch-up bursts
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    watchdog::feed(&self.wd_feed);
                    self.broadcast_fix(&mut transport, gps.as_mut(), config).await;
                }
                event = control.recv() => match event {
                    Some(ControlEvent::Restart) => return LoopExit::Rebuild,
                    Some(ControlEvent::Sleep) | None => return LoopExit::Sleep,
                },
                changed = config_changes.changed() => match changed {
                    Ok(()) => return LoopExit::Rebuild,
                    Err(_) => return LoopExit::Sleep,
                },
            }
        }
    }

    /// One rover tick: fix -> frame -> encode -> encrypt -> transmit
    ///
    /// Every failure here is per-tick: log, skip, and wait for the next
    /// interval. The periodic re-broadcast is the only retry mechanism.
    async fn broadcast_fix(
        &self,
        transport: &mut RadioTransport,
        gps: &mut dyn GpsSource,
        config: &TrackerConfig,
    ) {
        let Some(fix) = gps.get_fix().await else {
            debug!("no gps fix, skipping this broadcast");
            return;
        };

        let frame = fix.into_frame(&config.device_id);
        let plain = match proto::encode(&frame) {
            Ok(plain) => plain,
            Err(e) => {
                warn!("frame rejected before transmit: {}", e);
                return;
            }
        };

        let wire = match proto::encrypt(&plain, config.secret.as_bytes()) {
            Ok(wire) => wire,
            Err(e) => {
                // Validated config cannot produce this; treat as a glitch
                error!("cipher refused payload: {}", e);
                return;
            }
        };

        if let Err(e) = transport.send(&wire).await {
            warn!("transmit failed: {}", e);
        }
    }

    /// Base loop: poll, decode, and register everything heard
    async fn run_base(
        &mut self,
        mut transport: RadioTransport,
        config: &TrackerConfig,
        control: &mut mpsc::Receiver<ControlEvent>,
        config_changes: &mut watch::Receiver<u64>,
    ) -> LoopExit {
        loop {
            tokio::select! {
                polled = transport.poll() => {
                    watchdog::feed(&self.wd_feed);
                    match polled {
                        Ok(Some((wire, quality))) => {
                            self.ingest_packet(&wire, quality.rssi_dbm, config).await;
                        }
                        Ok(None) => {}
                        Err(e) => warn!("radio receive error: {}", e),
                    }
                }
                event = control.recv() => match event {
                    Some(ControlEvent::Restart) => return LoopExit::Rebuild,
                    Some(ControlEvent::Sleep) | None => return LoopExit::Sleep,
                },
                changed = config_changes.changed() => match changed {
                    Ok(()) => return LoopExit::Rebuild,
                    Err(_) => return LoopExit::Sleep,
                },
            }
        }
    }

    /// Decrypt, decode, and ingest one received payload
    ///
    /// A corrupt packet is dropped here and never reaches the registry;
    /// the loop stays up no matter what arrives.
    async fn ingest_packet(&self, wire: &[u8], rssi_dbm: i16, config: &TrackerConfig) {
        let plain = match proto::decrypt(wire, config.secret.as_bytes()) {
            Ok(plain) => plain,
            Err(e) => {
                error!("cipher refused payload: {}", e);
                return;
            }
        };

        let frame = match proto::decode(&plain) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("dropping undecodable packet ({} bytes): {}", wire.len(), e);
                return;
            }
        };

        debug!(
            "rx<- {} at ({:.6}, {:.6}) rssi {}dBm",
            frame.device_id, frame.latitude, frame.longitude, rssi_dbm
        );

        let update = RoverUpdate {
            device_id: frame.device_id.clone(),
            latitude: frame.latitude,
            longitude: frame.longitude,
            timestamp: frame.timestamp,
            satellites: frame.satellites,
            rssi_dbm,
        };

        self.registry
            .write()
            .await
            .ingest(frame, rssi_dbm, Instant::now());
        self.hub.publish(update);
    }
}

/// Pick the GPS source for a snapshot
///
/// Hardware receivers plug in through [`GpsSource`]; without one attached,
/// the rover simply never gets a fix and never transmits.
fn make_gps(config: &TrackerConfig) -> Box<dyn GpsSource> {
    if config.mock_gps {
        info!("mock gps enabled, substituting bench coordinates");
        Box::new(MockGps)
    } else {
        Box::new(NoGps)
    }
}

/// Park until something asks for a rebuild or sleep
async fn wait_for_event(
    control: &mut mpsc::Receiver<ControlEvent>,
    config_changes: &mut watch::Receiver<u64>,
) -> LoopExit {
    tokio::select! {
        event = control.recv() => match event {
            Some(ControlEvent::Restart) => LoopExit::Rebuild,
            Some(ControlEvent::Sleep) | None => LoopExit::Sleep,
        },
        changed = config_changes.changed() => match changed {
            Ok(()) => LoopExit::Rebuild,
            Err(_) => LoopExit::Sleep,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ButtonConfig;
    use crate::radio::mock::{self, MockRadio};
    use pawtrack_proto::Frame;

    struct MockLinkFactory {
        endpoint: Option<MockRadio>,
    }

    #[async_trait]
    impl LinkFactory for MockLinkFactory {
        async fn build(
            &mut self,
            _role: Role,
            _config: &RadioConfig,
        ) -> Result<Box<dyn RadioDriver>> {
            let endpoint = self
                .endpoint
                .take()
                .ok_or_else(|| anyhow::anyhow!("mock endpoint already consumed"))?;
            Ok(Box::new(endpoint))
        }
    }

    fn base_config(secret: &str) -> TrackerConfig {
        TrackerConfig {
            device_id: "RX000001".into(),
            role: Role::Base,
            secret: secret.into(),
            button: ButtonConfig::default(),
            ..Default::default()
        }
    }

    fn temp_store(name: &str, config: TrackerConfig) -> Arc<ConfigStore> {
        let path = std::env::temp_dir().join(format!(
            "pawtrack-role-test-{}-{}.json",
            name,
            std::process::id()
        ));
        ConfigStore::new(path, config).expect("store failed")
    }

    struct BaseHarness {
        store: Arc<ConfigStore>,
        registry: Arc<RwLock<RoverRegistry>>,
        hub: TelemetryHub,
        control: mpsc::Sender<ControlEvent>,
        task: tokio::task::JoinHandle<Result<()>>,
        rover_end: MockRadio,
    }

    /// Spin up a base-role controller wired to one end of a mock link
    fn start_base(name: &str, secret: &str) -> BaseHarness {
        let (rover_end, base_end) = mock::pair(-58);
        let store = temp_store(name, base_config(secret));
        let registry = Arc::new(RwLock::new(RoverRegistry::new(8)));
        let (hub, _inbox) = TelemetryHub::new(registry.clone(), store.clone());

        let controller = RoleController::new(
            store.clone(),
            registry.clone(),
            hub.clone(),
            Box::new(MockLinkFactory {
                endpoint: Some(base_end),
            }),
            None,
        );

        let (control, control_rx) = mpsc::channel(4);
        let task = tokio::spawn(controller.run(control_rx));

        BaseHarness {
            store,
            registry,
            hub,
            control,
            task,
            rover_end,
        }
    }

    async fn wait_for_registry_len(
        registry: &Arc<RwLock<RoverRegistry>>,
        len: usize,
    ) {
        for _ in 0..100 {
            if registry.read().await.len() == len {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("registry never reached {} entries", len);
    }

    fn wire_frame(frame: &Frame, key: &[u8]) -> Vec<u8> {
        proto::encrypt(&proto::encode(frame).expect("encode failed"), key)
            .expect("encrypt failed")
    }

    #[tokio::test]
    async fn test_end_to_end_rover_broadcast_reaches_base_registry() {
        let mut harness = start_base("e2e", "secret");
        let frame = Frame::new("rv1", 36.15, -95.99, 1000);

        harness
            .rover_end
            .transmit(&wire_frame(&frame, b"secret"))
            .await
            .expect("transmit failed");

        wait_for_registry_len(&harness.registry, 1).await;
        {
            let registry = harness.registry.read().await;
            let record = registry.current().expect("nothing selected");
            assert_eq!(record.frame.device_id, "rv1");
            assert!((record.frame.latitude - 36.15).abs() < 1e-9);
            assert!((record.frame.longitude - (-95.99)).abs() < 1e-9);
            assert_eq!(record.frame.timestamp, 1000);
            assert_eq!(record.rssi_dbm, -58);
        }

        harness
            .control
            .send(ControlEvent::Sleep)
            .await
            .expect("control send failed");
        harness.task.await.expect("controller panicked").expect("controller failed");
    }

    #[tokio::test]
    async fn test_garbage_packet_does_not_poison_base_loop() {
        let mut harness = start_base("garbage", "secret");

        // Garbage, then a wrong-key frame, then a valid one
        harness
            .rover_end
            .transmit(&[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x42])
            .await
            .expect("transmit failed");
        let foreign = Frame::new("intruder", 1.0, 2.0, 3);
        harness
            .rover_end
            .transmit(&wire_frame(&foreign, b"otherkey"))
            .await
            .expect("transmit failed");

        sleep(Duration::from_millis(100)).await;
        assert!(harness.registry.read().await.is_empty());

        let frame = Frame::new("rv1", 36.15, -95.99, 1000);
        harness
            .rover_end
            .transmit(&wire_frame(&frame, b"secret"))
            .await
            .expect("transmit failed");

        wait_for_registry_len(&harness.registry, 1).await;
        assert_eq!(
            harness.registry.read().await.selected_id(),
            Some("rv1")
        );

        harness.control.send(ControlEvent::Sleep).await.expect("control send failed");
        harness.task.await.expect("controller panicked").expect("controller failed");
    }

    #[tokio::test]
    async fn test_base_publishes_telemetry_updates() {
        let mut harness = start_base("telemetry", "secret");
        let mut updates = harness.hub.subscribe();

        let frame = Frame::new("rv1", 36.15, -95.99, 1000);
        harness
            .rover_end
            .transmit(&wire_frame(&frame, b"secret"))
            .await
            .expect("transmit failed");

        let update = tokio::time::timeout(Duration::from_secs(2), updates.recv())
            .await
            .expect("no telemetry update")
            .expect("hub closed");
        assert_eq!(update.device_id, "rv1");
        assert_eq!(update.rssi_dbm, -58);

        harness.control.send(ControlEvent::Sleep).await.expect("control send failed");
        harness.task.await.expect("controller panicked").expect("controller failed");
    }

    #[tokio::test]
    async fn test_capacity_update_shrinks_live_registry() {
        let mut harness = start_base("capacity", "secret");

        for (i, id) in ["rv1", "rv2", "rv3"].into_iter().enumerate() {
            let frame = Frame::new(id, 36.15, -95.99, 1000 + i as u64);
            harness
                .rover_end
                .transmit(&wire_frame(&frame, b"secret"))
                .await
                .expect("transmit failed");
        }
        wait_for_registry_len(&harness.registry, 3).await;

        let mut entries = serde_json::Map::new();
        entries.insert("max_rovers".into(), serde_json::Value::from(1));
        harness.store.apply_update(&entries).await.expect("update failed");

        // The rebuild applies the new bound before bringing the link up,
        // so it lands even though the consumed mock endpoint cannot come
        // back
        wait_for_registry_len(&harness.registry, 1).await;
        assert_eq!(harness.registry.read().await.selected_id(), Some("rv3"));

        harness.task.abort();
    }

    #[tokio::test]
    async fn test_rover_loop_broadcasts_mock_fix() {
        let (rover_end, mut base_end) = mock::pair(-58);
        let mut config = base_config("secret");
        config.role = Role::Rover;
        config.device_id = "TX000001".into();
        config.mock_gps = true;
        config.radio.tx_interval_secs = 1;
        config.radio.rate_limit_secs = 1;

        let store = temp_store("rover", config);
        let registry = Arc::new(RwLock::new(RoverRegistry::new(8)));
        let (hub, _inbox) = TelemetryHub::new(registry.clone(), store.clone());

        let controller = RoleController::new(
            store,
            registry,
            hub,
            Box::new(MockLinkFactory {
                endpoint: Some(rover_end),
            }),
            None,
        );
        let (control, control_rx) = mpsc::channel(4);
        let task = tokio::spawn(controller.run(control_rx));

        // First interval tick fires immediately
        let mut received = None;
        for _ in 0..100 {
            if let Some((wire, _)) = base_end.poll().await.expect("poll failed") {
                received = Some(wire);
                break;
            }
        }
        let wire = received.expect("rover never transmitted");

        let plain = proto::decrypt(&wire, b"secret").expect("decrypt failed");
        let frame = proto::decode(&plain).expect("decode failed");
        assert_eq!(frame.device_id, "TX000001");
        assert!((frame.latitude - 36.1569).abs() < 0.001);

        control.send(ControlEvent::Sleep).await.expect("control send failed");
        task.await.expect("controller panicked").expect("controller failed");
    }

    #[test]
    fn test_empty_secret_never_reaches_a_running_loop() {
        let config = TrackerConfig {
            secret: String::new(),
            ..base_config("x")
        };
        // Both gates hold: the snapshot fails validation and the store
        // refuses to be constructed around it.
        assert!(config.validate().is_err());
        let path = std::env::temp_dir().join(format!(
            "pawtrack-role-test-badsecret-{}.json",
            std::process::id()
        ));
        assert!(ConfigStore::new(path, config).is_err());
    }
}
