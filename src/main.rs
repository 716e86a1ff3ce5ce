mod button;
mod config;
mod gps;
mod radio;
mod registry;
mod role;
mod telemetry;
mod watchdog;

use anyhow::{anyhow, Result};
use button::{ButtonEvent, DeviceCommand};
use config::ConfigStore;
use radio::udp::DEFAULT_LINK_PORT;
use registry::RoverRegistry;
use role::{ControlEvent, RoleController, UdpLinkFactory};
use std::path::PathBuf;
use std::sync::Arc;
use telemetry::{ConfigCommand, TelemetryHub};
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{Duration, Instant};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = PathBuf::from(
        std::env::var("PAWTRACK_CONFIG").unwrap_or_else(|_| "pawtrack.json".into()),
    );
    let initial = config::load_or_default(&config_path);

    // Initialize tracing; the debug flag raises the default level
    let default_level = if initial.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();

    info!("{} starting up as {}", initial.device_id, initial.role);

    let store = ConfigStore::new(config_path, initial.clone())
        .map_err(|e| anyhow!("refusing to start with unsafe configuration: {}", e))?;

    let registry = Arc::new(RwLock::new(RoverRegistry::new(initial.max_rovers)));
    let (hub, mut config_inbox) = TelemetryHub::new(registry.clone(), store.clone());

    let wd_feed = if initial.watchdog {
        let (feed, _task) = watchdog::start(watchdog::WATCHDOG_TIMEOUT);
        Some(feed)
    } else {
        info!("watchdog disabled");
        None
    };

    // Button pipeline: raw edges -> gesture classification -> device commands
    let (edge_tx, edge_rx) = mpsc::channel(16);
    let (command_tx, mut commands) = mpsc::channel(16);
    tokio::spawn(button::run_dispatch(store.clone(), edge_rx, command_tx));
    tokio::spawn(stdin_button_input(edge_tx));

    let (control_tx, control_rx) = mpsc::channel(4);
    let controller = RoleController::new(
        store.clone(),
        registry.clone(),
        hub,
        Box::new(UdpLinkFactory {
            port: DEFAULT_LINK_PORT,
        }),
        wd_feed,
    );
    let mut controller_task = tokio::spawn(controller.run(control_rx));

    // Main event loop
    loop {
        tokio::select! {
            Some(command) = commands.recv() => {
                handle_device_command(command, &registry, &control_tx).await;
            }
            Some(command) = config_inbox.recv() => {
                handle_config_command(command, &store, &control_tx).await;
            }
            result = &mut controller_task => {
                match result {
                    Ok(Ok(())) => info!("goodnight"),
                    Ok(Err(e)) => error!("role controller failed: {}", e),
                    Err(e) => error!("role controller panicked: {}", e),
                }
                break;
            }
        }
    }

    Ok(())
}

/// Act on a classified button gesture
async fn handle_device_command(
    command: DeviceCommand,
    registry: &Arc<RwLock<RoverRegistry>>,
    control_tx: &mpsc::Sender<ControlEvent>,
) {
    match command {
        DeviceCommand::CycleSelection => {
            let mut registry = registry.write().await;
            match registry.select_next() {
                Some(id) => info!("now tracking {}", id),
                None => info!("no rovers tracked yet"),
            }
        }
        DeviceCommand::DeregisterSelection => {
            let mut registry = registry.write().await;
            let Some(id) = registry.selected_id().map(str::to_string) else {
                info!("nothing selected to deregister");
                return;
            };
            registry.remove(&id);
            match registry.selected_id() {
                Some(next) => info!("deregistered {}, now tracking {}", id, next),
                None => info!("deregistered {}, no rovers left", id),
            }
        }
        DeviceCommand::Sleep => {
            info!("sleep requested");
            let _ = control_tx.send(ControlEvent::Sleep).await;
        }
    }
}

/// Act on a write from the companion-app channel
async fn handle_config_command(
    command: ConfigCommand,
    store: &Arc<ConfigStore>,
    control_tx: &mpsc::Sender<ControlEvent>,
) {
    match command {
        ConfigCommand::Update(entries) => {
            // The store notifies the role controller; it rebuilds on its own
            match store.apply_update(&entries).await {
                Ok(_) => info!("configuration updated ({} entries)", entries.len()),
                Err(e) => warn!("configuration update rejected: {}", e),
            }
        }
        ConfigCommand::Reset => match store.reset().await {
            Ok(fresh) => info!("preferences reset, device id now {}", fresh.device_id),
            Err(e) => error!("preferences reset failed: {}", e),
        },
        ConfigCommand::Reboot => {
            info!("reboot requested");
            let _ = control_tx.send(ControlEvent::Restart).await;
        }
    }
}

/// Development stand-in for the GPIO button
///
/// Reads `tap` / `short` / `long` lines from stdin and synthesizes the
/// matching press/release edge pair.
async fn stdin_button_input(edges: mpsc::Sender<ButtonEvent>) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let held = match line.trim() {
            "" => continue,
            "tap" => Duration::from_millis(300),
            "short" => Duration::from_millis(2000),
            "long" => Duration::from_millis(6000),
            other => {
                warn!("unknown button input '{}' (expected tap/short/long)", other);
                continue;
            }
        };

        let pressed_at = Instant::now();
        if edges.send(ButtonEvent::Pressed(pressed_at)).await.is_err() {
            break;
        }
        if edges.send(ButtonEvent::Released(pressed_at + held)).await.is_err() {
            break;
        }
    }
}
