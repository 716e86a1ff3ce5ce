//! Loop-liveness watchdog
//!
//! Host-side stand-in for the hardware WDT: the active role loop feeds it
//! every tick, and a starved watchdog logs an error instead of resetting
//! the chip. Armed only when the `watchdog` config flag is set.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{error, info};

/// How long the device may go without feeding before barking
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(30);

/// Start the watchdog task; returns the feed handle
pub fn start(timeout_after: Duration) -> (mpsc::Sender<()>, JoinHandle<()>) {
    let (feed_tx, mut feed_rx) = mpsc::channel::<()>(4);

    let task = tokio::spawn(async move {
        info!("watchdog armed, timeout {:?}", timeout_after);
        loop {
            match timeout(timeout_after, feed_rx.recv()).await {
                Ok(Some(())) => {}
                Ok(None) => {
                    info!("watchdog disarmed");
                    break;
                }
                Err(_) => {
                    error!("watchdog starved: no feed within {:?}", timeout_after);
                }
            }
        }
    });

    (feed_tx, task)
}

/// Feed the watchdog if one is armed
pub fn feed(feeder: &Option<mpsc::Sender<()>>) {
    if let Some(feeder) = feeder {
        // A full channel just means we fed faster than the task drains
        let _ = feeder.try_send(());
    }
}
