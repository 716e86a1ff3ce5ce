//! Button gesture state machine
//!
//! Classifies raw press/release edges into tap, short-press, and long-press
//! gestures, then maps gestures onto device commands. The classifier is a
//! two-state machine: `Idle` until a press edge starts timing, back to
//! `Idle` the moment a release edge is classified. A release with no prior
//! press is ignored; a press still held only shows up as pending.

use crate::config::{ButtonConfig, ConfigStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

/// Raw edge events from the physical button
#[derive(Debug, Clone, Copy)]
pub enum ButtonEvent {
    Pressed(Instant),
    Released(Instant),
}

/// One classified button interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonGesture {
    /// Release faster than the tap threshold
    Tap,
    /// Held between the tap and long thresholds
    ShortPress,
    /// Held at least the long threshold
    LongPress,
}

/// Externally visible classifier status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureStatus {
    Idle,
    /// A press is being timed; no gesture classified yet
    Pending { held_for: Duration },
}

/// Device-level actions a gesture dispatches to
///
/// The mapping is the same for both roles: the rover's registry is simply
/// empty unless it also tracks peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Cycle the selection cursor to the next tracked rover
    CycleSelection,
    /// Deregister the currently selected rover
    DeregisterSelection,
    /// Enter device sleep
    Sleep,
}

enum State {
    Idle,
    PressedTiming { since: Instant },
}

/// Press/release edge classifier
pub struct GestureClassifier {
    config: ButtonConfig,
    state: State,
}

impl GestureClassifier {
    pub fn new(config: ButtonConfig) -> Self {
        Self {
            config,
            state: State::Idle,
        }
    }

    /// Feed one edge event; emits at most one gesture per press/release pair
    pub fn handle(&mut self, event: ButtonEvent) -> Option<ButtonGesture> {
        match (&self.state, event) {
            (State::Idle, ButtonEvent::Pressed(at)) => {
                self.state = State::PressedTiming { since: at };
                None
            }
            // Repeated press edge while timing: contact bounce, keep the
            // original press instant
            (State::PressedTiming { .. }, ButtonEvent::Pressed(_)) => None,
            (State::Idle, ButtonEvent::Released(_)) => {
                debug!("release edge with no matching press, ignoring");
                None
            }
            (State::PressedTiming { since }, ButtonEvent::Released(at)) => {
                let held = at.saturating_duration_since(*since);
                self.state = State::Idle;
                Some(self.classify(held))
            }
        }
    }

    /// Current status; a held press reports pending, never a premature gesture
    pub fn status(&self, now: Instant) -> GestureStatus {
        match self.state {
            State::Idle => GestureStatus::Idle,
            State::PressedTiming { since } => GestureStatus::Pending {
                held_for: now.saturating_duration_since(since),
            },
        }
    }

    fn classify(&self, held: Duration) -> ButtonGesture {
        let held_ms = held.as_millis() as u64;
        if held_ms < self.config.tap_ms {
            ButtonGesture::Tap
        } else if held_ms < self.config.long_ms {
            ButtonGesture::ShortPress
        } else {
            ButtonGesture::LongPress
        }
    }
}

/// Map a gesture to its device command
pub fn command_for(gesture: ButtonGesture) -> DeviceCommand {
    match gesture {
        ButtonGesture::Tap => DeviceCommand::CycleSelection,
        ButtonGesture::ShortPress => DeviceCommand::DeregisterSelection,
        ButtonGesture::LongPress => DeviceCommand::Sleep,
    }
}

/// Consume raw edges, classify, and dispatch device commands
///
/// Runs for the life of the device; edge producers hang up to stop it.
/// Threshold updates from the store rebuild the classifier; a press in
/// flight at that moment is discarded.
pub async fn run_dispatch(
    store: Arc<ConfigStore>,
    mut edges: mpsc::Receiver<ButtonEvent>,
    commands: mpsc::Sender<DeviceCommand>,
) {
    let mut config_changes = store.subscribe();
    let mut classifier = GestureClassifier::new(store.snapshot().await.button);

    loop {
        tokio::select! {
            event = edges.recv() => {
                let Some(event) = event else { break };
                if let Some(gesture) = classifier.handle(event) {
                    let command = command_for(gesture);
                    debug!("gesture {:?} -> {:?}", gesture, command);
                    if commands.send(command).await.is_err() {
                        warn!("command channel closed, button dispatch stopping");
                        break;
                    }
                }
            }
            changed = config_changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let button = store.snapshot().await.button;
                debug!(
                    "button thresholds now tap<{}ms long>={}ms",
                    button.tap_ms, button.long_ms
                );
                classifier = GestureClassifier::new(button);
            }
        }
    }
}
