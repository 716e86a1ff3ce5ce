//! Base-side registry of tracked rovers
//!
//! Keyed by device id, insertion-ordered so the selection cursor cycles
//! deterministically. Entries are never expired by time: a rover that walks
//! out of range must not silently disappear from the display. Removal
//! happens on explicit deregistration, or when the capacity bound evicts
//! the least-recently-seen entry to make room for a new rover.

use pawtrack_proto::Frame;
use serde::Serialize;
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{debug, info};

/// Last-known state of one tracked rover
#[derive(Debug, Clone)]
pub struct RoverRecord {
    /// Most recent valid frame from this rover
    pub frame: Frame,
    /// Signal strength of the last reception
    pub rssi_dbm: i16,
    /// When the last frame arrived
    pub last_seen: Instant,
}

/// Outcome of ingesting a valid frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEvent {
    /// First contact with this device id
    Inserted,
    /// Existing record overwritten in place
    Updated,
}

/// Plain export record for the companion-app channel
#[derive(Debug, Clone, Serialize)]
pub struct RoverSnapshot {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: u64,
    pub satellites: Option<u32>,
    pub rssi_dbm: i16,
    /// Seconds since the last frame from this rover
    pub age_secs: u64,
    /// Whether the selection cursor points here
    pub selected: bool,
}

/// Bounded, insertion-ordered collection of known rovers
pub struct RoverRegistry {
    records: HashMap<String, RoverRecord>,
    /// Device ids in insertion order; the cursor indexes into this
    order: Vec<String>,
    cursor: Option<usize>,
    capacity: usize,
}

impl RoverRegistry {
    /// Create an empty registry holding at most `capacity` rovers
    pub fn new(capacity: usize) -> Self {
        Self {
            records: HashMap::new(),
            order: Vec::new(),
            cursor: None,
            capacity: capacity.max(1),
        }
    }

    /// Change the capacity bound, evicting down if it shrank
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.order.len() > self.capacity {
            self.evict_stalest();
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ingest one validated frame with its reception metadata
    ///
    /// Re-ingesting a known device id overwrites the record in place. The
    /// first rover ever heard becomes the selection automatically.
    pub fn ingest(&mut self, frame: Frame, rssi_dbm: i16, now: Instant) -> RegistryEvent {
        let record = RoverRecord {
            rssi_dbm,
            last_seen: now,
            frame,
        };
        let device_id = record.frame.device_id.clone();

        if self.records.contains_key(&device_id) {
            self.records.insert(device_id.clone(), record);
            debug!("updated rover {}", device_id);
            return RegistryEvent::Updated;
        }

        if self.order.len() >= self.capacity {
            self.evict_stalest();
        }

        self.records.insert(device_id.clone(), record);
        self.order.push(device_id.clone());
        if self.cursor.is_none() {
            self.cursor = Some(self.order.len() - 1);
            info!("tracking first heard rover {}", device_id);
        }

        info!("new rover tracked: {} ({} known)", device_id, self.order.len());
        RegistryEvent::Inserted
    }

    /// Deregister a rover; returns false for unknown ids
    ///
    /// Removing the selected entry advances the selection to the next
    /// remaining entry, or clears it when the registry empties.
    pub fn remove(&mut self, device_id: &str) -> bool {
        let Some(pos) = self.order.iter().position(|id| id == device_id) else {
            debug!("cannot remove unknown rover {}", device_id);
            return false;
        };

        self.records.remove(device_id);
        self.order.remove(pos);
        info!("rover {} deregistered", device_id);

        self.cursor = match self.cursor {
            None => None,
            Some(_) if self.order.is_empty() => None,
            Some(selected) if pos < selected => Some(selected - 1),
            // Removing the selected entry lands the cursor on its successor
            Some(selected) => Some(selected.min(self.order.len() - 1)),
        };

        true
    }

    /// Advance the selection cursor cyclically through insertion order
    pub fn select_next(&mut self) -> Option<&str> {
        if self.order.is_empty() {
            self.cursor = None;
            return None;
        }

        let next = match self.cursor {
            Some(current) => (current + 1) % self.order.len(),
            None => 0,
        };
        self.cursor = Some(next);

        let id = &self.order[next];
        debug!("selection moved to {}", id);
        Some(id)
    }

    /// Device id under the selection cursor
    pub fn selected_id(&self) -> Option<&str> {
        self.cursor.map(|i| self.order[i].as_str())
    }

    /// Record under the selection cursor
    pub fn current(&self) -> Option<&RoverRecord> {
        self.selected_id().and_then(|id| self.records.get(id))
    }

    /// Export records for the telemetry channel, in insertion order
    pub fn snapshot(&self, now: Instant) -> Vec<RoverSnapshot> {
        self.order
            .iter()
            .map(|id| {
                let record = &self.records[id];
                RoverSnapshot {
                    device_id: id.clone(),
                    latitude: record.frame.latitude,
                    longitude: record.frame.longitude,
                    timestamp: record.frame.timestamp,
                    satellites: record.frame.satellites,
                    rssi_dbm: record.rssi_dbm,
                    age_secs: now.saturating_duration_since(record.last_seen).as_secs(),
                    selected: self.selected_id() == Some(id.as_str()),
                }
            })
            .collect()
    }

    /// Drop the least-recently-seen entry to make room
    fn evict_stalest(&mut self) {
        let Some(stalest) = self
            .order
            .iter()
            .min_by_key(|id| self.records[id.as_str()].last_seen)
            .cloned()
        else {
            return;
        };

        info!("registry full ({}), evicting least-recently-seen {}", self.capacity, stalest);
        self.remove(&stalest);
    }
}
