//! The logical position report exchanged between rover and base

use crate::protocol::MAX_DEVICE_ID_LEN;
use serde::{Deserialize, Serialize};

/// One position report from a rover
///
/// `satellites` and `altitude` are auxiliary telemetry and may be absent
/// when the GPS receiver does not report them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Stable identifier of the broadcasting rover
    pub device_id: String,
    /// Latitude in signed decimal degrees
    #[serde(rename = "lat")]
    pub latitude: f64,
    /// Longitude in signed decimal degrees
    #[serde(rename = "lon")]
    pub longitude: f64,
    /// Fix time, seconds since the Unix epoch
    #[serde(rename = "ut")]
    pub timestamp: u64,
    /// Satellites used for the fix, if reported
    #[serde(rename = "sat", skip_serializing_if = "Option::is_none")]
    pub satellites: Option<u32>,
    /// Altitude in meters, if reported
    #[serde(rename = "alt", skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

impl Frame {
    /// Create a frame carrying only the mandatory fields
    pub fn new(device_id: impl Into<String>, latitude: f64, longitude: f64, timestamp: u64) -> Self {
        Self {
            device_id: device_id.into(),
            latitude,
            longitude,
            timestamp,
            satellites: None,
            altitude: None,
        }
    }

    /// Check the frame against the schema invariants
    ///
    /// A frame with an empty or oversized device id, or coordinates outside
    /// the valid geographic range, must never reach the registry.
    pub fn is_valid(&self) -> bool {
        !self.device_id.is_empty()
            && self.device_id.len() <= MAX_DEVICE_ID_LEN
            && self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude.abs() <= 90.0
            && self.longitude.abs() <= 180.0
    }
}
