//! GPS source boundary
//!
//! The receiver hardware and NMEA parsing live outside this firmware core;
//! anything that can answer "where are we right now" plugs in through
//! [`GpsSource`]. Absence of a fix is a normal answer, not an error.

use async_trait::async_trait;
use pawtrack_proto::{now_unix, Frame};
use rand::Rng;

/// Bench-test coordinates used by the mock source
const MOCK_LAT: f64 = 36.1569;
const MOCK_LON: f64 = -95.9915;

/// One position fix from the receiver
#[derive(Debug, Clone, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Fix time, seconds since the Unix epoch
    pub timestamp: u64,
    pub satellites: Option<u32>,
    pub altitude: Option<f64>,
}

impl GpsFix {
    /// Build the frame this device would broadcast for this fix
    pub fn into_frame(self, device_id: &str) -> Frame {
        Frame {
            device_id: device_id.to_string(),
            latitude: self.latitude,
            longitude: self.longitude,
            timestamp: self.timestamp,
            satellites: self.satellites,
            altitude: self.altitude,
        }
    }
}

/// Pollable position source
#[async_trait]
pub trait GpsSource: Send {
    /// Current fix, or `None` while the receiver is still searching
    async fn get_fix(&mut self) -> Option<GpsFix>;
}

/// Bench-test source: fixed coordinates with sub-meter jitter
///
/// Enabled by the `mock_gps` config flag so a rover can be exercised
/// indoors without satellite visibility.
pub struct MockGps;

#[async_trait]
impl GpsSource for MockGps {
    async fn get_fix(&mut self) -> Option<GpsFix> {
        let mut rng = rand::thread_rng();
        Some(GpsFix {
            latitude: MOCK_LAT + rng.gen_range(0..100) as f64 / 1_000_000.0,
            longitude: MOCK_LON + rng.gen_range(0..100) as f64 / 1_000_000.0,
            timestamp: now_unix(),
            satellites: Some(8),
            altitude: Some(198.0),
        })
    }
}

/// Placeholder source for builds without receiver hardware attached
///
/// Never produces a fix, so the rover loop skips transmission every tick.
pub struct NoGps;

#[async_trait]
impl GpsSource for NoGps {
    async fn get_fix(&mut self) -> Option<GpsFix> {
        None
    }
}
