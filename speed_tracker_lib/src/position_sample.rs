use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

/// One fix as delivered by the platform's location provider.
/// Nothing here is validated, speed in particular may be negative or garbage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    pub speed_mps: f64,
    #[serde(default)]
    pub altitude_m: f64,
    #[serde(default)]
    pub heading_deg: f64,
    #[serde(default)]
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
}

impl PositionSample {
    pub fn new(latitude: f64, longitude: f64, speed_mps: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            speed_mps,
            altitude_m: 0.,
            heading_deg: 0.,
            accuracy_m: 0.,
            timestamp,
        }
    }

    pub fn with_altitude(mut self, altitude_m: f64) -> Self {
        self.altitude_m = altitude_m;
        self
    }

    pub fn with_heading(mut self, heading_deg: f64) -> Self {
        self.heading_deg = heading_deg;
        self
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = accuracy_m;
        self
    }

    /// x is longitude, y is latitude
    pub fn position(&self) -> Point {
        Point::new(self.longitude, self.latitude)
    }
}
