use chrono::{DateTime, TimeDelta, Utc};
use serde::{Serialize, Serializer};

use crate::{speed_unit::SpeedUnit, trip_session::TrackingState};

/// Read-only view of a trip, everything in km/h and km.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripSnapshot {
    pub state: TrackingState,
    pub is_tracking: bool,
    pub current_speed_kmh: f64,
    pub altitude_m: f64,
    pub heading_deg: f64,
    pub max_speed_kmh: f64,
    pub average_speed_kmh: f64,
    pub total_distance_km: f64,
    #[serde(rename = "duration_secs", serialize_with = "serialize_secs")]
    pub duration: TimeDelta,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub sample_count: usize,
    pub speed_limit_kmh: f64,
    pub warning_active: bool,
    pub speed_unit: SpeedUnit,
}

fn serialize_secs<S: Serializer>(duration: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.num_milliseconds() as f64 / 1000.)
}

impl TripSnapshot {
    /// The speeds of this snapshot expressed in `unit`, ready for a gauge.
    pub fn display(&self, unit: SpeedUnit) -> DisplayReading {
        DisplayReading {
            unit,
            current_speed: unit.convert(self.current_speed_kmh),
            max_speed: unit.convert(self.max_speed_kmh),
            average_speed: unit.convert(self.average_speed_kmh),
            speed_limit: unit.convert(self.speed_limit_kmh),
            gauge_max: unit.gauge_max(),
            total_distance_km: self.total_distance_km,
            duration: self.duration,
            warning_active: self.warning_active,
        }
    }

    /// Same as [`display`](Self::display) in the unit the session was configured with.
    pub fn display_in_configured_unit(&self) -> DisplayReading {
        self.display(self.speed_unit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayReading {
    pub unit: SpeedUnit,
    pub current_speed: f64,
    pub max_speed: f64,
    pub average_speed: f64,
    pub speed_limit: f64,
    pub gauge_max: f64,
    pub total_distance_km: f64,
    #[serde(rename = "duration_secs", serialize_with = "serialize_secs")]
    pub duration: TimeDelta,
    pub warning_active: bool,
}
