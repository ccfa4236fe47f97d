use geo::{Distance, Haversine};
use geo_types::Point;

use crate::position_sample::PositionSample;

pub const MPS_TO_KMH: f64 = 3.6;

/// Anything faster than this is a sensor glitch, not a vehicle.
pub const MAX_PLAUSIBLE_SPEED_KMH: f64 = 400.;

/// Speeds at or below this are GPS jitter around a standstill.
pub const MEANINGFUL_SPEED_KMH: f64 = 1.;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterOutcome {
    /// Dropped outright. Must not touch any statistic or the last position.
    Rejected { speed_kmh: f64 },
    Accepted {
        speed_kmh: f64,
        /// Gates both distance accumulation and inclusion in the average.
        meaningful: bool,
    },
}

impl FilterOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FilterOutcome::Accepted { .. })
    }
}

/// Converts the raw m/s speed to km/h, clamping negatives (and NaN) to a standstill.
pub fn filtered_speed_kmh(speed_mps: f64) -> f64 {
    let speed_kmh = speed_mps * MPS_TO_KMH;
    if speed_kmh.is_nan() || speed_kmh < 0. {
        0.
    } else {
        speed_kmh
    }
}

pub fn filter_sample(sample: &PositionSample) -> FilterOutcome {
    let speed_kmh = filtered_speed_kmh(sample.speed_mps);

    if speed_kmh > MAX_PLAUSIBLE_SPEED_KMH {
        return FilterOutcome::Rejected { speed_kmh };
    }

    FilterOutcome::Accepted {
        speed_kmh,
        meaningful: speed_kmh > MEANINGFUL_SPEED_KMH,
    }
}

/// Great-circle distance in kilometers, on the mean-radius sphere.
pub fn distance_km(from: Point, to: Point) -> f64 {
    Haversine.distance(from, to) / 1000.
}
