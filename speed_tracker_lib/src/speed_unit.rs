use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

pub const KMH_TO_MPH: f64 = 0.621371;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedUnit {
    #[default]
    Kmh,
    Mph,
    Ms,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown speed unit '{0}', expected one of kmh, mph, ms")]
pub struct UnknownSpeedUnit(pub String);

struct UnitInfo {
    label: &'static str,
    gauge_max: f64,
    from_kmh: fn(f64) -> f64,
    to_kmh: fn(f64) -> f64,
}

fn identity(value: f64) -> f64 {
    value
}

fn kmh_to_mph(kmh: f64) -> f64 {
    kmh * KMH_TO_MPH
}

fn mph_to_kmh(mph: f64) -> f64 {
    mph / KMH_TO_MPH
}

fn kmh_to_ms(kmh: f64) -> f64 {
    kmh / 3.6
}

fn ms_to_kmh(ms: f64) -> f64 {
    ms * 3.6
}

const KMH: UnitInfo = UnitInfo {
    label: "km/h",
    gauge_max: 240.,
    from_kmh: identity,
    to_kmh: identity,
};

const MPH: UnitInfo = UnitInfo {
    label: "mph",
    gauge_max: 150.,
    from_kmh: kmh_to_mph,
    to_kmh: mph_to_kmh,
};

const MS: UnitInfo = UnitInfo {
    label: "m/s",
    gauge_max: 70.,
    from_kmh: kmh_to_ms,
    to_kmh: ms_to_kmh,
};

impl SpeedUnit {
    pub const ALL: [SpeedUnit; 3] = [SpeedUnit::Kmh, SpeedUnit::Mph, SpeedUnit::Ms];

    fn info(self) -> &'static UnitInfo {
        match self {
            SpeedUnit::Kmh => &KMH,
            SpeedUnit::Mph => &MPH,
            SpeedUnit::Ms => &MS,
        }
    }

    /// Converts a km/h value into this unit. No rounding.
    pub fn convert(self, kmh: f64) -> f64 {
        (self.info().from_kmh)(kmh)
    }

    pub fn to_kmh(self, value: f64) -> f64 {
        (self.info().to_kmh)(value)
    }

    /// Full-scale value of the speed gauge in this unit.
    pub fn gauge_max(self) -> f64 {
        self.info().gauge_max
    }

    pub fn label(self) -> &'static str {
        self.info().label
    }
}

pub fn convert(kmh: f64, unit: SpeedUnit) -> f64 {
    unit.convert(kmh)
}

impl fmt::Display for SpeedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for SpeedUnit {
    type Err = UnknownSpeedUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kmh" | "km/h" | "kph" => Ok(SpeedUnit::Kmh),
            "mph" => Ok(SpeedUnit::Mph),
            "ms" | "m/s" | "mps" => Ok(SpeedUnit::Ms),
            _ => Err(UnknownSpeedUnit(s.to_string())),
        }
    }
}
