//! Settings supplied by the embedding application.
//!
//! Nothing here is loaded from disk; callers build these directly or
//! deserialize them from whatever configuration format they use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::point::{BoundingBox, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedUnit {
    Mps,
    Kph,
    Mph,
    Knots,
}

impl SpeedUnit {
    /// Metres per second in one of this unit.
    pub fn mps_factor(self) -> f64 {
        match self {
            SpeedUnit::Mps => 1.0,
            SpeedUnit::Kph => 1000.0 / 3600.0,
            SpeedUnit::Mph => 1609.344 / 3600.0,
            SpeedUnit::Knots => 1852.0 / 3600.0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SpeedUnit::Mps => "mps",
            SpeedUnit::Kph => "kph",
            SpeedUnit::Mph => "mph",
            SpeedUnit::Knots => "knots",
        }
    }
}

impl FromStr for SpeedUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mps" | "m/s" => Ok(SpeedUnit::Mps),
            "kph" | "kmh" | "km/h" => Ok(SpeedUnit::Kph),
            "mph" => Ok(SpeedUnit::Mph),
            "knot" | "knots" | "kt" => Ok(SpeedUnit::Knots),
            other => Err(format!("unknown speed unit {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Speed {
    pub value: f64,
    pub unit: SpeedUnit,
}

impl Speed {
    pub fn new(value: f64, unit: SpeedUnit) -> Self {
        Speed { value, unit }
    }

    pub fn to_mps(self) -> f64 {
        self.value * self.unit.mps_factor()
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit.name())
    }
}

/// Thresholds for the standard GPS lock filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsFilterSettings {
    pub max_dop: f64,
    pub max_speed: Speed,
    pub bbox: Option<BoundingBox>,
}

impl Default for GpsFilterSettings {
    fn default() -> Self {
        GpsFilterSettings {
            max_dop: 10.0,
            max_speed: Speed::new(60.0, SpeedUnit::Kph),
            bbox: None,
        }
    }
}

/// Parse `minlon,minlat,maxlon,maxlat`.
pub fn parse_bbox(s: &str) -> Result<BoundingBox, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("bad bbox component {p:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [min_lon, min_lat, max_lon, max_lat] => Ok(BoundingBox::new(
            Point::new(*min_lat, *min_lon),
            Point::new(*max_lat, *max_lon),
        )),
        _ => Err(format!("bbox needs 4 comma separated values, got {}", parts.len())),
    }
}

/// Timing of the video track the metadata was recorded alongside. Needed
/// only for streams with no device-clock anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStreamMeta {
    pub frame_count: u64,
    /// Ticks per second.
    pub timebase: u64,
    /// Ticks per frame.
    pub frame_duration: u64,
}

/// Which secondary sensor streams to merge into GPS entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadFlags {
    pub accl: bool,
    pub grav: bool,
    pub cori: bool,
}

impl LoadFlags {
    pub const ALL: LoadFlags = LoadFlags {
        accl: true,
        grav: true,
        cori: true,
    };

    pub const NONE: LoadFlags = LoadFlags {
        accl: false,
        grav: false,
        cori: false,
    };
}

impl Default for LoadFlags {
    fn default() -> Self {
        LoadFlags::ALL
    }
}
