//! Canonical travel mode vocabulary
//!
//! Backends speak their own dialects (`TRANSIT`, `bicycling`, `auto`, ...).
//! Everything past the adapter boundary only ever sees [`Mode`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Transit,
    Driving,
    Walking,
    Cycling,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Transit, Mode::Driving, Mode::Walking, Mode::Cycling];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Transit => "transit",
            Mode::Driving => "driving",
            Mode::Walking => "walking",
            Mode::Cycling => "cycling",
        }
    }

    /// Classify a backend-native leg mode string.
    ///
    /// Anything that is not recognisably on foot, on a bike or in a private car
    /// is treated as public transport (BUS, RAIL, TRAM, FERRY, ...).
    pub fn from_native(native: &str) -> Mode {
        match native.to_ascii_uppercase().as_str() {
            "WALK" | "WALKING" | "FOOT" | "PEDESTRIAN" => Mode::Walking,
            "BIKE" | "BICYCLE" | "BICYCLING" | "CYCLING" | "RENTAL" | "SCOOTER" => Mode::Cycling,
            "CAR" | "CAR_PARKING" | "CAR_DROPOFF" | "CAR_PICKUP" | "CAR_RENTAL" | "DRIVE"
            | "DRIVING" | "AUTO" | "ODM" | "TAXI" | "FLEX" => Mode::Driving,
            _ => Mode::Transit,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transit" => Ok(Mode::Transit),
            "driving" | "car" => Ok(Mode::Driving),
            "walking" | "walk" => Ok(Mode::Walking),
            "cycling" | "bike" | "bicycle" => Ok(Mode::Cycling),
            other => Err(Error::InvalidInput(format!(
                "unknown mode '{other}' (expected transit, driving, walking or cycling)"
            ))),
        }
    }
}
