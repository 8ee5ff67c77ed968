//! Canonical trip model
//!
//! Every backend response ends up as zero or more [`Trip`]s. Units are fixed
//! at this boundary: seconds and metres, timestamps in UTC.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::adapter::BackendId;
use crate::core::coords::CoordinatePair;
use crate::core::mode::Mode;

/// One section of a trip travelled in a single mode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Leg {
    pub mode: Mode,
    /// Mode string as the backend reported it, e.g. `REGIONAL_RAIL` or `pedestrian`
    pub native_mode: String,
    pub duration_s: f64,
    pub distance_m: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// Public transport line name, when the leg is a transit ride
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
}

impl Leg {
    pub fn new(mode: Mode, native_mode: &str, duration_s: f64, distance_m: f64) -> Self {
        Self {
            mode,
            native_mode: native_mode.to_string(),
            duration_s,
            distance_m,
            start: None,
            end: None,
            line: None,
        }
    }

    pub fn with_times(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_line(mut self, line: Option<String>) -> Self {
        self.line = line.filter(|l| !l.is_empty());
        self
    }
}

/// A route result in backend-independent form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trip {
    pub backend: BackendId,
    pub pair: CoordinatePair,
    pub mode: Mode,
    pub duration_s: f64,
    pub distance_m: f64,
    pub legs: Vec<Leg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departure: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrival: Option<DateTime<Utc>>,
}

impl Trip {
    pub fn new(backend: BackendId, pair: CoordinatePair, mode: Mode, duration_s: f64, distance_m: f64) -> Self {
        Self {
            backend,
            pair,
            mode,
            duration_s,
            distance_m,
            legs: Vec::new(),
            departure: None,
            arrival: None,
        }
    }

    pub fn with_legs(mut self, legs: Vec<Leg>) -> Self {
        self.legs = legs;
        self
    }

    pub fn leg_duration_sum(&self) -> f64 {
        self.legs.iter().map(|l| l.duration_s).sum()
    }

    /// Distinct transit line names in travel order
    pub fn vehicle_lines(&self) -> Vec<&str> {
        let mut lines: Vec<&str> = Vec::new();
        for line in self.legs.iter().filter_map(|l| l.line.as_deref()) {
            if !lines.contains(&line) {
                lines.push(line);
            }
        }
        lines
    }

    /// Average speed in m/s, `None` for zero-duration trips
    pub fn average_speed_mps(&self) -> Option<f64> {
        (self.duration_s > 0.0).then(|| self.distance_m / self.duration_s)
    }
}

/// Result of normalizing one raw response.
///
/// `NoRouteFound` is a measurement, not a failure: some pairs genuinely have
/// no connection in a given mode.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Routes(Vec<Trip>),
    NoRouteFound,
}

impl RouteOutcome {
    pub fn trips(&self) -> &[Trip] {
        match self {
            RouteOutcome::Routes(trips) => trips,
            RouteOutcome::NoRouteFound => &[],
        }
    }

    pub fn into_trips(self) -> Vec<Trip> {
        match self {
            RouteOutcome::Routes(trips) => trips,
            RouteOutcome::NoRouteFound => Vec::new(),
        }
    }

    pub fn is_no_route(&self) -> bool {
        matches!(self, RouteOutcome::NoRouteFound)
    }
}
