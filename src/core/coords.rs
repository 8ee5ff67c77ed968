//! Coordinate registry
//!
//! A versioned, read-only table of origin/destination pairs. Each pair carries
//! an explicit region and scenario tag; nothing downstream ever infers a
//! grouping from the coordinate values themselves.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use geo::{Distance, Haversine, Point};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// Coordinate table compiled into the binary
const BUILTIN_TABLE: &str = include_str!("../../data/coordinates.json");

/// A WGS84 position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// `lat,lon` as used by query-string backends
    pub fn to_query(&self) -> String {
        format!("{},{}", self.lat, self.lon)
    }

    pub fn to_point(&self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }

    fn bits(&self) -> (u64, u64) {
        (self.lat.to_bits(), self.lon.to_bits())
    }
}

impl fmt::Display for LatLon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lon)
    }
}

/// Great-circle distance in metres
pub fn haversine_m(a: LatLon, b: LatLon) -> f64 {
    Haversine::distance(a.to_point(), b.to_point())
}

/// Distance class of a coordinate pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Local,
    Regional,
    LongDistance,
}

impl Scenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Local => "local",
            Scenario::Regional => "regional",
            Scenario::LongDistance => "long_distance",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "local" => Ok(Scenario::Local),
            "regional" => Ok(Scenario::Regional),
            "long_distance" | "long" => Ok(Scenario::LongDistance),
            other => Err(Error::InvalidInput(format!(
                "unknown scenario '{other}' (expected local, regional or long_distance)"
            ))),
        }
    }
}

/// An origin/destination fixture.
///
/// Identity is (region, scenario, origin, destination). The label is a human
/// description only and takes no part in equality or grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatePair {
    pub scenario: Scenario,
    pub region: String,
    #[serde(default)]
    pub label: String,
    pub origin: LatLon,
    pub destination: LatLon,
}

/// Hashable, totally ordered identity of a [`CoordinatePair`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    scenario: Scenario,
    region: String,
    coords: [u64; 4],
}

impl CoordinatePair {
    pub fn new(scenario: Scenario, region: &str, origin: LatLon, destination: LatLon) -> Self {
        Self {
            scenario,
            region: region.to_string(),
            label: String::new(),
            origin,
            destination,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Scenario tag as emitted in output rows, e.g. `aachen/local`
    pub fn tag(&self) -> String {
        format!("{}/{}", self.region, self.scenario)
    }

    pub fn key(&self) -> PairKey {
        let (olat, olon) = self.origin.bits();
        let (dlat, dlon) = self.destination.bits();
        PairKey {
            scenario: self.scenario,
            region: self.region.clone(),
            coords: [olat, olon, dlat, dlon],
        }
    }

    /// Origin and destination are the same point
    pub fn is_degenerate(&self) -> bool {
        self.origin == self.destination
    }

    pub fn straight_line_m(&self) -> f64 {
        haversine_m(self.origin, self.destination)
    }
}

impl PartialEq for CoordinatePair {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for CoordinatePair {}

impl fmt::Display for CoordinatePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} -> {}", self.tag(), self.origin, self.destination)
    }
}

/// Selection criteria over the registry
#[derive(Debug, Clone, Default)]
pub struct PairFilter {
    pub scenario: Option<Scenario>,
    pub region: Option<String>,
}

impl PairFilter {
    pub fn matches(&self, pair: &CoordinatePair) -> bool {
        self.scenario.map_or(true, |s| s == pair.scenario)
            && self
                .region
                .as_deref()
                .map_or(true, |r| r.eq_ignore_ascii_case(&pair.region))
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    version: String,
    pairs: Vec<CoordinatePair>,
}

/// Static, versioned set of coordinate pairs loaded once per run
#[derive(Debug, Clone)]
pub struct CoordinateRegistry {
    version: String,
    pairs: Vec<CoordinatePair>,
}

impl CoordinateRegistry {
    /// The table shipped with the crate
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_TABLE)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let registry = Self::from_json(&raw)?;
        debug!(
            "Loaded {} coordinate pairs (version {}) from {}",
            registry.len(),
            registry.version,
            path.as_ref().display()
        );
        Ok(registry)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: RegistryFile = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid coordinate table: {e}")))?;
        Self::new(file.version, file.pairs)
    }

    /// Validate and build a registry. Rejects out-of-range coordinates and duplicate identities.
    pub fn new(version: String, pairs: Vec<CoordinatePair>) -> Result<Self> {
        let mut seen = HashSet::new();
        for pair in &pairs {
            if !pair.origin.is_valid() || !pair.destination.is_valid() {
                return Err(Error::Config(format!("coordinate out of range: {pair}")));
            }
            if pair.region.trim().is_empty() {
                return Err(Error::Config(format!("missing region for {pair}")));
            }
            if !seen.insert(pair.key()) {
                return Err(Error::Config(format!("duplicate coordinate pair: {pair}")));
            }
        }
        Ok(Self { version, pairs })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn pairs(&self) -> &[CoordinatePair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn select(&self, filter: &PairFilter) -> Vec<CoordinatePair> {
        self.pairs
            .iter()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect()
    }

    pub fn regions(&self) -> BTreeSet<&str> {
        self.pairs.iter().map(|p| p.region.as_str()).collect()
    }
}
