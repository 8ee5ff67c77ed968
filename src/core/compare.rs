//! Comparison aggregator
//!
//! Joins trips from several backends on (coordinate pair, mode). Every
//! participating backend gets a slot in every row; a backend without a trip
//! gets an explicit [`Slot::Missing`], never a zero. Deltas are computed
//! against the baseline slot only when both sides are present.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::core::adapter::BackendId;
use crate::core::coords::{CoordinatePair, PairKey};
use crate::core::mode::Mode;
use crate::core::trip::Trip;

/// Ratio above which durations across backends are considered divergent
pub const DEFAULT_DIVERGENCE_RATIO: f64 = 10.0;

/// Why a slot holds no trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Absence {
    /// The backend answered that no route exists
    NoRouteFound,
    /// The query or its normalization failed
    Failed,
    /// The backend was disabled or did not support the mode
    Skipped,
    /// No trip and no recorded reason
    NoTrip,
}

/// One backend's entry in a comparison row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Slot {
    Present {
        duration_s: f64,
        distance_m: f64,
        leg_count: usize,
    },
    Missing {
        reason: Absence,
    },
}

impl Slot {
    fn from_trip(trip: &Trip) -> Self {
        Slot::Present {
            duration_s: trip.duration_s,
            distance_m: trip.distance_m,
            leg_count: trip.legs.len(),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Slot::Missing { .. })
    }

    pub fn duration_s(&self) -> Option<f64> {
        match self {
            Slot::Present { duration_s, .. } => Some(*duration_s),
            Slot::Missing { .. } => None,
        }
    }

    pub fn distance_m(&self) -> Option<f64> {
        match self {
            Slot::Present { distance_m, .. } => Some(*distance_m),
            Slot::Missing { .. } => None,
        }
    }
}

/// Difference of one backend against the baseline. `None` means missing, not zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Delta {
    pub duration_s: Option<f64>,
    pub distance_m: Option<f64>,
    pub duration_pct: Option<f64>,
}

impl Delta {
    fn between(baseline: &Slot, other: &Slot) -> Self {
        let (
            Slot::Present {
                duration_s: base_duration,
                distance_m: base_distance,
                ..
            },
            Slot::Present {
                duration_s,
                distance_m,
                ..
            },
        ) = (baseline, other)
        else {
            return Delta::default();
        };

        Delta {
            duration_s: Some(duration_s - base_duration),
            distance_m: Some(distance_m - base_distance),
            duration_pct: (*base_duration > 0.0).then(|| (duration_s - base_duration) / base_duration * 100.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub pair: CoordinatePair,
    pub mode: Mode,
    pub baseline: BackendId,
    pub slots: BTreeMap<BackendId, Slot>,
    /// One entry per non-baseline backend
    pub deltas: BTreeMap<BackendId, Delta>,
    /// Largest over smallest positive duration among present slots
    pub duration_ratio: Option<f64>,
    pub divergent: bool,
}

impl ComparisonRow {
    pub fn slot(&self, backend: &BackendId) -> Option<&Slot> {
        self.slots.get(backend)
    }

    pub fn delta(&self, backend: &BackendId) -> Option<&Delta> {
        self.deltas.get(backend)
    }
}

/// Shortest trip wins, distance breaks ties
fn better(candidate: &Trip, current: &Trip) -> bool {
    match candidate.duration_s.total_cmp(&current.duration_s) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => candidate.distance_m.total_cmp(&current.distance_m) == Ordering::Less,
    }
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    baseline: BackendId,
    backends: BTreeSet<BackendId>,
    absences: HashMap<(PairKey, Mode, BackendId), Absence>,
    divergence_ratio: f64,
}

impl Aggregator {
    /// `backends` lists every participant; the baseline is always included
    pub fn new(baseline: BackendId, backends: impl IntoIterator<Item = BackendId>) -> Self {
        let mut backends: BTreeSet<BackendId> = backends.into_iter().collect();
        backends.insert(baseline.clone());
        Self {
            baseline,
            backends,
            absences: HashMap::new(),
            divergence_ratio: DEFAULT_DIVERGENCE_RATIO,
        }
    }

    pub fn with_divergence_ratio(mut self, ratio: f64) -> Self {
        self.divergence_ratio = ratio;
        self
    }

    /// Remember why a backend has no trip for a pair and mode
    pub fn record_absence(&mut self, pair: &CoordinatePair, mode: Mode, backend: &BackendId, reason: Absence) {
        self.absences
            .insert((pair.key(), mode, backend.clone()), reason);
    }

    /// One row per distinct (pair, mode) present in `trips`, in a stable order
    pub fn aggregate(&self, trips: &[Trip]) -> Vec<ComparisonRow> {
        let mut groups: BTreeMap<(PairKey, Mode), BTreeMap<BackendId, &Trip>> = BTreeMap::new();
        let mut pairs: HashMap<PairKey, &CoordinatePair> = HashMap::new();

        for trip in trips {
            let key = trip.pair.key();
            pairs.entry(key.clone()).or_insert(&trip.pair);
            let group = groups.entry((key, trip.mode)).or_default();
            match group.get(&trip.backend) {
                Some(current) if !better(trip, current) => {}
                _ => {
                    group.insert(trip.backend.clone(), trip);
                }
            }
        }

        groups
            .into_iter()
            .filter_map(|((key, mode), chosen)| {
                let pair = (*pairs.get(&key)?).clone();
                Some(self.build_row(pair, key, mode, &chosen))
            })
            .collect()
    }

    fn build_row(
        &self,
        pair: CoordinatePair,
        key: PairKey,
        mode: Mode,
        chosen: &BTreeMap<BackendId, &Trip>,
    ) -> ComparisonRow {
        let mut participants = self.backends.clone();
        participants.extend(chosen.keys().cloned());

        let mut slots = BTreeMap::new();
        for backend in participants {
            let slot = match chosen.get(&backend) {
                Some(trip) => Slot::from_trip(trip),
                None => Slot::Missing {
                    reason: self
                        .absences
                        .get(&(key.clone(), mode, backend.clone()))
                        .copied()
                        .unwrap_or(Absence::NoTrip),
                },
            };
            slots.insert(backend, slot);
        }

        let baseline_slot = slots
            .get(&self.baseline)
            .cloned()
            .unwrap_or(Slot::Missing {
                reason: Absence::NoTrip,
            });
        let deltas = slots
            .iter()
            .filter(|(backend, _)| **backend != self.baseline)
            .map(|(backend, slot)| (backend.clone(), Delta::between(&baseline_slot, slot)))
            .collect();

        let durations: Vec<f64> = slots
            .values()
            .filter_map(Slot::duration_s)
            .filter(|d| *d > 0.0)
            .collect();
        let duration_ratio = if durations.len() >= 2 {
            let max = durations.iter().copied().fold(f64::MIN, f64::max);
            let min = durations.iter().copied().fold(f64::MAX, f64::min);
            Some(max / min)
        } else {
            None
        };

        ComparisonRow {
            pair,
            mode,
            baseline: self.baseline.clone(),
            slots,
            deltas,
            duration_ratio,
            divergent: duration_ratio.is_some_and(|r| r > self.divergence_ratio),
        }
    }
}

/// Aggregate with the participants inferred from the trips themselves
pub fn aggregate(trips: &[Trip], baseline: &BackendId) -> Vec<ComparisonRow> {
    let backends: Vec<BackendId> = trips.iter().map(|t| t.backend.clone()).collect();
    Aggregator::new(baseline.clone(), backends).aggregate(trips)
}
