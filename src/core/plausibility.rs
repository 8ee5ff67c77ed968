//! Plausibility checks on canonical trips
//!
//! Rules:
//! - `non_negative`: duration and distance are >= 0
//! - `bounded_speed`: average speed inside the per-mode floor/ceiling
//! - `leg_consistency`: legs account for the total duration and run forward in time
//! - `non_degenerate`: distinct origin and destination imply a positive distance
//!
//! The checker only annotates. What to do with an implausible trip is the
//! caller's decision.

use std::fmt;

use log::info;
use serde::{Deserialize, Serialize};

use crate::core::mode::Mode;
use crate::core::trip::Trip;

/// Identifier of a plausibility rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    NonNegative,
    BoundedSpeed,
    LegConsistency,
    NonDegenerate,
}

impl Rule {
    pub const ALL: [Rule; 4] = [
        Rule::NonNegative,
        Rule::BoundedSpeed,
        Rule::LegConsistency,
        Rule::NonDegenerate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rule::NonNegative => "non_negative",
            Rule::BoundedSpeed => "bounded_speed",
            Rule::LegConsistency => "leg_consistency",
            Rule::NonDegenerate => "non_degenerate",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub rule: Rule,
    pub detail: String,
}

/// Outcome of checking one trip; empty `violations` means plausible
#[derive(Debug, Clone, Serialize)]
pub struct PlausibilityVerdict<'a> {
    pub trip: &'a Trip,
    pub violations: Vec<Violation>,
}

impl PlausibilityVerdict<'_> {
    pub fn is_plausible(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violates(&self, rule: Rule) -> bool {
        self.violations.iter().any(|v| v.rule == rule)
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.violations.iter().map(|v| v.rule).collect()
    }
}

/// Average speed bounds in m/s
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedLimits {
    pub min_mps: f64,
    pub max_mps: f64,
}

impl SpeedLimits {
    pub const fn new(min_mps: f64, max_mps: f64) -> Self {
        Self { min_mps, max_mps }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlausibilityConfig {
    pub walking: SpeedLimits,
    pub cycling: SpeedLimits,
    pub driving: SpeedLimits,
    pub transit: SpeedLimits,
    /// Multiplier applied to every ceiling
    pub safety_factor: f64,
    /// Allowed mismatch between the legs and the trip total, in seconds
    pub leg_tolerance_s: f64,
}

impl Default for PlausibilityConfig {
    fn default() -> Self {
        Self {
            walking: SpeedLimits::new(0.2, 2.5),
            cycling: SpeedLimits::new(0.5, 12.0),
            // 130 km/h
            driving: SpeedLimits::new(0.5, 36.1),
            transit: SpeedLimits::new(0.2, 85.0),
            safety_factor: 1.5,
            leg_tolerance_s: 60.0,
        }
    }
}

impl PlausibilityConfig {
    pub fn limits(&self, mode: Mode) -> SpeedLimits {
        match mode {
            Mode::Walking => self.walking,
            Mode::Cycling => self.cycling,
            Mode::Driving => self.driving,
            Mode::Transit => self.transit,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlausibilityChecker {
    config: PlausibilityConfig,
}

impl PlausibilityChecker {
    pub fn new(config: PlausibilityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlausibilityConfig {
        &self.config
    }

    /// Apply every rule to one trip
    pub fn check<'a>(&self, trip: &'a Trip) -> PlausibilityVerdict<'a> {
        let violations: Vec<Violation> = [
            non_negative(trip),
            self.bounded_speed(trip),
            self.leg_consistency(trip),
            non_degenerate(trip),
        ]
        .into_iter()
        .flatten()
        .collect();

        if !violations.is_empty() {
            let rules: Vec<&str> = violations.iter().map(|v| v.rule.as_str()).collect();
            info!(
                "{} {} {}: implausible ({})",
                trip.backend,
                trip.mode,
                trip.pair,
                rules.join(", ")
            );
        }

        PlausibilityVerdict { trip, violations }
    }

    pub fn check_all<'a>(&self, trips: &'a [Trip]) -> Vec<PlausibilityVerdict<'a>> {
        trips.iter().map(|t| self.check(t)).collect()
    }

    fn bounded_speed(&self, trip: &Trip) -> Option<Violation> {
        // Negative or non-finite inputs are reported by `non_negative`
        if !(trip.duration_s >= 0.0 && trip.distance_m >= 0.0) {
            return None;
        }
        let limits = self.config.limits(trip.mode);
        let ceiling = limits.max_mps * self.config.safety_factor;

        if trip.duration_s == 0.0 {
            return (trip.distance_m > 0.0).then(|| Violation {
                rule: Rule::BoundedSpeed,
                detail: format!("{:.0} m covered in zero time", trip.distance_m),
            });
        }

        let speed = trip.distance_m / trip.duration_s;
        if speed > ceiling {
            Some(Violation {
                rule: Rule::BoundedSpeed,
                detail: format!("{speed:.1} m/s above {} ceiling {ceiling:.1} m/s", trip.mode),
            })
        } else if trip.distance_m > 0.0 && speed < limits.min_mps {
            Some(Violation {
                rule: Rule::BoundedSpeed,
                detail: format!("{speed:.2} m/s below {} floor {:.2} m/s", trip.mode, limits.min_mps),
            })
        } else {
            None
        }
    }

    fn leg_consistency(&self, trip: &Trip) -> Option<Violation> {
        if trip.legs.is_empty() {
            return None;
        }
        let tolerance = self.config.leg_tolerance_s;

        // Waits between legs count towards the total when both timestamps are known
        let mut covered = trip.leg_duration_sum();
        for (i, leg) in trip.legs.iter().enumerate() {
            if let (Some(start), Some(end)) = (leg.start, leg.end) {
                if end < start {
                    return Some(Violation {
                        rule: Rule::LegConsistency,
                        detail: format!("leg {i} ends before it starts"),
                    });
                }
            }
            if i == 0 {
                continue;
            }
            let prev = &trip.legs[i - 1];
            if let (Some(prev_end), Some(start)) = (prev.end, leg.start) {
                let gap = (start - prev_end).num_milliseconds() as f64 / 1000.0;
                if gap < -tolerance {
                    return Some(Violation {
                        rule: Rule::LegConsistency,
                        detail: format!("leg {i} starts {:.0}s before leg {} ends", -gap, i - 1),
                    });
                }
                covered += gap.max(0.0);
            }
        }

        let mismatch = (covered - trip.duration_s).abs();
        (mismatch > tolerance).then(|| Violation {
            rule: Rule::LegConsistency,
            detail: format!(
                "legs cover {covered:.0}s of {:.0}s total (tolerance {tolerance:.0}s)",
                trip.duration_s
            ),
        })
    }
}

fn non_negative(trip: &Trip) -> Option<Violation> {
    let ok = |v: f64| v.is_finite() && v >= 0.0;
    (!ok(trip.duration_s) || !ok(trip.distance_m)).then(|| Violation {
        rule: Rule::NonNegative,
        detail: format!("duration {}s, distance {}m", trip.duration_s, trip.distance_m),
    })
}

fn non_degenerate(trip: &Trip) -> Option<Violation> {
    (!trip.pair.is_degenerate() && trip.distance_m <= 0.0).then(|| Violation {
        rule: Rule::NonDegenerate,
        detail: "distinct origin and destination but no distance".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::adapter::BackendId;
    use crate::core::coords::{CoordinatePair, LatLon, Scenario};
    use crate::core::trip::Leg;
    use chrono::{TimeZone, Utc};

    fn pair() -> CoordinatePair {
        CoordinatePair::new(
            Scenario::Local,
            "aachen",
            LatLon::new(50.7753, 6.0839),
            LatLon::new(50.7731, 6.0965),
        )
    }

    fn trip(mode: Mode, duration_s: f64, distance_m: f64) -> Trip {
        Trip::new(BackendId::from("test"), pair(), mode, duration_s, distance_m)
    }

    #[test]
    fn test_walking_at_833_mps_violates_bounded_speed() {
        let checker = PlausibilityChecker::default();
        let t = trip(Mode::Walking, 60.0, 50_000.0);
        let verdict = checker.check(&t);
        assert!(verdict.violates(Rule::BoundedSpeed));
        assert!(!verdict.violates(Rule::NonNegative));
        assert!(!verdict.is_plausible());
    }

    #[test]
    fn test_realistic_trips_are_plausible() {
        let checker = PlausibilityChecker::default();
        for (mode, duration, distance) in [
            (Mode::Walking, 720.0, 900.0),
            (Mode::Cycling, 300.0, 1200.0),
            (Mode::Driving, 1800.0, 30_000.0),
            (Mode::Transit, 600.0, 1200.0),
        ] {
            let t = trip(mode, duration, distance);
            assert!(checker.check(&t).is_plausible(), "{mode}");
        }
    }

    #[test]
    fn test_too_slow_is_flagged() {
        let checker = PlausibilityChecker::default();
        // 100 m in 2 hours
        let t = trip(Mode::Driving, 7200.0, 100.0);
        assert!(checker.check(&t).violates(Rule::BoundedSpeed));
    }

    #[test]
    fn test_multiple_rules_at_once() {
        let checker = PlausibilityChecker::default();
        let t = trip(Mode::Walking, -10.0, 0.0);
        let verdict = checker.check(&t);
        assert_eq!(verdict.rules(), vec![Rule::NonNegative, Rule::NonDegenerate]);
    }

    #[test]
    fn test_zero_time_positive_distance() {
        let checker = PlausibilityChecker::default();
        let t = trip(Mode::Driving, 0.0, 500.0);
        assert!(checker.check(&t).violates(Rule::BoundedSpeed));
    }

    #[test]
    fn test_degenerate_pair_allows_zero_distance() {
        let checker = PlausibilityChecker::default();
        let here = LatLon::new(50.7753, 6.0839);
        let mut t = trip(Mode::Walking, 0.0, 0.0);
        t.pair = CoordinatePair::new(Scenario::Local, "aachen", here, here);
        assert!(checker.check(&t).is_plausible());
    }

    #[test]
    fn test_leg_consistency_with_summed_legs() {
        let checker = PlausibilityChecker::default();
        let ok = trip(Mode::Transit, 600.0, 1200.0).with_legs(vec![
            Leg::new(Mode::Walking, "WALK", 300.0, 400.0),
            Leg::new(Mode::Transit, "BUS", 300.0, 800.0),
        ]);
        assert!(!checker.check(&ok).violates(Rule::LegConsistency));

        let bad = trip(Mode::Transit, 600.0, 1200.0).with_legs(vec![
            Leg::new(Mode::Walking, "WALK", 300.0, 400.0),
            Leg::new(Mode::Transit, "BUS", 500.0, 800.0),
        ]);
        assert!(checker.check(&bad).violates(Rule::LegConsistency));
    }

    #[test]
    fn test_waits_count_towards_total() {
        let checker = PlausibilityChecker::default();
        let t0 = Utc.with_ymd_and_hms(2025, 3, 4, 8, 0, 0).unwrap();
        let at = |s: i64| Some(t0 + chrono::Duration::seconds(s));

        // 300s walk, 300s wait, 300s ride
        let t = trip(Mode::Transit, 900.0, 2000.0).with_legs(vec![
            Leg::new(Mode::Walking, "WALK", 300.0, 400.0).with_times(at(0), at(300)),
            Leg::new(Mode::Transit, "BUS", 300.0, 1600.0).with_times(at(600), at(900)),
        ]);
        assert!(checker.check(&t).is_plausible());
    }

    #[test]
    fn test_legs_going_backwards() {
        let checker = PlausibilityChecker::default();
        let t0 = Utc.with_ymd_and_hms(2025, 3, 4, 8, 0, 0).unwrap();
        let at = |s: i64| Some(t0 + chrono::Duration::seconds(s));

        let t = trip(Mode::Transit, 600.0, 2000.0).with_legs(vec![
            Leg::new(Mode::Walking, "WALK", 300.0, 400.0).with_times(at(0), at(300)),
            Leg::new(Mode::Transit, "BUS", 300.0, 1600.0).with_times(at(100), at(400)),
        ]);
        let verdict = checker.check(&t);
        assert!(verdict.violates(Rule::LegConsistency));
    }

    #[test]
    fn test_config_deserializes_partially() {
        let config: PlausibilityConfig = serde_json::from_str(r#"{"safety_factor": 2.0}"#).unwrap();
        assert_eq!(config.safety_factor, 2.0);
        assert_eq!(config.walking, SpeedLimits::new(0.2, 2.5));
    }
}
