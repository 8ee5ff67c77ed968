//! Flat output rows consumed by reporting tools
//!
//! Missing values serialize as `null`, never as `0`.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::adapter::BackendId;
use crate::core::benchmark::{BenchmarkOutcome, BenchmarkRecord};
use crate::core::compare::ComparisonRow;
use crate::core::coords::CoordinatePair;
use crate::core::mode::Mode;
use crate::core::trip::Trip;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripRow {
    pub backend: BackendId,
    pub scenario: String,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub dest_lat: f64,
    pub dest_lon: f64,
    pub mode: Mode,
    pub duration_s: Option<f64>,
    pub distance_m: Option<f64>,
    pub leg_count: Option<usize>,
    pub no_route: bool,
}

impl TripRow {
    pub fn from_trip(trip: &Trip) -> Self {
        Self {
            duration_s: Some(trip.duration_s),
            distance_m: Some(trip.distance_m),
            leg_count: Some(trip.legs.len()),
            no_route: false,
            ..Self::no_route(&trip.backend, &trip.pair, trip.mode)
        }
    }

    /// Row for a backend that answered "no route"
    pub fn no_route(backend: &BackendId, pair: &CoordinatePair, mode: Mode) -> Self {
        Self {
            backend: backend.clone(),
            scenario: pair.tag(),
            origin_lat: pair.origin.lat,
            origin_lon: pair.origin.lon,
            dest_lat: pair.destination.lat,
            dest_lon: pair.destination.lon,
            mode,
            duration_s: None,
            distance_m: None,
            leg_count: None,
            no_route: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkRow {
    pub backend: BackendId,
    pub scenario: String,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub dest_lat: f64,
    pub dest_lon: f64,
    pub rep_index: usize,
    pub latency_ms: f64,
    pub cpu_ms: f64,
    pub mem_delta_bytes: u64,
    pub payload_bytes: usize,
    pub outcome: BenchmarkOutcome,
}

impl From<&BenchmarkRecord> for BenchmarkRow {
    fn from(record: &BenchmarkRecord) -> Self {
        Self {
            backend: record.backend.clone(),
            scenario: record.pair.tag(),
            origin_lat: record.pair.origin.lat,
            origin_lon: record.pair.origin.lon,
            dest_lat: record.pair.destination.lat,
            dest_lon: record.pair.destination.lon,
            rep_index: record.rep_index,
            latency_ms: record.latency.as_secs_f64() * 1000.0,
            cpu_ms: record.cpu_time.as_secs_f64() * 1000.0,
            mem_delta_bytes: record.peak_mem_delta_bytes,
            payload_bytes: record.payload_bytes,
            outcome: record.outcome,
        }
    }
}

/// Per-backend columns are keyed by backend id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonOutputRow {
    pub scenario: String,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub dest_lat: f64,
    pub dest_lon: f64,
    pub mode: Mode,
    pub duration_s: BTreeMap<BackendId, Option<f64>>,
    pub distance_m: BTreeMap<BackendId, Option<f64>>,
    pub baseline_backend: BackendId,
    pub duration_delta_s: BTreeMap<BackendId, Option<f64>>,
    pub duration_delta_pct: BTreeMap<BackendId, Option<f64>>,
}

impl From<&ComparisonRow> for ComparisonOutputRow {
    fn from(row: &ComparisonRow) -> Self {
        let pair = &row.pair;
        Self {
            scenario: pair.tag(),
            origin_lat: pair.origin.lat,
            origin_lon: pair.origin.lon,
            dest_lat: pair.destination.lat,
            dest_lon: pair.destination.lon,
            mode: row.mode,
            duration_s: row.slots.iter().map(|(b, s)| (b.clone(), s.duration_s())).collect(),
            distance_m: row.slots.iter().map(|(b, s)| (b.clone(), s.distance_m())).collect(),
            baseline_backend: row.baseline.clone(),
            duration_delta_s: row.deltas.iter().map(|(b, d)| (b.clone(), d.duration_s)).collect(),
            duration_delta_pct: row.deltas.iter().map(|(b, d)| (b.clone(), d.duration_pct)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::compare::aggregate;
    use crate::core::coords::{LatLon, Scenario};
    use serde_json::json;
    use std::time::Duration;

    fn pair() -> CoordinatePair {
        CoordinatePair::new(
            Scenario::Local,
            "aachen",
            LatLon::new(50.7753, 6.0839),
            LatLon::new(50.7731, 6.0965),
        )
    }

    #[test]
    fn test_trip_rows() {
        let trip = Trip::new(BackendId::from("motis"), pair(), Mode::Transit, 600.0, 1200.0);
        let row = TripRow::from_trip(&trip);
        assert!(!row.no_route);
        assert_eq!(row.duration_s, Some(600.0));
        assert_eq!(row.scenario, "aachen/local");

        let missing = TripRow::no_route(&BackendId::from("google"), &pair(), Mode::Transit);
        let value = serde_json::to_value(&missing).unwrap();
        assert_eq!(value["no_route"], true);
        assert_eq!(value["duration_s"], serde_json::Value::Null);
        assert_eq!(value["leg_count"], serde_json::Value::Null);
    }

    #[test]
    fn test_benchmark_row_carries_coordinates() {
        let record = BenchmarkRecord {
            backend: BackendId::from("valhalla"),
            pair: pair(),
            mode: Mode::Driving,
            rep_index: 2,
            latency: Duration::from_millis(42),
            cpu_time: Duration::from_millis(3),
            peak_mem_delta_bytes: 0,
            payload_bytes: 2048,
            outcome: BenchmarkOutcome::Success,
            http_status: Some(200),
            error: None,
        };
        let row = BenchmarkRow::from(&record);
        assert_eq!(row.scenario, "aachen/local");
        assert_eq!((row.origin_lat, row.origin_lon), (50.7753, 6.0839));
        assert_eq!((row.dest_lat, row.dest_lon), (50.7731, 6.0965));
        assert_eq!(row.latency_ms, 42.0);

        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["dest_lon"], 6.0965);
        assert_eq!(value["rep_index"], 2);
    }

    #[test]
    fn test_comparison_row_nulls() {
        let trips = vec![
            Trip::new(BackendId::from("motis"), pair(), Mode::Transit, 600.0, 1200.0),
            Trip::new(BackendId::from("valhalla"), pair(), Mode::Transit, 660.0, 1300.0),
        ];
        let mut rows = aggregate(&trips, &BackendId::from("motis"));
        rows[0].slots.insert(
            BackendId::from("google"),
            crate::core::compare::Slot::Missing {
                reason: crate::core::compare::Absence::NoRouteFound,
            },
        );
        rows[0]
            .deltas
            .insert(BackendId::from("google"), Default::default());

        let value = serde_json::to_value(ComparisonOutputRow::from(&rows[0])).unwrap();
        assert_eq!(value["duration_s"]["motis"], json!(600.0));
        assert_eq!(value["duration_s"]["google"], serde_json::Value::Null);
        assert_eq!(value["duration_delta_s"]["valhalla"], json!(60.0));
        assert_eq!(value["duration_delta_s"]["google"], serde_json::Value::Null);
        assert_eq!(value["baseline_backend"], "motis");
    }
}
