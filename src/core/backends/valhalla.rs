//! Valhalla `/route`
//!
//! Lengths come back in the requested unit (kilometres unless overridden) and
//! the breakdown is per maneuver; consecutive maneuvers in the same travel
//! mode are merged into one canonical leg.

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use super::{default_check, Endpoint, HttpCall, NormalizeContext, Protocol};
use crate::core::adapter::{BackendId, BackendRequest, TripTime};
use crate::core::error::{NormalizationError, QueryError};
use crate::core::mode::Mode;
use crate::core::trip::{Leg, RouteOutcome, Trip};

const ROUTE_PATH: &str = "/route";
const METERS_PER_KM: f64 = 1000.0;
const METERS_PER_MILE: f64 = 1609.344;

/// Error codes meaning "no path" (442, 443) or "no routable edge near a location" (170, 171)
const NO_ROUTE_CODES: [u32; 4] = [442, 443, 170, 171];

pub(crate) struct Valhalla;

#[derive(Debug, Deserialize)]
struct RouteResponse {
    trip: Option<ValhallaTrip>,
    #[serde(default)]
    alternates: Vec<Alternate>,
    error_code: Option<u32>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Alternate {
    trip: ValhallaTrip,
}

#[derive(Debug, Deserialize)]
struct ValhallaTrip {
    #[serde(default)]
    units: Option<String>,
    summary: Summary,
    #[serde(default)]
    legs: Vec<ValhallaLeg>,
}

#[derive(Debug, Deserialize)]
struct Summary {
    time: f64,
    length: f64,
}

#[derive(Debug, Deserialize)]
struct ValhallaLeg {
    #[serde(default)]
    maneuvers: Vec<Maneuver>,
}

#[derive(Debug, Deserialize)]
struct Maneuver {
    travel_mode: String,
    travel_type: Option<String>,
    #[serde(default)]
    time: f64,
    #[serde(default)]
    length: f64,
    transit_info: Option<TransitInfo>,
}

#[derive(Debug, Deserialize)]
struct TransitInfo {
    short_name: Option<String>,
}

fn error_code(body: &[u8]) -> Option<u32> {
    serde_json::from_slice::<RouteResponse>(body)
        .ok()
        .and_then(|r| r.error_code)
}

impl Protocol for Valhalla {
    fn native_mode(mode: Mode) -> Option<&'static str> {
        Some(match mode {
            Mode::Transit => "multimodal",
            Mode::Driving => "auto",
            Mode::Walking => "pedestrian",
            Mode::Cycling => "bicycle",
        })
    }

    fn prepare(endpoint: &Endpoint, request: &BackendRequest) -> HttpCall {
        let origin = request.pair.origin;
        let destination = request.pair.destination;
        let mut body = json!({
            "locations": [
                {"lat": origin.lat, "lon": origin.lon},
                {"lat": destination.lat, "lon": destination.lon}
            ],
            "costing": Self::native_mode(request.mode).unwrap_or("multimodal"),
            "directions_options": {"units": "kilometers"},
        });

        if let Some(time) = request.time {
            // type 1 = depart at, 2 = arrive by
            let kind = match time {
                TripTime::Departure(_) => 1,
                TripTime::Arrival(_) => 2,
            };
            // Valhalla reads the value as local time at the origin
            let local = time.instant().with_timezone(&endpoint.timezone);
            body["date_time"] = json!({
                "type": kind,
                "value": local.format("%Y-%m-%dT%H:%M").to_string(),
            });
        }

        HttpCall {
            method: Method::POST,
            url: endpoint.url(ROUTE_PATH),
            query: Vec::new(),
            headers: endpoint.auth_headers(),
            json: Some(body),
        }
    }

    fn check_response(backend: &BackendId, status: u16, body: &[u8]) -> Result<(), QueryError> {
        if status == 400 && error_code(body).is_some_and(|c| NO_ROUTE_CODES.contains(&c)) {
            return Ok(());
        }
        default_check(backend, status, body)
    }

    fn normalize(ctx: &NormalizeContext<'_>, body: &[u8]) -> Result<RouteOutcome, NormalizationError> {
        let response: RouteResponse = serde_json::from_slice(body)
            .map_err(|e| ctx.error(format!("invalid route response: {e}")))?;

        if let Some(code) = response.error_code {
            if NO_ROUTE_CODES.contains(&code) {
                return Ok(RouteOutcome::NoRouteFound);
            }
            let message = response.error.unwrap_or_default();
            return Err(ctx.error(format!("error {code}: {message}")));
        }

        let Some(primary) = response.trip else {
            return Err(ctx.error("response has no trip"));
        };

        let trips = std::iter::once(primary)
            .chain(response.alternates.into_iter().map(|a| a.trip))
            .map(|trip| to_trip(ctx, trip))
            .collect();
        Ok(RouteOutcome::Routes(trips))
    }
}

fn to_trip(ctx: &NormalizeContext<'_>, trip: ValhallaTrip) -> Trip {
    let factor = match trip.units.as_deref() {
        Some("miles") | Some("mi") => METERS_PER_MILE,
        _ => METERS_PER_KM,
    };

    let mut legs: Vec<Leg> = Vec::new();
    // (travel_mode, line) of the leg being extended
    let mut current: Option<(String, Option<String>)> = None;
    for maneuver in trip.legs.into_iter().flat_map(|l| l.maneuvers) {
        let line = maneuver.transit_info.and_then(|t| t.short_name);
        let distance_m = maneuver.length * factor;

        let continues = current
            .as_ref()
            .is_some_and(|(mode, current_line)| *mode == maneuver.travel_mode && *current_line == line);
        if continues {
            if let Some(last) = legs.last_mut() {
                last.duration_s += maneuver.time;
                last.distance_m += distance_m;
            }
            continue;
        }

        let mode = Mode::from_native(&maneuver.travel_mode);
        let mut leg = Leg::new(mode, &maneuver.travel_mode, maneuver.time, distance_m).with_line(line.clone());
        if let Some(travel_type) = maneuver.travel_type.filter(|_| mode == Mode::Transit) {
            leg.native_mode = format!("{}:{}", maneuver.travel_mode, travel_type);
        }
        current = Some((maneuver.travel_mode, line));
        legs.push(leg);
    }

    Trip::new(
        ctx.backend.clone(),
        ctx.request.pair.clone(),
        ctx.request.mode,
        trip.summary.time,
        trip.summary.length * factor,
    )
    .with_legs(legs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backends::fixtures::request;
    use chrono::{TimeZone, Utc};

    fn normalize(mode: Mode, body: serde_json::Value) -> Result<RouteOutcome, NormalizationError> {
        let backend = BackendId::from("valhalla");
        let req = request(mode);
        let ctx = NormalizeContext {
            backend: &backend,
            request: &req,
        };
        Valhalla::normalize(&ctx, &serde_json::to_vec(&body).unwrap())
    }

    #[test]
    fn test_prepare_body() {
        let endpoint = Endpoint::new("http://valhalla:8002");
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 8, 0, 0).unwrap();
        let call = Valhalla::prepare(&endpoint, &request(Mode::Walking).with_time(TripTime::Departure(at)));

        assert_eq!(call.method, Method::POST);
        assert_eq!(call.url, "http://valhalla:8002/route");
        let body = call.json.unwrap();
        assert_eq!(body["costing"], "pedestrian");
        assert_eq!(body["locations"][0]["lat"], 50.7753);
        assert_eq!(body["date_time"]["type"], 1);
        // 08:00 UTC is 09:00 in Berlin in winter
        assert_eq!(body["date_time"]["value"], "2025-03-04T09:00");
    }

    #[test]
    fn test_date_time_follows_endpoint_timezone() {
        let mut endpoint = Endpoint::new("http://valhalla:8002");
        let at = Utc.with_ymd_and_hms(2025, 7, 1, 22, 30, 0).unwrap();
        let req = request(Mode::Driving).with_time(TripTime::Arrival(at));

        let body = Valhalla::prepare(&endpoint, &req).json.unwrap();
        assert_eq!(body["date_time"]["type"], 2);
        assert_eq!(body["date_time"]["value"], "2025-07-02T00:30");

        endpoint.timezone = chrono_tz::UTC;
        let body = Valhalla::prepare(&endpoint, &req).json.unwrap();
        assert_eq!(body["date_time"]["value"], "2025-07-01T22:30");
    }

    #[test]
    fn test_no_route_error_codes() {
        let backend = BackendId::from("valhalla");
        let body = serde_json::to_vec(&json!({
            "error_code": 442, "error": "No path could be found for input", "status_code": 400
        }))
        .unwrap();
        assert!(Valhalla::check_response(&backend, 400, &body).is_ok());

        let other = serde_json::to_vec(&json!({"error_code": 100, "error": "bad"})).unwrap();
        assert!(matches!(
            Valhalla::check_response(&backend, 400, &other),
            Err(QueryError::Backend { status: 400, .. })
        ));

        let outcome = normalize(Mode::Transit, json!({"error_code": 171, "error": "No suitable edges"})).unwrap();
        assert!(outcome.is_no_route());
    }

    #[test]
    fn test_kilometres_converted_and_maneuvers_merged() {
        let body = json!({
            "trip": {
                "units": "kilometers",
                "summary": {"time": 600.0, "length": 1.2},
                "legs": [{
                    "maneuvers": [
                        {"travel_mode": "pedestrian", "travel_type": "foot", "time": 60.0, "length": 0.05},
                        {"travel_mode": "pedestrian", "travel_type": "foot", "time": 40.0, "length": 0.05},
                        {"travel_mode": "transit", "travel_type": "tram", "time": 300.0, "length": 0.9,
                         "transit_info": {"short_name": "1"}},
                        {"travel_mode": "transit", "travel_type": "tram", "time": 100.0, "length": 0.1,
                         "transit_info": {"short_name": "4"}},
                        {"travel_mode": "pedestrian", "travel_type": "foot", "time": 100.0, "length": 0.1},
                        {"travel_mode": "pedestrian", "travel_type": "foot", "time": 0.0, "length": 0.0}
                    ]
                }]
            }
        });

        let outcome = normalize(Mode::Transit, body).unwrap();
        let trip = &outcome.trips()[0];
        assert_eq!(trip.duration_s, 600.0);
        assert!((trip.distance_m - 1200.0).abs() < 1e-6);

        let modes: Vec<Mode> = trip.legs.iter().map(|l| l.mode).collect();
        assert_eq!(modes, vec![Mode::Walking, Mode::Transit, Mode::Transit, Mode::Walking]);
        assert_eq!(trip.legs[0].duration_s, 100.0);
        assert!((trip.legs[0].distance_m - 100.0).abs() < 1e-9);
        assert_eq!(trip.legs[1].native_mode, "transit:tram");
        assert_eq!(trip.vehicle_lines(), vec!["1", "4"]);
    }

    #[test]
    fn test_miles_and_alternates() {
        let body = json!({
            "trip": {"units": "miles", "summary": {"time": 300.0, "length": 1.0}, "legs": []},
            "alternates": [
                {"trip": {"units": "miles", "summary": {"time": 280.0, "length": 1.5}, "legs": []}}
            ]
        });
        let outcome = normalize(Mode::Driving, body).unwrap();
        let trips = outcome.trips();
        assert_eq!(trips.len(), 2);
        assert!((trips[0].distance_m - 1609.344).abs() < 1e-9);
        assert!(trips[0].legs.is_empty());
        assert_eq!(trips[1].duration_s, 280.0);
    }

    #[test]
    fn test_missing_trip_is_error() {
        assert!(normalize(Mode::Driving, json!({"id": "x"})).is_err());
    }
}
