//! Google Directions API
//!
//! Errors come back as HTTP 200 with a `status` field, so classification has
//! to look into the body.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::Method;
use serde::Deserialize;

use super::{default_check, Endpoint, HttpCall, NormalizeContext, Protocol};
use crate::core::adapter::{BackendId, BackendRequest, TripTime};
use crate::core::error::{NormalizationError, QueryError};
use crate::core::mode::Mode;
use crate::core::trip::{Leg, RouteOutcome, Trip};

const DIRECTIONS_PATH: &str = "/maps/api/directions/json";

pub(crate) struct Google;

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    #[serde(default)]
    legs: Vec<RouteLeg>,
}

#[derive(Debug, Deserialize)]
struct RouteLeg {
    duration: Option<Value>,
    distance: Option<Value>,
    departure_time: Option<Value>,
    arrival_time: Option<Value>,
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct Step {
    travel_mode: String,
    duration: Option<Value>,
    distance: Option<Value>,
    transit_details: Option<TransitDetails>,
}

#[derive(Debug, Deserialize)]
struct TransitDetails {
    departure_time: Option<Value>,
    arrival_time: Option<Value>,
    line: Option<Line>,
}

#[derive(Debug, Deserialize)]
struct Line {
    short_name: Option<String>,
    name: Option<String>,
    vehicle: Option<Vehicle>,
}

#[derive(Debug, Deserialize)]
struct Vehicle {
    #[serde(rename = "type")]
    kind: String,
}

/// Google wraps every quantity as `{"value": ..., "text": ...}`
#[derive(Debug, Deserialize)]
struct Value {
    value: f64,
}

fn epoch(value: &Option<Value>) -> Option<DateTime<Utc>> {
    value
        .as_ref()
        .and_then(|v| Utc.timestamp_opt(v.value as i64, 0).single())
}

fn is_no_route(status: &str) -> bool {
    matches!(status, "ZERO_RESULTS" | "NOT_FOUND")
}

impl Protocol for Google {
    fn native_mode(mode: Mode) -> Option<&'static str> {
        Some(match mode {
            Mode::Transit => "transit",
            Mode::Driving => "driving",
            Mode::Walking => "walking",
            Mode::Cycling => "bicycling",
        })
    }

    fn prepare(endpoint: &Endpoint, request: &BackendRequest) -> HttpCall {
        let mut query = vec![
            ("origin".to_string(), request.pair.origin.to_query()),
            ("destination".to_string(), request.pair.destination.to_query()),
            (
                "mode".to_string(),
                Self::native_mode(request.mode).unwrap_or("transit").to_string(),
            ),
            ("alternatives".to_string(), "true".to_string()),
        ];

        match request.time {
            Some(TripTime::Departure(t)) => query.push(("departure_time".to_string(), t.timestamp().to_string())),
            Some(TripTime::Arrival(t)) => query.push(("arrival_time".to_string(), t.timestamp().to_string())),
            None => {}
        }

        if endpoint.api_key_header.is_none() {
            if let Some(key) = &endpoint.api_key {
                query.push(("key".to_string(), key.clone()));
            }
        }

        HttpCall {
            method: Method::GET,
            url: endpoint.url(DIRECTIONS_PATH),
            query,
            headers: endpoint.auth_headers(),
            json: None,
        }
    }

    fn check_response(backend: &BackendId, status: u16, body: &[u8]) -> Result<(), QueryError> {
        default_check(backend, status, body)?;

        // Unparseable bodies are left to normalization
        let Ok(parsed) = serde_json::from_slice::<DirectionsResponse>(body) else {
            return Ok(());
        };
        let message = parsed.error_message.unwrap_or_default();
        match parsed.status.as_str() {
            "OK" => Ok(()),
            s if is_no_route(s) => Ok(()),
            "REQUEST_DENIED" => Err(QueryError::Auth {
                backend: backend.clone(),
                message: format!("REQUEST_DENIED: {message}"),
            }),
            other => Err(QueryError::Backend {
                backend: backend.clone(),
                status,
                body: format!("{other}: {message}"),
            }),
        }
    }

    fn normalize(ctx: &NormalizeContext<'_>, body: &[u8]) -> Result<RouteOutcome, NormalizationError> {
        let response: DirectionsResponse = serde_json::from_slice(body)
            .map_err(|e| ctx.error(format!("invalid Directions response: {e}")))?;

        if is_no_route(&response.status) {
            return Ok(RouteOutcome::NoRouteFound);
        }
        if response.status != "OK" {
            return Err(ctx.error(format!("unexpected status {}", response.status)));
        }

        let trips: Vec<Trip> = response
            .routes
            .into_iter()
            .filter(|r| !r.legs.is_empty())
            .map(|route| to_trip(ctx, route))
            .collect::<Result<_, _>>()?;

        if trips.is_empty() {
            return Ok(RouteOutcome::NoRouteFound);
        }
        Ok(RouteOutcome::Routes(trips))
    }
}

fn to_trip(ctx: &NormalizeContext<'_>, route: Route) -> Result<Trip, NormalizationError> {
    let mut duration_s = 0.0;
    let mut distance_m = 0.0;
    let mut legs = Vec::new();
    let departure = route.legs.first().and_then(|l| epoch(&l.departure_time));
    let arrival = route.legs.last().and_then(|l| epoch(&l.arrival_time));

    for leg in route.legs {
        let leg_duration = leg
            .duration
            .as_ref()
            .map(|d| d.value)
            .ok_or_else(|| ctx.error("route leg without duration"))?;
        duration_s += leg_duration;
        distance_m += leg.distance.as_ref().map_or(0.0, |d| d.value);

        // Walking steps carry no timestamps; place them back to back from the leg departure
        let mut cursor = epoch(&leg.departure_time);
        for step in leg.steps {
            let step_duration = step.duration.as_ref().map_or(0.0, |d| d.value);
            let step_distance = step.distance.as_ref().map_or(0.0, |d| d.value);

            let canonical = match step.travel_mode.as_str() {
                "TRANSIT" => Mode::Transit,
                other => Mode::from_native(other),
            };

            let (native, line, start, end) = match &step.transit_details {
                Some(details) => {
                    let line = details.line.as_ref();
                    let native = line
                        .and_then(|l| l.vehicle.as_ref())
                        .map_or(step.travel_mode.clone(), |v| v.kind.clone());
                    let name = line.and_then(|l| l.short_name.clone().or_else(|| l.name.clone()));
                    (native, name, epoch(&details.departure_time), epoch(&details.arrival_time))
                }
                None => {
                    let start = cursor;
                    let end = start.map(|s| s + chrono::Duration::milliseconds((step_duration * 1000.0) as i64));
                    (step.travel_mode.clone(), None, start, end)
                }
            };
            if end.is_some() {
                cursor = end;
            }

            legs.push(
                Leg::new(canonical, &native, step_duration, step_distance)
                    .with_times(start, end)
                    .with_line(line),
            );
        }
    }

    let mut trip = Trip::new(
        ctx.backend.clone(),
        ctx.request.pair.clone(),
        ctx.request.mode,
        duration_s,
        distance_m,
    )
    .with_legs(legs);
    trip.departure = departure;
    trip.arrival = arrival;
    Ok(trip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backends::fixtures::request;
    use serde_json::json;

    fn endpoint(header: Option<&str>) -> Endpoint {
        let mut endpoint = Endpoint::new("https://maps.googleapis.com");
        endpoint.api_key = Some("KEY".to_string());
        endpoint.api_key_header = header.map(str::to_string);
        endpoint
    }

    fn normalize(body: serde_json::Value) -> Result<RouteOutcome, NormalizationError> {
        let backend = BackendId::from("google");
        let req = request(Mode::Transit);
        let ctx = NormalizeContext {
            backend: &backend,
            request: &req,
        };
        Google::normalize(&ctx, &serde_json::to_vec(&body).unwrap())
    }

    #[test]
    fn test_prepare_puts_key_in_query() {
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 8, 0, 0).unwrap();
        let call = Google::prepare(
            &endpoint(None),
            &request(Mode::Cycling).with_time(TripTime::Departure(at)),
        );
        assert_eq!(call.url, "https://maps.googleapis.com/maps/api/directions/json");
        assert!(call.query.contains(&("mode".to_string(), "bicycling".to_string())));
        assert!(call.query.contains(&("key".to_string(), "KEY".to_string())));
        assert!(call
            .query
            .contains(&("departure_time".to_string(), at.timestamp().to_string())));
        assert!(call.headers.is_empty());
    }

    #[test]
    fn test_prepare_header_key() {
        let call = Google::prepare(&endpoint(Some("X-Goog-Api-Key")), &request(Mode::Transit));
        assert!(!call.query.iter().any(|(k, _)| k == "key"));
        assert_eq!(call.headers[0].0, "X-Goog-Api-Key");
    }

    #[test]
    fn test_check_response_status_field() {
        let backend = BackendId::from("google");
        let denied = serde_json::to_vec(&json!({"status": "REQUEST_DENIED", "error_message": "bad key"})).unwrap();
        let quota = serde_json::to_vec(&json!({"status": "OVER_QUERY_LIMIT"})).unwrap();
        let zero = serde_json::to_vec(&json!({"status": "ZERO_RESULTS", "routes": []})).unwrap();

        assert!(matches!(
            Google::check_response(&backend, 200, &denied),
            Err(QueryError::Auth { .. })
        ));
        assert!(matches!(
            Google::check_response(&backend, 200, &quota),
            Err(QueryError::Backend { status: 200, .. })
        ));
        assert!(Google::check_response(&backend, 200, &zero).is_ok());
    }

    #[test]
    fn test_zero_results_is_no_route() {
        let outcome = normalize(json!({"status": "ZERO_RESULTS", "routes": []})).unwrap();
        assert!(outcome.is_no_route());
    }

    #[test]
    fn test_transit_route_steps_and_waits() {
        let body = json!({
            "status": "OK",
            "routes": [{
                "legs": [{
                    "duration": {"value": 1500, "text": "25 mins"},
                    "distance": {"value": 4200, "text": "4.2 km"},
                    "departure_time": {"value": 1741075200},
                    "arrival_time": {"value": 1741076700},
                    "steps": [
                        {"travel_mode": "WALKING", "duration": {"value": 240}, "distance": {"value": 300}},
                        {"travel_mode": "TRANSIT", "duration": {"value": 960}, "distance": {"value": 3700},
                         "transit_details": {
                            "departure_time": {"value": 1741075500},
                            "arrival_time": {"value": 1741076460},
                            "line": {"short_name": "3A", "vehicle": {"type": "BUS"}}
                         }},
                        {"travel_mode": "WALKING", "duration": {"value": 240}, "distance": {"value": 200}}
                    ]
                }]
            }]
        });

        let outcome = normalize(body).unwrap();
        let trip = &outcome.trips()[0];
        assert_eq!(trip.duration_s, 1500.0);
        assert_eq!(trip.distance_m, 4200.0);
        assert_eq!(trip.legs.len(), 3);
        assert_eq!(trip.legs[0].mode, Mode::Walking);
        assert_eq!(trip.legs[1].native_mode, "BUS");
        assert_eq!(trip.vehicle_lines(), vec!["3A"]);

        // 60s wait between the first walk and the bus
        let walk_end = trip.legs[0].end.unwrap();
        let bus_start = trip.legs[1].start.unwrap();
        assert_eq!((bus_start - walk_end).num_seconds(), 60);
        assert_eq!(trip.legs[2].end, trip.arrival);
    }

    #[test]
    fn test_driving_alternatives_keep_order() {
        let body = json!({
            "status": "OK",
            "routes": [
                {"legs": [{"duration": {"value": 700}, "distance": {"value": 9000}, "steps": []}]},
                {"legs": [{"duration": {"value": 650}, "distance": {"value": 9500}, "steps": []}]}
            ]
        });
        let outcome = normalize(body).unwrap();
        let durations: Vec<f64> = outcome.trips().iter().map(|t| t.duration_s).collect();
        assert_eq!(durations, vec![700.0, 650.0]);
    }

    #[test]
    fn test_leg_without_duration_is_error() {
        let body = json!({"status": "OK", "routes": [{"legs": [{"distance": {"value": 10}}]}]});
        assert!(normalize(body).is_err());
    }
}
