//! OpenTripPlanner GTFS GraphQL API

use chrono::{DateTime, TimeZone, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use super::{default_check, truncate_body, Endpoint, HttpCall, NormalizeContext, Protocol};
use crate::core::adapter::{BackendId, BackendRequest};
use crate::core::error::{NormalizationError, QueryError};
use crate::core::mode::Mode;
use crate::core::trip::{Leg, RouteOutcome, Trip};

const GRAPHQL_PATH: &str = "/otp/gtfs/v1";

const PLAN_QUERY: &str = "query PlanTrip(
  $from: InputCoordinates!,
  $to: InputCoordinates!,
  $date: String,
  $time: String,
  $arriveBy: Boolean,
  $transportModes: [TransportMode]
) {
  plan(from: $from, to: $to, date: $date, time: $time, arriveBy: $arriveBy, transportModes: $transportModes) {
    itineraries {
      startTime
      endTime
      duration
      legs {
        startTime
        endTime
        mode
        duration
        distance
        route { shortName longName }
      }
    }
  }
}";

pub(crate) struct Otp;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<Data>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Data {
    plan: Option<Plan>,
}

#[derive(Debug, Deserialize)]
struct Plan {
    #[serde(default)]
    itineraries: Vec<Itinerary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Itinerary {
    start_time: Option<i64>,
    end_time: Option<i64>,
    duration: Option<f64>,
    #[serde(default)]
    legs: Vec<OtpLeg>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OtpLeg {
    start_time: Option<i64>,
    end_time: Option<i64>,
    mode: String,
    duration: Option<f64>,
    distance: Option<f64>,
    route: Option<Route>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Route {
    short_name: Option<String>,
    long_name: Option<String>,
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn transport_modes(mode: Mode) -> Vec<&'static str> {
    match mode {
        Mode::Transit => vec!["TRANSIT", "WALK"],
        Mode::Driving => vec!["CAR"],
        Mode::Walking => vec!["WALK"],
        Mode::Cycling => vec!["BICYCLE"],
    }
}

impl Protocol for Otp {
    fn native_mode(mode: Mode) -> Option<&'static str> {
        Some(match mode {
            Mode::Transit => "TRANSIT",
            Mode::Driving => "CAR",
            Mode::Walking => "WALK",
            Mode::Cycling => "BICYCLE",
        })
    }

    fn prepare(endpoint: &Endpoint, request: &BackendRequest) -> HttpCall {
        let origin = request.pair.origin;
        let destination = request.pair.destination;
        let modes: Vec<_> = transport_modes(request.mode)
            .into_iter()
            .map(|m| json!({"mode": m}))
            .collect();

        let mut variables = json!({
            "from": {"lat": origin.lat, "lon": origin.lon},
            "to": {"lat": destination.lat, "lon": destination.lon},
            "transportModes": modes,
        });
        if let Some(time) = request.time {
            // OTP resolves date and time in the router's local zone
            let at = time.instant().with_timezone(&endpoint.timezone);
            variables["date"] = json!(at.format("%Y-%m-%d").to_string());
            variables["time"] = json!(at.format("%H:%M:%S").to_string());
            variables["arriveBy"] = json!(time.is_arrival());
        }

        HttpCall {
            method: Method::POST,
            url: endpoint.url(GRAPHQL_PATH),
            query: Vec::new(),
            headers: endpoint.auth_headers(),
            json: Some(json!({"query": PLAN_QUERY, "variables": variables})),
        }
    }

    fn check_response(backend: &BackendId, status: u16, body: &[u8]) -> Result<(), QueryError> {
        default_check(backend, status, body)?;

        let errors = serde_json::from_slice::<GraphQlResponse>(body)
            .map(|r| r.errors)
            .unwrap_or_default();
        if errors.is_empty() {
            return Ok(());
        }
        let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
        Err(QueryError::Backend {
            backend: backend.clone(),
            status,
            body: truncate_body(messages.join("; ").as_bytes()),
        })
    }

    fn normalize(ctx: &NormalizeContext<'_>, body: &[u8]) -> Result<RouteOutcome, NormalizationError> {
        let response: GraphQlResponse = serde_json::from_slice(body)
            .map_err(|e| ctx.error(format!("invalid GraphQL response: {e}")))?;

        let plan = response
            .data
            .and_then(|d| d.plan)
            .ok_or_else(|| ctx.error("response has no plan"))?;
        if plan.itineraries.is_empty() {
            return Ok(RouteOutcome::NoRouteFound);
        }

        let trips = plan
            .itineraries
            .into_iter()
            .map(|itinerary| to_trip(ctx, itinerary))
            .collect();
        Ok(RouteOutcome::Routes(trips))
    }
}

fn to_trip(ctx: &NormalizeContext<'_>, itinerary: Itinerary) -> Trip {
    let legs: Vec<Leg> = itinerary
        .legs
        .into_iter()
        .map(|leg| {
            let start = from_millis(leg.start_time);
            let end = from_millis(leg.end_time);
            let duration_s = leg.duration.unwrap_or_else(|| match (leg.start_time, leg.end_time) {
                (Some(s), Some(e)) => (e - s) as f64 / 1000.0,
                _ => 0.0,
            });
            let line = leg.route.and_then(|r| r.short_name.or(r.long_name));
            Leg::new(Mode::from_native(&leg.mode), &leg.mode, duration_s, leg.distance.unwrap_or(0.0))
                .with_times(start, end)
                .with_line(line)
        })
        .collect();

    let duration_s = itinerary.duration.unwrap_or_else(|| {
        match (itinerary.start_time, itinerary.end_time) {
            (Some(s), Some(e)) => (e - s) as f64 / 1000.0,
            _ => legs.iter().map(|l| l.duration_s).sum(),
        }
    });
    let distance_m = legs.iter().map(|l| l.distance_m).sum();

    let mut trip = Trip::new(
        ctx.backend.clone(),
        ctx.request.pair.clone(),
        ctx.request.mode,
        duration_s,
        distance_m,
    )
    .with_legs(legs);
    trip.departure = from_millis(itinerary.start_time);
    trip.arrival = from_millis(itinerary.end_time);
    trip
}
