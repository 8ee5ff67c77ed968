//! MOTIS `/api/v1/plan`
//!
//! Transit goes through `transitModes`, the other modes are requested as
//! direct connections and come back under `direct`. A transit plan without
//! itineraries falls back to its direct walk; direct modes only ever read
//! `direct`. Responses may be bare or wrapped in `{"result": ...}` by the
//! routing proxy.

use chrono::{DateTime, Utc};
use log::warn;
use reqwest::Method;
use serde::Deserialize;

use super::{Endpoint, HttpCall, NormalizeContext, Protocol};
use crate::core::adapter::BackendRequest;
use crate::core::coords::{haversine_m, LatLon};
use crate::core::error::NormalizationError;
use crate::core::mode::Mode;
use crate::core::normalize::{decode_polyline, path_length_m};
use crate::core::trip::{Leg, RouteOutcome, Trip};

const PLAN_PATH: &str = "/api/v1/plan";
const MAX_ITINERARIES: &str = "5";
const DEFAULT_POLYLINE_PRECISION: u32 = 5;

pub(crate) struct Motis;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope {
    Wrapped { result: PlanResponse },
    Bare(PlanResponse),
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    itineraries: Option<Vec<Itinerary>>,
    direct: Option<Vec<Itinerary>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Itinerary {
    duration: Option<f64>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    legs: Vec<MotisLeg>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MotisLeg {
    mode: String,
    duration: Option<f64>,
    distance: Option<f64>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    route_short_name: Option<String>,
    from: Option<Place>,
    to: Option<Place>,
    leg_geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    points: String,
    precision: Option<u32>,
}

impl Protocol for Motis {
    fn native_mode(mode: Mode) -> Option<&'static str> {
        Some(match mode {
            Mode::Transit => "TRANSIT",
            Mode::Driving => "CAR",
            Mode::Walking => "WALK",
            Mode::Cycling => "BIKE",
        })
    }

    fn prepare(endpoint: &Endpoint, request: &BackendRequest) -> HttpCall {
        let mut query = vec![
            ("fromPlace".to_string(), request.pair.origin.to_query()),
            ("toPlace".to_string(), request.pair.destination.to_query()),
            ("detailedTransfers".to_string(), "false".to_string()),
            ("maxItineraries".to_string(), MAX_ITINERARIES.to_string()),
        ];

        match request.mode {
            Mode::Transit => {
                query.push(("transitModes".to_string(), "TRANSIT".to_string()));
                query.push(("directModes".to_string(), "WALK".to_string()));
            }
            direct => {
                let native = Self::native_mode(direct).unwrap_or("WALK");
                query.push(("directModes".to_string(), native.to_string()));
            }
        }

        if let Some(time) = request.time {
            query.push(("time".to_string(), time.instant().to_rfc3339()));
            if time.is_arrival() {
                query.push(("arriveBy".to_string(), "true".to_string()));
            }
        }

        HttpCall {
            method: Method::GET,
            url: endpoint.url(PLAN_PATH),
            query,
            headers: endpoint.auth_headers(),
            json: None,
        }
    }

    fn normalize(ctx: &NormalizeContext<'_>, body: &[u8]) -> Result<RouteOutcome, NormalizationError> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| ctx.error(format!("invalid MOTIS plan response: {e}")))?;
        let plan = match envelope {
            Envelope::Wrapped { result } | Envelope::Bare(result) => result,
        };

        if plan.itineraries.is_none() && plan.direct.is_none() {
            return Err(ctx.error("response carries neither itineraries nor direct connections"));
        }
        let itineraries = plan.itineraries.unwrap_or_default();
        let direct = plan.direct.unwrap_or_default();

        let options = match ctx.request.mode {
            Mode::Transit if itineraries.is_empty() => direct,
            Mode::Transit => itineraries,
            // Itineraries of a direct-mode request are public transport, never the requested mode
            _ => direct,
        };
        if options.is_empty() {
            return Ok(RouteOutcome::NoRouteFound);
        }

        let trips = options
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
        .map(|leg| to_leg(ctx, leg))
        .collect();

    let duration_s = itinerary.duration.unwrap_or_else(|| legs.iter().map(|l| l.duration_s).sum());
    let distance_m = legs.iter().map(|l| l.distance_m).sum();

    let mut trip = Trip::new(
        ctx.backend.clone(),
        ctx.request.pair.clone(),
        ctx.request.mode,
        duration_s,
        distance_m,
    )
    .with_legs(legs);
    trip.departure = itinerary.start_time;
    trip.arrival = itinerary.end_time;
    trip
}

fn to_leg(ctx: &NormalizeContext<'_>, leg: MotisLeg) -> Leg {
    let duration_s = leg.duration.unwrap_or_else(|| match (leg.start_time, leg.end_time) {
        (Some(start), Some(end)) => (end - start).num_milliseconds() as f64 / 1000.0,
        _ => 0.0,
    });
    let distance_m = leg_distance(ctx, &leg);

    Leg::new(Mode::from_native(&leg.mode), &leg.mode, duration_s, distance_m)
        .with_times(leg.start_time, leg.end_time)
        .with_line(leg.route_short_name)
}

/// Explicit distance, else polyline length, else straight line between the leg endpoints
fn leg_distance(ctx: &NormalizeContext<'_>, leg: &MotisLeg) -> f64 {
    if let Some(distance) = leg.distance {
        return distance;
    }

    if let Some(geometry) = &leg.leg_geometry {
        let precision = geometry.precision.unwrap_or(DEFAULT_POLYLINE_PRECISION);
        match decode_polyline(&geometry.points, precision) {
            Ok(points) if points.len() >= 2 => return path_length_m(&points),
            Ok(_) => {}
            Err(e) => warn!("{}: undecodable {} leg geometry: {e}", ctx.backend, leg.mode),
        }
    }

    if let (Some(from), Some(to)) = (&leg.from, &leg.to) {
        return haversine_m(LatLon::new(from.lat, from.lon), LatLon::new(to.lat, to.lon));
    }

    warn!("{}: {} leg has no distance information, using 0", ctx.backend, leg.mode);
    0.0
}
