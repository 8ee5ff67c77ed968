//! Trip normalizer
//!
//! Maps a [`RawResponse`] onto canonical [`Trip`]s through the field mapping
//! owned by the response's backend protocol, then enforces the unit
//! invariant: every duration and distance that leaves this module is finite
//! and non-negative.

use crate::core::adapter::{BackendId, RawResponse};
use crate::core::backends::{self, NormalizeContext};
use crate::core::coords::{haversine_m, LatLon};
use crate::core::error::NormalizationError;
use crate::core::trip::{RouteOutcome, Trip};

/// Normalize one raw response into route options, primary option first.
///
/// Pure function of its inputs: normalizing the same response twice yields
/// identical trips.
pub fn normalize(backend: &BackendId, raw: &RawResponse) -> Result<RouteOutcome, NormalizationError> {
    let ctx = NormalizeContext {
        backend,
        request: &raw.request,
    };
    let outcome = backends::normalize(raw.kind, &ctx, &raw.body)?;

    if let RouteOutcome::Routes(trips) = &outcome {
        for trip in trips {
            validate_units(backend, trip)?;
        }
    }
    Ok(outcome)
}

fn validate_units(backend: &BackendId, trip: &Trip) -> Result<(), NormalizationError> {
    let check = |what: &str, value: f64| {
        if value.is_finite() && value >= 0.0 {
            Ok(())
        } else {
            Err(NormalizationError::new(backend, format!("invalid {what}: {value}")))
        }
    };

    check("trip duration", trip.duration_s)?;
    check("trip distance", trip.distance_m)?;
    for (i, leg) in trip.legs.iter().enumerate() {
        check(&format!("leg {i} duration"), leg.duration_s)?;
        check(&format!("leg {i} distance"), leg.distance_m)?;
    }
    Ok(())
}

/// Decode an encoded polyline with the given decimal precision (5 for Google, 6/7 for others)
pub fn decode_polyline(encoded: &str, precision: u32) -> Result<Vec<LatLon>, String> {
    let line = polyline::decode_polyline(encoded, precision).map_err(|e| e.to_string())?;
    Ok(line.0.into_iter().map(|c| LatLon::new(c.y, c.x)).collect())
}

/// Length of a polyline in metres
pub fn path_length_m(points: &[LatLon]) -> f64 {
    points.windows(2).map(|w| haversine_m(w[0], w[1])).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::adapter::{BackendKind, BackendRequest};
    use crate::core::coords::{CoordinatePair, Scenario};
    use crate::core::mode::Mode;
    use bytes::Bytes;
    use serde_json::json;

    fn raw(kind: BackendKind, backend: &str, body: serde_json::Value) -> RawResponse {
        RawResponse {
            backend: BackendId::from(backend),
            kind,
            status: 200,
            body: Bytes::from(serde_json::to_vec(&body).unwrap()),
            request: BackendRequest::new(
                CoordinatePair::new(
                    Scenario::Local,
                    "aachen",
                    LatLon::new(50.7753, 6.0839),
                    LatLon::new(50.7731, 6.0965),
                ),
                Mode::Transit,
            ),
        }
    }

    #[test]
    fn test_decode_reference_polyline() {
        let points = decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`@", 5).unwrap();
        assert_eq!(points.len(), 3);
        assert!((points[0].lat - 38.5).abs() < 1e-9);
        assert!((points[0].lon + 120.2).abs() < 1e-9);
        assert!((points[2].lat - 43.252).abs() < 1e-9);
        assert!((points[2].lon + 126.453).abs() < 1e-9);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_polyline("\u{1}", 5).is_err());
        assert!(decode_polyline("", 5).unwrap().is_empty());
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let response = raw(
            BackendKind::Motis,
            "motis",
            json!({"itineraries": [{"duration": 600, "legs": [
                {"mode": "WALK", "duration": 300, "distance": 400.0},
                {"mode": "BUS", "duration": 300, "distance": 800.0, "routeShortName": "5"}
            ]}]}),
        );
        let backend = BackendId::from("motis");

        let first = normalize(&backend, &response).unwrap();
        let second = normalize(&backend, &response).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(first.trips()).unwrap(),
            serde_json::to_vec(second.trips()).unwrap()
        );
    }

    #[test]
    fn test_negative_duration_rejected() {
        let response = raw(
            BackendKind::Otp,
            "otp",
            json!({"data": {"plan": {"itineraries": [{"duration": -5, "legs": []}]}}}),
        );
        let err = normalize(&BackendId::from("otp"), &response).unwrap_err();
        assert!(err.message.contains("trip duration"));
    }

    #[test]
    fn test_no_route_passes_through() {
        let response = raw(BackendKind::Google, "google", json!({"status": "ZERO_RESULTS", "routes": []}));
        let outcome = normalize(&BackendId::from("google"), &response).unwrap();
        assert!(outcome.is_no_route());
    }

    #[test]
    fn test_malformed_body_is_error() {
        let mut response = raw(BackendKind::Valhalla, "valhalla", json!({}));
        response.body = Bytes::from_static(b"<html>502 Bad Gateway</html>");
        assert!(normalize(&BackendId::from("valhalla"), &response).is_err());
    }

    #[test]
    fn test_summary_only_trip_is_valid() {
        let response = raw(
            BackendKind::Valhalla,
            "valhalla",
            json!({"trip": {"summary": {"time": 420.0, "length": 3.5}}}),
        );
        let outcome = normalize(&BackendId::from("valhalla"), &response).unwrap();
        let trip = &outcome.trips()[0];
        assert!(trip.legs.is_empty());
        assert_eq!(trip.duration_s, 420.0);
    }
}
