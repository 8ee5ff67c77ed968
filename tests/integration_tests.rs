//! Integration tests for butterfly-compare sessions
//!
//! Every backend is a wiremock server, so these tests exercise the whole
//! path from adapter request to comparison row without network access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use butterfly_compare::{
    Absence, BackendAdapter, BackendId, BackendKind, BackendRequest, BenchmarkOutcome, CoordinatePair, ErrorKind,
    LatLon, Mode, PlausibilityChecker, RetryPolicy, Rule, Scenario, Session, Slot, UnitStatus,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn aachen() -> CoordinatePair {
    CoordinatePair::new(
        Scenario::Local,
        "aachen",
        LatLon::new(50.7753, 6.0839),
        LatLon::new(50.7731, 6.0965),
    )
}

fn mannheim() -> CoordinatePair {
    CoordinatePair::new(
        Scenario::Local,
        "mannheim",
        LatLon::new(49.4875, 8.4660),
        LatLon::new(49.4794, 8.4695),
    )
}

fn motis_plan() -> Value {
    json!({
        "itineraries": [{
            "duration": 600,
            "startTime": "2025-03-04T08:00:00Z",
            "endTime": "2025-03-04T08:10:00Z",
            "legs": [
                {"mode": "WALK", "duration": 300, "distance": 350.0,
                 "startTime": "2025-03-04T08:00:00Z", "endTime": "2025-03-04T08:05:00Z"},
                {"mode": "BUS", "duration": 300, "distance": 850.0, "routeShortName": "33",
                 "startTime": "2025-03-04T08:05:00Z", "endTime": "2025-03-04T08:10:00Z"}
            ]
        }],
        "direct": []
    })
}

async fn motis_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/plan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(motis_plan()))
        .mount(&server)
        .await;
    server
}

fn session(adapters: Vec<BackendAdapter>, baseline: &str) -> Session {
    Session::new(adapters, baseline)
        .unwrap()
        .with_retry(RetryPolicy::none())
        .with_concurrency(1)
}

/// Answers with a delay on the listed (1-based) calls
struct SlowOnCalls {
    calls: AtomicUsize,
    slow: Vec<usize>,
    delay: Duration,
    body: Value,
}

impl Respond for SlowOnCalls {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let response = ResponseTemplate::new(200).set_body_json(self.body.clone());
        if self.slow.contains(&call) {
            response.set_delay(self.delay)
        } else {
            response
        }
    }
}

#[tokio::test]
async fn test_missing_backend_keeps_row_with_null_deltas() {
    let motis = motis_server().await;
    let google = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/maps/api/directions/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ZERO_RESULTS", "routes": []})))
        .mount(&google)
        .await;

    let session = session(
        vec![
            BackendAdapter::new("motis", BackendKind::Motis, &motis.uri()),
            BackendAdapter::new("google", BackendKind::Google, &google.uri()).with_api_key("test-key"),
        ],
        "motis",
    );

    let report = session.compare(&[aachen()], &[Mode::Transit]).await;
    assert!(report.complete);
    assert_eq!(report.trips.len(), 1);
    assert_eq!(report.rows.len(), 1);

    let row = &report.rows[0];
    let google_id = BackendId::from("google");
    assert_eq!(
        row.slot(&BackendId::from("motis")),
        Some(&Slot::Present {
            duration_s: 600.0,
            distance_m: 1200.0,
            leg_count: 2
        })
    );
    assert_eq!(
        row.slot(&google_id),
        Some(&Slot::Missing {
            reason: Absence::NoRouteFound
        })
    );
    assert_eq!(row.delta(&google_id).and_then(|d| d.duration_s), None);

    let output = serde_json::to_value(&report.comparison_rows()[0]).unwrap();
    assert_eq!(output["duration_s"]["motis"], json!(600.0));
    assert_eq!(output["duration_s"]["google"], Value::Null);
    assert_eq!(output["duration_delta_s"]["google"], Value::Null);

    let trip_rows = report.trip_rows();
    assert_eq!(trip_rows.len(), 2);
    assert!(trip_rows.iter().any(|r| r.backend == google_id && r.no_route));
}

#[tokio::test]
async fn test_benchmark_records_timeouts_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/plan"))
        .respond_with(SlowOnCalls {
            calls: AtomicUsize::new(0),
            slow: vec![2, 4],
            delay: Duration::from_secs(2),
            body: motis_plan(),
        })
        .expect(5)
        .mount(&server)
        .await;

    let adapter =
        BackendAdapter::new("motis", BackendKind::Motis, &server.uri()).with_timeout(Duration::from_millis(300));
    let session = Session::new(vec![adapter], "motis").unwrap().with_repetitions(5);

    let report = session.benchmark(&[aachen()], Mode::Transit).await;
    assert!(report.complete);

    let outcomes: Vec<BenchmarkOutcome> = report.records.iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            BenchmarkOutcome::Success,
            BenchmarkOutcome::Timeout,
            BenchmarkOutcome::Success,
            BenchmarkOutcome::Timeout,
            BenchmarkOutcome::Success,
        ]
    );
    let indices: Vec<usize> = report.records.iter().map(|r| r.rep_index).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);

    let summaries = report.summaries();
    assert_eq!(summaries.len(), 1);
    assert!((summaries[0].failure_rate - 0.4).abs() < 1e-9);
    assert!(summaries[0].latency.is_some());

    let rows = serde_json::to_value(report.rows()).unwrap();
    assert_eq!(rows[1]["outcome"], "timeout");
}

#[tokio::test]
async fn test_auth_failure_disables_backend_for_rest_of_run() {
    let motis = motis_server().await;
    let google = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "REQUEST_DENIED", "error_message": "The provided API key is invalid."})),
        )
        .expect(1)
        .mount(&google)
        .await;

    let session = session(
        vec![
            BackendAdapter::new("motis", BackendKind::Motis, &motis.uri()),
            BackendAdapter::new("google", BackendKind::Google, &google.uri()).with_api_key("bad"),
        ],
        "motis",
    );

    let report = session.compare(&[aachen(), mannheim()], &[Mode::Transit]).await;
    let google_id = BackendId::from("google");
    assert_eq!(report.disabled, vec![google_id.clone()]);

    let google_units: Vec<&UnitStatus> = report
        .units
        .iter()
        .filter(|u| u.backend == google_id)
        .map(|u| &u.status)
        .collect();
    assert_eq!(google_units.len(), 2);
    assert!(google_units.iter().any(|s| matches!(s, UnitStatus::QueryFailed { kind: ErrorKind::Auth, .. })));
    assert!(google_units.iter().any(|s| matches!(s, UnitStatus::Skipped)));

    // Other backends are unaffected
    assert_eq!(report.trips.iter().filter(|t| t.backend.as_str() == "motis").count(), 2);
    assert_eq!(report.rows.len(), 2);
}

#[tokio::test]
async fn test_unsupported_mode_is_skipped_without_request() {
    let motis = motis_server().await;
    let valhalla = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&valhalla)
        .await;

    let session = session(
        vec![
            BackendAdapter::new("motis", BackendKind::Motis, &motis.uri()),
            BackendAdapter::new("valhalla", BackendKind::Valhalla, &valhalla.uri()).with_modes(vec![Mode::Driving]),
        ],
        "motis",
    );

    let report = session.compare(&[aachen()], &[Mode::Transit]).await;
    let valhalla_unit = report
        .units
        .iter()
        .find(|u| u.backend.as_str() == "valhalla")
        .unwrap();
    assert!(matches!(
        valhalla_unit.status,
        UnitStatus::QueryFailed {
            kind: ErrorKind::UnsupportedMode,
            ..
        }
    ));
    assert_eq!(
        report.rows[0].slot(&BackendId::from("valhalla")),
        Some(&Slot::Missing {
            reason: Absence::Skipped
        })
    );
}

#[tokio::test]
async fn test_valhalla_no_path_and_otp_errors() {
    let motis = motis_server().await;
    let valhalla = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/route"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_code": 442,
            "error": "No path could be found for input",
            "status_code": 400,
            "status": "Bad Request"
        })))
        .mount(&valhalla)
        .await;
    let otp = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/otp/gtfs/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{"message": "Validation error of type WrongType"}]
        })))
        .expect(1)
        .mount(&otp)
        .await;

    let session = session(
        vec![
            BackendAdapter::new("motis", BackendKind::Motis, &motis.uri()),
            BackendAdapter::new("valhalla", BackendKind::Valhalla, &valhalla.uri()),
            BackendAdapter::new("otp", BackendKind::Otp, &otp.uri()),
        ],
        "motis",
    );

    let report = session.compare(&[aachen()], &[Mode::Transit]).await;
    let status = |name: &str| {
        report
            .units
            .iter()
            .find(|u| u.backend.as_str() == name)
            .map(|u| u.status.clone())
            .unwrap()
    };

    assert_eq!(status("valhalla"), UnitStatus::NoRouteFound);
    match status("otp") {
        UnitStatus::QueryFailed { kind, message } => {
            assert_eq!(kind, ErrorKind::Backend);
            assert!(message.contains("WrongType"), "{message}");
        }
        other => panic!("expected backend error, got {other:?}"),
    }

    let row = &report.rows[0];
    assert_eq!(
        row.slot(&BackendId::from("otp")),
        Some(&Slot::Missing {
            reason: Absence::Failed
        })
    );
}

#[tokio::test]
async fn test_transient_errors_are_retried_on_compare_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(motis_plan()))
        .mount(&server)
        .await;

    let session = Session::new(
        vec![BackendAdapter::new("motis", BackendKind::Motis, &server.uri())],
        "motis",
    )
    .unwrap()
    .with_retry(RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 10,
    });

    let report = session.compare(&[aachen()], &[Mode::Transit]).await;
    assert_eq!(report.units[0].status, UnitStatus::Routes { count: 1 });
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_run_timeout_keeps_partial_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(SlowOnCalls {
            calls: AtomicUsize::new(0),
            slow: vec![2],
            delay: Duration::from_secs(10),
            body: motis_plan(),
        })
        .mount(&server)
        .await;

    let session = session(
        vec![BackendAdapter::new("motis", BackendKind::Motis, &server.uri()).with_timeout(Duration::from_secs(30))],
        "motis",
    )
    .with_run_timeout(Duration::from_millis(500));

    let report = session.compare(&[aachen(), mannheim()], &[Mode::Transit]).await;
    assert!(!report.complete);
    assert_eq!(report.trips.len(), 1);
    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.rows[0].pair, aachen());
}

#[tokio::test]
async fn test_cancellation_keeps_finished_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(SlowOnCalls {
            calls: AtomicUsize::new(0),
            slow: vec![3],
            delay: Duration::from_secs(10),
            body: motis_plan(),
        })
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    let session = Session::new(
        vec![BackendAdapter::new("motis", BackendKind::Motis, &server.uri()).with_timeout(Duration::from_secs(30))],
        "motis",
    )
    .unwrap()
    .with_repetitions(5)
    .with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        token.cancel();
    });

    let report = session.benchmark(&[aachen()], Mode::Transit).await;
    canceller.await.unwrap();

    assert!(!report.complete);
    assert_eq!(report.records.len(), 2);
    assert!(report.records.iter().all(|r| r.is_success()));
}

#[tokio::test]
async fn test_implausible_walk_is_flagged_not_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "itineraries": [],
            "direct": [{"duration": 60, "legs": [{"mode": "WALK", "duration": 60, "distance": 50000.0}]}]
        })))
        .mount(&server)
        .await;

    let session = session(
        vec![BackendAdapter::new("motis", BackendKind::Motis, &server.uri())],
        "motis",
    );
    let report = session.compare(&[aachen()], &[Mode::Walking]).await;
    assert_eq!(report.trips.len(), 1);

    let verdicts = report.verdicts(&PlausibilityChecker::default());
    assert!(!verdicts[0].is_plausible());
    assert!(verdicts[0].violates(Rule::BoundedSpeed));
    assert_eq!(report.trips[0].distance_m, 50000.0);
}

#[tokio::test]
async fn test_normalization_is_idempotent_over_live_response() {
    let server = motis_server().await;
    let adapter = BackendAdapter::new("motis", BackendKind::Motis, &server.uri());
    let raw = adapter
        .query(&BackendRequest::new(aachen(), Mode::Transit))
        .await
        .unwrap();

    let first = butterfly_compare::normalize(adapter.id(), &raw).unwrap();
    let second = butterfly_compare::normalize(adapter.id(), &raw).unwrap();
    assert_eq!(first.trips(), second.trips());
    assert_eq!(raw.payload_bytes(), serde_json::to_vec(&motis_plan()).unwrap().len());
}
