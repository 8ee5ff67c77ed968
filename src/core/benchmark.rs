//! Benchmark runner
//!
//! Repeatedly queries one backend for one pair and records every attempt.
//! Repetitions run strictly one after the other, failures are recorded like
//! successes, and nothing is retried or averaged here.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error};
use serde::Serialize;

use crate::core::adapter::{BackendAdapter, BackendId, BackendRequest, TripTime};
use crate::core::coords::CoordinatePair;
use crate::core::error::{ErrorKind, QueryError};
use crate::core::mode::Mode;
use crate::core::resources::ResourceSnapshot;
use crate::core::session::DisabledBackends;

/// Classification of one measured invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkOutcome {
    Success,
    Timeout,
    ConnectionError,
    AuthError,
    BackendError,
    UnsupportedMode,
    /// Not attempted because the backend was disabled earlier in the run
    Skipped,
}

impl BenchmarkOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BenchmarkOutcome::Success => "success",
            BenchmarkOutcome::Timeout => "timeout",
            BenchmarkOutcome::ConnectionError => "connection_error",
            BenchmarkOutcome::AuthError => "auth_error",
            BenchmarkOutcome::BackendError => "backend_error",
            BenchmarkOutcome::UnsupportedMode => "unsupported_mode",
            BenchmarkOutcome::Skipped => "skipped",
        }
    }
}

impl From<ErrorKind> for BenchmarkOutcome {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Timeout => BenchmarkOutcome::Timeout,
            ErrorKind::Connection => BenchmarkOutcome::ConnectionError,
            ErrorKind::Auth => BenchmarkOutcome::AuthError,
            ErrorKind::Backend => BenchmarkOutcome::BackendError,
            ErrorKind::UnsupportedMode => BenchmarkOutcome::UnsupportedMode,
        }
    }
}

impl fmt::Display for BenchmarkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One measured invocation
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkRecord {
    pub backend: BackendId,
    pub pair: CoordinatePair,
    pub mode: Mode,
    /// 1-based, in issuance order
    pub rep_index: usize,
    pub latency: Duration,
    pub cpu_time: Duration,
    pub peak_mem_delta_bytes: u64,
    pub payload_bytes: usize,
    pub outcome: BenchmarkOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BenchmarkRecord {
    pub fn is_success(&self) -> bool {
        self.outcome == BenchmarkOutcome::Success
    }

    fn skipped(backend: &BackendId, request: &BackendRequest, rep_index: usize) -> Self {
        Self {
            backend: backend.clone(),
            pair: request.pair.clone(),
            mode: request.mode,
            rep_index,
            latency: Duration::ZERO,
            cpu_time: Duration::ZERO,
            peak_mem_delta_bytes: 0,
            payload_bytes: 0,
            outcome: BenchmarkOutcome::Skipped,
            http_status: None,
            error: Some("backend disabled after authentication failure".to_string()),
        }
    }
}

/// Issues measured, unretried requests for one mode
#[derive(Debug, Clone)]
pub struct BenchmarkRunner {
    mode: Mode,
    time: Option<TripTime>,
    disabled: Option<Arc<DisabledBackends>>,
}

impl BenchmarkRunner {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            time: None,
            disabled: None,
        }
    }

    pub fn with_time(mut self, time: Option<TripTime>) -> Self {
        self.time = time;
        self
    }

    /// Share the run-wide set of backends disabled by authentication failures
    pub fn with_disabled(mut self, disabled: Arc<DisabledBackends>) -> Self {
        self.disabled = Some(disabled);
        self
    }

    /// Run `repetitions` measured queries. Always returns exactly `repetitions` records.
    pub async fn run(
        &self,
        adapter: &BackendAdapter,
        pair: &CoordinatePair,
        repetitions: usize,
    ) -> Vec<BenchmarkRecord> {
        let mut records = Vec::with_capacity(repetitions);
        self.run_each(adapter, pair, repetitions, |record| records.push(record))
            .await;
        records
    }

    /// Like [`run`](Self::run), handing each record to `emit` as soon as it exists
    pub async fn run_each<F>(
        &self,
        adapter: &BackendAdapter,
        pair: &CoordinatePair,
        repetitions: usize,
        mut emit: F,
    ) where
        F: FnMut(BenchmarkRecord),
    {
        let mut request = BackendRequest::new(pair.clone(), self.mode);
        request.time = self.time;
        let mut auth_failed = false;

        for rep_index in 1..=repetitions {
            let disabled = auth_failed
                || self
                    .disabled
                    .as_ref()
                    .is_some_and(|d| d.is_disabled(adapter.id()));

            let record = if disabled {
                BenchmarkRecord::skipped(adapter.id(), &request, rep_index)
            } else {
                measure(adapter, &request, rep_index).await
            };

            if record.outcome == BenchmarkOutcome::AuthError {
                auth_failed = true;
                if let Some(d) = &self.disabled {
                    if d.disable(adapter.id()) {
                        error!(
                            "{}: authentication failed, disabling backend for the rest of the run",
                            adapter.id()
                        );
                    }
                }
            }
            emit(record);
        }
    }
}

/// Time one adapter call and sample the process counters around it
pub async fn measure(adapter: &BackendAdapter, request: &BackendRequest, rep_index: usize) -> BenchmarkRecord {
    let before = ResourceSnapshot::now();
    let started = Instant::now();
    let result = adapter.query(request).await;
    let latency = started.elapsed();
    let after = ResourceSnapshot::now();

    let (outcome, http_status, payload_bytes, error) = match &result {
        Ok(raw) => (BenchmarkOutcome::Success, Some(raw.status), raw.payload_bytes(), None),
        Err(e) => {
            let status = match e {
                QueryError::Backend { status, .. } => Some(*status),
                _ => None,
            };
            (BenchmarkOutcome::from(e.kind()), status, 0, Some(e.to_string()))
        }
    };
    debug!(
        "{} rep {rep_index}: {outcome} in {:.1} ms",
        adapter.id(),
        latency.as_secs_f64() * 1000.0
    );

    BenchmarkRecord {
        backend: adapter.id().clone(),
        pair: request.pair.clone(),
        mode: request.mode,
        rep_index,
        latency,
        cpu_time: after.cpu_since(&before),
        peak_mem_delta_bytes: after.peak_mem_delta_since(&before),
        payload_bytes,
        outcome,
        http_status,
        error,
    }
}
