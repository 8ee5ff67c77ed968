//! Run orchestration
//!
//! A [`Session`] owns the configured adapters and applies the run-level
//! policies: per-pair concurrency across backends, sequential benchmark
//! repetitions, retry on the comparison path only, authentication failures
//! disabling a backend, and a run timeout or cancellation that keeps
//! everything produced so far.
//!
//! Results flow over an mpsc channel into a single collector task, which is
//! the only writer of the output sequences.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::adapter::{BackendAdapter, BackendId, BackendRequest, TripTime};
use crate::core::benchmark::{BenchmarkRecord, BenchmarkRunner};
use crate::core::compare::{Absence, Aggregator, ComparisonRow, DEFAULT_DIVERGENCE_RATIO};
use crate::core::config::RunConfig;
use crate::core::coords::CoordinatePair;
use crate::core::error::{Error, ErrorKind, QueryError, Result};
use crate::core::mode::Mode;
use crate::core::normalize::normalize;
use crate::core::plausibility::{PlausibilityChecker, PlausibilityVerdict};
use crate::core::retry::RetryPolicy;
use crate::core::rows::{BenchmarkRow, ComparisonOutputRow, TripRow};
use crate::core::stats::{summarize, BenchmarkSummary};
use crate::core::trip::{RouteOutcome, Trip};

/// Progress callback receiving (completed units, total units)
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Backends switched off for the rest of a run after an authentication failure
#[derive(Debug, Default)]
pub struct DisabledBackends {
    inner: Mutex<HashSet<BackendId>>,
}

impl DisabledBackends {
    /// Returns true if the backend was not disabled before
    pub fn disable(&self, backend: &BackendId) -> bool {
        match self.inner.lock() {
            Ok(mut set) => set.insert(backend.clone()),
            Err(poisoned) => poisoned.into_inner().insert(backend.clone()),
        }
    }

    pub fn is_disabled(&self, backend: &BackendId) -> bool {
        match self.inner.lock() {
            Ok(set) => set.contains(backend),
            Err(poisoned) => poisoned.into_inner().contains(backend),
        }
    }

    pub fn list(&self) -> Vec<BackendId> {
        let mut list: Vec<BackendId> = match self.inner.lock() {
            Ok(set) => set.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        };
        list.sort();
        list
    }
}

/// What happened to one (backend, pair, mode) query on the comparison path
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitStatus {
    Routes { count: usize },
    NoRouteFound,
    QueryFailed { kind: ErrorKind, message: String },
    NormalizationFailed { message: String },
    /// Backend disabled earlier in the run
    Skipped,
}

impl UnitStatus {
    fn absence(&self) -> Option<Absence> {
        match self {
            UnitStatus::Routes { .. } => None,
            UnitStatus::NoRouteFound => Some(Absence::NoRouteFound),
            UnitStatus::QueryFailed {
                kind: ErrorKind::UnsupportedMode,
                ..
            }
            | UnitStatus::Skipped => Some(Absence::Skipped),
            UnitStatus::QueryFailed { .. } | UnitStatus::NormalizationFailed { .. } => Some(Absence::Failed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitResult {
    pub backend: BackendId,
    pub pair: CoordinatePair,
    pub mode: Mode,
    pub status: UnitStatus,
}

/// Everything a comparison run produced
#[derive(Debug, Clone)]
pub struct CompareReport {
    /// All normalized route options
    pub trips: Vec<Trip>,
    pub units: Vec<UnitResult>,
    pub rows: Vec<ComparisonRow>,
    pub disabled: Vec<BackendId>,
    /// False when the run timed out or was cancelled
    pub complete: bool,
}

impl CompareReport {
    pub fn verdicts<'a>(&'a self, checker: &PlausibilityChecker) -> Vec<PlausibilityVerdict<'a>> {
        checker.check_all(&self.trips)
    }

    /// One row per trip plus one per "no route" answer
    pub fn trip_rows(&self) -> Vec<TripRow> {
        let mut rows: Vec<TripRow> = self.trips.iter().map(TripRow::from_trip).collect();
        rows.extend(
            self.units
                .iter()
                .filter(|u| u.status == UnitStatus::NoRouteFound)
                .map(|u| TripRow::no_route(&u.backend, &u.pair, u.mode)),
        );
        rows
    }

    pub fn comparison_rows(&self) -> Vec<ComparisonOutputRow> {
        self.rows.iter().map(ComparisonOutputRow::from).collect()
    }
}

/// Everything a benchmark run produced
#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    pub records: Vec<BenchmarkRecord>,
    pub disabled: Vec<BackendId>,
    pub complete: bool,
}

impl BenchmarkReport {
    pub fn summaries(&self) -> Vec<BenchmarkSummary> {
        summarize(&self.records)
    }

    pub fn rows(&self) -> Vec<BenchmarkRow> {
        self.records.iter().map(BenchmarkRow::from).collect()
    }
}

struct UnitEvent {
    result: UnitResult,
    trips: Vec<Trip>,
}

pub struct Session {
    adapters: Vec<BackendAdapter>,
    baseline: BackendId,
    repetitions: usize,
    concurrency: usize,
    run_timeout: Option<Duration>,
    time: Option<TripTime>,
    retry: RetryPolicy,
    divergence_ratio: f64,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl Session {
    /// Build a session over `adapters`. The baseline must be one of them.
    pub fn new(adapters: Vec<BackendAdapter>, baseline: &str) -> Result<Self> {
        if adapters.is_empty() {
            return Err(Error::Config("no backends configured".to_string()));
        }
        let ids: Vec<BackendId> = adapters.iter().map(|a| a.id().clone()).collect();
        let baseline = ids
            .iter()
            .find(|id| id.as_str() == baseline)
            .cloned()
            .ok_or_else(|| Error::backend_not_found(baseline, &ids))?;

        Ok(Self {
            adapters,
            baseline,
            repetitions: crate::core::config::DEFAULT_REPETITIONS,
            concurrency: num_cpus::get(),
            run_timeout: None,
            time: None,
            retry: RetryPolicy::default(),
            divergence_ratio: DEFAULT_DIVERGENCE_RATIO,
            cancel: CancellationToken::new(),
            progress: None,
        })
    }

    pub fn from_config(config: &RunConfig) -> Result<Self> {
        config.validate()?;
        let baseline = config
            .baseline_id()
            .ok_or_else(|| Error::Config("no backends configured".to_string()))?;
        let mut session = Self::new(config.adapters(), baseline.as_str())?
            .with_repetitions(config.repetitions)
            .with_concurrency(config.concurrency)
            .with_time(Some(config.trip_time()))
            .with_retry(config.retry.clone())
            .with_divergence_ratio(config.divergence_ratio);
        session.run_timeout = config.run_timeout_secs.map(Duration::from_secs);
        Ok(session)
    }

    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn with_time(mut self, time: Option<TripTime>) -> Self {
        self.time = time;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_divergence_ratio(mut self, ratio: f64) -> Self {
        self.divergence_ratio = ratio;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Token that aborts the current run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn baseline(&self) -> &BackendId {
        &self.baseline
    }

    pub fn repetitions(&self) -> usize {
        self.repetitions
    }

    pub fn adapters(&self) -> &[BackendAdapter] {
        &self.adapters
    }

    pub fn adapter(&self, backend: &str) -> Result<&BackendAdapter> {
        self.adapters
            .iter()
            .find(|a| a.id().as_str() == backend)
            .ok_or_else(|| {
                let ids: Vec<BackendId> = self.adapters.iter().map(|a| a.id().clone()).collect();
                Error::backend_not_found(backend, &ids)
            })
    }

    /// Query one backend once, with retry, and normalize the answer
    pub async fn query(&self, backend: &str, request: &BackendRequest) -> Result<RouteOutcome> {
        let adapter = self.adapter(backend)?;
        let raw = self.retry.run(|| adapter.query(request)).await?;
        Ok(normalize(adapter.id(), &raw)?)
    }

    /// Benchmark one backend on one pair: exactly `repetitions` records, no retry
    pub async fn run(
        &self,
        backend: &str,
        pair: &CoordinatePair,
        mode: Mode,
        repetitions: usize,
    ) -> Result<Vec<BenchmarkRecord>> {
        let adapter = self.adapter(backend)?;
        let runner = BenchmarkRunner::new(mode).with_time(self.time);
        Ok(runner.run(adapter, pair, repetitions).await)
    }

    /// Query every backend for every pair and mode, then join the results
    pub async fn compare(&self, pairs: &[CoordinatePair], modes: &[Mode]) -> CompareReport {
        let disabled = Arc::new(DisabledBackends::default());
        let total = (pairs.len() * modes.len() * self.adapters.len()) as u64;
        let done = AtomicU64::new(0);

        let (tx, mut rx) = mpsc::unbounded_channel::<UnitEvent>();
        let collector = tokio::spawn(async move {
            let mut trips = Vec::new();
            let mut units = Vec::new();
            while let Some(event) = rx.recv().await {
                trips.extend(event.trips);
                units.push(event.result);
            }
            (trips, units)
        });

        let work = stream::iter(pairs).for_each_concurrent(self.concurrency, |pair| {
            let tx = tx.clone();
            let disabled = disabled.clone();
            let done = &done;
            async move {
                let units = self.adapters.iter().flat_map(|adapter| {
                    modes.iter().map(move |mode| (adapter, *mode))
                });
                join_all(units.map(|(adapter, mode)| {
                    let tx = tx.clone();
                    let disabled = disabled.clone();
                    async move {
                        let event = self.compare_unit(adapter, pair, mode, &disabled).await;
                        let _ = tx.send(event);
                        self.tick(done, total);
                    }
                }))
                .await;
            }
        });

        let complete = self.drive(work).await;
        drop(tx);

        let (mut trips, mut units) = match collector.await {
            Ok(collected) => collected,
            Err(e) => {
                error!("Result collector failed: {e}");
                (Vec::new(), Vec::new())
            }
        };
        if !complete {
            warn!("Run incomplete, keeping {} trips from {} finished queries", trips.len(), units.len());
        }

        // Arrival order is not meaningful; sort for stable output, keeping option order per unit
        trips.sort_by(|a, b| {
            (a.pair.key(), a.mode, &a.backend).cmp(&(b.pair.key(), b.mode, &b.backend))
        });
        units.sort_by(|a, b| {
            (a.pair.key(), a.mode, &a.backend).cmp(&(b.pair.key(), b.mode, &b.backend))
        });

        let mut aggregator = Aggregator::new(
            self.baseline.clone(),
            self.adapters.iter().map(|a| a.id().clone()),
        )
        .with_divergence_ratio(self.divergence_ratio);
        for unit in &units {
            if let Some(reason) = unit.status.absence() {
                aggregator.record_absence(&unit.pair, unit.mode, &unit.backend, reason);
            }
        }
        let rows = aggregator.aggregate(&trips);

        CompareReport {
            trips,
            units,
            rows,
            disabled: disabled.list(),
            complete,
        }
    }

    /// Benchmark every backend on every pair. Backends run concurrently per
    /// pair, repetitions of one backend strictly in sequence.
    pub async fn benchmark(&self, pairs: &[CoordinatePair], mode: Mode) -> BenchmarkReport {
        let disabled = Arc::new(DisabledBackends::default());
        let total = (pairs.len() * self.adapters.len() * self.repetitions) as u64;
        let done = AtomicU64::new(0);
        let runner = BenchmarkRunner::new(mode)
            .with_time(self.time)
            .with_disabled(disabled.clone());

        let (tx, mut rx) = mpsc::unbounded_channel::<BenchmarkRecord>();
        let collector = tokio::spawn(async move {
            let mut records = Vec::new();
            while let Some(record) = rx.recv().await {
                records.push(record);
            }
            records
        });

        let work = async {
            for pair in pairs {
                join_all(self.adapters.iter().map(|adapter| {
                    let tx = tx.clone();
                    let runner = &runner;
                    let done = &done;
                    async move {
                        runner
                            .run_each(adapter, pair, self.repetitions, |record| {
                                let _ = tx.send(record);
                                self.tick(done, total);
                            })
                            .await;
                    }
                }))
                .await;
            }
        };

        let complete = self.drive(work).await;
        drop(tx);

        let records = match collector.await {
            Ok(records) => records,
            Err(e) => {
                error!("Result collector failed: {e}");
                Vec::new()
            }
        };
        if !complete {
            warn!("Run incomplete, keeping {} benchmark records", records.len());
        }

        BenchmarkReport {
            records,
            disabled: disabled.list(),
            complete,
        }
    }

    async fn compare_unit(
        &self,
        adapter: &BackendAdapter,
        pair: &CoordinatePair,
        mode: Mode,
        disabled: &DisabledBackends,
    ) -> UnitEvent {
        let unit = |status: UnitStatus| UnitResult {
            backend: adapter.id().clone(),
            pair: pair.clone(),
            mode,
            status,
        };

        if disabled.is_disabled(adapter.id()) {
            return UnitEvent {
                result: unit(UnitStatus::Skipped),
                trips: Vec::new(),
            };
        }

        let mut request = BackendRequest::new(pair.clone(), mode);
        request.time = self.time;

        let raw = match self.retry.run(|| adapter.query(&request)).await {
            Ok(raw) => raw,
            Err(e) => {
                if let QueryError::Auth { .. } = e {
                    if disabled.disable(adapter.id()) {
                        error!("{e}; disabling backend for the rest of the run");
                    }
                } else if e.kind() != ErrorKind::UnsupportedMode {
                    warn!("{e}");
                }
                return UnitEvent {
                    result: unit(UnitStatus::QueryFailed {
                        kind: e.kind(),
                        message: e.to_string(),
                    }),
                    trips: Vec::new(),
                };
            }
        };

        match normalize(adapter.id(), &raw) {
            Ok(RouteOutcome::Routes(trips)) => UnitEvent {
                result: unit(UnitStatus::Routes { count: trips.len() }),
                trips,
            },
            Ok(RouteOutcome::NoRouteFound) => {
                info!("{}: no {mode} route for {pair}", adapter.id());
                UnitEvent {
                    result: unit(UnitStatus::NoRouteFound),
                    trips: Vec::new(),
                }
            }
            Err(e) => {
                warn!("Dropping response: {e}");
                UnitEvent {
                    result: unit(UnitStatus::NormalizationFailed { message: e.message }),
                    trips: Vec::new(),
                }
            }
        }
    }

    /// Await `work` under the run timeout and the cancellation token.
    /// Returns false when the work was cut short.
    async fn drive<F: Future<Output = ()>>(&self, work: F) -> bool {
        let bounded = async {
            match self.run_timeout {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(()) => true,
                    Err(_) => {
                        warn!("Run timeout of {}s reached, aborting in-flight requests", limit.as_secs_f64());
                        false
                    }
                },
                None => {
                    work.await;
                    true
                }
            }
        };

        tokio::select! {
            complete = bounded => complete,
            _ = self.cancel.cancelled() => {
                warn!("Run cancelled, aborting in-flight requests");
                false
            }
        }
    }

    fn tick(&self, done: &AtomicU64, total: u64) {
        let completed = done.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(progress) = &self.progress {
            progress(completed, total);
        }
    }
}
