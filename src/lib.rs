//! # Butterfly-compare Library
//!
//! Sends the same origin/destination queries to several routing backends,
//! normalizes their answers into one trip model and lines them up against a
//! baseline backend. The same adapters also drive latency benchmarks.
//!
//! ## Features
//!
//! - **Four protocols**: MOTIS, Google Directions, Valhalla and OpenTripPlanner
//! - **One trip model**: seconds and meters for every backend, legs in order
//! - **Plausibility rules**: speed bounds, leg consistency and degenerate pairs
//! - **Benchmarks**: per-repetition latency, CPU time and payload size with
//!   percentile summaries
//! - **Partial results**: a run timeout or Ctrl-C keeps everything finished so far
//!
//! ## Comparing backends
//!
//! ```rust,no_run
//! use butterfly_compare::{Mode, PairFilter, RunConfig, Scenario};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfig::from_file("compare.json")?;
//!     let filter = PairFilter {
//!         scenario: Some(Scenario::Local),
//!         region: Some("aachen".to_string()),
//!     };
//!
//!     let report = butterfly_compare::compare(&config, &filter, &[Mode::Transit]).await?;
//!     for row in report.comparison_rows() {
//!         println!("{}", serde_json::to_string(&row)?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Benchmarking
//!
//! ```rust,no_run
//! use butterfly_compare::{Mode, PairFilter, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RunConfig::from_file("compare.json")?;
//!     let report =
//!         butterfly_compare::benchmark(&config, &PairFilter::default(), Mode::Driving).await?;
//!     for summary in report.summaries() {
//!         println!("{} p50={:?}", summary.backend, summary.latency.map(|l| l.p50_ms));
//!     }
//!     Ok(())
//! }
//! ```

pub use crate::core::adapter::{
    BackendAdapter, BackendId, BackendKind, BackendRequest, RawResponse, TripTime, DEFAULT_TIMEOUT_MS,
    DEFAULT_TIMEZONE,
};
pub use crate::core::benchmark::{measure, BenchmarkOutcome, BenchmarkRecord, BenchmarkRunner};
pub use crate::core::compare::{
    aggregate, Absence, Aggregator, ComparisonRow, Delta, Slot, DEFAULT_DIVERGENCE_RATIO,
};
pub use crate::core::config::{BackendConfig, RunConfig, DEFAULT_REPETITIONS};
pub use crate::core::coords::{
    haversine_m, CoordinatePair, CoordinateRegistry, LatLon, PairFilter, PairKey, Scenario,
};
pub use crate::core::error::{Error, ErrorKind, NormalizationError, QueryError, Result};
pub use crate::core::mode::Mode;
pub use crate::core::normalize::{decode_polyline, normalize, path_length_m};
pub use crate::core::plausibility::{
    PlausibilityChecker, PlausibilityConfig, PlausibilityVerdict, Rule, SpeedLimits, Violation,
};
pub use crate::core::resources::ResourceSnapshot;
pub use crate::core::retry::RetryPolicy;
pub use crate::core::rows::{BenchmarkRow, ComparisonOutputRow, TripRow};
pub use crate::core::session::{
    BenchmarkReport, CompareReport, DisabledBackends, ProgressCallback, Session, UnitResult,
    UnitStatus,
};
pub use crate::core::stats::{failure_rate, latency_stats, summarize, BenchmarkSummary, LatencyStats};
pub use crate::core::trip::{Leg, RouteOutcome, Trip};

// Internal modules
mod core;

/// Coordinate pairs from the built-in registry matching `filter`
///
/// # Examples
/// ```rust,no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use butterfly_compare::{PairFilter, Scenario};
///
/// let filter = PairFilter {
///     scenario: Some(Scenario::LongDistance),
///     region: None,
/// };
/// for pair in butterfly_compare::coordinate_pairs(&filter)? {
///     println!("{pair}");
/// }
/// # Ok(())
/// # }
/// ```
pub fn coordinate_pairs(filter: &PairFilter) -> Result<Vec<CoordinatePair>> {
    Ok(CoordinateRegistry::builtin()?.select(filter))
}

/// Compare every configured backend on the built-in pairs matching `filter`
///
/// Runs with the configuration's timeouts, retry policy and baseline. Use
/// [`Session`] directly for cancellation or progress reporting.
pub async fn compare(config: &RunConfig, filter: &PairFilter, modes: &[Mode]) -> Result<CompareReport> {
    let pairs = coordinate_pairs(filter)?;
    if pairs.is_empty() {
        return Err(Error::InvalidInput("no coordinate pairs match the filter".to_string()));
    }
    let session = Session::from_config(config)?;
    Ok(session.compare(&pairs, modes).await)
}

/// Benchmark every configured backend on the built-in pairs matching `filter`
pub async fn benchmark(config: &RunConfig, filter: &PairFilter, mode: Mode) -> Result<BenchmarkReport> {
    let pairs = coordinate_pairs(filter)?;
    if pairs.is_empty() {
        return Err(Error::InvalidInput("no coordinate pairs match the filter".to_string()));
    }
    let session = Session::from_config(config)?;
    Ok(session.benchmark(&pairs, mode).await)
}
