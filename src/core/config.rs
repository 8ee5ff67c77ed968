//! Run configuration
//!
//! Read once at run start from a JSON file. Backends, credentials, timeouts,
//! repetition count and the baseline backend all live here; nothing is
//! reloaded during a run.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use chrono_tz::Tz;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::core::adapter::{BackendAdapter, BackendId, BackendKind, TripTime, DEFAULT_TIMEOUT_MS, DEFAULT_TIMEZONE};
use crate::core::compare::DEFAULT_DIVERGENCE_RATIO;
use crate::core::error::{Error, Result};
use crate::core::mode::Mode;
use crate::core::plausibility::PlausibilityConfig;
use crate::core::retry::RetryPolicy;

/// Repetitions per (backend, pair) when the config does not say otherwise
pub const DEFAULT_REPETITIONS: usize = 5;

/// Connection settings for one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: BackendId,
    pub kind: BackendKind,
    pub base_url: String,
    /// Endpoint path overriding the protocol default
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Send the key in this header instead of the protocol's native mechanism
    #[serde(default)]
    pub api_key_header: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// IANA zone for backends that take local times, e.g. `Europe/Berlin`
    #[serde(default)]
    pub timezone: Option<Tz>,
    /// Restrict the canonical modes this backend is asked for
    #[serde(default)]
    pub modes: Option<Vec<Mode>>,
}

impl BackendConfig {
    pub fn new(id: &str, kind: BackendKind, base_url: &str) -> Self {
        Self {
            id: BackendId::from(id),
            kind,
            base_url: base_url.to_string(),
            path: None,
            api_key: None,
            api_key_env: None,
            api_key_header: None,
            timeout_ms: None,
            timezone: None,
            modes: None,
        }
    }

    /// Inline key first, then the named environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                self.api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|k| !k.is_empty())
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub backends: Vec<BackendConfig>,
    /// Reference backend for deltas; first backend when unset
    pub baseline: Option<BackendId>,
    pub repetitions: usize,
    pub default_timeout_ms: u64,
    /// Hard limit for a whole run; partial results are kept when it fires
    pub run_timeout_secs: Option<u64>,
    /// Coordinate pairs compared concurrently
    pub concurrency: usize,
    /// Requested departure; defaults to 08:00 UTC tomorrow
    pub departure: Option<DateTime<Utc>>,
    /// Local zone of the coordinate regions, used unless a backend sets its own
    pub timezone: Tz,
    pub retry: RetryPolicy,
    pub plausibility: PlausibilityConfig,
    pub divergence_ratio: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            baseline: None,
            repetitions: DEFAULT_REPETITIONS,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            run_timeout_secs: None,
            concurrency: num_cpus::get(),
            departure: None,
            timezone: DEFAULT_TIMEZONE,
            retry: RetryPolicy::default(),
            plausibility: PlausibilityConfig::default(),
            divergence_ratio: DEFAULT_DIVERGENCE_RATIO,
        }
    }
}

impl RunConfig {
    /// Load and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&raw)?;
        debug!(
            "Loaded {} backends from {}",
            config.backends.len(),
            path.as_ref().display()
        );
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: RunConfig =
            serde_json::from_str(raw).map_err(|e| Error::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn backend_ids(&self) -> Vec<BackendId> {
        self.backends.iter().map(|b| b.id.clone()).collect()
    }

    /// Look up a backend by id, suggesting the closest match on a miss
    pub fn backend(&self, name: &str) -> Result<&BackendConfig> {
        self.backends
            .iter()
            .find(|b| b.id.as_str() == name)
            .ok_or_else(|| Error::backend_not_found(name, &self.backend_ids()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::Config("no backends configured".to_string()));
        }

        let mut ids = HashSet::new();
        for backend in &self.backends {
            if !ids.insert(&backend.id) {
                return Err(Error::Config(format!("duplicate backend id '{}'", backend.id)));
            }
            if !(backend.base_url.starts_with("http://") || backend.base_url.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "backend '{}': base_url must be an http(s) URL, got '{}'",
                    backend.id, backend.base_url
                )));
            }
            if backend.kind.requires_api_key() && backend.resolve_api_key().is_none() {
                return Err(Error::Config(format!(
                    "backend '{}' ({}) requires an API key (api_key or api_key_env)",
                    backend.id, backend.kind
                )));
            }
            if backend.timeout_ms == Some(0) {
                return Err(Error::Config(format!("backend '{}': timeout_ms must be positive", backend.id)));
            }
        }

        if let Some(baseline) = &self.baseline {
            self.backend(baseline.as_str())?;
        }
        if self.repetitions == 0 {
            return Err(Error::InvalidInput("repetitions must be at least 1".to_string()));
        }
        if self.concurrency == 0 {
            return Err(Error::InvalidInput("concurrency must be at least 1".to_string()));
        }
        if self.default_timeout_ms == 0 {
            return Err(Error::InvalidInput("default_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn baseline_id(&self) -> Option<BackendId> {
        self.baseline
            .clone()
            .or_else(|| self.backends.first().map(|b| b.id.clone()))
    }

    /// Keep only the named backends. A baseline that is filtered out falls back to the first kept one.
    pub fn retain_backends(&mut self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        for name in names {
            self.backend(name)?;
        }
        self.backends.retain(|b| names.iter().any(|n| n == b.id.as_str()));

        if let Some(baseline) = &self.baseline {
            if !self.backends.iter().any(|b| &b.id == baseline) {
                warn!("Baseline '{baseline}' not selected, using '{}'", self.backends[0].id);
                self.baseline = None;
            }
        }
        Ok(())
    }

    pub fn departure_time(&self) -> DateTime<Utc> {
        self.departure.unwrap_or_else(|| next_morning(Utc::now()))
    }

    pub fn trip_time(&self) -> TripTime {
        TripTime::Departure(self.departure_time())
    }

    pub fn adapters(&self) -> Vec<BackendAdapter> {
        self.backends
            .iter()
            .map(|b| BackendAdapter::from_config(b, b.resolve_api_key(), self.default_timeout_ms, self.timezone))
            .collect()
    }
}

/// 08:00 UTC on the day after `now`
fn next_morning(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + ChronoDuration::days(1);
    let eight = NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default();
    tomorrow.and_time(eight).and_utc()
}
