//! Backend adapter
//!
//! One [`BackendAdapter`] per configured routing service. The adapter turns a
//! [`BackendRequest`] into the backend's native HTTP call, applies a bounded
//! timeout and classifies the outcome. It never retries: retry policy lives in
//! [`crate::core::retry`] and is applied only on the comparison path.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use log::debug;
use once_cell::sync::Lazy;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};

use crate::core::backends::{self, Endpoint};
use crate::core::config::BackendConfig;
use crate::core::coords::CoordinatePair;
use crate::core::error::QueryError;
use crate::core::mode::Mode;

/// Timeout applied when a backend does not configure its own
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Local zone of the built-in coordinate regions
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Berlin;

/// Shared HTTP client; per-request timeouts are set on each call
static GLOBAL_CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(20)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(format!("butterfly-compare/{}", env!("BUTTERFLY_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
});

/// Configured backend identifier, e.g. `motis` or `google-prod`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(String);

impl BackendId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BackendId {
    fn from(s: &str) -> Self {
        BackendId(s.to_string())
    }
}

impl From<String> for BackendId {
    fn from(s: String) -> Self {
        BackendId(s)
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supported routing service protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Motis,
    Google,
    Valhalla,
    Otp,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Motis => "motis",
            BackendKind::Google => "google",
            BackendKind::Valhalla => "valhalla",
            BackendKind::Otp => "otp",
        }
    }

    /// Whether the service refuses requests without an API key
    pub fn requires_api_key(&self) -> bool {
        matches!(self, BackendKind::Google)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested departure or arrival instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "at", rename_all = "snake_case")]
pub enum TripTime {
    Departure(DateTime<Utc>),
    Arrival(DateTime<Utc>),
}

impl TripTime {
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            TripTime::Departure(t) | TripTime::Arrival(t) => *t,
        }
    }

    pub fn is_arrival(&self) -> bool {
        matches!(self, TripTime::Arrival(_))
    }
}

/// A single routing query: one pair, one canonical mode
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub pair: CoordinatePair,
    pub mode: Mode,
    pub time: Option<TripTime>,
}

impl BackendRequest {
    pub fn new(pair: CoordinatePair, mode: Mode) -> Self {
        Self {
            pair,
            mode,
            time: None,
        }
    }

    pub fn with_time(mut self, time: TripTime) -> Self {
        self.time = Some(time);
        self
    }
}

/// Unparsed backend answer that passed status classification
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub backend: BackendId,
    pub kind: BackendKind,
    pub status: u16,
    pub body: Bytes,
    pub request: BackendRequest,
}

impl RawResponse {
    pub fn payload_bytes(&self) -> usize {
        self.body.len()
    }
}

/// Uniform query contract over one routing service
#[derive(Debug, Clone)]
pub struct BackendAdapter {
    id: BackendId,
    kind: BackendKind,
    endpoint: Endpoint,
    timeout: Duration,
    modes: Option<Vec<Mode>>,
}

impl BackendAdapter {
    pub fn new(id: impl Into<BackendId>, kind: BackendKind, base_url: &str) -> Self {
        Self {
            id: id.into(),
            kind,
            endpoint: Endpoint::new(base_url),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            modes: None,
        }
    }

    /// Build an adapter from validated configuration; `api_key` is the already resolved key
    pub fn from_config(
        config: &BackendConfig,
        api_key: Option<String>,
        default_timeout_ms: u64,
        default_timezone: Tz,
    ) -> Self {
        let mut adapter = Self::new(config.id.clone(), config.kind, &config.base_url)
            .with_timeout(Duration::from_millis(config.timeout_ms.unwrap_or(default_timeout_ms)))
            .with_timezone(config.timezone.unwrap_or(default_timezone));
        adapter.endpoint.path = config.path.clone();
        adapter.endpoint.api_key = api_key;
        adapter.endpoint.api_key_header = config.api_key_header.clone();
        adapter.modes = config.modes.clone();
        adapter
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Zone used to render request times for backends that expect local time
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.endpoint.timezone = timezone;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.endpoint.timezone
    }

    pub fn with_api_key(mut self, key: &str) -> Self {
        self.endpoint.api_key = Some(key.to_string());
        self
    }

    pub fn with_modes(mut self, modes: Vec<Mode>) -> Self {
        self.modes = Some(modes);
        self
    }

    pub fn id(&self) -> &BackendId {
        &self.id
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Canonical modes this adapter will accept
    pub fn supported_modes(&self) -> Vec<Mode> {
        Mode::ALL
            .into_iter()
            .filter(|m| self.supports(*m))
            .collect()
    }

    pub fn supports(&self, mode: Mode) -> bool {
        let native = backends::native_mode(self.kind, mode).is_some();
        let allowed = self.modes.as_ref().map_or(true, |m| m.contains(&mode));
        native && allowed
    }

    /// Issue one request. Unsupported modes fail before any network I/O.
    pub async fn query(&self, request: &BackendRequest) -> Result<RawResponse, QueryError> {
        if !self.supports(request.mode) {
            return Err(QueryError::UnsupportedMode {
                backend: self.id.clone(),
                mode: request.mode,
            });
        }

        let call = backends::prepare(self.kind, &self.endpoint, request);
        debug!("{} {} {}", self.id, call.method, call.url);

        let mut builder = GLOBAL_CLIENT
            .request(call.method.clone(), &call.url)
            .timeout(self.timeout)
            .query(&call.query);
        for (name, value) in &call.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(json) = &call.json {
            builder = builder.json(json);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| QueryError::from_reqwest(&self.id, self.timeout, e))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| QueryError::from_reqwest(&self.id, self.timeout, e))?;

        backends::check_response(self.kind, &self.id, status, &body)?;

        Ok(RawResponse {
            backend: self.id.clone(),
            kind: self.kind,
            status,
            body,
            request: request.clone(),
        })
    }
}
