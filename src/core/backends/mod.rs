//! Per-backend wire protocols
//!
//! Each routing service gets one [`Protocol`] implementation owning its mode
//! vocabulary, request layout, status classification and field mapping onto
//! the canonical trip model. Callers only ever go through the dispatch
//! functions in this module, keyed on [`BackendKind`].

mod google;
mod motis;
mod otp;
mod valhalla;

use chrono_tz::Tz;
use reqwest::Method;
use serde_json::Value;

use crate::core::adapter::{BackendId, BackendKind, BackendRequest, DEFAULT_TIMEZONE};
use crate::core::error::{NormalizationError, QueryError};
use crate::core::mode::Mode;
use crate::core::trip::RouteOutcome;

pub(crate) use google::Google;
pub(crate) use motis::Motis;
pub(crate) use otp::Otp;
pub(crate) use valhalla::Valhalla;

/// Longest error body kept in a `QueryError::Backend`
const MAX_ERROR_BODY: usize = 512;

/// Where and how to reach one backend
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub base_url: String,
    /// Overrides the protocol's default path
    pub path: Option<String>,
    pub api_key: Option<String>,
    /// Send the key in this header instead of the protocol's native mechanism
    pub api_key_header: Option<String>,
    /// Zone for protocols that take naive local wall-clock times
    pub timezone: Tz,
}

impl Endpoint {
    pub(crate) fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            path: None,
            api_key: None,
            api_key_header: None,
            timezone: DEFAULT_TIMEZONE,
        }
    }

    pub(crate) fn url(&self, default_path: &str) -> String {
        let path = self.path.as_deref().unwrap_or(default_path);
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Header-based credentials, when configured
    pub(crate) fn auth_headers(&self) -> Vec<(String, String)> {
        match (&self.api_key_header, &self.api_key) {
            (Some(header), Some(key)) => vec![(header.clone(), key.clone())],
            _ => Vec::new(),
        }
    }
}

/// A fully described HTTP call, independent of the client that sends it
#[derive(Debug, Clone)]
pub struct HttpCall {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub json: Option<Value>,
}

/// Inputs shared by every field mapping
pub(crate) struct NormalizeContext<'a> {
    pub backend: &'a BackendId,
    pub request: &'a BackendRequest,
}

impl NormalizeContext<'_> {
    pub(crate) fn error(&self, message: impl Into<String>) -> NormalizationError {
        NormalizationError::new(self.backend, message)
    }
}

pub(crate) trait Protocol {
    /// Native mode name for a canonical mode, `None` when unsupported
    fn native_mode(mode: Mode) -> Option<&'static str>;

    fn prepare(endpoint: &Endpoint, request: &BackendRequest) -> HttpCall;

    /// Decide whether a response is usable. Bodies that encode "no route"
    /// must pass so normalization can report `NoRouteFound`.
    fn check_response(backend: &BackendId, status: u16, body: &[u8]) -> Result<(), QueryError> {
        default_check(backend, status, body)
    }

    fn normalize(ctx: &NormalizeContext<'_>, body: &[u8]) -> Result<RouteOutcome, NormalizationError>;
}

/// 2xx passes, 401/403 are auth failures, everything else is a backend error
pub(crate) fn default_check(backend: &BackendId, status: u16, body: &[u8]) -> Result<(), QueryError> {
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(QueryError::Auth {
            backend: backend.clone(),
            message: format!("HTTP {status}: {}", truncate_body(body)),
        }),
        _ => Err(QueryError::Backend {
            backend: backend.clone(),
            status,
            body: truncate_body(body),
        }),
    }
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_ERROR_BODY {
        return text.into_owned();
    }
    let mut end = MAX_ERROR_BODY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

pub(crate) fn native_mode(kind: BackendKind, mode: Mode) -> Option<&'static str> {
    match kind {
        BackendKind::Motis => Motis::native_mode(mode),
        BackendKind::Google => Google::native_mode(mode),
        BackendKind::Valhalla => Valhalla::native_mode(mode),
        BackendKind::Otp => Otp::native_mode(mode),
    }
}

pub(crate) fn prepare(kind: BackendKind, endpoint: &Endpoint, request: &BackendRequest) -> HttpCall {
    match kind {
        BackendKind::Motis => Motis::prepare(endpoint, request),
        BackendKind::Google => Google::prepare(endpoint, request),
        BackendKind::Valhalla => Valhalla::prepare(endpoint, request),
        BackendKind::Otp => Otp::prepare(endpoint, request),
    }
}

pub(crate) fn check_response(
    kind: BackendKind,
    backend: &BackendId,
    status: u16,
    body: &[u8],
) -> Result<(), QueryError> {
    match kind {
        BackendKind::Motis => Motis::check_response(backend, status, body),
        BackendKind::Google => Google::check_response(backend, status, body),
        BackendKind::Valhalla => Valhalla::check_response(backend, status, body),
        BackendKind::Otp => Otp::check_response(backend, status, body),
    }
}

pub(crate) fn normalize(
    kind: BackendKind,
    ctx: &NormalizeContext<'_>,
    body: &[u8],
) -> Result<RouteOutcome, NormalizationError> {
    match kind {
        BackendKind::Motis => Motis::normalize(ctx, body),
        BackendKind::Google => Google::normalize(ctx, body),
        BackendKind::Valhalla => Valhalla::normalize(ctx, body),
        BackendKind::Otp => Otp::normalize(ctx, body),
    }
}
