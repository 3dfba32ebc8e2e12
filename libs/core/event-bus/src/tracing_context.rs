//! Trace context propagation
//!
//! A [`TraceContext`] is a plain value passed explicitly to the code that
//! needs it. It is written into record headers with [`TraceContext::inject`],
//! read back with [`TraceContext::extract`], and attached to asynchronous work
//! with [`with_context`], which instruments the future with a `tracing` span so
//! the ids follow the task across threads without any ambient storage.
//!
//! Propagation is best effort: extraction never fails, missing or malformed
//! ids are replaced with freshly generated ones.

use chrono::{DateTime, Utc};
use std::future::Future;
use tracing::Instrument;
use tracing::instrument::Instrumented;
use uuid::Uuid;

use crate::headers::{self, Headers};

const TRACE_ID_LEN: usize = 32;
const SPAN_ID_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// Correlation id shared by every hop of a causal chain
    pub trace_id: String,
    /// Id of this hop, regenerated per hop
    pub span_id: String,
    pub user_id: Option<String>,
    pub source_service: Option<String>,
    pub source_operation: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TraceContext {
    /// Start a new causal chain.
    pub fn new_root(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            trace_id: generate_trace_id(),
            span_id: generate_span_id(),
            user_id: None,
            source_service: Some(service.into()),
            source_operation: Some(operation.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Next hop of the same chain: trace id, user and service carry over,
    /// span id and timestamp are new.
    pub fn child(&self, operation: impl Into<String>) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: generate_span_id(),
            user_id: self.user_id.clone(),
            source_service: self.source_service.clone(),
            source_operation: Some(operation.into()),
            timestamp: Utc::now(),
        }
    }

    /// Write this context into `carrier`, replacing any existing values.
    pub fn inject(&self, carrier: &mut Headers) {
        carrier.insert(headers::TRACE_ID.to_string(), self.trace_id.clone());
        carrier.insert(headers::SPAN_ID.to_string(), self.span_id.clone());
        carrier.insert(headers::TIMESTAMP.to_string(), self.timestamp.to_rfc3339());

        for (key, value) in [
            (headers::USER_ID, &self.user_id),
            (headers::SOURCE_SERVICE, &self.source_service),
            (headers::SOURCE_OPERATION, &self.source_operation),
        ] {
            match value {
                Some(value) => carrier.insert(key.to_string(), value.clone()),
                None => carrier.remove(key),
            };
        }
    }

    /// Inject only when `carrier` does not already carry a trace id.
    ///
    /// Returns whether headers were written.
    pub fn inject_if_absent(&self, carrier: &mut Headers) -> bool {
        if carrier.contains_key(headers::TRACE_ID) {
            return false;
        }
        self.inject(carrier);
        true
    }

    /// Read a context from `carrier`, synthesising whatever is missing.
    pub fn extract(carrier: &Headers) -> Self {
        let get = |key: &str| {
            carrier
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let trace_id = get(headers::TRACE_ID)
            .and_then(|id| normalize_id(&id, TRACE_ID_LEN))
            .unwrap_or_else(generate_trace_id);
        let span_id = get(headers::SPAN_ID)
            .and_then(|id| normalize_id(&id, SPAN_ID_LEN))
            .unwrap_or_else(generate_span_id);
        let timestamp = get(headers::TIMESTAMP)
            .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Self {
            trace_id,
            span_id,
            user_id: get(headers::USER_ID),
            source_service: get(headers::SOURCE_SERVICE),
            source_operation: get(headers::SOURCE_OPERATION),
            timestamp,
        }
    }

    /// Seed a context from an inbound HTTP request (`X-Trace-Id`, `X-User-Id`).
    pub fn from_http_headers(
        request_headers: &http::HeaderMap,
        service: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        let get = |name: &str| {
            request_headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };

        Self {
            trace_id: get(headers::HTTP_TRACE_ID)
                .and_then(|id| normalize_id(id, TRACE_ID_LEN))
                .unwrap_or_else(generate_trace_id),
            span_id: generate_span_id(),
            user_id: get(headers::HTTP_USER_ID).map(str::to_string),
            source_service: Some(service.into()),
            source_operation: Some(operation.into()),
            timestamp: Utc::now(),
        }
    }

    /// `tracing` span carrying this context's ids.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "trace",
            trace_id = %self.trace_id,
            span_id = %self.span_id,
            operation = self.source_operation.as_deref().unwrap_or("unknown"),
        )
    }
}

/// Bind `context` to `future` so everything it logs carries the same ids,
/// whichever worker thread ends up polling it.
pub fn with_context<F: Future>(future: F, context: &TraceContext) -> Instrumented<F> {
    future.instrument(context.span())
}

/// 32 lower-case hex characters
pub fn generate_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 16 lower-case hex characters
pub fn generate_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(SPAN_ID_LEN);
    id
}

/// Accept ids with or without dashes and in any case; reject anything else.
fn normalize_id(raw: &str, len: usize) -> Option<String> {
    let id: String = raw
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect();

    (id.len() == len && id.chars().all(|c| c.is_ascii_hexdigit())).then_some(id)
}
