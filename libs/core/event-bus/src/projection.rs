//! Provenance stamped on read-model documents
//!
//! Every projection write records which hop last touched the document, so an
//! operator can trace a read-model state back to the event that produced it.

use chrono::{DateTime, SecondsFormat, Utc};
use document_store::Update;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::ConsumedEvent;

pub const UPDATED_AT: &str = "updatedAt";

pub const LAST_TRACE_ID: &str = "lastTraceId";
pub const LAST_SPAN_ID: &str = "lastSpanId";
pub const LAST_OPERATION: &str = "lastOperation";
pub const LAST_UPDATED_AT: &str = "lastUpdatedAt";

/// RFC 3339 string in UTC, as stored on read documents
pub fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// `updatedAt` from the event plus the provenance of this hop
pub fn stamped(event: &ConsumedEvent, operation: &str) -> Update {
    Update::new()
        .set(UPDATED_AT, timestamp(event.envelope.timestamp))
        .set_all(Provenance::stamp(event, operation).fields())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    #[serde(default)]
    pub last_trace_id: Option<String>,
    #[serde(default)]
    pub last_span_id: Option<String>,
    #[serde(default)]
    pub last_operation: Option<String>,
    #[serde(default)]
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl Provenance {
    /// Stamp for `operation` applied while handling `event`, timed now.
    pub fn stamp(event: &ConsumedEvent, operation: &str) -> Self {
        Self {
            last_trace_id: Some(event.context.trace_id.clone()),
            last_span_id: Some(event.context.span_id.clone()),
            last_operation: Some(operation.to_string()),
            last_updated_at: Some(Utc::now()),
        }
    }

    /// Field/value pairs for a partial update.
    pub fn fields(&self) -> [(&'static str, Value); 4] {
        [
            (LAST_TRACE_ID, Value::from(self.last_trace_id.clone())),
            (LAST_SPAN_ID, Value::from(self.last_span_id.clone())),
            (LAST_OPERATION, Value::from(self.last_operation.clone())),
            (
                LAST_UPDATED_AT,
                self.last_updated_at.map_or(Value::Null, timestamp),
            ),
        ]
    }
}
