//! Record header names
//!
//! Header values are UTF-8 strings; keys are lower-case.

use std::collections::BTreeMap;

pub type Headers = BTreeMap<String, String>;

pub const TRACE_ID: &str = "trace-id";
pub const SPAN_ID: &str = "span-id";
pub const USER_ID: &str = "user-id";
pub const SOURCE_SERVICE: &str = "source-service";
pub const SOURCE_OPERATION: &str = "source-operation";
pub const TIMESTAMP: &str = "timestamp";

/// Mirrors the envelope's type tag for header-only routing
pub const EVENT_TYPE: &str = "event-type";

pub const DLT_ORIGINAL_TOPIC: &str = "dlt-original-topic";
pub const DLT_ORIGINAL_PARTITION: &str = "dlt-original-partition";
pub const DLT_ORIGINAL_OFFSET: &str = "dlt-original-offset";
pub const DLT_ERROR_CLASS: &str = "dlt-error-class";
pub const DLT_ERROR_MESSAGE: &str = "dlt-error-message";
pub const DLT_ATTEMPTS: &str = "dlt-attempts";

/// Inbound HTTP headers that seed a trace context
pub const HTTP_TRACE_ID: &str = "x-trace-id";
pub const HTTP_USER_ID: &str = "x-user-id";
