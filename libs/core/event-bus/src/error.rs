//! Error types for the event bus
//!
//! [`BusError`] covers transport failures (broker, encoding, subscriptions).
//! [`HandlerError`] is what a dispatch attempt returns; its [`ErrorClass`]
//! decides between retrying in place and dead-lettering immediately.

use std::fmt;
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Failure classes used by the reliability layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ErrorClass {
    /// Payload could not be decoded (malformed JSON, schema mismatch)
    Deserialization,
    /// A decoded field could not be converted to the expected type
    Conversion,
    /// Record exceeds the broker's size limit
    MessageTooLarge,
    /// Broker or store unavailable, timeouts
    Infrastructure,
    /// Handler-internal failure
    Business,
}

impl ErrorClass {
    /// Classes that can never succeed on retry
    pub const DEFAULT_NON_RETRYABLE: [ErrorClass; 3] = [
        ErrorClass::Deserialization,
        ErrorClass::Conversion,
        ErrorClass::MessageTooLarge,
    ];
}

/// Broker and transport errors
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Topic '{topic}' has no partition {partition}")]
    UnknownPartition { topic: String, partition: u32 },

    #[error("Invalid offset '{0}'")]
    InvalidOffset(String),

    #[error("Invalid topic pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Consumer is no longer a member of group '{0}'")]
    NotAMember(String),

    #[error("Lease on '{0}' is held by another consumer")]
    LeaseLost(String),

    #[error("Configuration error: {0}")]
    Config(#[from] core_config::ConfigError),

    #[error("Consumer task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// Error returned by a dispatch attempt
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Failed to decode event: {0}")]
    Deserialization(String),

    #[error("Failed to convert event data: {0}")]
    Conversion(String),

    #[error("Message too large: {0}")]
    MessageTooLarge(String),

    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),

    #[error("Handler failed: {0}")]
    Business(String),
}

impl HandlerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            HandlerError::Deserialization(_) => ErrorClass::Deserialization,
            HandlerError::Conversion(_) => ErrorClass::Conversion,
            HandlerError::MessageTooLarge(_) => ErrorClass::MessageTooLarge,
            HandlerError::Infrastructure(_) => ErrorClass::Infrastructure,
            HandlerError::Business(_) => ErrorClass::Business,
        }
    }

    pub fn infrastructure(err: impl fmt::Display) -> Self {
        HandlerError::Infrastructure(err.to_string())
    }

    pub fn business(err: impl fmt::Display) -> Self {
        HandlerError::Business(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Deserialization(err.to_string())
    }
}

impl From<BusError> for HandlerError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::MessageTooLarge { .. } => HandlerError::MessageTooLarge(err.to_string()),
            BusError::Serialization(e) => HandlerError::Conversion(e.to_string()),
            other => HandlerError::Infrastructure(other.to_string()),
        }
    }
}
