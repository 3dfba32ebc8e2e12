//! Broker and consumer configuration

use core_config::{ConfigError, FromEnv, env_list, env_or_default, env_parse, env_required};
use std::time::Duration;
use strum::{Display, EnumString};

use crate::broker::Subscription;
use crate::error::{BusError, ErrorClass};
use crate::reliability::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BrokerBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub backend: BrokerBackend,
    /// Bootstrap address, unused by the in-memory backend
    pub url: Option<String>,
    pub partitions: u32,
    pub max_message_bytes: usize,
    pub max_stream_length: usize,
}

impl BrokerConfig {
    pub fn memory(partitions: u32) -> Self {
        Self {
            backend: BrokerBackend::Memory,
            url: None,
            partitions,
            max_message_bytes: 1024 * 1024,
            max_stream_length: 100_000,
        }
    }
}

impl FromEnv for BrokerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let backend: BrokerBackend = env_parse("BROKER_BACKEND", BrokerBackend::Redis)?;
        let url = match backend {
            BrokerBackend::Memory => None,
            BrokerBackend::Redis => Some(
                env_required("BROKER_URL").or_else(|_| env_required("REDIS_URL"))
                    .map_err(|_| ConfigError::MissingEnvVar("BROKER_URL".to_string()))?,
            ),
        };

        Ok(Self {
            backend,
            url,
            partitions: env_parse("BROKER_PARTITIONS", 3u32)?.max(1),
            max_message_bytes: env_parse("BROKER_MAX_MESSAGE_BYTES", 1024 * 1024)?,
            max_stream_length: env_parse("BROKER_MAX_STREAM_LENGTH", 100_000)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub service_name: String,
    pub group_id: String,
    /// Full-match regex over topic names
    pub topic_pattern: String,
    pub concurrency: usize,
    pub batch_size: usize,
    pub poll_timeout: Duration,
    pub retry: RetryPolicy,
    pub non_retryable: Vec<ErrorClass>,
}

impl ConsumerConfig {
    /// Defaults for `service_name`: group `<service>-group`, every `*.event` topic.
    pub fn new(service_name: impl Into<String>) -> Self {
        let service_name = service_name.into();
        Self {
            group_id: format!("{service_name}-group"),
            service_name,
            topic_pattern: r".*\.event".to_string(),
            concurrency: 1,
            batch_size: 50,
            poll_timeout: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            non_retryable: ErrorClass::DEFAULT_NON_RETRYABLE.to_vec(),
        }
    }

    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn with_topic_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.topic_pattern = pattern.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_non_retryable(mut self, classes: Vec<ErrorClass>) -> Self {
        self.non_retryable = classes;
        self
    }

    pub fn subscription(&self) -> Result<Subscription, BusError> {
        Subscription::pattern(&self.topic_pattern)
    }
}

impl FromEnv for ConsumerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let service_name = env_required("SERVICE_NAME")?;
        let defaults = ConsumerConfig::new(service_name);

        let retry = RetryPolicy::new()
            .with_max_attempts(env_parse("RETRY_MAX_ATTEMPTS", 3)?)
            .with_initial_interval(Duration::from_millis(env_parse(
                "RETRY_INITIAL_INTERVAL_MS",
                1000,
            )?))
            .with_multiplier(env_parse("RETRY_BACKOFF_MULTIPLIER", 2.0)?)
            .with_max_interval(Duration::from_millis(env_parse("RETRY_MAX_INTERVAL_MS", 60_000)?));

        let non_retryable = env_list(
            "NON_RETRYABLE_ERRORS",
            "deserialization,conversion,message_too_large",
        )?;

        let group_id = env_or_default("CONSUMER_GROUP_ID", &defaults.group_id);
        let topic_pattern = env_or_default("TOPIC_PATTERN", &defaults.topic_pattern);

        Ok(defaults
            .with_group_id(group_id)
            .with_topic_pattern(topic_pattern)
            .with_concurrency(env_parse("CONSUMER_CONCURRENCY", 1)?)
            .with_batch_size(env_parse("CONSUMER_BATCH_SIZE", 50)?)
            .with_poll_timeout(Duration::from_millis(env_parse("CONSUMER_POLL_TIMEOUT_MS", 1000)?))
            .with_retry(retry)
            .with_non_retryable(non_retryable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONSUMER_VARS: [&str; 13] = [
        "CONSUMER_GROUP_ID",
        "TOPIC_PATTERN",
        "CONSUMER_CONCURRENCY",
        "CONSUMER_BATCH_SIZE",
        "CONSUMER_POLL_TIMEOUT_MS",
        "RETRY_MAX_ATTEMPTS",
        "RETRY_INITIAL_INTERVAL_MS",
        "RETRY_BACKOFF_MULTIPLIER",
        "RETRY_MAX_INTERVAL_MS",
        "NON_RETRYABLE_ERRORS",
        "BROKER_PARTITIONS",
        "BROKER_MAX_MESSAGE_BYTES",
        "BROKER_MAX_STREAM_LENGTH",
    ];

    #[test]
    fn test_consumer_defaults() {
        temp_env::with_vars_unset(CONSUMER_VARS, || {
            temp_env::with_var("SERVICE_NAME", Some("customer-read"), || {
                let config = ConsumerConfig::from_env().unwrap();
                assert_eq!(config.group_id, "customer-read-group");
                assert_eq!(config.topic_pattern, r".*\.event");
                assert_eq!(config.concurrency, 1);
                assert_eq!(config.batch_size, 50);
                assert_eq!(config.poll_timeout, Duration::from_secs(1));
                assert_eq!(config.retry, RetryPolicy::default());
                assert_eq!(config.non_retryable, ErrorClass::DEFAULT_NON_RETRYABLE.to_vec());
                assert!(config.subscription().unwrap().matches("customer.deleted.event"));
            });
        });
    }

    #[test]
    fn test_consumer_overrides() {
        temp_env::with_vars(
            [
                ("SERVICE_NAME", Some("catalog-read")),
                ("CONSUMER_GROUP_ID", Some("catalog-projections")),
                ("TOPIC_PATTERN", Some(r"product\..*")),
                ("CONSUMER_CONCURRENCY", Some("4")),
                ("RETRY_MAX_ATTEMPTS", Some("5")),
                ("RETRY_INITIAL_INTERVAL_MS", Some("250")),
                ("RETRY_BACKOFF_MULTIPLIER", Some("1.5")),
                ("RETRY_MAX_INTERVAL_MS", Some("5000")),
                ("NON_RETRYABLE_ERRORS", Some("deserialization, business")),
            ],
            || {
                let config = ConsumerConfig::from_env().unwrap();
                assert_eq!(config.group_id, "catalog-projections");
                assert_eq!(config.concurrency, 4);
                assert_eq!(config.retry.max_attempts, 5);
                assert_eq!(config.retry.initial_interval, Duration::from_millis(250));
                assert_eq!(config.retry.multiplier, 1.5);
                assert_eq!(config.retry.max_interval, Duration::from_secs(5));
                assert_eq!(
                    config.non_retryable,
                    vec![ErrorClass::Deserialization, ErrorClass::Business]
                );
                assert!(config.subscription().unwrap().matches("product.created.event"));
            },
        );
    }

    #[test]
    fn test_consumer_requires_service_name() {
        temp_env::with_var_unset("SERVICE_NAME", || {
            assert!(matches!(
                ConsumerConfig::from_env(),
                Err(ConfigError::MissingEnvVar(key)) if key == "SERVICE_NAME"
            ));
        });
    }

    #[test]
    fn test_unknown_error_class_is_rejected() {
        temp_env::with_vars(
            [
                ("SERVICE_NAME", Some("svc")),
                ("NON_RETRYABLE_ERRORS", Some("deserialization,timeout")),
            ],
            || {
                assert!(matches!(
                    ConsumerConfig::from_env(),
                    Err(ConfigError::ParseError { .. })
                ));
            },
        );
    }

    #[test]
    fn test_broker_memory_backend_needs_no_url() {
        temp_env::with_vars(
            [
                ("BROKER_BACKEND", Some("memory")),
                ("BROKER_URL", None),
                ("REDIS_URL", None),
                ("BROKER_PARTITIONS", Some("6")),
            ],
            || {
                let config = BrokerConfig::from_env().unwrap();
                assert_eq!(config.backend, BrokerBackend::Memory);
                assert!(config.url.is_none());
                assert_eq!(config.partitions, 6);
            },
        );
    }

    #[test]
    fn test_broker_redis_falls_back_to_redis_url() {
        temp_env::with_vars(
            [
                ("BROKER_BACKEND", None),
                ("BROKER_URL", None),
                ("REDIS_URL", Some("redis://cache:6379")),
            ],
            || {
                let config = BrokerConfig::from_env().unwrap();
                assert_eq!(config.backend, BrokerBackend::Redis);
                assert_eq!(config.url.as_deref(), Some("redis://cache:6379"));
            },
        );
    }

    #[test]
    fn test_broker_redis_requires_url() {
        temp_env::with_vars(
            [
                ("BROKER_BACKEND", Some("redis")),
                ("BROKER_URL", None::<&str>),
                ("REDIS_URL", None),
            ],
            || {
                assert!(matches!(
                    BrokerConfig::from_env(),
                    Err(ConfigError::MissingEnvVar(key)) if key == "BROKER_URL"
                ));
            },
        );
    }

    #[test]
    fn test_broker_backend_parse_error() {
        temp_env::with_var("BROKER_BACKEND", Some("kafka"), || {
            assert!(matches!(
                BrokerConfig::from_env(),
                Err(ConfigError::ParseError { .. })
            ));
        });
    }
}
