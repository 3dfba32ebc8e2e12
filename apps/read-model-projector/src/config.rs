//! Service configuration, read once at startup

use core_config::mongodb::MongoConfig;
use core_config::server::ServerConfig;
use core_config::{ConfigError, Environment, FromEnv, env_parse};
use event_bus::{BrokerConfig, ConsumerConfig};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StoreBackend {
    /// Process-local, lost on restart
    Memory,
    Mongo,
}

#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub consumer: ConsumerConfig,
    pub store: StoreBackend,
    /// Present when `store` is [`StoreBackend::Mongo`]
    pub mongo: Option<MongoConfig>,
}

impl FromEnv for ProjectorConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let store = env_parse("STORE_BACKEND", StoreBackend::Mongo)?;
        let mongo = match store {
            StoreBackend::Mongo => Some(MongoConfig::from_env()?),
            StoreBackend::Memory => None,
        };

        Ok(Self {
            environment: Environment::from_env(),
            server: ServerConfig::from_env()?,
            broker: BrokerConfig::from_env()?,
            consumer: ConsumerConfig::from_env()?,
            store,
            mongo,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::BrokerBackend;

    #[test]
    fn test_all_in_memory() {
        temp_env::with_vars(
            [
                ("SERVICE_NAME", Some("read-model-projector")),
                ("BROKER_BACKEND", Some("memory")),
                ("STORE_BACKEND", Some("Memory")),
                ("CONSUMER_CONCURRENCY", Some("4")),
                ("MONGO_URI", None),
            ],
            || {
                let config = ProjectorConfig::from_env().unwrap();
                assert_eq!(config.store, StoreBackend::Memory);
                assert!(config.mongo.is_none());
                assert_eq!(config.broker.backend, BrokerBackend::Memory);
                assert_eq!(config.consumer.group_id, "read-model-projector-group");
                assert_eq!(config.consumer.concurrency, 4);
            },
        );
    }

    #[test]
    fn test_mongo_store_requires_uri() {
        temp_env::with_vars(
            [
                ("SERVICE_NAME", Some("read-model-projector")),
                ("BROKER_BACKEND", Some("memory")),
                ("STORE_BACKEND", None),
                ("MONGO_URI", None),
            ],
            || {
                let err = ProjectorConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("MONGO_URI"));
            },
        );
    }

    #[test]
    fn test_unknown_store_backend_is_rejected() {
        temp_env::with_vars(
            [
                ("SERVICE_NAME", Some("read-model-projector")),
                ("STORE_BACKEND", Some("cassandra")),
            ],
            || {
                let err = ProjectorConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("STORE_BACKEND"));
            },
        );
    }
}
