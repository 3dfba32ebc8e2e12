use crate::{env_or_default, env_required, ConfigError, FromEnv};

/// MongoDB connection settings for the read-model store
#[derive(Clone, Debug)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

impl MongoConfig {
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
        }
    }
}

impl FromEnv for MongoConfig {
    /// MONGO_URI is required, MONGO_DATABASE defaults to `read_models`
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            uri: env_required("MONGO_URI")?,
            database: env_or_default("MONGO_DATABASE", "read_models"),
        })
    }
}
