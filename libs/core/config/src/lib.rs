pub mod mongodb;
pub mod server;
pub mod tracing;

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Deployment environment, selects the log format
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env_or_default("APP_ENV", "development");

        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Read an environment variable, falling back to `default` when unset
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read an environment variable or fail with [`ConfigError::MissingEnvVar`]
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Read and parse an environment variable, using `default` when unset.
///
/// A set-but-unparseable value is an error, never silently replaced.
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Read a comma-separated list, parsing every non-empty item
pub fn env_list<T>(key: &str, default: &str) -> Result<Vec<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_or_default(key, default)
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse().map_err(|e: T::Err| ConfigError::ParseError {
                key: key.to_string(),
                details: format!("'{}': {}", item, e),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults_to_development() {
        temp_env::with_var_unset("APP_ENV", || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Development);
            assert!(env.is_development());
            assert!(!env.is_production());
        });
    }

    #[test]
    fn test_environment_production_case_insensitive() {
        temp_env::with_var("APP_ENV", Some("PRODUCTION"), || {
            assert_eq!(Environment::from_env(), Environment::Production);
        });
    }

    #[test]
    fn test_env_or_default_without_value() {
        temp_env::with_var_unset("EVENT_BUS_MISSING_VAR", || {
            assert_eq!(env_or_default("EVENT_BUS_MISSING_VAR", "fallback"), "fallback");
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("EVENT_BUS_REQUIRED", || {
            let err = env_required("EVENT_BUS_REQUIRED").unwrap_err();
            assert!(err.to_string().contains("EVENT_BUS_REQUIRED"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_env_parse_uses_default_when_unset() {
        temp_env::with_var_unset("EVENT_BUS_ATTEMPTS", || {
            assert_eq!(env_parse("EVENT_BUS_ATTEMPTS", 3u32).unwrap(), 3);
        });
    }

    #[test]
    fn test_env_parse_reads_value() {
        temp_env::with_var("EVENT_BUS_MULTIPLIER", Some(" 1.5 "), || {
            assert_eq!(env_parse("EVENT_BUS_MULTIPLIER", 2.0f64).unwrap(), 1.5);
        });
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        temp_env::with_var("EVENT_BUS_ATTEMPTS", Some("three"), || {
            let err = env_parse("EVENT_BUS_ATTEMPTS", 3u32).unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { ref key, .. } if key == "EVENT_BUS_ATTEMPTS"));
        });
    }

    #[test]
    fn test_env_list_splits_and_trims() {
        temp_env::with_var("EVENT_BUS_PORTS", Some("1, 2,,3 "), || {
            let ports: Vec<u16> = env_list("EVENT_BUS_PORTS", "").unwrap();
            assert_eq!(ports, vec![1, 2, 3]);
        });
    }

    #[test]
    fn test_env_list_default() {
        temp_env::with_var_unset("EVENT_BUS_PORTS", || {
            let ports: Vec<u16> = env_list("EVENT_BUS_PORTS", "80,443").unwrap();
            assert_eq!(ports, vec![80, 443]);
        });
    }

    #[test]
    fn test_env_list_reports_bad_item() {
        temp_env::with_var("EVENT_BUS_PORTS", Some("80,http"), || {
            let err = env_list::<u16>("EVENT_BUS_PORTS", "").unwrap_err();
            assert!(err.to_string().contains("http"));
        });
    }
}
