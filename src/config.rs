//! Configuration management for Fieldgate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{FieldgateError, Result};
use crate::ratelimit::validate_scope;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "FIELDGATE";

/// Main configuration for the limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldgateConfig {
    /// Namespace mixed into every counter key
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Default counter store
    #[serde(default)]
    pub store: StoreConfig,

    /// Named alternate stores, referenced by a resource's `redis_client`
    #[serde(default)]
    pub stores: HashMap<String, StoreConfig>,

    /// Path to the resource limits file
    #[serde(default)]
    pub limits_path: Option<String>,

    /// What a request does when the store fails
    #[serde(default)]
    pub on_store_failure: StoreFailurePolicy,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for FieldgateConfig {
    fn default() -> Self {
        Self {
            scope: default_scope(),
            store: StoreConfig::default(),
            stores: HashMap::new(),
            limits_path: None,
            on_store_failure: StoreFailurePolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_scope() -> String {
    "graphql-query".to_string()
}

/// Counter store connection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Counters kept in this process
    #[default]
    Memory,
    /// Counters kept in a Redis server
    Redis {
        url: String,
        #[serde(default = "default_connect_timeout_ms")]
        connect_timeout_ms: u64,
        #[serde(default = "default_command_timeout_ms")]
        command_timeout_ms: u64,
    },
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_command_timeout_ms() -> u64 {
    500
}

/// How a whole-request evaluation reacts to an unavailable store.
///
/// Single-resource evaluation always reports the store error; this policy is
/// only applied when a request is evaluated as a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Fail the request with the store error
    #[default]
    Propagate,
    /// Allow the resource as if it were under its limit
    FailOpen,
    /// Reject the resource as if it were over its limit
    FailClosed,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FieldgateConfig {
    /// Load configuration from an optional YAML file, layered with
    /// `FIELDGATE__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::new(path, config::FileFormat::Yaml));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(|e| FieldgateError::Config(e.to_string()))?
            .validated()
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str::<Self>(yaml)
            .map_err(|e| FieldgateError::Config(e.to_string()))?
            .validated()
    }

    fn validated(self) -> Result<Self> {
        validate_scope(&self.scope)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FieldgateConfig::default();
        assert_eq!(config.scope, "graphql-query");
        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.on_store_failure, StoreFailurePolicy::Propagate);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.limits_path.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
scope: api-query
store:
  kind: redis
  url: redis://localhost:6379
stores:
  secondary:
    kind: redis
    url: redis://localhost:6380
    command_timeout_ms: 50
limits_path: limits.yaml
on_store_failure: fail_closed
logging:
  level: debug
  format: json
"#;
        let config = FieldgateConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.scope, "api-query");
        assert_eq!(
            config.store,
            StoreConfig::Redis {
                url: "redis://localhost:6379".to_string(),
                connect_timeout_ms: 1000,
                command_timeout_ms: 500,
            }
        );
        assert_eq!(
            config.stores["secondary"],
            StoreConfig::Redis {
                url: "redis://localhost:6380".to_string(),
                connect_timeout_ms: 1000,
                command_timeout_ms: 50,
            }
        );
        assert_eq!(config.limits_path.as_deref(), Some("limits.yaml"));
        assert_eq!(config.on_store_failure, StoreFailurePolicy::FailClosed);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = FieldgateConfig::from_yaml("{}").unwrap();
        assert_eq!(config.scope, "graphql-query");
        assert!(config.stores.is_empty());
    }

    #[test]
    fn test_scope_with_colon_is_rejected() {
        let result = FieldgateConfig::from_yaml("scope: \"graphql:query\"");
        assert!(matches!(result, Err(FieldgateError::Config(_))));

        let result = FieldgateConfig::from_yaml("scope: \"\"");
        assert!(matches!(result, Err(FieldgateError::Config(_))));
    }

    #[test]
    fn test_load_without_file() {
        let config = FieldgateConfig::load(None).unwrap();
        assert!(!config.scope.is_empty());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = FieldgateConfig::load(Some("/nonexistent/fieldgate.yaml"));
        assert!(matches!(result, Err(FieldgateError::Config(_))));
    }
}
