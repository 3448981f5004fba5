//! Per-resource rate limit registration.
//!
//! A registry is built once, before any evaluation, from explicit
//! registrations or from a YAML limits file. Once built it is read-only and
//! can be shared across tasks without locking.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::key::DEFAULT_IDENTIFIER_KEY;
use super::window::FixedWindow;
use crate::error::{FieldgateError, Result};
use crate::store::CounterStore;

/// Longest accepted window.
pub const MAX_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Limits attached to one resource.
#[derive(Clone)]
pub struct ResourceLimitConfig {
    /// Attempts allowed per window
    pub threshold: u64,
    /// Window length
    pub window: Duration,
    /// Context key the identifier is read from
    pub identifier_key: String,
    /// Store used instead of the coordinator's default
    pub store_override: Option<Arc<dyn CounterStore>>,
}

impl ResourceLimitConfig {
    /// Create a limit keyed on the default `ip` context key.
    pub fn new(threshold: u64, window_secs: u64) -> Self {
        Self {
            threshold,
            window: Duration::from_secs(window_secs),
            identifier_key: DEFAULT_IDENTIFIER_KEY.to_string(),
            store_override: None,
        }
    }

    /// Read the identifier from `key` instead of `ip`.
    pub fn on(mut self, key: impl Into<String>) -> Self {
        self.identifier_key = key.into();
        self
    }

    /// Record counters in `store` instead of the default store.
    pub fn with_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store_override = Some(store);
        self
    }

    /// The fixed-window limit described by this config.
    pub fn limit(&self) -> FixedWindow {
        FixedWindow::new(self.threshold, self.window)
    }

    fn same_as(&self, other: &Self) -> bool {
        let same_store = match (&self.store_override, &other.store_override) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        self.threshold == other.threshold
            && self.window == other.window
            && self.identifier_key == other.identifier_key
            && same_store
    }

    fn validate(&self, resource: &str) -> Result<()> {
        if !is_name(resource) {
            return Err(FieldgateError::Config(format!(
                "resource name `{}` must match [A-Za-z_][A-Za-z0-9_]*",
                resource
            )));
        }
        if !is_name(&self.identifier_key) {
            return Err(FieldgateError::Config(format!(
                "identifier key `{}` for `{}` must match [A-Za-z_][A-Za-z0-9_]*",
                self.identifier_key, resource
            )));
        }
        if self.threshold == 0 {
            return Err(FieldgateError::Config(format!(
                "threshold for `{}` must be positive",
                resource
            )));
        }
        if self.window.is_zero() {
            return Err(FieldgateError::Config(format!(
                "interval for `{}` must be positive",
                resource
            )));
        }
        if self.window > MAX_WINDOW {
            return Err(FieldgateError::Config(format!(
                "interval for `{}` must be at most {}s, got {}s",
                resource,
                MAX_WINDOW.as_secs(),
                self.window.as_secs()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ResourceLimitConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLimitConfig")
            .field("threshold", &self.threshold)
            .field("window", &self.window)
            .field("identifier_key", &self.identifier_key)
            .field("store_override", &self.store_override.as_ref().map(|s| s.kind()))
            .finish()
    }
}

/// Names used inside counter keys must not contain the key separators.
fn is_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Collects registrations before the registry is frozen.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    resources: HashMap<String, ResourceLimitConfig>,
}

impl RegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register limits for `resource`.
    ///
    /// Registering the same limits twice is a no-op; registering different
    /// limits for a name that is already present fails.
    pub fn register(&mut self, resource: &str, config: ResourceLimitConfig) -> Result<&mut Self> {
        config.validate(resource)?;

        if let Some(existing) = self.resources.get(resource) {
            if existing.same_as(&config) {
                return Ok(self);
            }
            return Err(FieldgateError::DuplicateResource(resource.to_string()));
        }

        debug!(
            resource = %resource,
            threshold = config.threshold,
            window_secs = config.window.as_secs(),
            on = %config.identifier_key,
            "Registered rate limit"
        );
        self.resources.insert(resource.to_string(), config);
        Ok(self)
    }

    /// Freeze the registrations.
    pub fn build(self) -> ResourceRegistry {
        ResourceRegistry {
            resources: self.resources,
        }
    }
}

/// Read-only map from resource name to its limits.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: HashMap<String, ResourceLimitConfig>,
}

impl ResourceRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Get the limits for `resource`.
    pub fn lookup(&self, resource: &str) -> Result<&ResourceLimitConfig> {
        self.resources
            .get(resource)
            .ok_or_else(|| FieldgateError::UnknownResource(resource.to_string()))
    }

    /// Whether `resource` has limits registered.
    pub fn contains(&self, resource: &str) -> bool {
        self.resources.contains_key(resource)
    }

    /// Number of registered resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Registered resource names, sorted.
    pub fn resources(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.resources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// A limits file: the declarative attachment of limits to resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsFile {
    #[serde(default)]
    pub resources: Vec<ResourceRule>,
}

/// One resource entry of a limits file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRule {
    /// The resource name
    pub name: String,
    /// Attempts allowed per interval
    pub threshold: u64,
    /// Interval length in seconds
    pub interval: u64,
    /// Context key to read the identifier from
    #[serde(default)]
    pub on: Option<String>,
    /// Name of an alternate store from the service configuration
    #[serde(default)]
    pub redis_client: Option<String>,
}

impl LimitsFile {
    /// Load a limits file from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading resource limits");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a limits file from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| FieldgateError::Config(format!("Failed to parse limits file: {}", e)))
    }

    /// Build a registry, resolving `redis_client` names against `stores`.
    pub fn into_registry(
        self,
        stores: &HashMap<String, Arc<dyn CounterStore>>,
    ) -> Result<ResourceRegistry> {
        let mut builder = ResourceRegistry::builder();

        for rule in self.resources {
            let mut config = ResourceLimitConfig::new(rule.threshold, rule.interval);
            if let Some(on) = rule.on {
                config = config.on(on);
            }
            if let Some(store_name) = rule.redis_client {
                let store = stores.get(&store_name).ok_or_else(|| {
                    FieldgateError::Config(format!(
                        "resource `{}` uses unknown store `{}`",
                        rule.name, store_name
                    ))
                })?;
                config = config.with_store(store.clone());
            }
            builder.register(&rule.name, config)?;
        }

        let registry = builder.build();
        info!(resources = registry.len(), "Resource limits loaded");
        Ok(registry)
    }
}
