//! Counter key construction.

use crate::error::{FieldgateError, Result};

/// Prefix shared by every counter key written to a store.
pub const KEY_PREFIX: &str = "ratelimit";

/// Context key used when a resource does not name one.
pub const DEFAULT_IDENTIFIER_KEY: &str = "ip";

/// Check that `scope` can be embedded in counter keys.
///
/// Identifiers are located by the last `:` of a key, so a scope must not
/// contain one. An empty scope is rejected as well.
pub fn validate_scope(scope: &str) -> Result<()> {
    if scope.is_empty() {
        return Err(FieldgateError::Config("scope must not be empty".to_string()));
    }
    if scope.contains(':') {
        return Err(FieldgateError::Config(format!(
            "scope `{}` must not contain `:`",
            scope
        )));
    }
    Ok(())
}

/// A key that uniquely identifies one identifier's counter for one resource.
///
/// Rendered as `ratelimit:{identifier}:{scope}-{resource}[-{identifier_key}]`.
/// The suffix is left out for the default `ip` identifier key so that keys
/// written by existing deployments keep their shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// Caller-supplied namespace, e.g. `graphql-query`
    pub scope: String,
    /// The rate-limited resource
    pub resource: String,
    /// The value read from the request context
    pub identifier: String,
    /// The context key the identifier was read from
    pub identifier_key: String,
}

impl CounterKey {
    /// Create a new counter key.
    pub fn new(scope: &str, resource: &str, identifier: &str, identifier_key: &str) -> Self {
        Self {
            scope: scope.to_string(),
            resource: resource.to_string(),
            identifier: identifier.to_string(),
            identifier_key: identifier_key.to_string(),
        }
    }

    /// Convert to the string stored in the counter store.
    pub fn to_store_key(&self) -> String {
        if self.identifier_key == DEFAULT_IDENTIFIER_KEY {
            format!(
                "{}:{}:{}-{}",
                KEY_PREFIX, self.identifier, self.scope, self.resource
            )
        } else {
            format!(
                "{}:{}:{}-{}-{}",
                KEY_PREFIX, self.identifier, self.scope, self.resource, self.identifier_key
            )
        }
    }

    /// Parse a store key written under `scope`.
    ///
    /// Only keys whose resource and identifier key names contain no `-` can be
    /// recovered; the registry enforces that for every limit it accepts.
    pub fn parse(scope: &str, key: &str) -> Option<Self> {
        let rest = key.strip_prefix(KEY_PREFIX)?.strip_prefix(':')?;

        // Identifiers may contain ':' (IPv6), the scope and names may not.
        let last_sep = rest.rfind(':')?;
        let identifier = &rest[..last_sep];
        let tail = rest[last_sep + 1..].strip_prefix(scope)?.strip_prefix('-')?;

        let (resource, identifier_key) = match tail.split_once('-') {
            Some((resource, identifier_key)) => (resource, identifier_key),
            None => (tail, DEFAULT_IDENTIFIER_KEY),
        };
        if resource.is_empty() || identifier_key.is_empty() || identifier_key.contains('-') {
            return None;
        }

        Some(Self::new(scope, resource, identifier, identifier_key))
    }

    /// The prefix covering every counter key, for namespace clearing.
    pub fn namespace() -> String {
        format!("{}:", KEY_PREFIX)
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}
