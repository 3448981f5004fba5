//! Per-request context values.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Values supplied by the host for one request, such as the client address.
///
/// The context is never modified while a request is being evaluated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestContext {
    values: HashMap<String, String>,
}

impl RequestContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, returning the updated context.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Get the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for RequestContext
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_lookup() {
        let ctx = RequestContext::new()
            .with("ip", "99.99.99.99")
            .with("client_id", "abc");

        assert_eq!(ctx.get("ip"), Some("99.99.99.99"));
        assert_eq!(ctx.get("client_id"), Some("abc"));
        assert_eq!(ctx.get("user_id"), None);
    }

    #[test]
    fn test_context_from_json() {
        let ctx: RequestContext = serde_json::from_str(r#"{"ip": "1.2.3.4"}"#).unwrap();
        assert_eq!(ctx, RequestContext::from_iter([("ip", "1.2.3.4")]));
    }
}
