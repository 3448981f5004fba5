//! Evaluation of rate-limited resource accesses.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

use futures::future::join_all;

use super::context::RequestContext;
use super::key::{validate_scope, CounterKey};
use super::rules::{ResourceLimitConfig, ResourceRegistry};
use crate::config::StoreFailurePolicy;
use crate::error::{FieldgateError, Result};
use crate::store::CounterStore;

/// Message surfaced to clients for a resource over its limit.
pub const REJECTION_MESSAGE: &str = "Query rate limit exceeded";

/// The result of evaluating one resource access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationOutcome {
    /// The evaluated resource
    pub resource: String,
    /// Whether the access may proceed
    pub allowed: bool,
    /// Attempts recorded in the current window, including this one
    pub count: u64,
    /// The resource's threshold
    pub threshold: u64,
    /// Set when the store failed and the outcome comes from the failure policy
    pub degraded: bool,
}

impl EvaluationOutcome {
    /// Attempts left in the current window.
    pub fn remaining(&self) -> u64 {
        self.threshold.saturating_sub(self.count)
    }

    /// The error the host should report for this resource, if denied.
    pub fn rejection(&self) -> Option<Rejection> {
        if self.allowed {
            return None;
        }
        Some(Rejection {
            message: REJECTION_MESSAGE.to_string(),
            path: vec![self.resource.clone()],
        })
    }
}

/// A per-resource rejection. Source locations are added by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub message: String,
    pub path: Vec<String>,
}

/// Outcomes for every resource accessed by one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestDecision {
    /// Outcomes of rate-limited resources, in request order
    pub outcomes: Vec<EvaluationOutcome>,
    /// Accessed resources without a registration, allowed unconditionally
    pub unlimited: Vec<String>,
}

impl RequestDecision {
    /// One rejection per denied resource, in request order.
    pub fn rejections(&self) -> Vec<Rejection> {
        self.outcomes.iter().filter_map(|o| o.rejection()).collect()
    }

    /// Whether every access of `resource` in this request may proceed.
    pub fn is_allowed(&self, resource: &str) -> bool {
        self.outcomes
            .iter()
            .filter(|o| o.resource == resource)
            .all(|o| o.allowed)
    }

    /// Whether no resource was denied.
    pub fn all_allowed(&self) -> bool {
        self.outcomes.iter().all(|o| o.allowed)
    }
}

/// Evaluates resource accesses against the registry and counter stores.
///
/// Holds no mutable state: counters live in the stores and the registry is
/// frozen, so one coordinator can serve any number of concurrent requests.
pub struct Coordinator {
    /// Namespace mixed into every counter key
    scope: String,
    /// Frozen per-resource limits
    registry: Arc<ResourceRegistry>,
    /// Store for resources without an override
    default_store: Arc<dyn CounterStore>,
    /// Applied by `evaluate_request` when a store fails
    on_store_failure: StoreFailurePolicy,
}

impl Coordinator {
    /// Create a coordinator that propagates store failures.
    ///
    /// Fails with [`FieldgateError::Config`] when `scope` is empty or
    /// contains `:`.
    pub fn new(
        scope: impl Into<String>,
        registry: Arc<ResourceRegistry>,
        default_store: Arc<dyn CounterStore>,
    ) -> Result<Self> {
        let scope = scope.into();
        validate_scope(&scope)?;
        Ok(Self {
            scope,
            registry,
            default_store,
            on_store_failure: StoreFailurePolicy::default(),
        })
    }

    /// Set how `evaluate_request` treats store failures.
    pub fn with_failure_policy(mut self, policy: StoreFailurePolicy) -> Self {
        self.on_store_failure = policy;
        self
    }

    /// Get the key scope.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Get the registry.
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Evaluate one access of `resource`.
    ///
    /// The attempt is recorded before the decision is made and is never
    /// rolled back, so denied and abandoned attempts count as well.
    #[instrument(skip(self, context), fields(scope = %self.scope))]
    pub async fn evaluate(
        &self,
        context: &RequestContext,
        resource: &str,
    ) -> Result<EvaluationOutcome> {
        let config = self.registry.lookup(resource)?;
        let identifier = identifier_for(context, config)?;
        let key = CounterKey::new(&self.scope, resource, identifier, &config.identifier_key);

        let store = config
            .store_override
            .as_deref()
            .unwrap_or(self.default_store.as_ref());

        trace!(key = %key, store = store.kind(), "Evaluating resource access");

        let decision = config
            .limit()
            .check_and_record(store, &key)
            .await
            .map_err(|source| FieldgateError::StoreUnavailable {
                resource: resource.to_string(),
                source,
            })?;

        if !decision.allowed {
            debug!(
                key = %key,
                count = decision.count,
                threshold = decision.threshold,
                "Rate limit exceeded"
            );
        }

        Ok(EvaluationOutcome {
            resource: resource.to_string(),
            allowed: decision.allowed,
            count: decision.count,
            threshold: decision.threshold,
            degraded: false,
        })
    }

    /// Evaluate each access independently, keeping the order of `resources`.
    ///
    /// A failure or denial for one resource has no effect on the others.
    pub async fn evaluate_all(
        &self,
        context: &RequestContext,
        resources: &[&str],
    ) -> Vec<Result<EvaluationOutcome>> {
        join_all(resources.iter().map(|resource| self.evaluate(context, resource))).await
    }

    /// Evaluate every resource accessed by one request.
    ///
    /// Unregistered resources are skipped. A missing identifier for any
    /// registered resource fails the whole request before any attempt is
    /// recorded. Store failures are handled per the configured policy.
    #[instrument(skip_all, fields(scope = %self.scope, resources = resources.len()))]
    pub async fn evaluate_request(
        &self,
        context: &RequestContext,
        resources: &[&str],
    ) -> Result<RequestDecision> {
        let (limited, unlimited): (Vec<&str>, Vec<&str>) = resources
            .iter()
            .copied()
            .partition(|resource| self.registry.contains(resource));

        for resource in &limited {
            identifier_for(context, self.registry.lookup(resource)?)?;
        }

        let results = self.evaluate_all(context, &limited).await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (resource, result) in limited.iter().zip(results) {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(FieldgateError::StoreUnavailable { resource: r, source }) => {
                    let allowed = match self.on_store_failure {
                        StoreFailurePolicy::Propagate => {
                            return Err(FieldgateError::StoreUnavailable { resource: r, source })
                        }
                        StoreFailurePolicy::FailOpen => true,
                        StoreFailurePolicy::FailClosed => false,
                    };
                    warn!(
                        resource = %resource,
                        error = %source,
                        allowed = allowed,
                        "Counter store unavailable, applying failure policy"
                    );
                    outcomes.push(EvaluationOutcome {
                        resource: resource.to_string(),
                        allowed,
                        count: 0,
                        threshold: self.registry.lookup(resource)?.threshold,
                        degraded: true,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        let decision = RequestDecision {
            outcomes,
            unlimited: unlimited.into_iter().map(String::from).collect(),
        };

        info!(
            evaluated = decision.outcomes.len(),
            unlimited = decision.unlimited.len(),
            rejected = decision.outcomes.iter().filter(|o| !o.allowed).count(),
            "Rate limit decision made"
        );

        Ok(decision)
    }
}

/// Read the identifier a resource is keyed on.
fn identifier_for<'c>(context: &'c RequestContext, config: &ResourceLimitConfig) -> Result<&'c str> {
    context.get(&config.identifier_key).ok_or_else(|| {
        warn!(key = %config.identifier_key, "Request context lacks rate limit identifier");
        FieldgateError::MissingIdentifier {
            key: config.identifier_key.clone(),
        }
    })
}
