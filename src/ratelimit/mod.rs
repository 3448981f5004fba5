//! Rate limiting logic: keys, windows, registrations and evaluation.

mod context;
mod coordinator;
mod key;
mod rules;
mod window;

pub use context::RequestContext;
pub use coordinator::{Coordinator, EvaluationOutcome, Rejection, RequestDecision, REJECTION_MESSAGE};
pub use key::{validate_scope, CounterKey, DEFAULT_IDENTIFIER_KEY, KEY_PREFIX};
pub use rules::{LimitsFile, MAX_WINDOW, RegistryBuilder, ResourceLimitConfig, ResourceRegistry, ResourceRule};
pub use window::{FixedWindow, WindowDecision};
