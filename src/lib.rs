//! Fieldgate - per-resource rate limiting
//!
//! This crate decides whether an identified caller (client IP, client ID, ...)
//! may access a named resource, such as a GraphQL field, by counting attempts
//! per fixed window in a shared counter store. Each resource accessed by a
//! request is evaluated independently, so one rejection never blocks the
//! evaluation of its siblings.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
