//! Observability for token validation.
//!
//! - `metrics` - Metric definitions recorded through the `metrics` facade

pub mod metrics;
