//! Storage adapters.
//!
//! A storage adapter wraps a backend and changes or observes its behaviour.

pub mod performance_metrics;
