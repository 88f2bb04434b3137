//! # keel-core
//!
//! Core types, traits, and abstractions for the keel job engine.
//!
//! This crate provides the job data model and lifecycle state machine, the
//! retry decision, and the narrow traits every other keel crate plugs into:
//! [`JobStore`] (the durable source of truth), [`HintChannel`] (best-effort
//! wake-ups) and [`MetricsSink`] (outcome counters).

pub mod defaults;
pub mod error;
pub mod models;
pub mod retry;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use retry::{RetryDecision, RetryPolicy};
pub use traits::*;
