// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod cancel;
pub mod config;
pub mod dedupe;
pub mod fetch;
pub mod ingest;
pub mod model;
pub mod notify;
pub mod scoring;
pub mod supervisor;
pub mod telemetry;
pub mod worker;

// ---- Re-exports for stable public API ----
pub use crate::config::{Config, ConfigError};
pub use crate::model::{Message, ScoredMessage};
pub use crate::supervisor::{Supervisor, SupervisorError};
