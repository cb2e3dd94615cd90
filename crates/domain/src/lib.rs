//! Domain-level building blocks shared by the storage adapter and the monitor.
//!
//! Configuration, the data model, collaborator traits (persistence, TTL cache,
//! notifications) and telemetry wiring live here so the monitor crate only
//! depends on abstractions.

pub mod config;
pub mod model;
pub mod services;
pub mod storage;

pub use model::*;
pub use services::cache::{CacheError, CacheResult, InMemoryTtlStore, TtlStore};
pub use services::notify::{DispatchError, Notifier, TracingNotifier};
pub use storage::*;
