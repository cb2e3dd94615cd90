//! Shared service helpers: the TTL cache store, notification dispatch and
//! telemetry wiring.

pub mod cache;
pub mod notify;
pub mod telemetry;

pub use cache::*;
pub use notify::*;
pub use telemetry::*;
