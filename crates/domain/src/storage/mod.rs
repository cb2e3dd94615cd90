//! Persistence capabilities consumed by the monitor.

mod traits;

pub use traits::*;
