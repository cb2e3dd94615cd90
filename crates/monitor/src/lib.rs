//! Wallet fraud monitor: subscribes to the live transaction feed of every
//! wallet with an active alert rule, stages what it sees in a TTL store and
//! periodically evaluates the staged transactions against each wallet's rule.
//! The binary in `main.rs` wires the Horizon feed and SeaORM storage; tests and
//! embedders can plug in their own collaborators.

pub mod detection;
pub mod feed;
pub mod pipeline;
pub mod registry;
pub mod staging;
pub mod subscriber;
pub mod worker;

pub use detection::{DetectionEngine, DetectionSettings, DrainReport, Evaluation};
pub use feed::{FeedError, FeedEvent, FeedStream, HorizonFeed, TransactionFeed};
pub use registry::{RegistryError, RegistrySnapshot, WalletRegistry};
pub use staging::{StageOutcome, StagingArea};
pub use subscriber::{run_subscriber, SubscriberPool, SubscriptionEnd};
pub use worker::{run_monitor, CyclePhase, Monitor, MonitorError};
