//! Core of a replicated state machine host and failover coordinator.
//!
//! This crate implements two long-lived per-node components that sit on top of an
//! external consensus collaborator (leader election, log replication, on-disk storage are
//! all out of scope here, see `collaborators`):
//!
//! - [`host::RsmHost`]: drives a user-supplied [`StateMachine`] from a shared committed
//!   log, serving linearizable commands on a leader and local/quorum-consistent reads.
//! - [`failover::FailoverCoordinator`]: atomically installs a new history branch on a
//!   chosen subset of peers to forcibly move consensus forward when other peers are
//!   unavailable.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod failover;
pub mod host;
pub mod metrics;
pub mod model;
pub mod revision;

pub use async_trait::async_trait;
pub use collaborators::Agent;
pub use collaborators::ConsensusServer;
pub use collaborators::EventBus;
pub use collaborators::StateMachine;
pub use config::Config;
pub use failover::FailoverCoordinator;
pub use host::RsmHost;
pub use metrics::RsmMetrics;
pub use model::Branch;
pub use model::LogEntry;
pub use model::Metadata;
pub use revision::HistoryId;
pub use revision::Revision;
pub use revision::Seqno;

/// The identifier of a peer / node in the cluster.
pub type NodeId = u64;

/// A trait alias bound applied to every user command type.
///
/// A command must be cloneable, debug-printable, (de)serializable and safe to move across
/// tasks, but no particular shape is otherwise imposed.
pub trait Command: Clone + std::fmt::Debug + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static {}

impl<T> Command for T where T: Clone + std::fmt::Debug + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static
{}

/// A trait alias bound applied to every user reply type.
pub trait Reply: std::fmt::Debug + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static {}

impl<T> Reply for T where T: std::fmt::Debug + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static {}

/// A helper for summarizing a value for `tracing` fields without forcing `Display`.
pub trait MessageSummary {
    fn summary(&self) -> String;
}
