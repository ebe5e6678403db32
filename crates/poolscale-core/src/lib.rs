//! poolscale-core — shared model and plumbing for node-pool scale-in.
//!
//! Provides the cluster member model, the scheduler collaborator traits
//! the orchestrator drives, typed scale-in configuration, the retry
//! poller provider plugins use to confirm asynchronous operations, and an
//! in-memory scheduler backend.
//!
//! # Architecture
//!
//! ```text
//! SchedulerClient (trait object)
//!   ├── MembershipApi    list_members / node_info
//!   ├── DrainApi         trigger_drain / monitor_drain (mpsc stream)
//!   └── NodeLifecycleApi set_eligibility / purge_node
//!
//! ScaleInConfig::parse(map)   one validating pass, all errors at once
//! retry::poll(cancel, policy, check)
//! ```

pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod retry;
pub mod types;

pub use cancel::{CancelHandle, Cancellation};
pub use client::{DrainApi, MembershipApi, NodeLifecycleApi, SchedulerClient};
pub use config::{ScaleInConfig, SelectorStrategy, format_duration, parse_duration};
pub use error::*;
pub use memory::{ClusterSnapshot, InMemoryScheduler, MemberRecord};
pub use types::*;
