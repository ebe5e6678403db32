//! poolscale-scalein — horizontal scale-in for scheduler node pools.
//!
//! Removes N nodes from a running pool: checks that the pool is settled,
//! picks members under a configurable strategy, maps them to provider
//! resource IDs, drains them concurrently, and hands the drained
//! candidates back for termination. After termination the reconciler
//! purges or restores the members.
//!
//! # Architecture
//!
//! ```text
//! ScaleOrchestrator::scale_in(cancel, cfg, want)
//!   ├── ScaleInConfig::parse         fails before any scheduler call
//!   ├── MembershipApi::list_members
//!   ├── PoolFilter::filter           unstable pool → ScaleError::Unstable
//!   ├── NodeSelector::select         identity / newest / least_busy / empty
//!   ├── RemoteIdResolver::resolve    sequential, errors aggregated
//!   └── DrainCoordinator::drain      one task per node → mpsc → collector
//!
//! ScaleOrchestrator::post_scale_in(cancel, cfg, outcomes)
//!   └── Reconciler::reconcile        purge terminated, restore failed
//! ```

pub mod drain;
pub mod filter;
pub mod orchestrator;
pub mod reconcile;
pub mod resolver;
pub mod selector;

pub use drain::DrainCoordinator;
pub use filter::PoolFilter;
pub use orchestrator::{ScaleOrchestrator, ScaleStage, self_node_id_from_env};
pub use reconcile::Reconciler;
pub use resolver::{
    AttributeLookup, AwsInstanceId, AzureVmName, GceInstance, HetznerServer, RemoteIdResolver,
    ResolverRegistry,
};
pub use selector::{NodeSelector, selector_for};
