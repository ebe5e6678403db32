//! Scheduler collaborator APIs consumed by the scale-in pipeline.
//!
//! Each trait covers one slice of the scheduler's surface. Backends
//! implement all three and are shared as `Arc<dyn SchedulerClient>`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ClientResult;
use crate::types::{ClusterMember, DrainMessage, DrainSpec, NodeInfo};

/// Read access to cluster membership.
#[async_trait]
pub trait MembershipApi: Send + Sync {
    /// List every member, in the scheduler's native order.
    async fn list_members(&self) -> ClientResult<Vec<ClusterMember>>;

    /// Full attribute and metadata record for one member.
    async fn node_info(&self, node_id: &str) -> ClientResult<NodeInfo>;
}

/// Triggering and following node drains.
#[async_trait]
pub trait DrainApi: Send + Sync {
    /// Start draining `node_id`. Returns the index the monitor is keyed on.
    async fn trigger_drain(
        &self,
        node_id: &str,
        spec: &DrainSpec,
        meta: &HashMap<String, String>,
    ) -> ClientResult<u64>;

    /// Stream drain progress for `node_id` from `index` onward.
    ///
    /// The stream closes when the drain has finished.
    async fn monitor_drain(
        &self,
        node_id: &str,
        index: u64,
        ignore_system_jobs: bool,
    ) -> ClientResult<mpsc::Receiver<DrainMessage>>;
}

/// Eligibility and purge calls used during reconciliation.
#[async_trait]
pub trait NodeLifecycleApi: Send + Sync {
    async fn set_eligibility(&self, node_id: &str, eligible: bool) -> ClientResult<()>;

    /// Permanently remove a member's record.
    async fn purge_node(&self, node_id: &str) -> ClientResult<()>;
}

/// Everything the orchestrator needs from a scheduler backend.
pub trait SchedulerClient: MembershipApi + DrainApi + NodeLifecycleApi {}

impl<T: MembershipApi + DrainApi + NodeLifecycleApi> SchedulerClient for T {}
