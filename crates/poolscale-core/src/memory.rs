//! In-memory scheduler backend.
//!
//! Holds a member table behind a `RwLock` and implements every
//! collaborator trait against it. Drains finish immediately unless a
//! node has been told to fail or hang, which is what the developer CLI
//! and the test suites rely on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

use crate::client::{DrainApi, MembershipApi, NodeLifecycleApi};
use crate::error::{ClientError, ClientResult};
use crate::types::*;

/// One member plus its full attribute record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRecord {
    #[serde(flatten)]
    pub member: ClusterMember,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

/// JSON snapshot of a cluster, in listing order.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClusterSnapshot {
    pub members: Vec<MemberRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Listing order is insertion order.
    members: Vec<MemberRecord>,
    failing_drains: HashMap<NodeId, String>,
    hanging_drains: HashSet<NodeId>,
    drain_meta: HashMap<NodeId, HashMap<String, String>>,
    purged: Vec<NodeId>,
}

impl Inner {
    fn find_mut(&mut self, node_id: &str) -> ClientResult<&mut MemberRecord> {
        self.members
            .iter_mut()
            .find(|r| r.member.id == node_id)
            .ok_or_else(|| ClientError::NotFound(node_id.to_string()))
    }
}

/// Scheduler backend kept entirely in memory.
///
/// `Clone` shares the same underlying table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryScheduler {
    inner: Arc<RwLock<Inner>>,
    next_index: Arc<AtomicU64>,
    drain_triggers: Arc<AtomicU64>,
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a backend from records, keeping their order.
    pub fn with_members(records: Vec<MemberRecord>) -> Self {
        Self {
            next_index: Arc::new(AtomicU64::new(records.len() as u64 + 1)),
            inner: Arc::new(RwLock::new(Inner {
                members: records,
                ..Default::default()
            })),
            drain_triggers: Arc::default(),
        }
    }

    /// Load a [`ClusterSnapshot`] from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let snapshot: ClusterSnapshot = serde_json::from_str(json)?;
        Ok(Self::with_members(snapshot.members))
    }

    /// Append a member to the end of the listing.
    pub async fn insert(&self, record: MemberRecord) {
        let mut inner = self.inner.write().await;
        inner.members.retain(|r| r.member.id != record.member.id);
        inner.members.push(record);
    }

    /// Make the next drain of `node_id` emit one error message.
    pub async fn fail_drain(&self, node_id: &str, message: &str) {
        let mut inner = self.inner.write().await;
        inner
            .failing_drains
            .insert(node_id.to_string(), message.to_string());
    }

    /// Make the drain monitor for `node_id` stay open indefinitely.
    pub async fn hang_drain(&self, node_id: &str) {
        let mut inner = self.inner.write().await;
        inner.hanging_drains.insert(node_id.to_string());
    }

    /// Current snapshot of one member.
    pub async fn member(&self, node_id: &str) -> Option<ClusterMember> {
        let inner = self.inner.read().await;
        inner
            .members
            .iter()
            .find(|r| r.member.id == node_id)
            .map(|r| r.member.clone())
    }

    /// IDs purged so far, in order.
    pub async fn purged(&self) -> Vec<NodeId> {
        self.inner.read().await.purged.clone()
    }

    /// Metadata the last drain trigger carried for `node_id`.
    pub async fn drain_meta(&self, node_id: &str) -> Option<HashMap<String, String>> {
        self.inner.read().await.drain_meta.get(node_id).cloned()
    }

    /// Number of drain triggers issued against this backend.
    pub fn drain_trigger_count(&self) -> u64 {
        self.drain_triggers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MembershipApi for InMemoryScheduler {
    async fn list_members(&self) -> ClientResult<Vec<ClusterMember>> {
        let inner = self.inner.read().await;
        Ok(inner.members.iter().map(|r| r.member.clone()).collect())
    }

    async fn node_info(&self, node_id: &str) -> ClientResult<NodeInfo> {
        let inner = self.inner.read().await;
        inner
            .members
            .iter()
            .find(|r| r.member.id == node_id)
            .map(|r| NodeInfo {
                id: r.member.id.clone(),
                attributes: r.attributes.clone(),
                meta: r.meta.clone(),
            })
            .ok_or_else(|| ClientError::NotFound(node_id.to_string()))
    }
}

#[async_trait]
impl DrainApi for InMemoryScheduler {
    async fn trigger_drain(
        &self,
        node_id: &str,
        spec: &DrainSpec,
        meta: &HashMap<String, String>,
    ) -> ClientResult<u64> {
        let mut inner = self.inner.write().await;
        let record = inner.find_mut(node_id)?;
        record.member.draining = true;
        record.member.eligibility = SchedulingEligibility::Ineligible;
        inner.drain_meta.insert(node_id.to_string(), meta.clone());

        self.drain_triggers.fetch_add(1, Ordering::SeqCst);
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        debug!(%node_id, index, deadline = ?spec.deadline, "drain triggered");
        Ok(index)
    }

    async fn monitor_drain(
        &self,
        node_id: &str,
        index: u64,
        ignore_system_jobs: bool,
    ) -> ClientResult<mpsc::Receiver<DrainMessage>> {
        let (tx, rx) = mpsc::channel(8);
        let mut inner = self.inner.write().await;
        inner.find_mut(node_id)?;

        if inner.hanging_drains.contains(node_id) {
            // Keep the sender alive so the stream never closes.
            tokio::spawn(async move {
                tx.closed().await;
            });
            return Ok(rx);
        }

        if let Some(message) = inner.failing_drains.remove(node_id) {
            tokio::spawn(async move {
                let _ = tx.send(DrainMessage::info("drain started")).await;
                let _ = tx.send(DrainMessage::error(message)).await;
            });
            return Ok(rx);
        }

        let record = inner.find_mut(node_id)?;
        record.member.draining = false;
        let node = node_id.to_string();
        tokio::spawn(async move {
            let _ = tx
                .send(DrainMessage::info(format!("drain started at index {index}")))
                .await;
            if ignore_system_jobs {
                let _ = tx
                    .send(DrainMessage::info("system workloads left in place"))
                    .await;
            }
            let _ = tx
                .send(DrainMessage::info(format!("node {node} drain complete")))
                .await;
        });
        Ok(rx)
    }
}

#[async_trait]
impl NodeLifecycleApi for InMemoryScheduler {
    async fn set_eligibility(&self, node_id: &str, eligible: bool) -> ClientResult<()> {
        let mut inner = self.inner.write().await;
        let record = inner.find_mut(node_id)?;
        record.member.eligibility = if eligible {
            SchedulingEligibility::Eligible
        } else {
            SchedulingEligibility::Ineligible
        };
        Ok(())
    }

    async fn purge_node(&self, node_id: &str) -> ClientResult<()> {
        let mut inner = self.inner.write().await;
        let before = inner.members.len();
        inner.members.retain(|r| r.member.id != node_id);
        if inner.members.len() == before {
            return Err(ClientError::NotFound(node_id.to_string()));
        }
        inner.purged.push(node_id.to_string());
        info!(%node_id, "node purged");
        Ok(())
    }
}
