//! Domain types shared by the scale-in pipeline.
//!
//! These types mirror what the scheduler's membership, drain, and
//! lifecycle APIs hand back, plus the small value types the orchestrator
//! passes between stages. All of them are serializable so snapshots can
//! be loaded from JSON and candidate lists printed back out.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unique identifier for a member in the cluster.
pub type NodeId = String;

/// Pool value reserved for members whose pool attribute is empty.
pub const DEFAULT_POOL: &str = "autoscaler-default-pool";

// ── Cluster member ────────────────────────────────────────────────

/// Lifecycle status reported by the scheduler for a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Initializing,
    Ready,
    Down,
}

/// Whether the scheduler may place new workloads on a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingEligibility {
    #[default]
    Eligible,
    Ineligible,
}

/// Resource usage summary attached to a member listing.
///
/// Only the selector strategies that rank or filter by load read this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NodeLoad {
    pub capacity_memory_bytes: u64,
    pub capacity_cpu_weight: u32,
    pub used_memory_bytes: u64,
    pub used_cpu_weight: u32,
    /// Running workloads of any kind.
    pub running_workloads: u32,
    /// Running workloads that belong to system jobs.
    pub running_system_workloads: u32,
}

impl NodeLoad {
    /// Utilisation in `[0, 1]`: the larger of memory and CPU usage ratios.
    pub fn utilisation(&self) -> f64 {
        let mem = ratio(self.used_memory_bytes as f64, self.capacity_memory_bytes as f64);
        let cpu = ratio(self.used_cpu_weight as f64, self.capacity_cpu_weight as f64);
        mem.max(cpu)
    }
}

fn ratio(used: f64, capacity: f64) -> f64 {
    if capacity <= 0.0 {
        return 0.0;
    }
    (used / capacity).clamp(0.0, 1.0)
}

/// A member as returned by the scheduler's listing API.
///
/// Immutable snapshot per orchestration call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub id: NodeId,
    #[serde(default)]
    pub name: String,
    /// Node class; empty means the member belongs to [`DEFAULT_POOL`].
    #[serde(default)]
    pub node_class: String,
    #[serde(default)]
    pub node_pool: String,
    #[serde(default)]
    pub datacenter: String,
    pub status: MemberStatus,
    #[serde(default)]
    pub eligibility: SchedulingEligibility,
    #[serde(default)]
    pub draining: bool,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub load: NodeLoad,
}

impl ClusterMember {
    /// Value of the pool attribute named by `key`.
    pub fn pool_value(&self, key: PoolKey) -> &str {
        match key {
            PoolKey::NodeClass => &self.node_class,
            PoolKey::NodePool => &self.node_pool,
            PoolKey::Datacenter => &self.datacenter,
        }
    }
}

/// Full attribute and metadata record for one member.
///
/// A second, richer read than the listing snapshot; remote ID resolvers
/// work from this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NodeInfo {
    pub id: NodeId,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

// ── Pools ─────────────────────────────────────────────────────────

/// Attribute used to partition members into pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKey {
    NodeClass,
    NodePool,
    Datacenter,
}

impl PoolKey {
    /// Configuration key that selects this pool attribute.
    pub fn config_key(self) -> &'static str {
        match self {
            PoolKey::NodeClass => "node_class",
            PoolKey::NodePool => "node_pool",
            PoolKey::Datacenter => "datacenter",
        }
    }

    pub const ALL: [PoolKey; 3] = [PoolKey::NodeClass, PoolKey::NodePool, PoolKey::Datacenter];
}

/// Identifies the pool a scale-in targets.
///
/// `All` combines several identifiers with logical AND.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolIdentifier {
    Attribute { key: PoolKey, value: String },
    All { identifiers: Vec<PoolIdentifier> },
}

impl PoolIdentifier {
    pub fn new(key: PoolKey, value: impl Into<String>) -> Self {
        PoolIdentifier::Attribute {
            key,
            value: value.into(),
        }
    }

    /// Whether `member` belongs to this pool.
    pub fn matches(&self, member: &ClusterMember) -> bool {
        match self {
            PoolIdentifier::Attribute { key, value } => {
                let actual = member.pool_value(*key);
                if value == DEFAULT_POOL {
                    actual.is_empty() || actual == DEFAULT_POOL
                } else {
                    actual == value
                }
            }
            PoolIdentifier::All { identifiers } => identifiers.iter().all(|id| id.matches(member)),
        }
    }
}

impl fmt::Display for PoolIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolIdentifier::Attribute { key, value } => write!(f, "{}={}", key.config_key(), value),
            PoolIdentifier::All { identifiers } => {
                for (i, id) in identifiers.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{id}")?;
                }
                Ok(())
            }
        }
    }
}

// ── Candidates ────────────────────────────────────────────────────

/// A member selected for removal, paired with its provider resource ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScaleCandidate {
    pub member_id: NodeId,
    pub remote_resource_id: String,
}

impl ScaleCandidate {
    pub fn new(member_id: impl Into<String>, remote_resource_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            remote_resource_id: remote_resource_id.into(),
        }
    }
}

/// Provider-side result for one candidate, reported back for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationOutcome {
    Terminated,
    Failed,
}

// ── Drain ─────────────────────────────────────────────────────────

/// Drain parameters shared by every node in one scale-in batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainSpec {
    #[serde(with = "duration_secs")]
    pub deadline: Duration,
    pub ignore_system_jobs: bool,
}

impl Default for DrainSpec {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(15 * 60),
            ignore_system_jobs: false,
        }
    }
}

/// Severity of a drain monitoring message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainLevel {
    Info,
    Warn,
    Error,
}

/// One item on a drain monitoring stream. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainMessage {
    pub level: DrainLevel,
    pub text: String,
}

impl DrainMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: DrainLevel::Info,
            text: text.into(),
        }
    }

    pub fn warn(text: impl Into<String>) -> Self {
        Self {
            level: DrainLevel::Warn,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: DrainLevel::Error,
            text: text.into(),
        }
    }
}

// ── Retry ─────────────────────────────────────────────────────────

/// Bounded-retry configuration for [`crate::retry::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_attempts: 15,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
