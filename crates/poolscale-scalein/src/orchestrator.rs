//! Scale-in orchestrator — the public entry point.
//!
//! Sequences one scale-in call through its stages:
//!
//! ```text
//! Listing → Filtering → Selecting → Resolving → Draining → ReadyForTermination
//! ```
//!
//! Any stage failure is terminal for the call. Nothing is retried here;
//! the caller decides whether to run the whole pipeline again.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use poolscale_core::config::{parse_pool, parse_purge};
use poolscale_core::{
    Cancellation, ClusterMember, ErrorSet, MembershipApi, PoolIdentifier, ResolveError,
    ScaleCandidate, ScaleError, ScaleInConfig, ScaleResult, SchedulerClient, TerminationOutcome,
};

use crate::drain::DrainCoordinator;
use crate::filter::PoolFilter;
use crate::reconcile::Reconciler;
use crate::resolver::RemoteIdResolver;
use crate::selector::selector_for;

/// Environment variable naming the member the orchestrator runs on.
pub const SELF_NODE_ENV: &str = "POOLSCALE_NODE_ID";

/// Read the orchestrator's own member ID from [`SELF_NODE_ENV`].
///
/// An empty value counts as unset.
pub fn self_node_id_from_env() -> Option<String> {
    std::env::var(SELF_NODE_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Stage of a single scale-in call, used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleStage {
    Listing,
    Filtering,
    Selecting,
    Resolving,
    Draining,
    ReadyForTermination,
}

impl fmt::Display for ScaleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScaleStage::Listing => "listing",
            ScaleStage::Filtering => "filtering",
            ScaleStage::Selecting => "selecting",
            ScaleStage::Resolving => "resolving",
            ScaleStage::Draining => "draining",
            ScaleStage::ReadyForTermination => "ready_for_termination",
        };
        f.write_str(s)
    }
}

/// Removes nodes from a scheduler pool safely.
///
/// Holds no state between calls. Concurrent scale-ins against the same
/// pool are not serialized here.
pub struct ScaleOrchestrator {
    client: Arc<dyn SchedulerClient>,
    resolver: Arc<dyn RemoteIdResolver>,
    self_node_id: Option<String>,
}

impl ScaleOrchestrator {
    pub fn new(client: Arc<dyn SchedulerClient>, resolver: Arc<dyn RemoteIdResolver>) -> Self {
        Self {
            client,
            resolver,
            self_node_id: None,
        }
    }

    /// Never consider `self_node_id` for removal.
    pub fn with_self_node_id(mut self, self_node_id: Option<String>) -> Self {
        self.self_node_id = self_node_id;
        self
    }

    /// Select, identify and drain `want` members of the configured pool.
    ///
    /// Returns the drained candidates for the caller to terminate at the
    /// provider. On a partial drain failure nothing is returned.
    pub async fn scale_in(
        &self,
        cancel: &Cancellation,
        cfg: &HashMap<String, String>,
        want: usize,
    ) -> ScaleResult<Vec<ScaleCandidate>> {
        let config = ScaleInConfig::parse(cfg).map_err(ScaleError::Config)?;
        if want == 0 {
            debug!(pool = %config.pool, "nothing to remove");
            return Ok(Vec::new());
        }

        let pool = self.stable_pool(&config).await?;
        let selected = self.select(&config, &pool, want)?;
        let candidates = self.resolve(&selected).await?;
        self.drain(cancel, &config, candidates).await
    }

    /// Like [`scale_in`](Self::scale_in), restricted to members whose
    /// remote ID is one of `remote_ids`.
    ///
    /// Every pool member is resolved before selection, so a single
    /// unidentifiable member fails the call.
    pub async fn scale_in_with_remote_check(
        &self,
        cancel: &Cancellation,
        cfg: &HashMap<String, String>,
        want: usize,
        remote_ids: &HashSet<String>,
    ) -> ScaleResult<Vec<ScaleCandidate>> {
        let config = ScaleInConfig::parse(cfg).map_err(ScaleError::Config)?;
        if want == 0 {
            debug!(pool = %config.pool, "nothing to remove");
            return Ok(Vec::new());
        }

        let pool = self.stable_pool(&config).await?;
        let resolved = self.resolve(&pool).await?;
        let remote_by_member: HashMap<&str, &str> = resolved
            .iter()
            .map(|c| (c.member_id.as_str(), c.remote_resource_id.as_str()))
            .collect();

        let known: Vec<ClusterMember> = pool
            .iter()
            .filter(|m| {
                remote_by_member
                    .get(m.id.as_str())
                    .is_some_and(|remote| remote_ids.contains(*remote))
            })
            .cloned()
            .collect();
        if known.len() < pool.len() {
            info!(
                pool = %config.pool,
                members = pool.len(),
                known = known.len(),
                "members without a matching remote instance excluded"
            );
        }

        let selected = self.select(&config, &known, want)?;
        let candidates = selected
            .iter()
            .filter_map(|m| {
                remote_by_member
                    .get(m.id.as_str())
                    .map(|remote| ScaleCandidate::new(m.id.clone(), *remote))
            })
            .collect();
        self.drain(cancel, &config, candidates).await
    }

    /// Whether the configured pool is settled enough to scale.
    ///
    /// Instability is reported as `Ok(false)`, never as an error. An
    /// empty pool counts as ready so that it can still scale out.
    pub async fn is_pool_ready(&self, cfg: &HashMap<String, String>) -> ScaleResult<bool> {
        let pool = parse_pool(cfg).map_err(ScaleError::Config)?;
        let members = self.list().await?;

        match self.pool_filter(pool).filter(&members) {
            Ok(_) => Ok(true),
            Err(ScaleError::Unstable { pool, errors }) => {
                info!(%pool, reason = %errors, "pool not ready");
                Ok(false)
            }
            Err(ScaleError::EmptyPool(pool)) => {
                debug!(%pool, "pool has no eligible members");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Reconcile scheduler state once the provider has acted on the
    /// candidates a scale-in returned.
    pub async fn post_scale_in(
        &self,
        cancel: &Cancellation,
        cfg: &HashMap<String, String>,
        outcomes: &[(ScaleCandidate, TerminationOutcome)],
    ) -> ScaleResult<()> {
        let purge = parse_purge(cfg).map_err(|e| ScaleError::Config(ErrorSet::from(vec![e])))?;
        Reconciler::new(self.client.clone(), purge)
            .reconcile(cancel, outcomes)
            .await
            .map_err(ScaleError::Reconcile)
    }

    fn pool_filter(&self, pool: PoolIdentifier) -> PoolFilter {
        PoolFilter::new(pool).excluding(self.self_node_id.clone())
    }

    async fn list(&self) -> ScaleResult<Vec<ClusterMember>> {
        debug!(stage = %ScaleStage::Listing, "listing cluster members");
        self.client
            .list_members()
            .await
            .map_err(ScaleError::Membership)
    }

    async fn stable_pool(&self, config: &ScaleInConfig) -> ScaleResult<Vec<ClusterMember>> {
        let members = self.list().await?;
        debug!(
            stage = %ScaleStage::Filtering,
            pool = %config.pool,
            members = members.len(),
            "filtering pool"
        );
        self.pool_filter(config.pool.clone()).filter(&members)
    }

    fn select(
        &self,
        config: &ScaleInConfig,
        pool: &[ClusterMember],
        want: usize,
    ) -> ScaleResult<Vec<ClusterMember>> {
        let selector = selector_for(config.strategy);
        let selected = selector.select(pool, want);
        debug!(
            stage = %ScaleStage::Selecting,
            strategy = %config.strategy,
            want,
            selected = selected.len(),
            "members selected"
        );

        if selected.is_empty() {
            return Err(ScaleError::NoneSelected(config.strategy.to_string()));
        }
        if selected.len() < want {
            warn!(
                pool = %config.pool,
                strategy = %config.strategy,
                want,
                selected = selected.len(),
                "fewer members selected than requested"
            );
        }
        Ok(selected)
    }

    /// Resolve remote IDs one member at a time, reporting every failure.
    async fn resolve(&self, members: &[ClusterMember]) -> ScaleResult<Vec<ScaleCandidate>> {
        let provider = self.resolver.provider();
        let mut errors = ErrorSet::new();
        let mut candidates = Vec::with_capacity(members.len());

        for member in members {
            let info = match self.client.node_info(&member.id).await {
                Ok(info) => info,
                Err(error) => {
                    errors.push(ResolveError::NodeInfo {
                        node_id: member.id.clone(),
                        error,
                    });
                    continue;
                }
            };
            match self.resolver.resolve(member, &info) {
                Ok(remote_id) => {
                    debug!(
                        stage = %ScaleStage::Resolving,
                        node_id = %member.id,
                        %remote_id,
                        provider,
                        "remote id resolved"
                    );
                    candidates.push(ScaleCandidate::new(member.id.clone(), remote_id));
                }
                Err(e) => errors.push(e),
            }
        }

        if !errors.is_empty() {
            warn!(provider, failed = errors.len(), "remote id resolution failed");
            return Err(ScaleError::Resolve(errors));
        }
        Ok(candidates)
    }

    async fn drain(
        &self,
        cancel: &Cancellation,
        config: &ScaleInConfig,
        candidates: Vec<ScaleCandidate>,
    ) -> ScaleResult<Vec<ScaleCandidate>> {
        info!(
            stage = %ScaleStage::Draining,
            pool = %config.pool,
            nodes = candidates.len(),
            deadline = ?config.drain.deadline,
            "draining candidates"
        );
        DrainCoordinator::new(self.client.clone())
            .drain(cancel, &config.drain, &candidates)
            .await
            .map_err(ScaleError::Drain)?;

        info!(
            stage = %ScaleStage::ReadyForTermination,
            pool = %config.pool,
            nodes = candidates.len(),
            "candidates drained"
        );
        Ok(candidates)
    }
}
