//! Picks a pool's members and checks the pool is settled.
//!
//! A pool with any member mid-transition (initializing, draining, or
//! cordoned while ready) is not scalable, even if most of its members
//! are healthy.

use tracing::debug;

use poolscale_core::{
    ClusterMember, ErrorSet, InstabilityError, MemberStatus, PoolIdentifier, ScaleError,
    ScaleResult, SchedulingEligibility,
};

/// Upper bound on instability errors reported for one pool.
pub const MAX_INSTABILITY_ERRORS: usize = 10;

/// Filters a member listing down to one stable pool.
#[derive(Debug, Clone)]
pub struct PoolFilter {
    pool: PoolIdentifier,
    /// The orchestrator's own host; never part of any pool.
    self_node_id: Option<String>,
}

impl PoolFilter {
    pub fn new(pool: PoolIdentifier) -> Self {
        Self {
            pool,
            self_node_id: None,
        }
    }

    pub fn excluding(mut self, self_node_id: Option<String>) -> Self {
        self.self_node_id = self_node_id;
        self
    }

    pub fn pool(&self) -> &PoolIdentifier {
        &self.pool
    }

    /// Return the pool's eligible, ready members in listing order.
    ///
    /// Fails with [`ScaleError::Unstable`] if any pool member is
    /// transitioning, and with [`ScaleError::EmptyPool`] if nothing
    /// eligible remains.
    pub fn filter(&self, members: &[ClusterMember]) -> ScaleResult<Vec<ClusterMember>> {
        let mut errors = ErrorSet::new();
        let mut stable = Vec::new();

        for member in members {
            if self.self_node_id.as_deref() == Some(member.id.as_str()) {
                debug!(node_id = %member.id, "excluding own node from pool");
                continue;
            }
            if !self.pool.matches(member) {
                continue;
            }

            match classify(member) {
                Classification::Unstable(err) => {
                    errors.push(err);
                    if errors.len() >= MAX_INSTABILITY_ERRORS {
                        break;
                    }
                }
                Classification::Candidate => stable.push(member.clone()),
                Classification::Ignored => {
                    debug!(node_id = %member.id, status = ?member.status, "skipping member");
                }
            }
        }

        if !errors.is_empty() {
            return Err(ScaleError::Unstable {
                pool: self.pool.to_string(),
                errors,
            });
        }
        if stable.is_empty() {
            return Err(ScaleError::EmptyPool(self.pool.to_string()));
        }

        debug!(pool = %self.pool, members = stable.len(), "pool filtered");
        Ok(stable)
    }
}

enum Classification {
    Unstable(InstabilityError),
    Candidate,
    Ignored,
}

fn classify(member: &ClusterMember) -> Classification {
    match (member.status, member.draining, member.eligibility) {
        (MemberStatus::Initializing, _, _) => {
            Classification::Unstable(InstabilityError::Initializing(member.id.clone()))
        }
        (MemberStatus::Ready, true, _) => {
            Classification::Unstable(InstabilityError::Draining(member.id.clone()))
        }
        (MemberStatus::Ready, false, SchedulingEligibility::Ineligible) => {
            Classification::Unstable(InstabilityError::Ineligible(member.id.clone()))
        }
        (MemberStatus::Ready, false, SchedulingEligibility::Eligible) => Classification::Candidate,
        (MemberStatus::Down, _, _) => Classification::Ignored,
    }
}
