//! Node selection strategies.
//!
//! Every strategy receives a filtered, stable pool and returns at most
//! `want` members. Returning fewer than requested is not an error by
//! itself; the orchestrator logs it and carries on.

use poolscale_core::{ClusterMember, SelectorStrategy};

/// Picks which members of a stable pool to remove.
pub trait NodeSelector: Send + Sync {
    fn strategy(&self) -> SelectorStrategy;

    fn select(&self, members: &[ClusterMember], want: usize) -> Vec<ClusterMember>;
}

/// Build the selector for a configured strategy.
pub fn selector_for(strategy: SelectorStrategy) -> Box<dyn NodeSelector> {
    match strategy {
        SelectorStrategy::Identity => Box::new(IdentitySelector),
        SelectorStrategy::NewestCreateIndex => Box::new(NewestCreateIndexSelector),
        SelectorStrategy::LeastBusy => Box::new(LeastBusySelector),
        SelectorStrategy::Empty => Box::new(EmptySelector {
            ignore_system: false,
        }),
        SelectorStrategy::EmptyIgnoreSystem => Box::new(EmptySelector {
            ignore_system: true,
        }),
    }
}

/// Membership API order. No sort pass; under bin-packing the newest
/// members listed first are the least packed.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentitySelector;

impl NodeSelector for IdentitySelector {
    fn strategy(&self) -> SelectorStrategy {
        SelectorStrategy::Identity
    }

    fn select(&self, members: &[ClusterMember], want: usize) -> Vec<ClusterMember> {
        members.iter().take(want).cloned().collect()
    }
}

/// Most recently registered members first.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewestCreateIndexSelector;

impl NodeSelector for NewestCreateIndexSelector {
    fn strategy(&self) -> SelectorStrategy {
        SelectorStrategy::NewestCreateIndex
    }

    fn select(&self, members: &[ClusterMember], want: usize) -> Vec<ClusterMember> {
        let mut sorted = members.to_vec();
        sorted.sort_by(|a, b| b.create_index.cmp(&a.create_index));
        sorted.truncate(want);
        sorted
    }
}

/// Lowest utilisation first. Stable, so ties keep listing order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastBusySelector;

impl NodeSelector for LeastBusySelector {
    fn strategy(&self) -> SelectorStrategy {
        SelectorStrategy::LeastBusy
    }

    fn select(&self, members: &[ClusterMember], want: usize) -> Vec<ClusterMember> {
        let mut sorted = members.to_vec();
        sorted.sort_by(|a, b| a.load.utilisation().total_cmp(&b.load.utilisation()));
        sorted.truncate(want);
        sorted
    }
}

/// Only members with nothing running on them.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySelector {
    /// Treat members running only system workloads as empty.
    pub ignore_system: bool,
}

impl NodeSelector for EmptySelector {
    fn strategy(&self) -> SelectorStrategy {
        if self.ignore_system {
            SelectorStrategy::EmptyIgnoreSystem
        } else {
            SelectorStrategy::Empty
        }
    }

    fn select(&self, members: &[ClusterMember], want: usize) -> Vec<ClusterMember> {
        members
            .iter()
            .filter(|m| {
                let running = if self.ignore_system {
                    m.load
                        .running_workloads
                        .saturating_sub(m.load.running_system_workloads)
                } else {
                    m.load.running_workloads
                };
                running == 0
            })
            .take(want)
            .cloned()
            .collect()
    }
}
