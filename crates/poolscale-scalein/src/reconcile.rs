//! Post-termination reconciliation of scheduler state.
//!
//! Once the provider has acted on the candidates, members whose instances
//! are gone are purged (when configured), and members whose termination
//! failed get their scheduling eligibility back so they are not stranded
//! drained but alive. Both operations are idempotent.

use std::sync::Arc;

use tracing::{debug, info, warn};

use poolscale_core::{
    Cancellation, ErrorSet, NodeLifecycleApi, ReconcileError, ScaleCandidate, TerminationOutcome,
};

/// Applies purge and eligibility-restore calls after a scale-in.
pub struct Reconciler<C: ?Sized> {
    client: Arc<C>,
    purge_enabled: bool,
}

impl<C: NodeLifecycleApi + ?Sized> Reconciler<C> {
    pub fn new(client: Arc<C>, purge_enabled: bool) -> Self {
        Self {
            client,
            purge_enabled,
        }
    }

    /// Purge every candidate from the scheduler, if purging is enabled.
    ///
    /// Continues past failures. A member the scheduler no longer knows
    /// counts as purged.
    pub async fn purge(
        &self,
        cancel: &Cancellation,
        candidates: &[ScaleCandidate],
    ) -> Result<(), ErrorSet<ReconcileError>> {
        if !self.purge_enabled {
            debug!(nodes = candidates.len(), "node purge disabled, skipping");
            return Ok(());
        }

        let mut errors = ErrorSet::new();
        for candidate in candidates {
            let node_id = &candidate.member_id;
            if cancel.is_cancelled() {
                errors.push(ReconcileError::Cancelled {
                    node_id: node_id.clone(),
                });
                continue;
            }

            match self.client.purge_node(node_id).await {
                Ok(()) => info!(%node_id, remote_id = %candidate.remote_resource_id, "node purged"),
                Err(e) if e.is_not_found() => debug!(%node_id, "node already purged"),
                Err(error) => {
                    warn!(%node_id, %error, "node purge failed");
                    errors.push(ReconcileError::Purge {
                        node_id: node_id.clone(),
                        error,
                    });
                }
            }
        }
        errors.into_result(|e| e)
    }

    /// Mark candidates schedulable again after their termination failed.
    pub async fn restore_eligibility(
        &self,
        candidates: &[ScaleCandidate],
    ) -> Result<(), ErrorSet<ReconcileError>> {
        let mut errors = ErrorSet::new();
        for candidate in candidates {
            let node_id = &candidate.member_id;
            match self.client.set_eligibility(node_id, true).await {
                Ok(()) => info!(%node_id, "node eligibility restored"),
                Err(e) if e.is_not_found() => {
                    debug!(%node_id, "node no longer registered, nothing to restore")
                }
                Err(error) => {
                    warn!(%node_id, %error, "failed to restore node eligibility");
                    errors.push(ReconcileError::Eligibility {
                        node_id: node_id.clone(),
                        error,
                    });
                }
            }
        }
        errors.into_result(|e| e)
    }

    /// Purge terminated candidates and restore the ones that failed.
    pub async fn reconcile(
        &self,
        cancel: &Cancellation,
        outcomes: &[(ScaleCandidate, TerminationOutcome)],
    ) -> Result<(), ErrorSet<ReconcileError>> {
        let (terminated, failed): (Vec<_>, Vec<_>) = outcomes
            .iter()
            .partition(|(_, outcome)| *outcome == TerminationOutcome::Terminated);
        let terminated: Vec<ScaleCandidate> = terminated.into_iter().map(|(c, _)| c.clone()).collect();
        let failed: Vec<ScaleCandidate> = failed.into_iter().map(|(c, _)| c.clone()).collect();

        info!(
            terminated = terminated.len(),
            failed = failed.len(),
            "reconciling scheduler state"
        );

        let mut errors = ErrorSet::new();
        if let Err(e) = self.purge(cancel, &terminated).await {
            errors.extend(e);
        }
        if let Err(e) = self.restore_eligibility(&failed).await {
            errors.extend(e);
        }
        errors.into_result(|e| e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use poolscale_core::{ClientError, ClientResult};

    #[derive(Default)]
    struct FakeLifecycle {
        registered: Mutex<HashMap<String, bool>>,
        broken: Vec<String>,
        purge_calls: Mutex<u32>,
    }

    impl FakeLifecycle {
        fn with_nodes(ids: &[&str]) -> Self {
            Self {
                registered: Mutex::new(ids.iter().map(|id| (id.to_string(), false)).collect()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl NodeLifecycleApi for FakeLifecycle {
        async fn set_eligibility(&self, node_id: &str, eligible: bool) -> ClientResult<()> {
            if self.broken.iter().any(|b| b == node_id) {
                return Err(ClientError::Api("connection reset".to_string()));
            }
            let mut registered = self.registered.lock().unwrap();
            match registered.get_mut(node_id) {
                Some(state) => {
                    *state = eligible;
                    Ok(())
                }
                None => Err(ClientError::NotFound(node_id.to_string())),
            }
        }

        async fn purge_node(&self, node_id: &str) -> ClientResult<()> {
            *self.purge_calls.lock().unwrap() += 1;
            if self.broken.iter().any(|b| b == node_id) {
                return Err(ClientError::Api("connection reset".to_string()));
            }
            match self.registered.lock().unwrap().remove(node_id) {
                Some(_) => Ok(()),
                None => Err(ClientError::NotFound(node_id.to_string())),
            }
        }
    }

    fn candidates(ids: &[&str]) -> Vec<ScaleCandidate> {
        ids.iter()
            .map(|id| ScaleCandidate::new(*id, format!("i-{id}")))
            .collect()
    }

    #[tokio::test]
    async fn purge_disabled_makes_no_calls() {
        let fake = Arc::new(FakeLifecycle::with_nodes(&["a"]));
        let reconciler = Reconciler::new(fake.clone(), false);
        reconciler
            .purge(&Cancellation::never(), &candidates(&["a"]))
            .await
            .unwrap();
        assert_eq!(*fake.purge_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_is_idempotent() {
        let fake = Arc::new(FakeLifecycle::with_nodes(&["a", "b"]));
        let reconciler = Reconciler::new(fake.clone(), true);
        let batch = candidates(&["a", "b"]);

        reconciler.purge(&Cancellation::never(), &batch).await.unwrap();
        reconciler.purge(&Cancellation::never(), &batch).await.unwrap();

        assert!(fake.registered.lock().unwrap().is_empty());
        assert_eq!(*fake.purge_calls.lock().unwrap(), 4);
    }

    #[tokio::test]
    async fn purge_continues_past_failures() {
        let fake = Arc::new(FakeLifecycle {
            broken: vec!["a".to_string()],
            ..FakeLifecycle::with_nodes(&["a", "b"])
        });
        let reconciler = Reconciler::new(fake.clone(), true);

        let errors = reconciler
            .purge(&Cancellation::never(), &candidates(&["a", "b"]))
            .await
            .unwrap_err();

        assert_eq!(errors.len(), 1);
        assert!(errors.to_string().contains("failed to purge a"));
        assert!(!fake.registered.lock().unwrap().contains_key("b"));
    }

    #[tokio::test]
    async fn restore_is_idempotent_and_tolerates_unknown_nodes() {
        let fake = Arc::new(FakeLifecycle::with_nodes(&["a"]));
        let reconciler = Reconciler::new(fake.clone(), false);
        let batch = candidates(&["a", "gone"]);

        reconciler.restore_eligibility(&batch).await.unwrap();
        reconciler.restore_eligibility(&batch).await.unwrap();

        assert_eq!(fake.registered.lock().unwrap().get("a"), Some(&true));
    }

    #[tokio::test]
    async fn reconcile_splits_by_outcome() {
        let fake = Arc::new(FakeLifecycle::with_nodes(&["a", "b", "c"]));
        let reconciler = Reconciler::new(fake.clone(), true);

        let outcomes = vec![
            (ScaleCandidate::new("a", "i-a"), TerminationOutcome::Terminated),
            (ScaleCandidate::new("b", "i-b"), TerminationOutcome::Failed),
            (ScaleCandidate::new("c", "i-c"), TerminationOutcome::Terminated),
        ];
        reconciler
            .reconcile(&Cancellation::never(), &outcomes)
            .await
            .unwrap();

        let registered = fake.registered.lock().unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered.get("b"), Some(&true));
    }

    #[tokio::test]
    async fn reconcile_aggregates_both_kinds_of_failure() {
        let fake = Arc::new(FakeLifecycle {
            broken: vec!["a".to_string(), "b".to_string()],
            ..FakeLifecycle::with_nodes(&["a", "b"])
        });
        let reconciler = Reconciler::new(fake, true);

        let outcomes = vec![
            (ScaleCandidate::new("a", "i-a"), TerminationOutcome::Terminated),
            (ScaleCandidate::new("b", "i-b"), TerminationOutcome::Failed),
        ];
        let errors = reconciler
            .reconcile(&Cancellation::never(), &outcomes)
            .await
            .unwrap_err();

        let errors = errors.into_vec();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], ReconcileError::Purge { .. }));
        assert!(matches!(errors[1], ReconcileError::Eligibility { .. }));
    }
}
