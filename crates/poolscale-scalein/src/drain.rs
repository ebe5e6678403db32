//! Concurrent drain of scale-in candidates.
//!
//! One task per candidate triggers the drain and follows its monitoring
//! stream. Outcomes flow back over a channel to a single collector, so
//! no lock is shared between tasks. A failing node never cancels its
//! siblings; the coordinator returns only once every task has reported.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use poolscale_core::{
    Cancellation, DrainApi, DrainError, DrainLevel, DrainSpec, ErrorSet, NodeId, ScaleCandidate,
    format_duration,
};

/// Drain metadata key marking autoscaler-initiated drains.
pub const DRAINED_BY_META_KEY: &str = "drained_by";
pub const DRAINED_BY: &str = "poolscale-autoscaler";
pub const DRAIN_DEADLINE_META_KEY: &str = "drain_deadline";

/// Triggers and monitors drains for a batch of candidates.
pub struct DrainCoordinator<C: ?Sized> {
    client: Arc<C>,
}

impl<C: DrainApi + ?Sized + 'static> DrainCoordinator<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    /// Drain every candidate under `spec`, concurrently.
    ///
    /// Succeeds only if every drain completed. Already-issued drain
    /// triggers are not rolled back on failure or cancellation.
    pub async fn drain(
        &self,
        cancel: &Cancellation,
        spec: &DrainSpec,
        candidates: &[ScaleCandidate],
    ) -> Result<(), ErrorSet<DrainError>> {
        if candidates.is_empty() {
            return Ok(());
        }

        let meta = drain_meta(spec);
        let (tx, mut rx) = mpsc::channel::<(usize, Result<(), DrainError>)>(candidates.len());
        // Keyed by task, so duplicate member IDs are tracked separately.
        let mut outstanding: HashMap<usize, NodeId> = HashMap::new();

        for (task, candidate) in candidates.iter().enumerate() {
            let node_id = candidate.member_id.clone();
            outstanding.insert(task, node_id.clone());

            let client = self.client.clone();
            let cancel = cancel.clone();
            let spec = spec.clone();
            let meta = meta.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let result = drain_node(client.as_ref(), cancel, &spec, &meta, &node_id).await;
                let _ = tx.send((task, result)).await;
            });
        }
        drop(tx);

        let mut errors = ErrorSet::new();
        while let Some((task, result)) = rx.recv().await {
            outstanding.remove(&task);
            if let Err(e) = result {
                errors.push(e);
            }
        }

        // A task that panicked dropped its sender without reporting.
        for node_id in outstanding.into_values() {
            errors.push(DrainError::Failed {
                node_id,
                message: "drain task exited without reporting".to_string(),
            });
        }

        if errors.is_empty() {
            info!(nodes = candidates.len(), "all drains completed");
        } else {
            warn!(
                nodes = candidates.len(),
                failed = errors.len(),
                "drains finished with failures"
            );
        }
        errors.into_result(|e| e)
    }
}

fn drain_meta(spec: &DrainSpec) -> HashMap<String, String> {
    HashMap::from([
        (DRAINED_BY_META_KEY.to_string(), DRAINED_BY.to_string()),
        (
            DRAIN_DEADLINE_META_KEY.to_string(),
            format_duration(spec.deadline),
        ),
    ])
}

async fn drain_node<C: DrainApi + ?Sized>(
    client: &C,
    mut cancel: Cancellation,
    spec: &DrainSpec,
    meta: &HashMap<String, String>,
    node_id: &str,
) -> Result<(), DrainError> {
    if cancel.is_cancelled() {
        return Err(DrainError::Cancelled {
            node_id: node_id.to_string(),
        });
    }

    let index = tokio::select! {
        res = client.trigger_drain(node_id, spec, meta) => {
            res.map_err(|error| DrainError::Trigger {
                node_id: node_id.to_string(),
                error,
            })?
        }
        _ = cancel.cancelled() => {
            warn!(%node_id, "drain trigger cancelled");
            return Err(DrainError::Cancelled { node_id: node_id.to_string() });
        }
    };
    info!(%node_id, index, deadline = ?spec.deadline, "drain triggered");

    let mut stream = tokio::select! {
        res = client.monitor_drain(node_id, index, spec.ignore_system_jobs) => {
            res.map_err(|error| DrainError::Monitor {
                node_id: node_id.to_string(),
                error,
            })?
        }
        _ = cancel.cancelled() => {
            warn!(%node_id, "drain monitoring cancelled");
            return Err(DrainError::Cancelled { node_id: node_id.to_string() });
        }
    };

    loop {
        tokio::select! {
            msg = stream.recv() => match msg {
                None => {
                    info!(%node_id, "drain complete");
                    return Ok(());
                }
                Some(msg) => match msg.level {
                    DrainLevel::Error => {
                        warn!(%node_id, message = %msg.text, "drain failed");
                        return Err(DrainError::Failed {
                            node_id: node_id.to_string(),
                            message: msg.text,
                        });
                    }
                    DrainLevel::Warn => warn!(%node_id, message = %msg.text, "drain warning"),
                    DrainLevel::Info => debug!(%node_id, message = %msg.text, "drain progress"),
                },
            },
            _ = cancel.cancelled() => {
                warn!(%node_id, "drain monitoring cancelled");
                return Err(DrainError::Cancelled {
                    node_id: node_id.to_string(),
                });
            }
        }
    }
}
