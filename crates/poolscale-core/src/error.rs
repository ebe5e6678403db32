//! Error types for the scale-in pipeline.

use std::fmt;

use thiserror::Error;

use crate::types::NodeId;

/// Result type alias for scheduler client calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type alias for orchestrator operations.
pub type ScaleResult<T> = Result<T, ScaleError>;

/// Errors returned by the scheduler's membership, drain and lifecycle APIs.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("node not found: {0}")]
    NotFound(NodeId),

    #[error("scheduler api error: {0}")]
    Api(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

/// A malformed or missing scale-in configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key}: invalid duration {value:?}: {reason}")]
    InvalidDuration {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{key}: invalid bool {value:?}")]
    InvalidBool { key: String, value: String },

    #[error("{key}: value must not be empty")]
    EmptyValue { key: String },

    #[error("unknown node selector strategy {0:?}")]
    UnknownStrategy(String),

    #[error("no pool identifier configured (expected one of node_class, node_pool, datacenter)")]
    MissingPoolIdentifier,
}

/// Why a pool member makes its pool unscalable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstabilityError {
    #[error("node {0} is initializing")]
    Initializing(NodeId),

    #[error("node {0} is draining")]
    Draining(NodeId),

    #[error("node {0} is ineligible")]
    Ineligible(NodeId),
}

/// Failure to map a member to its provider resource ID.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to read node info for {node_id}: {error}")]
    NodeInfo {
        node_id: NodeId,
        error: ClientError,
    },

    #[error("node {node_id}: required attribute {attribute} not found")]
    AttributeNotFound { node_id: NodeId, attribute: String },
}

/// Failure while draining one candidate.
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("failed to trigger drain on {node_id}: {error}")]
    Trigger {
        node_id: NodeId,
        error: ClientError,
    },

    #[error("failed to monitor drain on {node_id}: {error}")]
    Monitor {
        node_id: NodeId,
        error: ClientError,
    },

    #[error("drain on {node_id} failed: {message}")]
    Failed { node_id: NodeId, message: String },

    #[error("drain monitoring on {node_id} cancelled")]
    Cancelled { node_id: NodeId },
}

/// Failure while purging or restoring a candidate after termination.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to purge {node_id}: {error}")]
    Purge {
        node_id: NodeId,
        error: ClientError,
    },

    #[error("failed to restore eligibility on {node_id}: {error}")]
    Eligibility {
        node_id: NodeId,
        error: ClientError,
    },

    #[error("reconciliation of {node_id} cancelled")]
    Cancelled { node_id: NodeId },
}

/// Outcome of an exhausted or cancelled [`crate::retry::poll`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("condition not met after {attempts} attempts: {error}")]
    Exhausted { attempts: u32, error: E },

    #[error("condition not met after {attempts} attempts")]
    NotConverged { attempts: u32 },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Top-level error for a scale-in or readiness call.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("invalid scale-in configuration: {0}")]
    Config(ErrorSet<ConfigError>),

    #[error("failed to list cluster members: {0}")]
    Membership(ClientError),

    #[error("pool {pool} is not ready: {errors}")]
    Unstable {
        pool: String,
        errors: ErrorSet<InstabilityError>,
    },

    #[error("no eligible nodes found in pool {0}")]
    EmptyPool(String),

    #[error("no nodes selected using strategy {0}")]
    NoneSelected(String),

    #[error("failed to identify remote resources: {0}")]
    Resolve(ErrorSet<ResolveError>),

    #[error("failed to drain nodes: {0}")]
    Drain(ErrorSet<DrainError>),

    #[error("failed to reconcile nodes: {0}")]
    Reconcile(ErrorSet<ReconcileError>),
}

// ── Aggregation ───────────────────────────────────────────────────

/// Several failures from one multi-candidate stage, reported together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSet<E> {
    errors: Vec<E>,
}

impl<E> ErrorSet<E> {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn push(&mut self, err: E) {
        self.errors.push(err);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.errors.iter()
    }

    pub fn into_vec(self) -> Vec<E> {
        self.errors
    }

    /// `Ok(())` when nothing was collected, otherwise the set wrapped by `wrap`.
    pub fn into_result<T>(self, wrap: impl FnOnce(Self) -> T) -> Result<(), T> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(wrap(self))
        }
    }
}

impl<E> Default for ErrorSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> From<Vec<E>> for ErrorSet<E> {
    fn from(errors: Vec<E>) -> Self {
        Self { errors }
    }
}

impl<E> IntoIterator for ErrorSet<E> {
    type Item = E;
    type IntoIter = std::vec::IntoIter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<E> Extend<E> for ErrorSet<E> {
    fn extend<I: IntoIterator<Item = E>>(&mut self, iter: I) {
        self.errors.extend(iter);
    }
}

impl<E: fmt::Display> fmt::Display for ErrorSet<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => f.write_str("no errors"),
            [only] => write!(f, "{only}"),
            many => {
                write!(f, "{} errors occurred:", many.len())?;
                for err in many {
                    write!(f, "\n\t* {err}")?;
                }
                Ok(())
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for ErrorSet<E> {}
