//! Scale-in configuration parsed from a policy's string map.
//!
//! Policies hand the orchestrator a flat `key → value` map. Everything the
//! pipeline needs is parsed here once per call, and every malformed value
//! is reported together before any scheduler call is made.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ErrorSet};
use crate::types::{DrainSpec, PoolIdentifier, PoolKey};

pub const NODE_DRAIN_DEADLINE: &str = "node_drain_deadline";
pub const NODE_DRAIN_IGNORE_SYSTEM_JOBS: &str = "node_drain_ignore_system_jobs";
pub const NODE_PURGE: &str = "node_purge";
pub const NODE_SELECTOR_STRATEGY: &str = "node_selector_strategy";

/// How members are picked from a stable pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectorStrategy {
    /// Membership API order.
    #[default]
    Identity,
    NewestCreateIndex,
    LeastBusy,
    Empty,
    EmptyIgnoreSystem,
}

impl SelectorStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectorStrategy::Identity => "identity",
            SelectorStrategy::NewestCreateIndex => "newest_create_index",
            SelectorStrategy::LeastBusy => "least_busy",
            SelectorStrategy::Empty => "empty",
            SelectorStrategy::EmptyIgnoreSystem => "empty_ignore_system",
        }
    }
}

impl fmt::Display for SelectorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectorStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "identity" => Ok(SelectorStrategy::Identity),
            "newest_create_index" => Ok(SelectorStrategy::NewestCreateIndex),
            "least_busy" => Ok(SelectorStrategy::LeastBusy),
            "empty" => Ok(SelectorStrategy::Empty),
            "empty_ignore_system" => Ok(SelectorStrategy::EmptyIgnoreSystem),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Fully validated configuration for one scale-in call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleInConfig {
    pub drain: DrainSpec,
    /// Purge members from the scheduler once their instances are gone.
    pub purge: bool,
    pub pool: PoolIdentifier,
    pub strategy: SelectorStrategy,
}

impl ScaleInConfig {
    /// Parse and validate `cfg`, collecting every error.
    pub fn parse(cfg: &HashMap<String, String>) -> Result<Self, ErrorSet<ConfigError>> {
        let mut errors = ErrorSet::new();
        let mut drain = DrainSpec::default();

        if let Some(raw) = cfg.get(NODE_DRAIN_DEADLINE) {
            match parse_duration(raw) {
                Ok(d) => drain.deadline = d,
                Err(reason) => errors.push(ConfigError::InvalidDuration {
                    key: NODE_DRAIN_DEADLINE.to_string(),
                    value: raw.clone(),
                    reason,
                }),
            }
        }

        match parse_bool_key(cfg, NODE_DRAIN_IGNORE_SYSTEM_JOBS) {
            Ok(Some(v)) => drain.ignore_system_jobs = v,
            Ok(None) => {}
            Err(e) => errors.push(e),
        }

        let purge = match parse_purge(cfg) {
            Ok(v) => v,
            Err(e) => {
                errors.push(e);
                false
            }
        };

        let strategy = match cfg.get(NODE_SELECTOR_STRATEGY) {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                errors.push(e);
                SelectorStrategy::default()
            }),
            None => SelectorStrategy::default(),
        };

        let pool = match parse_pool(cfg) {
            Ok(pool) => Some(pool),
            Err(e) => {
                errors.extend(e);
                None
            }
        };

        match pool {
            Some(pool) if errors.is_empty() => Ok(Self {
                drain,
                purge,
                pool,
                strategy,
            }),
            _ => Err(errors),
        }
    }
}

/// Read the `node_purge` flag. Absent means disabled.
pub fn parse_purge(cfg: &HashMap<String, String>) -> Result<bool, ConfigError> {
    Ok(parse_bool_key(cfg, NODE_PURGE)?.unwrap_or(false))
}

/// Build the pool identifier from whichever pool keys are present.
///
/// More than one key combines them with logical AND.
pub fn parse_pool(cfg: &HashMap<String, String>) -> Result<PoolIdentifier, ErrorSet<ConfigError>> {
    let mut errors = ErrorSet::new();
    let mut identifiers = Vec::new();

    for key in PoolKey::ALL {
        if let Some(value) = cfg.get(key.config_key()) {
            let value = value.trim();
            if value.is_empty() {
                errors.push(ConfigError::EmptyValue {
                    key: key.config_key().to_string(),
                });
                continue;
            }
            identifiers.push(PoolIdentifier::new(key, value));
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    match identifiers.len() {
        0 => Err(ErrorSet::from(vec![ConfigError::MissingPoolIdentifier])),
        1 => Ok(identifiers.remove(0)),
        _ => Ok(PoolIdentifier::All { identifiers }),
    }
}

fn parse_bool_key(cfg: &HashMap<String, String>, key: &str) -> Result<Option<bool>, ConfigError> {
    match cfg.get(key) {
        None => Ok(None),
        Some(raw) => parse_bool(raw).map(Some).ok_or_else(|| ConfigError::InvalidBool {
            key: key.to_string(),
            value: raw.clone(),
        }),
    }
}

/// Parse the boolean spellings policy files use.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Parse a duration string like "15m", "1h30m", "90s" or "250ms".
///
/// A bare "0" is accepted. Every number needs a unit, and units must be
/// one of `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;

    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_end == 0 {
            return Err(format!("expected a number at {rest:?}"));
        }
        let (num, tail) = rest.split_at(num_end);
        let value: f64 = num.parse().map_err(|_| format!("invalid number {num:?}"))?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        let unit_nanos: u64 = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3600 * 1_000_000_000,
            "" => return Err(format!("missing unit after {num:?}")),
            other => return Err(format!("unknown unit {other:?}")),
        };

        let nanos = (value * unit_nanos as f64).round();
        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return Err(format!("duration {s:?} out of range"));
        }
        total = total
            .checked_add(Duration::from_nanos(nanos as u64))
            .ok_or_else(|| format!("duration {s:?} out of range"))?;
        rest = tail;
    }

    Ok(total)
}

/// Render a duration in the smallest exact unit that [`parse_duration`]
/// reads back.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else if d.subsec_nanos() % 1_000_000 == 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}ns", d.as_nanos())
    }
}
