//! poolscale — developer binary for the scale-in orchestrator.
//!
//! Runs a scale-in or readiness check against a JSON cluster snapshot
//! using the in-memory scheduler backend, and prints the result as JSON
//! on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```text
//! poolscale scale-in --snapshot cluster.json --count 2 --set node_class=web
//! poolscale pool-ready --snapshot cluster.json --set node_class=web
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

use poolscale_core::{Cancellation, InMemoryScheduler, ScaleCandidate, TerminationOutcome};
use poolscale_scalein::{ResolverRegistry, ScaleOrchestrator, self_node_id_from_env};

#[derive(Parser)]
#[command(name = "poolscale", about = "Node pool scale-in orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Select, identify and drain nodes, printing the candidates.
    ScaleIn {
        /// Cluster snapshot (JSON).
        #[arg(long)]
        snapshot: PathBuf,

        /// Number of nodes to remove.
        #[arg(long)]
        count: usize,

        /// Provider used to resolve remote instance IDs.
        #[arg(long, default_value = "aws")]
        provider: String,

        /// Scale-in configuration entry, repeatable.
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        set: Vec<(String, String)>,

        /// Only consider members backed by this remote instance, repeatable.
        #[arg(long = "remote-id")]
        remote_ids: Vec<String>,

        /// Treat the candidates as terminated and reconcile afterwards.
        #[arg(long)]
        reconcile: bool,
    },
    /// Report whether the configured pool is settled enough to scale.
    PoolReady {
        /// Cluster snapshot (JSON).
        #[arg(long)]
        snapshot: PathBuf,

        /// Scale-in configuration entry, repeatable.
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        set: Vec<(String, String)>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,poolscale=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::ScaleIn {
            snapshot,
            count,
            provider,
            set,
            remote_ids,
            reconcile,
        } => {
            let cfg: HashMap<String, String> = set.into_iter().collect();
            run_scale_in(&snapshot, count, &provider, cfg, remote_ids, reconcile).await
        }
        Command::PoolReady { snapshot, set } => {
            let cfg: HashMap<String, String> = set.into_iter().collect();
            run_pool_ready(&snapshot, cfg).await
        }
    }
}

async fn load_snapshot(path: &Path) -> anyhow::Result<InMemoryScheduler> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    let sched = InMemoryScheduler::from_json(&raw)
        .with_context(|| format!("invalid snapshot {}", path.display()))?;
    info!(path = %path.display(), "snapshot loaded");
    Ok(sched)
}

fn orchestrator(sched: &InMemoryScheduler, provider: &str) -> anyhow::Result<ScaleOrchestrator> {
    let registry = ResolverRegistry::with_defaults();
    let resolver = registry.get(provider).ok_or_else(|| {
        anyhow!(
            "unknown provider {provider:?} (known: {})",
            registry.providers().collect::<Vec<_>>().join(", ")
        )
    })?;
    Ok(ScaleOrchestrator::new(Arc::new(sched.clone()), resolver)
        .with_self_node_id(self_node_id_from_env()))
}

/// Cancel the call on Ctrl-C.
fn cancel_on_ctrl_c() -> Cancellation {
    let (handle, cancel) = Cancellation::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            handle.cancel();
        }
    });
    cancel
}

async fn run_scale_in(
    snapshot: &Path,
    count: usize,
    provider: &str,
    cfg: HashMap<String, String>,
    remote_ids: Vec<String>,
    reconcile: bool,
) -> anyhow::Result<()> {
    let sched = load_snapshot(snapshot).await?;
    let orch = orchestrator(&sched, provider)?;
    let cancel = cancel_on_ctrl_c();

    let candidates: Vec<ScaleCandidate> = if remote_ids.is_empty() {
        orch.scale_in(&cancel, &cfg, count).await?
    } else {
        let remote_ids: HashSet<String> = remote_ids.into_iter().collect();
        orch.scale_in_with_remote_check(&cancel, &cfg, count, &remote_ids)
            .await?
    };

    if reconcile {
        let outcomes: Vec<_> = candidates
            .iter()
            .map(|c| (c.clone(), TerminationOutcome::Terminated))
            .collect();
        orch.post_scale_in(&cancel, &cfg, &outcomes).await?;
    }

    let output = json!({
        "candidates": candidates,
        "purged": sched.purged().await,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_pool_ready(snapshot: &Path, cfg: HashMap<String, String>) -> anyhow::Result<()> {
    let sched = load_snapshot(snapshot).await?;
    // Readiness never resolves remote IDs, so any provider will do.
    let orch = orchestrator(&sched, "aws")?;
    let ready = orch.is_pool_ready(&cfg).await?;
    println!("{}", serde_json::to_string_pretty(&json!({ "ready": ready }))?);
    Ok(())
}
