//! End-to-end scale-in tests.
//!
//! Drive the orchestrator against the in-memory scheduler backend with
//! the AWS resolver, covering the full pipeline from config parsing to
//! post-termination reconciliation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use poolscale_core::retry::poll;
use poolscale_core::*;
use poolscale_scalein::drain::{DRAINED_BY, DRAINED_BY_META_KEY};
use poolscale_scalein::resolver::AWS_INSTANCE_ID_ATTR;
use poolscale_scalein::{AwsInstanceId, ScaleOrchestrator};

fn record(id: &str, instance: &str) -> MemberRecord {
    MemberRecord {
        member: ClusterMember {
            id: id.to_string(),
            name: id.to_lowercase(),
            node_class: "web".to_string(),
            node_pool: String::new(),
            datacenter: "dc1".to_string(),
            status: MemberStatus::Ready,
            eligibility: SchedulingEligibility::Eligible,
            draining: false,
            create_index: 100,
            load: NodeLoad::default(),
        },
        attributes: HashMap::from([(AWS_INSTANCE_ID_ATTR.to_string(), instance.to_string())]),
        meta: HashMap::new(),
    }
}

fn five_member_pool() -> InMemoryScheduler {
    InMemoryScheduler::with_members(
        (1..=5)
            .map(|i| record(&format!("M{i}"), &format!("i-00{i}")))
            .collect(),
    )
}

fn web_cfg(extra: &[(&str, &str)]) -> HashMap<String, String> {
    let mut cfg = HashMap::from([("node_class".to_string(), "web".to_string())]);
    for (k, v) in extra {
        cfg.insert(k.to_string(), v.to_string());
    }
    cfg
}

fn orchestrator(sched: &InMemoryScheduler) -> ScaleOrchestrator {
    ScaleOrchestrator::new(Arc::new(sched.clone()), Arc::new(AwsInstanceId))
}

/// Delegates to the in-memory backend, counting membership listings.
struct CountingScheduler {
    inner: InMemoryScheduler,
    lists: AtomicUsize,
}

#[async_trait]
impl MembershipApi for CountingScheduler {
    async fn list_members(&self) -> ClientResult<Vec<ClusterMember>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list_members().await
    }

    async fn node_info(&self, node_id: &str) -> ClientResult<NodeInfo> {
        self.inner.node_info(node_id).await
    }
}

#[async_trait]
impl DrainApi for CountingScheduler {
    async fn trigger_drain(
        &self,
        node_id: &str,
        spec: &DrainSpec,
        meta: &HashMap<String, String>,
    ) -> ClientResult<u64> {
        self.inner.trigger_drain(node_id, spec, meta).await
    }

    async fn monitor_drain(
        &self,
        node_id: &str,
        index: u64,
        ignore_system_jobs: bool,
    ) -> ClientResult<mpsc::Receiver<DrainMessage>> {
        self.inner
            .monitor_drain(node_id, index, ignore_system_jobs)
            .await
    }
}

#[async_trait]
impl NodeLifecycleApi for CountingScheduler {
    async fn set_eligibility(&self, node_id: &str, eligible: bool) -> ClientResult<()> {
        self.inner.set_eligibility(node_id, eligible).await
    }

    async fn purge_node(&self, node_id: &str) -> ClientResult<()> {
        self.inner.purge_node(node_id).await
    }
}

// ── Scale-in ──────────────────────────────────────────────────────

#[tokio::test]
async fn healthy_pool_returns_first_members_in_list_order() {
    let sched = five_member_pool();

    let candidates = orchestrator(&sched)
        .scale_in(&Cancellation::never(), &web_cfg(&[]), 2)
        .await
        .unwrap();

    assert_eq!(
        candidates,
        vec![
            ScaleCandidate::new("M1", "i-001"),
            ScaleCandidate::new("M2", "i-002"),
        ]
    );
    assert_eq!(sched.drain_trigger_count(), 2);

    let meta = sched.drain_meta("M1").await.unwrap();
    assert_eq!(meta[DRAINED_BY_META_KEY], DRAINED_BY);
    assert_eq!(meta["drain_deadline"], "900s");

    // Drained members stay cordoned until reconciled.
    let m1 = sched.member("M1").await.unwrap();
    assert_eq!(m1.eligibility, SchedulingEligibility::Ineligible);
    let m3 = sched.member("M3").await.unwrap();
    assert_eq!(m3.eligibility, SchedulingEligibility::Eligible);
}

#[tokio::test]
async fn draining_member_blocks_scale_in() {
    let mut draining = record("M2", "i-002");
    draining.member.draining = true;
    let sched = InMemoryScheduler::with_members(vec![
        record("M1", "i-001"),
        draining,
        record("M3", "i-003"),
    ]);

    let err = orchestrator(&sched)
        .scale_in(&Cancellation::never(), &web_cfg(&[]), 1)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("is draining"), "{err}");
    assert_eq!(sched.drain_trigger_count(), 0);
}

#[tokio::test]
async fn malformed_deadline_fails_before_listing() {
    let counting = Arc::new(CountingScheduler {
        inner: five_member_pool(),
        lists: AtomicUsize::new(0),
    });
    let orch = ScaleOrchestrator::new(counting.clone(), Arc::new(AwsInstanceId));

    let err = orch
        .scale_in(
            &Cancellation::never(),
            &web_cfg(&[("node_drain_deadline", "10mm")]),
            2,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ScaleError::Config(_)));
    assert!(err.to_string().contains("node_drain_deadline"));
    assert_eq!(counting.lists.load(Ordering::SeqCst), 0);
    assert_eq!(counting.inner.drain_trigger_count(), 0);
}

#[tokio::test]
async fn every_config_error_is_reported() {
    let sched = five_member_pool();
    let cfg = HashMap::from([
        ("node_drain_deadline".to_string(), "soon".to_string()),
        ("node_purge".to_string(), "maybe".to_string()),
    ]);

    match orchestrator(&sched)
        .scale_in(&Cancellation::never(), &cfg, 1)
        .await
        .unwrap_err()
    {
        ScaleError::Config(errors) => assert_eq!(errors.len(), 3),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[tokio::test]
async fn unresolvable_member_prevents_any_drain() {
    let sched = InMemoryScheduler::with_members(vec![
        record("M1", "i-001"),
        record("M2", ""),
        record("M3", "i-003"),
    ]);

    let err = orchestrator(&sched)
        .scale_in(&Cancellation::never(), &web_cfg(&[]), 2)
        .await
        .unwrap_err();

    assert!(matches!(err, ScaleError::Resolve(_)));
    assert!(err.to_string().contains("required attribute"));
    assert_eq!(sched.drain_trigger_count(), 0);
}

#[tokio::test]
async fn drain_failure_discards_all_candidates() {
    let sched = five_member_pool();
    sched.fail_drain("M2", "allocation failed to migrate").await;

    let err = orchestrator(&sched)
        .scale_in(&Cancellation::never(), &web_cfg(&[]), 3)
        .await
        .unwrap_err();

    match err {
        ScaleError::Drain(errors) => {
            assert_eq!(errors.len(), 1);
            assert!(errors.to_string().contains("allocation failed to migrate"));
        }
        other => panic!("expected drain error, got {other:?}"),
    }
    // Siblings were still drained.
    assert_eq!(sched.drain_trigger_count(), 3);
}

#[tokio::test]
async fn cancellation_stops_waiting_on_drains() {
    let sched = five_member_pool();
    sched.hang_drain("M1").await;
    let (handle, cancel) = Cancellation::new();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator(&sched).scale_in(&cancel, &web_cfg(&[]), 2),
    )
    .await
    .expect("scale-in should return once cancelled")
    .unwrap_err();

    assert!(err.to_string().contains("drain monitoring on M1 cancelled"), "{err}");
}

#[tokio::test]
async fn remote_check_only_selects_known_instances() {
    let sched = five_member_pool();
    let remote_ids = HashSet::from(["i-003".to_string(), "i-004".to_string()]);

    let candidates = orchestrator(&sched)
        .scale_in_with_remote_check(&Cancellation::never(), &web_cfg(&[]), 3, &remote_ids)
        .await
        .unwrap();

    assert_eq!(
        candidates,
        vec![
            ScaleCandidate::new("M3", "i-003"),
            ScaleCandidate::new("M4", "i-004"),
        ]
    );
    assert_eq!(sched.drain_trigger_count(), 2);
}

#[tokio::test]
async fn remote_check_with_no_known_instances_selects_none() {
    let sched = five_member_pool();

    let err = orchestrator(&sched)
        .scale_in_with_remote_check(&Cancellation::never(), &web_cfg(&[]), 1, &HashSet::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ScaleError::NoneSelected(_)));
    assert_eq!(sched.drain_trigger_count(), 0);
}

#[tokio::test]
async fn newest_strategy_picks_latest_registered() {
    let mut records: Vec<_> = (1..=3)
        .map(|i| record(&format!("M{i}"), &format!("i-00{i}")))
        .collect();
    for (i, r) in records.iter_mut().enumerate() {
        r.member.create_index = 10 * (i as u64 + 1);
    }
    let sched = InMemoryScheduler::with_members(records);

    let candidates = orchestrator(&sched)
        .scale_in(
            &Cancellation::never(),
            &web_cfg(&[("node_selector_strategy", "newest_create_index")]),
            1,
        )
        .await
        .unwrap();

    assert_eq!(candidates, vec![ScaleCandidate::new("M3", "i-003")]);
}

// ── Readiness ─────────────────────────────────────────────────────

#[tokio::test]
async fn readiness_follows_pool_stability() {
    let sched = five_member_pool();
    let orch = orchestrator(&sched);
    assert!(orch.is_pool_ready(&web_cfg(&[])).await.unwrap());

    let mut joining = record("M6", "i-006");
    joining.member.status = MemberStatus::Initializing;
    sched.insert(joining).await;
    assert!(!orch.is_pool_ready(&web_cfg(&[])).await.unwrap());
}

// ── Reconciliation ────────────────────────────────────────────────

#[tokio::test]
async fn post_scale_in_purges_terminated_and_restores_failed() {
    let sched = five_member_pool();
    let orch = orchestrator(&sched);
    let cfg = web_cfg(&[("node_purge", "true")]);

    let candidates = orch
        .scale_in(&Cancellation::never(), &cfg, 2)
        .await
        .unwrap();
    let outcomes = vec![
        (candidates[0].clone(), TerminationOutcome::Terminated),
        (candidates[1].clone(), TerminationOutcome::Failed),
    ];

    orch.post_scale_in(&Cancellation::never(), &cfg, &outcomes)
        .await
        .unwrap();
    assert_eq!(sched.purged().await, vec!["M1"]);
    let m2 = sched.member("M2").await.unwrap();
    assert_eq!(m2.eligibility, SchedulingEligibility::Eligible);

    // Running it again changes nothing and still succeeds.
    orch.post_scale_in(&Cancellation::never(), &cfg, &outcomes)
        .await
        .unwrap();
    assert_eq!(sched.purged().await, vec!["M1"]);
}

#[tokio::test]
async fn post_scale_in_without_purge_keeps_members() {
    let sched = five_member_pool();
    let orch = orchestrator(&sched);

    let candidates = orch
        .scale_in(&Cancellation::never(), &web_cfg(&[]), 1)
        .await
        .unwrap();
    let outcomes = vec![(candidates[0].clone(), TerminationOutcome::Terminated)];

    orch.post_scale_in(&Cancellation::never(), &web_cfg(&[]), &outcomes)
        .await
        .unwrap();
    assert!(sched.purged().await.is_empty());
    assert!(sched.member("M1").await.is_some());
}

#[tokio::test]
async fn termination_confirmed_by_polling_then_purged() {
    let sched = five_member_pool();
    let orch = orchestrator(&sched);
    let cfg = web_cfg(&[("node_purge", "1")]);

    let candidates = orch
        .scale_in(&Cancellation::never(), &cfg, 1)
        .await
        .unwrap();

    // The provider reports the instance terminated on the third read.
    let reads = AtomicU32::new(0);
    poll(
        &Cancellation::never(),
        RetryPolicy::new(Duration::from_millis(5), 5),
        || {
            let n = reads.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<_, ClientError>(n >= 3) }
        },
    )
    .await
    .unwrap();
    assert_eq!(reads.load(Ordering::SeqCst), 3);

    let outcomes = vec![(candidates[0].clone(), TerminationOutcome::Terminated)];
    orch.post_scale_in(&Cancellation::never(), &cfg, &outcomes)
        .await
        .unwrap();
    assert_eq!(sched.purged().await, vec!["M1"]);
}
