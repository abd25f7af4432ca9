//! 虚拟机批量生命周期测试

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use atp_converge::{
    actions, plan_migrations, seeded_rng, DrainStatus, EntityKind, EntityState, ExecutorError,
    TestConfig, VmLifecycle, WaitTiming, DEFAULT_DRAIN_WORKERS, DEFAULT_MAX_WORKERS,
};
use common::{at, status, ActionResult, FakeRemote, Observation};

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn lifecycle(remote: &Arc<FakeRemote>) -> VmLifecycle<FakeRemote> {
    VmLifecycle::new(Arc::clone(remote))
        .with_timing(WaitTiming::from_secs(60, 5))
        .with_final_timing(WaitTiming::from_secs(60, 10))
        .with_max_workers(4)
        .with_drain_workers(2)
}

#[tokio::test(start_paused = true)]
async fn test_start_all_isolates_rejection() {
    common::init_tracing();
    let remote = Arc::new(FakeRemote::new());
    for id in ["vm1", "vm2", "vm3"] {
        remote.vm(id, &["shutoff"]);
        remote.after_action(
            EntityKind::Vm,
            id,
            actions::START,
            vec![status("PoweringUp"), status("PoweringUp"), status("Running")],
        );
    }
    remote.on_action(EntityKind::Vm, "vm2", actions::START, ActionResult::Reject);

    let started = Instant::now();
    let outcome = lifecycle(&remote).start_all(&ids(&["vm1", "vm2", "vm3"])).await;

    assert_eq!(outcome.len(), 3);
    assert_eq!(outcome.failed_entities(), ids(&["vm2"]));
    assert!(matches!(
        outcome.get("vm2").unwrap().error(),
        Some(ExecutorError::ActionRejected(_))
    ));
    assert_eq!(outcome.get("vm1").unwrap().value().unwrap().status, "Running");
    assert_eq!(started.elapsed(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_stop_all_passes_force_flag() {
    let remote = Arc::new(FakeRemote::new());
    for id in ["vm1", "vm2"] {
        remote.vm(id, &["running"]);
        remote.after_action(EntityKind::Vm, id, actions::SHUTDOWN, vec![status("shutoff")]);
    }

    let outcome = lifecycle(&remote).stop_all(&ids(&["vm1", "vm2"]), true).await;

    assert!(outcome.all_ok());
    for invocation in remote.invocations() {
        assert_eq!(invocation.action, actions::SHUTDOWN);
        assert_eq!(invocation.params["force"], true);
    }
}

#[tokio::test(start_paused = true)]
async fn test_reboot_times_out_when_stuck() {
    let remote = Arc::new(FakeRemote::new());
    remote.vm("vm1", &["running"]);
    remote.after_action(EntityKind::Vm, "vm1", actions::REBOOT, vec![status("rebooting")]);

    let outcome = lifecycle(&remote).reboot_all(&ids(&["vm1"])).await;

    let err = outcome.get("vm1").unwrap().error().unwrap();
    assert!(err.is_timeout());
    assert!(outcome.into_result().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_wait_all_tolerates_transient_absence() {
    let remote = Arc::new(FakeRemote::new());
    remote.script(
        EntityKind::Vm,
        "vm1",
        vec![Observation::Missing, status("creating"), status("running")],
    );
    remote.vm("vm2", &["running"]);
    remote.vm("vm3", &["error"]);

    let outcome = lifecycle(&remote)
        .wait_all(&ids(&["vm1", "vm2", "vm3"]), &["running"])
        .await;

    assert!(outcome.get("vm1").unwrap().ok());
    assert!(outcome.get("vm2").unwrap().ok());
    assert!(outcome.get("vm3").unwrap().error().unwrap().is_timeout());
    assert!(remote.invocations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_remove_all_twice() {
    let remote = Arc::new(FakeRemote::new());
    remote.vm("vm1", &["running"]);
    remote.vm("vm2", &["shutoff"]);
    remote.after_action(EntityKind::Vm, "vm1", actions::SHUTDOWN, vec![status("shutoff")]);
    for id in ["vm1", "vm2"] {
        remote.after_action(EntityKind::Vm, id, actions::DELETE, vec![Observation::Missing]);
    }

    let lifecycle = lifecycle(&remote);
    let first = lifecycle.remove_all(&ids(&["vm1", "vm2"])).await;
    assert!(first.success());

    let second = lifecycle.remove_all(&ids(&["vm1", "vm2"])).await;
    assert!(second.success());
    assert_eq!(second.get("vm1"), Some(&DrainStatus::AlreadyAbsent));
    assert_eq!(remote.invocation_count("vm1", actions::DELETE), 1);
}

#[tokio::test(start_paused = true)]
async fn test_migrate_all_follows_seeded_plan() {
    let hosts = ids(&["host-1", "host-2", "host-3"]);
    let vms = ids(&["vm1", "vm2", "vm3", "vm4"]);

    let current: Vec<EntityState> = vms
        .iter()
        .map(|id| EntityState::new(EntityKind::Vm, id, "running").with_location("host-1"))
        .collect();
    let plan = plan_migrations(&mut seeded_rng(Some(42)), &current, &hosts).unwrap();

    let remote = Arc::new(FakeRemote::new());
    for entry in &plan {
        remote.script(EntityKind::Vm, &entry.vm_id, vec![at("running", "host-1")]);
        remote.after_action(
            EntityKind::Vm,
            &entry.vm_id,
            actions::MIGRATE,
            vec![at("migrating", "host-1"), at("running", &entry.target_host)],
        );
    }

    let outcome = lifecycle(&remote)
        .migrate_all(&mut seeded_rng(Some(42)), &vms, &hosts)
        .await
        .unwrap();

    assert!(outcome.all_ok());
    for entry in &plan {
        assert_ne!(entry.target_host, "host-1");
        let state = outcome.get(&entry.vm_id).unwrap().value().unwrap();
        assert_eq!(state.location.as_deref(), Some(entry.target_host.as_str()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_migrate_all_without_candidate_host() {
    let remote = Arc::new(FakeRemote::new());
    remote.script(EntityKind::Vm, "vm1", vec![at("running", "host-1")]);

    let err = lifecycle(&remote)
        .migrate_all(&mut seeded_rng(Some(1)), &ids(&["vm1"]), &ids(&["host-1"]))
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::InvalidArgument(_)));
    assert!(remote.invocations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_migrate_all_isolates_missing_vm() {
    let remote = Arc::new(FakeRemote::new());
    remote.script(EntityKind::Vm, "vm1", vec![at("running", "host-1")]);
    remote.after_action(
        EntityKind::Vm,
        "vm1",
        actions::MIGRATE,
        vec![at("migrating", "host-1"), at("running", "host-2")],
    );

    let outcome = lifecycle(&remote)
        .migrate_all(
            &mut seeded_rng(Some(3)),
            &ids(&["vm1", "vm2"]),
            &ids(&["host-1", "host-2"]),
        )
        .await
        .unwrap();

    assert_eq!(outcome.len(), 2);
    assert_eq!(outcome.failed_entities(), ids(&["vm2"]));
    assert!(outcome.get("vm2").unwrap().error().unwrap().is_not_found());

    let state = outcome.get("vm1").unwrap().value().unwrap();
    assert_eq!(state.location.as_deref(), Some("host-2"));
    assert_eq!(remote.invocation_count("vm1", actions::MIGRATE), 1);
    assert_eq!(remote.invocation_count("vm2", actions::MIGRATE), 0);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_all_names_snapshots() {
    let remote = Arc::new(FakeRemote::new());
    for id in ["vm1", "vm2"] {
        remote.vm(id, &["running"]);
        remote.after_action(
            EntityKind::Vm,
            id,
            actions::SNAPSHOT,
            vec![status("snapshotting"), status("running")],
        );
    }

    let outcome = lifecycle(&remote).snapshot_all(&ids(&["vm1", "vm2"]), "nightly").await;

    assert!(outcome.all_ok());
    let mut names: Vec<String> = remote
        .invocations()
        .iter()
        .map(|i| i.params["name"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    assert_eq!(names, ids(&["nightly-vm1", "nightly-vm2"]));
}

#[tokio::test(start_paused = true)]
async fn test_migrate_disk() {
    let remote = Arc::new(FakeRemote::new());
    remote.script(EntityKind::Disk, "disk-1", vec![at("ok", "pool-a")]);
    remote.after_action(
        EntityKind::Disk,
        "disk-1",
        actions::MIGRATE,
        vec![at("migrating", "pool-b"), at("ok", "pool-b")],
    );

    let state = lifecycle(&remote).migrate_disk("disk-1", "pool-b").await.unwrap();
    assert_eq!(state.location.as_deref(), Some("pool-b"));
}

#[tokio::test(start_paused = true)]
async fn test_from_config() {
    let mut config = TestConfig::default();
    config.wait.timeout = 20;
    config.wait.poll_interval = 5;
    config.batch.max_workers = 1;

    let remote = Arc::new(FakeRemote::new());
    remote.vm("vm1", &["shutoff"]);
    remote.vm("vm2", &["shutoff"]);
    for id in ["vm1", "vm2"] {
        remote.delay_actions(id, Duration::from_secs(1));
        remote.after_action(EntityKind::Vm, id, actions::START, vec![status("running")]);
    }

    let outcome = VmLifecycle::from_config(Arc::clone(&remote), &config)
        .start_all(&ids(&["vm1", "vm2"]))
        .await;

    assert!(outcome.all_ok());
    assert_eq!(remote.max_concurrent_actions(), 1);
}

#[test]
fn test_default_pool_sizes() {
    let lifecycle = VmLifecycle::new(Arc::new(FakeRemote::new()));
    assert_eq!(lifecycle.max_workers(), DEFAULT_MAX_WORKERS);
    assert_eq!(lifecycle.drain_workers(), DEFAULT_DRAIN_WORKERS);

    let config = TestConfig::default();
    assert_eq!(config.batch.drain_workers, DEFAULT_DRAIN_WORKERS);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_all_stops_on_cancel() {
    let remote = Arc::new(FakeRemote::new());
    for id in ["vm1", "vm2"] {
        remote.vm(id, &["running"]);
    }

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        sleep(Duration::from_secs(7)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let outcome = lifecycle(&remote)
        .with_cancel(token)
        .snapshot_all(&ids(&["vm1", "vm2"]), "nightly")
        .await;

    assert_eq!(started.elapsed(), Duration::from_secs(7));
    assert_eq!(outcome.failed_entities(), ids(&["vm1", "vm2"]));
    for entry in outcome.outcomes() {
        assert!(matches!(entry.error(), Some(ExecutorError::Cancelled(_))));
    }
}
