//! End-to-end scenarios driving the real controller, builders, and
//! inventory tables against a `FakeDriver` (§8's literal scenarios).
//! Time advances by constructing later `Instant`s explicitly rather
//! than sleeping, since every deadline in this crate is monotonic.

use fleet_update_orchestrator::builders::{self, Fleet, WaveConfig};
use fleet_update_orchestrator::config::{AlarmRestrictions, ApplyType, InstanceAction, StepDefaults};
use fleet_update_orchestrator::controller::StrategyController;
use fleet_update_orchestrator::driver::fake::FakeDriver;
use fleet_update_orchestrator::inventory::Inventory;
use fleet_update_orchestrator::strategy::step::Event;
use fleet_update_orchestrator::strategy::{Strategy, StrategyStatus};
use fleet_update_orchestrator::types::{
    AdministrativeState, Alarm, Availability, DeviceImageUpdate, Host, HostPersonality,
    HostServiceState, Instance, OperationalState, PatchHostState,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

fn worker(name: &str) -> Host {
    Host {
        uuid: Uuid::new_v4(),
        name: name.to_string(),
        personality: HostPersonality::Worker,
        administrative_state: AdministrativeState::Unlocked,
        operational_state: OperationalState::Enabled,
        availability: Availability::Online,
        software_load: "1.0".to_string(),
        target_load: "1.0".to_string(),
        device_image_update: DeviceImageUpdate::Null,
        host_service_state: HostServiceState::Enabled,
        patch_state: PatchHostState {
            patch_current: true,
            patch_failed: false,
        },
        kubelet_version: None,
    }
}

fn controller_host(name: &str) -> Host {
    Host {
        personality: HostPersonality::Controller,
        ..worker(name)
    }
}

/// Scenario 2: unlock with one transient failure. `HOST_UNLOCK_FAILED`
/// fires once; the retry only goes out on the `HOST_AUDIT` that lands
/// after `retry_delay_secs`, and the step only succeeds once the host
/// actually reports unlocked+enabled.
#[tokio::test]
async fn unlock_retries_once_then_succeeds() {
    let driver: Arc<FakeDriver> = Arc::new(FakeDriver::new());
    let inventory = Inventory::default();
    let mut host = worker("w-0");
    host.administrative_state = AdministrativeState::Locked;
    host.operational_state = OperationalState::Disabled;
    inventory.hosts.upsert(host).await;

    let step = builders::unlock_hosts(&["w-0".to_string()], &StepDefaults::default());
    let stage = fleet_update_orchestrator::strategy::stage::Stage::new("unlock", vec![step]);
    let strategy = Strategy::new(
        fleet_update_orchestrator::config::StrategyKind::SwPatch,
        test_knobs(),
        vec![stage],
    );
    let mut controller = StrategyController::new(strategy, driver.clone(), inventory.clone());

    let t0 = Instant::now();
    controller.apply(t0).await.unwrap();
    assert_eq!(driver.call_count("unlock_hosts"), 1);

    controller
        .handle_event(
            Event::HostUnlockFailed {
                host_name: "w-0".to_string(),
                reason: "busy".to_string(),
            },
            t0,
        )
        .await;
    assert!(matches!(controller.strategy.status, StrategyStatus::Applying));

    // Audit before the retry delay elapses: no second call yet.
    controller.handle_event(Event::HostAudit, t0 + Duration::from_secs(10)).await;
    assert_eq!(driver.call_count("unlock_hosts"), 1);

    // Audit after the retry delay: a second unlock call goes out.
    let retry_time = t0 + Duration::from_secs(StepDefaults::default().unlock_retry_delay_secs + 1);
    controller.handle_event(Event::HostAudit, retry_time).await;
    assert_eq!(driver.call_count("unlock_hosts"), 2);

    // Host now reports unlocked+enabled: the step, stage, and strategy
    // all complete.
    let mut unlocked = inventory.hosts.get("w-0").await.unwrap();
    unlocked.administrative_state = AdministrativeState::Unlocked;
    unlocked.operational_state = OperationalState::Enabled;
    inventory.hosts.upsert(unlocked).await;
    controller.handle_event(Event::HostAudit, retry_time).await;

    assert_eq!(controller.strategy.status, StrategyStatus::Applied);
    assert_eq!(driver.call_count("unlock_hosts"), 2);
}

/// Scenario 3: `migrate-instances` fails when its captured instance
/// moved off the source host before `apply` runs.
#[tokio::test]
async fn migrate_instances_fails_when_instance_moved() {
    let driver: Arc<FakeDriver> = Arc::new(FakeDriver::new());
    let inventory = Inventory::default();
    let instance_uuid = Uuid::new_v4();
    inventory
        .instances
        .upsert(Instance {
            uuid: instance_uuid,
            name: "i-0".to_string(),
            host_name: "w-1".to_string(),
            administrative_state: AdministrativeState::Unlocked,
            operational_state: OperationalState::Enabled,
        })
        .await;

    let mut record = fleet_update_orchestrator::strategy::step::StepRecord {
        name: "migrate-instances".to_string(),
        fields: Default::default(),
    };
    record.set("entity_uuids", vec![instance_uuid]);
    record.set("captured_host_names", vec!["w-0".to_string()]);
    record.set("timeout", 1800u64);
    let step = fleet_update_orchestrator::strategy::registry::deserialize_step(&record).unwrap();

    let stage = fleet_update_orchestrator::strategy::stage::Stage::new("migrate", vec![step]);
    let strategy = Strategy::new(
        fleet_update_orchestrator::config::StrategyKind::SwPatch,
        test_knobs(),
        vec![stage],
    );
    let mut controller = StrategyController::new(strategy, driver, inventory);

    controller.apply(Instant::now()).await.unwrap();

    assert_eq!(controller.strategy.status, StrategyStatus::Failed);
    let reason = controller.strategy.reason.clone().unwrap();
    assert!(reason.contains("instance i-0 has moved from w-0 to w-1"), "{reason}");
}

/// Scenario 6: a relaxed restriction filters out an alarm whose
/// `mgmt_affecting` is `"False"`; `fail_on_alarms=true` still succeeds
/// once both alarms are filtered (one by restriction, one by
/// ignore-list).
#[tokio::test]
async fn query_alarms_relaxed_filters_non_management_alarms() {
    let driver = Arc::new(FakeDriver::new());
    driver.set_alarms(vec![
        Alarm {
            alarm_id: "100.101".to_string(),
            alarm_uuid: Uuid::new_v4().to_string(),
            mgmt_affecting: "False".to_string(),
        },
        Alarm {
            alarm_id: "200.005".to_string(),
            alarm_uuid: Uuid::new_v4().to_string(),
            mgmt_affecting: "True".to_string(),
        },
    ]);
    let inventory = Inventory::default();

    let mut record = fleet_update_orchestrator::strategy::step::StepRecord {
        name: "query-alarms".to_string(),
        fields: Default::default(),
    };
    record.set("timeout", 60u64);
    record.set("fail_on_alarms", true);
    record.set("alarm_restrictions", AlarmRestrictions::Relaxed);
    record.set("ignore_list", vec!["200.005".to_string()]);
    let step = fleet_update_orchestrator::strategy::registry::deserialize_step(&record).unwrap();

    let stage = fleet_update_orchestrator::strategy::stage::Stage::new("gate", vec![step]);
    let strategy = Strategy::new(
        fleet_update_orchestrator::config::StrategyKind::SwPatch,
        test_knobs(),
        vec![stage],
    );
    let mut controller = StrategyController::new(strategy, driver, inventory);

    controller.apply(Instant::now()).await.unwrap();

    assert_eq!(controller.strategy.status, StrategyStatus::Applied);
}

/// Scenario 1 (abridged): a serial worker wave with no alarms and no
/// instances runs lock -> work -> unlock -> stabilize ->
/// wait-alarms-clear per host, entirely synchronously once every audit
/// fires. `build_wave` itself carries no alarm gate (see
/// `sw_patch_brackets_whole_strategy_with_one_alarm_gate_pair` for the
/// gate placement a real builder wraps around it).
#[tokio::test]
async fn worker_wave_runs_every_host_through_the_full_cycle() {
    let driver = Arc::new(FakeDriver::new());
    let inventory = Inventory::default();
    for name in ["w-0", "w-1"] {
        inventory.hosts.upsert(worker(name)).await;
    }
    let fleet = Fleet::snapshot(&inventory).await;
    let defaults = StepDefaults::default();
    let cfg = WaveConfig {
        personality: HostPersonality::Worker,
        apply_type: ApplyType::Serial,
        max_parallel: 1,
        instance_action: None,
        alarm_restrictions: AlarmRestrictions::Strict,
    };
    let stages = builders::build_wave(&fleet, &cfg, &defaults, |group| {
        vec![builders::unlock_hosts(group, &defaults)]
    });
    // 2 host stages, one per worker.
    assert_eq!(stages.len(), 2);

    let strategy = Strategy::new(fleet_update_orchestrator::config::StrategyKind::SwPatch, test_knobs(), stages);
    let mut controller = StrategyController::new(strategy, driver.clone(), inventory.clone());

    let t0 = Instant::now();
    controller.apply(t0).await.unwrap();
    // First host's lock-hosts call is now in flight.
    assert_eq!(driver.call_count("lock_hosts"), 1);

    for name in ["w-0", "w-1"] {
        let mut host = inventory.hosts.get(name).await.unwrap();
        host.administrative_state = AdministrativeState::Locked;
        host.operational_state = OperationalState::Disabled;
        inventory.hosts.upsert(host).await;
        controller.handle_event(Event::HostAudit, t0).await;
        // unlock-hosts in the `work` closure fires once locked.
        let mut host = inventory.hosts.get(name).await.unwrap();
        host.administrative_state = AdministrativeState::Unlocked;
        host.operational_state = OperationalState::Enabled;
        inventory.hosts.upsert(host).await;
        controller.handle_event(Event::HostAudit, t0).await;
        // system-stabilize completes on its own timeout.
        controller.tick(t0 + Duration::from_secs(defaults.system_stabilize_secs + 1)).await;
    }

    assert_eq!(controller.strategy.status, StrategyStatus::Applied);
}

/// Scenario 1: the literal fleet (`ctrl-0`, `ctrl-1`, `w-0`, `w-1`,
/// controller and worker both serial) produces exactly one alarm-gate
/// pair bracketing the whole strategy — not one pair per personality
/// wave — per spec.md:181's expected stage sequence: `query-alarms ->
/// query-sw-patches -> query-sw-patch-hosts -> [...per-host...] ->
/// final query-alarms`.
#[tokio::test]
async fn sw_patch_brackets_whole_strategy_with_one_alarm_gate_pair() {
    let inventory = Inventory::default();
    for name in ["ctrl-0", "ctrl-1"] {
        inventory.hosts.upsert(controller_host(name)).await;
    }
    for name in ["w-0", "w-1"] {
        inventory.hosts.upsert(worker(name)).await;
    }
    let fleet = Fleet::snapshot(&inventory).await;
    let defaults = StepDefaults::default();
    let knobs = fleet_update_orchestrator::config::StrategyKnobs {
        controller_apply_type: ApplyType::Serial,
        storage_apply_type: ApplyType::Ignore,
        worker_apply_type: ApplyType::Serial,
        max_parallel_worker_hosts: 2,
        instance_action: InstanceAction::StopStart,
        alarm_restrictions: AlarmRestrictions::Strict,
        to_version: None,
        force: false,
    };

    let stages = fleet_update_orchestrator::builders::sw_patch::build(&fleet, &knobs, &defaults);

    let alarm_gate_stages = stages
        .iter()
        .filter(|s| s.steps.iter().any(|step| step.kind() == "query-alarms"))
        .count();
    assert_eq!(alarm_gate_stages, 2, "expected exactly one opening and one closing alarm gate");

    // prelude (query-sw-patches, query-sw-patch-hosts) + alarm-gate-open
    // + 2 controller-wave stages + alarm-gate-close = 5; storage is
    // `Ignore` and contributes no stages.
    assert_eq!(stages.len(), 1 + 1 + 2 + 2 + 1);
    assert_eq!(stages[0].name, "prelude");
    assert!(stages[1].steps.iter().any(|s| s.kind() == "query-alarms"));
    assert!(stages.last().unwrap().steps.iter().any(|s| s.kind() == "query-alarms"));
}

/// Scenario 4: kubelet upgrade across two workers. The driver only
/// reports `w-0`'s kubelet version matching `to_version` at the audit
/// 70s in; `w-1` doesn't catch up until 200s in. The step must not
/// succeed until an audit sees both hosts caught up at once.
#[tokio::test]
async fn kube_host_upgrade_kubelet_waits_for_both_hosts() {
    use fleet_update_orchestrator::driver::KubeHostUpgrade;

    let driver = Arc::new(FakeDriver::new());
    let inventory = Inventory::default();

    let mut record = fleet_update_orchestrator::strategy::step::StepRecord {
        name: "kube-host-upgrade-kubelet".to_string(),
        fields: Default::default(),
    };
    record.set("entity_names", vec!["w-0".to_string(), "w-1".to_string()]);
    record.set("to_version", "1.2.3".to_string());
    record.set("first_poll_secs", 60u64);
    record.set("timeout", 900u64);
    let step = fleet_update_orchestrator::strategy::registry::deserialize_step(&record).unwrap();

    let stage = fleet_update_orchestrator::strategy::stage::Stage::new("kubelet", vec![step]);
    let strategy = Strategy::new(
        fleet_update_orchestrator::config::StrategyKind::KubeUpgrade,
        test_knobs(),
        vec![stage],
    );
    let mut controller = StrategyController::new(strategy, driver.clone(), inventory);

    let t0 = Instant::now();
    controller.apply(t0).await.unwrap();
    assert_eq!(driver.call_count("kube_upgrade_hosts_kubelet"), 1);

    // Too early: under first_poll_secs, no poll is even issued.
    controller.handle_event(Event::HostAudit, t0 + Duration::from_secs(10)).await;
    assert_eq!(driver.call_count("get_kube_host_upgrade_list"), 0);
    assert!(matches!(controller.strategy.status, StrategyStatus::Applying));

    // 70s in: only w-0 has caught up.
    driver.set_kube_host_upgrade_list(vec![
        KubeHostUpgrade {
            host_uuid: Uuid::new_v4(),
            host_name: "w-0".to_string(),
            control_plane_state: "upgraded".to_string(),
            kubelet_version: Some("1.2.3".to_string()),
        },
        KubeHostUpgrade {
            host_uuid: Uuid::new_v4(),
            host_name: "w-1".to_string(),
            control_plane_state: "upgraded".to_string(),
            kubelet_version: Some("1.2.2".to_string()),
        },
    ]);
    controller.handle_event(Event::HostAudit, t0 + Duration::from_secs(70)).await;
    assert!(matches!(controller.strategy.status, StrategyStatus::Applying));

    // 200s in: both hosts now report the target version.
    driver.set_kube_host_upgrade_list(vec![
        KubeHostUpgrade {
            host_uuid: Uuid::new_v4(),
            host_name: "w-0".to_string(),
            control_plane_state: "upgraded".to_string(),
            kubelet_version: Some("1.2.3".to_string()),
        },
        KubeHostUpgrade {
            host_uuid: Uuid::new_v4(),
            host_name: "w-1".to_string(),
            control_plane_state: "upgraded".to_string(),
            kubelet_version: Some("1.2.3".to_string()),
        },
    ]);
    controller.handle_event(Event::HostAudit, t0 + Duration::from_secs(200)).await;
    assert_eq!(controller.strategy.status, StrategyStatus::Applied);
}

/// Scenario 5: firmware update with an abort. `w-0` completes, `w-1`
/// fails; aborting the failed strategy must compensate only the host
/// that didn't finish successfully.
#[tokio::test]
async fn fw_update_abort_only_compensates_unfinished_host() {
    let driver = Arc::new(FakeDriver::new());
    let inventory = Inventory::default();
    for name in ["w-0", "w-1"] {
        inventory.hosts.upsert(worker(name)).await;
    }

    let mut record = fleet_update_orchestrator::strategy::step::StepRecord {
        name: "fw-update-hosts".to_string(),
        fields: Default::default(),
    };
    record.set("entity_names", vec!["w-0".to_string(), "w-1".to_string()]);
    record.set("poll_secs", 60u64);
    record.set("timeout", 3600u64);
    let step = fleet_update_orchestrator::strategy::registry::deserialize_step(&record).unwrap();

    let stage = fleet_update_orchestrator::strategy::stage::Stage::new("fw-update", vec![step]);
    let strategy = Strategy::new(
        fleet_update_orchestrator::config::StrategyKind::FwUpdate,
        test_knobs(),
        vec![stage],
    );
    // Stands in for `query-fw-update-host` having already found both
    // hosts pending; `fw-update-hosts` narrows its group against this.
    strategy.workspace.write().await.fw_update_hosts = vec!["w-0".to_string(), "w-1".to_string()];
    let mut controller = StrategyController::new(strategy, driver.clone(), inventory.clone());

    let t0 = Instant::now();
    controller.apply(t0).await.unwrap();
    assert_eq!(driver.call_count("fw_update_hosts"), 1);

    let audit_time = t0 + Duration::from_secs(61);
    let mut w0 = inventory.hosts.get("w-0").await.unwrap();
    w0.device_image_update = DeviceImageUpdate::Completed;
    inventory.hosts.upsert(w0).await;
    let mut w1 = inventory.hosts.get("w-1").await.unwrap();
    w1.device_image_update = DeviceImageUpdate::Failed;
    inventory.hosts.upsert(w1).await;
    controller.handle_event(Event::HostAudit, audit_time).await;

    // The firmware failure on w-1 fails the step (and the strategy)
    // outright; an operator then aborts to compensate the host that
    // never finished successfully. w-0 already completed and needs no
    // compensation.
    assert!(matches!(controller.strategy.status, StrategyStatus::Failed));
    controller.abort(None, audit_time).await.unwrap();
    assert!(matches!(controller.strategy.status, StrategyStatus::Aborting));
    // `abort` drives synchronously: the compensation step's own
    // `apply` already issued the abort-hosts call against w-1 only.
    assert_eq!(driver.call_count("fw_update_abort_hosts"), 1);

    controller.handle_event(Event::HostAudit, audit_time).await;
    assert_eq!(controller.strategy.status, StrategyStatus::Aborted);
}

fn test_knobs() -> fleet_update_orchestrator::config::StrategyKnobs {
    fleet_update_orchestrator::config::StrategyKnobs {
        controller_apply_type: ApplyType::Ignore,
        storage_apply_type: ApplyType::Ignore,
        worker_apply_type: ApplyType::Serial,
        max_parallel_worker_hosts: 2,
        instance_action: InstanceAction::StopStart,
        alarm_restrictions: AlarmRestrictions::Strict,
        to_version: None,
        force: false,
    }
}
