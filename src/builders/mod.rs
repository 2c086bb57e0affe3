//! Strategy Builders: pure functions `(fleet, knobs) -> stages[]`
//! (§4.3). One module per strategy kind; this module holds the shared
//! wave-construction machinery every builder composes.

pub mod fw_update;
pub mod kube_rootca_update;
pub mod kube_upgrade;
pub mod sw_patch;
pub mod sw_upgrade;

use crate::config::{AlarmRestrictions, ApplyType, InstanceAction, StepDefaults, StrategyKind, StrategyKnobs};
use crate::strategy::stage::Stage;
use crate::strategy::step::{Step, StepRecord};
use crate::steps::alarm_steps::{QueryAlarmsStep, SystemStabilizeStep, WaitAlarmsClearStep};
use crate::steps::host_steps::{LockHostsStep, UnlockHostsStep};
use crate::steps::instance_steps::{MigrateInstancesStep, StartInstancesStep, StopInstancesStep};
use crate::steps::service_steps::{DisableHostServicesStep, EnableHostServicesStep};
use crate::types::{Host, HostPersonality, Instance};
use uuid::Uuid;

/// A point-in-time snapshot of the fleet a Builder plans against.
pub struct Fleet {
    pub hosts: Vec<Host>,
    pub instances: Vec<Instance>,
}

impl Fleet {
    /// Snapshot the live inventory tables. Builders never read the
    /// tables directly — they plan against one frozen copy, so a
    /// strategy's stage layout can't shift mid-build as events land.
    pub async fn snapshot(inventory: &crate::inventory::Inventory) -> Self {
        Self {
            hosts: inventory.hosts.all().await,
            instances: inventory.instances.all().await,
        }
    }
}

/// Group a personality's hosts into per-stage batches per apply-type.
/// Empty for `ignore`; one host per group for `serial`; batches no
/// larger than `max_parallel` for `parallel`.
pub fn host_groups(
    hosts: &[Host],
    personality: HostPersonality,
    apply_type: ApplyType,
    max_parallel: usize,
) -> Vec<Vec<String>> {
    let mut names: Vec<String> = hosts
        .iter()
        .filter(|h| h.personality == personality)
        .map(|h| h.name.clone())
        .collect();
    names.sort();
    match apply_type {
        ApplyType::Ignore => Vec::new(),
        ApplyType::Serial => names.into_iter().map(|n| vec![n]).collect(),
        ApplyType::Parallel => names.chunks(max_parallel.max(1)).map(<[String]>::to_vec).collect(),
    }
}

pub fn query_alarms(fail_on_alarms: bool, restrictions: AlarmRestrictions) -> Box<dyn Step> {
    let mut r = StepRecord {
        name: "query-alarms".to_string(),
        fields: Default::default(),
    };
    r.set("timeout", 60u64);
    r.set("fail_on_alarms", fail_on_alarms);
    r.set("alarm_restrictions", restrictions);
    r.set("ignore_list", Vec::<String>::new());
    Box::new(QueryAlarmsStep::from_record(&r))
}

pub fn system_stabilize(defaults: &StepDefaults) -> Box<dyn Step> {
    Box::new(SystemStabilizeStep::new(defaults.system_stabilize_secs))
}

pub fn wait_alarms_clear(restrictions: AlarmRestrictions, defaults: &StepDefaults) -> Box<dyn Step> {
    let mut r = StepRecord {
        name: "wait-alarms-clear".to_string(),
        fields: Default::default(),
    };
    r.set("first_query_delay_secs", defaults.wait_alarms_clear_first_query_delay_secs);
    r.set("timeout", defaults.wait_alarms_clear_timeout_secs);
    r.set("alarm_restrictions", restrictions);
    r.set("ignore_list", Vec::<String>::new());
    Box::new(WaitAlarmsClearStep::from_record(&r))
}

pub fn lock_hosts(hosts: &[String], wait_until_disabled: bool, defaults: &StepDefaults) -> Box<dyn Step> {
    Box::new(LockHostsStep::new(hosts.to_vec(), wait_until_disabled, 300))
}

pub fn unlock_hosts(hosts: &[String], defaults: &StepDefaults) -> Box<dyn Step> {
    Box::new(UnlockHostsStep::new(
        hosts.to_vec(),
        defaults.unlock_max_retries,
        defaults.unlock_retry_delay_secs,
        600,
    ))
}

pub fn disable_host_services(hosts: &[String], service: &str) -> Box<dyn Step> {
    Box::new(DisableHostServicesStep::new(hosts.to_vec(), service.to_string(), 300))
}

pub fn enable_host_services(hosts: &[String], service: &str) -> Box<dyn Step> {
    Box::new(EnableHostServicesStep::new(hosts.to_vec(), service.to_string(), 300))
}

fn instances_on<'a>(fleet: &'a Fleet, group: &[String]) -> Vec<&'a Instance> {
    fleet.instances.iter().filter(|i| group.contains(&i.host_name)).collect()
}

fn instance_step(kind: &str, instances: &[&Instance], timeout: u64) -> Box<dyn Step> {
    let uuids: Vec<Uuid> = instances.iter().map(|i| i.uuid).collect();
    let hosts: Vec<String> = instances.iter().map(|i| i.host_name.clone()).collect();
    let mut r = StepRecord {
        name: kind.to_string(),
        fields: Default::default(),
    };
    r.set("entity_uuids", uuids);
    r.set("captured_host_names", hosts);
    r.set("timeout", timeout);
    match kind {
        "migrate-instances" => Box::new(MigrateInstancesStep::from_record(&r)),
        "stop-instances" => Box::new(StopInstancesStep::from_record(&r)),
        "start-instances" => Box::new(StartInstancesStep::from_record(&r)),
        _ => unreachable!("unknown instance step kind {kind}"),
    }
}

/// Shape of one personality wave, shared by every strategy kind.
pub struct WaveConfig {
    pub personality: HostPersonality,
    pub apply_type: ApplyType,
    pub max_parallel: usize,
    /// `None` for controller/storage waves, which carry no guest
    /// workloads to evacuate.
    pub instance_action: Option<InstanceAction>,
    pub alarm_restrictions: AlarmRestrictions,
}

/// Build one personality's wave: one stage per host group
/// (disable-services/evacuate, lock, `work`, unlock, re-instate/restart,
/// stabilize, wait-alarms-clear). `work` turns a host group into the
/// kind-specific step or steps that actually do the update (§4.3).
///
/// Carries no alarm gate of its own — a strategy that runs several
/// waves back to back (e.g. controller then storage then worker) gates
/// once around the whole sequence, not once per wave (spec.md:97,
/// spec.md:181). Callers with a single wave still need
/// [`gate_with_alarms`] around the result; callers chaining waves wrap
/// the concatenation once.
pub fn build_wave(
    fleet: &Fleet,
    cfg: &WaveConfig,
    defaults: &StepDefaults,
    work: impl Fn(&[String]) -> Vec<Box<dyn Step>>,
) -> Vec<Stage> {
    let groups = host_groups(&fleet.hosts, cfg.personality, cfg.apply_type, cfg.max_parallel);
    if groups.is_empty() {
        return Vec::new();
    }
    let mut stages = Vec::new();
    for group in &groups {
        let mut steps: Vec<Box<dyn Step>> = Vec::new();
        match cfg.instance_action {
            Some(InstanceAction::Migrate) => {
                steps.push(disable_host_services(group, "compute"));
                steps.push(instance_step(
                    "migrate-instances",
                    &instances_on(fleet, group),
                    defaults.upgrade_hosts_wait_secs.max(300),
                ));
                steps.push(lock_hosts(group, true, defaults));
            }
            Some(InstanceAction::StopStart) => {
                steps.push(disable_host_services(group, "compute"));
                steps.push(instance_step(
                    "stop-instances",
                    &instances_on(fleet, group),
                    defaults.upgrade_hosts_wait_secs.max(300),
                ));
                steps.push(lock_hosts(group, true, defaults));
            }
            None => steps.push(lock_hosts(group, false, defaults)),
        }
        steps.extend(work(group));
        steps.push(unlock_hosts(group, defaults));
        if matches!(cfg.instance_action, Some(InstanceAction::Migrate | InstanceAction::StopStart)) {
            steps.push(enable_host_services(group, "compute"));
        }
        if matches!(cfg.instance_action, Some(InstanceAction::StopStart)) {
            steps.push(instance_step(
                "start-instances",
                &instances_on(fleet, group),
                defaults.upgrade_hosts_wait_secs.max(300),
            ));
        }
        steps.push(system_stabilize(defaults));
        steps.push(wait_alarms_clear(cfg.alarm_restrictions, defaults));
        stages.push(Stage::new(format!("{}-wave", cfg.personality), steps));
    }
    stages
}

/// Bracket a sequence of wave stages with one opening and one closing
/// `query-alarms` gate, so a multi-personality strategy (controller,
/// storage, worker waves run back to back) gates exactly twice overall
/// instead of once per personality (spec.md:97, spec.md:181).
pub fn gate_with_alarms(alarm_restrictions: AlarmRestrictions, waves: Vec<Stage>) -> Vec<Stage> {
    if waves.is_empty() {
        return waves;
    }
    let mut stages = vec![Stage::new("alarm-gate-open", vec![query_alarms(true, alarm_restrictions)])];
    stages.extend(waves);
    stages.push(Stage::new("alarm-gate-close", vec![query_alarms(true, alarm_restrictions)]));
    stages
}

/// Dispatch to the builder matching `kind` (§4.3). The only function
/// any caller outside this module needs.
pub fn build_strategy(
    kind: StrategyKind,
    fleet: &Fleet,
    knobs: &StrategyKnobs,
    defaults: &StepDefaults,
) -> Vec<Stage> {
    match kind {
        StrategyKind::SwPatch => sw_patch::build(fleet, knobs, defaults),
        StrategyKind::SwUpgrade => sw_upgrade::build(fleet, knobs, defaults),
        StrategyKind::FwUpdate => fw_update::build(fleet, knobs, defaults),
        StrategyKind::KubeUpgrade => kube_upgrade::build(fleet, knobs, defaults),
        StrategyKind::KubeRootcaUpdate => kube_rootca_update::build(fleet, knobs, defaults),
    }
}
