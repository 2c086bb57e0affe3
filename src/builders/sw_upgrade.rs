//! `sw-upgrade` builder (§4.3). Open question (spec §9): whether the
//! plan itself issues `upgrade_start` or expects it already in
//! progress — resolved here as "issues it", so a freshly-created
//! strategy is self-contained and `apply` alone takes the platform
//! from pre-upgrade to post-upgrade.

use super::{build_wave, gate_with_alarms, Fleet, WaveConfig};
use crate::config::StepDefaults;
use crate::strategy::stage::Stage;
use crate::strategy::step::Step;
use crate::steps::host_steps::{SwactHostsStep, UpgradeHostsStep};
use crate::steps::upgrade_steps::{ActivateUpgradeStep, CompleteUpgradeStep, StartUpgradeStep};
use crate::types::HostPersonality;
use crate::config::StrategyKnobs;

fn upgrade_hosts(group: &[String], to_release: &str, wait_secs: u64) -> Box<dyn Step> {
    Box::new(UpgradeHostsStep::new(group.to_vec(), to_release.to_string(), wait_secs, 1800))
}

pub fn build(fleet: &Fleet, knobs: &StrategyKnobs, defaults: &StepDefaults) -> Vec<Stage> {
    let to_release = knobs.to_version.clone().unwrap_or_default();
    let mut stages = vec![Stage::new(
        "prelude",
        vec![Box::new(StartUpgradeStep::new(
            defaults.upgrade_object_poll_secs,
            1800,
        )) as Box<dyn Step>],
    )];

    let mut waves = Vec::new();
    for (personality, apply_type) in [
        (HostPersonality::Controller, knobs.controller_apply_type),
        (HostPersonality::Storage, knobs.storage_apply_type),
        (HostPersonality::Worker, knobs.worker_apply_type),
    ] {
        let cfg = WaveConfig {
            personality,
            apply_type,
            max_parallel: knobs.max_parallel_worker_hosts,
            instance_action: (personality == HostPersonality::Worker).then_some(knobs.instance_action),
            alarm_restrictions: knobs.alarm_restrictions,
        };
        let rel = to_release.clone();
        let wait_secs = defaults.upgrade_hosts_wait_secs;
        waves.extend(build_wave(fleet, &cfg, defaults, move |group: &[String]| {
            let mut work: Vec<Box<dyn Step>> = Vec::new();
            if personality == HostPersonality::Controller && group.len() > 1 {
                work.push(Box::new(SwactHostsStep::new(group.to_vec(), defaults.swact_wait_secs, 600)));
            }
            work.push(upgrade_hosts(group, &rel, wait_secs));
            work
        }));
    }
    stages.extend(gate_with_alarms(knobs.alarm_restrictions, waves));

    stages.push(Stage::new(
        "finish",
        vec![
            Box::new(ActivateUpgradeStep::new(defaults.upgrade_object_poll_secs, 1800)) as Box<dyn Step>,
            Box::new(CompleteUpgradeStep::new(defaults.upgrade_object_poll_secs, 600)),
        ],
    ));
    stages
}
