//! `fw-update` builder (§4.3): per-host firmware image staging check
//! followed by worker-wave apply; controllers/storage are never
//! targets since device images only attach to worker hosts in this
//! fleet model. `fw-update-hosts` is handed the whole wave group, but
//! narrows itself at apply time to the hosts `query-fw-update-host`
//! actually found pending (`Workspace::fw_update_hosts`) — a group can
//! include hosts with nothing staged.

use super::{build_wave, gate_with_alarms, Fleet, WaveConfig};
use crate::config::StepDefaults;
use crate::strategy::stage::Stage;
use crate::strategy::step::{Step, StepRecord};
use crate::steps::fw_steps::{FwUpdateHostsStep, QueryFwUpdateHostStep};
use crate::types::HostPersonality;
use crate::config::StrategyKnobs;

fn fw_update_hosts(group: &[String], defaults: &StepDefaults) -> Vec<Box<dyn Step>> {
    vec![Box::new(FwUpdateHostsStep::new(
        group.to_vec(),
        defaults.fw_update_poll_secs,
        defaults.fw_update_timeout_secs,
    ))]
}

pub fn build(fleet: &Fleet, knobs: &StrategyKnobs, defaults: &StepDefaults) -> Vec<Stage> {
    let mut query_steps: Vec<Box<dyn Step>> = fleet
        .hosts
        .iter()
        .filter(|h| h.personality == HostPersonality::Worker)
        .map(|h| {
            let mut r = StepRecord {
                name: "query-fw-update-host".to_string(),
                fields: Default::default(),
            };
            r.set("entity_names", vec![h.name.clone()]);
            Box::new(QueryFwUpdateHostStep::from_record(&r)) as Box<dyn Step>
        })
        .collect();
    query_steps.sort_by_key(|s| s.entity_names());
    let mut stages = vec![Stage::new("prelude", query_steps)];

    let cfg = WaveConfig {
        personality: HostPersonality::Worker,
        apply_type: knobs.worker_apply_type,
        max_parallel: knobs.max_parallel_worker_hosts,
        instance_action: Some(knobs.instance_action),
        alarm_restrictions: knobs.alarm_restrictions,
    };
    let waves = build_wave(fleet, &cfg, defaults, |group| fw_update_hosts(group, defaults));
    stages.extend(gate_with_alarms(knobs.alarm_restrictions, waves));
    stages
}
