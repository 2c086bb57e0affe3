//! `sw-patch` builder (§4.3): evacuate/lock/patch/unlock each
//! personality wave in turn, gated by alarms on both sides.

use super::{build_wave, gate_with_alarms, Fleet, WaveConfig};
use crate::config::StepDefaults;
use crate::strategy::stage::Stage;
use crate::strategy::step::{Step, StepRecord};
use crate::steps::patch_steps::{QuerySwPatchHostsStep, QuerySwPatchesStep, SwPatchHostsStep};
use crate::types::HostPersonality;
use crate::config::StrategyKnobs;

fn patch_hosts(group: &[String]) -> Vec<Box<dyn Step>> {
    let mut r = StepRecord {
        name: "sw-patch-hosts".to_string(),
        fields: Default::default(),
    };
    r.set("entity_names", group.to_vec());
    vec![Box::new(SwPatchHostsStep::from_record(&r))]
}

pub fn build(fleet: &Fleet, knobs: &StrategyKnobs, defaults: &StepDefaults) -> Vec<Stage> {
    let mut stages = vec![Stage::new(
        "prelude",
        vec![
            Box::new(QuerySwPatchesStep::from_record(&StepRecord {
                name: "query-sw-patches".to_string(),
                fields: Default::default(),
            })) as Box<dyn Step>,
            Box::new(QuerySwPatchHostsStep::from_record(&StepRecord {
                name: "query-sw-patch-hosts".to_string(),
                fields: Default::default(),
            })),
        ],
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
        waves.extend(build_wave(fleet, &cfg, defaults, patch_hosts));
    }
    stages.extend(gate_with_alarms(knobs.alarm_restrictions, waves));
    stages
}
