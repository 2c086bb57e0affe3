//! `kube-rootca-update` builder (§4.3).
//!
//! Rotating the cluster root CA only touches the control plane — no
//! driver surface exists in this crate for a dedicated
//! `kube-rootca-update-hosts` director call, so the nearest available
//! primitive stands in: a controller-only `reboot-hosts` wave, serial
//! regardless of knob (an open CA trust bundle can only ever be
//! reloaded one controller at a time), bracketed by alarm gates.
//! Storage and worker hosts never touch the control plane and are not
//! targeted.

use super::{build_wave, gate_with_alarms, Fleet, WaveConfig};
use crate::config::{ApplyType, StepDefaults};
use crate::strategy::stage::Stage;
use crate::strategy::step::Step;
use crate::steps::host_steps::RebootHostsStep;
use crate::types::HostPersonality;
use crate::config::StrategyKnobs;

pub fn build(fleet: &Fleet, knobs: &StrategyKnobs, defaults: &StepDefaults) -> Vec<Stage> {
    let cfg = WaveConfig {
        personality: HostPersonality::Controller,
        apply_type: ApplyType::Serial,
        max_parallel: 1,
        instance_action: None,
        alarm_restrictions: knobs.alarm_restrictions,
    };
    let waves = build_wave(fleet, &cfg, defaults, |group| {
        vec![Box::new(RebootHostsStep::new(group.to_vec(), defaults.reboot_wait_secs, 600)) as Box<dyn Step>]
    });
    gate_with_alarms(knobs.alarm_restrictions, waves)
}
