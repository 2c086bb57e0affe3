//! `kube-upgrade` builder (§4.3). Unlike host-director strategies,
//! control-plane and kubelet upgrades happen in place — neither phase
//! locks the host, so this builder doesn't route through `build_wave`.

use super::{host_groups, Fleet};
use crate::config::StepDefaults;
use crate::strategy::stage::Stage;
use crate::strategy::step::{Step, StepRecord};
use crate::steps::kube_steps::{
    KubeHostUpgradeControlPlaneStep, KubeHostUpgradeKubeletStep, KubeUpgradeCleanupStep,
    KubeUpgradeCompleteStep, KubeUpgradeDownloadImagesStep, KubeUpgradeNetworkingStep, KubeUpgradeStartStep,
    QueryKubeVersionsStep,
};
use crate::types::HostPersonality;
use crate::config::StrategyKnobs;

fn control_plane_step(host: &str, force: bool, timeout: u64) -> Box<dyn Step> {
    let mut r = StepRecord {
        name: "kube-host-upgrade-control-plane".to_string(),
        fields: Default::default(),
    };
    r.set("entity_names", vec![host.to_string()]);
    r.set("force", force);
    r.set("timeout", timeout);
    Box::new(KubeHostUpgradeControlPlaneStep::from_record(&r))
}

fn kubelet_step(group: &[String], to_version: &str, knobs: &StrategyKnobs, defaults: &StepDefaults) -> Box<dyn Step> {
    let mut r = StepRecord {
        name: "kube-host-upgrade-kubelet".to_string(),
        fields: Default::default(),
    };
    r.set("entity_names", group.to_vec());
    r.set("force", knobs.force);
    r.set("to_version", to_version.to_string());
    r.set("first_poll_secs", defaults.kube_host_upgrade_kubelet_first_poll_secs);
    Box::new(KubeHostUpgradeKubeletStep::from_record(&r))
}

pub fn build(fleet: &Fleet, knobs: &StrategyKnobs, defaults: &StepDefaults) -> Vec<Stage> {
    let to_version = knobs.to_version.clone().unwrap_or_default();

    let mut stages = vec![Stage::new(
        "prelude",
        vec![
            Box::new(QueryKubeVersionsStep::from_record(&StepRecord {
                name: "query-kube-versions".to_string(),
                fields: Default::default(),
            })) as Box<dyn Step>,
            Box::new(KubeUpgradeStartStep::from_record(&{
                let mut r = StepRecord {
                    name: "kube-upgrade-start".to_string(),
                    fields: Default::default(),
                };
                r.set("to_version", to_version.clone());
                r.set("force", knobs.force);
                r.set("poll_secs", defaults.kube_upgrade_poll_secs);
                r
            })),
            Box::new(KubeUpgradeDownloadImagesStep::from_record(&StepRecord {
                name: "kube-upgrade-download-images".to_string(),
                fields: Default::default(),
            })),
            Box::new(KubeUpgradeNetworkingStep::from_record(&StepRecord {
                name: "kube-upgrade-networking".to_string(),
                fields: Default::default(),
            })),
        ],
    )];

    let controllers = host_groups(&fleet.hosts, HostPersonality::Controller, knobs.controller_apply_type, 1);
    for group in controllers {
        let steps: Vec<Box<dyn Step>> = group
            .iter()
            .map(|h| control_plane_step(h, knobs.force, 600))
            .collect();
        stages.push(Stage::new("control-plane-upgrade", steps));
    }

    for (personality, apply_type) in [
        (HostPersonality::Controller, knobs.controller_apply_type),
        (HostPersonality::Storage, knobs.storage_apply_type),
        (HostPersonality::Worker, knobs.worker_apply_type),
    ] {
        let groups = host_groups(&fleet.hosts, personality, apply_type, knobs.max_parallel_worker_hosts);
        for group in groups {
            stages.push(Stage::new(
                "kubelet-upgrade",
                vec![kubelet_step(&group, &to_version, knobs, defaults)],
            ));
        }
    }

    stages.push(Stage::new(
        "finish",
        vec![
            Box::new(KubeUpgradeCompleteStep::from_record(&{
                let mut r = StepRecord {
                    name: "kube-upgrade-complete".to_string(),
                    fields: Default::default(),
                };
                r.set("poll_secs", defaults.kube_upgrade_poll_secs);
                r.set("timeout", 1800u64);
                r
            })) as Box<dyn Step>,
            Box::new(KubeUpgradeCleanupStep::from_record(&StepRecord {
                name: "kube-upgrade-cleanup".to_string(),
                fields: Default::default(),
            })),
        ],
    ));
    stages
}
