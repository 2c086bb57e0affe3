//! Static dispatch table from a persisted step's `name` back to a live
//! `Box<dyn Step>` (§6 "Persisted state": "the set of recognized names
//! is closed and enumerated").
//!
//! Replaces a dynamic `from_dict`-style lookup with a plain match: the
//! set of step kinds is fixed at compile time, so there is no runtime
//! registration step and no way to silently typo a kind name into
//! existence.

use super::step::{Step, StepRecord};
use crate::error::{Error, Result};
use crate::steps::*;

/// Rebuild a step from its persisted record. Entities referenced by
/// name/uuid are re-resolved against live inventory tables by the step
/// itself the first time it runs, never here.
pub fn deserialize_step(record: &StepRecord) -> Result<Box<dyn Step>> {
    let step: Box<dyn Step> = match record.name.as_str() {
        "system-stabilize" => Box::new(alarm_steps::SystemStabilizeStep::from_record(record)),
        "query-alarms" => Box::new(alarm_steps::QueryAlarmsStep::from_record(record)),
        "wait-data-sync" => Box::new(alarm_steps::WaitDataSyncStep::from_record(record)),
        "wait-alarms-clear" => Box::new(alarm_steps::WaitAlarmsClearStep::from_record(record)),

        "lock-hosts" => Box::new(host_steps::LockHostsStep::from_record(record)),
        "unlock-hosts" => Box::new(host_steps::UnlockHostsStep::from_record(record)),
        "reboot-hosts" => Box::new(host_steps::RebootHostsStep::from_record(record)),
        "swact-hosts" => Box::new(host_steps::SwactHostsStep::from_record(record)),
        "upgrade-hosts" => Box::new(host_steps::UpgradeHostsStep::from_record(record)),

        "start-upgrade" => Box::new(upgrade_steps::StartUpgradeStep::from_record(record)),
        "activate-upgrade" => Box::new(upgrade_steps::ActivateUpgradeStep::from_record(record)),
        "complete-upgrade" => Box::new(upgrade_steps::CompleteUpgradeStep::from_record(record)),
        "query-upgrade" => Box::new(upgrade_steps::QueryUpgradeStep::from_record(record)),

        "migrate-instances" => Box::new(instance_steps::MigrateInstancesStep::from_record(record)),
        "stop-instances" => Box::new(instance_steps::StopInstancesStep::from_record(record)),
        "start-instances" => Box::new(instance_steps::StartInstancesStep::from_record(record)),

        "sw-patch-hosts" => Box::new(patch_steps::SwPatchHostsStep::from_record(record)),
        "query-sw-patches" => Box::new(patch_steps::QuerySwPatchesStep::from_record(record)),
        "query-sw-patch-hosts" => Box::new(patch_steps::QuerySwPatchHostsStep::from_record(record)),
        "apply-patches" => Box::new(patch_steps::ApplyPatchesStep::from_record(record)),

        "query-fw-update-host" => Box::new(fw_steps::QueryFwUpdateHostStep::from_record(record)),
        "fw-update-hosts" => Box::new(fw_steps::FwUpdateHostsStep::from_record(record)),
        "fw-update-abort-hosts" => Box::new(fw_steps::FwUpdateAbortHostsStep::from_record(record)),

        "disable-host-services" => Box::new(service_steps::DisableHostServicesStep::from_record(record)),
        "enable-host-services" => Box::new(service_steps::EnableHostServicesStep::from_record(record)),

        "kube-upgrade-start" => Box::new(kube_steps::KubeUpgradeStartStep::from_record(record)),
        "kube-upgrade-download-images" => {
            Box::new(kube_steps::KubeUpgradeDownloadImagesStep::from_record(record))
        }
        "kube-upgrade-networking" => Box::new(kube_steps::KubeUpgradeNetworkingStep::from_record(record)),
        "kube-upgrade-complete" => Box::new(kube_steps::KubeUpgradeCompleteStep::from_record(record)),
        "kube-upgrade-cleanup" => Box::new(kube_steps::KubeUpgradeCleanupStep::from_record(record)),
        "query-kube-upgrade" => Box::new(kube_steps::QueryKubeUpgradeStep::from_record(record)),
        "query-kube-host-upgrade" => Box::new(kube_steps::QueryKubeHostUpgradeStep::from_record(record)),
        "query-kube-versions" => Box::new(kube_steps::QueryKubeVersionsStep::from_record(record)),
        "kube-host-upgrade-control-plane" => {
            Box::new(kube_steps::KubeHostUpgradeControlPlaneStep::from_record(record))
        }
        "kube-host-upgrade-kubelet" => Box::new(kube_steps::KubeHostUpgradeKubeletStep::from_record(record)),

        other => return Err(Error::Persistence(format!("unrecognized step kind {other}"))),
    };
    Ok(step)
}
