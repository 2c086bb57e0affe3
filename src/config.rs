//! Strategy knobs and process configuration.
//!
//! Validation happens here, once, before a Builder ever runs: an invalid
//! knob is a synchronous `Error::Planning`/`Error::Config` at strategy
//! creation, never a panic and never a silently clamped value.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// How a host personality wave is traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplyType {
    Serial,
    Parallel,
    Ignore,
}

/// Disposition of guest workloads before a worker is locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceAction {
    Migrate,
    StopStart,
}

/// Whether non-management-affecting alarms gate progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmRestrictions {
    Strict,
    Relaxed,
}

/// Which update strategy kind is being planned/applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    SwPatch,
    SwUpgrade,
    FwUpdate,
    KubeUpgrade,
    KubeRootcaUpdate,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::SwPatch => "sw-patch",
            StrategyKind::SwUpgrade => "sw-upgrade",
            StrategyKind::FwUpdate => "fw-update",
            StrategyKind::KubeUpgrade => "kube-upgrade",
            StrategyKind::KubeRootcaUpdate => "kube-rootca-update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sw-patch" => Some(StrategyKind::SwPatch),
            "sw-upgrade" => Some(StrategyKind::SwUpgrade),
            "fw-update" => Some(StrategyKind::FwUpdate),
            "kube-upgrade" => Some(StrategyKind::KubeUpgrade),
            "kube-rootca-update" => Some(StrategyKind::KubeRootcaUpdate),
            _ => None,
        }
    }

    /// Inclusive bounds on `max_parallel_worker_hosts` for this kind (§6).
    pub fn max_parallel_worker_bounds(&self) -> (usize, usize) {
        match self {
            StrategyKind::SwPatch => (2, 100),
            StrategyKind::SwUpgrade => (2, 10),
            StrategyKind::FwUpdate | StrategyKind::KubeUpgrade => (2, 5),
            StrategyKind::KubeRootcaUpdate => (2, 5),
        }
    }
}

/// User-selected knobs for a strategy, validated against `Config` bounds
/// before a Builder runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyKnobs {
    pub controller_apply_type: ApplyType,
    pub storage_apply_type: ApplyType,
    pub worker_apply_type: ApplyType,
    pub max_parallel_worker_hosts: usize,
    pub instance_action: InstanceAction,
    pub alarm_restrictions: AlarmRestrictions,
    /// Required for `kube-upgrade`; ignored otherwise.
    pub to_version: Option<String>,
    pub force: bool,
}

impl StrategyKnobs {
    pub fn validate(&self, kind: StrategyKind) -> Result<()> {
        let (min, max) = kind.max_parallel_worker_bounds();
        if !(min..=max).contains(&self.max_parallel_worker_hosts) {
            return Err(Error::Config(format!(
                "max_parallel_worker_hosts {} out of range [{min}..{max}] for {}",
                self.max_parallel_worker_hosts,
                kind.as_str()
            )));
        }
        if matches!(kind, StrategyKind::KubeUpgrade) && self.to_version.is_none() {
            return Err(Error::Planning(
                "kube-upgrade strategy requires to_version".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-kind defaults and constants the Step Library and Builders pull
/// from instead of hard-coding, mirroring §4.2/§4.3 literal values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefaults {
    pub unlock_max_retries: u32,
    pub unlock_retry_delay_secs: u64,
    pub system_stabilize_secs: u64,
    pub reboot_wait_secs: u64,
    pub swact_wait_secs: u64,
    pub upgrade_hosts_wait_secs: u64,
    pub upgrade_object_poll_secs: u64,
    pub wait_alarms_clear_first_query_delay_secs: u64,
    pub wait_alarms_clear_timeout_secs: u64,
    pub wait_data_sync_timeout_secs: u64,
    pub fw_update_poll_secs: u64,
    pub fw_update_timeout_secs: u64,
    pub kube_upgrade_poll_secs: u64,
    pub kube_host_upgrade_kubelet_first_poll_secs: u64,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            unlock_max_retries: 5,
            unlock_retry_delay_secs: 120,
            system_stabilize_secs: 60,
            reboot_wait_secs: 60,
            swact_wait_secs: 120,
            upgrade_hosts_wait_secs: 120,
            upgrade_object_poll_secs: 60,
            wait_alarms_clear_first_query_delay_secs: 60,
            wait_alarms_clear_timeout_secs: 300,
            wait_data_sync_timeout_secs: 300,
            fw_update_poll_secs: 60,
            // Open question (spec §9): literal 3600s regardless of host
            // count, preserved rather than scaled to wave size.
            fw_update_timeout_secs: 3600,
            kube_upgrade_poll_secs: 60,
            kube_host_upgrade_kubelet_first_poll_secs: 60,
        }
    }
}

/// Top-level process configuration, loaded from TOML at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bind_address: String,
    pub storage_path: String,
    #[serde(default)]
    pub step_defaults: StepDefaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4545".to_string(),
            storage_path: "/var/lib/fleet-update-orchestrator".to_string(),
            step_defaults: StepDefaults::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(format!("invalid config: {e}")))
    }
}
