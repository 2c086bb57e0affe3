//! Platform Driver: the abstract async façade to the host, alarm, patch,
//! upgrade, firmware, and Kubernetes backends (§4.5).
//!
//! This module specifies the *interface* only — no backend is
//! implemented here. `fake` provides a scriptable test double that
//! stands in for those out-of-scope backends.

pub mod fake;

use crate::error::Result;
use crate::types::{Alarm, Host};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The uniform envelope every driver call resolves with: `{completed,
/// reason, result-data}` (§4.5).
#[derive(Debug, Clone)]
pub struct DriverCompletion<T> {
    pub completed: bool,
    pub reason: String,
    pub result_data: T,
}

impl<T> DriverCompletion<T> {
    pub fn ok(result_data: T) -> Self {
        Self {
            completed: true,
            reason: String::new(),
            result_data,
        }
    }
}

/// State of a fire-and-poll host/instance-director verb. The driver
/// returns this immediately on submission; the actual state change
/// arrives later as a targeted event (`HOST_UNLOCK_FAILED`, ...) or is
/// observed through inventory polling.
#[derive(Debug, Clone)]
pub enum Operation {
    InProgress,
    Failed { reason: String },
    Accepted,
}

impl Operation {
    pub fn is_inprogress(&self) -> bool {
        matches!(self, Operation::InProgress)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Operation::Failed { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            Operation::Failed { reason } => reason,
            _ => "",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwPatch {
    pub name: String,
    pub repo_state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwPatchHostStatus {
    pub host_name: String,
    pub patch_current: bool,
    pub patch_failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeState {
    Started,
    ActivationComplete,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeRecord {
    pub state: UpgradeState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KubeUpgradeState {
    Started,
    DownloadedImages,
    UpgradedNetworking,
    Complete,
    DownloadingImagesFailed,
    UpgradingNetworkingFailed,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeUpgradeRecord {
    pub state: KubeUpgradeState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeHostUpgrade {
    pub host_uuid: Uuid,
    pub host_name: String,
    pub control_plane_state: String,
    pub kubelet_version: Option<String>,
}

/// Abstract async façade to the platform backends. All methods are
/// non-blocking from the controller's point of view: they either
/// resolve quickly with an `Operation` describing submission status, or
/// await the backend's response and resolve with a `DriverCompletion`.
/// Either way, a step that calls one of these spawns the await rather
/// than blocking its own `apply`/`handle_event` (§5).
#[async_trait]
pub trait PlatformDriver: Send + Sync {
    async fn get_host(&self, uuid: Uuid, name: &str) -> Result<DriverCompletion<Host>>;
    async fn get_alarms(&self) -> Result<DriverCompletion<Vec<Alarm>>>;
    async fn get_openstack_alarms(&self) -> Result<DriverCompletion<Vec<Alarm>>>;
    async fn get_upgrade(&self) -> Result<DriverCompletion<Option<UpgradeRecord>>>;
    async fn get_kube_upgrade(&self) -> Result<DriverCompletion<Option<KubeUpgradeRecord>>>;
    async fn get_kube_host_upgrade_list(&self) -> Result<DriverCompletion<Vec<KubeHostUpgrade>>>;
    async fn get_kube_version_list(&self) -> Result<DriverCompletion<Vec<String>>>;

    async fn sw_mgmt_query_updates(&self) -> Result<DriverCompletion<Vec<SwPatch>>>;
    async fn sw_mgmt_query_hosts(&self) -> Result<DriverCompletion<Vec<SwPatchHostStatus>>>;
    async fn sw_mgmt_apply_updates(&self, names: &[String]) -> Result<DriverCompletion<()>>;
    async fn sw_mgmt_update_hosts(&self, hosts: &[String]) -> Result<DriverCompletion<()>>;

    async fn upgrade_start(&self) -> Result<DriverCompletion<()>>;
    async fn upgrade_activate(&self) -> Result<DriverCompletion<()>>;
    async fn upgrade_complete(&self) -> Result<DriverCompletion<()>>;

    async fn kube_upgrade_start(
        &self,
        to_version: &str,
        force: bool,
        alarm_ignore_list: &[String],
    ) -> Result<DriverCompletion<()>>;
    async fn kube_upgrade_download_images(&self) -> Result<DriverCompletion<()>>;
    async fn kube_upgrade_networking(&self) -> Result<DriverCompletion<()>>;
    async fn kube_upgrade_complete(&self) -> Result<DriverCompletion<()>>;
    async fn kube_upgrade_cleanup(&self) -> Result<DriverCompletion<()>>;

    // Host-director verbs.
    async fn lock_hosts(&self, hosts: &[String]) -> Result<Operation>;
    async fn unlock_hosts(&self, hosts: &[String]) -> Result<Operation>;
    async fn reboot_hosts(&self, hosts: &[String]) -> Result<Operation>;
    async fn swact_hosts(&self, hosts: &[String]) -> Result<Operation>;
    async fn upgrade_hosts(&self, hosts: &[String]) -> Result<Operation>;
    async fn fw_update_hosts(&self, hosts: &[String]) -> Result<Operation>;
    async fn fw_update_abort_hosts(&self, hosts: &[String]) -> Result<Operation>;
    async fn disable_host_services(&self, hosts: &[String], service: &str) -> Result<Operation>;
    async fn enable_host_services(&self, hosts: &[String], service: &str) -> Result<Operation>;
    async fn kube_upgrade_hosts_control_plane(
        &self,
        hosts: &[String],
        force: bool,
    ) -> Result<Operation>;
    async fn kube_upgrade_hosts_kubelet(&self, hosts: &[String], force: bool)
        -> Result<Operation>;

    // Instance-director verbs.
    async fn migrate_instances(&self, instance_uuids: &[Uuid]) -> Result<Operation>;
    async fn stop_instances(&self, instance_uuids: &[Uuid]) -> Result<Operation>;
    async fn start_instances(&self, instance_uuids: &[Uuid]) -> Result<Operation>;

    async fn apply_patches(&self, names: &[String]) -> Result<DriverCompletion<()>>;
}
