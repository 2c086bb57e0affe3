//! A scriptable `PlatformDriver` test double.
//!
//! Stands in for the out-of-scope platform backends (§1) so the Step
//! Library and Stage/Strategy Controller can be exercised without a
//! real fleet. Every response is programmed ahead of time; every call
//! is logged so tests can assert invocation counts (e.g. "exactly two
//! unlock invocations").

use super::{
    DriverCompletion, KubeHostUpgrade, KubeUpgradeRecord, Operation, SwPatch,
    SwPatchHostStatus, UpgradeRecord,
};
use crate::error::Result;
use crate::types::{Alarm, Host};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct FakeDriverState {
    hosts: HashMap<String, Host>,
    alarms: Vec<Alarm>,
    openstack_alarms: Vec<Alarm>,
    sw_patches: Vec<SwPatch>,
    sw_patch_hosts: Vec<SwPatchHostStatus>,
    upgrade: Option<UpgradeRecord>,
    kube_upgrade: Option<KubeUpgradeRecord>,
    kube_host_upgrade_list: Vec<KubeHostUpgrade>,
    kube_versions: Vec<String>,
    /// Per-verb scripted outcome; verbs default to `Operation::Accepted`
    /// when not overridden.
    operations: HashMap<String, Operation>,
    calls: Vec<String>,
}

/// A scriptable in-memory `PlatformDriver`.
pub struct FakeDriver {
    state: Mutex<FakeDriverState>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeDriverState::default()),
        }
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_host(&self, host: Host) {
        self.state.lock().unwrap().hosts.insert(host.name.clone(), host);
    }

    pub fn set_alarms(&self, alarms: Vec<Alarm>) {
        self.state.lock().unwrap().alarms = alarms;
    }

    pub fn set_sw_patch_hosts(&self, statuses: Vec<SwPatchHostStatus>) {
        self.state.lock().unwrap().sw_patch_hosts = statuses;
    }

    pub fn set_sw_patches(&self, patches: Vec<SwPatch>) {
        self.state.lock().unwrap().sw_patches = patches;
    }

    pub fn set_upgrade(&self, upgrade: Option<UpgradeRecord>) {
        self.state.lock().unwrap().upgrade = upgrade;
    }

    pub fn set_kube_upgrade(&self, upgrade: Option<KubeUpgradeRecord>) {
        self.state.lock().unwrap().kube_upgrade = upgrade;
    }

    pub fn set_kube_host_upgrade_list(&self, list: Vec<KubeHostUpgrade>) {
        self.state.lock().unwrap().kube_host_upgrade_list = list;
    }

    pub fn set_kube_versions(&self, versions: Vec<String>) {
        self.state.lock().unwrap().kube_versions = versions;
    }

    /// Script the `Operation` result returned the next time `verb` is
    /// invoked (and every time after, until overridden again).
    pub fn script_operation(&self, verb: &str, operation: Operation) {
        self.state
            .lock()
            .unwrap()
            .operations
            .insert(verb.to_string(), operation);
    }

    pub fn call_count(&self, verb: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == verb)
            .count()
    }

    fn record(&self, verb: &str) {
        self.state.lock().unwrap().calls.push(verb.to_string());
    }

    fn operation_for(&self, verb: &str) -> Operation {
        self.state
            .lock()
            .unwrap()
            .operations
            .get(verb)
            .cloned()
            .unwrap_or(Operation::Accepted)
    }
}

#[async_trait]
impl super::PlatformDriver for FakeDriver {
    async fn get_host(&self, _uuid: Uuid, name: &str) -> Result<DriverCompletion<Host>> {
        self.record("get_host");
        let state = self.state.lock().unwrap();
        match state.hosts.get(name) {
            Some(host) => Ok(DriverCompletion::ok(host.clone())),
            None => Ok(DriverCompletion {
                completed: false,
                reason: format!("unknown host {name}"),
                result_data: host_placeholder(name),
            }),
        }
    }

    async fn get_alarms(&self) -> Result<DriverCompletion<Vec<Alarm>>> {
        self.record("get_alarms");
        Ok(DriverCompletion::ok(self.state.lock().unwrap().alarms.clone()))
    }

    async fn get_openstack_alarms(&self) -> Result<DriverCompletion<Vec<Alarm>>> {
        self.record("get_openstack_alarms");
        Ok(DriverCompletion::ok(
            self.state.lock().unwrap().openstack_alarms.clone(),
        ))
    }

    async fn get_upgrade(&self) -> Result<DriverCompletion<Option<UpgradeRecord>>> {
        self.record("get_upgrade");
        Ok(DriverCompletion::ok(self.state.lock().unwrap().upgrade.clone()))
    }

    async fn get_kube_upgrade(&self) -> Result<DriverCompletion<Option<KubeUpgradeRecord>>> {
        self.record("get_kube_upgrade");
        Ok(DriverCompletion::ok(
            self.state.lock().unwrap().kube_upgrade.clone(),
        ))
    }

    async fn get_kube_host_upgrade_list(&self) -> Result<DriverCompletion<Vec<KubeHostUpgrade>>> {
        self.record("get_kube_host_upgrade_list");
        Ok(DriverCompletion::ok(
            self.state.lock().unwrap().kube_host_upgrade_list.clone(),
        ))
    }

    async fn get_kube_version_list(&self) -> Result<DriverCompletion<Vec<String>>> {
        self.record("get_kube_version_list");
        Ok(DriverCompletion::ok(
            self.state.lock().unwrap().kube_versions.clone(),
        ))
    }

    async fn sw_mgmt_query_updates(&self) -> Result<DriverCompletion<Vec<SwPatch>>> {
        self.record("sw_mgmt_query_updates");
        Ok(DriverCompletion::ok(self.state.lock().unwrap().sw_patches.clone()))
    }

    async fn sw_mgmt_query_hosts(&self) -> Result<DriverCompletion<Vec<SwPatchHostStatus>>> {
        self.record("sw_mgmt_query_hosts");
        Ok(DriverCompletion::ok(
            self.state.lock().unwrap().sw_patch_hosts.clone(),
        ))
    }

    async fn sw_mgmt_apply_updates(&self, _names: &[String]) -> Result<DriverCompletion<()>> {
        self.record("sw_mgmt_apply_updates");
        Ok(DriverCompletion::ok(()))
    }

    async fn sw_mgmt_update_hosts(&self, _hosts: &[String]) -> Result<DriverCompletion<()>> {
        self.record("sw_mgmt_update_hosts");
        Ok(DriverCompletion::ok(()))
    }

    async fn upgrade_start(&self) -> Result<DriverCompletion<()>> {
        self.record("upgrade_start");
        Ok(DriverCompletion::ok(()))
    }

    async fn upgrade_activate(&self) -> Result<DriverCompletion<()>> {
        self.record("upgrade_activate");
        Ok(DriverCompletion::ok(()))
    }

    async fn upgrade_complete(&self) -> Result<DriverCompletion<()>> {
        self.record("upgrade_complete");
        Ok(DriverCompletion::ok(()))
    }

    async fn kube_upgrade_start(
        &self,
        _to_version: &str,
        _force: bool,
        _alarm_ignore_list: &[String],
    ) -> Result<DriverCompletion<()>> {
        self.record("kube_upgrade_start");
        Ok(DriverCompletion::ok(()))
    }

    async fn kube_upgrade_download_images(&self) -> Result<DriverCompletion<()>> {
        self.record("kube_upgrade_download_images");
        Ok(DriverCompletion::ok(()))
    }

    async fn kube_upgrade_networking(&self) -> Result<DriverCompletion<()>> {
        self.record("kube_upgrade_networking");
        Ok(DriverCompletion::ok(()))
    }

    async fn kube_upgrade_complete(&self) -> Result<DriverCompletion<()>> {
        self.record("kube_upgrade_complete");
        Ok(DriverCompletion::ok(()))
    }

    async fn kube_upgrade_cleanup(&self) -> Result<DriverCompletion<()>> {
        self.record("kube_upgrade_cleanup");
        Ok(DriverCompletion::ok(()))
    }

    async fn lock_hosts(&self, _hosts: &[String]) -> Result<Operation> {
        self.record("lock_hosts");
        Ok(self.operation_for("lock_hosts"))
    }

    async fn unlock_hosts(&self, _hosts: &[String]) -> Result<Operation> {
        self.record("unlock_hosts");
        Ok(self.operation_for("unlock_hosts"))
    }

    async fn reboot_hosts(&self, _hosts: &[String]) -> Result<Operation> {
        self.record("reboot_hosts");
        Ok(self.operation_for("reboot_hosts"))
    }

    async fn swact_hosts(&self, _hosts: &[String]) -> Result<Operation> {
        self.record("swact_hosts");
        Ok(self.operation_for("swact_hosts"))
    }

    async fn upgrade_hosts(&self, _hosts: &[String]) -> Result<Operation> {
        self.record("upgrade_hosts");
        Ok(self.operation_for("upgrade_hosts"))
    }

    async fn fw_update_hosts(&self, _hosts: &[String]) -> Result<Operation> {
        self.record("fw_update_hosts");
        Ok(self.operation_for("fw_update_hosts"))
    }

    async fn fw_update_abort_hosts(&self, _hosts: &[String]) -> Result<Operation> {
        self.record("fw_update_abort_hosts");
        Ok(self.operation_for("fw_update_abort_hosts"))
    }

    async fn disable_host_services(&self, _hosts: &[String], _service: &str) -> Result<Operation> {
        self.record("disable_host_services");
        Ok(self.operation_for("disable_host_services"))
    }

    async fn enable_host_services(&self, _hosts: &[String], _service: &str) -> Result<Operation> {
        self.record("enable_host_services");
        Ok(self.operation_for("enable_host_services"))
    }

    async fn kube_upgrade_hosts_control_plane(
        &self,
        _hosts: &[String],
        _force: bool,
    ) -> Result<Operation> {
        self.record("kube_upgrade_hosts_control_plane");
        Ok(self.operation_for("kube_upgrade_hosts_control_plane"))
    }

    async fn kube_upgrade_hosts_kubelet(
        &self,
        _hosts: &[String],
        _force: bool,
    ) -> Result<Operation> {
        self.record("kube_upgrade_hosts_kubelet");
        Ok(self.operation_for("kube_upgrade_hosts_kubelet"))
    }

    async fn migrate_instances(&self, _instance_uuids: &[Uuid]) -> Result<Operation> {
        self.record("migrate_instances");
        Ok(self.operation_for("migrate_instances"))
    }

    async fn stop_instances(&self, _instance_uuids: &[Uuid]) -> Result<Operation> {
        self.record("stop_instances");
        Ok(self.operation_for("stop_instances"))
    }

    async fn start_instances(&self, _instance_uuids: &[Uuid]) -> Result<Operation> {
        self.record("start_instances");
        Ok(self.operation_for("start_instances"))
    }

    async fn apply_patches(&self, _names: &[String]) -> Result<DriverCompletion<()>> {
        self.record("apply_patches");
        Ok(DriverCompletion::ok(()))
    }
}

fn host_placeholder(name: &str) -> Host {
    use crate::types::{
        AdministrativeState, Availability, DeviceImageUpdate, HostPersonality,
        HostServiceState, OperationalState, PatchHostState,
    };
    Host {
        uuid: Uuid::nil(),
        name: name.to_string(),
        personality: HostPersonality::Worker,
        administrative_state: AdministrativeState::Unlocked,
        operational_state: OperationalState::Enabled,
        availability: Availability::Offline,
        software_load: String::new(),
        target_load: String::new(),
        device_image_update: DeviceImageUpdate::Null,
        host_service_state: HostServiceState::Enabled,
        patch_state: PatchHostState {
            patch_current: false,
            patch_failed: false,
        },
        kubelet_version: None,
    }
}
