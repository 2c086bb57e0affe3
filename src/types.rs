//! Core fleet data model: hosts, instances, and their states.
//!
//! Tables own these rows; steps hold only names/uuids and re-resolve on
//! every access so that churn between polls never leaves a step holding
//! stale state (see `inventory` for the lookup-by-name accessors).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Administrative lock state of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdministrativeState {
    Locked,
    Unlocked,
}

/// Operational state of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationalState {
    Enabled,
    Disabled,
}

/// Availability of a host as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Availability {
    Online,
    Offline,
    Degraded,
}

/// Progress of a firmware image update on a single host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceImageUpdate {
    Null,
    Pending,
    InProgress,
    InProgressAborted,
    Completed,
    Failed,
}

/// State of an optional per-service toggle on a host (used by
/// disable/enable-host-services steps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostServiceState {
    Enabled,
    Disabled,
    Enabling,
    Disabling,
}

/// A host's software-management state, polled by `sw-patch-hosts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchHostState {
    pub patch_current: bool,
    pub patch_failed: bool,
}

/// A fleet host. Identified stably by `(uuid, name)`; every other field
/// may change between polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub uuid: uuid::Uuid,
    pub name: String,
    pub personality: HostPersonality,
    pub administrative_state: AdministrativeState,
    pub operational_state: OperationalState,
    pub availability: Availability,
    pub software_load: String,
    pub target_load: String,
    pub device_image_update: DeviceImageUpdate,
    pub host_service_state: HostServiceState,
    pub patch_state: PatchHostState,
    pub kubelet_version: Option<String>,
}

impl Host {
    pub fn is_locked(&self) -> bool {
        matches!(self.administrative_state, AdministrativeState::Locked)
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.operational_state, OperationalState::Enabled)
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.operational_state, OperationalState::Disabled)
    }

    pub fn is_online(&self) -> bool {
        matches!(self.availability, Availability::Online)
    }
}

/// Host personality; controls which apply-type a builder uses for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostPersonality {
    Controller,
    Storage,
    Worker,
}

impl fmt::Display for HostPersonality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostPersonality::Controller => "controller",
            HostPersonality::Storage => "storage",
            HostPersonality::Worker => "worker",
        };
        write!(f, "{s}")
    }
}

/// A guest instance (VM/workload) placed on a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub uuid: uuid::Uuid,
    pub name: String,
    pub host_name: String,
    pub administrative_state: AdministrativeState,
    pub operational_state: OperationalState,
}

/// A fault/alarm as reported by the driver's alarm query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alarm {
    pub alarm_id: String,
    pub alarm_uuid: String,
    /// `"True"` / `"False"` exactly as the source reports it, preserved
    /// verbatim because the relaxed alarm-restriction comparison is a
    /// literal string match in the system this was distilled from.
    pub mgmt_affecting: String,
}
