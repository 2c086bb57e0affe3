//! The Step contract every step kind implements (§4.1, §4.2).
//!
//! A step is a small cooperative coroutine: `apply` either resolves
//! immediately or asks to `Wait`, after which progress can only come
//! from `handle_event` (a targeted or periodic event) or `timeout`
//! (the controller's monotonic deadline check). Nothing here blocks on
//! network I/O — a step that needs a driver response spawns the await
//! and feeds the result back in as an event.

use crate::driver::PlatformDriver;
use crate::inventory::Inventory;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Events a step may receive through `handle_event`, mirroring the
/// controller's event vocabulary (§4.1).
#[derive(Debug, Clone)]
pub enum Event {
    HostStateChanged { host_name: String },
    HostAudit,
    HostLockFailed { host_name: String, reason: String },
    HostUnlockFailed { host_name: String, reason: String },
    HostRebootFailed { host_name: String, reason: String },
    HostSwactFailed { host_name: String, reason: String },
    HostUpgradeFailed { host_name: String, reason: String },
    HostFwUpdateFailed { host_name: String, reason: String },
    HostFwUpdateAbortFailed { host_name: String, reason: String },
    InstanceStateChanged { instance_uuid: uuid::Uuid },
    InstanceAudit,
    MigrateInstancesFailed { instance_uuid: uuid::Uuid, reason: String },
    DisableHostServicesFailed { host_name: String, reason: String },
    EnableHostServicesFailed { host_name: String, reason: String },
    KubeHostUpgradeControlPlaneFailed { host_name: String, reason: String },
    KubeHostUpgradeKubeletFailed { host_name: String, reason: String },
}

/// Outcome of `apply`/`handle_event`/`timeout`. `Wait` means the step
/// stays current; the controller keeps delivering it events and ticks
/// until it reports `Success` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    Failed(String),
    Wait,
}

impl StepOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepOutcome::Wait)
    }
}

/// The strategy-wide rolling workspace (`nfvi_*` fields, §4.1/§5):
/// populated by query-* steps, read by later steps of the same
/// strategy. The sole writer for any given field is the step whose
/// callback populated it; everything else is read-only to later steps.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Workspace {
    pub nfvi_alarms: Option<Vec<crate::types::Alarm>>,
    pub nfvi_upgrade: Option<crate::driver::UpgradeRecord>,
    pub nfvi_kube_upgrade: Option<crate::driver::KubeUpgradeRecord>,
    pub nfvi_kube_upgrade_list: Option<Vec<crate::driver::KubeHostUpgrade>>,
    pub nfvi_sw_patches: Option<Vec<crate::driver::SwPatch>>,
    pub nfvi_sw_patch_hosts: Option<Vec<crate::driver::SwPatchHostStatus>>,
    pub nfvi_kube_versions: Option<Vec<String>>,
    /// Hosts with a pending firmware image update, gathered by
    /// `query-fw-update-host` and consumed by `fw-update-hosts`.
    pub fw_update_hosts: Vec<String>,
    /// Per-host `(done, success, reason)` tuples for an in-flight
    /// firmware update (§4.2).
    pub fw_update_host_state: std::collections::HashMap<String, (bool, bool, String)>,
}

/// What a step needs to do its work: the driver façade, the live
/// inventory tables, and the strategy's shared workspace. Handed to
/// every trait method so steps never stash their own driver handle.
#[derive(Clone)]
pub struct StepContext {
    pub driver: Arc<dyn PlatformDriver>,
    pub inventory: Inventory,
    pub workspace: Arc<RwLock<Workspace>>,
    /// Monotonic "now", supplied by the controller so steps never read
    /// the wall clock themselves.
    pub now: Instant,
}

/// A step's self-describing persisted form: `name` plus whatever
/// kind-specific fields the step chooses to serialize. Deserialization
/// is version-tolerant — `get` falls back to `default` for fields a
/// future step kind might add (§6 "Persisted state").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    #[serde(flatten)]
    pub fields: std::collections::HashMap<String, Value>,
}

use serde::{Deserialize, Serialize};

impl StepRecord {
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str, default: T) -> T {
        self.fields
            .get(key)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(default)
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.to_string(), v);
        }
    }
}

/// The step contract. `Send + Sync` so steps live behind `Box<dyn
/// Step>` inside a stage owned by the single-threaded-logically (but
/// not literally single-threaded) controller.
#[async_trait::async_trait]
pub trait Step: Send + Sync {
    /// The step kind's persisted/reported name, e.g. `"lock-hosts"`.
    fn kind(&self) -> &'static str;

    /// Host/instance names this step targets, for reporting and for
    /// the controller's abort bookkeeping.
    fn entity_names(&self) -> Vec<String>;

    /// Seconds from first `apply` to the step's absolute deadline.
    /// `None` means the step never times out on its own (rare; only
    /// used by steps whose completion is driven purely by events).
    fn timeout_secs(&self) -> Option<u64>;

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome;

    /// `None` means the step ignored the event (not addressed to it,
    /// or it is not the step currently being applied).
    async fn handle_event(&mut self, ctx: &StepContext, event: &Event) -> Option<StepOutcome>;

    /// Called by the controller when `timeout_secs` has elapsed since
    /// first `apply` and the step is still `Wait`ing. Default policy is
    /// to fail; `system-stabilize` overrides this to succeed (§4.2).
    fn timeout(&mut self) -> StepOutcome {
        StepOutcome::Failed(format!("{} timed out", self.kind()))
    }

    /// Compensating steps to run, in order, if the strategy aborts
    /// after this step already completed. Empty for steps with no
    /// compensation (§4.2's "abort chain" column).
    fn abort_chain(&self) -> Vec<Box<dyn Step>> {
        Vec::new()
    }

    fn to_record(&self) -> StepRecord;
}
