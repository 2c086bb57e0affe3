//! `kube-upgrade-*`, `kube-host-upgrade-*`, and the Kubernetes query
//! steps (§4.2).

use super::elapsed_since;
use crate::driver::KubeUpgradeState;
use crate::strategy::step::{Event, Step, StepContext, StepOutcome, StepRecord};
use async_trait::async_trait;
use std::time::Instant;

const ROOTCA_ALARM_IGNORE: &str = "900.401";

async fn poll_kube_upgrade(
    ctx: &StepContext,
    success: KubeUpgradeState,
    failure: Option<KubeUpgradeState>,
) -> Option<StepOutcome> {
    let record = match ctx.driver.get_kube_upgrade().await {
        Ok(c) if c.completed => c.result_data,
        Ok(c) => return Some(StepOutcome::Failed(c.reason)),
        Err(e) => return Some(StepOutcome::Failed(e.to_string())),
    };
    let state = record.as_ref().map(|r| r.state);
    ctx.workspace.write().await.nfvi_kube_upgrade = record;
    match state {
        Some(s) if s == success => Some(StepOutcome::Success),
        Some(s) if Some(s) == failure => Some(StepOutcome::Failed(format!("kube-upgrade reached {s:?}"))),
        _ => None,
    }
}

pub struct KubeUpgradeStartStep {
    to_version: String,
    force: bool,
    poll_secs: u64,
    timeout_secs: u64,
    started_at: Option<Instant>,
}

impl KubeUpgradeStartStep {
    pub fn from_record(record: &StepRecord) -> Self {
        Self {
            to_version: record.get("to_version", String::new()),
            force: record.get("force", false),
            poll_secs: record.get("poll_secs", 60),
            timeout_secs: record.get("timeout", 1800),
            started_at: None,
        }
    }
}

#[async_trait]
impl Step for KubeUpgradeStartStep {
    fn kind(&self) -> &'static str {
        "kube-upgrade-start"
    }

    fn entity_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(self.timeout_secs)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        self.started_at.get_or_insert(ctx.now);
        match ctx
            .driver
            .kube_upgrade_start(&self.to_version, self.force, &[ROOTCA_ALARM_IGNORE.to_string()])
            .await
        {
            Ok(c) if c.completed => StepOutcome::Wait,
            Ok(c) => StepOutcome::Failed(c.reason),
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn handle_event(&mut self, ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
        if !matches!(event, Event::HostAudit) || !elapsed_since(self.started_at, ctx.now, self.poll_secs) {
            return None;
        }
        poll_kube_upgrade(ctx, KubeUpgradeState::Started, None).await
    }

    fn to_record(&self) -> StepRecord {
        let mut r = StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        };
        r.set("to_version", self.to_version.clone());
        r.set("force", self.force);
        r.set("poll_secs", self.poll_secs);
        r.set("timeout", self.timeout_secs);
        r
    }
}

macro_rules! kube_upgrade_phase_step {
    ($name:ident, $kind:literal, $driver_call:ident, $success:expr, $failure:expr) => {
        pub struct $name {
            poll_secs: u64,
            timeout_secs: u64,
            started_at: Option<Instant>,
        }

        impl $name {
            pub fn from_record(record: &StepRecord) -> Self {
                Self {
                    poll_secs: record.get("poll_secs", 60),
                    timeout_secs: record.get("timeout", 1800),
                    started_at: None,
                }
            }
        }

        #[async_trait]
        impl Step for $name {
            fn kind(&self) -> &'static str {
                $kind
            }

            fn entity_names(&self) -> Vec<String> {
                Vec::new()
            }

            fn timeout_secs(&self) -> Option<u64> {
                Some(self.timeout_secs)
            }

            async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
                self.started_at.get_or_insert(ctx.now);
                match ctx.driver.$driver_call().await {
                    Ok(c) if c.completed => StepOutcome::Wait,
                    Ok(c) => StepOutcome::Failed(c.reason),
                    Err(e) => StepOutcome::Failed(e.to_string()),
                }
            }

            async fn handle_event(&mut self, ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
                if !matches!(event, Event::HostAudit) || !elapsed_since(self.started_at, ctx.now, self.poll_secs) {
                    return None;
                }
                poll_kube_upgrade(ctx, $success, $failure).await
            }

            fn to_record(&self) -> StepRecord {
                let mut r = StepRecord {
                    name: self.kind().to_string(),
                    fields: Default::default(),
                };
                r.set("poll_secs", self.poll_secs);
                r.set("timeout", self.timeout_secs);
                r
            }
        }
    };
}

kube_upgrade_phase_step!(
    KubeUpgradeDownloadImagesStep,
    "kube-upgrade-download-images",
    kube_upgrade_download_images,
    KubeUpgradeState::DownloadedImages,
    Some(KubeUpgradeState::DownloadingImagesFailed)
);

kube_upgrade_phase_step!(
    KubeUpgradeNetworkingStep,
    "kube-upgrade-networking",
    kube_upgrade_networking,
    KubeUpgradeState::UpgradedNetworking,
    Some(KubeUpgradeState::UpgradingNetworkingFailed)
);

kube_upgrade_phase_step!(
    KubeUpgradeCompleteStep,
    "kube-upgrade-complete",
    kube_upgrade_complete,
    KubeUpgradeState::Complete,
    None
);

pub struct KubeUpgradeCleanupStep;

impl KubeUpgradeCleanupStep {
    pub fn from_record(_record: &StepRecord) -> Self {
        Self
    }
}

#[async_trait]
impl Step for KubeUpgradeCleanupStep {
    fn kind(&self) -> &'static str {
        "kube-upgrade-cleanup"
    }

    fn entity_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(300)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        match ctx.driver.kube_upgrade_cleanup().await {
            Ok(c) if c.completed => {
                ctx.workspace.write().await.nfvi_kube_upgrade = None;
                StepOutcome::Success
            }
            Ok(c) => StepOutcome::Failed(c.reason),
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn handle_event(&mut self, _ctx: &StepContext, _event: &Event) -> Option<StepOutcome> {
        None
    }

    fn to_record(&self) -> StepRecord {
        StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        }
    }
}

macro_rules! simple_query_step {
    ($name:ident, $kind:literal, $driver_call:ident, $field:ident) => {
        simple_query_step!($name, $kind, $driver_call, $field, |v| v);
    };
    ($name:ident, $kind:literal, $driver_call:ident, $field:ident, $wrap:expr) => {
        pub struct $name;

        impl $name {
            pub fn from_record(_record: &StepRecord) -> Self {
                Self
            }
        }

        #[async_trait]
        impl Step for $name {
            fn kind(&self) -> &'static str {
                $kind
            }

            fn entity_names(&self) -> Vec<String> {
                Vec::new()
            }

            fn timeout_secs(&self) -> Option<u64> {
                Some(60)
            }

            async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
                match ctx.driver.$driver_call().await {
                    Ok(c) if c.completed => {
                        ctx.workspace.write().await.$field = ($wrap)(c.result_data);
                        StepOutcome::Success
                    }
                    Ok(c) => StepOutcome::Failed(c.reason),
                    Err(e) => StepOutcome::Failed(e.to_string()),
                }
            }

            async fn handle_event(&mut self, _ctx: &StepContext, _event: &Event) -> Option<StepOutcome> {
                None
            }

            fn to_record(&self) -> StepRecord {
                StepRecord {
                    name: self.kind().to_string(),
                    fields: Default::default(),
                }
            }
        }
    };
}

simple_query_step!(
    QueryKubeUpgradeStep,
    "query-kube-upgrade",
    get_kube_upgrade,
    nfvi_kube_upgrade
);
simple_query_step!(
    QueryKubeHostUpgradeStep,
    "query-kube-host-upgrade",
    get_kube_host_upgrade_list,
    nfvi_kube_upgrade_list,
    Some
);

pub struct QueryKubeVersionsStep;

impl QueryKubeVersionsStep {
    pub fn from_record(_record: &StepRecord) -> Self {
        Self
    }
}

#[async_trait]
impl Step for QueryKubeVersionsStep {
    fn kind(&self) -> &'static str {
        "query-kube-versions"
    }

    fn entity_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(60)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        match ctx.driver.get_kube_version_list().await {
            Ok(c) if c.completed => {
                ctx.workspace.write().await.nfvi_kube_versions = Some(c.result_data);
                StepOutcome::Success
            }
            Ok(c) => StepOutcome::Failed(c.reason),
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn handle_event(&mut self, _ctx: &StepContext, _event: &Event) -> Option<StepOutcome> {
        None
    }

    fn to_record(&self) -> StepRecord {
        StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        }
    }
}

pub struct KubeHostUpgradeControlPlaneStep {
    host: String,
    force: bool,
    timeout_secs: u64,
}

impl KubeHostUpgradeControlPlaneStep {
    pub fn from_record(record: &StepRecord) -> Self {
        Self {
            host: record.get("entity_names", Vec::<String>::new()).into_iter().next().unwrap_or_default(),
            force: record.get("force", false),
            timeout_secs: record.get("timeout", 600),
        }
    }
}

#[async_trait]
impl Step for KubeHostUpgradeControlPlaneStep {
    fn kind(&self) -> &'static str {
        "kube-host-upgrade-control-plane"
    }

    fn entity_names(&self) -> Vec<String> {
        vec![self.host.clone()]
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(self.timeout_secs)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        match ctx
            .driver
            .kube_upgrade_hosts_control_plane(&[self.host.clone()], self.force)
            .await
        {
            Ok(op) if op.is_failed() => StepOutcome::Failed(op.reason().to_string()),
            Ok(_) => StepOutcome::Wait,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn handle_event(&mut self, ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
        match event {
            Event::KubeHostUpgradeControlPlaneFailed { host_name, reason } if host_name == &self.host => {
                Some(StepOutcome::Failed(reason.clone()))
            }
            Event::HostAudit => {
                let entries = ctx.workspace.read().await.nfvi_kube_upgrade_list.clone()?;
                let entry = entries.iter().find(|e| e.host_name == self.host)?;
                match entry.control_plane_state.as_str() {
                    "upgraded" => Some(StepOutcome::Success),
                    "failed" => Some(StepOutcome::Failed(format!(
                        "kube-host-upgrade-control-plane failed on {}",
                        self.host
                    ))),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn to_record(&self) -> StepRecord {
        let mut r = StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        };
        r.set("entity_names", vec![self.host.clone()]);
        r.set("force", self.force);
        r.set("timeout", self.timeout_secs);
        r
    }
}

pub struct KubeHostUpgradeKubeletStep {
    hosts: Vec<String>,
    force: bool,
    to_version: String,
    first_poll_secs: u64,
    timeout_secs: u64,
    started_at: Option<Instant>,
}

impl KubeHostUpgradeKubeletStep {
    pub fn from_record(record: &StepRecord) -> Self {
        Self {
            hosts: record.get("entity_names", Vec::new()),
            force: record.get("force", false),
            to_version: record.get("to_version", String::new()),
            first_poll_secs: record.get("first_poll_secs", 60),
            timeout_secs: record.get("timeout", 900),
            started_at: None,
        }
    }
}

#[async_trait]
impl Step for KubeHostUpgradeKubeletStep {
    fn kind(&self) -> &'static str {
        "kube-host-upgrade-kubelet"
    }

    fn entity_names(&self) -> Vec<String> {
        self.hosts.clone()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(self.timeout_secs)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        self.started_at.get_or_insert(ctx.now);
        match ctx.driver.kube_upgrade_hosts_kubelet(&self.hosts, self.force).await {
            Ok(op) if op.is_failed() => StepOutcome::Failed(op.reason().to_string()),
            Ok(_) => StepOutcome::Wait,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn handle_event(&mut self, ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
        match event {
            Event::KubeHostUpgradeKubeletFailed { host_name, reason } if self.hosts.contains(host_name) => {
                return Some(StepOutcome::Failed(format!(
                    "kube-host-upgrade-kubelet: {host_name}: {reason}"
                )));
            }
            Event::HostAudit => {}
            _ => return None,
        }
        if !elapsed_since(self.started_at, ctx.now, self.first_poll_secs) {
            return None;
        }
        let list = match ctx.driver.get_kube_host_upgrade_list().await {
            Ok(c) if c.completed => c.result_data,
            Ok(c) => return Some(StepOutcome::Failed(c.reason)),
            Err(e) => return Some(StepOutcome::Failed(e.to_string())),
        };
        let ready = self.hosts.iter().all(|h| {
            list.iter()
                .find(|e| &e.host_name == h)
                .and_then(|e| e.kubelet_version.as_deref())
                == Some(self.to_version.as_str())
        });
        ctx.workspace.write().await.nfvi_kube_upgrade_list = Some(list);
        ready.then_some(StepOutcome::Success)
    }

    fn to_record(&self) -> StepRecord {
        let mut r = StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        };
        r.set("entity_names", self.hosts.clone());
        r.set("force", self.force);
        r.set("to_version", self.to_version.clone());
        r.set("first_poll_secs", self.first_poll_secs);
        r.set("timeout", self.timeout_secs);
        r
    }
}
