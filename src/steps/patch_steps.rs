//! `sw-patch-hosts`, `query-sw-patches`, `query-sw-patch-hosts`,
//! `apply-patches` (§4.2).

use crate::strategy::step::{Event, Step, StepContext, StepOutcome, StepRecord};
use async_trait::async_trait;

pub struct SwPatchHostsStep {
    hosts: Vec<String>,
    timeout_secs: u64,
}

impl SwPatchHostsStep {
    pub fn new(hosts: Vec<String>, timeout_secs: u64) -> Self {
        Self { hosts, timeout_secs }
    }

    pub fn from_record(record: &StepRecord) -> Self {
        Self::new(record.get("entity_names", Vec::new()), record.get("timeout", 1800))
    }
}

#[async_trait]
impl Step for SwPatchHostsStep {
    fn kind(&self) -> &'static str {
        "sw-patch-hosts"
    }

    fn entity_names(&self) -> Vec<String> {
        self.hosts.clone()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(self.timeout_secs)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        match ctx.driver.sw_mgmt_update_hosts(&self.hosts).await {
            Ok(c) if c.completed => StepOutcome::Wait,
            Ok(c) => StepOutcome::Failed(c.reason),
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn handle_event(&mut self, ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
        if !matches!(event, Event::HostAudit) {
            return None;
        }
        let statuses = match ctx.driver.sw_mgmt_query_hosts().await {
            Ok(c) if c.completed => c.result_data,
            Ok(c) => return Some(StepOutcome::Failed(c.reason)),
            Err(e) => return Some(StepOutcome::Failed(e.to_string())),
        };
        for name in &self.hosts {
            let status = statuses.iter().find(|s| &s.host_name == name);
            match status {
                Some(s) if s.patch_failed => {
                    return Some(StepOutcome::Failed(format!(
                        "software update failed to apply on host {name}"
                    )))
                }
                Some(s) if s.patch_current => {}
                _ => return None,
            }
        }
        Some(StepOutcome::Success)
    }

    fn to_record(&self) -> StepRecord {
        let mut r = StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        };
        r.set("entity_names", self.hosts.clone());
        r.set("timeout", self.timeout_secs);
        r
    }
}

pub struct QuerySwPatchesStep;

impl QuerySwPatchesStep {
    pub fn from_record(_record: &StepRecord) -> Self {
        Self
    }
}

#[async_trait]
impl Step for QuerySwPatchesStep {
    fn kind(&self) -> &'static str {
        "query-sw-patches"
    }

    fn entity_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(60)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        match ctx.driver.sw_mgmt_query_updates().await {
            Ok(c) if c.completed => {
                ctx.workspace.write().await.nfvi_sw_patches = Some(c.result_data);
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

pub struct QuerySwPatchHostsStep;

impl QuerySwPatchHostsStep {
    pub fn from_record(_record: &StepRecord) -> Self {
        Self
    }
}

#[async_trait]
impl Step for QuerySwPatchHostsStep {
    fn kind(&self) -> &'static str {
        "query-sw-patch-hosts"
    }

    fn entity_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(60)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        match ctx.driver.sw_mgmt_query_hosts().await {
            Ok(c) if c.completed => {
                ctx.workspace.write().await.nfvi_sw_patch_hosts = Some(c.result_data);
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

pub struct ApplyPatchesStep {
    names: Vec<String>,
}

impl ApplyPatchesStep {
    pub fn from_record(record: &StepRecord) -> Self {
        Self {
            names: record.get("names", Vec::new()),
        }
    }
}

#[async_trait]
impl Step for ApplyPatchesStep {
    fn kind(&self) -> &'static str {
        "apply-patches"
    }

    fn entity_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(300)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        match ctx.driver.apply_patches(&self.names).await {
            Ok(c) if c.completed => StepOutcome::Success,
            Ok(c) => StepOutcome::Failed(c.reason),
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn handle_event(&mut self, _ctx: &StepContext, _event: &Event) -> Option<StepOutcome> {
        None
    }

    fn to_record(&self) -> StepRecord {
        let mut r = StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        };
        r.set("names", self.names.clone());
        r
    }
}
