//! `query-fw-update-host`, `fw-update-hosts`, `fw-update-abort-hosts`
//! (§4.2).

use super::elapsed_since;
use crate::strategy::step::{Event, Step, StepContext, StepOutcome, StepRecord};
use crate::types::DeviceImageUpdate;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Instant;

pub struct QueryFwUpdateHostStep {
    host: String,
}

impl QueryFwUpdateHostStep {
    pub fn from_record(record: &StepRecord) -> Self {
        Self {
            host: record.get("entity_names", Vec::<String>::new()).into_iter().next().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Step for QueryFwUpdateHostStep {
    fn kind(&self) -> &'static str {
        "query-fw-update-host"
    }

    fn entity_names(&self) -> Vec<String> {
        vec![self.host.clone()]
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(60)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        match ctx.driver.get_host(uuid::Uuid::nil(), &self.host).await {
            Ok(c) if c.completed => {
                if c.result_data.device_image_update == DeviceImageUpdate::Pending {
                    ctx.workspace.write().await.fw_update_hosts.push(self.host.clone());
                }
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
        let mut r = StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        };
        r.set("entity_names", vec![self.host.clone()]);
        r
    }
}

pub struct FwUpdateHostsStep {
    hosts: Vec<String>,
    poll_secs: u64,
    timeout_secs: u64,
    started_at: Option<Instant>,
    seen_in_progress: HashMap<String, bool>,
    state: HashMap<String, (bool, bool, String)>,
}

impl FwUpdateHostsStep {
    pub fn new(hosts: Vec<String>, poll_secs: u64, timeout_secs: u64) -> Self {
        Self {
            hosts,
            poll_secs,
            timeout_secs,
            started_at: None,
            seen_in_progress: HashMap::new(),
            state: HashMap::new(),
        }
    }

    pub fn from_record(record: &StepRecord) -> Self {
        Self::new(
            record.get("entity_names", Vec::new()),
            record.get("poll_secs", 60),
            // Open question (spec §9): literal 3600s regardless of wave size.
            record.get("timeout", 3600),
        )
    }
}

#[async_trait]
impl Step for FwUpdateHostsStep {
    fn kind(&self) -> &'static str {
        "fw-update-hosts"
    }

    fn entity_names(&self) -> Vec<String> {
        self.hosts.clone()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(self.timeout_secs)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        // The wave passes every worker host in its group; narrow down
        // to the ones `query-fw-update-host` actually found pending,
        // since only those have an image staged to apply.
        let pending = ctx.workspace.read().await.fw_update_hosts.clone();
        self.hosts.retain(|h| pending.contains(h));
        if self.hosts.is_empty() {
            return StepOutcome::Success;
        }
        self.started_at.get_or_insert(ctx.now);
        match ctx.driver.fw_update_hosts(&self.hosts).await {
            Ok(op) if op.is_failed() => StepOutcome::Failed(op.reason().to_string()),
            Ok(_) => StepOutcome::Wait,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn handle_event(&mut self, ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
        match event {
            Event::HostFwUpdateFailed { host_name, reason } if self.hosts.contains(host_name) => {
                return Some(StepOutcome::Failed(format!("fw-update-hosts: {host_name}: {reason}")));
            }
            Event::HostAudit => {}
            _ => return None,
        }
        if !elapsed_since(self.started_at, ctx.now, self.poll_secs) {
            return None;
        }
        for name in &self.hosts {
            if self.state.get(name).is_some_and(|(done, ..)| *done) {
                continue;
            }
            let Some(host) = ctx.inventory.hosts.get(name).await else {
                continue;
            };
            match host.device_image_update {
                DeviceImageUpdate::Completed => {
                    self.state.insert(name.clone(), (true, true, String::new()));
                }
                DeviceImageUpdate::Failed => {
                    self.state.insert(
                        name.clone(),
                        (true, false, format!("firmware update failed on {name}")),
                    );
                }
                DeviceImageUpdate::InProgressAborted => {
                    self.state.insert(
                        name.clone(),
                        (true, false, format!("firmware update aborted on {name}")),
                    );
                }
                DeviceImageUpdate::InProgress => {
                    self.seen_in_progress.insert(name.clone(), true);
                }
                DeviceImageUpdate::Pending => {
                    if self.seen_in_progress.get(name).copied().unwrap_or(false) {
                        return Some(StepOutcome::Failed(format!(
                            "fw-update-hosts: {name} reverted to pending, needs retry"
                        )));
                    }
                }
                DeviceImageUpdate::Null => {}
            }
        }
        if self.hosts.iter().all(|h| self.state.get(h).is_some_and(|(done, ..)| *done)) {
            if let Some((_, _, reason)) = self.hosts.iter().find_map(|h| {
                self.state.get(h).and_then(|(done, success, reason)| {
                    (*done && !*success).then(|| (true, false, reason.clone()))
                })
            }) {
                return Some(StepOutcome::Failed(reason));
            }
            return Some(StepOutcome::Success);
        }
        None
    }

    fn abort_chain(&self) -> Vec<Box<dyn Step>> {
        // Compensate every host that didn't finish the update
        // successfully: still in flight, or done but failed. A host
        // that completed cleanly needs nothing undone.
        let unfinished: Vec<String> = self
            .hosts
            .iter()
            .filter(|h| !self.state.get(*h).is_some_and(|(done, success, _)| *done && *success))
            .cloned()
            .collect();
        if unfinished.is_empty() {
            return Vec::new();
        }
        let mut r = StepRecord {
            name: "fw-update-abort-hosts".to_string(),
            fields: Default::default(),
        };
        r.set("entity_names", unfinished);
        vec![Box::new(FwUpdateAbortHostsStep::from_record(&r))]
    }

    fn to_record(&self) -> StepRecord {
        let mut r = StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        };
        r.set("entity_names", self.hosts.clone());
        r.set("poll_secs", self.poll_secs);
        r.set("timeout", self.timeout_secs);
        r
    }
}

pub struct FwUpdateAbortHostsStep {
    hosts: Vec<String>,
    applied: bool,
}

impl FwUpdateAbortHostsStep {
    pub fn from_record(record: &StepRecord) -> Self {
        Self {
            hosts: record.get("entity_names", Vec::new()),
            applied: false,
        }
    }
}

#[async_trait]
impl Step for FwUpdateAbortHostsStep {
    fn kind(&self) -> &'static str {
        "fw-update-abort-hosts"
    }

    fn entity_names(&self) -> Vec<String> {
        self.hosts.clone()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(300)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        match ctx.driver.fw_update_abort_hosts(&self.hosts).await {
            Ok(op) if op.is_failed() => StepOutcome::Failed(op.reason().to_string()),
            Ok(_) => {
                self.applied = true;
                StepOutcome::Wait
            }
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn handle_event(&mut self, _ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
        match event {
            Event::HostFwUpdateAbortFailed { host_name, reason } if self.hosts.contains(host_name) => {
                Some(StepOutcome::Failed(format!("fw-update-abort-hosts: {host_name}: {reason}")))
            }
            Event::HostAudit if self.applied => Some(StepOutcome::Success),
            _ => None,
        }
    }

    fn to_record(&self) -> StepRecord {
        let mut r = StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        };
        r.set("entity_names", self.hosts.clone());
        r
    }
}
