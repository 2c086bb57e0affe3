//! `migrate-instances`, `stop-instances`, `start-instances` (§4.2).

use crate::strategy::step::{Event, Step, StepContext, StepOutcome, StepRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

/// Instances targeted by a director call, captured with the host each
/// lived on when the step was planned — churn between planning and
/// apply is a hard failure, never silently re-resolved.
struct InstanceTargets {
    captured_host_names: HashMap<Uuid, String>,
    timeout_secs: u64,
}

impl InstanceTargets {
    fn from_record(record: &StepRecord, default_timeout: u64) -> Self {
        let uuids: Vec<Uuid> = record.get("entity_uuids", Vec::new());
        let hosts: Vec<String> = record.get("captured_host_names", Vec::new());
        Self {
            captured_host_names: uuids.into_iter().zip(hosts).collect(),
            timeout_secs: record.get("timeout", default_timeout),
        }
    }

    fn uuids(&self) -> Vec<Uuid> {
        self.captured_host_names.keys().copied().collect()
    }

    fn to_fields(&self, r: &mut StepRecord) {
        let (uuids, hosts): (Vec<_>, Vec<_>) = self.captured_host_names.clone().into_iter().unzip();
        r.set("entity_uuids", uuids);
        r.set("captured_host_names", hosts);
        r.set("timeout", self.timeout_secs);
    }

    /// `Some(reason)` the first instance found to have moved off the
    /// host it was captured on.
    async fn moved_reason(&self, ctx: &StepContext) -> Option<String> {
        for (uuid, captured_host) in &self.captured_host_names {
            if let Some(instance) = ctx.inventory.instances.get(*uuid).await {
                if &instance.host_name != captured_host {
                    return Some(format!(
                        "instance {} has moved from {captured_host} to {}",
                        instance.name, instance.host_name
                    ));
                }
            }
        }
        None
    }

    fn failed_event_uuid<'a>(&self, event: &'a Event) -> Option<&'a str> {
        if let Event::MigrateInstancesFailed { instance_uuid, reason } = event {
            if self.captured_host_names.contains_key(instance_uuid) {
                return Some(reason.as_str());
            }
        }
        None
    }
}

pub struct MigrateInstancesStep(InstanceTargets);

impl MigrateInstancesStep {
    pub fn from_record(record: &StepRecord) -> Self {
        Self(InstanceTargets::from_record(record, 1800))
    }
}

#[async_trait]
impl Step for MigrateInstancesStep {
    fn kind(&self) -> &'static str {
        "migrate-instances"
    }

    fn entity_names(&self) -> Vec<String> {
        self.0.captured_host_names.values().cloned().collect()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(self.0.timeout_secs)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        if let Some(reason) = self.0.moved_reason(ctx).await {
            return StepOutcome::Failed(reason);
        }
        match ctx.driver.migrate_instances(&self.0.uuids()).await {
            Ok(op) if op.is_failed() => StepOutcome::Failed(op.reason().to_string()),
            Ok(_) => StepOutcome::Wait,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn handle_event(&mut self, ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
        if let Some(reason) = self.0.failed_event_uuid(event) {
            return Some(StepOutcome::Failed(reason.to_string()));
        }
        if !matches!(event, Event::InstanceAudit | Event::InstanceStateChanged { .. }) {
            return None;
        }
        let mut source_hosts: Vec<&str> = self.0.captured_host_names.values().map(String::as_str).collect();
        source_hosts.sort_unstable();
        source_hosts.dedup();
        for host in source_hosts {
            if ctx.inventory.instances.exist_on_host(host).await {
                return None;
            }
        }
        Some(StepOutcome::Success)
    }

    fn to_record(&self) -> StepRecord {
        let mut r = StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        };
        self.0.to_fields(&mut r);
        r
    }
}

pub struct StopInstancesStep(InstanceTargets);

impl StopInstancesStep {
    pub fn from_record(record: &StepRecord) -> Self {
        Self(InstanceTargets::from_record(record, 600))
    }
}

#[async_trait]
impl Step for StopInstancesStep {
    fn kind(&self) -> &'static str {
        "stop-instances"
    }

    fn entity_names(&self) -> Vec<String> {
        self.0.captured_host_names.values().cloned().collect()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(self.0.timeout_secs)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        if let Some(reason) = self.0.moved_reason(ctx).await {
            return StepOutcome::Failed(reason);
        }
        match ctx.driver.stop_instances(&self.0.uuids()).await {
            Ok(op) if op.is_failed() => StepOutcome::Failed(op.reason().to_string()),
            Ok(_) => StepOutcome::Wait,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn handle_event(&mut self, ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
        if let Some(reason) = self.0.failed_event_uuid(event) {
            return Some(StepOutcome::Failed(reason.to_string()));
        }
        if !matches!(event, Event::InstanceAudit | Event::InstanceStateChanged { .. }) {
            return None;
        }
        for uuid in self.0.uuids() {
            match ctx.inventory.instances.get(uuid).await {
                Some(i)
                    if matches!(i.administrative_state, crate::types::AdministrativeState::Locked)
                        && matches!(i.operational_state, crate::types::OperationalState::Disabled) => {}
                _ => return None,
            }
        }
        Some(StepOutcome::Success)
    }

    fn abort_chain(&self) -> Vec<Box<dyn Step>> {
        let mut r = StepRecord {
            name: "start-instances".to_string(),
            fields: Default::default(),
        };
        self.0.to_fields(&mut r);
        vec![Box::new(StartInstancesStep::from_record(&r))]
    }

    fn to_record(&self) -> StepRecord {
        let mut r = StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        };
        self.0.to_fields(&mut r);
        r
    }
}

pub struct StartInstancesStep(InstanceTargets);

impl StartInstancesStep {
    pub fn from_record(record: &StepRecord) -> Self {
        Self(InstanceTargets::from_record(record, 600))
    }
}

#[async_trait]
impl Step for StartInstancesStep {
    fn kind(&self) -> &'static str {
        "start-instances"
    }

    fn entity_names(&self) -> Vec<String> {
        self.0.captured_host_names.values().cloned().collect()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(self.0.timeout_secs)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        match ctx.driver.start_instances(&self.0.uuids()).await {
            Ok(op) if op.is_failed() => StepOutcome::Failed(op.reason().to_string()),
            Ok(_) => StepOutcome::Wait,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn handle_event(&mut self, ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
        if let Some(reason) = self.0.failed_event_uuid(event) {
            return Some(StepOutcome::Failed(reason.to_string()));
        }
        if !matches!(event, Event::InstanceAudit | Event::InstanceStateChanged { .. }) {
            return None;
        }
        for uuid in self.0.uuids() {
            match ctx.inventory.instances.get(uuid).await {
                Some(i) if matches!(i.operational_state, crate::types::OperationalState::Enabled) => {}
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
        self.0.to_fields(&mut r);
        r
    }
}
