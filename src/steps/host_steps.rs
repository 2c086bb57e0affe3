//! `lock-hosts`, `unlock-hosts`, `reboot-hosts`, `swact-hosts`,
//! `upgrade-hosts` (§4.2).

use super::elapsed_since;
use crate::strategy::step::{Event, Step, StepContext, StepOutcome, StepRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Instant;

async fn all_targets<F>(ctx: &StepContext, hosts: &[String], mut pred: F) -> bool
where
    F: FnMut(&crate::types::Host) -> bool,
{
    for name in hosts {
        match ctx.inventory.hosts.get(name).await {
            Some(h) if pred(&h) => {}
            _ => return false,
        }
    }
    true
}

pub struct LockHostsStep {
    hosts: Vec<String>,
    wait_until_disabled: bool,
    timeout_secs: u64,
}

impl LockHostsStep {
    pub fn new(hosts: Vec<String>, wait_until_disabled: bool, timeout_secs: u64) -> Self {
        Self {
            hosts,
            wait_until_disabled,
            timeout_secs,
        }
    }

    pub fn from_record(record: &StepRecord) -> Self {
        Self::new(
            record.get("entity_names", Vec::new()),
            record.get("wait_until_disabled", false),
            record.get("timeout", 60),
        )
    }
}

#[async_trait]
impl Step for LockHostsStep {
    fn kind(&self) -> &'static str {
        "lock-hosts"
    }

    fn entity_names(&self) -> Vec<String> {
        self.hosts.clone()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(self.timeout_secs)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        for name in &self.hosts {
            let instances = ctx.inventory.instances.on_host(name).await;
            let blocking = instances.iter().any(|i| {
                !matches!(i.administrative_state, crate::types::AdministrativeState::Locked)
                    || !matches!(i.operational_state, crate::types::OperationalState::Disabled)
            });
            if blocking {
                return StepOutcome::Failed(format!(
                    "lock-hosts: host {name} still has active instances"
                ));
            }
        }
        match ctx.driver.lock_hosts(&self.hosts).await {
            Ok(op) if op.is_failed() => StepOutcome::Failed(op.reason().to_string()),
            Ok(_) => StepOutcome::Wait,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn handle_event(&mut self, ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
        match event {
            Event::HostLockFailed { host_name, reason } if self.hosts.contains(host_name) => {
                Some(StepOutcome::Failed(format!("lock-hosts: {host_name}: {reason}")))
            }
            Event::HostAudit | Event::HostStateChanged { .. } => {
                let done = all_targets(ctx, &self.hosts, |h| {
                    h.is_locked() && (!self.wait_until_disabled || h.is_disabled())
                })
                .await;
                done.then_some(StepOutcome::Success)
            }
            _ => None,
        }
    }

    fn abort_chain(&self) -> Vec<Box<dyn Step>> {
        vec![Box::new(UnlockHostsStep::new(self.hosts.clone(), 5, 120, 60))]
    }

    fn to_record(&self) -> StepRecord {
        let mut r = StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        };
        r.set("entity_names", self.hosts.clone());
        r.set("wait_until_disabled", self.wait_until_disabled);
        r.set("timeout", self.timeout_secs);
        r
    }
}

pub struct UnlockHostsStep {
    hosts: Vec<String>,
    max_retries: u32,
    retry_delay_secs: u64,
    timeout_secs: u64,
    retries_remaining: HashMap<String, u32>,
    next_retry_at: Option<Instant>,
}

impl UnlockHostsStep {
    pub fn new(hosts: Vec<String>, max_retries: u32, retry_delay_secs: u64, timeout_secs: u64) -> Self {
        Self {
            hosts,
            max_retries,
            retry_delay_secs,
            timeout_secs,
            retries_remaining: HashMap::new(),
            next_retry_at: None,
        }
    }

    pub fn from_record(record: &StepRecord) -> Self {
        Self::new(
            record.get("entity_names", Vec::new()),
            record.get("max_retries", 5),
            record.get("retry_delay_secs", 120),
            record.get("timeout", 600),
        )
    }
}

#[async_trait]
impl Step for UnlockHostsStep {
    fn kind(&self) -> &'static str {
        "unlock-hosts"
    }

    fn entity_names(&self) -> Vec<String> {
        self.hosts.clone()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(self.timeout_secs)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        match ctx.driver.unlock_hosts(&self.hosts).await {
            Ok(op) if op.is_failed() => StepOutcome::Failed(op.reason().to_string()),
            Ok(_) => StepOutcome::Wait,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn handle_event(&mut self, ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
        match event {
            Event::HostUnlockFailed { host_name, .. } if self.hosts.contains(host_name) => {
                let remaining = self
                    .retries_remaining
                    .entry(host_name.clone())
                    .or_insert(self.max_retries);
                if *remaining == 0 {
                    return Some(StepOutcome::Failed(format!(
                        "unlock-hosts: {host_name} exceeded max retries"
                    )));
                }
                *remaining -= 1;
                self.next_retry_at = Some(ctx.now + std::time::Duration::from_secs(self.retry_delay_secs));
                None
            }
            Event::HostAudit | Event::HostStateChanged { .. } => {
                let done = all_targets(ctx, &self.hosts, |h| h.is_enabled() && !h.is_locked()).await;
                if done {
                    return Some(StepOutcome::Success);
                }
                if let Some(retry_at) = self.next_retry_at {
                    if ctx.now >= retry_at {
                        self.next_retry_at = None;
                        let _ = ctx.driver.unlock_hosts(&self.hosts).await;
                    }
                }
                None
            }
            _ => None,
        }
    }

    fn to_record(&self) -> StepRecord {
        let mut r = StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        };
        r.set("entity_names", self.hosts.clone());
        r.set("max_retries", self.max_retries);
        r.set("retry_delay_secs", self.retry_delay_secs);
        r.set("timeout", self.timeout_secs);
        r
    }
}

macro_rules! timed_host_director_step {
    ($name:ident, $kind:literal, $failed_event:ident, $driver_call:ident) => {
        pub struct $name {
            hosts: Vec<String>,
            wait_secs: u64,
            timeout_secs: u64,
            started_at: Option<Instant>,
        }

        impl $name {
            pub fn new(hosts: Vec<String>, wait_secs: u64, timeout_secs: u64) -> Self {
                Self {
                    hosts,
                    wait_secs,
                    timeout_secs,
                    started_at: None,
                }
            }

            pub fn from_record(record: &StepRecord) -> Self {
                Self::new(
                    record.get("entity_names", Vec::new()),
                    record.get("wait_secs", 60),
                    record.get("timeout", 600),
                )
            }
        }

        #[async_trait]
        impl Step for $name {
            fn kind(&self) -> &'static str {
                $kind
            }

            fn entity_names(&self) -> Vec<String> {
                self.hosts.clone()
            }

            fn timeout_secs(&self) -> Option<u64> {
                Some(self.timeout_secs)
            }

            async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
                self.started_at.get_or_insert(ctx.now);
                match ctx.driver.$driver_call(&self.hosts).await {
                    Ok(op) if op.is_failed() => StepOutcome::Failed(op.reason().to_string()),
                    Ok(_) => StepOutcome::Wait,
                    Err(e) => StepOutcome::Failed(e.to_string()),
                }
            }

            async fn handle_event(&mut self, ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
                match event {
                    Event::$failed_event { host_name, reason } if self.hosts.contains(host_name) => {
                        Some(StepOutcome::Failed(format!("{}: {host_name}: {reason}", $kind)))
                    }
                    Event::HostAudit => {
                        elapsed_since(self.started_at, ctx.now, self.wait_secs).then_some(StepOutcome::Success)
                    }
                    _ => None,
                }
            }

            fn to_record(&self) -> StepRecord {
                let mut r = StepRecord {
                    name: self.kind().to_string(),
                    fields: Default::default(),
                };
                r.set("entity_names", self.hosts.clone());
                r.set("wait_secs", self.wait_secs);
                r.set("timeout", self.timeout_secs);
                r
            }
        }
    };
}

timed_host_director_step!(RebootHostsStep, "reboot-hosts", HostRebootFailed, reboot_hosts);
timed_host_director_step!(SwactHostsStep, "swact-hosts", HostSwactFailed, swact_hosts);

pub struct UpgradeHostsStep {
    hosts: Vec<String>,
    to_release: String,
    wait_secs: u64,
    timeout_secs: u64,
    started_at: Option<Instant>,
}

impl UpgradeHostsStep {
    pub fn new(hosts: Vec<String>, to_release: String, wait_secs: u64, timeout_secs: u64) -> Self {
        Self {
            hosts,
            to_release,
            wait_secs,
            timeout_secs,
            started_at: None,
        }
    }

    pub fn from_record(record: &StepRecord) -> Self {
        Self::new(
            record.get("entity_names", Vec::new()),
            record.get("to_release", String::new()),
            record.get("wait_secs", 120),
            record.get("timeout", 1800),
        )
    }
}

#[async_trait]
impl Step for UpgradeHostsStep {
    fn kind(&self) -> &'static str {
        "upgrade-hosts"
    }

    fn entity_names(&self) -> Vec<String> {
        self.hosts.clone()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(self.timeout_secs)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        self.started_at.get_or_insert(ctx.now);
        match ctx.driver.upgrade_hosts(&self.hosts).await {
            Ok(op) if op.is_failed() => StepOutcome::Failed(op.reason().to_string()),
            Ok(_) => StepOutcome::Wait,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    async fn handle_event(&mut self, ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
        match event {
            Event::HostUpgradeFailed { host_name, reason } if self.hosts.contains(host_name) => {
                Some(StepOutcome::Failed(format!("upgrade-hosts: {host_name}: {reason}")))
            }
            Event::HostAudit => {
                if !elapsed_since(self.started_at, ctx.now, self.wait_secs) {
                    return None;
                }
                for name in &self.hosts {
                    match ctx.inventory.hosts.get(name).await {
                        None => return Some(StepOutcome::Failed(format!("upgrade-hosts: {name} missing from inventory"))),
                        Some(h) => {
                            let ready = h.is_online()
                                && h.target_load == self.to_release
                                && h.software_load == self.to_release;
                            if !ready {
                                return None;
                            }
                        }
                    }
                }
                Some(StepOutcome::Success)
            }
            _ => None,
        }
    }

    fn to_record(&self) -> StepRecord {
        let mut r = StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        };
        r.set("entity_names", self.hosts.clone());
        r.set("to_release", self.to_release.clone());
        r.set("wait_secs", self.wait_secs);
        r.set("timeout", self.timeout_secs);
        r
    }
}
