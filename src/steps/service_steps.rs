//! `disable-host-services`, `enable-host-services` (§4.2).

use crate::strategy::step::{Event, Step, StepContext, StepOutcome, StepRecord};
use crate::types::HostServiceState;
use async_trait::async_trait;

async fn all_reached(ctx: &StepContext, hosts: &[String], target: HostServiceState) -> bool {
    for name in hosts {
        match ctx.inventory.hosts.get(name).await {
            Some(h) if h.host_service_state == target => {}
            _ => return false,
        }
    }
    true
}

macro_rules! host_service_step {
    ($name:ident, $kind:literal, $failed_event:ident, $driver_call:ident, $target:expr $(, abort: $abort:expr)?) => {
        pub struct $name {
            hosts: Vec<String>,
            service: String,
            timeout_secs: u64,
        }

        impl $name {
            pub fn new(hosts: Vec<String>, service: String, timeout_secs: u64) -> Self {
                Self {
                    hosts,
                    service,
                    timeout_secs,
                }
            }

            pub fn from_record(record: &StepRecord) -> Self {
                Self::new(
                    record.get("entity_names", Vec::new()),
                    record.get("service", String::new()),
                    record.get("timeout", 300),
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
                match ctx.driver.$driver_call(&self.hosts, &self.service).await {
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
                    Event::HostAudit | Event::HostStateChanged { .. } => {
                        all_reached(ctx, &self.hosts, $target).await.then_some(StepOutcome::Success)
                    }
                    _ => None,
                }
            }

            $(
            fn abort_chain(&self) -> Vec<Box<dyn Step>> {
                let make: fn(Vec<String>, String, u64) -> Box<dyn Step> = $abort;
                vec![make(self.hosts.clone(), self.service.clone(), self.timeout_secs)]
            }
            )?

            fn to_record(&self) -> StepRecord {
                let mut r = StepRecord {
                    name: self.kind().to_string(),
                    fields: Default::default(),
                };
                r.set("entity_names", self.hosts.clone());
                r.set("service", self.service.clone());
                r.set("timeout", self.timeout_secs);
                r
            }
        }
    };
}

host_service_step!(
    DisableHostServicesStep,
    "disable-host-services",
    DisableHostServicesFailed,
    disable_host_services,
    HostServiceState::Disabled,
    abort: |hosts, service, timeout| Box::new(EnableHostServicesStep::new(hosts, service, timeout))
);

host_service_step!(
    EnableHostServicesStep,
    "enable-host-services",
    EnableHostServicesFailed,
    enable_host_services,
    HostServiceState::Enabled
);
