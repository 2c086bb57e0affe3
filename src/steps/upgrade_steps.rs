//! `start-upgrade`, `activate-upgrade`, `complete-upgrade`,
//! `query-upgrade` (§4.2).

use super::elapsed_since;
use crate::driver::UpgradeState;
use crate::strategy::step::{Event, Step, StepContext, StepOutcome, StepRecord};
use async_trait::async_trait;
use std::time::Instant;

macro_rules! upgrade_lifecycle_step {
    ($name:ident, $kind:literal, $driver_call:ident, $is_target:expr) => {
        pub struct $name {
            poll_secs: u64,
            timeout_secs: u64,
            started_at: Option<Instant>,
        }

        impl $name {
            pub fn new(poll_secs: u64, timeout_secs: u64) -> Self {
                Self {
                    poll_secs,
                    timeout_secs,
                    started_at: None,
                }
            }

            pub fn from_record(record: &StepRecord) -> Self {
                Self::new(record.get("poll_secs", 60), record.get("timeout", 1800))
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
                if !matches!(event, Event::HostAudit) {
                    return None;
                }
                if !elapsed_since(self.started_at, ctx.now, self.poll_secs) {
                    return None;
                }
                match ctx.driver.get_upgrade().await {
                    Ok(c) if c.completed => {
                        let record = c.result_data;
                        let reached: bool = ($is_target)(&record);
                        ctx.workspace.write().await.nfvi_upgrade = record;
                        reached.then_some(StepOutcome::Success)
                    }
                    Ok(c) => Some(StepOutcome::Failed(c.reason)),
                    Err(e) => Some(StepOutcome::Failed(e.to_string())),
                }
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

upgrade_lifecycle_step!(StartUpgradeStep, "start-upgrade", upgrade_start, |record: &Option<
    crate::driver::UpgradeRecord,
>| matches!(record, Some(u) if u.state == UpgradeState::Started));

upgrade_lifecycle_step!(
    ActivateUpgradeStep,
    "activate-upgrade",
    upgrade_activate,
    |record: &Option<crate::driver::UpgradeRecord>| matches!(
        record,
        Some(u) if u.state == UpgradeState::ActivationComplete
    )
);

upgrade_lifecycle_step!(
    CompleteUpgradeStep,
    "complete-upgrade",
    upgrade_complete,
    |record: &Option<crate::driver::UpgradeRecord>| record.is_none()
);

pub struct QueryUpgradeStep;

impl QueryUpgradeStep {
    pub fn from_record(_record: &StepRecord) -> Self {
        Self
    }
}

#[async_trait]
impl Step for QueryUpgradeStep {
    fn kind(&self) -> &'static str {
        "query-upgrade"
    }

    fn entity_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(60)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        match ctx.driver.get_upgrade().await {
            Ok(c) if c.completed => {
                ctx.workspace.write().await.nfvi_upgrade = c.result_data;
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
