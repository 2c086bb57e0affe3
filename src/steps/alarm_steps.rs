//! `system-stabilize`, `query-alarms`, `wait-data-sync`,
//! `wait-alarms-clear` (§4.2).

use super::elapsed_since;
use crate::config::AlarmRestrictions;
use crate::strategy::step::{Event, Step, StepContext, StepOutcome, StepRecord};
use async_trait::async_trait;
use std::time::Instant;

fn passes_restrictions(alarm: &crate::types::Alarm, restrictions: AlarmRestrictions) -> bool {
    if matches!(restrictions, AlarmRestrictions::Relaxed) && alarm.mgmt_affecting == "False" {
        return false;
    }
    true
}

fn residual_alarms(
    alarms: &[crate::types::Alarm],
    ignore_list: &[String],
    restrictions: AlarmRestrictions,
) -> Vec<String> {
    alarms
        .iter()
        .filter(|a| !ignore_list.contains(&a.alarm_id))
        .filter(|a| passes_restrictions(a, restrictions))
        .map(|a| a.alarm_id.clone())
        .collect()
}

/// Waits a fixed window, failing immediately if anything changes
/// underneath it. Its `timeout()` override is the one exception to
/// "default fail": elapsing the window cleanly is success.
pub struct SystemStabilizeStep {
    timeout_secs: u64,
    started_at: Option<Instant>,
}

impl SystemStabilizeStep {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            started_at: None,
        }
    }

    pub fn from_record(record: &StepRecord) -> Self {
        Self::new(record.get("timeout", 60))
    }
}

#[async_trait]
impl Step for SystemStabilizeStep {
    fn kind(&self) -> &'static str {
        "system-stabilize"
    }

    fn entity_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(self.timeout_secs)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        self.started_at.get_or_insert(ctx.now);
        StepOutcome::Wait
    }

    async fn handle_event(&mut self, _ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
        match event {
            Event::HostStateChanged { host_name } => Some(StepOutcome::Failed(format!(
                "host {host_name} changed state during system-stabilize"
            ))),
            Event::InstanceStateChanged { instance_uuid } => Some(StepOutcome::Failed(format!(
                "instance {instance_uuid} changed state during system-stabilize"
            ))),
            _ => None,
        }
    }

    fn timeout(&mut self) -> StepOutcome {
        StepOutcome::Success
    }

    fn to_record(&self) -> StepRecord {
        let mut r = StepRecord {
            name: self.kind().to_string(),
            fields: Default::default(),
        };
        r.set("timeout", self.timeout_secs);
        r
    }
}

/// Queries both platform and OpenStack alarms, filters them, and
/// resolves synchronously — there is no polling here, only
/// `wait-data-sync`/`wait-alarms-clear` poll.
pub struct QueryAlarmsStep {
    timeout_secs: u64,
    fail_on_alarms: bool,
    alarm_restrictions: AlarmRestrictions,
    ignore_list: Vec<String>,
}

impl QueryAlarmsStep {
    pub fn new(
        timeout_secs: u64,
        fail_on_alarms: bool,
        alarm_restrictions: AlarmRestrictions,
        ignore_list: Vec<String>,
    ) -> Self {
        Self {
            timeout_secs,
            fail_on_alarms,
            alarm_restrictions,
            ignore_list,
        }
    }

    pub fn from_record(record: &StepRecord) -> Self {
        Self::new(
            record.get("timeout", 60),
            record.get("fail_on_alarms", true),
            record.get("alarm_restrictions", AlarmRestrictions::Strict),
            record.get("ignore_list", Vec::new()),
        )
    }
}

#[async_trait]
impl Step for QueryAlarmsStep {
    fn kind(&self) -> &'static str {
        "query-alarms"
    }

    fn entity_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn timeout_secs(&self) -> Option<u64> {
        Some(self.timeout_secs)
    }

    async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
        let platform = match ctx.driver.get_alarms().await {
            Ok(c) if c.completed => c.result_data,
            Ok(c) => return StepOutcome::Failed(c.reason),
            Err(e) => return StepOutcome::Failed(e.to_string()),
        };
        let openstack = match ctx.driver.get_openstack_alarms().await {
            Ok(c) if c.completed => c.result_data,
            Ok(c) => return StepOutcome::Failed(c.reason),
            Err(e) => return StepOutcome::Failed(e.to_string()),
        };
        let mut all = platform;
        all.extend(openstack);
        let residual = residual_alarms(&all, &self.ignore_list, self.alarm_restrictions);
        ctx.workspace.write().await.nfvi_alarms = Some(all);
        if self.fail_on_alarms && !residual.is_empty() {
            StepOutcome::Failed(format!("active alarms: {}", residual.join(", ")))
        } else {
            StepOutcome::Success
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
        r.set("timeout", self.timeout_secs);
        r.set("fail_on_alarms", self.fail_on_alarms);
        r.set("alarm_restrictions", self.alarm_restrictions);
        r.set("ignore_list", self.ignore_list.clone());
        r
    }
}

struct WaitAlarmsPoll {
    first_query_delay_secs: u64,
    timeout_secs: u64,
    alarm_restrictions: AlarmRestrictions,
    ignore_list: Vec<String>,
    started_at: Option<Instant>,
    query_inprogress: bool,
}

impl WaitAlarmsPoll {
    fn from_record(record: &StepRecord, default_delay: u64, default_timeout: u64) -> Self {
        Self {
            first_query_delay_secs: record.get("first_query_delay_secs", default_delay),
            timeout_secs: record.get("timeout", default_timeout),
            alarm_restrictions: record.get("alarm_restrictions", AlarmRestrictions::Strict),
            ignore_list: record.get("ignore_list", Vec::new()),
            started_at: None,
            query_inprogress: false,
        }
    }

    fn to_fields(&self, r: &mut StepRecord) {
        r.set("first_query_delay_secs", self.first_query_delay_secs);
        r.set("timeout", self.timeout_secs);
        r.set("alarm_restrictions", self.alarm_restrictions);
        r.set("ignore_list", self.ignore_list.clone());
    }

    async fn poll(&mut self, ctx: &StepContext) -> Option<StepOutcome> {
        if self.query_inprogress {
            return None;
        }
        self.query_inprogress = true;
        let result = ctx.driver.get_alarms().await;
        self.query_inprogress = false;
        match result {
            Ok(c) if c.completed => {
                let residual = residual_alarms(&c.result_data, &self.ignore_list, self.alarm_restrictions);
                ctx.workspace.write().await.nfvi_alarms = Some(c.result_data);
                if residual.is_empty() {
                    Some(StepOutcome::Success)
                } else {
                    None
                }
            }
            Ok(c) => Some(StepOutcome::Failed(c.reason)),
            Err(e) => Some(StepOutcome::Failed(e.to_string())),
        }
    }
}

macro_rules! wait_alarms_step {
    ($name:ident, $kind:literal, $default_delay:expr, $default_timeout:expr) => {
        pub struct $name(WaitAlarmsPoll);

        impl $name {
            pub fn from_record(record: &StepRecord) -> Self {
                Self(WaitAlarmsPoll::from_record(record, $default_delay, $default_timeout))
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
                Some(self.0.timeout_secs)
            }

            async fn apply(&mut self, ctx: &StepContext) -> StepOutcome {
                self.0.started_at.get_or_insert(ctx.now);
                StepOutcome::Wait
            }

            async fn handle_event(&mut self, ctx: &StepContext, event: &Event) -> Option<StepOutcome> {
                if !matches!(event, Event::HostAudit) {
                    return None;
                }
                if !elapsed_since(self.0.started_at, ctx.now, self.0.first_query_delay_secs) {
                    return None;
                }
                self.0.poll(ctx).await
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
    };
}

wait_alarms_step!(WaitDataSyncStep, "wait-data-sync", 60, 300);
wait_alarms_step!(WaitAlarmsClearStep, "wait-alarms-clear", 60, 300);
