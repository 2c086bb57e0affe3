//! The Step Library: one concrete `Step` implementation per kind in
//! §4.2's table, grouped by the entity they act on.

pub mod alarm_steps;
pub mod fw_steps;
pub mod host_steps;
pub mod instance_steps;
pub mod kube_steps;
pub mod patch_steps;
pub mod service_steps;
pub mod upgrade_steps;

use crate::strategy::step::StepOutcome;
use std::time::{Duration, Instant};

/// Has `timeout_secs` elapsed since `started_at` against `now`? A step
/// with no `started_at` yet (first `apply`) has never timed out.
pub(crate) fn elapsed_since(started_at: Option<Instant>, now: Instant, secs: u64) -> bool {
    started_at.is_some_and(|t| now.duration_since(t) >= Duration::from_secs(secs))
}

/// `Wait` unless every name in `targets` satisfies `pred`, in which
/// case `Success`. Used by the many steps whose completion rule is
/// "all targets reached state X".
pub(crate) fn outcome_when_all<'a, I>(targets: I, mut pred: impl FnMut(&str) -> bool) -> StepOutcome
where
    I: IntoIterator<Item = &'a String>,
{
    if targets.into_iter().all(|h| pred(h)) {
        StepOutcome::Success
    } else {
        StepOutcome::Wait
    }
}
