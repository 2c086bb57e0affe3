//! Stage/Strategy Controller: drives one strategy's current step to
//! terminal, advance, or compensate (§4.1).
//!
//! Holds no thread of its own — it is driven by whoever owns the event
//! loop (the HTTP handlers and a periodic audit task in this crate's
//! case, see `api`). Multiple controllers, one per active strategy
//! kind, can share that loop; each only ever touches its own strategy.

use crate::driver::PlatformDriver;
use crate::error::{Error, Result};
use crate::inventory::Inventory;
use crate::strategy::stage::Stage;
use crate::strategy::step::{Event, Step, StepContext};
use crate::strategy::{Strategy, StrategyStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct StrategyController {
    pub strategy: Strategy,
    driver: Arc<dyn PlatformDriver>,
    inventory: Inventory,
    current_step_deadline: Option<Instant>,
}

impl StrategyController {
    pub fn new(strategy: Strategy, driver: Arc<dyn PlatformDriver>, inventory: Inventory) -> Self {
        Self {
            strategy,
            driver,
            inventory,
            current_step_deadline: None,
        }
    }

    fn ctx(&self, now: Instant) -> StepContext {
        StepContext {
            driver: Arc::clone(&self.driver),
            inventory: self.inventory.clone(),
            workspace: Arc::clone(&self.strategy.workspace),
            now,
        }
    }

    /// `ready-to-apply → applying`; begins stage 0, step 0.
    pub async fn apply(&mut self, now: Instant) -> Result<()> {
        if !matches!(self.strategy.status, StrategyStatus::ReadyToApply) {
            return Err(Error::Conflict(
                "strategy is not ready-to-apply".to_string(),
            ));
        }
        self.strategy.status = StrategyStatus::Applying;
        self.strategy.current_stage = 0;
        info!(kind = %self.strategy.kind.as_str(), "strategy ready-to-apply -> applying");
        self.drive(now).await;
        Ok(())
    }

    /// Explicit resume from a stage index.
    pub async fn apply_stage(&mut self, stage_id: usize, now: Instant) -> Result<()> {
        if !matches!(
            self.strategy.status,
            StrategyStatus::Applying | StrategyStatus::ReadyToApply
        ) {
            return Err(Error::Conflict(format!(
                "cannot apply-stage while strategy is {:?}",
                self.strategy.status
            )));
        }
        if stage_id >= self.strategy.stages.len() {
            return Err(Error::NotFound(format!("stage {stage_id}")));
        }
        self.strategy.status = StrategyStatus::Applying;
        self.strategy.current_stage = stage_id;
        self.drive(now).await;
        Ok(())
    }

    /// Transition to `aborting`; schedule the abort chain of every
    /// already-applied step, in reverse stage order, as a single
    /// compensation stage.
    pub async fn abort(&mut self, stage_id: Option<usize>, now: Instant) -> Result<()> {
        // `Failed` is not excluded here: compensating a strategy that
        // failed mid-apply is the whole point of an abort chain. Only
        // an already-successful or already-compensated strategy has
        // nothing left to abort.
        if matches!(self.strategy.status, StrategyStatus::Applied | StrategyStatus::Aborted) {
            return Err(Error::Conflict("strategy already terminal".to_string()));
        }
        let upto = stage_id.unwrap_or(self.strategy.current_stage);
        let mut compensations: Vec<Box<dyn Step>> = Vec::new();
        for stage in self.strategy.stages[..=upto.min(self.strategy.stages.len().saturating_sub(1))]
            .iter()
            .rev()
        {
            // The stage's current step — whether still running, or the
            // one whose failure ended the stage — may itself have
            // partially applied (e.g. a multi-host batch step where
            // some hosts finished before the rest); compensate it ahead
            // of the stage's already-succeeded steps. A step that
            // already succeeded and rolled the stage forward is covered
            // by `completed_steps` instead, not here.
            if let Some(step) = stage.current_step() {
                compensations.extend(step.abort_chain());
            }
            for step in stage.completed_steps().iter().rev() {
                compensations.extend(step.abort_chain());
            }
        }
        self.strategy.status = StrategyStatus::Aborting;
        info!(kind = %self.strategy.kind.as_str(), stage = upto, "strategy aborting");
        if compensations.is_empty() {
            self.strategy.status = StrategyStatus::Aborted;
            return Ok(());
        }
        self.strategy.stages = vec![Stage::new("abort", compensations)];
        self.strategy.current_stage = 0;
        self.drive(now).await;
        Ok(())
    }

    /// Route an event to the current step.
    pub async fn handle_event(&mut self, event: Event, now: Instant) {
        if !matches!(
            self.strategy.status,
            StrategyStatus::Applying | StrategyStatus::Aborting
        ) {
            return;
        }
        let ctx = self.ctx(now);
        let stage_idx = self.strategy.current_stage;
        let outcome = {
            let Some(stage) = self.strategy.stages.get_mut(stage_idx) else {
                return;
            };
            if stage.is_complete() {
                return;
            }
            let Some(step) = stage.current_step_mut() else {
                return;
            };
            step.handle_event(&ctx, &event).await
        };
        if let Some(outcome) = outcome {
            self.current_step_deadline = None;
            if self.apply_outcome(stage_idx, outcome) {
                self.drive(now).await;
            }
        }
    }

    /// Compare the current step's deadline against monotonic time.
    pub async fn tick(&mut self, now: Instant) {
        if !matches!(
            self.strategy.status,
            StrategyStatus::Applying | StrategyStatus::Aborting
        ) {
            return;
        }
        let Some(deadline) = self.current_step_deadline else {
            return;
        };
        if now < deadline {
            return;
        }
        let stage_idx = self.strategy.current_stage;
        let outcome = {
            let Some(stage) = self.strategy.stages.get_mut(stage_idx) else {
                return;
            };
            if stage.is_complete() {
                return;
            }
            let Some(step) = stage.current_step_mut() else {
                return;
            };
            step.timeout()
        };
        self.current_step_deadline = None;
        if self.apply_outcome(stage_idx, outcome) {
            self.drive(now).await;
        }
    }

    /// Fold a step outcome into its stage/strategy. Returns whether
    /// the drive loop should keep advancing (i.e. the outcome was
    /// terminal, not `Wait`).
    fn apply_outcome(&mut self, stage_idx: usize, outcome: crate::strategy::step::StepOutcome) -> bool {
        if matches!(outcome, crate::strategy::step::StepOutcome::Wait) {
            return false;
        }
        let Some(stage) = self.strategy.stages.get_mut(stage_idx) else {
            return false;
        };
        if let crate::strategy::step::StepOutcome::Failed(reason) = &outcome {
            warn!(stage = %stage.name, %reason, "step failed");
        } else {
            debug!(stage = %stage.name, "step succeeded");
        }
        stage.step_complete(outcome);
        if let Some(result) = stage.result.clone() {
            if matches!(result, crate::strategy::stage::StageResult::Failed(_)) {
                warn!(stage = %stage.name, "stage failed");
            } else {
                debug!(stage = %stage.name, "stage complete");
            }
            self.strategy.stage_finished(result);
            if self.strategy.is_terminal() {
                info!(kind = %self.strategy.kind.as_str(), status = ?self.strategy.status, "strategy reached terminal status");
            }
        }
        true
    }

    /// Call `apply` on the current step, and keep doing so across
    /// stage/step boundaries as long as steps resolve synchronously
    /// (`Success`/`Failed`); stops the moment a step reports `Wait` or
    /// the strategy reaches a terminal status.
    async fn drive(&mut self, now: Instant) {
        loop {
            if self.strategy.is_terminal() {
                self.current_step_deadline = None;
                return;
            }
            let stage_idx = self.strategy.current_stage;
            let ctx = self.ctx(now);
            let outcome = {
                let Some(stage) = self.strategy.stages.get_mut(stage_idx) else {
                    return;
                };
                if stage.is_complete() {
                    return;
                }
                let Some(step) = stage.current_step_mut() else {
                    return;
                };
                self.current_step_deadline = step.timeout_secs().map(|s| now + Duration::from_secs(s));
                step.apply(&ctx).await
            };
            if !self.apply_outcome(stage_idx, outcome) {
                return;
            }
        }
    }
}
