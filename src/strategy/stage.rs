//! A Stage: a strictly-sequential run of steps (§4.1).

use super::step::{Step, StepOutcome};
use serde::{Deserialize, Serialize};

/// Result of a finished stage, surfaced to the strategy controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageResult {
    Success,
    Failed(String),
}

/// An ordered run of steps. Steps execute strictly in order; the stage
/// is done the moment one step fails, or once every step has
/// succeeded.
pub struct Stage {
    pub name: String,
    pub steps: Vec<Box<dyn Step>>,
    current: usize,
    pub result: Option<StageResult>,
}

impl Stage {
    pub fn new(name: impl Into<String>, steps: Vec<Box<dyn Step>>) -> Self {
        Self {
            name: name.into(),
            steps,
            current: 0,
            result: None,
        }
    }

    /// Rebuild a stage from its persisted form (§10.4): steps already
    /// deserialized via the registry, `current`/`result` restored
    /// verbatim so a reloaded strategy resumes exactly where it left
    /// off.
    pub fn from_parts(
        name: impl Into<String>,
        steps: Vec<Box<dyn Step>>,
        current: usize,
        result: Option<StageResult>,
    ) -> Self {
        Self {
            name: name.into(),
            steps,
            current,
            result,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }

    pub fn current_step(&self) -> Option<&dyn Step> {
        self.steps.get(self.current).map(|s| s.as_ref())
    }

    pub fn current_step_mut(&mut self) -> Option<&mut Box<dyn Step>> {
        self.steps.get_mut(self.current)
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Record the outcome of the current step. `Success` advances to
    /// the next step (or completes the stage if this was the last);
    /// `Failed` completes the stage with that reason. Called by the
    /// controller after `apply`/`handle_event`/`timeout` report a
    /// terminal outcome, and directly by steps that finish
    /// synchronously inside their own `apply`.
    pub fn step_complete(&mut self, outcome: StepOutcome) {
        if self.result.is_some() {
            return;
        }
        match outcome {
            StepOutcome::Success => {
                self.current += 1;
                if self.current >= self.steps.len() {
                    self.result = Some(StageResult::Success);
                }
            }
            StepOutcome::Failed(reason) => {
                self.result = Some(StageResult::Failed(reason));
            }
            StepOutcome::Wait => {}
        }
    }

    /// Every step that has already reached `Success` in this stage, in
    /// application order — the set a strategy abort must compensate.
    pub fn completed_steps(&self) -> &[Box<dyn Step>] {
        &self.steps[..self.current.min(self.steps.len())]
    }
}
