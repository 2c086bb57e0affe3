//! Strategy: the top-level plan a Builder produces and the Controller
//! drives to a terminal status (§2, §4.1).

pub mod registry;
pub mod stage;
pub mod step;

use crate::config::{StrategyKind, StrategyKnobs};
use serde::{Deserialize, Serialize};
use stage::{Stage, StageResult};
use std::sync::Arc;
use step::Workspace;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyStatus {
    Building,
    ReadyToApply,
    Applying,
    Aborting,
    Applied,
    Failed,
    Aborted,
}

/// A strategy: the ordered stages a Builder produced for one knob set,
/// plus the rolling state the Controller and steps need while driving
/// it.
pub struct Strategy {
    pub kind: StrategyKind,
    pub knobs: StrategyKnobs,
    pub status: StrategyStatus,
    pub stages: Vec<Stage>,
    pub current_stage: usize,
    pub workspace: Arc<RwLock<Workspace>>,
    pub reason: Option<String>,
}

impl Strategy {
    pub fn new(kind: StrategyKind, knobs: StrategyKnobs, stages: Vec<Stage>) -> Self {
        Self {
            kind,
            knobs,
            status: StrategyStatus::ReadyToApply,
            stages,
            current_stage: 0,
            workspace: Arc::new(RwLock::new(Workspace::default())),
            reason: None,
        }
    }

    pub fn current_stage(&self) -> Option<&Stage> {
        self.stages.get(self.current_stage)
    }

    pub fn current_stage_mut(&mut self) -> Option<&mut Stage> {
        self.stages.get(self.current_stage)?;
        self.stages.get_mut(self.current_stage)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            StrategyStatus::Applied | StrategyStatus::Failed | StrategyStatus::Aborted
        )
    }

    /// Advance past a stage that just finished; folds its result into
    /// strategy status. Called by the controller, never by a stage
    /// itself. A stage finishing while the strategy is `Aborting`
    /// always lands on `Aborted`, win or lose — compensation is
    /// best-effort, not itself retried.
    pub fn stage_finished(&mut self, result: StageResult) {
        let aborting = matches!(self.status, StrategyStatus::Aborting);
        match result {
            StageResult::Success => {
                self.current_stage += 1;
                if self.current_stage >= self.stages.len() {
                    self.status = if aborting {
                        StrategyStatus::Aborted
                    } else {
                        StrategyStatus::Applied
                    };
                }
            }
            StageResult::Failed(reason) => {
                self.status = if aborting {
                    StrategyStatus::Aborted
                } else {
                    StrategyStatus::Failed
                };
                self.reason = Some(reason);
            }
        }
    }
}
