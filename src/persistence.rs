//! Strategy persistence (§10.4): a strategy's entire state — stages,
//! current position, workspace — round-trips through `serde_json`
//! losslessly enough to resume after a process restart. Steps never
//! serialize themselves directly; `StepRecord` is the only wire format,
//! kept version-tolerant by `StepRecord::get`'s default-on-miss.

use crate::config::{StrategyKind, StrategyKnobs};
use crate::error::{Error, Result};
use crate::strategy::stage::{Stage, StageResult};
use crate::strategy::step::Workspace;
use crate::strategy::registry::deserialize_step;
use crate::strategy::{Strategy, StrategyStatus};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStage {
    name: String,
    current: usize,
    result: Option<StageResult>,
    steps: Vec<crate::strategy::step::StepRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStrategy {
    kind: StrategyKind,
    knobs: StrategyKnobs,
    status: StrategyStatus,
    current_stage: usize,
    reason: Option<String>,
    workspace: Workspace,
    stages: Vec<PersistedStage>,
}

/// Serialize a strategy to the JSON form written to disk.
pub fn to_json(strategy: &Strategy, workspace: &Workspace) -> Result<serde_json::Value> {
    let stages = strategy
        .stages
        .iter()
        .map(|stage| PersistedStage {
            name: stage.name.clone(),
            current: stage.current_index(),
            result: stage.result.clone(),
            steps: stage.steps.iter().map(|s| s.to_record()).collect(),
        })
        .collect();
    let persisted = PersistedStrategy {
        kind: strategy.kind,
        knobs: strategy.knobs.clone(),
        status: strategy.status,
        current_stage: strategy.current_stage,
        reason: strategy.reason.clone(),
        workspace: workspace.clone(),
        stages,
    };
    serde_json::to_value(persisted).map_err(|e| Error::Persistence(e.to_string()))
}

/// Rebuild a strategy (and its workspace) from a previously-serialized
/// form. Every step is rebuilt via the registry, never by deserializing
/// a `Box<dyn Step>` directly.
pub fn from_json(value: serde_json::Value) -> Result<Strategy> {
    let persisted: PersistedStrategy =
        serde_json::from_value(value).map_err(|e| Error::Persistence(e.to_string()))?;
    let stages = persisted
        .stages
        .into_iter()
        .map(|ps| {
            let steps = ps.steps.iter().map(deserialize_step).collect::<Result<Vec<_>>>()?;
            Ok(Stage::from_parts(ps.name, steps, ps.current, ps.result))
        })
        .collect::<Result<Vec<Stage>>>()?;
    Ok(Strategy {
        kind: persisted.kind,
        knobs: persisted.knobs,
        status: persisted.status,
        stages,
        current_stage: persisted.current_stage,
        workspace: Arc::new(RwLock::new(persisted.workspace)),
        reason: persisted.reason,
    })
}

/// File-backed store: one JSON file per strategy kind under
/// `storage_path`, named after the kind's wire string (e.g.
/// `sw-patch.json`). There is at most one active strategy per kind
/// (§6), so the kind is a sufficient key.
pub struct StrategyStore {
    dir: PathBuf,
}

impl StrategyStore {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self { dir: storage_path.into() }
    }

    fn path_for(&self, kind: StrategyKind) -> PathBuf {
        self.dir.join(format!("{}.json", kind.as_str()))
    }

    pub async fn save(&self, strategy: &Strategy) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Persistence(e.to_string()))?;
        let workspace = strategy.workspace.read().await.clone();
        let value = to_json(strategy, &workspace)?;
        let body = serde_json::to_vec_pretty(&value).map_err(|e| Error::Persistence(e.to_string()))?;
        let path = self.path_for(strategy.kind);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| Error::Persistence(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Persistence(e.to_string()))
    }

    pub async fn load(&self, kind: StrategyKind) -> Result<Option<Strategy>> {
        let path = self.path_for(kind);
        if !Path::new(&path).exists() {
            return Ok(None);
        }
        let body = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Persistence(e.to_string()))?;
        let value: serde_json::Value =
            serde_json::from_slice(&body).map_err(|e| Error::Persistence(e.to_string()))?;
        from_json(value).map(Some)
    }

    pub async fn delete(&self, kind: StrategyKind) -> Result<()> {
        let path = self.path_for(kind);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Persistence(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlarmRestrictions, ApplyType, InstanceAction};
    use crate::strategy::step::StepRecord;
    use proptest::prelude::*;

    fn knobs() -> StrategyKnobs {
        StrategyKnobs {
            controller_apply_type: ApplyType::Serial,
            storage_apply_type: ApplyType::Ignore,
            worker_apply_type: ApplyType::Parallel,
            max_parallel_worker_hosts: 2,
            instance_action: InstanceAction::Migrate,
            alarm_restrictions: AlarmRestrictions::Strict,
            to_version: None,
            force: false,
        }
    }

    #[tokio::test]
    async fn round_trips_through_json() {
        let mut record = StepRecord {
            name: "system-stabilize".to_string(),
            fields: Default::default(),
        };
        record.set("timeout", 60u64);
        let step = deserialize_step(&record).unwrap();
        let stage = Stage::new("prelude", vec![step]);
        let strategy = crate::strategy::Strategy::new(StrategyKind::SwPatch, knobs(), vec![stage]);

        let workspace = strategy.workspace.read().await.clone();
        let value = to_json(&strategy, &workspace).unwrap();
        let restored = from_json(value).unwrap();

        assert_eq!(restored.kind, StrategyKind::SwPatch);
        assert_eq!(restored.stages.len(), 1);
        assert_eq!(restored.stages[0].steps[0].kind(), "system-stabilize");
    }

    #[tokio::test]
    async fn store_save_load_delete_round_trip() {
        let tmp = std::env::temp_dir().join(format!("fleet-update-orchestrator-test-{}", std::process::id()));
        let store = StrategyStore::new(tmp.clone());
        let stage = Stage::new("prelude", vec![]);
        let strategy = crate::strategy::Strategy::new(StrategyKind::FwUpdate, knobs(), vec![stage]);

        store.save(&strategy).await.unwrap();
        let loaded = store.load(StrategyKind::FwUpdate).await.unwrap();
        assert!(loaded.is_some());
        assert!(store.load(StrategyKind::SwUpgrade).await.unwrap().is_none());

        store.delete(StrategyKind::FwUpdate).await.unwrap();
        assert!(store.load(StrategyKind::FwUpdate).await.unwrap().is_none());
        let _ = std::fs::remove_dir_all(&tmp);
    }

    proptest! {
        /// `system-stabilize`'s `timeout` field round-trips through a
        /// full strategy serialize/deserialize cycle for any value —
        /// the version-tolerance `StepRecord::get` exists for is about
        /// fields a record doesn't have, not ones it does.
        #[test]
        fn system_stabilize_timeout_round_trips(timeout in 1u64..100_000) {
            let mut record = StepRecord {
                name: "system-stabilize".to_string(),
                fields: Default::default(),
            };
            record.set("timeout", timeout);
            let step = deserialize_step(&record).unwrap();
            let stage = Stage::new("prelude", vec![step]);
            let strategy = crate::strategy::Strategy::new(StrategyKind::SwPatch, knobs(), vec![stage]);

            let value = to_json(&strategy, &Workspace::default()).unwrap();
            let restored = from_json(value).unwrap();
            prop_assert_eq!(restored.stages[0].steps[0].to_record().get("timeout", 0u64), timeout);
        }
    }
}
