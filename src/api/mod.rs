//! Strategy REST surface (§6): a thin translation layer over the
//! Stage/Strategy Controller, one controller per active strategy kind.
//!
//! `AppState` holds the shared, lockable state every handler needs;
//! `rest_api` wires it to `warp` filters. No orchestration logic lives
//! in the HTTP layer itself — it only validates requests, drives a
//! controller, and persists the result.

pub mod rest_api;

use crate::builders::{self, Fleet};
use crate::config::{Config, StrategyKind, StrategyKnobs};
use crate::controller::StrategyController;
use crate::driver::PlatformDriver;
use crate::error::{Error, Result};
use crate::inventory::Inventory;
use crate::persistence::StrategyStore;
use crate::strategy::step::Event;
use crate::strategy::Strategy;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// An action accepted by `POST .../strategy/actions` (§6).
#[derive(Debug, Clone)]
pub enum StrategyAction {
    ApplyAll,
    ApplyStage(usize),
    Abort,
    AbortStage(usize),
}

/// Everything a handler needs: config, driver, inventory, the
/// persistence boundary, and at most one controller per strategy kind.
/// Controllers are created on `create` and dropped on `delete`; the
/// lock only ever guards the map, never a single controller's own
/// `.await` (the controller methods take `&mut self` and are called
/// with the map lock held for their whole duration, matching §5's "no
/// concurrent drive of the same strategy").
pub struct AppState {
    pub config: Config,
    pub driver: Arc<dyn PlatformDriver>,
    pub inventory: Inventory,
    pub store: Arc<StrategyStore>,
    controllers: RwLock<HashMap<StrategyKind, StrategyController>>,
}

impl AppState {
    pub fn new(config: Config, driver: Arc<dyn PlatformDriver>, inventory: Inventory) -> Self {
        let store = Arc::new(StrategyStore::new(config.storage_path.clone()));
        Self {
            config,
            driver,
            inventory,
            store,
            controllers: RwLock::new(HashMap::new()),
        }
    }

    /// Load any strategies persisted from a previous run into their
    /// controllers. Called once at startup (§10.4).
    pub async fn restore(&self) -> Result<()> {
        let kinds = [
            StrategyKind::SwPatch,
            StrategyKind::SwUpgrade,
            StrategyKind::FwUpdate,
            StrategyKind::KubeUpgrade,
            StrategyKind::KubeRootcaUpdate,
        ];
        let mut controllers = self.controllers.write().await;
        for kind in kinds {
            if let Some(strategy) = self.store.load(kind).await? {
                controllers.insert(
                    kind,
                    StrategyController::new(strategy, Arc::clone(&self.driver), self.inventory.clone()),
                );
            }
        }
        Ok(())
    }

    /// `GET /orchestration/<kind>` (§6): the description document is
    /// static per kind, so it never needs the controller map.
    pub fn describe(&self, kind: StrategyKind) -> serde_json::Value {
        let id = kind.as_str();
        serde_json::json!({
            "id": id,
            "links": [
                {"rel": "self", "href": format!("/orchestration/{id}")},
                {"rel": "strategy", "href": format!("/orchestration/{id}/strategy")},
            ],
        })
    }

    /// `GET /orchestration/<kind>/strategy`.
    pub async fn show(&self, kind: StrategyKind) -> Result<serde_json::Value> {
        let controllers = self.controllers.read().await;
        let controller = controllers
            .get(&kind)
            .ok_or_else(|| Error::NotFound(format!("no active strategy for {}", kind.as_str())))?;
        let workspace = controller.strategy.workspace.read().await.clone();
        crate::persistence::to_json(&controller.strategy, &workspace)
    }

    /// `POST /orchestration/<kind>/strategy`: build and persist a new
    /// strategy. Conflicts with an already-active strategy of this kind
    /// (§6 "at most one active strategy per kind").
    pub async fn create(&self, kind: StrategyKind, knobs: StrategyKnobs) -> Result<serde_json::Value> {
        knobs.validate(kind)?;
        let mut controllers = self.controllers.write().await;
        if controllers.contains_key(&kind) {
            return Err(Error::Conflict(format!(
                "a {} strategy is already active",
                kind.as_str()
            )));
        }
        let fleet = Fleet::snapshot(&self.inventory).await;
        let stages = builders::build_strategy(kind, &fleet, &knobs, &self.config.step_defaults);
        if stages.is_empty() {
            return Err(Error::Planning(
                "strategy planning produced no stages for the current fleet".to_string(),
            ));
        }
        let strategy = Strategy::new(kind, knobs, stages);
        self.store.save(&strategy).await?;
        let controller = StrategyController::new(strategy, Arc::clone(&self.driver), self.inventory.clone());
        let workspace = controller.strategy.workspace.read().await.clone();
        let json = crate::persistence::to_json(&controller.strategy, &workspace)?;
        controllers.insert(kind, controller);
        Ok(json)
    }

    /// `DELETE /orchestration/<kind>/strategy?force=bool`. Refuses to
    /// delete a strategy mid-`applying`/`aborting` unless `force` is
    /// set, mirroring the controller's own conflict checks.
    pub async fn delete(&self, kind: StrategyKind, force: bool) -> Result<()> {
        let mut controllers = self.controllers.write().await;
        let controller = controllers
            .get(&kind)
            .ok_or_else(|| Error::NotFound(format!("no active strategy for {}", kind.as_str())))?;
        if !force && !controller.strategy.is_terminal() && !matches!(controller.strategy.status, crate::strategy::StrategyStatus::ReadyToApply | crate::strategy::StrategyStatus::Building) {
            return Err(Error::Conflict(format!(
                "{} strategy is still {:?}; pass force=true to delete anyway",
                kind.as_str(),
                controller.strategy.status
            )));
        }
        controllers.remove(&kind);
        self.store.delete(kind).await
    }

    /// `POST /orchestration/<kind>/strategy/actions`.
    pub async fn act(&self, kind: StrategyKind, action: StrategyAction) -> Result<serde_json::Value> {
        let mut controllers = self.controllers.write().await;
        let controller = controllers
            .get_mut(&kind)
            .ok_or_else(|| Error::NotFound(format!("no active strategy for {}", kind.as_str())))?;
        let now = Instant::now();
        match action {
            StrategyAction::ApplyAll => controller.apply(now).await?,
            StrategyAction::ApplyStage(stage_id) => controller.apply_stage(stage_id, now).await?,
            StrategyAction::Abort => controller.abort(None, now).await?,
            StrategyAction::AbortStage(stage_id) => controller.abort(Some(stage_id), now).await?,
        }
        self.store.save(&controller.strategy).await?;
        let workspace = controller.strategy.workspace.read().await.clone();
        crate::persistence::to_json(&controller.strategy, &workspace)
    }

    /// Deliver a driver-originated event to every active controller's
    /// current step, persisting each that advances. Wired to the
    /// periodic audit task and to targeted driver callbacks alike
    /// (§4.1/§5: callbacks never run concurrently with the step they
    /// target, since this holds the write lock for the whole dispatch).
    pub async fn dispatch_event(&self, event: Event) -> Result<()> {
        let now = Instant::now();
        let mut controllers = self.controllers.write().await;
        for controller in controllers.values_mut() {
            controller.handle_event(event.clone(), now).await;
        }
        for controller in controllers.values() {
            self.store.save(&controller.strategy).await?;
        }
        Ok(())
    }

    /// Advance every active controller's deadline check; wired to a
    /// periodic ticker (§4.1 "controller's monotonic deadline check").
    pub async fn tick_all(&self) -> Result<()> {
        let now = Instant::now();
        let mut controllers = self.controllers.write().await;
        for controller in controllers.values_mut() {
            controller.tick(now).await;
        }
        for controller in controllers.values() {
            self.store.save(&controller.strategy).await?;
        }
        Ok(())
    }
}
