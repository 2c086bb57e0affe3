//! Inventory Tables: in-memory projections of host and instance state.
//!
//! Sole writer is the event ingest path (driver notifications applied
//! before dispatch to the current step); steps only ever read. No lock
//! is exposed to callers beyond the read/write guard itself, so a read
//! held across an `.await` inside a step would be a bug, not a feature.

use crate::types::{Host, Instance};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Host rows keyed by name (the stable key steps hold onto).
#[derive(Debug, Default)]
pub struct HostTable {
    by_name: Arc<RwLock<HashMap<String, Host>>>,
}

impl HostTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<Host> {
        self.by_name.read().await.get(name).cloned()
    }

    pub async fn upsert(&self, host: Host) {
        self.by_name.write().await.insert(host.name.clone(), host);
    }

    pub async fn remove(&self, name: &str) {
        self.by_name.write().await.remove(name);
    }

    pub async fn all(&self) -> Vec<Host> {
        self.by_name.read().await.values().cloned().collect()
    }
}

impl Clone for HostTable {
    fn clone(&self) -> Self {
        Self {
            by_name: Arc::clone(&self.by_name),
        }
    }
}

/// Instance rows keyed by uuid, with a host-name index for membership
/// checks (`exist_on_host`) used by migrate/stop/start steps.
#[derive(Debug, Default)]
pub struct InstanceTable {
    by_uuid: Arc<RwLock<HashMap<uuid::Uuid, Instance>>>,
}

impl InstanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, uuid: uuid::Uuid) -> Option<Instance> {
        self.by_uuid.read().await.get(&uuid).cloned()
    }

    pub async fn upsert(&self, instance: Instance) {
        self.by_uuid
            .write()
            .await
            .insert(instance.uuid, instance);
    }

    pub async fn remove(&self, uuid: uuid::Uuid) {
        self.by_uuid.write().await.remove(&uuid);
    }

    /// All instances currently placed on `host_name`.
    pub async fn on_host(&self, host_name: &str) -> Vec<Instance> {
        self.by_uuid
            .read()
            .await
            .values()
            .filter(|i| i.host_name == host_name)
            .cloned()
            .collect()
    }

    pub async fn exist_on_host(&self, host_name: &str) -> bool {
        self.by_uuid
            .read()
            .await
            .values()
            .any(|i| i.host_name == host_name)
    }

    pub async fn all(&self) -> Vec<Instance> {
        self.by_uuid.read().await.values().cloned().collect()
    }
}

impl Clone for InstanceTable {
    fn clone(&self) -> Self {
        Self {
            by_uuid: Arc::clone(&self.by_uuid),
        }
    }
}

/// The pair of tables a running process holds; passed to steps via
/// their execution context.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub hosts: HostTable,
    pub instances: InstanceTable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AdministrativeState, Availability, DeviceImageUpdate, HostPersonality,
        HostServiceState, OperationalState, PatchHostState,
    };

    fn test_host(name: &str) -> Host {
        Host {
            uuid: uuid::Uuid::new_v4(),
            name: name.to_string(),
            personality: HostPersonality::Worker,
            administrative_state: AdministrativeState::Unlocked,
            operational_state: OperationalState::Enabled,
            availability: Availability::Online,
            software_load: "1.0".to_string(),
            target_load: "1.0".to_string(),
            device_image_update: DeviceImageUpdate::Null,
            host_service_state: HostServiceState::Enabled,
            patch_state: PatchHostState {
                patch_current: true,
                patch_failed: false,
            },
            kubelet_version: None,
        }
    }

    #[tokio::test]
    async fn host_table_upsert_and_get() {
        let table = HostTable::new();
        table.upsert(test_host("w-0")).await;
        assert!(table.get("w-0").await.is_some());
        assert!(table.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn instance_table_exist_on_host_reflects_moves() {
        let table = InstanceTable::new();
        let uuid = uuid::Uuid::new_v4();
        table
            .upsert(Instance {
                uuid,
                name: "i-0".to_string(),
                host_name: "w-0".to_string(),
                administrative_state: AdministrativeState::Unlocked,
                operational_state: OperationalState::Enabled,
            })
            .await;
        assert!(table.exist_on_host("w-0").await);
        assert!(!table.exist_on_host("w-1").await);

        let mut moved = table.get(uuid).await.unwrap();
        moved.host_name = "w-1".to_string();
        table.upsert(moved).await;

        assert!(!table.exist_on_host("w-0").await);
        assert!(table.exist_on_host("w-1").await);
    }
}
