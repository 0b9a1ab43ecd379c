//! Builds the plaintext snapshot of this device's synchronized state.

use crate::error::SyncResult;
use crate::keys::{DEVICE_ID_KEY, DEVICE_REGISTRY_KEY};
use crate::types::{DeviceEntry, DeviceRegistry, Snapshot, SyncField, now_millis, registry_from_value};
use boilerfuel_storage::KeyValueStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Supplies the human-readable label stored in the device registry.
pub trait DeviceDescriptor: Send + Sync {
    fn label(&self) -> String;
}

/// Labels the device from the build target, e.g. "linux (x86_64)".
#[derive(Debug, Clone, Copy, Default)]
pub struct HostDescriptor;

impl DeviceDescriptor for HostDescriptor {
    fn label(&self) -> String {
        format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH)
    }
}

/// Reads one field from storage. An empty value counts as absent; a value
/// that is not JSON is carried as a JSON string.
pub(crate) fn read_field(store: &dyn KeyValueStore, field: SyncField) -> SyncResult<Option<Value>> {
    let Some(raw) = store.get(field.storage_key())? else {
        return Ok(None);
    };
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        serde_json::from_str(&raw).unwrap_or_else(|_| Value::String(raw)),
    ))
}

/// Reads every present field into a snapshot with no timestamp or registry.
pub(crate) fn read_fields(store: &dyn KeyValueStore) -> SyncResult<Snapshot> {
    let mut snapshot = Snapshot::default();
    for field in SyncField::ALL {
        if let Some(value) = read_field(store, field)? {
            snapshot.set_field(field, value);
        }
    }
    Ok(snapshot)
}

pub(crate) fn read_registry(store: &dyn KeyValueStore) -> SyncResult<DeviceRegistry> {
    let Some(raw) = store.get(DEVICE_REGISTRY_KEY)? else {
        return Ok(DeviceRegistry::new());
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) => Ok(registry_from_value(value)),
        Err(e) => {
            warn!("ignoring unreadable local device registry: {e}");
            Ok(DeviceRegistry::new())
        }
    }
}

pub(crate) fn write_registry(store: &dyn KeyValueStore, registry: &DeviceRegistry) -> SyncResult<()> {
    store.set(DEVICE_REGISTRY_KEY, &serde_json::to_string(registry)?)?;
    Ok(())
}

/// Gathers local state into a [`Snapshot`].
pub struct SnapshotGatherer {
    store: Arc<dyn KeyValueStore>,
    descriptor: Arc<dyn DeviceDescriptor>,
}

impl SnapshotGatherer {
    pub fn new(store: Arc<dyn KeyValueStore>, descriptor: Arc<dyn DeviceDescriptor>) -> Self {
        Self { store, descriptor }
    }

    /// This device's id, generated (UUID v4) and persisted on first use.
    pub fn device_id(&self) -> SyncResult<String> {
        if let Some(id) = self.store.get(DEVICE_ID_KEY)?.filter(|id| !id.trim().is_empty()) {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.store.set(DEVICE_ID_KEY, &id)?;
        debug!("assigned sync device id {id}");
        Ok(id)
    }

    /// The registry as last merged on this device.
    pub fn local_registry(&self) -> SyncResult<DeviceRegistry> {
        read_registry(self.store.as_ref())
    }

    /// Reads every synchronized field, stamps the snapshot with the current
    /// time and upserts this device's registry entry (persisted locally too).
    pub fn gather(&self) -> SyncResult<Snapshot> {
        let now = now_millis();
        let mut snapshot = read_fields(self.store.as_ref())?;
        snapshot.timestamp = now;

        let mut registry = self.local_registry()?;
        registry.insert(
            self.device_id()?,
            DeviceEntry {
                name: self.descriptor.label(),
                last_seen: now,
            },
        );
        write_registry(self.store.as_ref(), &registry)?;
        snapshot.device_registry = registry;

        debug!(
            "gathered snapshot with {} fields, {} devices",
            snapshot.fields().count(),
            snapshot.device_registry.len()
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boilerfuel_storage::MemoryStore;
    use serde_json::json;

    struct Fixed(&'static str);
    impl DeviceDescriptor for Fixed {
        fn label(&self) -> String {
            self.0.to_string()
        }
    }

    fn gatherer(entries: &[(&str, &str)]) -> (Arc<MemoryStore>, SnapshotGatherer) {
        let mem = Arc::new(MemoryStore::with_entries(entries.iter().copied()));
        let g = SnapshotGatherer::new(mem.clone(), Arc::new(Fixed("test phone")));
        (mem, g)
    }

    #[test]
    fn absent_fields_are_omitted() {
        let (_, g) = gatherer(&[("boilerfuel_water", r#"{"2024-01-01":3}"#)]);
        let snap = g.gather().unwrap();
        assert_eq!(snap.field(SyncField::Water), Some(&json!({"2024-01-01": 3})));
        assert!(!snap.has_field(SyncField::Meals));
        assert!(!snap.has_field(SyncField::Goals));
        assert!(snap.timestamp > 0);
    }

    #[test]
    fn non_json_value_is_carried_as_string() {
        let (_, g) = gatherer(&[("boilerfuel_dietary", "vegan"), ("boilerfuel_goals", "")]);
        let snap = g.gather().unwrap();
        assert_eq!(snap.field(SyncField::Dietary), Some(&json!("vegan")));
        assert!(!snap.has_field(SyncField::Goals));
    }

    #[test]
    fn device_id_is_stable() {
        let (mem, g) = gatherer(&[]);
        let first = g.device_id().unwrap();
        assert_eq!(g.device_id().unwrap(), first);
        assert_eq!(mem.get(DEVICE_ID_KEY).unwrap(), Some(first.clone()));
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn gather_upserts_own_registry_entry() {
        let (mem, g) = gatherer(&[(
            DEVICE_REGISTRY_KEY,
            r#"{"other":{"name":"laptop","lastSeen":5}}"#,
        )]);
        let snap = g.gather().unwrap();
        let id = g.device_id().unwrap();

        assert_eq!(snap.device_registry.len(), 2);
        assert_eq!(snap.device_registry[&id].name, "test phone");
        assert_eq!(snap.device_registry["other"].last_seen, 5);
        assert_eq!(g.local_registry().unwrap(), snap.device_registry);
        assert!(mem.get(DEVICE_REGISTRY_KEY).unwrap().unwrap().contains("test phone"));
    }

    #[test]
    fn serialized_snapshot_uses_storage_keys() {
        let (_, g) = gatherer(&[("boilerfuel_favorites", r#"["a","b"]"#)]);
        let snap = g.gather().unwrap();
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["boilerfuel_favorites"], json!(["a", "b"]));
        assert!(json["_timestamp"].is_i64());
        assert!(json["deviceRegistry"].is_object());
    }

    #[test]
    fn host_descriptor_names_the_os() {
        assert!(HostDescriptor.label().contains(std::env::consts::OS));
    }
}
