//! Field-aware merge of a remote snapshot into local state.
//!
//! Each [`SyncField`] has a fixed strategy:
//!
//! | Field | Strategy |
//! |-------|----------|
//! | meals | per-date union by `addedAt` identity, then the loss-guard |
//! | water | per-date numeric maximum |
//! | weight | a real local reading wins; remote fills gaps and placeholders |
//! | favorites | set union, local order first |
//! | goals, templates, dietary | remote replaces local |
//!
//! The device registry is merged alongside: per device, the greater
//! `lastSeen` wins.
//!
//! [`merge_snapshots`] is pure and total: any JSON on either side merges
//! without error or panic. A remote value of the wrong shape is skipped. A
//! malformed local value is treated as empty, with the raw meals value kept
//! in the backup by [`MergeEngine::apply`].

use crate::error::SyncResult;
use crate::keys::MEALS_BACKUP_KEY;
use crate::snapshot::{read_fields, read_registry, write_registry};
use crate::types::{DeviceRegistry, Snapshot, SyncField};
use boilerfuel_storage::KeyValueStore;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of the pure merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedSnapshot {
    pub snapshot: Snapshot,
    /// Fields whose value differs from the local input, in [`SyncField::ALL`]
    /// order.
    pub changed_fields: Vec<SyncField>,
}

/// What [`MergeEngine::apply`] wrote to storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub changed_fields: Vec<SyncField>,
    /// Meal entries the loss-guard put back.
    pub restored_meal_entries: usize,
    pub registry_changed: bool,
    pub backup_written: bool,
}

impl MergeReport {
    /// True if no synchronized field changed.
    pub fn is_empty(&self) -> bool {
        self.changed_fields.is_empty()
    }
}

/// Merges `remote` into `local`. Fields absent from `remote` are untouched.
pub fn merge_snapshots(local: &Snapshot, remote: &Snapshot) -> MergedSnapshot {
    let mut snapshot = local.clone();
    let mut changed_fields = Vec::new();

    for field in SyncField::ALL {
        let Some(remote_value) = remote.field(field) else {
            continue;
        };
        let Some(merged) = merge_field(field, local.field(field), remote_value) else {
            continue;
        };
        if local.field(field) != Some(&merged) {
            changed_fields.push(field);
            snapshot.set_field(field, merged);
        }
    }

    snapshot.device_registry = merge_registry(&local.device_registry, &remote.device_registry);

    MergedSnapshot {
        snapshot,
        changed_fields,
    }
}

/// Merges one field. `None` means keep the local value as it is.
pub fn merge_field(field: SyncField, local: Option<&Value>, remote: &Value) -> Option<Value> {
    match field {
        SyncField::Meals => {
            let remote = remote_map(field, remote)?;
            Some(merge_meals(local_map(field, local), remote))
        }
        SyncField::Water => {
            let remote = remote_map(field, remote)?;
            Some(merge_water(local_map(field, local), remote))
        }
        SyncField::Weight => {
            let remote = remote_map(field, remote)?;
            Some(merge_weight(local_map(field, local), remote))
        }
        SyncField::Favorites => {
            let Value::Array(remote) = remote else {
                debug!("remote {field} is not a list, keeping local");
                return None;
            };
            Some(merge_favorites(local, remote))
        }
        SyncField::Goals | SyncField::Templates | SyncField::Dietary => {
            if remote.is_null() {
                return None;
            }
            Some(remote.clone())
        }
    }
}

fn remote_map<'a>(field: SyncField, remote: &'a Value) -> Option<&'a Map<String, Value>> {
    match remote {
        Value::Object(map) => Some(map),
        _ => {
            debug!("remote {field} is not a map, keeping local");
            None
        }
    }
}

fn local_map(field: SyncField, local: Option<&Value>) -> Map<String, Value> {
    match local {
        Some(Value::Object(map)) => map.clone(),
        None | Some(Value::Null) => Map::new(),
        Some(_) => {
            warn!("local {field} is not a map, merging as if empty");
            Map::new()
        }
    }
}

/// Merge identity of a meal entry: its `addedAt`, or the whole entry when it
/// has none.
fn entry_identity(entry: &Value) -> String {
    match entry.get("addedAt") {
        Some(added_at) if !added_at.is_null() => format!("t:{added_at}"),
        _ => format!("v:{entry}"),
    }
}

fn merge_meals(mut merged: Map<String, Value>, remote: &Map<String, Value>) -> Value {
    for (date, remote_entries) in remote {
        let Value::Array(remote_entries) = remote_entries else {
            debug!("skipping malformed remote meals for {date}");
            continue;
        };

        match merged.get_mut(date) {
            Some(Value::Array(local_entries)) => {
                append_missing(local_entries, remote_entries);
            }
            Some(other) => {
                warn!("local meals for {date} are malformed, taking remote entries");
                let mut entries = Vec::new();
                append_missing(&mut entries, remote_entries);
                *other = Value::Array(entries);
            }
            None => {
                let mut entries = Vec::new();
                append_missing(&mut entries, remote_entries);
                merged.insert(date.clone(), Value::Array(entries));
            }
        }
    }
    Value::Object(merged)
}

/// Appends each entry of `from` whose identity is not already in `into`.
/// Returns how many were appended.
fn append_missing(into: &mut Vec<Value>, from: &[Value]) -> usize {
    let mut seen: HashSet<String> = into.iter().map(entry_identity).collect();
    let mut appended = 0;
    for entry in from {
        if seen.insert(entry_identity(entry)) {
            into.push(entry.clone());
            appended += 1;
        }
    }
    appended
}

fn water_amount(value: &Value) -> Option<f64> {
    value.as_f64().filter(|n| n.is_finite() && *n >= 0.0)
}

fn merge_water(mut merged: Map<String, Value>, remote: &Map<String, Value>) -> Value {
    for (date, remote_value) in remote {
        let Some(remote_amount) = water_amount(remote_value) else {
            debug!("skipping malformed remote water for {date}");
            continue;
        };
        let take_remote = match merged.get(date).and_then(water_amount) {
            Some(local_amount) => remote_amount > local_amount,
            None => true,
        };
        if take_remote {
            merged.insert(date.clone(), remote_value.clone());
        }
    }
    Value::Object(merged)
}

/// Zero, negative, null and non-numeric weights mean "no reading".
fn is_weight_placeholder(value: &Value) -> bool {
    value.as_f64().is_none_or(|n| n <= 0.0)
}

fn merge_weight(mut merged: Map<String, Value>, remote: &Map<String, Value>) -> Value {
    for (date, remote_value) in remote {
        if !remote_value.is_number() {
            debug!("skipping malformed remote weight for {date}");
            continue;
        }
        let take_remote = match merged.get(date) {
            None => true,
            Some(local) => is_weight_placeholder(local) && !is_weight_placeholder(remote_value),
        };
        if take_remote {
            merged.insert(date.clone(), remote_value.clone());
        }
    }
    Value::Object(merged)
}

fn merge_favorites(local: Option<&Value>, remote: &[Value]) -> Value {
    let local: &[Value] = match local {
        Some(Value::Array(items)) => items,
        None | Some(Value::Null) => &[],
        Some(_) => {
            warn!("local favorites are not a list, merging as if empty");
            &[]
        }
    };

    let mut seen = HashSet::new();
    let merged = local
        .iter()
        .chain(remote)
        .filter(|item| seen.insert(item.to_string()))
        .cloned()
        .collect();
    Value::Array(merged)
}

/// Union of device ids; the entry with the greater `lastSeen` wins, local on
/// a tie.
pub fn merge_registry(local: &DeviceRegistry, remote: &DeviceRegistry) -> DeviceRegistry {
    let mut merged = local.clone();
    for (id, remote_entry) in remote {
        match merged.get(id) {
            Some(local_entry) if local_entry.last_seen >= remote_entry.last_seen => {}
            _ => {
                merged.insert(id.clone(), remote_entry.clone());
            }
        }
    }
    merged
}

/// Loss-guard: re-inserts every date and entry of `pre_merge` meals that is
/// missing from `merged`. Returns the number of entries restored.
pub fn restore_missing_meals(merged: &mut Value, pre_merge: Option<&Value>) -> usize {
    let Some(Value::Object(pre)) = pre_merge else {
        return 0;
    };
    if !merged.is_object() {
        *merged = Value::Object(Map::new());
    }
    let Value::Object(merged) = merged else {
        return 0;
    };

    let mut restored = 0;
    for (date, pre_entries) in pre {
        let Value::Array(pre_entries) = pre_entries else {
            continue;
        };
        match merged.get_mut(date) {
            Some(Value::Array(entries)) => {
                restored += append_missing(entries, pre_entries);
            }
            Some(other) => {
                *other = Value::Array(pre_entries.clone());
                restored += pre_entries.len();
            }
            None => {
                merged.insert(date.clone(), Value::Array(pre_entries.clone()));
                restored += pre_entries.len();
            }
        }
    }
    restored
}

/// Applies remote snapshots to local storage.
pub struct MergeEngine {
    store: Arc<dyn KeyValueStore>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Current local fields and registry, read fresh from storage.
    pub fn read_local(&self) -> SyncResult<Snapshot> {
        let mut local = read_fields(self.store.as_ref())?;
        local.device_registry = read_registry(self.store.as_ref())?;
        Ok(local)
    }

    /// Merges `remote` into storage.
    ///
    /// `pre_merge` is the local snapshot captured when the sync began; meal
    /// entries it holds are guaranteed to survive even if storage lost them
    /// in between. Local values are re-read here, so edits made while the
    /// relay round trip was in flight are merged too.
    pub fn apply(&self, pre_merge: &Snapshot, remote: &Snapshot) -> SyncResult<MergeReport> {
        let local = self.read_local()?;
        let MergedSnapshot {
            mut snapshot,
            mut changed_fields,
        } = merge_snapshots(&local, remote);

        let mut restored_meal_entries = 0;
        if remote.has_field(SyncField::Meals) {
            let pre_meals = pre_merge.field(SyncField::Meals);
            if let Some(meals) = snapshot.field_mut(SyncField::Meals) {
                restored_meal_entries = restore_missing_meals(meals, pre_meals);
            } else if let Some(pre_meals) = pre_meals {
                let mut meals = Value::Object(Map::new());
                restored_meal_entries = restore_missing_meals(&mut meals, Some(pre_meals));
                snapshot.set_field(SyncField::Meals, meals);
            }
            if restored_meal_entries > 0 {
                warn!("loss-guard restored {restored_meal_entries} meal entries");
                let differs = snapshot.field(SyncField::Meals) != local.field(SyncField::Meals);
                if differs && !changed_fields.contains(&SyncField::Meals) {
                    changed_fields.push(SyncField::Meals);
                    changed_fields.sort();
                }
            }
        }

        let mut backup_written = false;
        if changed_fields.contains(&SyncField::Meals) {
            let raw = self
                .store
                .get(SyncField::Meals.storage_key())?
                .unwrap_or_else(|| "{}".to_string());
            self.store.set(MEALS_BACKUP_KEY, &raw)?;
            backup_written = true;
        }

        for field in &changed_fields {
            if let Some(value) = snapshot.field(*field) {
                self.store
                    .set(field.storage_key(), &serde_json::to_string(value)?)?;
            }
        }

        let registry_changed = snapshot.device_registry != local.device_registry;
        if registry_changed {
            write_registry(self.store.as_ref(), &snapshot.device_registry)?;
        }

        if changed_fields.is_empty() {
            debug!("merge left local data unchanged");
        } else {
            info!(
                "merged remote changes into {}",
                changed_fields
                    .iter()
                    .map(|f| f.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        Ok(MergeReport {
            changed_fields,
            restored_meal_entries,
            registry_changed,
            backup_written,
        })
    }

    /// Writes the meals backup back over `meals` and clears it. Returns false
    /// if there was no backup.
    pub fn restore_meals_backup(&self) -> SyncResult<bool> {
        let Some(backup) = self
            .store
            .get(MEALS_BACKUP_KEY)?
            .filter(|b| !b.is_empty())
        else {
            return Ok(false);
        };
        self.store.set(SyncField::Meals.storage_key(), &backup)?;
        self.store.remove(MEALS_BACKUP_KEY)?;
        info!("restored meals from backup");
        Ok(true)
    }
}
