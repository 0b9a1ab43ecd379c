//! Shared types for sync operations.

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A synchronized logical field of the local data model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncField {
    /// Date -> list of meal entries, identified by `addedAt`.
    Meals,
    Goals,
    /// Set of favorite food ids.
    Favorites,
    /// Date -> glasses of water.
    Water,
    /// Date -> body weight reading.
    Weight,
    Templates,
    Dietary,
}

impl SyncField {
    /// Every synchronized field, in the order the web client lists them.
    pub const ALL: [SyncField; 7] = [
        SyncField::Meals,
        SyncField::Goals,
        SyncField::Favorites,
        SyncField::Water,
        SyncField::Weight,
        SyncField::Templates,
        SyncField::Dietary,
    ];

    /// Local storage key holding this field's JSON value.
    pub fn storage_key(self) -> &'static str {
        match self {
            SyncField::Meals => "boilerfuel_meals",
            SyncField::Goals => "boilerfuel_goals",
            SyncField::Favorites => "boilerfuel_favorites",
            SyncField::Water => "boilerfuel_water",
            SyncField::Weight => "boilerfuel_weight",
            SyncField::Templates => "boilerfuel_templates",
            SyncField::Dietary => "boilerfuel_dietary",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SyncField::Meals => "meals",
            SyncField::Goals => "goals",
            SyncField::Favorites => "favorites",
            SyncField::Water => "water",
            SyncField::Weight => "weight",
            SyncField::Templates => "templates",
            SyncField::Dietary => "dietary",
        }
    }
}

impl fmt::Display for SyncField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One device's entry in the registry carried inside every snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Human-readable label, best-effort.
    pub name: String,
    /// Epoch ms of the device's most recent gather.
    #[serde(rename = "lastSeen")]
    pub last_seen: i64,
}

/// Device id -> entry.
pub type DeviceRegistry = BTreeMap<String, DeviceEntry>;

/// Plaintext bundle of the synchronized fields plus metadata.
///
/// Serialized as a flat JSON object keyed by storage key, which is the shape
/// the web client encrypts. Reading is lenient: a malformed timestamp or
/// registry entry is dropped, never an error.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "_timestamp", default, deserialize_with = "lenient_timestamp")]
    pub timestamp: i64,

    #[serde(
        rename = "deviceRegistry",
        default,
        deserialize_with = "lenient_registry",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub device_registry: DeviceRegistry,

    #[serde(flatten)]
    fields: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    /// Reads a snapshot out of decrypted JSON. Anything that is not an object
    /// yields an empty snapshot.
    pub fn from_value(value: Value) -> Self {
        if !value.is_object() {
            warn!("remote snapshot is not a JSON object, ignoring its contents");
            return Self::default();
        }
        serde_json::from_value(value).unwrap_or_else(|e| {
            warn!("unreadable remote snapshot, ignoring its contents: {e}");
            Self::default()
        })
    }

    pub fn field(&self, field: SyncField) -> Option<&Value> {
        self.fields.get(field.storage_key())
    }

    pub(crate) fn field_mut(&mut self, field: SyncField) -> Option<&mut Value> {
        self.fields.get_mut(field.storage_key())
    }

    pub fn set_field(&mut self, field: SyncField, value: Value) {
        self.fields.insert(field.storage_key().to_string(), value);
    }

    pub fn has_field(&self, field: SyncField) -> bool {
        self.fields.contains_key(field.storage_key())
    }

    /// Present synchronized fields. Unknown members are skipped.
    pub fn fields(&self) -> impl Iterator<Item = (SyncField, &Value)> {
        SyncField::ALL
            .into_iter()
            .filter_map(|f| self.field(f).map(|v| (f, v)))
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_i64()
        .or_else(|| value.as_f64().map(|n| n as i64))
        .unwrap_or_default())
}

fn lenient_registry<'de, D>(deserializer: D) -> Result<DeviceRegistry, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(registry_from_value(Value::deserialize(deserializer)?))
}

/// Reads a device registry, dropping entries that do not parse.
pub(crate) fn registry_from_value(value: Value) -> DeviceRegistry {
    let Value::Object(entries) = value else {
        return DeviceRegistry::new();
    };

    entries
        .into_iter()
        .filter_map(|(id, entry)| match serde_json::from_value::<DeviceEntry>(entry) {
            Ok(entry) => Some((id, entry)),
            Err(e) => {
                warn!("dropping malformed device registry entry {id}: {e}");
                None
            }
        })
        .collect()
}

/// Pairing credentials shared by every device in a pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Relay-assigned pairing token. Not secret.
    pub token: String,
    /// Encryption passphrase. Never sent to the relay.
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Relay response to `GET /api/sync`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEnvelope {
    /// True iff the stored envelope is newer than the `since` marker.
    #[serde(default)]
    pub changed: bool,
    #[serde(default)]
    pub encrypted_data: Option<String>,
    /// The relay's database returns this as a string (BIGINT column).
    #[serde(default, deserialize_with = "deserialize_opt_i64_from_str_or_num")]
    pub updated_at: Option<i64>,
}

impl RemoteEnvelope {
    /// The ciphertext, if the relay sent a non-empty one.
    pub fn payload(&self) -> Option<&str> {
        self.encrypted_data.as_deref().filter(|d| !d.trim().is_empty())
    }
}

/// Accepts a JSON number, a string-encoded number, or null.
fn deserialize_opt_i64_from_str_or_num<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct OptI64Visitor;
    impl<'de> de::Visitor<'de> for OptI64Visitor {
        type Value = Option<i64>;
        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number, a string-encoded number, or null")
        }
        fn visit_unit<E: de::Error>(self) -> Result<Option<i64>, E> { Ok(None) }
        fn visit_none<E: de::Error>(self) -> Result<Option<i64>, E> { Ok(None) }
        fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Option<i64>, D2::Error> {
            d.deserialize_any(OptI64Visitor)
        }
        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Option<i64>, E> { Ok(Some(v)) }
        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Option<i64>, E> {
            i64::try_from(v).map(Some).map_err(de::Error::custom)
        }
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Option<i64>, E> { Ok(Some(v as i64)) }
        fn visit_str<E: de::Error>(self, v: &str) -> Result<Option<i64>, E> {
            v.trim().parse().map(Some).map_err(de::Error::custom)
        }
    }
    deserializer.deserialize_any(OptI64Visitor)
}

/// Pairing/sync state as seen by the UI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Unpaired,
    /// Paired, no operation running.
    Idle,
    /// An operation is in flight.
    Syncing,
}
