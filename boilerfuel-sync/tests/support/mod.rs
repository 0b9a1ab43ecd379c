//! Shared helpers: an in-process relay with the same semantics as the
//! production `/api/sync` endpoint, and engine constructors.

#![allow(dead_code)]

use boilerfuel_storage::{KeyValueStore, MemoryStore};
use boilerfuel_sync::{DeviceDescriptor, SyncConfig, SyncEngine};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Routes engine logs to the test output when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Clone, Debug)]
pub struct StoredEnvelope {
    pub encrypted_data: String,
    pub updated_at: i64,
}

/// Stateful relay: one envelope per token, `since` comparison on GET.
#[derive(Clone, Default)]
pub struct TestRelay {
    envelopes: Arc<Mutex<HashMap<String, StoredEnvelope>>>,
    created: Arc<AtomicUsize>,
    pushes: Arc<AtomicUsize>,
    fail_gets: Arc<AtomicBool>,
}

impl TestRelay {
    /// Starts a mock server backed by a fresh relay.
    pub async fn start() -> (MockServer, TestRelay) {
        init_tracing();
        let server = MockServer::start().await;
        let relay = TestRelay::default();
        Mock::given(path("/api/sync"))
            .respond_with(relay.clone())
            .mount(&server)
            .await;
        (server, relay)
    }

    pub fn envelope(&self, token: &str) -> Option<StoredEnvelope> {
        self.envelopes.lock().unwrap().get(token).cloned()
    }

    /// Stores an envelope as if another client had created it.
    pub fn seed(&self, token: &str, encrypted_data: &str, updated_at: i64) {
        self.envelopes.lock().unwrap().insert(
            token.to_string(),
            StoredEnvelope {
                encrypted_data: encrypted_data.to_string(),
                updated_at,
            },
        );
    }

    pub fn forget(&self, token: &str) {
        self.envelopes.lock().unwrap().remove(token);
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Makes every GET answer 500, as if the read path were down.
    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    fn handle_post(&self, body: &Value) -> ResponseTemplate {
        let data = body["encrypted_data"].as_str().unwrap_or_default().to_string();
        let updated_at = body["updated_at"].as_i64().unwrap_or_default();

        match body["action"].as_str() {
            Some("create") => {
                let n = self.created.fetch_add(1, Ordering::SeqCst);
                let token = format!("TK{n:04}");
                self.seed(&token, &data, updated_at);
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "token": token}))
            }
            Some("push") => {
                let Some(token) = body["token"].as_str() else {
                    return error(400, "Missing token or data");
                };
                if data.is_empty() {
                    return error(400, "Missing token or data");
                }
                let mut envelopes = self.envelopes.lock().unwrap();
                let Some(stored) = envelopes.get_mut(token) else {
                    return error(404, "Sync token not found");
                };
                stored.encrypted_data = data;
                stored.updated_at = updated_at;
                self.pushes.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(200).set_body_json(json!({"ok": true}))
            }
            _ => error(400, "Invalid action"),
        }
    }

    fn handle_get(&self, request: &Request) -> ResponseTemplate {
        if self.fail_gets.load(Ordering::SeqCst) {
            return error(500, "Internal server error");
        }
        let query: HashMap<String, String> = request.url.query_pairs().into_owned().collect();
        let Some(token) = query.get("token") else {
            return error(400, "Missing token");
        };
        let Some(stored) = self.envelope(token) else {
            return error(404, "Sync token not found");
        };
        let since = query.get("since").and_then(|s| s.parse::<i64>().ok());
        if since.is_some_and(|since| since >= stored.updated_at) {
            return ResponseTemplate::new(200).set_body_json(json!({"ok": true, "changed": false}));
        }
        // BIGINT columns come back as strings.
        ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "changed": true,
            "encrypted_data": stored.encrypted_data,
            "updated_at": stored.updated_at.to_string(),
        }))
    }
}

impl Respond for TestRelay {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        match request.method.as_str() {
            "POST" => self.handle_post(&body),
            "GET" => self.handle_get(request),
            "DELETE" => {
                if let Some(token) = body["token"].as_str() {
                    self.forget(token);
                }
                ResponseTemplate::new(200).set_body_json(json!({"ok": true}))
            }
            _ => ResponseTemplate::new(405),
        }
    }
}

fn error(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({"error": message}))
}

/// Fixed device label for deterministic registries.
pub struct NamedDevice(pub &'static str);

impl DeviceDescriptor for NamedDevice {
    fn label(&self) -> String {
        self.0.to_string()
    }
}

/// An engine over a fresh in-memory store seeded with `entries`.
pub fn device(
    server: &MockServer,
    name: &'static str,
    entries: &[(&str, Value)],
) -> (Arc<MemoryStore>, SyncEngine) {
    let store = Arc::new(MemoryStore::with_entries(
        entries.iter().map(|(k, v)| (k.to_string(), v.to_string())),
    ));
    let engine = SyncEngine::new(
        SyncConfig::with_base_url(server.uri()),
        store.clone(),
        Arc::new(NamedDevice(name)),
    )
    .unwrap();
    (store, engine)
}

/// Parsed JSON under `key`, or `Value::Null` if absent.
pub fn read_json(store: &dyn KeyValueStore, key: &str) -> Value {
    store
        .get(key)
        .unwrap()
        .map(|raw| serde_json::from_str(&raw).unwrap())
        .unwrap_or(Value::Null)
}

/// `addedAt` values logged for `date`, sorted.
pub fn meal_ids(store: &dyn KeyValueStore, date: &str) -> Vec<i64> {
    let meals = read_json(store, "boilerfuel_meals");
    let mut ids: Vec<i64> = meals[date]
        .as_array()
        .map(|entries| entries.iter().filter_map(|e| e["addedAt"].as_i64()).collect())
        .unwrap_or_default();
    ids.sort_unstable();
    ids
}

/// Appends a meal entry the way the app does when the user logs food.
pub fn log_meal(store: &dyn KeyValueStore, date: &str, added_at: i64, name: &str) {
    let mut meals = read_json(store, "boilerfuel_meals");
    if !meals.is_object() {
        meals = json!({});
    }
    let entry = json!({"name": name, "calories": 250, "addedAt": added_at});
    match meals[date].as_array_mut() {
        Some(entries) => entries.push(entry),
        None => meals[date] = json!([entry]),
    }
    store
        .set("boilerfuel_meals", &meals.to_string())
        .unwrap();
}
