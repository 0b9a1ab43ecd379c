use boilerfuel_crypto::{
    CryptoError, DerivedKey, NONCE_SIZE, decrypt, decrypt_with_key, derive_key, encrypt,
    encrypt_with_key, generate_secret,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{Value, json};
use std::sync::LazyLock;

static KEY: LazyLock<DerivedKey> = LazyLock::new(|| derive_key("shared-test-secret").unwrap());

fn snapshot() -> Value {
    json!({
        "boilerfuel_meals": {
            "2024-01-01": [
                { "id": 12, "name": "Oatmeal", "calories": 150, "addedAt": 1 },
                { "id": 40, "name": "Chicken Bowl", "calories": 620, "addedAt": 2 }
            ]
        },
        "boilerfuel_water": { "2024-01-01": 5 },
        "boilerfuel_favorites": [12, 40],
        "_timestamp": 1704067200000i64
    })
}

// ── Round trip ──

#[test]
fn roundtrip_with_secret() {
    let secret = generate_secret();
    let sealed = encrypt(&snapshot(), &secret).unwrap();
    let opened: Value = decrypt(&sealed, &secret).unwrap();
    assert_eq!(opened, snapshot());
}

#[test]
fn roundtrip_unicode_payload() {
    let value = json!({ "boilerfuel_goals": { "note": "café ☕ protein 💪" } });
    let sealed = encrypt_with_key(&KEY, &value).unwrap();
    let opened: Value = decrypt_with_key(&KEY, &sealed).unwrap();
    assert_eq!(opened, value);
}

#[test]
fn envelope_is_base64_and_opaque() {
    let sealed = encrypt_with_key(&KEY, &snapshot()).unwrap();
    assert!(sealed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='));
    assert!(!sealed.contains("Oatmeal"));
}

// ── Wrong secret / tampering ──

#[test]
fn wrong_secret_rejected() {
    let sealed = encrypt(&snapshot(), "secret-A-abcdefgh").unwrap();
    let result = decrypt::<Value>(&sealed, "secret-B-abcdefgh");
    assert!(matches!(result, Err(CryptoError::Decryption(_))));
}

#[test]
fn tampered_ciphertext_rejected() {
    use base64::{Engine, engine::general_purpose::STANDARD};

    let sealed = encrypt_with_key(&KEY, &snapshot()).unwrap();
    let mut raw = STANDARD.decode(&sealed).unwrap();
    raw[NONCE_SIZE + 3] ^= 0xFF;
    let tampered = STANDARD.encode(raw);

    let result = decrypt_with_key::<Value>(&KEY, &tampered);
    assert!(matches!(result, Err(CryptoError::Decryption(_))));
}

#[test]
fn tampered_nonce_rejected() {
    use base64::{Engine, engine::general_purpose::STANDARD};

    let sealed = encrypt_with_key(&KEY, &snapshot()).unwrap();
    let mut raw = STANDARD.decode(&sealed).unwrap();
    raw[0] ^= 0x01;
    let tampered = STANDARD.encode(raw);

    assert!(decrypt_with_key::<Value>(&KEY, &tampered).is_err());
}

#[test]
fn truncated_envelope_rejected() {
    let sealed = encrypt_with_key(&KEY, &snapshot()).unwrap();
    let truncated = &sealed[..sealed.len() / 2];
    assert!(matches!(
        decrypt_with_key::<Value>(&KEY, truncated),
        Err(CryptoError::Decryption(_))
    ));
}

#[test]
fn empty_envelope_rejected() {
    assert!(matches!(
        decrypt_with_key::<Value>(&KEY, ""),
        Err(CryptoError::Decryption(_))
    ));
}

// ── Nonce uniqueness ──

#[test]
fn same_plaintext_never_seals_identically() {
    let a = encrypt_with_key(&KEY, &snapshot()).unwrap();
    let b = encrypt_with_key(&KEY, &snapshot()).unwrap();
    assert_ne!(a, b);

    let opened_a: Value = decrypt_with_key(&KEY, &a).unwrap();
    let opened_b: Value = decrypt_with_key(&KEY, &b).unwrap();
    assert_eq!(opened_a, opened_b);
}

#[test]
fn nonces_unique_across_many_seals() {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use std::collections::HashSet;

    let mut nonces = HashSet::new();
    for _ in 0..500 {
        let sealed = encrypt_with_key(&KEY, &json!({})).unwrap();
        let raw = STANDARD.decode(sealed).unwrap();
        assert!(nonces.insert(raw[..NONCE_SIZE].to_vec()), "nonce reused");
    }
}

// ── Properties ──

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        ".{0,24}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,12}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn any_json_roundtrips(value in arb_json()) {
        let sealed = encrypt_with_key(&KEY, &value).unwrap();
        let opened: Value = decrypt_with_key(&KEY, &sealed).unwrap();
        prop_assert_eq!(opened, value);
    }
}
