//! API-key storage.
//!
//! Keys are opaque `ak_`-prefixed strings handed to operators out of band
//! (or minted through the admin API). The store is in-memory; keys do not
//! survive a gateway restart.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;

use crate::AuthError;

/// One API key with its metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKey {
    pub key: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ip_whitelist: Vec<String>,
}

/// In-memory API-key store.
#[derive(Debug, Default)]
pub struct ApiKeyStore {
    keys: RwLock<HashMap<String, ApiKey>>,
}

impl ApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint and store a new key. Returns the full key, whitelist included.
    pub fn add(&self, name: &str, description: &str, ip_whitelist: Vec<String>) -> ApiKey {
        let key = generate_key();
        let entry = ApiKey {
            key: key.clone(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
            last_used: None,
            enabled: true,
            ip_whitelist,
        };
        self.keys
            .write()
            .unwrap()
            .insert(key, entry.clone());
        entry
    }

    /// Install a pre-existing key value, for keys provisioned out of band.
    pub fn insert(&self, entry: ApiKey) {
        self.keys
            .write()
            .unwrap()
            .insert(entry.key.clone(), entry);
    }

    pub fn remove(&self, key: &str) -> Result<(), AuthError> {
        self.keys
            .write()
            .unwrap()
            .remove(key)
            .map(|_| ())
            .ok_or(AuthError::KeyNotFound)
    }

    pub fn get(&self, key: &str) -> Option<ApiKey> {
        self.keys
            .read()
            .unwrap()
            .get(key)
            .cloned()
    }

    pub fn touch(&self, key: &str) {
        if let Some(entry) = self
            .keys
            .write()
            .unwrap()
            .get_mut(key)
        {
            entry.last_used = Some(Utc::now());
        }
    }

    /// All keys with their secret values masked, for the admin listing.
    pub fn list_masked(&self) -> Vec<ApiKey> {
        self.keys
            .read()
            .unwrap()
            .values()
            .map(|entry| {
                let mut masked = entry.clone();
                masked.key = "***".to_string();
                masked
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("ak_{}", hex::encode(bytes))
}
