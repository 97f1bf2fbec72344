//! User settings kept in the key/value store.

use histsync_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cipher::{AesGcmCipher, Cipher, NoCipher};
use crate::kv::KeyValueStore;
use crate::state::LAST_SYNC_KEY;
use crate::store::RemoteEndpoint;

pub const WEBDAV_URL_KEY: &str = "webdavUrl";
pub const WEBDAV_USERNAME_KEY: &str = "webdavUsername";
pub const WEBDAV_PASSWORD_KEY: &str = "webdavPassword";
pub const SYNC_ENABLED_KEY: &str = "syncEnabled";
pub const SYNC_FREQUENCY_KEY: &str = "syncFrequency";
pub const ENCRYPT_ENABLED_KEY: &str = "encryptEnabled";
pub const ENCRYPT_KEY_KEY: &str = "encryptKey";

pub const DEFAULT_SYNC_FREQUENCY_MS: u64 = 3_600_000;
pub const MIN_SYNC_PERIOD: Duration = Duration::from_secs(60);
pub const MIN_ENCRYPT_KEY_LEN: usize = 8;

const ALL_KEYS: [&str; 7] = [
    WEBDAV_URL_KEY,
    WEBDAV_USERNAME_KEY,
    WEBDAV_PASSWORD_KEY,
    SYNC_ENABLED_KEY,
    SYNC_FREQUENCY_KEY,
    ENCRYPT_ENABLED_KEY,
    ENCRYPT_KEY_KEY,
];

#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub webdav_url: Option<String>,
    pub webdav_username: Option<String>,
    pub webdav_password: Option<String>,
    pub sync_enabled: bool,
    pub sync_frequency_ms: u64,
    pub encrypt_enabled: bool,
    pub encrypt_key: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            webdav_url: None,
            webdav_username: None,
            webdav_password: None,
            sync_enabled: true,
            sync_frequency_ms: DEFAULT_SYNC_FREQUENCY_MS,
            encrypt_enabled: true,
            encrypt_key: None,
        }
    }
}

fn non_empty_string(map: &HashMap<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl SyncSettings {
    /// Reads all settings, falling back to defaults for absent keys.
    pub async fn load(kv: &dyn KeyValueStore) -> Result<Self> {
        let map = kv.get(&ALL_KEYS).await?;
        let defaults = Self::default();

        Ok(Self {
            webdav_url: non_empty_string(&map, WEBDAV_URL_KEY),
            webdav_username: non_empty_string(&map, WEBDAV_USERNAME_KEY),
            // Passwords are not trimmed.
            webdav_password: map
                .get(WEBDAV_PASSWORD_KEY)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            sync_enabled: map
                .get(SYNC_ENABLED_KEY)
                .and_then(|v| v.as_bool())
                .unwrap_or(defaults.sync_enabled),
            sync_frequency_ms: map
                .get(SYNC_FREQUENCY_KEY)
                .and_then(|v| v.as_u64())
                .filter(|f| *f > 0)
                .unwrap_or(defaults.sync_frequency_ms),
            encrypt_enabled: map
                .get(ENCRYPT_ENABLED_KEY)
                .and_then(|v| v.as_bool())
                .unwrap_or(defaults.encrypt_enabled),
            encrypt_key: map
                .get(ENCRYPT_KEY_KEY)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }

    /// Writes defaults for any of `syncEnabled`, `syncFrequency`,
    /// `encryptEnabled` and `lastSyncTimestamp` that are unset. Returns the
    /// keys written.
    pub async fn initialize_defaults(kv: &dyn KeyValueStore) -> Result<Vec<String>> {
        let defaults = Self::default();
        let candidates: [(&str, Value); 4] = [
            (SYNC_ENABLED_KEY, Value::from(defaults.sync_enabled)),
            (SYNC_FREQUENCY_KEY, Value::from(defaults.sync_frequency_ms)),
            (ENCRYPT_ENABLED_KEY, Value::from(defaults.encrypt_enabled)),
            (LAST_SYNC_KEY, Value::from(0)),
        ];
        let keys: Vec<&str> = candidates.iter().map(|(k, _)| *k).collect();
        let existing = kv.get(&keys).await?;

        let missing: HashMap<String, Value> = candidates
            .into_iter()
            .filter(|(k, _)| !existing.contains_key(*k))
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let mut written: Vec<String> = missing.keys().cloned().collect();
        written.sort();
        if !missing.is_empty() {
            kv.set(missing).await?;
            info!(keys = ?written, "initialized default settings");
        }
        Ok(written)
    }

    /// Persists every field. Absent optional fields are removed.
    pub async fn save(&self, kv: &dyn KeyValueStore) -> Result<()> {
        self.validate()?;

        let mut entries = HashMap::new();
        let mut removed = Vec::new();
        for (key, value) in [
            (WEBDAV_URL_KEY, &self.webdav_url),
            (WEBDAV_USERNAME_KEY, &self.webdav_username),
            (WEBDAV_PASSWORD_KEY, &self.webdav_password),
            (ENCRYPT_KEY_KEY, &self.encrypt_key),
        ] {
            match value {
                Some(v) => {
                    entries.insert(key.to_string(), Value::from(v.as_str()));
                }
                None => removed.push(key),
            }
        }
        entries.insert(SYNC_ENABLED_KEY.to_string(), Value::from(self.sync_enabled));
        entries.insert(SYNC_FREQUENCY_KEY.to_string(), Value::from(self.sync_frequency_ms));
        entries.insert(ENCRYPT_ENABLED_KEY.to_string(), Value::from(self.encrypt_enabled));

        kv.set(entries).await?;
        if !removed.is_empty() {
            kv.remove(&removed).await?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.encrypt_enabled {
            if let Some(key) = &self.encrypt_key {
                if key.chars().count() < MIN_ENCRYPT_KEY_LEN {
                    return Err(Error::Config(format!(
                        "encryption key must be at least {} characters",
                        MIN_ENCRYPT_KEY_LEN
                    )));
                }
            }
        }
        Ok(())
    }

    /// Remote endpoint, or `Error::Config` when any credential is missing.
    pub fn webdav_endpoint(&self) -> Result<RemoteEndpoint> {
        match (&self.webdav_url, &self.webdav_username, &self.webdav_password) {
            (Some(url), Some(username), Some(password)) => Ok(RemoteEndpoint::WebDav {
                url: url.clone(),
                username: username.clone(),
                password: password.clone(),
            }),
            _ => Err(Error::Config(
                "WebDAV url, username and password must all be set".to_string(),
            )),
        }
    }

    /// Payload cipher: AES-GCM when encryption is on and a key is set.
    pub fn cipher(&self) -> Arc<dyn Cipher> {
        match (&self.encrypt_key, self.encrypt_enabled) {
            (Some(key), true) => Arc::new(AesGcmCipher::new(key)),
            _ => Arc::new(NoCipher),
        }
    }

    /// Interval for scheduled sync, whole minutes, at least one.
    pub fn schedule_period(&self) -> Duration {
        let minutes = (self.sync_frequency_ms / 60_000).max(1);
        Duration::from_secs(minutes * 60).max(MIN_SYNC_PERIOD)
    }
}
