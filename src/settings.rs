use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
    sync::{Arc, RwLock},
};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const CHOICE_KEY: &str = "adBlockerChoice";
pub const CHOICE_EXPIRY_KEY: &str = "adBlockerChoiceExpiry";

/// How long a "continue anyway" keeps the overlay away.
pub const CHOICE_TTL_HOURS: i64 = 24;

/// String key-value persistence, the shape of browser local storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Key-value store kept in a pretty-printed JSON object on disk.
pub struct JsonFileStore {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// A missing or unreadable file starts the store empty.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read choice store from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn persist(&self, data: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write choice store to {}", self.path.display()))
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("choice store lock poisoned"))?;
        apply(&mut guard);
        self.persist(&guard)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|data| {
            data.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|data| {
            data.remove(key);
        })
    }
}

/// Non-persistent store for embedding and tests.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.data
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.data
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))?
            .remove(key);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserChoiceValue {
    Continue,
    Refresh,
}

impl UserChoiceValue {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserChoiceValue::Continue => "continue",
            UserChoiceValue::Refresh => "refresh",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "continue" => Some(UserChoiceValue::Continue),
            "refresh" => Some(UserChoiceValue::Refresh),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserChoice {
    pub value: UserChoiceValue,
    pub expiry: DateTime<Utc>,
}

impl UserChoice {
    pub fn continue_for(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            value: UserChoiceValue::Continue,
            expiry: now + ttl,
        }
    }

    /// Honored up to and including the expiry instant.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.expiry
    }

    pub fn suppresses_overlay(&self, now: DateTime<Utc>) -> bool {
        self.value == UserChoiceValue::Continue && self.is_valid_at(now)
    }
}

/// Typed access to the two persisted choice keys.
#[derive(Clone)]
pub struct ChoiceStore {
    store: Arc<dyn KeyValueStore>,
}

impl ChoiceStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Stored choice, or `None` when absent or malformed. Expiry is not
    /// checked here; see [`UserChoice::is_valid_at`].
    pub fn load(&self) -> Option<UserChoice> {
        let raw_value = self.store.get(CHOICE_KEY)?;
        let raw_expiry = self.store.get(CHOICE_EXPIRY_KEY);

        let Some(value) = UserChoiceValue::parse(&raw_value) else {
            log_warn!("ignoring unknown stored choice {raw_value:?}");
            return None;
        };

        let expiry = raw_expiry
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single());

        match expiry {
            Some(expiry) => Some(UserChoice { value, expiry }),
            None => {
                log_warn!("ignoring stored choice with malformed expiry {raw_expiry:?}");
                None
            }
        }
    }

    /// Overwrites any previous choice.
    pub fn save(&self, choice: &UserChoice) -> Result<()> {
        self.store.set(CHOICE_KEY, choice.value.as_str())?;
        self.store
            .set(CHOICE_EXPIRY_KEY, &choice.expiry.timestamp_millis().to_string())?;
        log_info!("stored {} choice until {}", choice.value.as_str(), choice.expiry);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(CHOICE_KEY)?;
        self.store.remove(CHOICE_EXPIRY_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn choice_round_trips_through_string_keys() {
        let backing = Arc::new(MemoryStore::default());
        let choices = ChoiceStore::new(backing.clone());
        let choice = UserChoice::continue_for(noon(), Duration::hours(CHOICE_TTL_HOURS));

        choices.save(&choice).unwrap();

        assert_eq!(backing.get(CHOICE_KEY).as_deref(), Some("continue"));
        assert_eq!(
            backing.get(CHOICE_EXPIRY_KEY),
            Some((noon() + Duration::hours(24)).timestamp_millis().to_string())
        );
        assert_eq!(choices.load(), Some(choice));
    }

    #[test]
    fn malformed_entries_read_as_absent() {
        let backing = Arc::new(MemoryStore::default());
        let choices = ChoiceStore::new(backing.clone());

        backing.set(CHOICE_KEY, "continue").unwrap();
        assert_eq!(choices.load(), None, "missing expiry");

        backing.set(CHOICE_EXPIRY_KEY, "tomorrow").unwrap();
        assert_eq!(choices.load(), None, "unparsable expiry");

        backing.set(CHOICE_KEY, "maybe").unwrap();
        backing.set(CHOICE_EXPIRY_KEY, "1717243200000").unwrap();
        assert_eq!(choices.load(), None, "unknown value");
    }

    #[test]
    fn continue_expires_after_ttl() {
        let choice = UserChoice::continue_for(noon(), Duration::hours(24));

        assert!(choice.suppresses_overlay(noon() + Duration::hours(23)));
        assert!(choice.suppresses_overlay(choice.expiry));
        assert!(!choice.suppresses_overlay(choice.expiry + Duration::milliseconds(1)));
    }

    #[test]
    fn refresh_never_suppresses() {
        let choice = UserChoice {
            value: UserChoiceValue::Refresh,
            expiry: noon() + Duration::hours(24),
        };
        assert!(!choice.suppresses_overlay(noon()));
    }

    #[test]
    fn json_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("choice.json");

        {
            let store = JsonFileStore::new(path.clone()).unwrap();
            store.set(CHOICE_KEY, "continue").unwrap();
        }

        let reopened = JsonFileStore::new(path.clone()).unwrap();
        assert_eq!(reopened.get(CHOICE_KEY).as_deref(), Some("continue"));

        reopened.remove(CHOICE_KEY).unwrap();
        assert_eq!(JsonFileStore::new(path).unwrap().get(CHOICE_KEY), None);
    }

    #[test]
    fn corrupt_json_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("choice.json");
        fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(path).unwrap();
        assert_eq!(store.get(CHOICE_KEY), None);
    }
}
