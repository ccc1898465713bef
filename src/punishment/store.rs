//! Punishment store
//!
//! One active record per community account. Backends implement the fallible
//! `try_*` methods; callers use the provided methods, which log failures and
//! degrade to a no-op or an empty result instead of returning an error.

use crate::punishment::{PunishmentRecord, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

/// Durable table of active punishments keyed by community account id
pub trait PunishmentStore: Send + Sync {
    /// Insert or fully replace the record for `community_id`
    fn try_save(&self, community_id: &str, record: &PunishmentRecord) -> StoreResult<()>;

    /// Delete the record for `community_id`; deleting nothing is not an error
    fn try_remove(&self, community_id: &str) -> StoreResult<()>;

    /// Raw lookup, expiry is not checked here
    fn try_get(&self, community_id: &str) -> StoreResult<Option<PunishmentRecord>>;

    /// Delete the record for `community_id` only if it is expired at `now`,
    /// returning whether a row went. A record replaced in the meantime stays.
    fn try_remove_if_expired(&self, community_id: &str, now: DateTime<Utc>) -> StoreResult<bool>;

    fn try_get_all(&self) -> StoreResult<HashMap<String, PunishmentRecord>>;

    /// All records with a real expiry at or before `now`
    fn try_get_expired(&self, now: DateTime<Utc>) -> StoreResult<HashMap<String, PunishmentRecord>>;

    /// Delete all records with a real expiry at or before `now`, returning how many went
    fn try_clean_expired(&self, now: DateTime<Utc>) -> StoreResult<usize>;

    fn is_available(&self) -> bool;

    /// Release the backing connection; later calls report `Unavailable`
    fn close(&self);

    fn save(&self, community_id: &str, record: &PunishmentRecord) {
        if let Err(e) = self.try_save(community_id, record) {
            log_failure("save punishment", community_id, &e);
        }
    }

    fn remove(&self, community_id: &str) {
        if let Err(e) = self.try_remove(community_id) {
            log_failure("remove punishment", community_id, &e);
        }
    }

    fn remove_if_expired(&self, community_id: &str, now: DateTime<Utc>) -> bool {
        self.try_remove_if_expired(community_id, now)
            .unwrap_or_else(|e| {
                log_failure("evict expired punishment", community_id, &e);
                false
            })
    }

    fn get(&self, community_id: &str) -> Option<PunishmentRecord> {
        self.try_get(community_id).unwrap_or_else(|e| {
            log_failure("get punishment", community_id, &e);
            None
        })
    }

    fn get_all(&self) -> HashMap<String, PunishmentRecord> {
        self.try_get_all().unwrap_or_else(|e| {
            log_failure("get all punishments", "*", &e);
            HashMap::new()
        })
    }

    fn get_expired(&self, now: DateTime<Utc>) -> HashMap<String, PunishmentRecord> {
        self.try_get_expired(now).unwrap_or_else(|e| {
            log_failure("get expired punishments", "*", &e);
            HashMap::new()
        })
    }

    fn clean_expired(&self, now: DateTime<Utc>) -> usize {
        self.try_clean_expired(now).unwrap_or_else(|e| {
            log_failure("clean expired punishments", "*", &e);
            0
        })
    }
}

fn log_failure(operation: &str, community_id: &str, error: &StoreError) {
    match error {
        StoreError::Unavailable => {
            warn!(community_id = %community_id, "Cannot {operation}: {error}");
        }
        _ => {
            error!(community_id = %community_id, error = %error, "Failed to {operation}");
        }
    }
}

/// In-process store, used when no database is configured and in tests
#[derive(Clone)]
pub struct MemoryPunishmentStore {
    records: Arc<DashMap<String, PunishmentRecord>>,
    open: Arc<AtomicBool>,
}

impl Default for MemoryPunishmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPunishmentStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }
}

impl PunishmentStore for MemoryPunishmentStore {
    fn try_save(&self, community_id: &str, record: &PunishmentRecord) -> StoreResult<()> {
        self.ensure_open()?;
        self.records.insert(community_id.to_string(), record.clone());
        Ok(())
    }

    fn try_remove(&self, community_id: &str) -> StoreResult<()> {
        self.ensure_open()?;
        self.records.remove(community_id);
        Ok(())
    }

    fn try_get(&self, community_id: &str) -> StoreResult<Option<PunishmentRecord>> {
        self.ensure_open()?;
        Ok(self.records.get(community_id).map(|entry| entry.value().clone()))
    }

    fn try_remove_if_expired(&self, community_id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self
            .records
            .remove_if(community_id, |_, record| record.is_expired(now))
            .is_some())
    }

    fn try_get_all(&self) -> StoreResult<HashMap<String, PunishmentRecord>> {
        self.ensure_open()?;
        Ok(self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    fn try_get_expired(&self, now: DateTime<Utc>) -> StoreResult<HashMap<String, PunishmentRecord>> {
        self.ensure_open()?;
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    fn try_clean_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        self.ensure_open()?;
        let mut removed = 0;
        self.records.retain(|_, record| {
            let expired = record.is_expired(now);
            if expired {
                removed += 1;
            }
            !expired
        });
        Ok(removed)
    }

    fn is_available(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::punishment::{Expiry, PunishmentKind};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn record(kind: PunishmentKind, expiry: Expiry) -> PunishmentRecord {
        PunishmentRecord::new(Uuid::new_v4(), "Steve", kind, None, expiry, at(0))
    }

    #[test]
    fn test_save_and_get() {
        let store = MemoryPunishmentStore::new();
        let ban = record(PunishmentKind::Ban, Expiry::At(at(60_000)));

        store.save("42", &ban);

        assert_eq!(store.get("42"), Some(ban));
        assert_eq!(store.get("43"), None);
    }

    #[test]
    fn test_save_replaces_existing_record() {
        let store = MemoryPunishmentStore::new();
        store.save("42", &record(PunishmentKind::Ban, Expiry::Permanent));

        let mute = PunishmentRecord::new(
            Uuid::new_v4(),
            "Alex",
            PunishmentKind::Mute,
            Some("spam".to_string()),
            Expiry::At(at(5_000)),
            at(1_000),
        );
        store.save("42", &mute);

        let stored = store.get("42").unwrap();
        assert_eq!(stored, mute);
        assert_eq!(store.get_all().len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = MemoryPunishmentStore::new();
        store.save("42", &record(PunishmentKind::Ban, Expiry::Permanent));

        store.remove("42");
        store.remove("42");
        store.remove("never-existed");

        assert!(store.get("42").is_none());
    }

    #[test]
    fn test_expired_queries_skip_permanent() {
        let store = MemoryPunishmentStore::new();
        store.save("1", &record(PunishmentKind::Ban, Expiry::At(at(1_000))));
        store.save("2", &record(PunishmentKind::Mute, Expiry::At(at(2_000))));
        store.save("3", &record(PunishmentKind::Mute, Expiry::At(at(9_000))));
        store.save("4", &record(PunishmentKind::Ban, Expiry::Permanent));

        let expired = store.get_expired(at(2_000));
        assert_eq!(expired.len(), 2);
        assert!(expired.contains_key("1"));
        assert!(expired.contains_key("2"));

        assert_eq!(store.clean_expired(at(2_000)), 2);
        assert_eq!(store.clean_expired(at(2_000)), 0);
        assert_eq!(store.get_all().len(), 2);
        assert!(store.get_expired(at(4_000_000_000_000)).keys().all(|id| id == "3"));
    }

    #[test]
    fn test_remove_if_expired_keeps_live_records() {
        let store = MemoryPunishmentStore::new();
        store.save("1", &record(PunishmentKind::Mute, Expiry::At(at(1_000))));
        store.save("2", &record(PunishmentKind::Ban, Expiry::Permanent));

        assert!(!store.remove_if_expired("1", at(999)));
        assert!(store.remove_if_expired("1", at(1_000)));
        assert!(!store.remove_if_expired("1", at(1_000)));
        assert!(!store.remove_if_expired("2", at(4_000_000_000_000)));
        assert!(!store.remove_if_expired("missing", at(1_000)));
        assert!(store.get("2").is_some());
    }

    #[test]
    fn test_closed_store_degrades() {
        let store = MemoryPunishmentStore::new();
        store.save("42", &record(PunishmentKind::Ban, Expiry::At(at(1_000))));
        store.close();

        assert!(!store.is_available());
        assert!(matches!(store.try_get("42"), Err(StoreError::Unavailable)));
        assert!(store.get("42").is_none());
        assert!(store.get_all().is_empty());
        assert!(store.get_expired(at(5_000)).is_empty());
        assert_eq!(store.clean_expired(at(5_000)), 0);
        assert!(!store.remove_if_expired("42", at(5_000)));

        // Mutations are dropped rather than surfaced
        store.save("43", &record(PunishmentKind::Mute, Expiry::Permanent));
        store.remove("42");
    }
}
