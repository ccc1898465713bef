//! Punishment tracker
//!
//! Async facade over a [`PunishmentStore`]. Every read that returns a record
//! checks its expiry first and evicts it if it has run out, so callers never
//! see an expired punishment. An eviction is reported back as
//! [`PunishmentLookup::Evicted`] so the caller can lift the restriction.
//! Store I/O runs on the blocking pool.

use crate::clock::Clock;
use crate::punishment::{PunishmentRecord, PunishmentStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Result of reading one account's punishment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PunishmentLookup {
    Active(PunishmentRecord),
    /// The record had run out and this read deleted it
    Evicted(PunishmentRecord),
    Absent,
}

impl PunishmentLookup {
    #[must_use]
    pub fn active(self) -> Option<PunishmentRecord> {
        match self {
            PunishmentLookup::Active(record) => Some(record),
            PunishmentLookup::Evicted(_) | PunishmentLookup::Absent => None,
        }
    }
}

/// Tracks active punishments by community account id
#[derive(Clone)]
pub struct PunishmentTracker {
    store: Arc<dyn PunishmentStore>,
    clock: Arc<dyn Clock>,
}

impl PunishmentTracker {
    pub fn new(store: Arc<dyn PunishmentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run a store operation off the async workers
    async fn with_store<T, F>(&self, operation: &'static str, f: F) -> Option<T>
    where
        F: FnOnce(&dyn PunishmentStore) -> T + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || f(&*store)).await {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Punishment store task failed during {operation}: {e}");
                None
            }
        }
    }

    /// Add or replace the punishment for a community account
    pub async fn add_punishment(&self, community_id: &str, record: PunishmentRecord) {
        let community_id = community_id.to_string();
        self.with_store("add", move |store| store.save(&community_id, &record))
            .await;
    }

    pub async fn remove_punishment(&self, community_id: &str) {
        let community_id = community_id.to_string();
        self.with_store("remove", move |store| store.remove(&community_id))
            .await;
    }

    /// Whether the account currently has an unexpired punishment
    pub async fn is_punished(&self, community_id: &str) -> bool {
        self.get_punishment(community_id).await.is_some()
    }

    /// The account's unexpired punishment, evicting it if it has run out
    pub async fn get_punishment(&self, community_id: &str) -> Option<PunishmentRecord> {
        self.lookup(community_id).await.active()
    }

    /// Read the account's punishment, evicting it if it has run out.
    ///
    /// The delete only goes through if the stored row is still expired, so a
    /// replacement saved between the read and the delete survives and is
    /// returned instead. `Evicted` is reported to exactly one reader.
    pub async fn lookup(&self, community_id: &str) -> PunishmentLookup {
        let now = self.clock.now();
        let community_id = community_id.to_string();
        self.with_store("get", move |store| {
            let Some(record) = store.get(&community_id) else {
                return PunishmentLookup::Absent;
            };
            if !record.is_expired(now) {
                return PunishmentLookup::Active(record);
            }
            if store.remove_if_expired(&community_id, now) {
                debug!(community_id = %community_id, "Evicted expired punishment on read");
                return PunishmentLookup::Evicted(record);
            }
            match store.get(&community_id) {
                Some(current) if !current.is_expired(now) => PunishmentLookup::Active(current),
                _ => PunishmentLookup::Absent,
            }
        })
        .await
        .unwrap_or(PunishmentLookup::Absent)
    }

    /// Snapshot of every record whose expiry is at or before `now`
    pub async fn get_expired_punishments(
        &self,
        now: DateTime<Utc>,
    ) -> HashMap<String, PunishmentRecord> {
        self.with_store("get expired", move |store| store.get_expired(now))
            .await
            .unwrap_or_default()
    }

    /// Delete every record whose expiry is at or before `now`
    pub async fn clean_expired(&self, now: DateTime<Utc>) -> usize {
        self.with_store("clean expired", move |store| store.clean_expired(now))
            .await
            .unwrap_or_default()
    }

    /// Every stored record, expired or not. Diagnostics only.
    pub async fn get_all_punishments(&self) -> HashMap<String, PunishmentRecord> {
        self.with_store("get all", |store| store.get_all())
            .await
            .unwrap_or_default()
    }

    pub async fn close(&self) {
        self.with_store("close", |store| store.close()).await;
    }
}
