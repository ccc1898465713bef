//! In-process ledger for exercising the bridge end to end

use crate::ledger::{Ledger, LedgerEntry, LedgerEntryKind, LedgerError, LedgerEvent, LedgerResult};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use uuid::Uuid;

/// In-process ledger that keeps the active entries and publishes every change
#[derive(Clone)]
pub struct MemoryLedger {
    active: Arc<DashMap<(Uuid, LedgerEntryKind), LedgerEntry>>,
    names: Arc<DashMap<Uuid, String>>,
    tx: Sender<LedgerEvent>,
}

impl MemoryLedger {
    /// Create a ledger and the receiving end of its event stream
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Receiver<LedgerEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let ledger = Self {
            active: Arc::new(DashMap::new()),
            names: Arc::new(DashMap::new()),
            tx,
        };
        (ledger, rx)
    }

    pub fn set_player_name(&self, game_uuid: Uuid, name: impl Into<String>) {
        self.names.insert(game_uuid, name.into());
    }

    /// Record a new entry and publish it
    ///
    /// # Errors
    /// Returns an error if nobody is listening for ledger events any more.
    pub async fn add_entry(&self, entry: LedgerEntry) -> LedgerResult<()> {
        if entry.kind != LedgerEntryKind::Warn {
            if let Some(uuid) = entry.game_uuid.as_deref().and_then(|s| Uuid::parse_str(s).ok()) {
                self.active.insert((uuid, entry.kind), entry.clone());
            }
        }
        self.publish(LedgerEvent::EntryAdded(entry)).await
    }

    /// Lift an entry and publish the removal
    ///
    /// # Errors
    /// Returns an error if nobody is listening for ledger events any more.
    pub async fn remove_entry(&self, game_uuid: Uuid, kind: LedgerEntryKind) -> LedgerResult<()> {
        let entry = self
            .active
            .remove(&(game_uuid, kind))
            .map(|(_, entry)| entry)
            .unwrap_or_else(|| LedgerEntry::new(game_uuid.to_string(), kind, None, 0));
        self.publish(LedgerEvent::EntryRemoved(entry)).await
    }

    async fn publish(&self, event: LedgerEvent) -> LedgerResult<()> {
        self.tx.send(event).await.map_err(|_| LedgerError::Unavailable)
    }

    fn active_entry(&self, game_uuid: Uuid, kind: LedgerEntryKind) -> Option<LedgerEntry> {
        let now = Utc::now().timestamp_millis();
        self.active
            .get(&(game_uuid, kind))
            .map(|entry| entry.value().clone())
            .filter(|entry| entry.is_active_at(now))
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn active_ban(&self, game_uuid: Uuid) -> LedgerResult<Option<LedgerEntry>> {
        Ok(self.active_entry(game_uuid, LedgerEntryKind::Ban))
    }

    async fn active_mute(&self, game_uuid: Uuid) -> LedgerResult<Option<LedgerEntry>> {
        Ok(self.active_entry(game_uuid, LedgerEntryKind::Mute))
    }

    async fn player_name(&self, game_uuid: Uuid) -> LedgerResult<Option<String>> {
        Ok(self.names.get(&game_uuid).map(|name| name.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_ledger_publishes_and_answers_queries() {
        let (ledger, mut rx) = MemoryLedger::new(8);
        let uuid = Uuid::new_v4();
        ledger.set_player_name(uuid, "Steve");

        let ban = LedgerEntry::new(uuid.to_string(), LedgerEntryKind::Ban, Some("x-ray".into()), 0);
        ledger.add_entry(ban.clone()).await.unwrap();
        assert_eq!(rx.recv().await, Some(LedgerEvent::EntryAdded(ban.clone())));

        assert_eq!(ledger.active_ban(uuid).await.unwrap(), Some(ban.clone()));
        assert_eq!(ledger.active_mute(uuid).await.unwrap(), None);
        assert_eq!(ledger.player_name(uuid).await.unwrap().as_deref(), Some("Steve"));

        ledger.remove_entry(uuid, LedgerEntryKind::Ban).await.unwrap();
        assert_eq!(rx.recv().await, Some(LedgerEvent::EntryRemoved(ban)));
        assert_eq!(ledger.active_ban(uuid).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_ledger_ignores_elapsed_entries() {
        let (ledger, _rx) = MemoryLedger::new(8);
        let uuid = Uuid::new_v4();
        let elapsed = LedgerEntry::new(uuid.to_string(), LedgerEntryKind::Mute, None, 1);

        ledger.add_entry(elapsed).await.unwrap();

        assert_eq!(ledger.active_mute(uuid).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_ledger_without_listener_is_unavailable() {
        let (ledger, rx) = MemoryLedger::new(1);
        drop(rx);

        let warn = LedgerEntry::new(Uuid::new_v4().to_string(), LedgerEntryKind::Warn, None, 0);
        assert!(matches!(
            ledger.add_entry(warn).await,
            Err(LedgerError::Unavailable)
        ));
    }
}
