//! Game-server moderation ledger
//!
//! The ledger is the authority on who is banned or muted in game. It pushes
//! [`LedgerEvent`]s as entries are added or removed, and can be asked for a
//! player's live state when an account is linked late.

use crate::punishment::PunishmentKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

mod litebans;
#[cfg(test)]
mod memory;

pub use litebans::LiteBansLedger;
#[cfg(test)]
pub use memory::MemoryLedger;

/// Kind of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntryKind {
    Ban,
    Mute,
    Warn,
}

impl fmt::Display for LedgerEntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ban => write!(f, "ban"),
            Self::Mute => write!(f, "mute"),
            Self::Warn => write!(f, "warn"),
        }
    }
}

impl From<PunishmentKind> for LedgerEntryKind {
    fn from(kind: PunishmentKind) -> Self {
        match kind {
            PunishmentKind::Ban => Self::Ban,
            PunishmentKind::Mute => Self::Mute,
        }
    }
}

/// Only bans and mutes restrict a member; a warning hands its kind back
impl TryFrom<LedgerEntryKind> for PunishmentKind {
    type Error = LedgerEntryKind;

    fn try_from(kind: LedgerEntryKind) -> Result<Self, Self::Error> {
        match kind {
            LedgerEntryKind::Ban => Ok(Self::Ban),
            LedgerEntryKind::Mute => Ok(Self::Mute),
            LedgerEntryKind::Warn => Err(kind),
        }
    }
}

/// A single ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Punished game account. Entries against IP addresses carry no uuid.
    pub game_uuid: Option<String>,
    pub kind: LedgerEntryKind,
    pub reason: Option<String>,
    /// Epoch millis when the entry ends, `0` when it never does
    pub date_end: i64,
}

impl LedgerEntry {
    pub fn new(
        game_uuid: impl Into<String>,
        kind: LedgerEntryKind,
        reason: Option<String>,
        date_end: i64,
    ) -> Self {
        Self {
            game_uuid: Some(game_uuid.into()),
            kind,
            reason,
            date_end,
        }
    }

    /// Whether the entry is still in force at `now_millis`
    #[must_use]
    pub fn is_active_at(&self, now_millis: i64) -> bool {
        self.date_end == 0 || self.date_end > now_millis
    }
}

/// Lifecycle event pushed by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    EntryAdded(LedgerEntry),
    EntryRemoved(LedgerEntry),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger is not available")]
    Unavailable,

    #[error("Ledger query failed: {0}")]
    Query(String),

    #[error("Ledger database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Pull queries against the ledger's live state
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// The player's active ban, if any
    async fn active_ban(&self, game_uuid: Uuid) -> LedgerResult<Option<LedgerEntry>>;

    /// The player's active mute, if any
    async fn active_mute(&self, game_uuid: Uuid) -> LedgerResult<Option<LedgerEntry>>;

    /// Last known display name of the player
    async fn player_name(&self, game_uuid: Uuid) -> LedgerResult<Option<String>>;
}
