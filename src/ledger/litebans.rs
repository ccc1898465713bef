//! LiteBans database ledger
//!
//! Reads the SQLite database the LiteBans plugin writes on the game server.
//! Pull queries answer retroactive syncs. A poller walks each punishment
//! table by row id and turns new rows and rows that went inactive into
//! [`LedgerEvent`]s.

use crate::ledger::{Ledger, LedgerEntry, LedgerEntryKind, LedgerError, LedgerEvent, LedgerResult};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const ENTRY_COLUMNS: &str = "id, uuid, reason, until, active";

/// LiteBans ledger backed by its SQLite database
#[derive(Clone)]
pub struct LiteBansLedger {
    conn: Arc<Mutex<Connection>>,
    prefix: String,
}

/// How far the poller has read and which entries it saw in force
#[derive(Debug, Clone, Default)]
struct PollCursor {
    last_id: HashMap<LedgerEntryKind, i64>,
    active: HashMap<(LedgerEntryKind, i64), LedgerEntry>,
}

/// One punishment row
struct EntryRow {
    id: i64,
    uuid: Option<String>,
    reason: Option<String>,
    until: i64,
    active: bool,
}

impl EntryRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            uuid: row.get(1)?,
            reason: row.get(2)?,
            until: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
            active: row.get(4)?,
        })
    }

    /// LiteBans writes `-1` or `0` for entries that never end
    fn into_entry(self, kind: LedgerEntryKind) -> LedgerEntry {
        LedgerEntry {
            game_uuid: self.uuid,
            kind,
            reason: self.reason.filter(|reason| !reason.is_empty()),
            date_end: self.until.max(0),
        }
    }
}

impl LiteBansLedger {
    /// Open the LiteBans database read-only
    ///
    /// # Errors
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, prefix: &str) -> LedgerResult<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!("Connected to LiteBans database at {}", path.as_ref().display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            prefix: prefix.to_string(),
        })
    }

    fn table(prefix: &str, kind: LedgerEntryKind) -> String {
        match kind {
            LedgerEntryKind::Ban => format!("{prefix}bans"),
            LedgerEntryKind::Mute => format!("{prefix}mutes"),
            LedgerEntryKind::Warn => format!("{prefix}warnings"),
        }
    }

    /// Run a query on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&Connection, &str) -> LedgerResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let prefix = self.prefix.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| LedgerError::Unavailable)?;
            f(&guard, &prefix)
        })
        .await
        .map_err(|e| LedgerError::Query(format!("ledger task failed: {e}")))?
    }

    async fn active_entry(
        &self,
        game_uuid: Uuid,
        kind: LedgerEntryKind,
    ) -> LedgerResult<Option<LedgerEntry>> {
        let now = Utc::now().timestamp_millis();
        self.with_conn(move |conn, prefix| {
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM {} \
                 WHERE uuid = ?1 AND active = 1 AND (until <= 0 OR until > ?2) \
                 ORDER BY id DESC LIMIT 1",
                Self::table(prefix, kind)
            );
            let row = conn
                .query_row(&sql, params![game_uuid.to_string(), now], EntryRow::read)
                .optional()?;
            Ok(row.map(|row| row.into_entry(kind)))
        })
        .await
    }

    /// Spawn the poller that feeds `tx` until the receiver goes away
    pub fn start_polling(&self, period: Duration, tx: Sender<LedgerEvent>) -> JoinHandle<()> {
        let ledger = self.clone();
        tokio::spawn(async move {
            info!("Polling LiteBans every {}s", period.as_secs());
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut cursor: Option<PollCursor> = None;

            loop {
                interval.tick().await;
                if tx.is_closed() {
                    break;
                }

                let current = cursor.clone();
                let result = ledger
                    .with_conn(move |conn, prefix| match current {
                        Some(mut cursor) => {
                            let events = poll(conn, prefix, &mut cursor);
                            Ok((cursor, events))
                        }
                        None => bootstrap(conn, prefix).map(|cursor| (cursor, Ok(Vec::new()))),
                    })
                    .await;

                let events = match result {
                    Ok((next, events)) => {
                        cursor = Some(next);
                        events
                    }
                    Err(e) => {
                        error!("Failed to read LiteBans cursor: {e}");
                        continue;
                    }
                };
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        warn!("Failed to poll LiteBans: {e}");
                        continue;
                    }
                };

                for event in events {
                    if tx.send(event).await.is_err() {
                        info!("Ledger event receiver closed");
                        return;
                    }
                }
            }
            info!("LiteBans poller stopped");
        })
    }
}

/// Start from the current end of each table so old entries are not replayed
fn bootstrap(conn: &Connection, prefix: &str) -> LedgerResult<PollCursor> {
    let mut cursor = PollCursor::default();
    for kind in [LedgerEntryKind::Ban, LedgerEntryKind::Mute, LedgerEntryKind::Warn] {
        let table = LiteBansLedger::table(prefix, kind);
        let last_id: i64 =
            conn.query_row(&format!("SELECT COALESCE(MAX(id), 0) FROM {table}"), [], |row| {
                row.get(0)
            })?;
        cursor.last_id.insert(kind, last_id);

        if kind == LedgerEntryKind::Warn {
            continue;
        }
        let mut stmt =
            conn.prepare(&format!("SELECT {ENTRY_COLUMNS} FROM {table} WHERE active = 1"))?;
        for row in stmt.query_map([], EntryRow::read)? {
            let row = row?;
            cursor.active.insert((kind, row.id), row.into_entry(kind));
        }
    }
    debug!(
        "LiteBans cursor starts with {} entries in force",
        cursor.active.len()
    );
    Ok(cursor)
}

/// Read everything that changed since the last poll
///
/// The cursor is left untouched if any table cannot be read, so nothing is
/// skipped on the next attempt.
fn poll(
    conn: &Connection,
    prefix: &str,
    cursor: &mut PollCursor,
) -> LedgerResult<Vec<LedgerEvent>> {
    let mut next = cursor.clone();
    let events = poll_tables(conn, prefix, &mut next)?;
    *cursor = next;
    Ok(events)
}

fn poll_tables(
    conn: &Connection,
    prefix: &str,
    cursor: &mut PollCursor,
) -> LedgerResult<Vec<LedgerEvent>> {
    let mut events = Vec::new();
    for kind in [LedgerEntryKind::Ban, LedgerEntryKind::Mute, LedgerEntryKind::Warn] {
        let table = LiteBansLedger::table(prefix, kind);
        let last_id = cursor.last_id.get(&kind).copied().unwrap_or(0);

        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM {table} WHERE id > ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![last_id], EntryRow::read)?
            .collect::<Result<Vec<_>, _>>()?;

        if kind != LedgerEntryKind::Warn {
            let mut stmt = conn.prepare(&format!(
                "SELECT id FROM {table} WHERE active = 1 AND id <= ?1"
            ))?;
            let still_active = stmt
                .query_map(params![last_id], |row| row.get::<_, i64>(0))?
                .collect::<Result<HashSet<_>, _>>()?;
            let lifted: Vec<_> = cursor
                .active
                .keys()
                .filter(|(entry_kind, id)| *entry_kind == kind && !still_active.contains(id))
                .copied()
                .collect();
            for key in lifted {
                if let Some(entry) = cursor.active.remove(&key) {
                    events.push(LedgerEvent::EntryRemoved(entry));
                }
            }
        }

        for row in rows {
            cursor.last_id.insert(kind, row.id);
            let (id, active) = (row.id, row.active);
            let entry = row.into_entry(kind);
            if kind == LedgerEntryKind::Warn {
                events.push(LedgerEvent::EntryAdded(entry));
            } else if active {
                cursor.active.insert((kind, id), entry.clone());
                events.push(LedgerEvent::EntryAdded(entry));
            }
        }
    }
    Ok(events)
}

#[async_trait]
impl Ledger for LiteBansLedger {
    async fn active_ban(&self, game_uuid: Uuid) -> LedgerResult<Option<LedgerEntry>> {
        self.active_entry(game_uuid, LedgerEntryKind::Ban).await
    }

    async fn active_mute(&self, game_uuid: Uuid) -> LedgerResult<Option<LedgerEntry>> {
        self.active_entry(game_uuid, LedgerEntryKind::Mute).await
    }

    async fn player_name(&self, game_uuid: Uuid) -> LedgerResult<Option<String>> {
        self.with_conn(move |conn, prefix| {
            let name = conn
                .query_row(
                    &format!(
                        "SELECT name FROM {prefix}history WHERE uuid = ?1 ORDER BY date DESC LIMIT 1"
                    ),
                    params![game_uuid.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(name)
        })
        .await
    }
}
