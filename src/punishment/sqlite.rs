//! SQLite-backed punishment store
//!
//! One table keyed by community account id. Expiry and issue instants are
//! stored as epoch millis with `-1` marking a permanent punishment.

use crate::punishment::{
    Expiry, PERMANENT_SENTINEL, PunishmentKind, PunishmentRecord, PunishmentStore, StoreError,
    StoreResult,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

const COLUMNS: &str =
    "community_id, game_uuid, player_name, kind, reason, expiry_time, issued_time";

/// Punishment store persisted in a SQLite database
pub struct SqlitePunishmentStore {
    conn: Mutex<Option<Connection>>,
}

impl SqlitePunishmentStore {
    /// Open (or create) the database at `path` and make sure the table exists
    ///
    /// # Errors
    /// Returns an error if the parent directory cannot be created, the file
    /// cannot be opened, or the schema cannot be created.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory store
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        init_schema(&conn)?;
        info!("Punishment store connected");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self.conn.lock().map_err(|_| StoreError::Unavailable)?;
        let conn = guard.as_ref().ok_or(StoreError::Unavailable)?;
        f(conn)
    }

    fn query_map(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<HashMap<String, PunishmentRecord>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, StoredRow::read)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = HashMap::with_capacity(rows.len());
        for row in rows {
            match row.into_record() {
                Ok((community_id, record)) => {
                    records.insert(community_id, record);
                }
                Err(e) => warn!("Skipping unreadable punishment row: {e}"),
            }
        }
        Ok(records)
    }
}

fn init_schema(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS punishments (
            community_id TEXT PRIMARY KEY,
            game_uuid TEXT NOT NULL,
            player_name TEXT NOT NULL,
            kind TEXT NOT NULL,
            reason TEXT,
            expiry_time INTEGER NOT NULL,
            issued_time INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_punishments_expiry ON punishments(expiry_time)",
        [],
    )?;

    Ok(())
}

/// A row as stored, before validation
struct StoredRow {
    community_id: String,
    game_uuid: String,
    player_name: String,
    kind: String,
    reason: Option<String>,
    expiry_time: i64,
    issued_time: i64,
}

impl StoredRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            community_id: row.get(0)?,
            game_uuid: row.get(1)?,
            player_name: row.get(2)?,
            kind: row.get(3)?,
            reason: row.get(4)?,
            expiry_time: row.get(5)?,
            issued_time: row.get(6)?,
        })
    }

    fn into_record(self) -> StoreResult<(String, PunishmentRecord)> {
        let invalid = |reason: String| StoreError::InvalidRow {
            id: self.community_id.clone(),
            reason,
        };

        let game_uuid = Uuid::parse_str(&self.game_uuid)
            .map_err(|e| invalid(format!("bad game uuid: {e}")))?;
        let kind = self
            .kind
            .parse::<PunishmentKind>()
            .map_err(|e| invalid(format!("{e}")))?;
        let issued_at = DateTime::<Utc>::from_timestamp_millis(self.issued_time)
            .ok_or_else(|| invalid(format!("bad issued time {}", self.issued_time)))?;

        let record = PunishmentRecord::new(
            game_uuid,
            self.player_name,
            kind,
            self.reason,
            Expiry::from_millis(self.expiry_time),
            issued_at,
        );
        Ok((self.community_id, record))
    }
}

impl PunishmentStore for SqlitePunishmentStore {
    fn try_save(&self, community_id: &str, record: &PunishmentRecord) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO punishments
                 (community_id, game_uuid, player_name, kind, reason, expiry_time, issued_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    community_id,
                    record.game_uuid.to_string(),
                    record.player_name,
                    record.kind.as_str(),
                    record.reason,
                    record.expiry.as_millis(),
                    record.issued_at().timestamp_millis(),
                ],
            )?;
            Ok(())
        })
    }

    fn try_remove(&self, community_id: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM punishments WHERE community_id = ?1",
                params![community_id],
            )?;
            Ok(())
        })
    }

    fn try_get(&self, community_id: &str) -> StoreResult<Option<PunishmentRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM punishments WHERE community_id = ?1"
            ))?;
            let mut rows = stmt.query_map(params![community_id], StoredRow::read)?;
            match rows.next() {
                Some(row) => Ok(Some(row?.into_record()?.1)),
                None => Ok(None),
            }
        })
    }

    fn try_remove_if_expired(&self, community_id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM punishments
                 WHERE community_id = ?1 AND expiry_time != ?2 AND expiry_time <= ?3",
                params![community_id, PERMANENT_SENTINEL, now.timestamp_millis()],
            )?;
            Ok(removed > 0)
        })
    }

    fn try_get_all(&self) -> StoreResult<HashMap<String, PunishmentRecord>> {
        self.with_conn(|conn| {
            Self::query_map(conn, &format!("SELECT {COLUMNS} FROM punishments"), [])
        })
    }

    fn try_get_expired(&self, now: DateTime<Utc>) -> StoreResult<HashMap<String, PunishmentRecord>> {
        self.with_conn(|conn| {
            Self::query_map(
                conn,
                &format!(
                    "SELECT {COLUMNS} FROM punishments
                     WHERE expiry_time != ?1 AND expiry_time <= ?2"
                ),
                params![PERMANENT_SENTINEL, now.timestamp_millis()],
            )
        })
    }

    fn try_clean_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM punishments WHERE expiry_time != ?1 AND expiry_time <= ?2",
                params![PERMANENT_SENTINEL, now.timestamp_millis()],
            )?;
            Ok(removed)
        })
    }

    fn is_available(&self) -> bool {
        self.conn.lock().is_ok_and(|guard| guard.is_some())
    }

    fn close(&self) {
        if let Ok(mut guard) = self.conn.lock() {
            if guard.take().is_some() {
                info!("Punishment store connection closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::punishment::MemoryPunishmentStore;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    fn record(kind: PunishmentKind, expiry: Expiry) -> PunishmentRecord {
        PunishmentRecord::new(
            Uuid::new_v4(),
            "Steve",
            kind,
            Some("x-ray".to_string()),
            expiry,
            at(500),
        )
    }

    #[test]
    fn test_save_and_get_round_trip() {
        let store = SqlitePunishmentStore::in_memory().unwrap();
        let ban = record(PunishmentKind::Ban, Expiry::At(at(60_000)));
        let mute = PunishmentRecord::new(
            Uuid::new_v4(),
            "Alex",
            PunishmentKind::Mute,
            None,
            Expiry::Permanent,
            at(1_000),
        );

        store.save("42", &ban);
        store.save("43", &mute);

        assert_eq!(store.get("42"), Some(ban));
        assert_eq!(store.get("43"), Some(mute));
        assert_eq!(store.get("44"), None);
        assert_eq!(store.get_all().len(), 2);
    }

    #[test]
    fn test_upsert_replaces_every_column() {
        let store = SqlitePunishmentStore::in_memory().unwrap();
        store.save("42", &record(PunishmentKind::Ban, Expiry::Permanent));

        let replacement = PunishmentRecord::new(
            Uuid::new_v4(),
            "Alex",
            PunishmentKind::Mute,
            None,
            Expiry::At(at(9_000)),
            at(2_000),
        );
        store.save("42", &replacement);

        let stored = store.get("42").unwrap();
        assert_eq!(stored, replacement);
        assert_eq!(stored.kind, PunishmentKind::Mute);
        assert_eq!(stored.reason, None);
        assert_eq!(stored.issued_at(), at(2_000));
    }

    #[test]
    fn test_clean_expired_counts_and_keeps_permanent() {
        let store = SqlitePunishmentStore::in_memory().unwrap();
        store.save("1", &record(PunishmentKind::Ban, Expiry::At(at(1_000))));
        store.save("2", &record(PunishmentKind::Mute, Expiry::At(at(3_000))));
        store.save("3", &record(PunishmentKind::Ban, Expiry::Permanent));

        let expired = store.get_expired(at(3_000));
        assert_eq!(expired.len(), 2);
        assert!(!expired.contains_key("3"));

        assert_eq!(store.clean_expired(at(3_000)), 2);
        assert_eq!(store.clean_expired(at(3_000)), 0);
        assert!(store.get("3").is_some());
    }

    #[test]
    fn test_remove_if_expired_spares_replacement() {
        let store = SqlitePunishmentStore::in_memory().unwrap();
        store.save("42", &record(PunishmentKind::Mute, Expiry::At(at(1_000))));
        store.save("42", &record(PunishmentKind::Ban, Expiry::Permanent));

        assert!(!store.remove_if_expired("42", at(2_000)));
        assert_eq!(store.get("42").map(|r| r.kind), Some(PunishmentKind::Ban));

        store.save("43", &record(PunishmentKind::Mute, Expiry::At(at(1_000))));
        assert!(!store.remove_if_expired("43", at(999)));
        assert!(store.remove_if_expired("43", at(1_000)));
        assert!(store.get("43").is_none());
    }

    #[test]
    fn test_closed_store_reports_unavailable() {
        let store = SqlitePunishmentStore::in_memory().unwrap();
        store.save("42", &record(PunishmentKind::Ban, Expiry::Permanent));
        assert!(store.is_available());

        store.close();

        assert!(!store.is_available());
        assert!(matches!(store.try_get("42"), Err(StoreError::Unavailable)));
        assert!(store.get("42").is_none());
        assert!(store.get_all().is_empty());
        assert_eq!(store.clean_expired(at(0)), 0);
        store.save("43", &record(PunishmentKind::Mute, Expiry::Permanent));
        store.remove("42");
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("punishments.db");
        let ban = record(PunishmentKind::Ban, Expiry::At(at(60_000)));

        {
            let store = SqlitePunishmentStore::open(&path).unwrap();
            store.save("42", &ban);
            store.close();
        }

        let store = SqlitePunishmentStore::open(&path).unwrap();
        assert_eq!(store.get("42"), Some(ban));
    }

    #[test]
    fn test_unreadable_rows_are_skipped() {
        let store = SqlitePunishmentStore::in_memory().unwrap();
        store.save("42", &record(PunishmentKind::Ban, Expiry::Permanent));
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO punishments VALUES ('43', 'not-a-uuid', 'x', 'BAN', NULL, -1, 0)",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        let all = store.get_all();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("42"));
        assert!(matches!(
            store.try_get("43"),
            Err(StoreError::InvalidRow { .. })
        ));
    }

    fn check_clean_expired_exact(store: &dyn PunishmentStore, expiries: &[Option<i64>], now: i64) {
        for (i, expiry) in expiries.iter().enumerate() {
            let expiry = expiry.map_or(Expiry::Permanent, |ms| Expiry::At(at(ms)));
            store.save(&i.to_string(), &record(PunishmentKind::Mute, expiry));
        }

        let expected: Vec<String> = expiries
            .iter()
            .enumerate()
            .filter(|(_, expiry)| expiry.is_some_and(|ms| ms <= now))
            .map(|(i, _)| i.to_string())
            .collect();

        let mut expired: Vec<String> = store.get_expired(at(now)).into_keys().collect();
        expired.sort();
        let mut expected_sorted = expected.clone();
        expected_sorted.sort();
        assert_eq!(expired, expected_sorted);

        assert_eq!(store.clean_expired(at(now)), expected.len());
        assert_eq!(store.clean_expired(at(now)), 0);

        let remaining = store.get_all();
        assert_eq!(remaining.len(), expiries.len() - expected.len());
        assert!(remaining.values().all(|record| !record.is_expired(at(now))));
    }

    proptest! {
        #[test]
        fn prop_clean_expired_removes_exactly_expired(
            expiries in proptest::collection::vec(proptest::option::of(0i64..100_000), 0..40),
            now in 0i64..100_000,
        ) {
            let sqlite = SqlitePunishmentStore::in_memory().unwrap();
            check_clean_expired_exact(&sqlite, &expiries, now);

            let memory = MemoryPunishmentStore::new();
            check_clean_expired_exact(&memory, &expiries, now);
        }
    }
}
