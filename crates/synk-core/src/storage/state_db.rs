//! SQLite-backed sync state.
//!
//! Provides persistent storage for:
//! - Link records (Notion id <-> Google id, last converged hashes)
//! - Per-provider change cursors
//! - Per-provider item snapshots used by change detection
//! - The last cycle status per user

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::data_dir;
use super::migrations;
use crate::error::DatabaseError;
use crate::model::{LinkRecord, Provider, Snapshot, SyncCursor, SyncItem};

/// Everything a successful cycle persists, written in one transaction.
#[derive(Debug, Clone, Default)]
pub struct CycleCommit {
    pub upsert_links: Vec<LinkRecord>,
    pub remove_links: Vec<String>,
    /// Cursor and snapshot for each provider that was fetched healthily.
    pub providers: Vec<(SyncCursor, Snapshot)>,
}

impl CycleCommit {
    pub fn is_empty(&self) -> bool {
        self.upsert_links.is_empty() && self.remove_links.is_empty() && self.providers.is_empty()
    }
}

/// SQLite database for sync state.
///
/// The connection sits behind a mutex so one handle can be shared by every
/// user's cycle; each call holds the lock only for its own statements.
pub struct StateDb {
    conn: Mutex<Connection>,
}

impl StateDb {
    /// Open the database at `~/.config/synk/synk.db`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let dir = data_dir().map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Self::open_at(&dir.join("synk.db"))
    }

    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for tests and dry runs).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory().map_err(|source| DatabaseError::OpenFailed {
            path: ":memory:".into(),
            source,
        })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::Locked)
    }

    /// All links known for `user`, ordered by link id.
    pub fn load_links(&self, user: &str) -> Result<Vec<LinkRecord>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT link_id, notion_id, google_id, notion_hash, google_hash, last_synced_at
             FROM link_records WHERE user_id = ?1 ORDER BY link_id",
        )?;
        let rows = stmt.query_map([user], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut links = Vec::new();
        for row in rows {
            let (link_id, notion_id, google_id, notion_hash, google_hash, synced) = row?;
            links.push(LinkRecord {
                link_id,
                notion_id,
                google_id,
                notion_hash,
                google_hash,
                last_synced_at: parse_time("link_records", &synced)?,
            });
        }
        Ok(links)
    }

    pub fn load_cursor(
        &self,
        user: &str,
        provider: Provider,
    ) -> Result<Option<SyncCursor>, DatabaseError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT token, snapshot_timestamp FROM sync_cursors
                 WHERE user_id = ?1 AND provider = ?2",
                params![user, provider.as_str()],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        row.map(|(token, ts)| -> Result<SyncCursor, DatabaseError> {
            Ok(SyncCursor::new(provider, token, parse_time("sync_cursors", &ts)?))
        })
        .transpose()
    }

    pub fn load_snapshot(&self, user: &str, provider: Provider) -> Result<Snapshot, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT item_json FROM snapshots WHERE user_id = ?1 AND provider = ?2",
        )?;
        let rows = stmt.query_map(params![user, provider.as_str()], |row| row.get::<_, String>(0))?;

        let mut items = Vec::new();
        for row in rows {
            let json = row?;
            let item: SyncItem = serde_json::from_str(&json).map_err(|e| DatabaseError::CorruptRow {
                table: "snapshots",
                message: e.to_string(),
            })?;
            items.push(item);
        }
        Ok(Snapshot::from_items(provider, items))
    }

    /// Persist a cycle's results atomically.
    ///
    /// Removals run before upserts so a link re-keyed in the same cycle
    /// does not trip the per-side unique indexes.
    pub fn commit(&self, user: &str, commit: &CycleCommit) -> Result<(), DatabaseError> {
        if commit.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for link_id in &commit.remove_links {
            tx.execute(
                "DELETE FROM link_records WHERE user_id = ?1 AND link_id = ?2",
                params![user, link_id],
            )?;
        }

        for link in &commit.upsert_links {
            tx.execute(
                "INSERT OR REPLACE INTO link_records
                 (user_id, link_id, notion_id, google_id, notion_hash, google_hash, last_synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user,
                    link.link_id,
                    link.notion_id,
                    link.google_id,
                    link.notion_hash,
                    link.google_hash,
                    link.last_synced_at.to_rfc3339(),
                ],
            )?;
        }

        for (cursor, snapshot) in &commit.providers {
            tx.execute(
                "INSERT OR REPLACE INTO sync_cursors (user_id, provider, token, snapshot_timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    user,
                    cursor.provider.as_str(),
                    cursor.token,
                    cursor.snapshot_timestamp.to_rfc3339(),
                ],
            )?;

            tx.execute(
                "DELETE FROM snapshots WHERE user_id = ?1 AND provider = ?2",
                params![user, snapshot.provider.as_str()],
            )?;
            let mut insert = tx.prepare(
                "INSERT INTO snapshots (user_id, provider, item_id, item_json) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (id, item) in &snapshot.items {
                let json = serde_json::to_string(item)
                    .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
                insert.execute(params![user, snapshot.provider.as_str(), id, json])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Forget the cursor of one provider so its next listing is a full scan.
    ///
    /// The snapshot is kept; the full listing replaces it on the next commit.
    pub fn clear_cursor(&self, user: &str, provider: Provider) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM sync_cursors WHERE user_id = ?1 AND provider = ?2",
            params![user, provider.as_str()],
        )?;
        Ok(())
    }

    /// Drop everything tied to a disconnected provider: links, its cursor and snapshot.
    pub fn clear_provider(&self, user: &str, provider: Provider) -> Result<(), DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM link_records WHERE user_id = ?1", [user])?;
        tx.execute(
            "DELETE FROM sync_cursors WHERE user_id = ?1 AND provider = ?2",
            params![user, provider.as_str()],
        )?;
        tx.execute(
            "DELETE FROM snapshots WHERE user_id = ?1 AND provider = ?2",
            params![user, provider.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn save_status<T: Serialize>(&self, user: &str, status: &T) -> Result<(), DatabaseError> {
        let json =
            serde_json::to_string(status).map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO sync_status (user_id, status_json, updated_at)
             VALUES (?1, ?2, ?3)",
            params![user, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_status<T: DeserializeOwned>(&self, user: &str) -> Result<Option<T>, DatabaseError> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT status_json FROM sync_status WHERE user_id = ?1",
                [user],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| {
            serde_json::from_str(&j).map_err(|e| DatabaseError::CorruptRow {
                table: "sync_status",
                message: e.to_string(),
            })
        })
        .transpose()
    }
}

fn parse_time(table: &'static str, raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptRow {
            table,
            message: format!("bad timestamp '{raw}': {e}"),
        })
}
