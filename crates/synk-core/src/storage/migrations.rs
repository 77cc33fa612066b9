//! Database schema migrations for the sync state store.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 for a fresh database.
fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    match conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    }) {
        Ok(version) => Ok(version),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// v1: links, cursors and per-item snapshots.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS link_records (
            user_id        TEXT NOT NULL,
            link_id        TEXT NOT NULL,
            notion_id      TEXT NOT NULL,
            google_id      TEXT NOT NULL,
            notion_hash    TEXT NOT NULL,
            google_hash    TEXT NOT NULL,
            last_synced_at TEXT NOT NULL,
            PRIMARY KEY (user_id, link_id)
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_links_notion ON link_records(user_id, notion_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_links_google ON link_records(user_id, google_id);

        CREATE TABLE IF NOT EXISTS sync_cursors (
            user_id            TEXT NOT NULL,
            provider           TEXT NOT NULL,
            token              TEXT,
            snapshot_timestamp TEXT NOT NULL,
            PRIMARY KEY (user_id, provider)
        );

        CREATE TABLE IF NOT EXISTS snapshots (
            user_id   TEXT NOT NULL,
            provider  TEXT NOT NULL,
            item_id   TEXT NOT NULL,
            item_json TEXT NOT NULL,
            PRIMARY KEY (user_id, provider, item_id)
        );",
    )?;
    set_schema_version(conn, 1)
}

/// v2: last cycle status per user.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_status (
            user_id     TEXT PRIMARY KEY,
            status_json TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );",
    )?;
    set_schema_version(conn, 2)
}
