//! SQLite schema for the catalog.
//!
//! Everything here is derived from sidecars and can be dropped and rebuilt
//! with [`Catalog::index_all`](super::Catalog::index_all).

use std::time::Duration;

use rusqlite::Connection;

/// Schema applied on every open; all statements are idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS assets (
    asset_id TEXT PRIMARY KEY,
    original_path TEXT NOT NULL,
    archive_path TEXT NOT NULL,
    file_name TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    mime_type TEXT,
    checksum_sha256 TEXT,
    checksum_verified_at TEXT,
    profile_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    indexed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_assets_archive_path ON assets(archive_path);
CREATE INDEX IF NOT EXISTS idx_assets_profile_id ON assets(profile_id);
CREATE INDEX IF NOT EXISTS idx_assets_mime_type ON assets(mime_type);
CREATE INDEX IF NOT EXISTS idx_assets_checksum ON assets(checksum_sha256);
CREATE INDEX IF NOT EXISTS idx_assets_created_at ON assets(created_at);

CREATE TABLE IF NOT EXISTS asset_metadata (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    asset_id TEXT NOT NULL REFERENCES assets(asset_id) ON DELETE CASCADE,
    field_name TEXT NOT NULL,
    field_value TEXT NOT NULL,
    field_kind TEXT NOT NULL,
    UNIQUE(asset_id, field_name)
);

CREATE INDEX IF NOT EXISTS idx_metadata_field ON asset_metadata(field_name, field_value);

CREATE VIRTUAL TABLE IF NOT EXISTS assets_fts USING fts5(
    asset_id UNINDEXED,
    file_name,
    original_path,
    metadata_text
);

CREATE TRIGGER IF NOT EXISTS assets_fts_delete AFTER DELETE ON assets BEGIN
    DELETE FROM assets_fts WHERE asset_id = old.asset_id;
END;
"#;

/// Open a connection with the catalog's pragmas applied
pub fn connect(path: &std::path::Path, busy_timeout: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        PRAGMA temp_store=MEMORY;
        ",
    )?;
    Ok(conn)
}

/// Create tables, indexes and triggers if missing
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_schema_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let conn = connect(&dir.path().join("c.db"), Duration::from_secs(1)).unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_delete_cascades() {
        let dir = TempDir::new().unwrap();
        let conn = connect(&dir.path().join("c.db"), Duration::from_secs(1)).unwrap();
        ensure_schema(&conn).unwrap();

        conn.execute_batch(
            "INSERT INTO assets VALUES ('a', '/o', 'assets/x', 'x', 1, NULL, 'd', NULL, NULL, 't', 't', 't');
             INSERT INTO asset_metadata (asset_id, field_name, field_value, field_kind) VALUES ('a', 'k', 'v', 'text');
             INSERT INTO assets_fts (asset_id, file_name, original_path, metadata_text) VALUES ('a', 'x', '/o', 'v');
             DELETE FROM assets WHERE asset_id = 'a';",
        )
        .unwrap();

        let meta: i64 = conn
            .query_row("SELECT COUNT(*) FROM asset_metadata", [], |row| row.get(0))
            .unwrap();
        let fts: i64 = conn
            .query_row("SELECT COUNT(*) FROM assets_fts", [], |row| row.get(0))
            .unwrap();
        assert_eq!((meta, fts), (0, 0));
    }
}
