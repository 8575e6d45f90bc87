//! Searchable catalog of archived assets.
//!
//! The catalog is a SQLite projection of the sidecars under `assets/`:
//! - `assets`: one row per asset with the scalar sidecar fields
//! - `asset_metadata`: one row per custom field, tagged with its kind
//! - `assets_fts`: full-text index over names, paths and metadata
//!
//! Each operation opens its own connection (WAL mode) so ingestion,
//! verification and export can use the catalog concurrently.

pub mod schema;
pub mod search;

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{Archive, Asset, AssetMetadata, Metadata, MetadataValue, ValueKind, SIDECAR_SUFFIX};
use crate::error::{ArchiveError, Result};

pub use search::{Filters, SearchPage, SearchQuery, SearchResult, SortOrder, MAX_PAGE, SORT_COLUMNS};

/// Default time a connection waits on a locked database
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const RESULT_COLUMNS: &str = "a.asset_id, a.original_path, a.archive_path, a.file_name, a.file_size, \
     a.mime_type, a.checksum_sha256, a.checksum_verified_at, a.profile_id, \
     a.created_at, a.updated_at, a.indexed_at";

/// Fixed-width RFC 3339 form so stored timestamps sort as text
pub(crate) fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Count and total size for one media type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupStats {
    pub count: usize,
    pub size: u64,
}

/// Aggregate view of the catalog
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStatistics {
    pub total_assets: usize,
    pub total_size: u64,
    /// Keyed by media type; assets without one fall under `unknown`
    pub by_media_type: BTreeMap<String, GroupStats>,
    /// Keyed by profile id; assets without one fall under `none`
    pub by_profile: BTreeMap<String, usize>,
}

/// A custom metadata field seen in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldUsage {
    pub name: String,
    pub kind: ValueKind,
    pub usage_count: usize,
}

/// Handle to an archive's catalog database
#[derive(Debug, Clone)]
pub struct Catalog {
    archive: Archive,
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl Catalog {
    /// Open (creating if needed) the catalog of `archive`
    pub fn open(archive: &Archive) -> Result<Self> {
        Self::open_with_timeout(archive, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(archive: &Archive, busy_timeout: Duration) -> Result<Self> {
        std::fs::create_dir_all(archive.index_dir())?;
        let catalog = Self {
            archive: archive.clone(),
            db_path: archive.catalog_path(),
            busy_timeout,
        };
        let conn = catalog.connect()?;
        schema::ensure_schema(&conn)?;
        debug!(path = %catalog.db_path.display(), "Opened catalog");
        Ok(catalog)
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        Ok(schema::connect(&self.db_path, self.busy_timeout)?)
    }

    /// Upsert one asset, loading its sidecar if the metadata isn't loaded.
    ///
    /// Returns false (and logs) when the sidecar can't be read or the write fails.
    pub fn index(&self, asset: &Asset) -> bool {
        let metadata = match sidecar_of(asset) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %asset.file_path.display(), error = %e, "Failed to load sidecar");
                return false;
            }
        };

        match self.index_metadata(&metadata) {
            Ok(()) => true,
            Err(e) => {
                error!(asset_id = %metadata.asset_id, error = %e, "Failed to index asset");
                false
            }
        }
    }

    /// Upsert one sidecar record in its own transaction
    pub fn index_metadata(&self, metadata: &AssetMetadata) -> Result<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        write_record(&tx, metadata)?;
        tx.commit()?;
        Ok(())
    }

    /// Index several assets atomically; any failure rolls back the batch
    #[instrument(skip(self, assets), fields(count = assets.len()))]
    pub fn index_batch(&self, assets: &[Asset]) -> bool {
        let mut records = Vec::with_capacity(assets.len());
        for asset in assets {
            match sidecar_of(asset) {
                Ok(m) => records.push(m),
                Err(e) => {
                    warn!(path = %asset.file_path.display(), error = %e, "Batch aborted: unreadable sidecar");
                    return false;
                }
            }
        }

        let result = (|| -> Result<()> {
            let mut conn = self.connect()?;
            let tx = conn.transaction()?;
            for record in &records {
                write_record(&tx, record)?;
            }
            tx.commit()?;
            Ok(())
        })();

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Batch indexing rolled back");
                false
            }
        }
    }

    /// Rescan every sidecar under `assets/` and (re)index it.
    ///
    /// Without `force_reindex`, sidecars whose `updated_at` matches the
    /// cataloged row are counted as successes without a write.
    #[instrument(skip(self))]
    pub fn index_all(&self, force_reindex: bool) -> Result<(usize, usize)> {
        let existing: HashMap<String, String> = {
            let conn = self.connect()?;
            let mut stmt = conn.prepare("SELECT asset_id, updated_at FROM assets")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut success = 0;
        let mut errors = 0;

        for sidecar in self.archive.sidecar_files()? {
            let Some(file_path) = asset_file_for(&sidecar) else {
                errors += 1;
                continue;
            };
            if !file_path.is_file() {
                warn!(sidecar = %sidecar.display(), "Asset file not found for sidecar");
                errors += 1;
                continue;
            }

            let asset = Asset::new(file_path, self.archive.root());
            let metadata = match asset.read_sidecar() {
                Ok(m) => m,
                Err(e) => {
                    warn!(sidecar = %sidecar.display(), error = %e, "Unreadable sidecar");
                    errors += 1;
                    continue;
                }
            };

            let unchanged = existing.get(&metadata.asset_id) == Some(&timestamp(&metadata.updated_at));
            if !force_reindex && unchanged {
                success += 1;
                continue;
            }

            match self.index_metadata(&metadata) {
                Ok(()) => success += 1,
                Err(e) => {
                    error!(asset_id = %metadata.asset_id, error = %e, "Failed to index asset");
                    errors += 1;
                }
            }
        }

        info!(success, errors, "Indexing complete");
        Ok((success, errors))
    }

    /// Delete an asset's row (metadata and text index follow). Missing ids succeed.
    pub fn remove_asset(&self, asset_id: &str) -> bool {
        let result = self.connect().and_then(|mut conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM assets WHERE asset_id = ?1", params![asset_id])?;
            tx.commit()?;
            Ok(())
        });

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(asset_id, error = %e, "Failed to remove asset from catalog");
                false
            }
        }
    }

    /// Run a query and return one page plus the total match count
    pub fn search(&self, query: &SearchQuery) -> Result<SearchPage> {
        let (where_sql, mut params) = search::compile_where(query)?;
        let conn = self.connect()?;

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM assets a {}", where_sql),
            params_from_iter(params.iter()),
            |row| row.get(0),
        )?;
        let total = total as usize;

        if query.limit == 0 {
            return Ok(SearchPage { results: Vec::new(), total });
        }

        let (order_sql, sort_param) = search::order_clause(query);
        params.extend(sort_param);
        let limit = query.limit.min(i64::MAX as usize);
        let offset = query.offset.max(0);

        let sql = format!(
            "SELECT {} FROM assets a {} {} LIMIT {} OFFSET {}",
            RESULT_COLUMNS, where_sql, order_sql, limit, offset
        );
        let results = self.fetch(&conn, &sql, &params)?;

        Ok(SearchPage { results, total })
    }

    /// Look up one asset by id
    pub fn get(&self, asset_id: &str) -> Result<Option<SearchResult>> {
        let conn = self.connect()?;
        let sql = format!("SELECT {} FROM assets a WHERE a.asset_id = ?", RESULT_COLUMNS);
        Ok(self
            .fetch(&conn, &sql, &[SqlValue::Text(asset_id.to_string())])?
            .into_iter()
            .next())
    }

    /// First asset (by id) carrying `digest`
    pub fn search_by_digest(&self, digest: &str) -> Result<Option<SearchResult>> {
        let query = SearchQuery::new()
            .with_filter("checksum_sha256", digest)
            .sort("asset_id", SortOrder::Asc)
            .page(1, 0);
        Ok(self.search(&query)?.results.into_iter().next())
    }

    /// Groups of assets sharing a stored digest, two or more per group
    pub fn search_duplicates(&self) -> Result<Vec<(String, Vec<SearchResult>)>> {
        let digests: Vec<String> = {
            let conn = self.connect()?;
            let mut stmt = conn.prepare(
                "SELECT checksum_sha256 FROM assets
                 WHERE checksum_sha256 IS NOT NULL
                 GROUP BY checksum_sha256
                 HAVING COUNT(*) > 1
                 ORDER BY checksum_sha256",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut groups = Vec::with_capacity(digests.len());
        for digest in digests {
            let query = SearchQuery::everything().with_filter("checksum_sha256", digest.as_str());
            groups.push((digest, self.search(&query)?.results));
        }
        Ok(groups)
    }

    /// Totals grouped by media type and profile
    pub fn statistics(&self) -> Result<CatalogStatistics> {
        let conn = self.connect()?;
        let (total_assets, total_size): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(file_size), 0) FROM assets",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut by_media_type = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT COALESCE(mime_type, 'unknown'), COUNT(*), COALESCE(SUM(file_size), 0)
             FROM assets GROUP BY 1",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
        })?;
        for row in rows {
            let (mime, count, size) = row?;
            let entry: &mut GroupStats = by_media_type.entry(mime).or_default();
            entry.count += count as usize;
            entry.size += size as u64;
        }

        let mut by_profile = BTreeMap::new();
        let mut stmt =
            conn.prepare("SELECT COALESCE(profile_id, 'none'), COUNT(*) FROM assets GROUP BY 1")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (profile, count) = row?;
            *by_profile.entry(profile).or_insert(0) += count as usize;
        }

        Ok(CatalogStatistics {
            total_assets: total_assets as usize,
            total_size: total_size as u64,
            by_media_type,
            by_profile,
        })
    }

    /// Distinct custom fields with their kinds, most used first
    pub fn metadata_fields(&self) -> Result<Vec<FieldUsage>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT field_name, field_kind, COUNT(*) AS usage_count
             FROM asset_metadata
             GROUP BY field_name, field_kind
             ORDER BY usage_count DESC, field_name ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })?;

        let mut fields = Vec::new();
        for row in rows {
            let (name, kind, count) = row?;
            let kind = kind
                .parse::<ValueKind>()
                .map_err(|e: String| ArchiveError::corrupt(&self.db_path, e))?;
            fields.push(FieldUsage {
                name,
                kind,
                usage_count: count as usize,
            });
        }
        Ok(fields)
    }

    /// Persist verification time (and the sidecar's new `updated_at`) for an asset
    pub fn mark_verified(&self, metadata: &AssetMetadata) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE assets SET checksum_verified_at = ?1, updated_at = ?2 WHERE asset_id = ?3",
            params![
                metadata.checksum_verified_at.as_ref().map(timestamp),
                timestamp(&metadata.updated_at),
                metadata.asset_id,
            ],
        )?;
        Ok(changed > 0)
    }

    /// All cataloged ids in archive-path order
    pub fn asset_ids(&self) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT asset_id FROM assets ORDER BY archive_path, asset_id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// `(asset_id, archive_path)` for every row
    pub fn archive_paths(&self) -> Result<Vec<(String, String)>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT asset_id, archive_path FROM assets ORDER BY archive_path")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn contains(&self, asset_id: &str) -> Result<bool> {
        let conn = self.connect()?;
        let found = conn
            .query_row("SELECT 1 FROM assets WHERE asset_id = ?1", params![asset_id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM assets", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn fetch(&self, conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<SearchResult>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), RawRow::from_row)?;
        let raw = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        let mut meta_stmt = conn.prepare_cached(
            "SELECT field_name, field_value, field_kind FROM asset_metadata WHERE asset_id = ?1",
        )?;

        let mut results = Vec::with_capacity(raw.len());
        for row in raw {
            let mut custom = Metadata::new();
            let fields = meta_stmt.query_map(params![row.asset_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
            })?;
            for field in fields {
                let (name, text, kind) = field?;
                let value = kind
                    .parse::<ValueKind>()
                    .and_then(|k| MetadataValue::decode(&text, k))
                    .map_err(|e| ArchiveError::corrupt(&self.db_path, format!("{}.{}: {}", row.asset_id, name, e)))?;
                custom.insert(name, value);
            }
            results.push(row.into_result(custom, &self.db_path)?);
        }
        Ok(results)
    }
}

fn sidecar_of(asset: &Asset) -> Result<Cow<'_, AssetMetadata>> {
    match &asset.metadata {
        Some(m) => Ok(Cow::Borrowed(m)),
        None => asset.read_sidecar().map(Cow::Owned),
    }
}

/// The asset file a sidecar describes
fn asset_file_for(sidecar: &Path) -> Option<PathBuf> {
    let name = sidecar.file_name()?.to_str()?.strip_suffix(SIDECAR_SUFFIX)?;
    if name.is_empty() {
        return None;
    }
    Some(sidecar.with_file_name(name))
}

fn write_record(conn: &Connection, m: &AssetMetadata) -> Result<()> {
    conn.execute(
        "INSERT INTO assets (
            asset_id, original_path, archive_path, file_name, file_size, mime_type,
            checksum_sha256, checksum_verified_at, profile_id, created_at, updated_at, indexed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(asset_id) DO UPDATE SET
            original_path = excluded.original_path,
            archive_path = excluded.archive_path,
            file_name = excluded.file_name,
            file_size = excluded.file_size,
            mime_type = excluded.mime_type,
            checksum_sha256 = excluded.checksum_sha256,
            checksum_verified_at = excluded.checksum_verified_at,
            profile_id = excluded.profile_id,
            created_at = excluded.created_at,
            updated_at = excluded.updated_at,
            indexed_at = excluded.indexed_at",
        params![
            m.asset_id,
            m.original_path,
            m.archive_path,
            m.file_name(),
            m.file_size as i64,
            m.mime_type,
            m.checksum_sha256,
            m.checksum_verified_at.as_ref().map(timestamp),
            m.profile_id,
            timestamp(&m.created_at),
            timestamp(&m.updated_at),
            timestamp(&Utc::now()),
        ],
    )?;

    conn.execute("DELETE FROM asset_metadata WHERE asset_id = ?1", params![m.asset_id])?;
    {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO asset_metadata (asset_id, field_name, field_value, field_kind)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (name, value) in &m.custom_metadata {
            let (text, kind) = value.encode();
            stmt.execute(params![m.asset_id, name, text, kind.as_str()])?;
        }
    }

    let metadata_text = m
        .custom_metadata
        .values()
        .map(MetadataValue::search_text)
        .collect::<Vec<_>>()
        .join(" ");
    conn.execute("DELETE FROM assets_fts WHERE asset_id = ?1", params![m.asset_id])?;
    conn.execute(
        "INSERT INTO assets_fts (asset_id, file_name, original_path, metadata_text)
         VALUES (?1, ?2, ?3, ?4)",
        params![m.asset_id, m.file_name(), m.original_path, metadata_text],
    )?;

    Ok(())
}

struct RawRow {
    asset_id: String,
    original_path: String,
    archive_path: String,
    file_name: String,
    file_size: i64,
    mime_type: Option<String>,
    checksum_sha256: Option<String>,
    checksum_verified_at: Option<String>,
    profile_id: Option<String>,
    created_at: String,
    updated_at: String,
    indexed_at: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            asset_id: row.get(0)?,
            original_path: row.get(1)?,
            archive_path: row.get(2)?,
            file_name: row.get(3)?,
            file_size: row.get(4)?,
            mime_type: row.get(5)?,
            checksum_sha256: row.get(6)?,
            checksum_verified_at: row.get(7)?,
            profile_id: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            indexed_at: row.get(11)?,
        })
    }

    fn into_result(self, custom_metadata: Metadata, db_path: &Path) -> Result<SearchResult> {
        let parse = |s: &str| -> Result<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| ArchiveError::corrupt(db_path, format!("{}: bad timestamp '{}': {}", self.asset_id, s, e)))
        };

        let checksum_verified_at = self.checksum_verified_at.as_deref().map(parse).transpose()?;
        let created_at = parse(&self.created_at)?;
        let updated_at = parse(&self.updated_at)?;
        let indexed_at = parse(&self.indexed_at)?;

        Ok(SearchResult {
            asset: AssetMetadata {
                asset_id: self.asset_id,
                original_path: self.original_path,
                archive_path: self.archive_path,
                file_size: self.file_size.max(0) as u64,
                mime_type: self.mime_type,
                checksum_sha256: self.checksum_sha256.unwrap_or_default(),
                checksum_verified_at,
                profile_id: self.profile_id,
                custom_metadata,
                created_at,
                updated_at,
            },
            file_name: self.file_name,
            indexed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Catalog) {
        let dir = TempDir::new().unwrap();
        let archive = Archive::create(dir.path(), "Test", "").unwrap();
        let catalog = Catalog::open(&archive).unwrap();
        (dir, catalog)
    }

    fn place(catalog: &Catalog, name: &str, content: &str, meta: Metadata) -> Asset {
        let root = catalog.archive().root().to_path_buf();
        let file = catalog.archive().assets_dir().join(name);
        fs::write(&file, content).unwrap();

        let archive_path = format!("assets/{}", name);
        let mut record = AssetMetadata::new(
            uuid::Uuid::new_v4().to_string(),
            format!("/src/{}", name),
            archive_path,
            content.len() as u64,
            crate::core::digest::sha256_file(&file).unwrap(),
        );
        record.mime_type = Some("text/plain".to_string());
        record.custom_metadata = meta;

        let mut asset = Asset::new(file, root).with_metadata(record);
        asset.save_metadata().unwrap();
        asset
    }

    #[test]
    fn test_types_survive_roundtrip() {
        let (_dir, catalog) = setup();
        let meta = Metadata::from([
            ("tags".to_string(), MetadataValue::from(vec!["a", "b"])),
            ("info".to_string(), MetadataValue::try_from(json!({"k": 1})).unwrap()),
            ("flag".to_string(), MetadataValue::from(true)),
            ("count".to_string(), MetadataValue::from(7)),
            ("note".to_string(), MetadataValue::from("hello")),
        ]);
        let asset = place(&catalog, "a.txt", "a", meta.clone());
        assert!(catalog.index(&asset));

        let id = &asset.metadata.as_ref().unwrap().asset_id;
        let found = catalog.get(id).unwrap().unwrap();
        assert_eq!(found.asset.custom_metadata, meta);
        assert_eq!(found.file_name, "a.txt");
    }

    #[test]
    fn test_index_is_idempotent() {
        let (_dir, catalog) = setup();
        let asset = place(&catalog, "a.txt", "a", Metadata::new());
        assert!(catalog.index(&asset));
        assert!(catalog.index(&asset));
        assert_eq!(catalog.count().unwrap(), 1);
    }

    #[test]
    fn test_index_without_sidecar_fails_softly() {
        let (_dir, catalog) = setup();
        let file = catalog.archive().assets_dir().join("loose.txt");
        fs::write(&file, "x").unwrap();
        let asset = Asset::new(file, catalog.archive().root());
        assert!(!catalog.index(&asset));
    }

    #[test]
    fn test_index_batch_is_atomic() {
        let (_dir, catalog) = setup();
        let good = place(&catalog, "a.txt", "a", Metadata::new());
        let file = catalog.archive().assets_dir().join("b.txt");
        fs::write(&file, "b").unwrap();
        let bad = Asset::new(file, catalog.archive().root());

        assert!(!catalog.index_batch(&[good.clone(), bad]));
        assert_eq!(catalog.count().unwrap(), 0);

        assert!(catalog.index_batch(&[good]));
        assert_eq!(catalog.count().unwrap(), 1);
    }

    #[test]
    fn test_index_all_counts_missing_files() {
        let (_dir, catalog) = setup();
        place(&catalog, "a.txt", "a", Metadata::new());
        let b = place(&catalog, "b.txt", "b", Metadata::new());
        fs::remove_file(&b.file_path).unwrap();

        assert_eq!(catalog.index_all(false).unwrap(), (1, 1));
        assert_eq!(catalog.index_all(false).unwrap(), (1, 1));
        assert_eq!(catalog.index_all(true).unwrap(), (1, 1));
    }

    #[test]
    fn test_remove_asset_cascades() {
        let (_dir, catalog) = setup();
        let asset = place(&catalog, "a.txt", "a", Metadata::from([("k".to_string(), MetadataValue::from("v"))]));
        catalog.index(&asset);
        let id = asset.metadata.as_ref().unwrap().asset_id.clone();

        assert!(catalog.remove_asset(&id));
        assert!(catalog.remove_asset(&id));
        assert!(!catalog.contains(&id).unwrap());
        assert!(catalog.metadata_fields().unwrap().is_empty());
        assert_eq!(catalog.search(&SearchQuery::new().with_text("v")).unwrap().total, 0);
    }

    #[test]
    fn test_text_search_and_filters() {
        let (_dir, catalog) = setup();
        let a = place(&catalog, "sunset.txt", "a", Metadata::from([("tags".to_string(), MetadataValue::from(vec!["beach"]))]));
        let b = place(&catalog, "forest.txt", "bb", Metadata::from([("tags".to_string(), MetadataValue::from(vec!["trees", "beach"]))]));
        catalog.index(&a);
        catalog.index(&b);

        assert_eq!(catalog.search(&SearchQuery::new().with_text("suns")).unwrap().total, 1);
        assert_eq!(catalog.search(&SearchQuery::new().with_text("nothing-here")).unwrap().total, 0);
        assert_eq!(catalog.search(&SearchQuery::new().with_filter("tags", "beach")).unwrap().total, 2);
        assert_eq!(
            catalog.search(&SearchQuery::new().with_filter("tags", json!(["beach", "trees"]))).unwrap().total,
            1
        );
        assert_eq!(catalog.search(&SearchQuery::new().with_filter("file_size_min", 2)).unwrap().total, 1);
        assert_eq!(catalog.search(&SearchQuery::new().with_filter("tags", Value::Null)).unwrap().total, 0);
        assert_eq!(catalog.search(&SearchQuery::new().with_text("trees")).unwrap().total, 1);
    }

    #[test]
    fn test_limit_zero_and_negative_offset() {
        let (_dir, catalog) = setup();
        for name in ["a.txt", "b.txt", "c.txt"] {
            let asset = place(&catalog, name, name, Metadata::new());
            catalog.index(&asset);
        }

        let page = catalog.search(&SearchQuery::new().page(0, 0)).unwrap();
        assert!(page.results.is_empty());
        assert_eq!(page.total, 3);

        let page = catalog.search(&SearchQuery::new().page(10, -5)).unwrap();
        assert_eq!(page.results.len(), 3);
    }

    #[test]
    fn test_sort_by_custom_number_field() {
        let (_dir, catalog) = setup();
        for (name, rank) in [("a.txt", 10), ("b.txt", 9), ("c.txt", 100)] {
            let asset = place(&catalog, name, name, Metadata::from([("rank".to_string(), MetadataValue::from(rank))]));
            catalog.index(&asset);
        }

        let page = catalog
            .search(&SearchQuery::new().sort("rank", SortOrder::Asc))
            .unwrap();
        let names: Vec<_> = page.results.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["b.txt", "a.txt", "c.txt"]);
    }

    #[test]
    fn test_statistics_buckets() {
        let (_dir, catalog) = setup();
        let mut asset = place(&catalog, "a.txt", "abc", Metadata::new());
        asset.metadata.as_mut().unwrap().mime_type = None;
        catalog.index(&asset);

        let stats = catalog.statistics().unwrap();
        assert_eq!(stats.total_assets, 1);
        assert_eq!(stats.total_size, 3);
        assert_eq!(stats.by_media_type["unknown"], GroupStats { count: 1, size: 3 });
        assert_eq!(stats.by_profile["none"], 1);
    }

    #[test]
    fn test_mark_verified() {
        let (_dir, catalog) = setup();
        let mut asset = place(&catalog, "a.txt", "a", Metadata::new());
        catalog.index(&asset);

        let meta = asset.metadata.as_mut().unwrap();
        meta.checksum_verified_at = Some(Utc::now());
        assert!(catalog.mark_verified(meta).unwrap());

        let found = catalog.get(&meta.asset_id).unwrap().unwrap();
        assert!(found.asset.checksum_verified_at.is_some());
    }

    #[test]
    fn test_asset_file_for() {
        assert_eq!(
            asset_file_for(Path::new("/a/x.txt.metadata.json")),
            Some(PathBuf::from("/a/x.txt"))
        );
        assert_eq!(asset_file_for(Path::new("/a/.metadata.json")), None);
    }
}
