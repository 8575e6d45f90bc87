//! Integrity verification and catalog repair.
//!
//! Verification re-hashes each cataloged file and compares the result with
//! the digest recorded in its sidecar. Every asset ends in a terminal
//! [`VerifyStatus`]; one bad asset never aborts a run.

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::digest::sha256_file;
use super::executor::{default_workers, CancelToken, Executor, ExecutorKind, Job};
use super::organizer::detect_mime;
use super::ProgressFn;
use crate::catalog::Catalog;
use crate::domain::asset::to_archive_path;
use crate::domain::{Asset, AssetMetadata};
use crate::error::Result;

/// File used to serialize concurrent repairs
pub const REPAIR_LOCK_FILE: &str = "repair.lock";

/// Outcome of verifying one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    /// Content matches the recorded digest
    Verified,
    /// Content differs from the recorded digest
    Corrupted,
    /// The file is gone
    Missing,
    /// The sidecar is gone or unreadable
    NoMetadata,
    /// The catalog has no such asset
    NotFound,
}

impl fmt::Display for VerifyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyStatus::Verified => write!(f, "verified"),
            VerifyStatus::Corrupted => write!(f, "corrupted"),
            VerifyStatus::Missing => write!(f, "missing"),
            VerifyStatus::NoMetadata => write!(f, "no_metadata"),
            VerifyStatus::NotFound => write!(f, "not_found"),
        }
    }
}

/// Aggregate result of a verification run
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    /// Assets in the catalog when the run started
    pub total: usize,

    /// Assets that actually completed
    pub checked: usize,

    pub verified: usize,

    /// Archive paths of corrupted assets
    pub corrupted: Vec<String>,

    /// Archive paths of missing files
    pub missing: Vec<String>,

    /// Archive paths whose sidecar could not be read
    pub missing_metadata: Vec<String>,

    /// Jobs that failed outright (I/O, catalog or panic)
    pub errors: usize,

    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IntegrityReport {
    fn new(total: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            total,
            checked: 0,
            verified: 0,
            corrupted: Vec::new(),
            missing: Vec::new(),
            missing_metadata: Vec::new(),
            errors: 0,
            cancelled: false,
            started_at,
            finished_at: started_at,
        }
    }

    fn record(&mut self, status: VerifyStatus, archive_path: String) {
        match status {
            VerifyStatus::Verified => self.verified += 1,
            VerifyStatus::Corrupted => self.corrupted.push(archive_path),
            VerifyStatus::Missing => self.missing.push(archive_path),
            VerifyStatus::NoMetadata => self.missing_metadata.push(archive_path),
            // Removed from the catalog between listing and checking
            VerifyStatus::NotFound => self.errors += 1,
        }
    }

    /// Percentage of `total` that verified, 0 for an empty catalog
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.verified as f64 / self.total as f64 * 100.0
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// True when every asset verified and the run was not cut short
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.verified == self.total
    }
}

/// Counters from [`IntegrityVerifier::repair_index`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairStats {
    pub removed_missing: usize,
    pub reindexed: usize,
    pub newly_indexed: usize,
    pub errors: usize,
}

/// Verifies cataloged assets and reconciles the catalog with the filesystem
pub struct IntegrityVerifier {
    catalog: Catalog,
    executor: ExecutorKind,
    max_workers: usize,
    progress: Option<ProgressFn>,
    cancel: CancelToken,
}

impl IntegrityVerifier {
    pub fn new(catalog: &Catalog) -> Self {
        Self {
            catalog: catalog.clone(),
            executor: ExecutorKind::Auto,
            max_workers: default_workers(),
            progress: None,
            cancel: CancelToken::new(),
        }
    }

    /// Choose how `verify_all` dispatches work
    pub fn with_executor(mut self, kind: ExecutorKind, max_workers: usize) -> Self {
        self.executor = kind;
        self.max_workers = max_workers.max(1);
        self
    }

    /// Report `(completed, total, message)` per finished asset
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops an in-progress `verify_all`
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Verify one asset by id.
    ///
    /// Errors only when the catalog or the file can't be read at all.
    pub fn verify_single(&self, asset_id: &str) -> Result<VerifyStatus> {
        check_asset(&self.catalog, asset_id)
    }

    /// Verify every cataloged asset, collecting results as they complete
    #[instrument(skip(self))]
    pub async fn verify_all(&self) -> Result<IntegrityReport> {
        let started_at = Utc::now();
        let entries = self.catalog.archive_paths()?;
        let total = entries.len();

        let executor = self.executor.select(self.max_workers, total);
        info!(total, sequential = executor.is_sequential(), "Starting verification");

        let jobs: Vec<Job<(String, Result<VerifyStatus>)>> = entries
            .into_iter()
            .map(|(asset_id, archive_path)| {
                let catalog = self.catalog.clone();
                Box::new(move || {
                    let status = check_asset(&catalog, &asset_id);
                    (archive_path, status)
                }) as Job<_>
            })
            .collect();

        let mut report = IntegrityReport::new(total, started_at);
        let mut results = executor.run(jobs, self.cancel.clone());

        while let Some(outcome) = results.next().await {
            report.checked += 1;
            let message = match outcome {
                Ok((path, Ok(status))) => {
                    let message = format!("{}: {}", path, status);
                    report.record(status, path);
                    message
                }
                Ok((path, Err(e))) => {
                    warn!(archive_path = %path, error = %e, "Verification failed");
                    report.errors += 1;
                    format!("{}: error", path)
                }
                Err(e) => {
                    error!(error = %e, "Verification job panicked");
                    report.errors += 1;
                    "job failed".to_string()
                }
            };

            if let Some(progress) = &self.progress {
                progress(report.checked, total, &message);
            }
        }

        report.cancelled = self.cancel.is_cancelled();
        report.finished_at = Utc::now();

        info!(
            verified = report.verified,
            corrupted = report.corrupted.len(),
            missing = report.missing.len(),
            no_metadata = report.missing_metadata.len(),
            errors = report.errors,
            cancelled = report.cancelled,
            "Verification complete"
        );
        Ok(report)
    }

    /// Files under `assets/` (excluding sidecars) the catalog doesn't reference, sorted
    pub fn find_orphaned_files(&self) -> Result<Vec<PathBuf>> {
        let archive = self.catalog.archive();
        let referenced: HashSet<String> = self
            .catalog
            .archive_paths()?
            .into_iter()
            .map(|(_, path)| path)
            .collect();

        let mut orphans: Vec<PathBuf> = archive
            .asset_files()?
            .into_iter()
            .filter(|path| {
                let rel = path.strip_prefix(archive.root()).unwrap_or(path);
                !referenced.contains(&to_archive_path(rel))
            })
            .collect();
        orphans.sort();
        Ok(orphans)
    }

    /// Bring the catalog back in line with the filesystem.
    ///
    /// 1. drop rows whose file is gone
    /// 2. re-index orphans that still have a sidecar
    /// 3. write a fresh sidecar for orphans without one, then index it
    #[instrument(skip(self))]
    pub fn repair_index(&self) -> Result<RepairStats> {
        let archive = self.catalog.archive();
        fs::create_dir_all(archive.index_dir())?;
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(archive.index_dir().join(REPAIR_LOCK_FILE))?;
        lock.lock_exclusive()?;

        let mut stats = RepairStats::default();

        for (asset_id, archive_path) in self.catalog.archive_paths()? {
            let asset = Asset::at_archive_path(archive.root(), &archive_path);
            if asset.exists() {
                continue;
            }
            if self.catalog.remove_asset(&asset_id) {
                debug!(asset_id = %asset_id, archive_path = %archive_path, "Removed missing asset");
                stats.removed_missing += 1;
            } else {
                stats.errors += 1;
            }
        }

        for path in self.find_orphaned_files()? {
            let asset = Asset::new(&path, archive.root());
            let has_sidecar = asset.sidecar_path().exists();
            let outcome = if has_sidecar {
                self.reindex_orphan(asset)
            } else {
                self.adopt_orphan(asset)
            };

            match outcome {
                Ok(()) if has_sidecar => stats.reindexed += 1,
                Ok(()) => stats.newly_indexed += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not repair orphan");
                    stats.errors += 1;
                }
            }
        }

        let _ = FileExt::unlock(&lock);
        info!(
            removed_missing = stats.removed_missing,
            reindexed = stats.reindexed,
            newly_indexed = stats.newly_indexed,
            errors = stats.errors,
            "Repair complete"
        );
        Ok(stats)
    }

    /// Index an orphan whose sidecar exists, fixing its path and id if stale
    fn reindex_orphan(&self, mut asset: Asset) -> Result<()> {
        let mut metadata = asset.read_sidecar()?;
        let actual_path = asset.archive_path();
        let mut changed = false;

        if metadata.archive_path != actual_path {
            metadata.archive_path = actual_path;
            changed = true;
        }
        // The id belongs to another cataloged file (a copied sidecar)
        if self.catalog.contains(&metadata.asset_id)? {
            metadata.asset_id = Uuid::new_v4().to_string();
            changed = true;
        }

        asset.metadata = Some(metadata);
        if changed {
            asset.save_metadata()?;
        }
        if let Some(metadata) = &asset.metadata {
            self.catalog.index_metadata(metadata)?;
        }
        Ok(())
    }

    /// Give a bare orphan a new sidecar and index it
    fn adopt_orphan(&self, mut asset: Asset) -> Result<()> {
        let file_size = fs::metadata(&asset.file_path)?.len();
        let digest = sha256_file(&asset.file_path)?;

        let mut metadata = AssetMetadata::new(
            Uuid::new_v4().to_string(),
            asset.file_path.to_string_lossy(),
            asset.archive_path(),
            file_size,
            digest,
        );
        metadata.mime_type = detect_mime(&asset.file_path);
        metadata.checksum_verified_at = Some(Utc::now());
        asset.metadata = Some(metadata);
        asset.save_metadata()?;

        if let Some(metadata) = &asset.metadata {
            self.catalog.index_metadata(metadata)?;
        }
        Ok(())
    }
}

/// Classify one asset and persist the verification time on success
fn check_asset(catalog: &Catalog, asset_id: &str) -> Result<VerifyStatus> {
    let Some(record) = catalog.get(asset_id)? else {
        return Ok(VerifyStatus::NotFound);
    };

    let asset = Asset::at_archive_path(catalog.archive().root(), record.archive_path());
    if !asset.exists() {
        return Ok(VerifyStatus::Missing);
    }

    let mut metadata = match asset.read_sidecar() {
        Ok(m) if !m.checksum_sha256.is_empty() => m,
        Ok(_) => return Ok(VerifyStatus::NoMetadata),
        Err(e) => {
            debug!(asset_id, error = %e, "Sidecar unreadable");
            return Ok(VerifyStatus::NoMetadata);
        }
    };

    let actual = sha256_file(&asset.file_path)?;
    if actual != metadata.checksum_sha256 {
        warn!(asset_id, archive_path = %record.archive_path(), "Checksum mismatch");
        return Ok(VerifyStatus::Corrupted);
    }

    metadata.checksum_verified_at = Some(Utc::now());
    let mut asset = asset.with_metadata(metadata);
    let persisted = asset.save_metadata().and_then(|()| match &asset.metadata {
        Some(m) => catalog.mark_verified(m).map(|_| ()),
        None => Ok(()),
    });
    if let Err(e) = persisted {
        warn!(asset_id, error = %e, "Verified but could not record verification time");
    }

    Ok(VerifyStatus::Verified)
}
