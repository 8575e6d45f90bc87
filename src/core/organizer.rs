//! Ingestion organizer.
//!
//! Copies source files into the archive's `assets/` area, computing their
//! SHA-256 while streaming, and writes a sidecar for each. Placement follows
//! the archive's organization schema unless a subfolder is given. Sources are
//! only ever read.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use glob::Pattern;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::digest::copy_and_hash;
use super::ProgressFn;
use crate::domain::asset::to_archive_path;
use crate::domain::{
    is_sidecar, sidecar_path_for, Archive, Asset, AssetMetadata, Metadata, Profile, SIDECAR_SUFFIX,
};
use crate::error::{ArchiveError, Result};

/// Ignore globs used when none are configured
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[".DS_Store", "Thumbs.db"];

/// Longest file name, in bytes, produced by [`safe_filename`]
pub const MAX_FILENAME_LEN: usize = 255;

const MAX_COLLISION_ATTEMPTS: usize = 100_000;

/// Outcome of [`Organizer::ingest_directory_detailed`]
#[derive(Debug, Default)]
pub struct DirectoryIngest {
    pub assets: Vec<Asset>,
    /// Source paths, relative to the ingested directory, that could not be stored
    pub failed: Vec<PathBuf>,
}

/// Places files into an archive
pub struct Organizer {
    archive: Archive,
    ignore: Vec<Pattern>,
    progress: Option<ProgressFn>,
}

impl Organizer {
    pub fn new(archive: &Archive) -> Self {
        let ignore = DEFAULT_IGNORE_PATTERNS
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .collect();
        Self {
            archive: archive.clone(),
            ignore,
            progress: None,
        }
    }

    /// Replace the ignore globs used by directory ingestion
    pub fn with_ignore_patterns<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self> {
        self.ignore = patterns
            .iter()
            .map(|p| {
                Pattern::new(p.as_ref()).map_err(|e| {
                    ArchiveError::InvalidArgument(format!("Bad ignore pattern '{}': {}", p.as_ref(), e))
                })
            })
            .collect::<Result<_>>()?;
        Ok(self)
    }

    /// Report `(current, total, message)` once per file during directory ingestion
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Copy one file into the archive and write its sidecar.
    #[instrument(skip(self, source, profile, custom_metadata), fields(source = %source.display()))]
    pub fn ingest_file(
        &self,
        source: &Path,
        profile: Option<&Profile>,
        custom_metadata: Option<Metadata>,
        target_subfolder: Option<&str>,
    ) -> Result<Asset> {
        let source_meta = fs::metadata(source).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                ArchiveError::NotFound(format!("Source file not found: {}", source.display()))
            }
            _ => ArchiveError::Io(e),
        })?;
        if !source_meta.is_file() {
            return Err(ArchiveError::InvalidArgument(format!(
                "Source path is not a file: {}",
                source.display()
            )));
        }
        let source = source.canonicalize()?;

        let mut custom = custom_metadata.unwrap_or_default();
        if let Some(profile) = profile {
            prepare_metadata(profile, &mut custom)?;
        }

        let target_dir = self.resolve_target_dir(&source, target_subfolder)?;
        fs::create_dir_all(&target_dir)?;

        let original_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_name = self.target_file_name(&original_name);

        let (target, file) = claim_target(&target_dir, &file_name)?;
        debug!(target = %target.display(), "Copying into archive");

        let copied = File::open(&source).and_then(|input| copy_and_hash(input, &file));
        drop(file);
        let (file_size, digest) = match copied {
            Ok(result) => result,
            Err(e) => {
                let _ = fs::remove_file(&target);
                return Err(e.into());
            }
        };

        let mut asset = Asset::new(&target, self.archive.root());
        let now = Utc::now();
        let mut metadata = AssetMetadata::new(
            Uuid::new_v4().to_string(),
            source.to_string_lossy(),
            asset.archive_path(),
            file_size,
            digest,
        );
        metadata.mime_type = detect_mime(&target);
        metadata.checksum_verified_at = Some(now);
        metadata.profile_id = profile.map(|p| p.id.clone());
        metadata.custom_metadata = custom;
        asset.metadata = Some(metadata);

        if let Err(e) = asset.save_metadata() {
            let _ = fs::remove_file(&target);
            return Err(e);
        }

        if let Some(m) = &asset.metadata {
            info!(asset_id = %m.asset_id, archive_path = %m.archive_path, "Ingested file");
        }
        Ok(asset)
    }

    /// Ingest every file under `dir`, keeping relative folders as subfolders.
    ///
    /// A file that fails is logged and skipped.
    pub fn ingest_directory(
        &self,
        dir: &Path,
        profile: Option<&Profile>,
        custom_metadata: Option<&Metadata>,
        recursive: bool,
    ) -> Result<Vec<Asset>> {
        self.ingest_directory_detailed(dir, profile, custom_metadata, recursive)
            .map(|outcome| outcome.assets)
    }

    /// Like [`ingest_directory`](Self::ingest_directory), also listing the files that failed.
    ///
    /// Sidecars sitting next to their asset (a copied archive folder) are
    /// skipped rather than ingested as assets of their own.
    #[instrument(skip(self, dir, profile, custom_metadata), fields(dir = %dir.display()))]
    pub fn ingest_directory_detailed(
        &self,
        dir: &Path,
        profile: Option<&Profile>,
        custom_metadata: Option<&Metadata>,
        recursive: bool,
    ) -> Result<DirectoryIngest> {
        let dir_meta = fs::metadata(dir).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                ArchiveError::NotFound(format!("Source directory not found: {}", dir.display()))
            }
            _ => ArchiveError::Io(e),
        })?;
        if !dir_meta.is_dir() {
            return Err(ArchiveError::InvalidArgument(format!(
                "Source path is not a directory: {}",
                dir.display()
            )));
        }

        let mut walker = WalkDir::new(dir).sort_by_file_name();
        if !recursive {
            walker = walker.max_depth(1);
        }

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path()).to_path_buf();
            if self.is_ignored(&rel) {
                debug!(path = %rel.display(), "Ignoring file");
                continue;
            }
            if is_companion_sidecar(entry.path()) {
                debug!(path = %rel.display(), "Skipping sidecar of a source file");
                continue;
            }
            files.push(rel);
        }

        let total = files.len();
        let mut assets = Vec::with_capacity(total);
        let mut failed = Vec::new();

        for (idx, rel) in files.iter().enumerate() {
            let name = rel.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            if let Some(progress) = &self.progress {
                progress(idx + 1, total, &format!("Ingesting {}", name));
            }

            let subfolder = rel
                .parent()
                .map(to_archive_path)
                .filter(|s| !s.is_empty());

            match self.ingest_file(
                &dir.join(rel),
                profile,
                custom_metadata.cloned(),
                subfolder.as_deref(),
            ) {
                Ok(asset) => assets.push(asset),
                Err(e) => {
                    error!(path = %rel.display(), error = %e, "Failed to ingest file");
                    failed.push(rel.clone());
                }
            }
        }

        info!(ingested = assets.len(), failed = failed.len(), total, "Directory ingestion complete");
        Ok(DirectoryIngest { assets, failed })
    }

    /// Target directory for `source` using the current time
    pub fn resolve_target_dir(&self, source: &Path, subfolder: Option<&str>) -> Result<PathBuf> {
        self.resolve_target_dir_at(source, subfolder, Utc::now())
    }

    /// Target directory for `source`, expanding date tokens against `now`
    pub fn resolve_target_dir_at(
        &self,
        source: &Path,
        subfolder: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let assets = self.archive.assets_dir();

        if let Some(sub) = subfolder.filter(|s| !s.trim().is_empty()) {
            let sub_path = Path::new(sub);
            let escapes = sub_path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if escapes {
                return Err(ArchiveError::InvalidArgument(format!(
                    "Target subfolder must stay inside the archive: {}",
                    sub
                )));
            }
            return Ok(assets.join(sub_path));
        }

        let mut dir = assets;
        for token in self.archive.organization().structure.split('/') {
            let part = match token.trim() {
                "" => continue,
                "year" => now.year().to_string(),
                "month" => format!("{:02}", now.month()),
                "day" => format!("{:02}", now.day()),
                "type" => detect_mime(source)
                    .and_then(|m| m.split('/').next().map(str::to_string))
                    .unwrap_or_else(|| "other".to_string()),
                "extension" => source
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "no-ext".to_string()),
                "." | ".." => {
                    return Err(ArchiveError::InvalidArgument(format!(
                        "Invalid organization structure: {}",
                        self.archive.organization().structure
                    )))
                }
                literal => literal.to_string(),
            };
            dir.push(part);
        }
        Ok(dir)
    }

    fn target_file_name(&self, original: &str) -> String {
        let schema = self.archive.organization();
        if schema.preserve_original_names && !original.is_empty() {
            return original.to_string();
        }
        let safe = safe_filename(original, MAX_FILENAME_LEN);
        if schema.normalize_names {
            safe.split_whitespace().collect::<Vec<_>>().join("_").to_lowercase()
        } else {
            safe
        }
    }

    fn is_ignored(&self, rel: &Path) -> bool {
        let name = rel.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        let rel_str = to_archive_path(rel);
        self.ignore
            .iter()
            .any(|p| p.matches(&name) || p.matches(&rel_str))
    }
}

/// Apply profile defaults, reject invalid values, warn on missing required fields
fn prepare_metadata(profile: &Profile, custom: &mut Metadata) -> Result<()> {
    profile.apply_defaults(custom);

    let violations = profile.validate(custom);
    if !violations.is_empty() {
        let detail = violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ArchiveError::InvalidArgument(format!(
            "Metadata does not match profile '{}': {}",
            profile.name, detail
        )));
    }

    for field in profile.missing_required(custom) {
        warn!(profile = %profile.name, field, "Required field missing");
    }
    Ok(())
}

/// Create `dir/name`, or `dir/<stem>_<n>.<ext>` for the first free n.
///
/// A name whose sidecar already exists counts as taken, and so does a name
/// that would read as a sidecar itself. The file is created with create-new
/// semantics so concurrent ingests never share a target.
pub(crate) fn claim_target(dir: &Path, name: &str) -> Result<(PathBuf, File)> {
    let base = Path::new(name);
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = base.extension().map(|e| e.to_string_lossy().into_owned());

    for n in 0..MAX_COLLISION_ATTEMPTS {
        let candidate_name = match (n, &ext) {
            (0, _) => name.to_string(),
            (n, Some(ext)) => format!("{}_{}.{}", stem, n, ext),
            (n, None) => format!("{}_{}", stem, n),
        };
        let candidate = dir.join(&candidate_name);
        if is_sidecar(&candidate) || sidecar_path_for(&candidate).exists() {
            continue;
        }

        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(ArchiveError::AlreadyExists(format!(
        "No free name for {} in {}",
        name,
        dir.display()
    )))
}

/// Whether `path` is a sidecar whose asset file sits beside it
fn is_companion_sidecar(path: &Path) -> bool {
    if !is_sidecar(path) {
        return false;
    }
    path.to_str()
        .and_then(|p| p.strip_suffix(SIDECAR_SUFFIX))
        .map(|asset| Path::new(asset).is_file())
        .unwrap_or(false)
}

/// Media type guessed from the file extension
pub fn detect_mime(path: &Path) -> Option<String> {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
}

/// Make a file name safe on every common filesystem.
///
/// Replaces reserved and control characters with `_`, trims leading and
/// trailing dots/spaces, caps the length in bytes at a character boundary
/// (keeping the extension when it fits) and falls back to `unnamed`.
pub fn safe_filename(name: &str, max_len: usize) -> String {
    if max_len == 0 {
        return String::new();
    }

    let is_unsafe = |c: char| matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control();

    // A bare extension like ".txt" is kept as-is
    let bare_extension = name.len() > 1 && name.starts_with('.') && !name[1..].contains('.');
    if bare_extension && !name.chars().any(is_unsafe) && name.len() <= max_len {
        return name.to_string();
    }

    let only_unsafe = name
        .chars()
        .filter(|c| !is_unsafe(*c))
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == ' ')
        .is_empty();
    if only_unsafe {
        return "unnamed".to_string();
    }

    let replaced: String = name.chars().map(|c| if is_unsafe(c) { '_' } else { c }).collect();
    let safe = replaced.trim_matches(|c| c == '.' || c == ' ').to_string();
    if safe.is_empty() {
        return "unnamed".to_string();
    }

    truncate_name(&safe, max_len)
}

fn truncate_name(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    };
    if ext.len() >= max_len {
        return prefix_within(name, max_len).to_string();
    }

    let mut out = prefix_within(stem, max_len - ext.len()).to_string();
    out.push_str(ext);
    out
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a character
fn prefix_within(s: &str, max_bytes: usize) -> &str {
    let mut end = max_bytes.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
