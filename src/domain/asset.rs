//! Assets and their sidecar metadata records.
//!
//! Every archived file has a JSON sidecar named `<file name>.metadata.json`
//! sitting next to it. The sidecar is the source of truth; the catalog is a
//! projection of these records.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value::Metadata;
use super::write_json;
use crate::core::digest;
use crate::error::{ArchiveError, Result};

/// Suffix appended to a file name to get its sidecar name
pub const SIDECAR_SUFFIX: &str = ".metadata.json";

/// Sidecar path for an archived file
pub fn sidecar_path_for(file: &Path) -> PathBuf {
    let mut name = file.file_name().unwrap_or_default().to_os_string();
    name.push(SIDECAR_SUFFIX);
    file.with_file_name(name)
}

/// Whether `path` names a sidecar rather than an asset
pub fn is_sidecar(path: &Path) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .map(|name| name.ends_with(SIDECAR_SUFFIX))
        .unwrap_or(false)
}

/// Archive-relative path with forward slashes, independent of the host OS
pub fn to_archive_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// The sidecar record of one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub asset_id: String,

    /// Where the file was ingested from
    pub original_path: String,

    /// Path relative to the archive root, `/`-separated
    pub archive_path: String,

    pub file_size: u64,

    #[serde(default)]
    pub mime_type: Option<String>,

    /// Lowercase hex SHA-256 of the content
    pub checksum_sha256: String,

    #[serde(default)]
    pub checksum_verified_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub profile_id: Option<String>,

    #[serde(default)]
    pub custom_metadata: Metadata,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssetMetadata {
    /// Create a record for freshly placed content
    pub fn new(
        asset_id: impl Into<String>,
        original_path: impl Into<String>,
        archive_path: impl Into<String>,
        file_size: u64,
        checksum_sha256: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            asset_id: asset_id.into(),
            original_path: original_path.into(),
            archive_path: archive_path.into(),
            file_size,
            mime_type: None,
            checksum_sha256: checksum_sha256.into(),
            checksum_verified_at: None,
            profile_id: None,
            custom_metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// File name portion of the archive path
    pub fn file_name(&self) -> &str {
        self.archive_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.archive_path)
    }
}

/// One archived file plus its (lazily loaded) sidecar
#[derive(Debug, Clone)]
pub struct Asset {
    /// Absolute path of the file
    pub file_path: PathBuf,

    /// Canonical archive root
    pub archive_root: PathBuf,

    pub metadata: Option<AssetMetadata>,
}

impl Asset {
    pub fn new(file_path: impl Into<PathBuf>, archive_root: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            archive_root: archive_root.into(),
            metadata: None,
        }
    }

    /// Asset addressed by its `/`-separated archive path
    pub fn at_archive_path(archive_root: &Path, archive_path: &str) -> Self {
        let file_path = archive_path
            .split('/')
            .filter(|p| !p.is_empty())
            .fold(archive_root.to_path_buf(), |acc, part| acc.join(part));
        Self::new(file_path, archive_root)
    }

    pub fn with_metadata(mut self, metadata: AssetMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn sidecar_path(&self) -> PathBuf {
        sidecar_path_for(&self.file_path)
    }

    /// Path relative to the archive root, `/`-separated
    pub fn archive_path(&self) -> String {
        match self.file_path.strip_prefix(&self.archive_root) {
            Ok(rel) => to_archive_path(rel),
            Err(_) => self.file_path.to_string_lossy().into_owned(),
        }
    }

    /// Read and parse the sidecar from disk
    pub fn read_sidecar(&self) -> Result<AssetMetadata> {
        let path = self.sidecar_path();
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                ArchiveError::NotFound(format!("Sidecar not found: {}", path.display()))
            }
            _ => ArchiveError::Io(e),
        })?;
        serde_json::from_str(&content).map_err(|e| ArchiveError::corrupt(&path, e))
    }

    /// Load the sidecar into `self.metadata`
    pub fn load_metadata(&mut self) -> Result<&AssetMetadata> {
        let metadata = self.read_sidecar()?;
        Ok(self.metadata.insert(metadata))
    }

    /// Loaded metadata, reading the sidecar on first use
    pub fn metadata(&mut self) -> Result<&AssetMetadata> {
        if self.metadata.is_none() {
            return self.load_metadata();
        }
        self.metadata
            .as_ref()
            .ok_or_else(|| ArchiveError::NotFound("Asset metadata".to_string()))
    }

    /// Refresh `updated_at` and write the sidecar
    pub fn save_metadata(&mut self) -> Result<()> {
        let path = self.sidecar_path();
        let metadata = self.metadata.as_mut().ok_or_else(|| {
            ArchiveError::InvalidArgument(format!("No metadata to save for {}", path.display()))
        })?;
        metadata.updated_at = Utc::now();
        write_json(&path, metadata)
    }

    pub fn calculate_checksum(&self) -> Result<String> {
        Ok(digest::sha256_file(&self.file_path)?)
    }

    pub fn exists(&self) -> bool {
        self.file_path.is_file()
    }
}
