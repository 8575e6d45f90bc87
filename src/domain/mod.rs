//! Domain types for the archive.
//!
//! This module contains the core data structures:
//! - Archive: descriptor, layout and profile storage
//! - Asset: an archived file and its sidecar record
//! - Profile: reusable custom metadata schemas
//! - MetadataValue: the closed set of custom metadata values

pub mod archive;
pub mod asset;
pub mod profile;
pub mod value;

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tempfile::Builder;

use crate::error::{ArchiveError, Result};

// Re-export commonly used types
pub use archive::{Archive, ArchiveConfig, OrganizationSchema, ProfileStore};
pub use asset::{is_sidecar, sidecar_path_for, Asset, AssetMetadata, SIDECAR_SUFFIX};
pub use profile::{FieldType, FieldViolation, MetadataField, Profile};
pub use value::{Metadata, MetadataValue, ValueKind};

pub(crate) const TEMP_PREFIX: &str = ".archivist-";

/// Whether `path` is an in-flight temp file written by [`write_json`]
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(TEMP_PREFIX))
        .unwrap_or(false)
}

/// Write pretty JSON through a temp file in the same directory, then rename
/// over `path` so readers never see a half-written document.
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| ArchiveError::InvalidArgument(format!("No parent directory: {}", path.display())))?;

    let mut tmp = Builder::new().prefix(TEMP_PREFIX).tempfile_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.persist(path).map_err(|e| ArchiveError::Io(e.error))?;
    Ok(())
}
