//! Flat JSON / CSV listings of the catalog.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::catalog::{CatalogStatistics, SearchResult};
use crate::domain::{Archive, Metadata};
use crate::error::{ArchiveError, Result};

/// Output format for [`generate_manifest`](super::Exporter::generate_manifest)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Json,
    Csv,
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestFormat::Json => write!(f, "json"),
            ManifestFormat::Csv => write!(f, "csv"),
        }
    }
}

impl FromStr for ManifestFormat {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ManifestFormat::Json),
            "csv" => Ok(ManifestFormat::Csv),
            _ => Err(ArchiveError::UnsupportedFormat(format!(
                "Unsupported manifest format: {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ArchiveSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ManifestEntry {
    pub asset_id: String,
    pub archive_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: Option<String>,
    pub checksum_sha256: String,
    pub created_at: DateTime<Utc>,
    pub custom_metadata: Metadata,
}

impl From<SearchResult> for ManifestEntry {
    fn from(result: SearchResult) -> Self {
        let SearchResult { asset, file_name, .. } = result;
        Self {
            asset_id: asset.asset_id,
            archive_path: asset.archive_path,
            file_name,
            file_size: asset.file_size,
            mime_type: asset.mime_type,
            checksum_sha256: asset.checksum_sha256,
            created_at: asset.created_at,
            custom_metadata: asset.custom_metadata,
        }
    }
}

/// Complete manifest document
#[derive(Debug, Serialize)]
pub struct Manifest {
    pub archive: ArchiveSummary,
    pub statistics: CatalogStatistics,
    pub assets: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(archive: &Archive, statistics: CatalogStatistics, results: Vec<SearchResult>) -> Self {
        Self {
            archive: ArchiveSummary {
                id: archive.config.id.clone(),
                name: archive.config.name.clone(),
                description: archive.config.description.clone(),
                created_at: archive.config.created_at,
                generated_at: Utc::now(),
            },
            statistics,
            assets: results.into_iter().map(ManifestEntry::from).collect(),
        }
    }

    /// Render as CSV with one sorted column per custom field
    pub fn to_csv(&self) -> Result<String> {
        let custom: BTreeSet<&str> = self
            .assets
            .iter()
            .flat_map(|a| a.custom_metadata.keys().map(String::as_str))
            .collect();

        let mut wtr = csv::WriterBuilder::new()
            .terminator(csv::Terminator::CRLF)
            .from_writer(vec![]);

        let mut header: Vec<&str> = vec![
            "asset_id",
            "archive_path",
            "file_name",
            "file_size",
            "mime_type",
            "checksum_sha256",
            "created_at",
        ];
        header.extend(custom.iter().copied());
        wtr.write_record(&header)?;

        for asset in &self.assets {
            let mut row = vec![
                asset.asset_id.clone(),
                asset.archive_path.clone(),
                asset.file_name.clone(),
                asset.file_size.to_string(),
                asset.mime_type.clone().unwrap_or_default(),
                asset.checksum_sha256.clone(),
                asset.created_at.to_rfc3339(),
            ];
            row.extend(custom.iter().map(|key| {
                asset
                    .custom_metadata
                    .get(*key)
                    .map(|v| v.display())
                    .unwrap_or_default()
            }));
            wtr.write_record(&row)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
        String::from_utf8(bytes)
            .map_err(|e| ArchiveError::UnsupportedFormat(format!("CSV output is not UTF-8: {}", e)))
    }
}
