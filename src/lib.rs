//! archivist - Digital asset archive with integrity verification
//!
//! Files are copied into a self-describing archive directory, each with a
//! JSON sidecar holding provenance, digest and custom metadata. A SQLite
//! catalog indexes the sidecars and can always be rebuilt from them.
//!
//! # Architecture
//!
//! The sidecars are the source of truth:
//! - The organizer places files and writes sidecars
//! - The catalog projects sidecars into a searchable index
//! - The verifier re-hashes files and repairs the catalog
//! - The exporter writes BagIt packages and manifests from catalog subsets
//!
//! # Modules
//!
//! - `domain`: Data structures (Archive, Asset, Profile, MetadataValue)
//! - `catalog`: SQLite index and search
//! - `core`: Ingestion, digests, executors and integrity checks
//! - `export`: Packages, directory copies and manifests
//! - `config`: User settings
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Create an archive and ingest a folder
//! archivist create ~/archives/photos
//! archivist add ~/Pictures/2024 --tags holiday
//!
//! # Check every file against its recorded digest
//! archivist verify
//!
//! # Package everything tagged "holiday"
//! archivist export holiday-bag --filter tags=holiday
//! ```

pub mod catalog;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod export;

// Re-export main types at crate root for convenience
pub use crate::catalog::{Catalog, SearchQuery, SearchResult};
pub use crate::core::{IntegrityReport, IntegrityVerifier, Organizer, VerifyStatus};
pub use crate::domain::{Archive, Asset, AssetMetadata, MetadataValue, Profile};
pub use crate::error::{ArchiveError, Result};
pub use crate::export::Exporter;
