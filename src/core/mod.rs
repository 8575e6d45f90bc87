//! Core archive operations.
//!
//! This module contains:
//! - Digest: streaming content hashes
//! - Organizer: ingestion into the `assets/` tree
//! - Executor: sequential and pooled job dispatch
//! - Integrity: verification, orphan detection and catalog repair

pub mod digest;
pub mod executor;
pub mod integrity;
pub mod organizer;

use std::sync::Arc;

/// Progress callback receiving `(completed, total, message)`
pub type ProgressFn = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

// Re-export commonly used types
pub use digest::{hash_file, sha256_file, DigestAlgorithm};
pub use executor::{CancelToken, ExecutorKind};
pub use integrity::{IntegrityReport, IntegrityVerifier, RepairStats, VerifyStatus};
pub use organizer::{detect_mime, DirectoryIngest, Organizer};
