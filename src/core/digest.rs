//! Streaming content digests.
//!
//! Files are always read in fixed 64 KiB chunks so hashing never buffers a
//! whole asset in memory.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::error::ArchiveError;

/// Read/write chunk size for copies and hashing
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Digest algorithms accepted for packages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    fn hasher(&self) -> Hasher {
        match self {
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(ArchiveError::UnsupportedFormat(format!(
                "Unsupported digest algorithm: {}",
                s
            ))),
        }
    }
}

enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hash a reader with several algorithms in one pass.
///
/// Hex digests come back in the order of `algorithms`.
pub fn hash_reader<R: Read>(mut reader: R, algorithms: &[DigestAlgorithm]) -> io::Result<Vec<String>> {
    let mut hashers: Vec<Hasher> = algorithms.iter().map(|a| a.hasher()).collect();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        for hasher in &mut hashers {
            hasher.update(&buf[..n]);
        }
    }

    Ok(hashers.into_iter().map(Hasher::finalize_hex).collect())
}

/// Hash a file with several algorithms in one pass
pub fn hash_file(path: &Path, algorithms: &[DigestAlgorithm]) -> io::Result<Vec<String>> {
    hash_reader(File::open(path)?, algorithms)
}

/// SHA-256 of a file as lowercase hex
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut digests = hash_file(path, &[DigestAlgorithm::Sha256])?;
    Ok(digests.remove(0))
}

/// Copy `reader` into `writer` chunk by chunk while hashing with SHA-256.
///
/// Returns the number of bytes copied and the hex digest.
pub fn copy_and_hash<R: Read, W: Write>(mut reader: R, mut writer: W) -> io::Result<(u64, String)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    writer.flush()?;

    Ok((total, hex::encode(hasher.finalize())))
}
