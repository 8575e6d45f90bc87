//! BagIt package writing and validation.
//!
//! Layout of a package:
//! ```text
//! <bag>/
//!   bagit.txt
//!   bag-info.txt
//!   manifest-<alg>.txt
//!   tagmanifest-<alg>.txt
//!   data/<archive_path>
//!   metadata/<archive_path>.metadata.json
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::core::digest::{hash_file, DigestAlgorithm};
use crate::domain::asset::to_archive_path;
use crate::error::{ArchiveError, Result};

pub const BAGIT_VERSION: &str = "0.97";
pub const BAGIT_FILE: &str = "bagit.txt";
pub const BAG_INFO_FILE: &str = "bag-info.txt";
pub const PAYLOAD_DIR: &str = "data";
pub const METADATA_DIR: &str = "metadata";
pub const PAYLOAD_OXUM: &str = "Payload-Oxum";

/// Incrementally assembles a bag in a staging directory
pub struct BagBuilder {
    root: PathBuf,
    algorithms: Vec<DigestAlgorithm>,
    payload: BTreeMap<String, Vec<String>>,
    tag_files: BTreeSet<String>,
    octets: u64,
}

impl BagBuilder {
    pub fn create(root: impl Into<PathBuf>, algorithms: &[DigestAlgorithm]) -> Result<Self> {
        if algorithms.is_empty() {
            return Err(ArchiveError::InvalidArgument(
                "At least one digest algorithm is required".to_string(),
            ));
        }
        let root = root.into();
        fs::create_dir_all(root.join(PAYLOAD_DIR))?;
        Ok(Self {
            root,
            algorithms: algorithms.to_vec(),
            payload: BTreeMap::new(),
            tag_files: BTreeSet::new(),
            octets: 0,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn payload_count(&self) -> usize {
        self.payload.len()
    }

    /// Copy `source` to `data/<rel>` and record its digests
    pub fn add_payload(&mut self, rel: &str, source: &Path) -> Result<()> {
        let entry = format!("{}/{}", PAYLOAD_DIR, rel);
        let target = self.place(&entry)?;
        self.octets += fs::copy(source, &target)?;
        let digests = hash_file(&target, &self.algorithms)?;
        self.payload.insert(entry, digests);
        Ok(())
    }

    /// Copy `source` to `metadata/<rel>` as a tag file
    pub fn add_tag_file(&mut self, rel: &str, source: &Path) -> Result<()> {
        let entry = format!("{}/{}", METADATA_DIR, rel);
        let target = self.place(&entry)?;
        fs::copy(source, target)?;
        self.tag_files.insert(entry);
        Ok(())
    }

    fn place(&self, entry: &str) -> Result<PathBuf> {
        let escapes = entry.split('/').any(|part| part.is_empty() || part == "." || part == "..");
        if escapes {
            return Err(ArchiveError::InvalidArgument(format!(
                "Invalid package path: {}",
                entry
            )));
        }
        let target = self.root.join(entry);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(target)
    }

    /// `"<octets>.<file count>"` for the payload written so far
    pub fn payload_oxum(&self) -> String {
        format!("{}.{}", self.octets, self.payload.len())
    }

    /// Write the declaration, manifests and bag-info, then the tag manifests.
    pub fn finish(self, info: &BTreeMap<String, String>) -> Result<PathBuf> {
        let mut tags: Vec<String> = self.tag_files.iter().cloned().collect();

        write_lines(
            &self.root.join(BAGIT_FILE),
            [
                format!("BagIt-Version: {}", BAGIT_VERSION),
                "Tag-File-Character-Encoding: UTF-8".to_string(),
            ],
        )?;
        tags.push(BAGIT_FILE.to_string());

        for (i, alg) in self.algorithms.iter().enumerate() {
            let name = format!("manifest-{}.txt", alg);
            let lines = self
                .payload
                .iter()
                .map(|(path, digests)| format!("{}  {}", digests[i], encode_path(path)));
            write_lines(&self.root.join(&name), lines)?;
            tags.push(name);
        }

        let mut info = info.clone();
        info.insert(PAYLOAD_OXUM.to_string(), self.payload_oxum());
        let lines = info
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v.replace(['\r', '\n'], " ")));
        write_lines(&self.root.join(BAG_INFO_FILE), lines)?;
        tags.push(BAG_INFO_FILE.to_string());

        tags.sort();
        for alg in &self.algorithms {
            let mut lines = Vec::with_capacity(tags.len());
            for tag in &tags {
                let digest = hash_file(&self.root.join(tag), &[*alg])?.remove(0);
                lines.push(format!("{}  {}", digest, encode_path(tag)));
            }
            write_lines(&self.root.join(format!("tagmanifest-{}.txt", alg)), lines)?;
        }

        debug!(root = %self.root.display(), files = self.payload.len(), "Bag written");
        Ok(self.root)
    }
}

/// Summary of a package that passed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSummary {
    pub algorithms: Vec<DigestAlgorithm>,
    pub payload_files: usize,
    pub payload_bytes: u64,
    pub info: BTreeMap<String, String>,
}

/// Re-check a package: declaration, every manifest digest, payload
/// completeness in both directions, Payload-Oxum and tag manifests.
pub fn validate_package(root: &Path) -> Result<PackageSummary> {
    if !root.is_dir() {
        return Err(ArchiveError::NotFound(format!("Package not found: {}", root.display())));
    }

    let declaration = fs::read_to_string(root.join(BAGIT_FILE))
        .map_err(|_| invalid(format!("missing {}", BAGIT_FILE)))?;
    if !parse_tags(&declaration).contains_key("BagIt-Version") {
        return Err(invalid("bagit.txt has no BagIt-Version"));
    }

    let (manifests, tagmanifests) = find_manifests(root)?;
    if manifests.is_empty() {
        return Err(invalid("no payload manifest"));
    }

    let mut payload = BTreeSet::new();
    let mut payload_bytes = 0u64;
    let data_dir = root.join(PAYLOAD_DIR);
    if data_dir.is_dir() {
        for entry in WalkDir::new(&data_dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() {
                payload_bytes += entry.metadata().map_err(ArchiveError::from)?.len();
                payload.insert(relative(root, entry.path()));
            }
        }
    }

    let mut algorithms = Vec::new();
    for (alg, path) in &manifests {
        let entries = read_manifest(path)?;
        let listed: BTreeSet<String> = entries.keys().cloned().collect();

        if let Some(extra) = payload.difference(&listed).next() {
            return Err(invalid(format!("{} not listed in manifest-{}.txt", extra, alg)));
        }
        if let Some(absent) = listed.difference(&payload).next() {
            return Err(invalid(format!("{} listed in manifest-{}.txt but absent", absent, alg)));
        }
        check_digests(root, *alg, &entries)?;
        algorithms.push(*alg);
    }

    let info = fs::read_to_string(root.join(BAG_INFO_FILE))
        .map(|text| parse_tags(&text))
        .unwrap_or_default();
    if let Some(oxum) = info.get(PAYLOAD_OXUM) {
        let expected = format!("{}.{}", payload_bytes, payload.len());
        if oxum != &expected {
            return Err(invalid(format!("Payload-Oxum {} does not match {}", oxum, expected)));
        }
    }

    for (alg, path) in &tagmanifests {
        let entries = read_manifest(path)?;
        check_digests(root, *alg, &entries)?;
    }

    Ok(PackageSummary {
        algorithms,
        payload_files: payload.len(),
        payload_bytes,
        info,
    })
}

/// Move `staged` to `dest`, parking any existing `dest` at `backup` until
/// the move succeeds and restoring it otherwise.
pub(crate) fn swap_into_place(staged: &Path, dest: &Path, backup: &Path) -> Result<()> {
    let had_previous = dest.symlink_metadata().is_ok();
    if had_previous {
        fs::rename(dest, backup)?;
    }

    if let Err(e) = fs::rename(staged, dest) {
        if had_previous {
            let _ = fs::rename(backup, dest);
        }
        return Err(e.into());
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> ArchiveError {
    ArchiveError::PackageInvalid(reason.into())
}

fn relative(root: &Path, path: &Path) -> String {
    to_archive_path(path.strip_prefix(root).unwrap_or(path))
}

type ManifestList = Vec<(DigestAlgorithm, PathBuf)>;

fn find_manifests(root: &Path) -> Result<(ManifestList, ManifestList)> {
    let mut manifests = Vec::new();
    let mut tagmanifests = Vec::new();

    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = name.strip_suffix(".txt") else {
            continue;
        };
        if let Some(alg) = stem.strip_prefix("tagmanifest-") {
            tagmanifests.push((alg.parse()?, path.clone()));
        } else if let Some(alg) = stem.strip_prefix("manifest-") {
            manifests.push((alg.parse()?, path.clone()));
        }
    }

    manifests.sort();
    tagmanifests.sort();
    Ok((manifests, tagmanifests))
}

fn read_manifest(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = fs::read_to_string(path)?;
    let mut entries = BTreeMap::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let (digest, file) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| invalid(format!("malformed line in {}: {}", path.display(), line)))?;
        entries.insert(decode_path(file.trim_start()), digest.to_lowercase());
    }
    Ok(entries)
}

fn check_digests(root: &Path, alg: DigestAlgorithm, entries: &BTreeMap<String, String>) -> Result<()> {
    for (file, expected) in entries {
        if file.split('/').any(|part| part == "..") {
            return Err(invalid(format!("path escapes package: {}", file)));
        }
        let path = root.join(file);
        if !path.is_file() {
            return Err(invalid(format!("{} is missing", file)));
        }
        let actual = hash_file(&path, &[alg])?.remove(0);
        if &actual != expected {
            return Err(invalid(format!("{} digest mismatch", file)));
        }
    }
    Ok(())
}

fn parse_tags(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn write_lines<I, S>(path: &Path, lines: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut file = fs::File::create(path)?;
    for line in lines {
        writeln!(file, "{}", line.as_ref())?;
    }
    file.sync_all()?;
    Ok(())
}

// Manifest paths percent-encode only what would break the line format
fn encode_path(path: &str) -> String {
    path.replace('%', "%25")
        .replace('\n', "%0A")
        .replace('\r', "%0D")
}

fn decode_path(path: &str) -> String {
    path.replace("%0A", "\n")
        .replace("%0a", "\n")
        .replace("%0D", "\r")
        .replace("%0d", "\r")
        .replace("%25", "%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn build(dir: &TempDir, algorithms: &[DigestAlgorithm]) -> PathBuf {
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.txt"), "alpha").unwrap();
        fs::write(src.join("b 100%.txt"), "beta!").unwrap();
        fs::write(src.join("a.txt.metadata.json"), "{}").unwrap();

        let mut bag = BagBuilder::create(dir.path().join("bag"), algorithms).unwrap();
        bag.add_payload("assets/x/a.txt", &src.join("a.txt")).unwrap();
        bag.add_payload("assets/y/b 100%.txt", &src.join("b 100%.txt")).unwrap();
        bag.add_tag_file("assets/x/a.txt.metadata.json", &src.join("a.txt.metadata.json"))
            .unwrap();

        let mut info = BTreeMap::new();
        info.insert("Contact-Name".to_string(), "Someone".to_string());
        bag.finish(&info).unwrap()
    }

    #[test]
    fn test_written_bag_validates() {
        let dir = TempDir::new().unwrap();
        let root = build(&dir, &[DigestAlgorithm::Sha256, DigestAlgorithm::Sha512]);

        let summary = validate_package(&root).unwrap();
        assert_eq!(summary.payload_files, 2);
        assert_eq!(summary.payload_bytes, 10);
        assert_eq!(summary.info.get(PAYLOAD_OXUM).unwrap(), "10.2");
        assert_eq!(summary.algorithms.len(), 2);
        assert!(root.join("tagmanifest-sha512.txt").exists());
        assert!(root.join("metadata/assets/x/a.txt.metadata.json").exists());

        let manifest = fs::read_to_string(root.join("manifest-sha256.txt")).unwrap();
        assert!(manifest.contains("data/assets/y/b 100%25.txt"));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let dir = TempDir::new().unwrap();
        let root = build(&dir, &[DigestAlgorithm::Sha256]);
        fs::write(root.join("data/assets/x/a.txt"), "ALPHA").unwrap();

        let err = validate_package(&root).unwrap_err();
        assert!(matches!(err, ArchiveError::PackageInvalid(_)));
    }

    #[test]
    fn test_unlisted_payload_fails() {
        let dir = TempDir::new().unwrap();
        let root = build(&dir, &[DigestAlgorithm::Sha256]);
        fs::write(root.join("data/extra.txt"), "surprise").unwrap();

        let err = validate_package(&root).unwrap_err();
        assert!(err.to_string().contains("data/extra.txt"));
    }

    #[test]
    fn test_missing_payload_fails() {
        let dir = TempDir::new().unwrap();
        let root = build(&dir, &[DigestAlgorithm::Sha256]);
        fs::remove_file(root.join("data/assets/x/a.txt")).unwrap();

        assert!(matches!(
            validate_package(&root).unwrap_err(),
            ArchiveError::PackageInvalid(_)
        ));
    }

    #[test]
    fn test_swap_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let staged = dir.path().join("staged");
        let dest = dir.path().join("dest");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("new.txt"), "new").unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("old.txt"), "old").unwrap();

        swap_into_place(&staged, &dest, &dir.path().join("backup")).unwrap();
        assert!(dest.join("new.txt").exists());
        assert!(!dest.join("old.txt").exists());
        assert!(dir.path().join("backup/old.txt").exists());
    }
}
