//! Export of catalog subsets.
//!
//! Three outputs are supported:
//! - BagIt packages, staged next to the destination and swapped in only
//!   after they validate
//! - plain directory copies of selected assets and their sidecars
//! - flat JSON or CSV manifests of the whole catalog

pub mod manifest;
pub mod package;

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use serde_json::Value;
use tempfile::Builder;
use tracing::{info, instrument, warn};

use crate::catalog::{Catalog, Filters, SearchQuery};
use crate::core::digest::DigestAlgorithm;
use crate::core::organizer::claim_target;
use crate::core::ProgressFn;
use crate::domain::{sidecar_path_for, SIDECAR_SUFFIX, TEMP_PREFIX};
use crate::error::{ArchiveError, Result};

pub use manifest::{Manifest, ManifestEntry, ManifestFormat};
pub use package::{validate_package, BagBuilder, PackageSummary};

/// Descriptive tags written unless the caller overrides them
pub const DEFAULT_SOURCE_ORGANIZATION: &str = "Archivist";
pub const DEFAULT_ORGANIZATION_ADDRESS: &str = "Unknown";
pub const DEFAULT_CONTACT_NAME: &str = "Archive Administrator";
pub const DEFAULT_CONTACT_EMAIL: &str = "admin@archive.local";

/// Target format for [`Exporter::export_selection`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Directory,
    Package,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Directory => write!(f, "directory"),
            ExportFormat::Package => write!(f, "package"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "directory" | "dir" => Ok(ExportFormat::Directory),
            "package" | "bagit" => Ok(ExportFormat::Package),
            _ => Err(ArchiveError::UnsupportedFormat(format!(
                "Unsupported export format: {}",
                s
            ))),
        }
    }
}

/// Parse and de-duplicate digest algorithm names, defaulting to sha256
pub fn parse_algorithms<S: AsRef<str>>(names: &[S]) -> Result<Vec<DigestAlgorithm>> {
    let mut algorithms = Vec::new();
    for name in names {
        let alg: DigestAlgorithm = name.as_ref().parse()?;
        if !algorithms.contains(&alg) {
            algorithms.push(alg);
        }
    }
    if algorithms.is_empty() {
        algorithms.push(DigestAlgorithm::Sha256);
    }
    Ok(algorithms)
}

/// Writes packages, directory copies and manifests from a catalog
pub struct Exporter {
    catalog: Catalog,
    progress: Option<ProgressFn>,
}

impl Exporter {
    pub fn new(catalog: &Catalog) -> Self {
        Self {
            catalog: catalog.clone(),
            progress: None,
        }
    }

    /// Report `(current, total, message)` once per exported file
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    fn report(&self, current: usize, total: usize, message: &str) {
        if let Some(progress) = &self.progress {
            progress(current, total, message);
        }
    }

    /// Package the assets matching `filters` (all assets when `None`) as a
    /// BagIt bag at `output`, replacing whatever is there.
    #[instrument(skip(self, output, filters, tags, algorithms), fields(output = %output.display()))]
    pub fn export_to_package<S: AsRef<str>>(
        &self,
        output: &Path,
        filters: Option<&Filters>,
        tags: Option<&BTreeMap<String, String>>,
        algorithms: &[S],
    ) -> Result<PathBuf> {
        let algorithms = parse_algorithms(algorithms)?;
        let dest = self.resolve_output(output)?;

        let query = SearchQuery::everything().with_filters(filters.cloned().unwrap_or_default());
        let results = self.catalog.search(&query)?.results;
        let total = results.len();
        info!(total, "Exporting package");

        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        let staging = Builder::new()
            .prefix(&format!("{}export-", TEMP_PREFIX))
            .tempdir_in(parent)?;
        let mut bag = BagBuilder::create(staging.path().join("bag"), &algorithms)?;

        let root = self.catalog.archive().root();
        for (i, result) in results.iter().enumerate() {
            self.report(i + 1, total, &format!("Packaging {}", result.file_name));

            let source = root.join(result.archive_path());
            if !source.is_file() {
                warn!(archive_path = %result.archive_path(), "Source file missing, skipping");
                continue;
            }
            bag.add_payload(result.archive_path(), &source)?;

            let sidecar = sidecar_path_for(&source);
            if sidecar.is_file() {
                let tag = format!("{}{}", result.archive_path(), SIDECAR_SUFFIX);
                bag.add_tag_file(&tag, &sidecar)?;
            }
        }

        let packaged = bag.payload_count();
        let bag_root = bag.finish(&self.bag_info(tags))?;
        validate_package(&bag_root)?;
        package::swap_into_place(&bag_root, &dest, &staging.path().join("previous"))?;

        info!(packaged, skipped = total - packaged, "Package written");
        Ok(dest)
    }

    fn bag_info(&self, tags: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
        let archive = self.catalog.archive();
        let mut info = BTreeMap::new();
        for (key, value) in [
            ("Source-Organization", DEFAULT_SOURCE_ORGANIZATION.to_string()),
            ("Organization-Address", DEFAULT_ORGANIZATION_ADDRESS.to_string()),
            ("Contact-Name", DEFAULT_CONTACT_NAME.to_string()),
            ("Contact-Email", DEFAULT_CONTACT_EMAIL.to_string()),
            ("External-Description", format!("Export from {}", archive.name())),
        ] {
            info.insert(key.to_string(), value);
        }

        if let Some(tags) = tags {
            info.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        info.insert("Bagging-Date".to_string(), Utc::now().format("%Y-%m-%d").to_string());
        info.insert(
            "Bag-Software-Agent".to_string(),
            format!("archivist v{}", env!("CARGO_PKG_VERSION")),
        );
        // Computed by the writer
        info.remove(package::PAYLOAD_OXUM);
        info
    }

    /// Export specific assets as a directory copy or a package
    #[instrument(skip(self, asset_ids, output), fields(count = asset_ids.len(), output = %output.display()))]
    pub fn export_selection<S: AsRef<str>>(
        &self,
        asset_ids: &[S],
        output: &Path,
        format: &str,
        preserve_structure: bool,
    ) -> Result<PathBuf> {
        let format: ExportFormat = format.parse()?;
        if output.is_file() {
            return Err(ArchiveError::AlreadyExists(format!(
                "Export destination is a file: {}",
                output.display()
            )));
        }

        match format {
            ExportFormat::Package => {
                let ids: Vec<Value> = asset_ids
                    .iter()
                    .map(|id| Value::String(id.as_ref().to_string()))
                    .collect();
                let mut filters = Filters::new();
                filters.insert("asset_id".to_string(), Value::Array(ids));
                self.export_to_package(output, Some(&filters), None, &["sha256"])
            }
            ExportFormat::Directory => self.export_directory(asset_ids, output, preserve_structure),
        }
    }

    fn export_directory<S: AsRef<str>>(
        &self,
        asset_ids: &[S],
        output: &Path,
        preserve_structure: bool,
    ) -> Result<PathBuf> {
        let dest = self.resolve_output(output)?;
        fs::create_dir_all(&dest)?;

        let root = self.catalog.archive().root();
        let total = asset_ids.len();
        let mut exported = 0;

        for (i, id) in asset_ids.iter().enumerate() {
            let id = id.as_ref();
            self.report(i + 1, total, &format!("Exporting asset {}", id));

            let Some(result) = self.catalog.get(id)? else {
                warn!(asset_id = id, "Asset not found, skipping");
                continue;
            };
            let source = root.join(result.archive_path());
            if !source.is_file() {
                warn!(archive_path = %result.archive_path(), "Source file missing, skipping");
                continue;
            }

            let dir = if preserve_structure {
                let rel = Path::new(result.archive_path());
                dest.join(rel.parent().unwrap_or_else(|| Path::new("")))
            } else {
                dest.clone()
            };
            fs::create_dir_all(&dir)?;

            let (target, mut file) = claim_target(&dir, &result.file_name)?;
            io::copy(&mut File::open(&source)?, &mut file)?;

            let sidecar = sidecar_path_for(&source);
            if sidecar.is_file() {
                fs::copy(&sidecar, sidecar_path_for(&target))?;
            }
            exported += 1;
        }

        info!(exported, requested = total, "Directory export complete");
        Ok(dest)
    }

    /// Write a JSON or CSV listing of every cataloged asset
    #[instrument(skip(self, output), fields(output = %output.display()))]
    pub fn generate_manifest(&self, output: &Path, format: &str) -> Result<PathBuf> {
        let format: ManifestFormat = format.parse()?;
        let results = self.catalog.search(&SearchQuery::everything())?.results;
        let manifest = Manifest::new(self.catalog.archive(), self.catalog.statistics()?, results);

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        match format {
            ManifestFormat::Json => {
                let mut text = serde_json::to_string_pretty(&manifest)?;
                text.push('\n');
                fs::write(output, text)?;
            }
            ManifestFormat::Csv => fs::write(output, manifest.to_csv()?)?,
        }

        info!(assets = manifest.assets.len(), %format, "Manifest written");
        Ok(output.to_path_buf())
    }

    /// Absolute destination path, refusing targets that would overwrite the archive
    fn resolve_output(&self, output: &Path) -> Result<PathBuf> {
        let name = output.file_name().ok_or_else(|| {
            ArchiveError::InvalidArgument(format!("Export destination has no name: {}", output.display()))
        })?;
        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;
        let dest = parent.canonicalize()?.join(name);

        let archive = self.catalog.archive();
        if dest.starts_with(archive.assets_dir()) || archive.root().starts_with(&dest) {
            return Err(ArchiveError::InvalidArgument(format!(
                "Export destination overlaps the archive: {}",
                dest.display()
            )));
        }
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Organizer;
    use crate::domain::{Archive, Asset};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Catalog, Vec<Asset>) {
        let dir = TempDir::new().unwrap();
        let archive = Archive::create(dir.path().join("archive"), "Export Test", "").unwrap();
        let catalog = Catalog::open(&archive).unwrap();
        let organizer = Organizer::new(&archive);

        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let mut assets = Vec::new();
        for (name, sub) in [("a.txt", "one"), ("b.txt", "two"), ("a.txt", "two")] {
            let file = src.join(name);
            fs::write(&file, format!("{} in {}", name, sub)).unwrap();
            let asset = organizer.ingest_file(&file, None, None, Some(sub)).unwrap();
            catalog.index(&asset);
            assets.push(asset);
        }
        (dir, catalog, assets)
    }

    fn ids(assets: &[Asset]) -> Vec<String> {
        assets
            .iter()
            .map(|a| a.metadata.as_ref().unwrap().asset_id.clone())
            .collect()
    }

    #[test]
    fn test_package_contains_payload_and_sidecars() {
        let (dir, catalog, _assets) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let exporter = Exporter::new(&catalog).with_progress(Arc::new(move |_: usize, _: usize, _: &str| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let out = exporter
            .export_to_package(&dir.path().join("bag"), None, None, &["sha256", "sha512"])
            .unwrap();

        let summary = validate_package(&out).unwrap();
        assert_eq!(summary.payload_files, 3);
        assert_eq!(summary.info["Source-Organization"], DEFAULT_SOURCE_ORGANIZATION);
        assert!(out.join("data/assets/one/a.txt").exists());
        assert!(out.join("metadata/assets/one/a.txt.metadata.json").exists());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_caller_tags_override_defaults_but_not_forced_values() {
        let (dir, catalog, _assets) = setup();
        let mut tags = BTreeMap::new();
        tags.insert("Contact-Name".to_string(), "Curator".to_string());
        tags.insert("Payload-Oxum".to_string(), "1.1".to_string());

        let out = Exporter::new(&catalog)
            .export_to_package(&dir.path().join("bag"), None, Some(&tags), &["sha256"])
            .unwrap();
        let summary = validate_package(&out).unwrap();
        assert_eq!(summary.info["Contact-Name"], "Curator");
        assert_ne!(summary.info["Payload-Oxum"], "1.1");
    }

    #[test]
    fn test_unsupported_algorithm_does_nothing() {
        let (dir, catalog, _assets) = setup();
        let out = dir.path().join("bag");
        let err = Exporter::new(&catalog)
            .export_to_package(&out, None, None, &["md5"])
            .unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedFormat(_)));
        assert!(!out.exists());
    }

    #[test]
    fn test_missing_source_is_skipped() {
        let (dir, catalog, assets) = setup();
        fs::remove_file(&assets[0].file_path).unwrap();

        let out = Exporter::new(&catalog)
            .export_to_package(&dir.path().join("bag"), None, None, &["sha256"])
            .unwrap();
        assert_eq!(validate_package(&out).unwrap().payload_files, 2);
    }

    #[test]
    fn test_package_replaces_existing_destination() {
        let (dir, catalog, _assets) = setup();
        let out = dir.path().join("bag");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale.txt"), "old").unwrap();

        Exporter::new(&catalog)
            .export_to_package(&out, None, None, &["sha256"])
            .unwrap();
        assert!(!out.join("stale.txt").exists());
        assert!(out.join("bagit.txt").exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| crate::domain::is_temp_file(&e.path()))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_destination_inside_assets_rejected() {
        let (_dir, catalog, _assets) = setup();
        let out = catalog.archive().assets_dir().join("bag");
        let err = Exporter::new(&catalog)
            .export_to_package(&out, None, None, &["sha256"])
            .unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidArgument(_)));
    }

    #[test]
    fn test_flattened_selection_renames_collisions() {
        let (dir, catalog, assets) = setup();
        let out = dir.path().join("flat");
        Exporter::new(&catalog)
            .export_selection(&ids(&assets), &out, "directory", false)
            .unwrap();

        assert!(out.join("a.txt").exists());
        assert!(out.join("a_1.txt").exists());
        assert!(out.join("b.txt").exists());
        assert!(out.join("a_1.txt.metadata.json").exists());
    }

    #[test]
    fn test_structured_selection_keeps_layout() {
        let (dir, catalog, assets) = setup();
        let out = dir.path().join("tree");
        Exporter::new(&catalog)
            .export_selection(&ids(&assets[..1]), &out, "dir", true)
            .unwrap();
        assert!(out.join("assets/one/a.txt").exists());
        assert!(!out.join("assets/two").exists());
    }

    #[test]
    fn test_selection_as_package_filters_ids() {
        let (dir, catalog, assets) = setup();
        let out = Exporter::new(&catalog)
            .export_selection(&ids(&assets[1..]), &dir.path().join("bag"), "bagit", true)
            .unwrap();
        assert_eq!(validate_package(&out).unwrap().payload_files, 2);
    }

    #[test]
    fn test_selection_errors() {
        let (dir, catalog, assets) = setup();
        let exporter = Exporter::new(&catalog);

        let err = exporter
            .export_selection(&ids(&assets), &dir.path().join("x"), "zip", true)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedFormat(_)));

        let file = dir.path().join("taken");
        fs::write(&file, "").unwrap();
        let err = exporter
            .export_selection(&ids(&assets), &file, "directory", true)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::AlreadyExists(_)));
    }

    #[test]
    fn test_manifest_formats() {
        let (dir, catalog, _assets) = setup();
        let exporter = Exporter::new(&catalog);

        let json = exporter
            .generate_manifest(&dir.path().join("m.json"), "json")
            .unwrap();
        let doc: Value = serde_json::from_str(&fs::read_to_string(json).unwrap()).unwrap();
        assert_eq!(doc["assets"].as_array().unwrap().len(), 3);
        assert_eq!(doc["statistics"]["total_assets"], 3);
        assert_eq!(doc["archive"]["name"], "Export Test");

        let csv = exporter.generate_manifest(&dir.path().join("m.csv"), "csv").unwrap();
        let text = fs::read_to_string(csv).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(text.starts_with("asset_id,archive_path,file_name"));

        assert!(exporter.generate_manifest(&dir.path().join("m.xml"), "xml").is_err());
    }
}
