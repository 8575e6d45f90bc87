//! User settings for the archivist CLI.
//!
//! Settings live in a YAML file:
//! 1. `$ARCHIVIST_SETTINGS` when set
//! 2. `~/.archivist/settings.yaml` otherwise
//!
//! Loading and saving are plain functions of a path; a missing file yields
//! defaults. Nothing is cached process-wide.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::executor::{default_workers, ExecutorKind};
use crate::core::organizer::DEFAULT_IGNORE_PATTERNS;

/// Overrides the settings file location
pub const SETTINGS_ENV: &str = "ARCHIVIST_SETTINGS";

/// Archive root used when none is given on the command line
pub const ROOT_ENV: &str = "ARCHIVIST_ROOT";

pub const SETTINGS_VERSION: &str = "1.0";

/// Recent archives remembered, most recent first
pub const MAX_RECENT_ARCHIVES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub version: String,

    /// Parent directory suggested for new archives
    pub default_archive_location: Option<PathBuf>,

    pub recent_archives: Vec<PathBuf>,
    pub verify: VerifySettings,
    pub catalog: CatalogSettings,
    pub ingest: IngestSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION.to_string(),
            default_archive_location: None,
            recent_archives: Vec::new(),
            verify: VerifySettings::default(),
            catalog: CatalogSettings::default(),
            ingest: IngestSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifySettings {
    pub executor: ExecutorKind,
    pub max_workers: usize,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            executor: ExecutorKind::Auto,
            max_workers: default_workers(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub busy_timeout_secs: u64,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self { busy_timeout_secs: 30 }
    }
}

impl CatalogSettings {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Glob patterns skipped during directory ingestion
    pub ignore_patterns: Vec<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            ignore_patterns: DEFAULT_IGNORE_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl Settings {
    /// Settings file location from the environment or the home directory
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(SETTINGS_ENV).filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        Ok(dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".archivist")
            .join("settings.yaml"))
    }

    /// Load from `path`, falling back to defaults when the file is absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_yaml::to_string(self).context("Failed to serialize settings")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))
    }

    /// Move `root` to the front of the recent list
    pub fn add_recent_archive(&mut self, root: impl Into<PathBuf>) {
        let root = root.into();
        self.recent_archives.retain(|p| p != &root);
        self.recent_archives.insert(0, root);
        self.recent_archives.truncate(MAX_RECENT_ARCHIVES);
    }

    pub fn most_recent_archive(&self) -> Option<&Path> {
        self.recent_archives.first().map(PathBuf::as_path)
    }

    /// Archive root from the argument, then `$ARCHIVIST_ROOT`, then the recent list
    pub fn resolve_root(&self, explicit: Option<&Path>) -> Option<PathBuf> {
        self.pick_root(explicit, std::env::var_os(ROOT_ENV))
    }

    fn pick_root(&self, explicit: Option<&Path>, env: Option<OsString>) -> Option<PathBuf> {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| env.filter(|v| !v.is_empty()).map(PathBuf::from))
            .or_else(|| self.most_recent_archive().map(Path::to_path_buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::load(&temp.path().join("nope.yaml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.catalog.busy_timeout(), Duration::from_secs(30));
        assert_eq!(settings.ingest.ignore_patterns, vec![".DS_Store", "Thumbs.db"]);
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("settings.yaml");

        let mut settings = Settings::default();
        settings.verify.executor = ExecutorKind::Pool;
        settings.verify.max_workers = 3;
        settings.add_recent_archive("/archives/one");
        settings.save(&path).unwrap();

        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.yaml");
        fs::write(
            &path,
            r#"
verify:
  executor: sequential
catalog:
  busy_timeout_secs: 5
"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.verify.executor, ExecutorKind::Sequential);
        assert_eq!(settings.verify.max_workers, default_workers());
        assert_eq!(settings.catalog.busy_timeout_secs, 5);
        assert_eq!(settings.version, SETTINGS_VERSION);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.yaml");
        fs::write(&path, "verify: [not, a, map").unwrap();
        assert!(Settings::load(&path).is_err());
    }

    #[test]
    fn test_recent_archives_dedup_and_cap() {
        let mut settings = Settings::default();
        for i in 0..15 {
            settings.add_recent_archive(format!("/a/{}", i));
        }
        settings.add_recent_archive("/a/7");

        assert_eq!(settings.recent_archives.len(), MAX_RECENT_ARCHIVES);
        assert_eq!(settings.most_recent_archive(), Some(Path::new("/a/7")));
        assert_eq!(
            settings.recent_archives.iter().filter(|p| p.as_path() == Path::new("/a/7")).count(),
            1
        );
    }

    #[test]
    fn test_root_priority() {
        let mut settings = Settings::default();
        assert_eq!(settings.pick_root(None, None), None);

        settings.add_recent_archive("/recent");
        assert_eq!(settings.pick_root(None, None), Some(PathBuf::from("/recent")));
        assert_eq!(
            settings.pick_root(None, Some(OsString::from("/env"))),
            Some(PathBuf::from("/env"))
        );
        assert_eq!(
            settings.pick_root(Some(Path::new("/arg")), Some(OsString::from("/env"))),
            Some(PathBuf::from("/arg"))
        );
    }
}
