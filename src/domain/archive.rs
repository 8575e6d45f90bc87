//! Archive descriptor and on-disk layout.
//!
//! ```text
//! <root>/
//!   archive.json        descriptor
//!   assets/             archived files and their sidecars
//!   profiles/<id>.json  metadata profiles
//!   .index/catalog.db   rebuildable catalog
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use super::asset::is_sidecar;
use super::profile::Profile;
use super::{is_temp_file, write_json};
use crate::error::{ArchiveError, Result};

pub const DESCRIPTOR_FILE: &str = "archive.json";
pub const ASSETS_DIR: &str = "assets";
pub const PROFILES_DIR: &str = "profiles";
pub const INDEX_DIR: &str = ".index";
pub const CATALOG_FILE: &str = "catalog.db";

/// How ingested files are laid out under `assets/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationSchema {
    /// `/`-separated template; tokens: year, month, day, type, extension
    #[serde(default = "default_structure")]
    pub structure: String,

    #[serde(default = "default_true")]
    pub preserve_original_names: bool,

    #[serde(default)]
    pub normalize_names: bool,
}

fn default_structure() -> String {
    "year/month/type".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for OrganizationSchema {
    fn default() -> Self {
        Self {
            structure: default_structure(),
            preserve_original_names: true,
            normalize_names: false,
        }
    }
}

/// Contents of `archive.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub root_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub organization_schema: OrganizationSchema,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// An archive rooted at a directory
#[derive(Debug, Clone)]
pub struct Archive {
    root: PathBuf,
    pub config: ArchiveConfig,
}

impl Archive {
    /// Whether `root` holds an archive descriptor
    pub fn exists(root: &Path) -> bool {
        root.join(DESCRIPTOR_FILE).is_file()
    }

    /// Provision a new archive skeleton under `root`
    pub fn create(root: impl AsRef<Path>, name: &str, description: &str) -> Result<Self> {
        let root = root.as_ref();
        if Self::exists(root) {
            return Err(ArchiveError::AlreadyExists(format!(
                "Archive already exists at {}",
                root.display()
            )));
        }

        fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        for dir in [ASSETS_DIR, PROFILES_DIR, INDEX_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }

        let now = Utc::now();
        let config = ArchiveConfig {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            root_path: root.to_string_lossy().into_owned(),
            created_at: now,
            updated_at: now,
            version: default_version(),
            organization_schema: OrganizationSchema::default(),
        };

        write_json(&root.join(DESCRIPTOR_FILE), &config)?;
        info!(archive_id = %config.id, root = %root.display(), "Created archive");

        Ok(Self { root, config })
    }

    /// Load an existing archive from its descriptor
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let descriptor = root.join(DESCRIPTOR_FILE);

        let content = fs::read_to_string(&descriptor).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                ArchiveError::NotFound(format!("No archive at {}", root.display()))
            }
            _ => ArchiveError::Io(e),
        })?;
        let config: ArchiveConfig =
            serde_json::from_str(&content).map_err(|e| ArchiveError::corrupt(&descriptor, e))?;

        let root = root.canonicalize()?;
        debug!(archive_id = %config.id, root = %root.display(), "Loaded archive");

        Ok(Self { root, config })
    }

    /// Refresh `updated_at` and rewrite the descriptor
    pub fn save_config(&mut self) -> Result<()> {
        self.config.updated_at = Utc::now();
        write_json(&self.root.join(DESCRIPTOR_FILE), &self.config)
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root.join(ASSETS_DIR)
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join(PROFILES_DIR)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.root.join(INDEX_DIR)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.index_dir().join(CATALOG_FILE)
    }

    pub fn organization(&self) -> &OrganizationSchema {
        &self.config.organization_schema
    }

    /// Number of files under `assets/` that are not sidecars
    pub fn asset_count(&self) -> usize {
        self.asset_files().map(|files| files.len()).unwrap_or(0)
    }

    /// Files under `assets/` that are not sidecars, sorted
    pub fn asset_files(&self) -> Result<Vec<PathBuf>> {
        self.walk_assets(|path| !is_sidecar(path))
    }

    /// Sidecar files under `assets/`, sorted
    pub fn sidecar_files(&self) -> Result<Vec<PathBuf>> {
        self.walk_assets(is_sidecar)
    }

    fn walk_assets(&self, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
        let assets_dir = self.assets_dir();
        if !assets_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&assets_dir).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type().is_file() && !is_temp_file(path) && keep(path) {
                files.push(path.to_path_buf());
            }
        }
        Ok(files)
    }

    /// Profile storage under `profiles/`
    pub fn profiles(&self) -> ProfileStore {
        ProfileStore::new(self.profiles_dir())
    }
}

/// Profiles stored as `profiles/<id>.json`
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(ArchiveError::InvalidArgument(format!("Invalid profile id: {}", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }

    pub fn save(&self, profile: &Profile) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&profile.id)?;
        write_json(&path, profile)?;
        debug!(profile_id = %profile.id, "Saved profile");
        Ok(path)
    }

    pub fn load(&self, id: &str) -> Result<Profile> {
        let path = self.path_for(id)?;
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ArchiveError::NotFound(format!("Profile not found: {}", id)),
            _ => ArchiveError::Io(e),
        })?;
        serde_json::from_str(&content).map_err(|e| ArchiveError::corrupt(&path, e))
    }

    /// All readable profiles, sorted by name
    pub fn list(&self) -> Result<Vec<Profile>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut profiles = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(ArchiveError::from)
                .and_then(|c| serde_json::from_str::<Profile>(&c).map_err(|e| ArchiveError::corrupt(&path, e)));
            match parsed {
                Ok(profile) => profiles.push(profile),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable profile"),
            }
        }

        profiles.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(profiles)
    }

    /// Find a profile by id, or by name when no id matches
    pub fn find(&self, id_or_name: &str) -> Result<Profile> {
        match self.load(id_or_name) {
            Ok(profile) => Ok(profile),
            Err(ArchiveError::NotFound(_)) | Err(ArchiveError::InvalidArgument(_)) => self
                .list()?
                .into_iter()
                .find(|p| p.name == id_or_name)
                .ok_or_else(|| ArchiveError::NotFound(format!("Profile not found: {}", id_or_name))),
            Err(e) => Err(e),
        }
    }

    /// Delete a profile file. Assets that reference it are left untouched.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
