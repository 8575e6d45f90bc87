//! Command-line interface for archivist.
//!
//! Provides commands for creating archives, ingesting files, searching the
//! catalog, verifying integrity, repairing the index and exporting subsets.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::warn;

use crate::catalog::{Catalog, Filters, SearchQuery, SortOrder};
use crate::config::Settings;
use crate::core::{ExecutorKind, IntegrityVerifier, Organizer, ProgressFn};
use crate::domain::{Archive, Metadata, MetadataValue};
use crate::export::{ExportFormat, Exporter};

pub mod profile;

/// archivist - Digital asset archive with integrity verification
#[derive(Parser, Debug)]
#[command(name = "archivist")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Archive root (defaults to $ARCHIVIST_ROOT, then the most recent archive)
    #[arg(short, long, global = true)]
    pub archive: Option<PathBuf>,

    /// Settings file (defaults to ~/.archivist/settings.yaml)
    #[arg(long, global = true, env = "ARCHIVIST_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new archive
    Create {
        /// Directory for the archive
        path: PathBuf,

        /// Archive name (defaults to the directory name)
        #[arg(short, long)]
        name: Option<String>,

        /// Free-text description
        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// Show archive details
    Info,

    /// Ingest files or directories
    Add {
        /// Files or directories to ingest
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Profile id or name to apply
        #[arg(short, long)]
        profile: Option<String>,

        /// Custom metadata as `key=value` (JSON values allowed)
        #[arg(short, long = "meta")]
        metadata: Vec<String>,

        /// Tags to apply (comma-separated)
        #[arg(short, long)]
        tags: Option<String>,

        /// Place files under this folder in assets/ instead of the organization schema
        #[arg(short, long)]
        subfolder: Option<String>,

        /// Only ingest the top level of directories
        #[arg(long)]
        no_recursive: bool,
    },

    /// Search the catalog
    Search {
        /// Free-text query
        query: Option<String>,

        /// Filter as `key=value` (JSON values allowed, e.g. `tags=["a","b"]`)
        #[arg(short, long = "filter")]
        filters: Vec<String>,

        /// Sort column or custom field
        #[arg(long, default_value = "created_at")]
        sort: String,

        /// Sort order (asc or desc)
        #[arg(long, default_value = "desc")]
        order: String,

        /// Maximum number of results to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: i64,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify checksums of one asset or the whole archive
    Verify {
        /// Asset id (all assets when omitted)
        asset_id: Option<String>,

        /// Executor: auto, sequential or pool
        #[arg(short, long)]
        executor: Option<ExecutorKind>,

        /// Worker count for the pool executor
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// List files under assets/ missing from the catalog
    Orphans,

    /// Reconcile the catalog with the filesystem
    Repair,

    /// List assets with identical content
    Duplicates,

    /// Show catalog statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the catalog from sidecar files
    Reindex {
        /// Rewrite rows even when unchanged
        #[arg(short, long)]
        force: bool,
    },

    /// Export assets as a BagIt package or a directory copy
    Export {
        /// Destination path
        output: PathBuf,

        /// Only these asset ids (repeatable)
        #[arg(long = "id")]
        ids: Vec<String>,

        /// Filter as `key=value` when exporting by search
        #[arg(short, long = "filter")]
        filters: Vec<String>,

        /// Package tag as `Key=value` (bag-info.txt)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Digest algorithms for manifests (repeatable)
        #[arg(long = "algorithm", default_value = "sha256")]
        algorithms: Vec<String>,

        /// Output format: package or directory (directory requires --id)
        #[arg(long, default_value = "package")]
        format: String,

        /// Flatten directory exports instead of keeping archive paths
        #[arg(long)]
        flatten: bool,
    },

    /// Write a JSON or CSV manifest of every asset
    Manifest {
        /// Destination file
        output: PathBuf,

        /// json or csv
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Manage metadata profiles
    Profile {
        #[command(subcommand)]
        command: profile::ProfileCommands,
    },

    /// Show or change user settings
    Settings {
        /// Default executor for verification
        #[arg(long)]
        executor: Option<ExecutorKind>,

        /// Default worker count for verification
        #[arg(long)]
        workers: Option<usize>,

        /// Catalog busy timeout in seconds
        #[arg(long)]
        busy_timeout: Option<u64>,

        /// Default parent directory for new archives
        #[arg(long)]
        default_location: Option<PathBuf>,
    },
}

/// Loaded settings plus the archive selection for one invocation
struct Session {
    settings: Settings,
    settings_path: PathBuf,
    archive_arg: Option<PathBuf>,
}

impl Session {
    fn load(cli: &Cli) -> Result<Self> {
        let settings_path = match &cli.settings {
            Some(path) => path.clone(),
            None => Settings::default_path()?,
        };
        Ok(Self {
            settings: Settings::load(&settings_path)?,
            settings_path,
            archive_arg: cli.archive.clone(),
        })
    }

    /// Open the selected archive and remember it as most recent
    fn open_archive(&mut self) -> Result<Archive> {
        let Some(root) = self.settings.resolve_root(self.archive_arg.as_deref()) else {
            bail!("No archive specified. Use --archive <path>, set ARCHIVIST_ROOT, or run `archivist create`");
        };
        let archive = Archive::load(&root)
            .with_context(|| format!("Failed to open archive at {}", root.display()))?;
        self.remember(archive.root());
        Ok(archive)
    }

    fn open_catalog(&mut self) -> Result<(Archive, Catalog)> {
        let archive = self.open_archive()?;
        let catalog = Catalog::open_with_timeout(&archive, self.settings.catalog.busy_timeout())?;
        Ok((archive, catalog))
    }

    fn remember(&mut self, root: &Path) {
        self.settings.add_recent_archive(root);
        if let Err(e) = self.settings.save(&self.settings_path) {
            warn!(error = %e, "Could not update recent archives");
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let mut session = Session::load(&self)?;

        match self.command {
            Commands::Create {
                path,
                name,
                description,
            } => create_archive(&mut session, &path, name, &description),
            Commands::Info => show_info(&mut session),
            Commands::Add {
                paths,
                profile,
                metadata,
                tags,
                subfolder,
                no_recursive,
            } => add_files(
                &mut session,
                &paths,
                profile.as_deref(),
                &metadata,
                tags.as_deref(),
                subfolder.as_deref(),
                !no_recursive,
            ),
            Commands::Search {
                query: text,
                filters,
                sort,
                order,
                limit,
                offset,
                json,
            } => {
                let order: SortOrder = order.parse()?;
                let mut query = SearchQuery::new()
                    .with_filters(parse_filters(&filters)?)
                    .sort(sort, order)
                    .page(limit, offset);
                if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
                    query = query.with_text(text);
                }
                search(&mut session, query, json)
            }
            Commands::Verify {
                asset_id,
                executor,
                workers,
            } => verify(&mut session, asset_id.as_deref(), executor, workers).await,
            Commands::Orphans => list_orphans(&mut session),
            Commands::Repair => repair(&mut session),
            Commands::Duplicates => list_duplicates(&mut session),
            Commands::Stats { json } => show_stats(&mut session, json),
            Commands::Reindex { force } => reindex(&mut session, force),
            Commands::Export {
                output,
                ids,
                filters,
                tags,
                algorithms,
                format,
                flatten,
            } => export(&mut session, &output, &ids, &filters, &tags, &algorithms, &format, flatten),
            Commands::Manifest { output, format } => {
                let (_, catalog) = session.open_catalog()?;
                let path = Exporter::new(&catalog).generate_manifest(&output, &format)?;
                println!("Manifest written to {}", path.display());
                Ok(())
            }
            Commands::Profile { command } => {
                let archive = session.open_archive()?;
                profile::execute(&archive, command)
            }
            Commands::Settings {
                executor,
                workers,
                busy_timeout,
                default_location,
            } => update_settings(&mut session, executor, workers, busy_timeout, default_location),
        }
    }
}

/// Create an archive and make it the most recent one
fn create_archive(
    session: &mut Session,
    path: &Path,
    name: Option<String>,
    description: &str,
) -> Result<()> {
    let path = if path.is_relative() && !path.exists() {
        match &session.settings.default_archive_location {
            Some(base) if path.components().count() == 1 => base.join(path),
            _ => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    };

    let name = name.unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Archive".to_string())
    });

    let archive = Archive::create(&path, &name, description)
        .with_context(|| format!("Failed to create archive at {}", path.display()))?;
    session.remember(archive.root());

    println!("Created archive '{}'", archive.name());
    println!("  ID:   {}", archive.id());
    println!("  Root: {}", archive.root().display());
    Ok(())
}

fn show_info(session: &mut Session) -> Result<()> {
    let (archive, catalog) = session.open_catalog()?;
    let stats = catalog.statistics()?;

    println!("Archive: {}", archive.name());
    println!("ID: {}", archive.id());
    println!("Root: {}", archive.root().display());
    if !archive.config.description.is_empty() {
        println!("Description: {}", archive.config.description);
    }
    println!("Created: {}", archive.config.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Organization: {}", archive.organization().structure);
    println!("Files on disk: {}", archive.asset_count());
    println!("Cataloged assets: {}", stats.total_assets);
    println!("Total size: {}", format_size(stats.total_size));
    println!("Profiles: {}", archive.profiles().list()?.len());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn add_files(
    session: &mut Session,
    paths: &[PathBuf],
    profile: Option<&str>,
    metadata: &[String],
    tags: Option<&str>,
    subfolder: Option<&str>,
    recursive: bool,
) -> Result<()> {
    let (archive, catalog) = session.open_catalog()?;
    let profile = profile.map(|p| archive.profiles().find(p)).transpose()?;

    let mut custom = Metadata::new();
    for pair in metadata {
        let (key, raw) = split_pair(pair)?;
        custom.insert(key.to_string(), MetadataValue::parse_loose(raw));
    }
    if let Some(tags) = tags {
        let tags: Vec<&str> = tags.split(',').map(str::trim).filter(|t| !t.is_empty()).collect();
        if !tags.is_empty() {
            custom.insert("tags".to_string(), MetadataValue::from(tags));
        }
    }

    let organizer = Organizer::new(&archive)
        .with_ignore_patterns(&session.settings.ingest.ignore_patterns)?
        .with_progress(progress_printer());

    let mut ingested = 0;
    let mut failed = 0;
    for path in paths {
        if path.is_dir() {
            let outcome =
                organizer.ingest_directory_detailed(path, profile.as_ref(), Some(&custom), recursive)?;
            for rel in &outcome.failed {
                eprintln!("Failed to add {}", path.join(rel).display());
            }
            failed += outcome.failed.len();
            let assets = outcome.assets;
            if catalog.index_batch(&assets) {
                ingested += assets.len();
            } else {
                // Batch rolled back; index one by one
                for asset in &assets {
                    if catalog.index(asset) {
                        ingested += 1;
                    } else {
                        failed += 1;
                    }
                }
            }
        } else {
            match organizer.ingest_file(path, profile.as_ref(), Some(custom.clone()), subfolder) {
                Ok(asset) if catalog.index(&asset) => {
                    ingested += 1;
                    println!("Added {}", asset.archive_path());
                }
                Ok(asset) => {
                    eprintln!("Stored {} but could not index it", asset.archive_path());
                    failed += 1;
                }
                Err(e) => {
                    eprintln!("Failed to add {}: {}", path.display(), e);
                    failed += 1;
                }
            }
        }
    }

    println!("\n{} file(s) ingested, {} failed", ingested, failed);
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn search(session: &mut Session, query: SearchQuery, json: bool) -> Result<()> {
    let (_, catalog) = session.open_catalog()?;
    let page = catalog.search(&query)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    if page.results.is_empty() {
        println!("No matching assets");
        return Ok(());
    }

    println!("{:<38} {:<10} {:<50}", "ASSET ID", "SIZE", "PATH");
    println!("{}", "-".repeat(100));
    for result in &page.results {
        println!(
            "{:<38} {:<10} {:<50}",
            result.asset_id(),
            format_size(result.asset.file_size),
            result.archive_path()
        );
    }
    println!(
        "\nShowing {} of {} match(es)",
        page.results.len(),
        page.total
    );
    Ok(())
}

async fn verify(
    session: &mut Session,
    asset_id: Option<&str>,
    executor: Option<ExecutorKind>,
    workers: Option<usize>,
) -> Result<()> {
    let (_, catalog) = session.open_catalog()?;
    let verify = &session.settings.verify;
    let verifier = IntegrityVerifier::new(&catalog).with_executor(
        executor.unwrap_or(verify.executor),
        workers.unwrap_or(verify.max_workers),
    );

    if let Some(id) = asset_id {
        let status = verifier.verify_single(id)?;
        println!("{}: {}", id, status);
        return Ok(());
    }

    let token = verifier.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling after in-flight checks finish...");
            token.cancel();
        }
    });

    let report = verifier.with_progress(progress_printer()).verify_all().await?;

    println!("\nVerification {}", if report.cancelled { "cancelled" } else { "complete" });
    println!("  Checked:          {}/{}", report.checked, report.total);
    println!("  Verified:         {}", report.verified);
    println!("  Corrupted:        {}", report.corrupted.len());
    println!("  Missing:          {}", report.missing.len());
    println!("  Missing metadata: {}", report.missing_metadata.len());
    println!("  Errors:           {}", report.errors);
    println!("  Success rate:     {:.1}%", report.success_rate());
    println!("  Duration:         {:.1}s", report.duration().num_milliseconds() as f64 / 1000.0);

    for (label, paths) in [
        ("CORRUPTED", &report.corrupted),
        ("MISSING", &report.missing),
        ("NO METADATA", &report.missing_metadata),
    ] {
        for path in paths {
            println!("  [{}] {}", label, path);
        }
    }

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

fn list_orphans(session: &mut Session) -> Result<()> {
    let (archive, catalog) = session.open_catalog()?;
    let orphans = IntegrityVerifier::new(&catalog).find_orphaned_files()?;

    if orphans.is_empty() {
        println!("No orphaned files");
        return Ok(());
    }
    for path in &orphans {
        let shown = path.strip_prefix(archive.root()).unwrap_or(path);
        println!("{}", shown.display());
    }
    println!("\n{} orphaned file(s). Run `archivist repair` to index them.", orphans.len());
    Ok(())
}

fn repair(session: &mut Session) -> Result<()> {
    let (_, catalog) = session.open_catalog()?;
    let stats = IntegrityVerifier::new(&catalog).repair_index()?;

    println!("Repair complete");
    println!("  Removed missing: {}", stats.removed_missing);
    println!("  Re-indexed:      {}", stats.reindexed);
    println!("  Newly indexed:   {}", stats.newly_indexed);
    println!("  Errors:          {}", stats.errors);
    Ok(())
}

fn list_duplicates(session: &mut Session) -> Result<()> {
    let (_, catalog) = session.open_catalog()?;
    let groups = catalog.search_duplicates()?;

    if groups.is_empty() {
        println!("No duplicates found");
        return Ok(());
    }
    for (digest, results) in &groups {
        println!("{} ({} copies)", &digest[..digest.len().min(16)], results.len());
        for result in results {
            println!("  {}  {}", result.asset_id(), result.archive_path());
        }
    }
    Ok(())
}

fn show_stats(session: &mut Session, json: bool) -> Result<()> {
    let (_, catalog) = session.open_catalog()?;
    let stats = catalog.statistics()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Total assets: {}", stats.total_assets);
    println!("Total size:   {}", format_size(stats.total_size));
    println!("\nBy media type:");
    for (mime, group) in &stats.by_media_type {
        println!("  {:<40} {:>6}  {:>10}", mime, group.count, format_size(group.size));
    }
    println!("\nBy profile:");
    for (profile, count) in &stats.by_profile {
        println!("  {:<40} {:>6}", profile, count);
    }

    let fields = catalog.metadata_fields()?;
    if !fields.is_empty() {
        println!("\nCustom fields:");
        for field in fields {
            println!("  {:<40} {:<8} {:>6}", field.name, field.kind.as_str(), field.usage_count);
        }
    }
    Ok(())
}

fn reindex(session: &mut Session, force: bool) -> Result<()> {
    let (_, catalog) = session.open_catalog()?;
    let (success, errors) = catalog.index_all(force)?;
    println!("Indexed {} asset(s), {} error(s)", success, errors);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn export(
    session: &mut Session,
    output: &Path,
    ids: &[String],
    filters: &[String],
    tags: &[String],
    algorithms: &[String],
    format: &str,
    flatten: bool,
) -> Result<()> {
    let (_, catalog) = session.open_catalog()?;
    let exporter = Exporter::new(&catalog).with_progress(progress_printer());

    let path = if !ids.is_empty() {
        exporter.export_selection(ids, output, format, !flatten)?
    } else {
        if format.parse::<ExportFormat>()? != ExportFormat::Package {
            bail!("Directory exports need at least one --id");
        }
        let filters = parse_filters(filters)?;
        let mut bag_tags = BTreeMap::new();
        for pair in tags {
            let (key, value) = split_pair(pair)?;
            bag_tags.insert(key.to_string(), value.to_string());
        }
        exporter.export_to_package(output, Some(&filters), Some(&bag_tags), algorithms)?
    };

    println!("Exported to {}", path.display());
    Ok(())
}

fn update_settings(
    session: &mut Session,
    executor: Option<ExecutorKind>,
    workers: Option<usize>,
    busy_timeout: Option<u64>,
    default_location: Option<PathBuf>,
) -> Result<()> {
    let settings = &mut session.settings;
    let changed = executor.is_some() || workers.is_some() || busy_timeout.is_some() || default_location.is_some();

    if let Some(executor) = executor {
        settings.verify.executor = executor;
    }
    if let Some(workers) = workers {
        settings.verify.max_workers = workers.max(1);
    }
    if let Some(secs) = busy_timeout {
        settings.catalog.busy_timeout_secs = secs;
    }
    if let Some(location) = default_location {
        settings.default_archive_location = Some(location);
    }
    if changed {
        settings.save(&session.settings_path)?;
    }

    println!("# {}", session.settings_path.display());
    print!("{}", serde_yaml::to_string(&session.settings)?);
    Ok(())
}

fn split_pair(pair: &str) -> Result<(&str, &str)> {
    let (key, value) = pair
        .split_once('=')
        .with_context(|| format!("Expected key=value, got '{}'", pair))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("Empty key in '{}'", pair);
    }
    Ok((key, value))
}

/// Parse `key=value` filters; values that parse as JSON keep their type
fn parse_filters(pairs: &[String]) -> Result<Filters> {
    let mut filters = Filters::new();
    for pair in pairs {
        let (key, raw) = split_pair(pair)?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        filters.insert(key.to_string(), value);
    }
    Ok(filters)
}

fn progress_printer() -> ProgressFn {
    Arc::new(|current: usize, total: usize, message: &str| {
        eprint!("\r\x1b[2K[{}/{}] {}", current, total, message);
        if current >= total {
            eprintln!();
        }
    })
}

/// Human-readable byte count
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
