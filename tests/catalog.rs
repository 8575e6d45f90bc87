//! Catalog Integration Tests
//!
//! Rebuilding the catalog from sidecars, paging, duplicates and concurrent
//! ingestion into one folder.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::thread;

use archivist::catalog::{Catalog, SearchQuery, SortOrder};
use archivist::core::Organizer;
use archivist::domain::{Archive, Metadata, MetadataValue};
use serde_json::json;
use tempfile::TempDir;

fn new_archive(temp: &TempDir) -> Archive {
    Archive::create(temp.path().join("archive"), "Catalog Tests", "").unwrap()
}

fn write_source(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_catalog_rebuilds_from_sidecars() {
    let temp = TempDir::new().unwrap();
    let archive = new_archive(&temp);
    let catalog = Catalog::open(&archive).unwrap();
    let organizer = Organizer::new(&archive);
    let src = temp.path().join("src");

    for i in 0..5 {
        let file = write_source(&src, &format!("doc{}.txt", i), &format!("document {}", i));
        let mut meta = Metadata::new();
        meta.insert("rank".to_string(), MetadataValue::from(i as i64));
        meta.insert("reviewed".to_string(), MetadataValue::from(i % 2 == 0));
        meta.insert("tags".to_string(), MetadataValue::from(vec!["report", "2024"]));
        let asset = organizer.ingest_file(&file, None, Some(meta), Some("docs")).unwrap();
        assert!(catalog.index(&asset));
    }

    let everything = SearchQuery::everything();
    let before = catalog.search(&everything).unwrap();

    // Lose the whole index directory
    fs::remove_dir_all(archive.index_dir()).unwrap();

    let rebuilt = Catalog::open(&archive).unwrap();
    assert_eq!(rebuilt.count().unwrap(), 0);
    let (success, errors) = rebuilt.index_all(false).unwrap();
    assert_eq!((success, errors), (5, 0));

    let after = rebuilt.search(&everything).unwrap();
    assert_eq!(after.total, before.total);
    for (a, b) in before.results.iter().zip(after.results.iter()) {
        assert_eq!(a.asset, b.asset);
    }

    let ranked = rebuilt
        .search(&SearchQuery::everything().with_filter("rank", 3))
        .unwrap();
    assert_eq!(ranked.total, 1);
    assert_eq!(
        ranked.results[0].asset.custom_metadata["reviewed"],
        MetadataValue::Bool(false)
    );
}

#[test]
fn test_index_all_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let archive = new_archive(&temp);
    let catalog = Catalog::open(&archive).unwrap();
    let organizer = Organizer::new(&archive);
    let src = temp.path().join("src");

    for i in 0..3 {
        let file = write_source(&src, &format!("f{}.txt", i), "x");
        organizer.ingest_file(&file, None, None, None).unwrap();
    }

    assert_eq!(catalog.index_all(false).unwrap(), (3, 0));
    assert_eq!(catalog.index_all(false).unwrap(), (3, 0));
    assert_eq!(catalog.index_all(true).unwrap(), (3, 0));
    assert_eq!(catalog.count().unwrap(), 3);
}

#[test]
fn test_pages_cover_every_asset_once() {
    let temp = TempDir::new().unwrap();
    let archive = new_archive(&temp);
    let catalog = Catalog::open(&archive).unwrap();
    let organizer = Organizer::new(&archive);
    let src = temp.path().join("src");

    let mut assets = Vec::new();
    for i in 0..10 {
        // Same size for every file so the sort key ties
        let file = write_source(&src, &format!("p{:02}.txt", i), "same");
        assets.push(organizer.ingest_file(&file, None, None, Some("paged")).unwrap());
    }
    assert!(catalog.index_batch(&assets));

    let mut seen = Vec::new();
    let mut offset = 0;
    loop {
        let query = SearchQuery::new()
            .sort("file_size", SortOrder::Asc)
            .page(3, offset);
        let page = catalog.search(&query).unwrap();
        assert_eq!(page.total, 10);
        if page.results.is_empty() {
            break;
        }
        seen.extend(page.results.iter().map(|r| r.asset_id().to_string()));
        offset += 3;
    }

    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(seen.len(), 10);
    assert_eq!(unique.len(), 10);
}

#[test]
fn test_duplicates_grouped_by_digest() {
    let temp = TempDir::new().unwrap();
    let archive = new_archive(&temp);
    let catalog = Catalog::open(&archive).unwrap();
    let organizer = Organizer::new(&archive);

    let a = write_source(&temp.path().join("one"), "a.txt", "identical bytes");
    let b = write_source(&temp.path().join("two"), "b.txt", "identical bytes");
    let c = write_source(&temp.path().join("two"), "c.txt", "different bytes");
    for file in [&a, &b, &c] {
        let asset = organizer.ingest_file(file, None, None, None).unwrap();
        assert!(catalog.index(&asset));
    }

    let groups = catalog.search_duplicates().unwrap();
    assert_eq!(groups.len(), 1);
    let (digest, members) = &groups[0];
    assert_eq!(members.len(), 2);
    assert!(members.iter().all(|m| &m.asset.checksum_sha256 == digest));

    let found = catalog.search_by_digest(digest).unwrap().unwrap();
    assert_eq!(&found.asset.checksum_sha256, digest);
}

#[test]
fn test_concurrent_ingest_never_shares_a_name() {
    let temp = TempDir::new().unwrap();
    let archive = new_archive(&temp);
    let src = temp.path().join("src");
    let file = write_source(&src, "same.txt", "content");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let archive = archive.clone();
            let file = file.clone();
            thread::spawn(move || {
                Organizer::new(&archive)
                    .ingest_file(&file, None, None, Some("shared"))
                    .unwrap()
                    .archive_path()
            })
        })
        .collect();

    let paths: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(paths.len(), 8);
    assert!(paths.contains("assets/shared/same.txt"));
    assert_eq!(archive.asset_count(), 8);
}

#[test]
fn test_filter_semantics() {
    let temp = TempDir::new().unwrap();
    let archive = new_archive(&temp);
    let catalog = Catalog::open(&archive).unwrap();
    let organizer = Organizer::new(&archive);
    let src = temp.path().join("src");

    let tag_sets: [&[&str]; 3] = [&["alpha", "beta"], &["beta"], &[]];
    for (i, tags) in tag_sets.iter().enumerate() {
        let file = write_source(&src, &format!("t{}.txt", i), &"y".repeat(i + 1));
        let mut meta = Metadata::new();
        if !tags.is_empty() {
            meta.insert("tags".to_string(), MetadataValue::from(tags.to_vec()));
        }
        let asset = organizer.ingest_file(&file, None, Some(meta), None).unwrap();
        assert!(catalog.index(&asset));
    }

    let count = |key: &str, value: serde_json::Value| {
        catalog
            .search(&SearchQuery::everything().with_filter(key, value))
            .unwrap()
            .total
    };

    assert_eq!(count("tags", json!("beta")), 2);
    assert_eq!(count("tags", json!(["alpha", "beta"])), 1);
    assert_eq!(count("tags", json!(null)), 1);
    assert_eq!(count("file_size_min", json!(2)), 2);
    assert_eq!(count("file_size_max", json!(1)), 1);
    assert_eq!(count("mime_type", json!("text/plain")), 3);
}

#[test]
fn test_scalar_filters_respect_stored_kind() {
    let temp = TempDir::new().unwrap();
    let archive = new_archive(&temp);
    let catalog = Catalog::open(&archive).unwrap();
    let organizer = Organizer::new(&archive);
    let src = temp.path().join("src");

    let file = write_source(&src, "ranked.txt", "ranked");
    let mut meta = Metadata::new();
    meta.insert("rank".to_string(), MetadataValue::from(3_i64));
    meta.insert("code".to_string(), MetadataValue::from("3"));
    meta.insert("reviewed".to_string(), MetadataValue::from(true));
    let asset = organizer.ingest_file(&file, None, Some(meta), None).unwrap();
    assert!(catalog.index(&asset));

    let count = |key: &str, value: serde_json::Value| {
        catalog
            .search(&SearchQuery::everything().with_filter(key, value))
            .unwrap()
            .total
    };

    assert_eq!(count("rank", json!(3)), 1);
    assert_eq!(count("rank", json!(3.0)), 1);
    assert_eq!(count("rank", json!("3")), 0);
    assert_eq!(count("rank", json!(4)), 0);
    assert_eq!(count("code", json!("3")), 1);
    assert_eq!(count("code", json!(3)), 0);
    assert_eq!(count("reviewed", json!(true)), 1);
    assert_eq!(count("reviewed", json!(1)), 0);
}
