//! Generator tests against a synthetic dist directory.

#[path = "../src/generator.rs"]
mod generator;

use generator::{AssetGroupSpec, GeneratorConfig, generate};
use larder_core::{DataGroupConfig, InstallMode, ManifestHash};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_file(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn dist_fixture() -> TempDir {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "foo.txt", "this is foo");
    write_file(temp.path(), "bar.txt", "this is bar");
    write_file(temp.path(), "assets/styles/app.css", "body {}");
    write_file(temp.path(), "assets/notes.md", "notes");
    temp
}

fn prefetch_group(name: &str, files: &[&str]) -> AssetGroupSpec {
    AssetGroupSpec {
        name: name.to_string(),
        install_mode: InstallMode::Prefetch,
        files: files.iter().map(|s| s.to_string()).collect(),
        patterns: Vec::new(),
    }
}

#[test]
fn generates_hash_table_for_matched_files() {
    let dist = dist_fixture();
    let config = GeneratorConfig {
        asset_groups: vec![prefetch_group("app", &["*.txt", "assets/**/*.css"])],
        ..GeneratorConfig::default()
    };

    let manifest = generate(&config, dist.path()).unwrap();

    let group = &manifest.asset_groups[0];
    assert_eq!(
        group.urls,
        vec!["/assets/styles/app.css", "/bar.txt", "/foo.txt"]
    );
    // Hashes are the SHA-1 of each file body.
    assert_eq!(
        manifest.hash_table["/foo.txt"].to_hex(),
        "60eaad68490578f099fc5f29fbab9029561198e5"
    );
    assert_eq!(
        manifest.hash_table["/bar.txt"].to_hex(),
        "806728f36f746ae135d9ad867de260c481e1bf01"
    );
    // Unmatched files are not listed.
    assert!(!manifest.hash_table.contains_key("/assets/notes.md"));
}

#[test]
fn every_listed_url_has_a_hash_entry() {
    let dist = dist_fixture();
    let config = GeneratorConfig {
        asset_groups: vec![
            prefetch_group("app", &["*.txt"]),
            AssetGroupSpec {
                name: "other".to_string(),
                install_mode: InstallMode::Lazy,
                files: vec!["assets/**/*".to_string()],
                patterns: vec!["/unhashed/.*".to_string()],
            },
        ],
        ..GeneratorConfig::default()
    };

    let manifest = generate(&config, dist.path()).unwrap();
    manifest.validate().unwrap();
    for group in &manifest.asset_groups {
        for url in &group.urls {
            assert!(manifest.hash_table.contains_key(url), "missing hash for {url}");
        }
    }
    assert_eq!(manifest.asset_groups[1].install_mode, InstallMode::Lazy);
    assert_eq!(manifest.asset_groups[1].patterns, vec!["/unhashed/.*"]);
}

#[test]
fn generation_is_deterministic() {
    let dist = dist_fixture();
    let config = GeneratorConfig {
        index: Some("/index.html".to_string()),
        asset_groups: vec![prefetch_group("app", &["**/*.txt"])],
        data_groups: vec![DataGroupConfig {
            name: "api".to_string(),
            patterns: vec!["^/api/.*$".to_string()],
            max_size: 100,
            max_age: 3_600_000,
            timeout_ms: Some(5_000),
        }],
        ..GeneratorConfig::default()
    };
    write_file(dist.path(), "index.html", "<html></html>");

    let first = generate(&config, dist.path()).unwrap();
    let second = generate(&config, dist.path()).unwrap();
    assert_eq!(
        ManifestHash::compute(&first).unwrap(),
        ManifestHash::compute(&second).unwrap()
    );
}

#[test]
fn changed_file_changes_the_manifest_hash() {
    let dist = dist_fixture();
    let config = GeneratorConfig {
        asset_groups: vec![prefetch_group("app", &["*.txt"])],
        ..GeneratorConfig::default()
    };

    let before = generate(&config, dist.path()).unwrap();
    write_file(dist.path(), "foo.txt", "this is foo v2");
    let after = generate(&config, dist.path()).unwrap();

    assert_ne!(
        ManifestHash::compute(&before).unwrap(),
        ManifestHash::compute(&after).unwrap()
    );
    assert_eq!(
        after.hash_table["/foo.txt"].to_hex(),
        "944099ed68aa6b8be4f36114cca4136057e54889"
    );
}

#[test]
fn rejects_missing_dist_directory() {
    let config = GeneratorConfig::default();
    let err = generate(&config, Path::new("/nonexistent/dist")).unwrap_err();
    assert!(err.to_string().contains("does not exist"));
}

#[test]
fn rejects_invalid_runtime_pattern() {
    let dist = dist_fixture();
    let config = GeneratorConfig {
        asset_groups: vec![AssetGroupSpec {
            name: "app".to_string(),
            install_mode: InstallMode::Prefetch,
            files: Vec::new(),
            patterns: vec!["(".to_string()],
        }],
        ..GeneratorConfig::default()
    };
    assert!(generate(&config, dist.path()).is_err());
}

#[test]
fn manifest_json_roundtrips_to_the_same_hash() {
    let dist = dist_fixture();
    let config = GeneratorConfig {
        asset_groups: vec![prefetch_group("app", &["*.txt"])],
        ..GeneratorConfig::default()
    };

    let manifest = generate(&config, dist.path()).unwrap();
    let (json, hash) = generator::serialize(&manifest).unwrap();
    let reparsed: larder_core::Manifest = serde_json::from_str(&json).unwrap();
    assert_eq!(ManifestHash::compute(&reparsed).unwrap(), hash);
}
