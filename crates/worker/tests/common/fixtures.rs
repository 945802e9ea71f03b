//! Manifest and server fixtures shared across the scenario tests.

use super::mocks::{MockAdapter, MockServer};
use larder_core::{
    AssetGroupConfig, ContentHash, DataGroupConfig, InstallMode, Manifest, ManifestHash,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Bodies served for version 1 of the fixture app.
pub const FILES_V1: &[(&str, &str)] = &[
    ("/foo.txt", "this is foo"),
    ("/bar.txt", "this is bar"),
    ("/baz.txt", "this is baz"),
    ("/qux.txt", "this is qux"),
];

/// Version 2 changes `/foo.txt` and `/baz.txt`; the rest is untouched and
/// eligible for cross-version reuse.
pub const FILES_V2: &[(&str, &str)] = &[
    ("/foo.txt", "this is foo v2"),
    ("/bar.txt", "this is bar"),
    ("/baz.txt", "this is baz v2"),
    ("/qux.txt", "this is qux"),
];

/// The standard fixture manifest: a prefetch group with two hash-pinned
/// files and an unhashed pattern, a lazy group with two files, and one data
/// group.
pub fn manifest_for(files: &[(&str, &str)]) -> Manifest {
    let mut hash_table = BTreeMap::new();
    for (url, body) in files {
        hash_table.insert(url.to_string(), ContentHash::compute(body.as_bytes()));
    }
    Manifest {
        config_version: 1,
        app_data: None,
        index: None,
        asset_groups: vec![
            AssetGroupConfig {
                name: "assets".to_string(),
                install_mode: InstallMode::Prefetch,
                urls: vec!["/foo.txt".to_string(), "/bar.txt".to_string()],
                patterns: vec!["/unhashed/.*".to_string()],
            },
            AssetGroupConfig {
                name: "other".to_string(),
                install_mode: InstallMode::Lazy,
                urls: vec!["/baz.txt".to_string(), "/qux.txt".to_string()],
                patterns: vec![],
            },
        ],
        data_groups: vec![DataGroupConfig {
            name: "api".to_string(),
            patterns: vec!["^/api/.*$".to_string()],
            max_size: 3,
            max_age: 5000,
            timeout_ms: None,
        }],
        navigation_urls: vec![],
        hash_table,
    }
}

pub fn manifest_v1() -> Manifest {
    manifest_for(FILES_V1)
}

pub fn manifest_v2() -> Manifest {
    manifest_for(FILES_V2)
}

pub fn hash_of(manifest: &Manifest) -> String {
    ManifestHash::compute(manifest).expect("manifest hashes").to_hex()
}

/// Point the server at a manifest and the bodies backing it.
pub fn install_app(server: &Arc<MockServer>, manifest: &Manifest, files: &[(&str, &str)]) {
    server.serve_manifest(manifest);
    for (url, body) in files {
        server.serve(url, body);
    }
}

/// A server freshly scripted with version 1 of the fixture app.
pub fn server_v1(adapter: &Arc<MockAdapter>) -> Arc<MockServer> {
    let server = MockServer::new(adapter.clone());
    install_app(&server, &manifest_v1(), FILES_V1);
    server
}
