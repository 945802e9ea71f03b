//! Manifest schema and validation.
//!
//! A manifest describes one version of an application's cacheable surface:
//! which static assets exist (and their content hashes), which dynamic URL
//! patterns are cached with what policy, and how navigation requests map to
//! the application index.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A versioned description of an app's cacheable surface.
///
/// Field order and `BTreeMap` keys make the JSON serialization deterministic,
/// which the manifest hash depends on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Manifest format version.
    pub config_version: u32,

    /// Opaque application data carried alongside the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_data: Option<BTreeMap<String, String>>,

    /// URL of the application index, served for matching navigation requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    /// Static asset groups, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asset_groups: Vec<AssetGroupConfig>,

    /// Dynamic data groups, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_groups: Vec<DataGroupConfig>,

    /// Navigation URL patterns. A leading `!` marks an exclusion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub navigation_urls: Vec<String>,

    /// URL path -> SHA-1 hash of the canonical body.
    #[serde(default)]
    pub hash_table: BTreeMap<String, ContentHash>,
}

impl Manifest {
    /// Validate internal consistency.
    ///
    /// Every URL listed in an asset group must have a hash table entry, every
    /// pattern must compile, and data group bounds must be sane.
    pub fn validate(&self) -> crate::Result<()> {
        for group in &self.asset_groups {
            for url in &group.urls {
                if !self.hash_table.contains_key(url) {
                    return Err(crate::Error::InvalidManifest(format!(
                        "asset group {:?} lists {url} but the hash table has no entry for it",
                        group.name
                    )));
                }
            }
            compile_patterns(&group.name, &group.patterns)?;
        }
        for group in &self.data_groups {
            if group.max_size == 0 {
                return Err(crate::Error::InvalidManifest(format!(
                    "data group {:?} has maxSize 0",
                    group.name
                )));
            }
            compile_patterns(&group.name, &group.patterns)?;
        }
        Ok(())
    }
}

/// Compile a group's patterns, attributing failures to the group.
pub fn compile_patterns(group: &str, patterns: &[String]) -> crate::Result<Vec<regex::Regex>> {
    patterns
        .iter()
        .map(|p| {
            regex::Regex::new(p).map_err(|e| crate::Error::InvalidPattern {
                group: group.to_string(),
                pattern: p.clone(),
                source: Box::new(e),
            })
        })
        .collect()
}

/// How an asset group's listed URLs are brought into the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// All listed URLs are fetched and verified at version install time.
    Prefetch,
    /// Listed URLs are cached on first request.
    Lazy,
}

/// Configuration of one static asset group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetGroupConfig {
    /// Group name, unique within a manifest.
    pub name: String,

    /// Install mode. Accepts the short alias `mode`.
    #[serde(rename = "installMode", alias = "mode")]
    pub install_mode: InstallMode,

    /// Explicitly listed, hash-pinned URLs.
    #[serde(default)]
    pub urls: Vec<String>,

    /// Regex patterns for unhashed resources matched at request time.
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Configuration of one dynamic data group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataGroupConfig {
    /// Group name, unique within a manifest.
    pub name: String,

    /// Regex patterns selecting the URLs this group caches.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// LRU bound on the number of cached URLs.
    pub max_size: u32,

    /// Maximum age of a cached response in milliseconds.
    pub max_age: u64,

    /// Network timeout in milliseconds; a timeout yields a synthetic 504
    /// while the fetch continues in the background.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ManifestHash;

    fn sample_manifest() -> Manifest {
        let mut hash_table = BTreeMap::new();
        hash_table.insert(
            "/foo.txt".to_string(),
            ContentHash::compute(b"this is foo"),
        );
        Manifest {
            config_version: 1,
            app_data: None,
            index: Some("/index.html".to_string()),
            asset_groups: vec![AssetGroupConfig {
                name: "assets".to_string(),
                install_mode: InstallMode::Prefetch,
                urls: vec!["/foo.txt".to_string()],
                patterns: vec!["/unhashed/.*".to_string()],
            }],
            data_groups: vec![DataGroupConfig {
                name: "api".to_string(),
                patterns: vec!["^/api/.*$".to_string()],
                max_size: 3,
                max_age: 5000,
                timeout_ms: Some(1000),
            }],
            navigation_urls: vec!["^/.*$".to_string()],
            hash_table,
        }
    }

    #[test]
    fn test_validate_ok() {
        sample_manifest().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_url_missing_from_hash_table() {
        let mut manifest = sample_manifest();
        manifest.asset_groups[0].urls.push("/bar.txt".to_string());
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("/bar.txt"));
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let mut manifest = sample_manifest();
        manifest.data_groups[0].patterns.push("(".to_string());
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_max_size() {
        let mut manifest = sample_manifest();
        manifest.data_groups[0].max_size = 0;
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_hash_stable_across_json_roundtrip() {
        let manifest = sample_manifest();
        let json = serde_json::to_string(&manifest).unwrap();
        let reparsed: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(
            ManifestHash::compute(&manifest).unwrap(),
            ManifestHash::compute(&reparsed).unwrap()
        );
    }

    #[test]
    fn test_install_mode_accepts_mode_alias() {
        let json = r#"{"name":"a","mode":"lazy","urls":[],"patterns":[]}"#;
        let config: AssetGroupConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.install_mode, InstallMode::Lazy);
    }

    #[test]
    fn test_manifest_parses_wire_names() {
        let json = r#"{
            "configVersion": 1,
            "appData": {"build": "abc"},
            "assetGroups": [
                {"name": "app", "installMode": "prefetch", "urls": ["/foo.txt"], "patterns": []}
            ],
            "hashTable": {"/foo.txt": "60eaad68490578f099fc5f29fbab9029561198e5"}
        }"#;
        let manifest: Manifest = serde_json::from_str(json).unwrap();
        manifest.validate().unwrap();
        assert_eq!(manifest.asset_groups[0].install_mode, InstallMode::Prefetch);
        assert_eq!(
            manifest.hash_table["/foo.txt"].to_hex(),
            "60eaad68490578f099fc5f29fbab9029561198e5"
        );
    }
}
