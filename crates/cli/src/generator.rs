//! Manifest generation from a build output directory.
//!
//! The generator walks a built application directory, expands each asset
//! group's file globs, hashes every matched file, and emits the manifest the
//! worker consumes. Data groups, runtime patterns, and navigation URLs pass
//! through verbatim.

use anyhow::{Context, Result, bail};
use larder_core::{
    AssetGroupConfig, ContentHash, DataGroupConfig, InstallMode, Manifest, ManifestHash,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Generator configuration, usually loaded from `larder.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorConfig {
    /// Opaque application data copied into the manifest.
    pub app_data: Option<BTreeMap<String, String>>,
    /// URL of the application index (e.g. `/index.html`).
    pub index: Option<String>,
    /// Asset groups with file globs to hash.
    pub asset_groups: Vec<AssetGroupSpec>,
    /// Data groups, copied into the manifest verbatim.
    pub data_groups: Vec<DataGroupConfig>,
    /// Navigation URL regexes, copied verbatim; a leading `!` excludes.
    pub navigation_urls: Vec<String>,
}

/// One asset group as configured: globs select files under the dist root.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetGroupSpec {
    pub name: String,
    #[serde(
        rename = "installMode",
        alias = "mode",
        default = "default_install_mode"
    )]
    pub install_mode: InstallMode,
    /// Glob patterns (relative to the dist root) of files to hash-pin.
    #[serde(default)]
    pub files: Vec<String>,
    /// Runtime regex patterns for unhashed resources, copied verbatim.
    #[serde(default)]
    pub patterns: Vec<String>,
}

fn default_install_mode() -> InstallMode {
    InstallMode::Prefetch
}

/// The manifest format version this generator emits.
const CONFIG_VERSION: u32 = 1;

/// Build a manifest from `config`, hashing files under `dist`.
pub fn generate(config: &GeneratorConfig, dist: &Path) -> Result<Manifest> {
    if !dist.is_dir() {
        bail!("dist directory {} does not exist", dist.display());
    }
    let mut hash_table = BTreeMap::new();
    let mut asset_groups = Vec::with_capacity(config.asset_groups.len());

    for spec in &config.asset_groups {
        let mut urls = Vec::new();
        for pattern in &spec.files {
            for url in expand_glob(dist, pattern, &mut hash_table)
                .with_context(|| format!("asset group {:?}, glob {pattern:?}", spec.name))?
            {
                urls.push(url);
            }
        }
        urls.sort();
        urls.dedup();
        debug!(group = %spec.name, files = urls.len(), "collected asset group");

        asset_groups.push(AssetGroupConfig {
            name: spec.name.clone(),
            install_mode: spec.install_mode,
            urls,
            patterns: spec.patterns.clone(),
        });
    }

    let manifest = Manifest {
        config_version: CONFIG_VERSION,
        app_data: config.app_data.clone(),
        index: config.index.clone(),
        asset_groups,
        data_groups: config.data_groups.clone(),
        navigation_urls: config.navigation_urls.clone(),
        hash_table,
    };
    manifest.validate().context("generated manifest is invalid")?;
    Ok(manifest)
}

/// Expand one glob under the dist root, hashing each matched file and
/// returning its URLs.
fn expand_glob(
    dist: &Path,
    pattern: &str,
    hash_table: &mut BTreeMap<String, ContentHash>,
) -> Result<Vec<String>> {
    let absolute = dist.join(pattern.trim_start_matches('/'));
    let pattern_str = absolute.to_string_lossy();
    let entries = glob::glob(&pattern_str).context("invalid glob pattern")?;

    let mut urls = Vec::new();
    for entry in entries {
        let path = entry.context("failed to read glob match")?;
        if !path.is_file() {
            continue;
        }
        let rel = path
            .strip_prefix(dist)
            .context("glob match escaped the dist root")?;
        let url = format!("/{}", rel.to_string_lossy().replace('\\', "/"));
        let bytes = std::fs::read(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        hash_table.insert(url.clone(), ContentHash::compute(&bytes));
        urls.push(url);
    }
    Ok(urls)
}

/// Serialize a manifest the way the worker hashes it, and its hash.
pub fn serialize(manifest: &Manifest) -> Result<(String, ManifestHash)> {
    let json = serde_json::to_string(manifest)?;
    let hash = ManifestHash::compute(manifest)?;
    Ok((json, hash))
}
