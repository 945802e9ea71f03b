//! Manifest tooling for the Larder caching worker.

mod generator;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Json};
use generator::GeneratorConfig;
use larder_core::{Manifest, ManifestHash};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "larder")]
#[command(about = "Manifest tooling for the Larder caching worker")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a manifest from a config file and a built output directory
    Generate {
        /// Generator config file path
        #[arg(short, long, env = "LARDER_CONFIG", default_value = "larder.json")]
        config: PathBuf,

        /// Built application directory to hash
        #[arg(short, long)]
        dist: PathBuf,

        /// Where to write the manifest
        #[arg(short, long, default_value = "ngsw.json")]
        output: PathBuf,
    },
    /// Print the manifest hash of an existing manifest
    Hash {
        /// Manifest file path
        #[arg(short, long)]
        manifest: PathBuf,
    },
    /// Parse and validate a manifest
    Validate {
        /// Manifest file path
        #[arg(short, long)]
        manifest: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let Cli { command } = Cli::parse();

    match command {
        Commands::Generate {
            config,
            dist,
            output,
        } => {
            let config = load_config(&config)?;
            let manifest = generator::generate(&config, &dist)?;
            let (json, hash) = generator::serialize(&manifest)?;
            std::fs::write(&output, json)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("wrote {} ({hash})", output.display());
            Ok(())
        }
        Commands::Hash { manifest } => {
            let manifest = load_manifest(&manifest)?;
            println!("{}", ManifestHash::compute(&manifest)?);
            Ok(())
        }
        Commands::Validate { manifest } => {
            let path = manifest;
            let manifest = load_manifest(&path)?;
            manifest.validate().context("manifest is invalid")?;
            println!(
                "{} is valid ({} hashed urls, {} asset groups, {} data groups)",
                path.display(),
                manifest.hash_table.len(),
                manifest.asset_groups.len(),
                manifest.data_groups.len()
            );
            Ok(())
        }
    }
}

/// Load the generator config from a JSON file with `LARDER_` env overrides.
fn load_config(path: &Path) -> Result<GeneratorConfig> {
    Figment::new()
        .merge(Json::file(path))
        .merge(Env::prefixed("LARDER_").split("__"))
        .extract()
        .with_context(|| format!("failed to load config from {}", path.display()))
}

fn load_manifest(path: &Path) -> Result<Manifest> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not a valid manifest", path.display()))
}
