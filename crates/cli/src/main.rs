//! Publisher CLI for the boring registry.

use anyhow::{Context, Result};
use boring_cli::{
    Exclusions, ModuleOptions, ModulePublisher, ProviderOptions, ProviderPublisher, PublishSummary,
};
use boring_core::VersionConstraints;
use boring_core::config::AppConfig;
use boring_storage::{MigrationKind, RegistryStorage};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "boring-registry")]
#[command(about = "Publish modules and providers to a boring registry")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "BORING_REGISTRY_CONFIG",
        default_value = "config/registry.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload modules or provider releases
    Upload {
        #[command(subcommand)]
        command: UploadCommands,
    },
    /// Move objects stored under the legacy root-level layout
    Migrate {
        #[arg(value_enum)]
        kind: MigrateKind,
        /// Report what would be migrated without changing anything
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum UploadCommands {
    /// Archive and upload every module below a directory
    Module {
        /// Directory to search for boring-registry.hcl files
        dir: PathBuf,
        /// Version for modules whose metadata does not set one
        #[arg(long)]
        version: Option<String>,
        /// Skip modules that are already published instead of failing
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        ignore_existing: bool,
        /// Only upload versions matching these constraints (e.g. ">= 1.0, < 2.0")
        #[arg(long)]
        version_constraints_semver: Option<String>,
        /// Only upload versions matching this regular expression
        #[arg(long)]
        version_constraints_regex: Option<String>,
        /// Leave matching paths out of the archive (repeatable)
        #[arg(long = "exclude", value_name = "GLOB")]
        exclude: Vec<String>,
        /// Search subdirectories for modules
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        recursive: bool,
    },
    /// Validate and upload a signed provider release
    Provider {
        /// Directory holding the release files
        dir: PathBuf,
        /// Namespace to publish under
        #[arg(long)]
        namespace: String,
        /// Publish into the mirror tree of this upstream registry host
        #[arg(long)]
        mirror_hostname: Option<String>,
        /// Skip files that are already published instead of failing
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        ignore_existing: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MigrateKind {
    Modules,
    Providers,
}

impl From<MigrateKind> for MigrationKind {
    fn from(kind: MigrateKind) -> Self {
        match kind {
            MigrateKind::Modules => Self::Modules,
            MigrateKind::Providers => Self::Providers,
        }
    }
}

fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if Path::new(path).exists() {
        figment = figment.merge(Toml::file(path));
    }
    figment
        .merge(Env::prefixed("BORING_REGISTRY_").split("__"))
        .extract()
        .context("failed to load configuration")
}

fn init_tracing(config: &AppConfig) {
    let default_filter = config
        .logging
        .filter
        .clone()
        .unwrap_or_else(|| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    if config.logging.json {
        registry.with(layer.json()).init();
    } else {
        registry.with(layer).init();
    }
}

async fn open_registry(config: &AppConfig) -> Result<RegistryStorage> {
    config
        .storage
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid storage configuration")?;
    let store = boring_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    Ok(RegistryStorage::new(store, &config.registry))
}

fn print_summary(summary: &PublishSummary) {
    for item in &summary.uploaded {
        println!("uploaded {item}");
    }
    for item in &summary.skipped {
        println!("skipped  {item}");
    }
}

async fn handle_upload_command(command: UploadCommands, registry: RegistryStorage) -> Result<()> {
    match command {
        UploadCommands::Module {
            dir,
            version,
            ignore_existing,
            version_constraints_semver,
            version_constraints_regex,
            exclude,
            recursive,
        } => {
            let constraints = version_constraints_semver
                .as_deref()
                .map(VersionConstraints::parse)
                .transpose()
                .context("invalid --version-constraints-semver")?;
            let version_regex = version_constraints_regex
                .as_deref()
                .map(Regex::new)
                .transpose()
                .context("invalid --version-constraints-regex")?;
            let options = ModuleOptions {
                version,
                ignore_existing,
                constraints,
                version_regex,
                exclusions: Exclusions::new(&exclude)?,
                recursive,
            };

            let summary = ModulePublisher::new(registry, options)
                .publish_dir(&dir)
                .await
                .with_context(|| format!("failed to publish modules from {}", dir.display()))?;
            print_summary(&summary);
        }
        UploadCommands::Provider {
            dir,
            namespace,
            mirror_hostname,
            ignore_existing,
        } => {
            let options = ProviderOptions {
                namespace,
                mirror_hostname,
                ignore_existing,
            };
            let summary = ProviderPublisher::new(registry, options)
                .publish_dir(&dir)
                .await
                .with_context(|| format!("failed to publish provider from {}", dir.display()))?;
            print_summary(&summary);
        }
    }
    Ok(())
}

async fn handle_migrate_command(
    kind: MigrateKind,
    dry_run: bool,
    registry: RegistryStorage,
) -> Result<()> {
    let report = registry
        .migrate(kind.into(), dry_run)
        .await
        .context("migration failed")?;

    let verb = if report.dry_run {
        "would migrate"
    } else {
        "migrated"
    };
    for (from, to) in &report.migrated {
        println!("{verb} {from} -> {to}");
    }
    for key in &report.skipped {
        println!("skipped {key}");
    }
    for (key, reason) in &report.failed {
        eprintln!("failed {key}: {reason}");
    }
    println!(
        "{} migrated, {} skipped, {} failed",
        report.migrated.len(),
        report.skipped.len(),
        report.failed.len()
    );

    if !report.is_success() {
        anyhow::bail!("{} objects could not be migrated", report.failed.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { config, command } = Cli::parse();

    let config = load_config(&config)?;
    init_tracing(&config);
    let registry = open_registry(&config).await?;

    match command {
        Commands::Upload { command } => handle_upload_command(command, registry).await,
        Commands::Migrate { kind, dry_run } => {
            handle_migrate_command(kind, dry_run, registry).await
        }
    }
}
