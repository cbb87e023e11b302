use anyhow::Result;
use clap::{Parser, Subcommand};
use package_registry::{
    ConfigScanner, FileGraph, Registry, RegistrySettings, StandardFetcher, write_bundle,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pkgreg")]
#[command(about = "Load, scan and bundle dotted-name packages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load packages and print their values as JSON
    Get {
        /// Package names, e.g. app.main or app.plugins.*
        #[arg(required = true)]
        names: Vec<String>,

        /// Directory that package paths are relative to
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Registry settings file (.toml)
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Print the load order after the values
        #[arg(long)]
        order: bool,
    },
    /// Scan package sources and print the consolidated configuration
    Scan {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Write the configuration here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Concatenate package sources into a self-contained bundle
    Bundle {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(long, short)]
        output: PathBuf,

        /// Also export the file dependency graph to a DOT file
        #[arg(long)]
        dot: Option<PathBuf>,

        /// Print the dependency graph without writing the bundle
        #[arg(long, short)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Get {
            names,
            root,
            settings,
            order,
        } => get(names, root, settings, order).await,
        Commands::Scan { files, output } => scan(files, output),
        Commands::Bundle {
            files,
            output,
            dot,
            dry_run,
        } => bundle(files, output, dot, dry_run),
    }
}

async fn get(
    names: Vec<String>,
    root: PathBuf,
    settings: Option<PathBuf>,
    order: bool,
) -> Result<()> {
    let settings = match settings {
        Some(path) => RegistrySettings::from_file(&path)?,
        None => RegistrySettings::default(),
    };
    let registry = Registry::builder()
        .with_settings(settings)
        .with_fetcher(Arc::new(StandardFetcher::new(root)))
        .build()?;

    let pending: Vec<_> = names
        .iter()
        .map(|name| (name, tokio::spawn(registry.get(name))))
        .collect();
    for (name, handle) in pending {
        let value = handle
            .await
            .map_err(|e| anyhow::anyhow!("Load of '{name}' panicked: {e}"))??;
        println!("{name} = {}", serde_json::to_string_pretty(&value)?);
    }

    if order {
        println!("--- Load order ---");
        for (name, seq) in registry.load_order() {
            println!("{seq:>4} {name}");
        }
    }
    Ok(())
}

fn scan(files: Vec<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let mut scanner = ConfigScanner::new();
    for path in &files {
        scanner.scan_file(path)?;
    }
    let config = scanner.to_toml()?;
    match output {
        Some(path) => {
            std::fs::write(&path, config)
                .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;
            println!("Configuration written to {}", path.display());
        }
        None => print!("{config}"),
    }
    Ok(())
}

fn bundle(files: Vec<PathBuf>, output: PathBuf, dot: Option<PathBuf>, dry_run: bool) -> Result<()> {
    println!("Scanning package sources: {files:?}...");
    let mut builder = FileGraph::builder();
    for path in &files {
        builder = builder.load_file(path);
    }
    let graph = builder.build()?;

    if let Some(path) = dot {
        graph.write_dot_file(&path)?;
        println!("Graph exported to {}", path.display());
    }
    if dry_run {
        println!("--- Package File Graph (Dry Run) ---");
        println!("{graph:#?}");
        return Ok(());
    }

    let text = write_bundle(&graph)?;
    std::fs::write(&output, text)
        .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", output.display()))?;
    println!("Bundle written to {}", output.display());
    Ok(())
}
