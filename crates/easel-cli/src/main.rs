//! Easel CLI
//!
//! Command-line interface for working on Easel packages without the GUI:
//! load a package with its dependencies to check it, or run its build step.

use clap::{Parser, Subcommand};
use easel_core::events::StdoutEventSink;
use easel_core::AppConfig;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod host;

/// Easel - editor shell package tool
#[derive(Parser, Debug)]
#[command(name = "easel")]
#[command(version, about, long_about = None)]
struct Args {
    /// Debug logging and rebuild packages on every load
    #[arg(long, global = true)]
    dev: bool,

    /// UI language code
    #[arg(long, global = true, env = "EASEL_LANG")]
    lang: Option<String>,

    /// Configuration file (JSON)
    #[arg(long, global = true, env = "EASEL_CONFIG")]
    config: Option<PathBuf>,

    /// Extra directory to scan for packages (repeatable)
    #[arg(long = "search-path", global = true)]
    search_paths: Vec<PathBuf>,

    /// Output format for broadcast events: text or json
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a package and its dependencies, then unload them
    Test {
        /// Package directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Run the build step of a package
    Build {
        /// Package directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn load_config(args: &Args, package: &Path) -> easel_core::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    if let Some(lang) = &args.lang {
        config = config.with_lang(lang);
    }
    if args.dev {
        config.packages.force_build = true;
    }
    for path in &args.search_paths {
        config = config.with_search_path(path);
    }
    // Sibling packages can satisfy dependencies
    if let Some(parent) = package
        .canonicalize()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    {
        config = config.with_search_path(parent);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.dev { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let package = match &args.command {
        Commands::Test { path } | Commands::Build { path } => path.clone(),
    };

    let config = match load_config(&args, &package) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let json_output = matches!(args.format, OutputFormat::Json);
    let session = commands::Session::start(config, StdoutEventSink::new(json_output)).await;

    let result = match &args.command {
        Commands::Test { path } => commands::run_test(&session, path).await,
        Commands::Build { path } => commands::run_build(&session, path).await,
    };
    session.finish().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
