//! Kiln - layer-cached valkey image builds
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use kiln::cli::{Cli, Commands};
use kiln::config::ConfigManager;
use kiln::error::KilnResult;
use kiln::ui::UiContext;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8, json: bool) {
    // 0 = warn, 1 = info, 2+ = debug; RUST_LOG wins when set
    let default = match verbose {
        0 => "kiln=warn",
        1 => "kiln=info",
        _ => "kiln=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run() -> KilnResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    // Key derivation is pure and needs no spec
    if let Commands::Key(args) = cli.command {
        return kiln::cli::commands::key(args).await;
    }

    let config_manager = match cli.spec {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let ctx = UiContext::detect();

    match cli.command {
        Commands::Key(_) => unreachable!("Key handled above"),
        Commands::Prune(args) => {
            // A spec only contributes the buildah path here
            let spec = if config_manager.path().exists() {
                Some(config_manager.load().await?)
            } else {
                debug!(
                    "No build spec at {}, using default buildah",
                    config_manager.path().display()
                );
                None
            };
            kiln::cli::commands::prune(args, spec.as_ref(), &ctx).await
        }
        Commands::Core(args) => {
            let spec = config_manager.load().await?;
            kiln::cli::commands::core(args, &spec, &ctx).await
        }
        Commands::Runtime(args) => {
            let spec = config_manager.load().await?;
            kiln::cli::commands::runtime(args, &spec, &ctx).await
        }
        Commands::Module(args) => {
            let spec = config_manager.load().await?;
            kiln::cli::commands::module(args, &spec, &ctx).await
        }
    }
}
