//! adwatch CLI
//!
//! Local execution entry point: polls the configured searches until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use adwatch::{
    error::{AppError, Result},
    models::{Config, LoggingConfig},
    notify::build_notifier,
    pipeline::{Orchestrator, RunControl, run_forever},
    utils::redact::redacted_config,
};
use clap::{Parser, Subcommand};

/// adwatch - classifieds search watcher
#[derive(Parser, Debug)]
#[command(
    name = "adwatch",
    version,
    about = "Polls classifieds searches and delivers new listings"
)]
struct Cli {
    /// Path to the TOML config file [default: config.toml]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every configured URL until interrupted
    Run {
        /// Make a single pass and exit
        #[arg(long)]
        once: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Send a test message through every notification channel
    CheckNotify,
}

/// Initialize logging; `RUST_LOG` still wins over both.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Cancel the run on the first Ctrl-C.
fn install_ctrl_c(control: RunControl) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Interrupt received, finishing current step...");
                control.cancel();
            }
            Err(e) => log::warn!("Ctrl-C handler unavailable: {}", e),
        }
    });
}

const DEFAULT_CONFIG: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // An explicit --config must exist; the default one may be absent.
    let path = cli.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let loaded = match &cli.config {
        Some(path) => Config::load(path).map(Some),
        None => Config::load_optional(&path),
    };

    let level = match &loaded {
        Ok(Some(config)) => config.logging.level.clone(),
        _ => LoggingConfig::default().level,
    };
    init_logging(cli.verbose, &level);

    let mut config = match loaded {
        Ok(Some(config)) => config,
        Ok(None) => {
            log::warn!("{} not found, using defaults", path.display());
            Config::default()
        }
        Err(e) => {
            log::error!("Cannot load {}: {}", path.display(), e);
            return Err(e);
        }
    };

    log::info!("adwatch starting with {}", path.display());

    match cli.command {
        Command::Run { once } => {
            if once {
                config.run.one_time_start = true;
            }
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("Effective configuration:\n{}", redacted_config(&config)?);

            let control = RunControl::new();
            install_ctrl_c(control.clone());

            let mut orchestrator = Orchestrator::from_config(Arc::new(config), control).await?;
            let finished = run_forever(&mut orchestrator).await?;
            log::info!("Stopped after {} runs", finished);
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK ({} URLs)", config.run.urls.len());
            log::info!("{}", redacted_config(&config)?);
        }

        Command::CheckNotify => {
            let dispatcher = build_notifier(&config.notify, &config.run.base_url)?;
            if dispatcher.is_empty() {
                return Err(AppError::config("No notification channels configured"));
            }

            let report = dispatcher.notify_message("adwatch: test message").await;
            for name in dispatcher.channel_names() {
                log::info!("Channel: {}", name);
            }
            if report.failed > 0 {
                return Err(AppError::notify(
                    "check-notify",
                    format!("{} of {} channels failed", report.failed, report.attempted),
                ));
            }
            log::info!("✓ All {} channels delivered", report.attempted);
        }
    }

    Ok(())
}
