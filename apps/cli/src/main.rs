//! VNC Repeater CLI
//!
//! Runs the repeater and manages its settings file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use vncrepeater_daemon::{Repeater, RepeaterConfig};
use vncrepeater_settings::{default_settings_path, Settings};

/// VNC Repeater - pairs VNC servers and viewers that cannot reach each other
#[derive(Parser)]
#[command(name = "vncrepeater")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to ~/.vncrepeater/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the repeater until interrupted (default)
    Run(RunArgs),

    /// Show or create the settings file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Overrides applied on top of the settings file
#[derive(Args, Default)]
struct RunArgs {
    /// Port VNC servers connect to
    #[arg(long)]
    server_port: Option<u16>,

    /// Port VNC viewers connect to
    #[arg(long)]
    viewer_port: Option<u16>,

    /// Maximum number of simultaneous slots
    #[arg(long)]
    max_slots: Option<usize>,

    /// Address both listeners bind to
    #[arg(long)]
    bind: Option<String>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings as JSON
    Show,

    /// Write default settings to the settings file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    vncrepeater_logging::init(cli.verbose);

    let path = cli.config.clone().unwrap_or_else(default_settings_path);

    match cli.command {
        None => run(&path, RunArgs::default()).await,
        Some(Commands::Run(args)) => run(&path, args).await,
        Some(Commands::Config { action }) => match action {
            ConfigAction::Show => show_config(&path),
            ConfigAction::Init { force } => init_config(&path, force),
        },
    }
}

// ============================================================================
// Settings
// ============================================================================

fn load_settings(path: &Path, args: &RunArgs) -> Result<Settings> {
    let mut settings = Settings::load_from(path)
        .with_context(|| format!("Failed to load settings from {:?}", path))?;

    if let Some(port) = args.server_port {
        settings.listen.server_port = port;
    }
    if let Some(port) = args.viewer_port {
        settings.listen.viewer_port = port;
    }
    if let Some(max_slots) = args.max_slots {
        settings.slots.max_slots = max_slots;
    }
    if let Some(bind) = &args.bind {
        settings.listen.bind_address = bind.clone();
    }

    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn show_config(path: &Path) -> Result<()> {
    let settings = load_settings(path, &RunArgs::default())?;
    let json = serde_json::to_string_pretty(&settings).context("Failed to encode settings")?;
    println!("{}", json);
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{:?} already exists (use --force to overwrite)", path);
    }
    Settings::default()
        .save_to(path)
        .with_context(|| format!("Failed to write {:?}", path))?;
    println!("Wrote default settings to {:?}", path);
    Ok(())
}

// ============================================================================
// Repeater
// ============================================================================

async fn run(path: &Path, args: RunArgs) -> Result<()> {
    let settings = load_settings(path, &args)?;
    let config = RepeaterConfig::from_settings(&settings)?;

    info!("Starting VNC repeater...");
    let repeater = Repeater::start(config)
        .await
        .context("Failed to start repeater")?;

    let fatal = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for interrupt")?;
            info!("Received shutdown signal");
            false
        }
        _ = repeater.stopped() => true,
    };

    repeater.stop().await.context("Failed to stop repeater")?;

    if fatal {
        error!("Repeater stopped after an internal failure");
        bail!("repeater stopped after an internal failure");
    }
    info!("Repeater stopped");
    Ok(())
}
