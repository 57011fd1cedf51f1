use anyhow::Result;
use clap::{
    Parser, Subcommand,
    builder::{Styles, styling},
};
use lda::{CollectionEngine, CollectorConfig, logger::init_local_logger};
use log::{debug, error, info};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

fn create_styles() -> Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(styling::AnsiColor::Blue.on_default() | styling::Effects::BOLD)
        .placeholder(styling::AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(version, about = "Local developer analytics", styles = create_styles())]
pub struct Cli {
    /// The configuration name to use
    /// If provided, the configuration will be loaded from ~/.config/lda/{config-name}.yaml
    /// Otherwise, loads from ~/.config/lda/config.yaml
    #[arg(long, env = "LDA_CONFIG_NAME", global = true)]
    pub config_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Collect shell commands and process activity until interrupted
    Collect,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = CollectorConfig::load(cli.config_name.as_deref())?;
    init_local_logger(config.debug)?;
    debug!("Running lda {} with {config:?}", lda::VERSION);

    match cli.command {
        Commands::Collect => collect(config).await?,
    }
    Ok(())
}

async fn collect(config: CollectorConfig) -> Result<()> {
    let engine = CollectionEngine::from_config(config)?;
    let listener = engine.listen()?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    engine.serve(listener, shutdown).await
}

/// Cancel `shutdown` on ctrl-c or, when running as a service, SIGTERM.
async fn cancel_on_signal(shutdown: CancellationToken) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!("Failed to listen for SIGTERM: {e}");
            return;
        }
    };

    tokio::select! {
        interrupted = tokio::signal::ctrl_c() => {
            if let Err(e) = interrupted {
                error!("Failed to listen for ctrl-c: {e}");
                return;
            }
            info!("Interrupted, shutting down");
        }
        _ = terminate.recv() => info!("Terminated, shutting down"),
    }
    shutdown.cancel();
}
