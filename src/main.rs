use anyhow::Context;
use clap::Parser;
use snapshot_runner::{setup_logging, Cli, CliRunner, Config, PrometheusExporter};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Cli::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    info!("Starting snapshot-runner v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = load_config(&args).await?;

    if let Some(port) = args.metrics_port {
        PrometheusExporter::new(port).start()?;
    }

    let cli_runner = CliRunner::new(config);

    // Setup graceful shutdown
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel(1);
    let _shutdown_handler = setup_shutdown_handler(shutdown_tx);

    let result = tokio::select! {
        result = cli_runner.run(args.command) => {
            info!("Application completed");
            result
        }
        Ok(()) = shutdown_rx.recv() => {
            warn!("Received shutdown signal, aborting run");
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }

    info!("snapshot-runner stopped");
    Ok(())
}

async fn load_config(args: &Cli) -> anyhow::Result<Config> {
    let mut config = if let Some(settings_path) = &args.settings {
        let content = tokio::fs::read_to_string(settings_path)
            .await
            .with_context(|| format!("reading {}", settings_path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing {}", settings_path.display()))?
    } else {
        Config::default()
    };

    // Override with CLI arguments
    args.apply_overrides(&mut config);

    config.validate()?;

    info!("Configuration loaded successfully");
    info!("Batch size: {}", config.batch_size);
    info!("Max retries: {}", config.max_retries);
    info!("Navigation timeout: {:?}", config.navigation_timeout);

    Ok(config)
}

fn setup_shutdown_handler(
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let (mut sigint, mut sigterm) = match (
            signal::unix::signal(signal::unix::SignalKind::interrupt()),
            signal::unix::signal(signal::unix::SignalKind::terminate()),
        ) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        let _ = shutdown_tx.send(());
    })
}
