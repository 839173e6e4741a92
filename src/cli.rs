use crate::{
    sanitize_filename, BatchScheduler, BrowserLauncher, CdpLauncher, ChannelSink, Config,
    Metrics, RunConfig, RunEvent, RunReport,
};
use anyhow::{bail, Context};
use base64::Engine;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const REPORT_FILE: &str = "run-report.json";

const PREVIEW_CHANNEL_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "snapshot-runner")]
#[command(about = "Scripted multi-viewport website screenshot runner")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Engine settings file (JSON)")]
    pub settings: Option<PathBuf>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Screens processed concurrently per batch")]
    pub batch_size: Option<usize>,

    #[arg(long, help = "Serve Prometheus metrics on this port")]
    pub metrics_port: Option<u16>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture every screen of a run configuration
    Run {
        #[arg(short, long, help = "Run configuration exported by the authoring UI")]
        config: PathBuf,

        #[arg(short, long, help = "Output directory for screenshots")]
        output: Option<PathBuf>,

        #[arg(long, help = "Write live previews into this directory")]
        preview_dir: Option<PathBuf>,
    },

    /// Capture a single screen, selected by id
    Screen {
        #[arg(short, long, help = "Run configuration exported by the authoring UI")]
        config: PathBuf,

        #[arg(long, help = "Screen id")]
        id: String,

        #[arg(short, long, help = "Output directory for screenshots")]
        output: Option<PathBuf>,
    },

    /// Check a run configuration without launching a browser
    Validate {
        #[arg(short, long, help = "Run configuration to validate")]
        config: PathBuf,
    },
}

impl Cli {
    /// Applies command-line overrides on top of loaded settings
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(chrome_path) = &self.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }
    }
}

pub struct CliRunner {
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    launcher: Arc<dyn BrowserLauncher>,
}

impl CliRunner {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let launcher = Arc::new(CdpLauncher::new(config.clone()));
        Self::with_launcher(config, launcher)
    }

    pub fn with_launcher(config: Arc<Config>, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            config,
            metrics: Arc::new(Metrics::new()),
            launcher,
        }
    }

    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Run {
                config,
                output,
                preview_dir,
            } => {
                let run = load_run_config(&config).await?;
                let report = self.run_all(run, output, preview_dir).await?;
                print_summary(&report);
                Ok(())
            }
            Commands::Screen { config, id, output } => {
                let run = load_run_config(&config).await?;
                let report = self.run_screen(run, &id, output).await?;
                print_summary(&report);
                Ok(())
            }
            Commands::Validate { config } => self.validate_run_config(&config).await,
        }
    }

    fn scheduler(&self, output: Option<PathBuf>) -> (BatchScheduler, PathBuf) {
        let mut config = (*self.config).clone();
        if let Some(output) = output {
            config.output_dir = output;
        }
        let output_dir = config.output_dir.clone();

        let scheduler = BatchScheduler::new(Arc::new(config), self.metrics.clone(), self.launcher.clone());
        (scheduler, output_dir)
    }

    pub async fn run_all(
        &self,
        run: RunConfig,
        output: Option<PathBuf>,
        preview_dir: Option<PathBuf>,
    ) -> anyhow::Result<RunReport> {
        let (scheduler, output_dir) = self.scheduler(output);
        fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("creating {}", output_dir.display()))?;

        let report = match preview_dir {
            Some(dir) => {
                fs::create_dir_all(&dir)
                    .await
                    .with_context(|| format!("creating {}", dir.display()))?;

                let sink = Arc::new(ChannelSink::new(PREVIEW_CHANNEL_CAPACITY));
                let writer = spawn_preview_writer(sink.subscribe(), dir);
                let scheduler = scheduler.with_sink(sink);

                let report = scheduler.run(run).await;
                // Dropping the last sender closes the channel and lets the writer finish
                drop(scheduler);
                let written = writer.await.context("preview writer panicked")?;
                info!("Wrote {} preview image(s)", written);
                report?
            }
            None => scheduler.run(run).await?,
        };

        write_report(&output_dir, &report).await?;
        Ok(report)
    }

    pub async fn run_screen(&self, run: RunConfig, id: &str, output: Option<PathBuf>) -> anyhow::Result<RunReport> {
        let (scheduler, output_dir) = self.scheduler(output);
        fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("creating {}", output_dir.display()))?;

        let report = scheduler.run_screen_by_id(&run, id).await?;
        write_report(&output_dir, &report).await?;
        Ok(report)
    }

    pub async fn validate_run_config(&self, path: &Path) -> anyhow::Result<()> {
        println!("Validating run configuration: {}", path.display());

        let run = load_run_config(path).await?;
        run.validate()?;

        let mut unresolved = 0;
        for screen in &run.screens {
            let viewports: Vec<&str> = screen.enabled_viewports().iter().map(|v| v.as_str()).collect();
            match run.resolve_url(screen) {
                Ok(url) => println!(
                    "  {}: {} [{}] {} action(s)",
                    screen.name(),
                    url,
                    viewports.join(", "),
                    screen.shared_actions.len() + screen.desktop_actions.len() + screen.mobile_actions.len()
                ),
                Err(e) => {
                    unresolved += 1;
                    println!("  {}: {}", screen.name(), e);
                }
            }
        }

        println!("Configuration is valid:");
        println!("  Site: {}", run.site_name);
        println!("  Screens: {}", run.screens.len());
        println!("  Batch size: {}", self.config.batch_size);
        println!("  Lazy loading: {}", run.enable_lazy_loading);
        if unresolved > 0 {
            warn!("{} screen(s) have no usable URL and will fail", unresolved);
        }

        Ok(())
    }
}

pub async fn load_run_config(path: &Path) -> anyhow::Result<RunConfig> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let run = RunConfig::from_json(&content).with_context(|| format!("parsing {}", path.display()))?;

    if run.screens.is_empty() {
        bail!("{} contains no screens", path.display());
    }

    info!("Loaded {} screen(s) from {}", run.screens.len(), path.display());
    Ok(run)
}

pub async fn write_report(output_dir: &Path, report: &RunReport) -> anyhow::Result<PathBuf> {
    let path = output_dir.join(REPORT_FILE);
    let json = serde_json::to_string_pretty(report)?;
    fs::write(&path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))?;

    info!("Run report saved to: {}", path.display());
    Ok(path)
}

/// Drains preview events into `dir` until the channel closes, returning the number of files written
pub fn spawn_preview_writer(mut events: broadcast::Receiver<RunEvent>, dir: PathBuf) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut written = 0;

        loop {
            let preview = match events.recv().await {
                Ok(RunEvent::Preview(preview)) => preview,
                Ok(RunEvent::Log(_)) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Preview writer fell behind, skipped {} event(s)", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let Some(encoded) = preview.image.strip_prefix("data:image/jpeg;base64,") else {
                warn!("Ignoring preview with unexpected encoding for {}", preview.screen_name);
                continue;
            };

            let bytes = match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Undecodable preview for {}: {}", preview.screen_name, e);
                    continue;
                }
            };

            written += 1;
            let name = format!(
                "{:04}-{}-{}-{}.jpg",
                written,
                sanitize_filename(&preview.screen_name),
                preview.viewport_type,
                sanitize_filename(&preview.step)
            );

            if let Err(e) = fs::write(dir.join(&name), bytes).await {
                warn!("Failed to write preview {}: {}", name, e);
                written -= 1;
            }
        }

        written
    })
}

pub fn print_summary(report: &RunReport) {
    let summary = &report.summary;

    println!("Snapshot run completed:");
    println!("  Total screens: {}", summary.total);
    println!("  Successful: {} (skipped: {})", summary.successful, summary.skipped);
    println!("  Failed: {} (partial: {})", summary.failed, summary.partial);
    println!("  Screenshots: {}", report.screenshots.len());

    for failed in &summary.failed_screens {
        let marker = if failed.partial { "~" } else { "✗" };
        println!("  {} {}: {}", marker, failed.name, failed.error);
    }
}

pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}
