//! Batch Scheduler
//!
//! Screens run in fixed-width batches. Every screen gets its own browser
//! instance, its viewport tasks share that instance on separate pages, and
//! the instance is closed once those tasks settle. A batch finishes
//! completely before the next one starts.

use crate::{
    format_duration, BrowserLauncher, Config, EventSink, Metrics, Reporter, RunConfig, RunLog, ScreenJob,
    ScreenSpec, ScreenshotRecord, SnapshotError, TaskResult, ViewportTaskRunner,
};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info};

pub const NO_URL: &str = "No URL";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedScreen {
    pub name: String,
    pub error: String,
    /// At least one viewport of this screen was captured
    pub partial: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total: usize,
    /// Includes skipped screens
    pub successful: usize,
    pub failed: usize,
    /// Failed screens that still wrote a screenshot for some viewport
    pub partial: usize,
    pub skipped: usize,
    pub failed_screens: Vec<FailedScreen>,
}

/// Everything a run returns: summary, per-task results, written files and the ordered log
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub summary: RunSummary,
    pub tasks: Vec<TaskResult>,
    pub screenshots: Vec<ScreenshotRecord>,
    pub logs: Vec<String>,
}

#[derive(Debug)]
enum ScreenStatus {
    Skipped,
    Completed,
    Failed { error: String, partial: bool },
}

#[derive(Debug)]
struct ScreenOutcome {
    name: String,
    status: ScreenStatus,
    tasks: Vec<TaskResult>,
}

impl ScreenOutcome {
    fn failed(name: &str, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: ScreenStatus::Failed {
                error: error.into(),
                partial: false,
            },
            tasks: Vec::new(),
        }
    }
}

pub struct BatchScheduler {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    launcher: Arc<dyn BrowserLauncher>,
    sink: Option<Arc<dyn EventSink>>,
}

impl BatchScheduler {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>, launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            config,
            metrics,
            launcher,
            sink: None,
        }
    }

    /// Streams log lines and previews to `sink` while running
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Runs every screen of `run`
    ///
    /// Only an empty screen list is an error; individual screen failures are
    /// reported in the summary and never stop the run.
    pub async fn run(&self, run: RunConfig) -> Result<RunReport, SnapshotError> {
        if run.screens.is_empty() {
            return Err(SnapshotError::Configuration(
                "Invalid configuration or no screens provided".to_string(),
            ));
        }

        let selection = (0..run.screens.len()).collect();
        self.run_selected(run, selection).await
    }

    /// Runs the single screen of `run` whose id is `id`
    ///
    /// The screen keeps its position in the full list, so its filenames and
    /// browser instance match what a full run would produce.
    pub async fn run_screen_by_id(&self, run: &RunConfig, id: &str) -> Result<RunReport, SnapshotError> {
        let position = run
            .screen_position(id)
            .ok_or_else(|| SnapshotError::Configuration(format!("Screen not found: {id}")))?;
        self.run_selected(run.clone(), vec![position]).await
    }

    /// Processes the screens at `selection`; filenames are numbered against the full screen list
    async fn run_selected(&self, run: RunConfig, selection: Vec<usize>) -> Result<RunReport, SnapshotError> {
        let started = Instant::now();
        let run = Arc::new(run);
        let log = Arc::new(match &self.sink {
            Some(sink) => RunLog::streaming(sink.clone()),
            None => RunLog::new(),
        });

        let total = run.screens.len();
        let selected = selection.len();
        let batch_size = self.config.batch_size.max(1);
        let batch_count = (selected + batch_size - 1) / batch_size;
        let site = if run.site_name.is_empty() { "site" } else { run.site_name.as_str() };
        log.push(format!(
            "Starting snapshot run for {site}: {selected} screen(s) in {batch_count} batch(es) of up to {batch_size}"
        ));
        info!("Starting run of {} screens with batch size {}", selected, batch_size);

        let mut outcomes = Vec::with_capacity(selected);

        for (batch_index, chunk) in selection.chunks(batch_size).enumerate() {
            if batch_index > 0 {
                sleep(self.config.batch_pause).await;
            }

            log.push(format!(
                "Processing batch {}/{} ({} screen(s))",
                batch_index + 1,
                batch_count,
                chunk.len()
            ));

            let handles: Vec<_> = chunk
                .iter()
                .map(|&index| {
                    let worker = ScreenWorker {
                        config: self.config.clone(),
                        metrics: self.metrics.clone(),
                        launcher: self.launcher.clone(),
                        run: run.clone(),
                        log: log.clone(),
                    };
                    let screen = run.screens[index].clone();

                    tokio::spawn(async move { worker.process(screen, index, total).await })
                })
                .collect();

            let settled = join_all(handles).await;
            let mut batch_failures = 0;

            for (&index, joined) in chunk.iter().zip(settled) {
                let outcome = joined.unwrap_or_else(|e| {
                    ScreenOutcome::failed(run.screens[index].name(), SnapshotError::from(e).to_string())
                });
                if matches!(outcome.status, ScreenStatus::Failed { .. }) {
                    batch_failures += 1;
                }
                outcomes.push(outcome);
            }

            self.metrics.record_batch();
            log.push(format!(
                "Batch {} completed: {} successful, {} failed",
                batch_index + 1,
                chunk.len() - batch_failures,
                batch_failures
            ));
        }

        let report = assemble(outcomes);
        let summary = &report.summary;
        if summary.failed > 0 {
            log.push(format!(
                "Completed with {} successful and {} failed screen(s)",
                summary.successful, summary.failed
            ));
            for failure in &summary.failed_screens {
                let how = if failure.partial { "partially failed" } else { "failed" };
                log.push(format!("{} {}: {}", failure.name, how, failure.error));
            }
        } else {
            log.push(format!("All {} screen(s) completed successfully", summary.successful));
        }
        log.push(format!("Run finished in {}", format_duration(started.elapsed())));

        Ok(RunReport {
            logs: log.lines(),
            ..report
        })
    }
}

/// Folds screen outcomes into a report; logs are attached by the caller
fn assemble(outcomes: Vec<ScreenOutcome>) -> RunReport {
    let mut summary = RunSummary {
        total: outcomes.len(),
        ..RunSummary::default()
    };
    let mut tasks = Vec::new();

    for outcome in outcomes {
        match outcome.status {
            ScreenStatus::Skipped => {
                summary.skipped += 1;
                summary.successful += 1;
            }
            ScreenStatus::Completed => summary.successful += 1,
            ScreenStatus::Failed { error, partial } => {
                summary.failed += 1;
                if partial {
                    summary.partial += 1;
                }
                summary.failed_screens.push(FailedScreen {
                    name: outcome.name,
                    error,
                    partial,
                });
            }
        }
        tasks.extend(outcome.tasks);
    }

    let screenshots = tasks
        .iter()
        .filter_map(|task| task.screenshot.clone())
        .collect();

    RunReport {
        summary,
        tasks,
        screenshots,
        logs: Vec::new(),
    }
}

/// Owned handles for processing one screen on a spawned task
struct ScreenWorker {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    launcher: Arc<dyn BrowserLauncher>,
    run: Arc<RunConfig>,
    log: Arc<RunLog>,
}

impl ScreenWorker {
    async fn process(self, screen: ScreenSpec, index: usize, total: usize) -> ScreenOutcome {
        let name = screen.name().to_string();
        let reporter = Reporter::new(
            self.log.clone(),
            name.clone(),
            screen.screenshot_type,
            self.config.preview_quality,
        );

        let viewports = screen.enabled_viewports();
        if viewports.is_empty() {
            reporter.info("Desktop and mobile both disabled, skipping");
            self.metrics.record_skipped_screen();
            return ScreenOutcome {
                name,
                status: ScreenStatus::Skipped,
                tasks: Vec::new(),
            };
        }

        let url = match self.run.resolve_url(&screen) {
            Ok(url) => url,
            Err(e) => {
                reporter.warn(format!("Skipping screen with unusable URL: {e}"));
                return ScreenOutcome::failed(&name, NO_URL);
            }
        };

        if let Err(e) = screen.validate() {
            reporter.warn(format!("Invalid screen configuration: {e}"));
            return ScreenOutcome::failed(&name, e.to_string());
        }

        let browser = match self.launcher.launch(index).await {
            Ok(browser) => browser,
            Err(e) => {
                reporter.warn(format!("Browser launch failed: {e}"));
                return ScreenOutcome::failed(&name, e.to_string());
            }
        };
        debug!("Launched browser instance {} for {}", index, name);

        let runner = ViewportTaskRunner::new(
            self.config.clone(),
            self.metrics.clone(),
            self.run.clone(),
            self.config.output_dir.clone(),
        );
        let job = ScreenJob {
            screen,
            url,
            index,
            total,
        };

        let tasks = join_all(viewports.into_iter().map(|viewport| {
            let reporter = reporter.for_viewport(viewport);
            let runner = &runner;
            let job = &job;
            let browser = browser.as_ref();
            async move { runner.run(browser, job, viewport, &reporter).await }
        }))
        .await;

        if let Err(e) = browser.close().await {
            reporter.warn(format!("Error closing browser: {e}"));
        } else {
            reporter.debug("Browser closed");
        }

        let failures: Vec<String> = tasks
            .iter()
            .filter(|task| !task.success)
            .map(|task| {
                format!(
                    "{}: {}",
                    task.viewport,
                    task.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();

        let status = if failures.is_empty() {
            ScreenStatus::Completed
        } else {
            ScreenStatus::Failed {
                error: failures.join("; "),
                partial: failures.len() < tasks.len(),
            }
        };

        ScreenOutcome { name, status, tasks }
    }
}
