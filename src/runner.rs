//! Viewport Task Runner
//!
//! Drives one (screen, viewport) pair through
//! `navigate -> lazy trigger -> shared actions -> viewport actions -> scroll restore -> capture`,
//! retrying the whole sequence on a fresh page when any step fails.

use crate::{
    screenshot_path, save_screenshot, ActionEngine, BrowserSession, CaptureEngine, Config,
    ErrorSeverity, LazyContentTrigger, Metrics, PageDriver, Reporter, RunConfig, ScreenSpec, ScreenshotMode,
    ScrollOutcome, SnapshotError, ViewportClass, ViewportSize,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use url::Url;

/// A screenshot written by a successful task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRecord {
    pub filename: String,
    pub path: PathBuf,
    pub screen: String,
    pub viewport: ViewportClass,
    pub screenshot_type: ScreenshotMode,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub screen_id: String,
    pub viewport: ViewportClass,
    pub success: bool,
    pub attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotRecord>,
}

/// A screen resolved for execution: its position in the run and its absolute URL
#[derive(Debug, Clone)]
pub struct ScreenJob {
    pub screen: ScreenSpec,
    pub url: Url,
    pub index: usize,
    pub total: usize,
}

/// Runs the viewport tasks of one screen
///
/// Owns the screen's [`ActionEngine`], so recorded scroll state lives exactly
/// as long as the screen's run.
pub struct ViewportTaskRunner {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    run: Arc<RunConfig>,
    output_dir: PathBuf,
    actions: ActionEngine,
    lazy: LazyContentTrigger,
    capture: CaptureEngine,
}

impl ViewportTaskRunner {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>, run: Arc<RunConfig>, output_dir: PathBuf) -> Self {
        Self {
            actions: ActionEngine::new(config.clone(), metrics.clone()),
            lazy: LazyContentTrigger::new(config.lazy_load.clone()),
            capture: CaptureEngine::new(config.clone(), metrics.clone()),
            config,
            metrics,
            run,
            output_dir,
        }
    }

    pub fn actions(&self) -> &ActionEngine {
        &self.actions
    }

    /// Runs the task with retries; never returns an error, failures land in the result
    pub async fn run(
        &self,
        browser: &dyn BrowserSession,
        job: &ScreenJob,
        viewport: ViewportClass,
        reporter: &Reporter,
    ) -> TaskResult {
        let started = Instant::now();
        let max_attempts = self.config.max_retries + 1;
        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            attempts = attempt;

            if attempt > 1 {
                self.metrics.record_retry();
                // State recorded by the failed attempt must not frame the retry
                self.actions.clear_scroll_state(viewport);
                reporter.info(format!(
                    "Retry attempt {}/{} after {:?}",
                    attempt - 1,
                    self.config.max_retries,
                    self.config.retry_backoff
                ));
                sleep(self.config.retry_backoff).await;
            }

            match self.attempt(browser, job, viewport, reporter).await {
                Ok(record) => {
                    reporter.info(format!("Screenshot saved to {}", record.path.display()));
                    self.metrics.record_task(started.elapsed(), true);
                    return TaskResult {
                        screen_id: job.screen.id.clone(),
                        viewport,
                        success: true,
                        attempts,
                        error: None,
                        screenshot: Some(record),
                    };
                }
                Err(e) => {
                    reporter.warn(format!("Attempt {attempt}/{max_attempts} failed: {e}"));
                    let retryable = e.is_retryable();
                    last_error = Some(e);

                    if !retryable {
                        break;
                    }
                }
            }
        }

        let error = last_error.unwrap_or(SnapshotError::BrowserUnavailable);
        match error.severity() {
            ErrorSeverity::High => reporter.error(format!("All attempts failed: {error}")),
            _ => reporter.warn(format!("All attempts failed: {error}")),
        }
        self.metrics.record_task(started.elapsed(), false);

        TaskResult {
            screen_id: job.screen.id.clone(),
            viewport,
            success: false,
            attempts,
            error: Some(error.to_string()),
            screenshot: None,
        }
    }

    async fn attempt(
        &self,
        browser: &dyn BrowserSession,
        job: &ScreenJob,
        viewport: ViewportClass,
        reporter: &Reporter,
    ) -> Result<ScreenshotRecord, SnapshotError> {
        let page = browser.new_page().await?;
        let result = self.drive(page.as_ref(), job, viewport, reporter).await;

        if let Err(e) = page.close().await {
            reporter.debug(format!("Error closing page: {e}"));
        }
        result
    }

    async fn drive(
        &self,
        page: &dyn PageDriver,
        job: &ScreenJob,
        viewport: ViewportClass,
        reporter: &Reporter,
    ) -> Result<ScreenshotRecord, SnapshotError> {
        let screen = &job.screen;

        page.set_user_agent(&self.config.user_agent).await?;

        let credentials = self.run.credentials();
        if let Some(credentials) = &credentials {
            page.authenticate(credentials).await?;
            reporter.info("Applied HTTP authentication");
        }

        let size = self.run.viewport_size(viewport);
        self.apply_viewport(page, size, reporter).await?;
        reporter.preview(page, "initializing").await;

        reporter.info(format!("Navigating to {}", job.url));
        page.navigate(job.url.as_str(), self.config.navigation_timeout_for(credentials.is_some()))
            .await?;
        reporter.info("Page loaded");
        reporter.preview(page, "loaded").await;

        if self.run.enable_lazy_loading {
            self.lazy.trigger(page, reporter).await;
            reporter.preview(page, "lazy-loaded").await;
        }

        self.actions
            .execute_list(page, &screen.shared_actions, "shared", viewport, reporter)
            .await?;
        self.actions
            .execute_list(page, screen.viewport_actions(viewport), viewport.as_str(), viewport, reporter)
            .await?;

        let step = match self.actions.restore_scroll(page, viewport, reporter).await? {
            ScrollOutcome::Reset => "final-top",
            _ => "final-scrolled",
        };
        reporter.preview(page, step).await;

        reporter.info(format!("Capturing {} screenshot", screen.screenshot_type.as_str()));
        let output = self.capture.capture(page, screen, viewport, reporter).await?;

        let path = screenshot_path(&self.output_dir, job.index, job.total, screen.name(), viewport);
        save_screenshot(&path, &output.bytes).await?;

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(ScreenshotRecord {
            filename,
            path,
            screen: screen.name().to_string(),
            viewport,
            screenshot_type: screen.screenshot_type,
        })
    }

    /// Sets the viewport and checks the page agrees, re-applying once on mismatch
    async fn apply_viewport(
        &self,
        page: &dyn PageDriver,
        size: ViewportSize,
        reporter: &Reporter,
    ) -> Result<(), SnapshotError> {
        reporter.info(format!("Setting viewport to {}x{}", size.width, size.height));
        page.set_viewport(size.width, size.height, 1.0).await?;

        let metrics = page.metrics().await?;
        let matches = |width: f64, ratio: f64| width.round() as u32 == size.width && (ratio - 1.0).abs() < f64::EPSILON;
        if matches(metrics.viewport_width, metrics.device_pixel_ratio) {
            return Ok(());
        }

        reporter.warn(format!(
            "Viewport mismatch (width {}, device pixel ratio {}), re-applying",
            metrics.viewport_width, metrics.device_pixel_ratio
        ));
        page.set_viewport(size.width, size.height, 1.0).await?;

        let metrics = page.metrics().await?;
        if !matches(metrics.viewport_width, metrics.device_pixel_ratio) {
            reporter.warn(format!(
                "Viewport still reports width {} at device pixel ratio {}",
                metrics.viewport_width, metrics.device_pixel_ratio
            ));
        }
        Ok(())
    }
}
