//! Lazy-Content Trigger
//!
//! Forces deferred content to resolve before capture: eager-loading hints, a
//! stepped scroll sweep that follows document growth, two network-idle
//! windows and a bounded wait on image decode. Everything here is best
//! effort; failures are logged and never propagated.

use crate::{scripts, LazyLoadSettings, PageDriver, Reporter, SnapshotError};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Image decode counts reported by the page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ImageStatus {
    pub total: u64,
    pub loaded: u64,
    pub failed: u64,
    pub pending: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LazyLoadReport {
    pub passes: usize,
    pub initial_height: f64,
    pub final_height: f64,
    pub images: ImageStatus,
}

pub struct LazyContentTrigger {
    settings: Arc<LazyLoadSettings>,
}

impl LazyContentTrigger {
    pub fn new(settings: LazyLoadSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    /// Runs the sweep and quiescence waits; `None` when the sweep itself failed
    pub async fn trigger(&self, page: &dyn PageDriver, reporter: &Reporter) -> Option<LazyLoadReport> {
        reporter.info("Triggering lazy loading and animations...");

        match self.sweep_and_settle(page, reporter).await {
            Ok(report) => {
                if report.final_height > report.initial_height {
                    reporter.info(format!(
                        "Lazy content loaded ({}px -> {}px)",
                        report.initial_height, report.final_height
                    ));
                } else {
                    reporter.info("Page scroll completed");
                }
                Some(report)
            }
            Err(e) => {
                reporter.warn(format!("Lazy loading failed: {e}"));
                None
            }
        }
    }

    async fn sweep_and_settle(&self, page: &dyn PageDriver, reporter: &Reporter) -> Result<LazyLoadReport, SnapshotError> {
        reporter.preview(page, "lazy-start").await;

        let rewritten = page.evaluate(&scripts::call(scripts::EAGER_LOADING, &[])).await?;
        reporter.debug(format!("Switched {rewritten} lazy element(s) to eager loading"));

        let initial = page.metrics().await?;
        reporter.info(format!("Initial page height: {}px", initial.scroll_height));

        let passes = self.sweep(page, initial.scroll_height, initial.viewport_height).await?;
        page.scroll_to(0.0, 0.0).await?;

        self.wait_for_idle(page, reporter, self.settings.first_idle_timeout, "first", "network-idle-1")
            .await;
        sleep(self.settings.idle_gap).await;
        self.wait_for_idle(page, reporter, self.settings.second_idle_timeout, "second", "network-idle-2")
            .await;

        let images = self.wait_for_images(page, reporter).await;
        self.prefetch_backgrounds(page, reporter).await;

        let final_height = page.metrics().await?.scroll_height;

        Ok(LazyLoadReport {
            passes,
            initial_height: initial.scroll_height,
            final_height,
            images,
        })
    }

    /// Steps down the document in quarter-viewport increments, up to the pass cap
    ///
    /// Height growth seen mid-pass extends the current pass. A pass that ends
    /// without growth stops the sweep.
    async fn sweep(&self, page: &dyn PageDriver, start_height: f64, viewport_height: f64) -> Result<usize, SnapshotError> {
        let step = (viewport_height / 4.0).max(1.0);
        let mut total = start_height;
        let mut settled = start_height;
        let mut passes = 0;

        while passes < self.settings.max_passes {
            passes += 1;

            let mut position = 0.0;
            while position <= total {
                page.evaluate(&scripts::call(scripts::SWEEP_STEP, &[Value::from(position.min(total))]))
                    .await?;
                sleep(self.settings.step_delay).await;

                let height = page.metrics().await?.scroll_height;
                if height > total {
                    total = height;
                }
                position += step;
            }

            page.evaluate(&scripts::call(scripts::SWEEP_STEP, &[Value::from(total)]))
                .await?;
            sleep(self.settings.pass_settle).await;

            let height = page.metrics().await?.scroll_height;
            if height > settled {
                total = height;
                settled = height;
            } else {
                break;
            }
        }

        Ok(passes)
    }

    async fn wait_for_idle(&self, page: &dyn PageDriver, reporter: &Reporter, bound: Duration, ordinal: &str, step: &str) {
        reporter.info(format!("Waiting for {ordinal} network idle..."));
        match page.wait_for_network_idle(bound).await {
            Ok(()) => {
                reporter.info(format!("{} network idle completed", capitalize(ordinal)));
                reporter.preview(page, step).await;
            }
            Err(e) => reporter.warn(format!("{} network idle timeout: {e}", capitalize(ordinal))),
        }
    }

    async fn wait_for_images(&self, page: &dyn PageDriver, reporter: &Reporter) -> ImageStatus {
        let ceiling = self.settings.image_attempt_ceiling;
        let script = scripts::call(scripts::IMAGE_STATUS, &[Value::from(ceiling.as_millis() as u64)]);
        let mut status = ImageStatus::default();

        for attempt in 1..=self.settings.image_attempts {
            // The page races its own ceiling; this bound covers a stalled round trip
            match timeout(ceiling * 2, page.evaluate(&script)).await {
                Ok(Ok(value)) => match serde_json::from_value::<ImageStatus>(value) {
                    Ok(parsed) => status = parsed,
                    Err(e) => {
                        reporter.debug(format!("Unreadable image status: {e}"));
                        break;
                    }
                },
                Ok(Err(e)) => {
                    reporter.debug(format!("Image check {attempt} failed: {e}"));
                    continue;
                }
                Err(_) => {
                    reporter.debug(format!("Image check {attempt} timed out"));
                    continue;
                }
            }

            reporter.debug(format!(
                "Images attempt {attempt}: {} loaded, {} failed, {} pending of {}",
                status.loaded, status.failed, status.pending, status.total
            ));
            if status.pending == 0 {
                break;
            }
        }

        if status.pending > 0 {
            reporter.warn(format!("{} image(s) still pending after image wait", status.pending));
        }
        status
    }

    async fn prefetch_backgrounds(&self, page: &dyn PageDriver, reporter: &Reporter) {
        let bound = self.settings.background_prefetch_timeout;
        let script = scripts::call(scripts::PREFETCH_BACKGROUNDS, &[Value::from(bound.as_millis() as u64)]);

        match timeout(bound * 2, page.evaluate(&script)).await {
            Ok(Ok(count)) => reporter.debug(format!("Prefetched {count} background image(s)")),
            Ok(Err(e)) => reporter.debug(format!("Background prefetch failed: {e}")),
            Err(_) => reporter.debug("Background prefetch timed out"),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
