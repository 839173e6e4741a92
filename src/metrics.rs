use crate::SnapshotError;
use metrics::{register_counter, register_histogram, Counter, Histogram};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Run counters and timings
///
/// Handles bind to whatever recorder is installed when [`Metrics::new`] runs,
/// so install the exporter first. Without a recorder every handle is a no-op.
pub struct Metrics {
    pub tasks_succeeded: Counter,
    pub tasks_failed: Counter,
    pub task_retries: Counter,
    pub task_duration: Histogram,
    pub actions_executed: Counter,
    pub actions_failed: Counter,
    pub click_fallbacks: Counter,
    pub pointer_clicks: Counter,
    pub capture_duration: Histogram,
    pub screens_skipped: Counter,
    pub batches_completed: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tasks_succeeded: register_counter!("snapshot_tasks_succeeded_total"),
            tasks_failed: register_counter!("snapshot_tasks_failed_total"),
            task_retries: register_counter!("snapshot_task_retries_total"),
            task_duration: register_histogram!("snapshot_task_duration_seconds"),
            actions_executed: register_counter!("snapshot_actions_executed_total"),
            actions_failed: register_counter!("snapshot_actions_failed_total"),
            click_fallbacks: register_counter!("snapshot_click_fallbacks_total"),
            pointer_clicks: register_counter!("snapshot_pointer_clicks_total"),
            capture_duration: register_histogram!("snapshot_capture_duration_seconds"),
            screens_skipped: register_counter!("snapshot_screens_skipped_total"),
            batches_completed: register_counter!("snapshot_batches_completed_total"),
        }
    }

    pub fn record_task(&self, duration: Duration, success: bool) {
        if success {
            self.tasks_succeeded.increment(1);
        } else {
            self.tasks_failed.increment(1);
        }

        self.task_duration.record(duration.as_secs_f64());
    }

    pub fn record_retry(&self) {
        self.task_retries.increment(1);
    }

    pub fn record_action(&self, success: bool) {
        if success {
            self.actions_executed.increment(1);
        } else {
            self.actions_failed.increment(1);
        }
    }

    /// Counts a fall-through to the synthetic or pointer click tier
    pub fn record_click_fallback(&self, pointer: bool) {
        self.click_fallbacks.increment(1);
        if pointer {
            self.pointer_clicks.increment(1);
        }
    }

    pub fn record_capture(&self, duration: Duration) {
        self.capture_duration.record(duration.as_secs_f64());
    }

    pub fn record_skipped_screen(&self) {
        self.screens_skipped.increment(1);
    }

    pub fn record_batch(&self) {
        self.batches_completed.increment(1);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PrometheusExporter {
    port: u16,
}

impl PrometheusExporter {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Installs the global recorder and serves `/metrics` on the configured port
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn start(&self) -> Result<(), SnapshotError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));

        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| SnapshotError::Configuration(format!("metrics exporter: {e}")))?;

        info!("Prometheus metrics available on http://{}/metrics", addr);
        Ok(())
    }
}
