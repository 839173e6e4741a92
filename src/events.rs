//! Run log and live preview events
//!
//! Every orchestration step appends a timestamped line to the [`RunLog`].
//! When a run streams previews, lines and JPEG previews are also forwarded
//! to an [`EventSink`].

use crate::{CaptureRequest, PageDriver, ScreenshotMode, ViewportClass};
use base64::Engine;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Intermediate screenshot streamed while a task runs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewEvent {
    /// `data:image/jpeg;base64,...`
    pub image: String,
    pub screen_name: String,
    pub viewport_type: ViewportClass,
    pub step: String,
    pub timestamp: String,
    pub screenshot_type: ScreenshotMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum RunEvent {
    Log(String),
    Preview(PreviewEvent),
}

/// Receiver for streamed run output
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn log(&self, line: &str);

    fn preview(&self, event: &PreviewEvent);
}

/// Sink that fans events out over a tokio broadcast channel
pub struct ChannelSink {
    sender: broadcast::Sender<RunEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for ChannelSink {
    fn log(&self, line: &str) {
        // No subscribers is fine
        let _ = self.sender.send(RunEvent::Log(line.to_string()));
    }

    fn preview(&self, event: &PreviewEvent) {
        let _ = self.sender.send(RunEvent::Preview(event.clone()));
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Ordered, timestamped log of one run
pub struct RunLog {
    lines: Mutex<Vec<String>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            sink: None,
        }
    }

    /// Log that also streams lines and previews to `sink`
    pub fn streaming(sink: Arc<dyn EventSink>) -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            sink: Some(sink),
        }
    }

    pub fn previews_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn push(&self, message: impl AsRef<str>) {
        let line = format!("[{}] {}", timestamp(), message.as_ref());

        if let Some(sink) = &self.sink {
            sink.log(&line);
        }

        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line);
    }

    pub fn emit_preview(&self, event: &PreviewEvent) {
        if let Some(sink) = &self.sink {
            sink.preview(event);
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging handle scoped to one screen, and optionally one viewport
#[derive(Clone)]
pub struct Reporter {
    log: Arc<RunLog>,
    screen: String,
    viewport: Option<ViewportClass>,
    screenshot_type: ScreenshotMode,
    preview_quality: u8,
}

impl Reporter {
    pub fn new(log: Arc<RunLog>, screen: impl Into<String>, screenshot_type: ScreenshotMode, preview_quality: u8) -> Self {
        Self {
            log,
            screen: screen.into(),
            viewport: None,
            screenshot_type,
            preview_quality,
        }
    }

    pub fn for_viewport(&self, viewport: ViewportClass) -> Self {
        Self {
            viewport: Some(viewport),
            ..self.clone()
        }
    }

    pub fn screen(&self) -> &str {
        &self.screen
    }

    fn prefix(&self, message: &str) -> String {
        match self.viewport {
            Some(viewport) => format!("[{}] {}: {}", viewport.label(), self.screen, message),
            None => format!("{}: {}", self.screen, message),
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let line = self.prefix(message.as_ref());
        info!("{}", line);
        self.log.push(line);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let line = self.prefix(message.as_ref());
        warn!("{}", line);
        self.log.push(line);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let line = self.prefix(message.as_ref());
        error!("{}", line);
        self.log.push(line);
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        debug!("{}", self.prefix(message.as_ref()));
    }

    /// Captures and streams a viewport preview; a no-op unless previews are enabled
    ///
    /// Failures are logged and never propagated.
    pub async fn preview(&self, page: &dyn PageDriver, step: &str) {
        if !self.log.previews_enabled() {
            return;
        }

        let Some(viewport) = self.viewport else {
            return;
        };

        match page
            .screenshot(&CaptureRequest::jpeg_preview(
                self.screenshot_type == ScreenshotMode::FullPage,
                self.preview_quality,
            ))
            .await
        {
            Ok(bytes) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                self.log.emit_preview(&PreviewEvent {
                    image: format!("data:image/jpeg;base64,{encoded}"),
                    screen_name: self.screen.clone(),
                    viewport_type: viewport,
                    step: step.to_string(),
                    timestamp: timestamp(),
                    screenshot_type: self.screenshot_type,
                });
            }
            Err(e) => debug!("{}", self.prefix(&format!("Preview '{step}' skipped: {e}"))),
        }
    }
}
