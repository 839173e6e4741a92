//! Capture Engine
//!
//! Standard captures hand straight to the page. Selector-bounded captures
//! resize the viewport around one element, re-center it and optionally crop,
//! with navigation blocked for the duration.

use crate::{
    digit_count, sanitize_filename, scripts, CaptureRequest, ClipRect, Config, CropMargins,
    ElementRect, Metrics, PageDriver, Reporter, ScreenSpec, ScreenshotMode, SnapshotError,
    ViewportClass,
};
use serde_json::Value;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;

pub const MIN_CAPTURE_WIDTH: u32 = 300;
pub const MIN_CAPTURE_HEIGHT: u32 = 200;

/// Viewport sized to fit `rect`, with `height_compensation` added to its height
pub fn capture_viewport(rect: &ElementRect, height_compensation: i64) -> (u32, u32) {
    let height = (rect.height + height_compensation as f64).round().max(MIN_CAPTURE_HEIGHT as f64);
    let width = rect.width.round().max(MIN_CAPTURE_WIDTH as f64);
    (width as u32, height as u32)
}

/// Document-space clip for `rect` shrunk by `margins`
///
/// Returns `None` when the margins consume the whole element, in which case
/// the caller captures the viewport uncropped.
pub fn compute_clip(rect: &ElementRect, scroll_y: f64, margins: &CropMargins) -> Option<ClipRect> {
    let width = rect.width - margins.left - margins.right;
    let height = rect.height - margins.top - margins.bottom;
    if width <= 0.0 || height <= 0.0 {
        return None;
    }

    Some(ClipRect {
        x: (rect.left + margins.left).max(0.0),
        y: (rect.top + margins.top).max(0.0) + scroll_y,
        width: width.max(1.0),
        height: height.max(1.0),
    })
}

/// `{index}-{name}-{viewport}.png` with the 1-based index padded to the digit count of `total`
pub fn screenshot_filename(index: usize, total: usize, name: &str, viewport: ViewportClass) -> String {
    let width = digit_count(total.max(1));
    format!(
        "{:0width$}-{}-{}.png",
        index + 1,
        sanitize_filename(name),
        viewport.as_str(),
        width = width
    )
}

/// Output location: one subdirectory per viewport class under `root`
pub fn screenshot_path(root: &Path, index: usize, total: usize, name: &str, viewport: ViewportClass) -> PathBuf {
    root.join(viewport.as_str())
        .join(screenshot_filename(index, total, name, viewport))
}

pub async fn save_screenshot(path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

/// Pixel dimensions of an encoded image; zero-area images are rejected
pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), SnapshotError> {
    let (width, height) = image::io::Reader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()?;

    if width == 0 || height == 0 {
        return Err(SnapshotError::Capture(format!("empty image ({width}x{height})")));
    }
    Ok((width, height))
}

#[derive(Debug, Clone)]
pub struct CaptureOutput {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub clip: Option<ClipRect>,
}

pub struct CaptureEngine {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
}

impl CaptureEngine {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        Self { config, metrics }
    }

    /// Final screenshot of `screen` for `viewport`, framed per its screenshot mode
    pub async fn capture(
        &self,
        page: &dyn PageDriver,
        screen: &ScreenSpec,
        viewport: ViewportClass,
        reporter: &Reporter,
    ) -> Result<CaptureOutput, SnapshotError> {
        let started = Instant::now();
        sleep(self.config.timings.pre_capture_settle).await;

        let (bytes, clip) = match screen.screenshot_type {
            ScreenshotMode::SelectorBounded => self.capture_element(page, screen, viewport, reporter).await?,
            mode => (self.capture_standard(page, mode, reporter).await?, None),
        };

        let (width, height) = image_dimensions(&bytes)?;
        self.metrics.record_capture(started.elapsed());
        reporter.debug(format!("Captured {width}x{height} image ({} bytes)", bytes.len()));

        Ok(CaptureOutput {
            bytes,
            width,
            height,
            clip,
        })
    }

    async fn capture_standard(
        &self,
        page: &dyn PageDriver,
        mode: ScreenshotMode,
        reporter: &Reporter,
    ) -> Result<Vec<u8>, SnapshotError> {
        let metrics = page.metrics().await?;
        reporter.info(format!(
            "Taking standard screenshot at scroll position: {}px",
            metrics.scroll_y
        ));

        page.screenshot(&CaptureRequest::png(mode == ScreenshotMode::FullPage))
            .await
    }

    /// Runs the bounded capture with navigation blocked, then always restores
    /// the viewport and lifts the block
    async fn capture_element(
        &self,
        page: &dyn PageDriver,
        screen: &ScreenSpec,
        viewport: ViewportClass,
        reporter: &Reporter,
    ) -> Result<(Vec<u8>, Option<ClipRect>), SnapshotError> {
        let selector = screen.capture_selector().ok_or_else(|| {
            SnapshotError::validation(ScreenshotMode::SelectorBounded.as_str(), "selector is required")
        })?;

        let original = page.metrics().await?;

        let result = async {
            page.set_navigation_blocking(true).await?;
            page.evaluate(&scripts::call(scripts::BLOCK_NAVIGATION, &[])).await?;
            self.bounded_capture(page, screen, selector, viewport, reporter).await
        }
        .await;

        let restore = async {
            page.set_viewport(
                original.viewport_width.round() as u32,
                original.viewport_height.round() as u32,
                1.0,
            )
            .await?;
            page.evaluate(&scripts::call(scripts::RESTORE_NAVIGATION, &[])).await?;
            page.set_navigation_blocking(false).await
        }
        .await;

        match restore {
            Ok(()) => reporter.info("Navigation blocking disabled - screenshot complete"),
            Err(e) => reporter.warn(format!("Cleanup after element capture failed: {e}")),
        }

        result
    }

    async fn bounded_capture(
        &self,
        page: &dyn PageDriver,
        screen: &ScreenSpec,
        selector: &str,
        viewport: ViewportClass,
        reporter: &Reporter,
    ) -> Result<(Vec<u8>, Option<ClipRect>), SnapshotError> {
        reporter.info(format!("Taking element-based screenshot for selector: {selector}"));

        page.wait_for_selector(selector, self.config.capture_selector_timeout)
            .await?;
        reporter.debug("Waiting for page stability after blocking navigation...");
        sleep(self.config.timings.capture_stability).await;

        let first = self.element_rect(page, selector).await?;
        reporter.info(format!("Element dimensions: {}x{}", first.width, first.height));

        let (width, height) = capture_viewport(&first, screen.height_compensation);
        reporter.info(format!(
            "Setting viewport to {width}x{height} (compensation: {}px)",
            screen.height_compensation
        ));
        page.set_viewport(width, height, 1.0).await?;
        sleep(self.config.timings.viewport_settle).await;

        page.evaluate(&scripts::call(
            scripts::CENTER_ELEMENT,
            &[Value::from(selector), Value::from(height)],
        ))
        .await?;
        sleep(self.config.timings.center_settle).await;

        // Position shifts after resize and scroll; only this reading feeds the crop
        let rect = self.element_rect(page, selector).await?;
        let metrics = page.metrics().await?;
        reporter.info(format!(
            "Final state - viewport: {}x{}, scroll: {}px",
            metrics.viewport_width, metrics.viewport_height, metrics.scroll_y
        ));

        let clip = match screen.crop.margins(viewport) {
            Some(margins) => {
                let clip = compute_clip(&rect, metrics.scroll_y, &margins);
                if clip.is_none() {
                    reporter.warn("Crop margins exceed element size, capturing uncropped");
                }
                clip
            }
            None => None,
        };

        let request = match clip {
            Some(clip) => {
                reporter.info(format!(
                    "Cropping to {}x{} at ({}, {})",
                    clip.width, clip.height, clip.x, clip.y
                ));
                CaptureRequest::clipped(clip)
            }
            None => CaptureRequest::png(false),
        };

        let bytes = page.screenshot(&request).await?;
        reporter.preview(page, "element-final-stable").await;
        Ok((bytes, clip))
    }

    async fn element_rect(&self, page: &dyn PageDriver, selector: &str) -> Result<ElementRect, SnapshotError> {
        let rect = page
            .bounding_box(selector)
            .await?
            .ok_or_else(|| SnapshotError::ElementNotFound(selector.to_string()))?;

        if rect.is_empty() {
            return Err(SnapshotError::Capture(format!(
                "element {selector} has zero area ({}x{})",
                rect.width, rect.height
            )));
        }
        Ok(rect)
    }
}
