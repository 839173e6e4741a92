//! Page automation seam
//!
//! The orchestration engines never talk to Chrome directly. They drive a
//! [`PageDriver`], obtained from a [`BrowserSession`] that a [`BrowserLauncher`]
//! starts for one screen. The production implementation lives in [`crate::cdp`].

use crate::{scripts, Credentials, SnapshotError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Element geometry in CSS pixels, relative to the viewport
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct ElementRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl ElementRect {
    pub fn center(&self) -> (f64, f64) {
        (self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Document-level clip region handed to the capture primitive
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClipRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Scroll and size readings of the current document
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetrics {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub scroll_height: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub device_pixel_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

/// Parameters for a single raw screenshot
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub full_page: bool,
    pub clip: Option<ClipRect>,
    pub format: ImageFormat,
    pub quality: Option<u8>,
}

impl CaptureRequest {
    pub fn png(full_page: bool) -> Self {
        Self {
            full_page,
            clip: None,
            format: ImageFormat::Png,
            quality: None,
        }
    }

    pub fn clipped(clip: ClipRect) -> Self {
        Self {
            full_page: false,
            clip: Some(clip),
            format: ImageFormat::Png,
            quality: None,
        }
    }

    pub fn jpeg_preview(full_page: bool, quality: u8) -> Self {
        Self {
            full_page,
            clip: None,
            format: ImageFormat::Jpeg,
            quality: Some(quality),
        }
    }
}

/// Browser-control primitives for a single page
///
/// One page is owned by exactly one in-flight task; implementations need not
/// serialize concurrent calls on the same page.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigates and waits for DOM readiness, bounded by `timeout`
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), SnapshotError>;

    /// Evaluates `script` in page context, awaiting returned promises
    async fn evaluate(&self, script: &str) -> Result<Value, SnapshotError>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), SnapshotError>;

    /// Native click on the first element matching `selector`
    async fn click(&self, selector: &str) -> Result<(), SnapshotError>;

    async fn hover(&self, selector: &str) -> Result<(), SnapshotError>;

    /// Inserts `text` at the focused element, replacing any selection
    async fn type_text(&self, text: &str) -> Result<(), SnapshotError>;

    /// Raw pointer click at viewport coordinates
    async fn mouse_click(&self, x: f64, y: f64) -> Result<(), SnapshotError>;

    async fn screenshot(&self, request: &CaptureRequest) -> Result<Vec<u8>, SnapshotError>;

    async fn set_viewport(&self, width: u32, height: u32, scale_factor: f64) -> Result<(), SnapshotError>;

    /// Toggles network-layer interception that aborts main-frame navigations
    async fn set_navigation_blocking(&self, enabled: bool) -> Result<(), SnapshotError>;

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), SnapshotError>;

    async fn authenticate(&self, credentials: &Credentials) -> Result<(), SnapshotError>;

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), SnapshotError>;

    async fn close(&self) -> Result<(), SnapshotError>;

    /// Bounding box of the first match, `None` when nothing matches
    async fn bounding_box(&self, selector: &str) -> Result<Option<ElementRect>, SnapshotError> {
        let value = self
            .evaluate(&scripts::call(scripts::ELEMENT_RECT, &[Value::from(selector)]))
            .await?;

        if value.is_null() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_value(value)?))
    }

    async fn metrics(&self) -> Result<PageMetrics, SnapshotError> {
        let value = self.evaluate(&scripts::call(scripts::MEASURE, &[])).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn scroll_to(&self, x: f64, y: f64) -> Result<(), SnapshotError> {
        self.evaluate(&scripts::call(scripts::SCROLL_TO, &[Value::from(x), Value::from(y)]))
            .await?;
        Ok(())
    }
}

/// One isolated browser instance, owned by a single screen job
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn PageDriver>, SnapshotError>;

    async fn close(&self) -> Result<(), SnapshotError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, instance_id: usize) -> Result<Box<dyn BrowserSession>, SnapshotError>;
}
