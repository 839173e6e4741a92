//! Screen definitions as authored by the configuration UI
//!
//! A screen is one URL captured for up to two viewport classes, with its own
//! action lists and screenshot settings. Field names follow the camelCase JSON
//! exported by the authoring UI so saved configurations deserialize unchanged.

use crate::{lenient_f64, lenient_i64, Action, ActionSpec, PageMetrics, SnapshotError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rendering configuration class a screen is captured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewportClass {
    Desktop,
    Mobile,
}

impl ViewportClass {
    pub const ALL: [ViewportClass; 2] = [ViewportClass::Desktop, ViewportClass::Mobile];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewportClass::Desktop => "desktop",
            ViewportClass::Mobile => "mobile",
        }
    }

    /// Capitalized name used in log lines and preview events
    pub fn label(&self) -> &'static str {
        match self {
            ViewportClass::Desktop => "Desktop",
            ViewportClass::Mobile => "Mobile",
        }
    }
}

impl fmt::Display for ViewportClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the final screenshot of a screen is framed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum ScreenshotMode {
    /// Whole scrollable document
    #[default]
    #[serde(rename = "Full Page")]
    FullPage,
    /// Only the visible viewport at the current scroll position
    #[serde(rename = "Viewport Only")]
    ViewportOnly,
    /// Viewport resized and cropped to one element's geometry
    #[serde(rename = "Screenshot of Selector")]
    SelectorBounded,
}

impl ScreenshotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenshotMode::FullPage => "Full Page",
            ScreenshotMode::ViewportOnly => "Viewport Only",
            ScreenshotMode::SelectorBounded => "Screenshot of Selector",
        }
    }
}

/// Pixel margins trimmed from an element-bounded capture
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct CropMargins {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

/// Crop settings, configured independently for each viewport class
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CropConfig {
    #[serde(default)]
    pub enable_crop: bool,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub desktop_crop_left: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub desktop_crop_right: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub desktop_crop_top: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub desktop_crop_bottom: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub mobile_crop_left: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub mobile_crop_right: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub mobile_crop_top: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub mobile_crop_bottom: f64,
}

impl CropConfig {
    /// Margins for `viewport`, or `None` when cropping is disabled
    pub fn margins(&self, viewport: ViewportClass) -> Option<CropMargins> {
        if !self.enable_crop {
            return None;
        }

        Some(match viewport {
            ViewportClass::Desktop => CropMargins {
                left: self.desktop_crop_left,
                right: self.desktop_crop_right,
                top: self.desktop_crop_top,
                bottom: self.desktop_crop_bottom,
            },
            ViewportClass::Mobile => CropMargins {
                left: self.mobile_crop_left,
                right: self.mobile_crop_right,
                top: self.mobile_crop_top,
                bottom: self.mobile_crop_bottom,
            },
        })
    }
}

/// One logical page to capture
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenSpec {
    #[serde(default = "new_screen_id")]
    pub id: String,

    /// Display name, also used in output filenames
    #[serde(default)]
    pub file_name: String,

    /// Absolute URL, or a path relative to the run's base URL
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub screenshot_type: ScreenshotMode,

    #[serde(default, rename = "selectorToScreenshot")]
    pub selector: Option<String>,

    /// Extra pixels added to the element height when sizing the capture viewport
    #[serde(default, deserialize_with = "lenient_i64")]
    pub height_compensation: i64,

    #[serde(default = "default_enabled")]
    pub enable_desktop: bool,

    #[serde(default = "default_enabled")]
    pub enable_mobile: bool,

    #[serde(flatten)]
    pub crop: CropConfig,

    #[serde(default)]
    pub shared_actions: Vec<ActionSpec>,

    #[serde(default)]
    pub desktop_actions: Vec<ActionSpec>,

    #[serde(default)]
    pub mobile_actions: Vec<ActionSpec>,
}

fn new_screen_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_enabled() -> bool {
    true
}

impl Default for ScreenSpec {
    fn default() -> Self {
        Self {
            id: new_screen_id(),
            file_name: String::new(),
            url: String::new(),
            screenshot_type: ScreenshotMode::default(),
            selector: None,
            height_compensation: 0,
            enable_desktop: true,
            enable_mobile: true,
            crop: CropConfig::default(),
            shared_actions: Vec::new(),
            desktop_actions: Vec::new(),
            mobile_actions: Vec::new(),
        }
    }
}

impl ScreenSpec {
    pub fn name(&self) -> &str {
        if self.file_name.trim().is_empty() {
            &self.id
        } else {
            &self.file_name
        }
    }

    pub fn is_enabled(&self, viewport: ViewportClass) -> bool {
        match viewport {
            ViewportClass::Desktop => self.enable_desktop,
            ViewportClass::Mobile => self.enable_mobile,
        }
    }

    pub fn enabled_viewports(&self) -> Vec<ViewportClass> {
        ViewportClass::ALL
            .into_iter()
            .filter(|viewport| self.is_enabled(*viewport))
            .collect()
    }

    /// Viewport-specific action list; shared actions are separate
    pub fn viewport_actions(&self, viewport: ViewportClass) -> &[ActionSpec] {
        match viewport {
            ViewportClass::Desktop => &self.desktop_actions,
            ViewportClass::Mobile => &self.mobile_actions,
        }
    }

    /// Selector for element-bounded capture, with blank values treated as absent
    pub fn capture_selector(&self) -> Option<&str> {
        self.selector
            .as_deref()
            .map(str::trim)
            .filter(|selector| !selector.is_empty())
    }

    /// Checks screen settings and every authored action without touching a page
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.screenshot_type == ScreenshotMode::SelectorBounded && self.capture_selector().is_none() {
            return Err(SnapshotError::validation(
                ScreenshotMode::SelectorBounded.as_str(),
                format!("screen '{}' requires a selector", self.name()),
            ));
        }

        for spec in self
            .shared_actions
            .iter()
            .chain(&self.desktop_actions)
            .chain(&self.mobile_actions)
        {
            Action::try_from(spec)?;
        }

        Ok(())
    }
}

/// Scroll position recorded by a scroll action for one viewport of one screen
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollState {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub page_height: f64,
    pub viewport_height: f64,
    pub captured_at: DateTime<Utc>,
}

impl ScrollState {
    pub fn from_metrics(metrics: &PageMetrics) -> Self {
        Self {
            scroll_x: metrics.scroll_x,
            scroll_y: metrics.scroll_y,
            page_height: metrics.scroll_height,
            viewport_height: metrics.viewport_height,
            captured_at: Utc::now(),
        }
    }
}
