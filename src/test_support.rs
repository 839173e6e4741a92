//! Scripted stand-ins for the browser seam
//!
//! `FakePage` models a document with a scroll position, a viewport and a set
//! of positioned elements, and answers the crate's in-page scripts from that
//! model. Every call is appended to a shared [`Journal`] so tests can assert
//! on what the engines did.

use crate::{
    scripts, BrowserLauncher, BrowserSession, CaptureRequest, Credentials, ElementRect, ImageFormat,
    PageDriver, Reporter, RunLog, ScreenshotMode, SnapshotError, ViewportClass,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn reporter(viewport: ViewportClass) -> Reporter {
    Reporter::new(Arc::new(RunLog::new()), "test", ScreenshotMode::FullPage, 60).for_viewport(viewport)
}

#[derive(Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Entries starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }
}

const KNOWN_SCRIPTS: [(&str, &str); 23] = [
    ("MEASURE", scripts::MEASURE),
    ("SCROLL_TO", scripts::SCROLL_TO),
    ("SWEEP_STEP", scripts::SWEEP_STEP),
    ("SCROLL_BY", scripts::SCROLL_BY),
    ("ELEMENT_RECT", scripts::ELEMENT_RECT),
    ("ELEMENT_IN_VIEWPORT", scripts::ELEMENT_IN_VIEWPORT),
    ("SCROLL_ELEMENT_CENTER", scripts::SCROLL_ELEMENT_CENTER),
    ("SCROLL_ELEMENT_SMOOTH", scripts::SCROLL_ELEMENT_SMOOTH),
    ("SYNTHETIC_CLICK", scripts::SYNTHETIC_CLICK),
    ("NEUTRALIZE_OVERLAYS", scripts::NEUTRALIZE_OVERLAYS),
    ("APPLY_STYLES", scripts::APPLY_STYLES),
    ("REMOVE_ELEMENTS", scripts::REMOVE_ELEMENTS),
    ("SHOW_ELEMENTS", scripts::SHOW_ELEMENTS),
    ("SELECT_CONTENT", scripts::SELECT_CONTENT),
    ("INJECT_CSS", scripts::INJECT_CSS),
    ("COMPUTED_STYLES", scripts::COMPUTED_STYLES),
    ("EAGER_LOADING", scripts::EAGER_LOADING),
    ("IMAGE_STATUS", scripts::IMAGE_STATUS),
    ("PREFETCH_BACKGROUNDS", scripts::PREFETCH_BACKGROUNDS),
    ("BLOCK_NAVIGATION", scripts::BLOCK_NAVIGATION),
    ("RESTORE_NAVIGATION", scripts::RESTORE_NAVIGATION),
    ("CENTER_ELEMENT", scripts::CENTER_ELEMENT),
    ("DOCUMENT_READY", scripts::DOCUMENT_READY),
];

/// Splits a [`scripts::call`] expression back into a script name and its arguments
fn identify(script: &str) -> Option<(&'static str, Vec<Value>)> {
    let known = KNOWN_SCRIPTS
        .iter()
        .copied()
        .chain([("RESOURCE_COUNT", scripts::RESOURCE_COUNT)]);

    for (name, function) in known {
        let prefix = format!("({function})(");
        if let Some(rest) = script.strip_prefix(&prefix) {
            let args = rest.strip_suffix(')').unwrap_or(rest);
            let args: Vec<Value> = serde_json::from_str(&format!("[{args}]")).unwrap_or_default();
            return Some((name, args));
        }
    }
    None
}

/// Static description of how fake pages behave
#[derive(Debug, Clone)]
pub struct PageBehavior {
    pub viewport: (u32, u32),
    pub scroll_height: f64,
    pub scroll_y: f64,
    pub elements: HashMap<String, ElementRect>,
    pub growth: Vec<f64>,
    pub stale_device_scale: bool,
    pub fail_native_click: bool,
    pub fail_synthetic_click: bool,
    pub fail_scripts: bool,
    pub network_idle_timeout: bool,
    pub pending_images: u64,
    pub failing_urls: Vec<String>,
    pub vanishing: Vec<String>,
}

impl Default for PageBehavior {
    fn default() -> Self {
        Self {
            viewport: (1920, 1080),
            scroll_height: 2000.0,
            scroll_y: 0.0,
            elements: HashMap::new(),
            growth: Vec::new(),
            stale_device_scale: false,
            fail_native_click: false,
            fail_synthetic_click: false,
            fail_scripts: false,
            network_idle_timeout: false,
            pending_images: 0,
            failing_urls: Vec::new(),
            vanishing: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct FakePageBuilder {
    behavior: PageBehavior,
    journal: Option<Arc<Journal>>,
}

impl FakePageBuilder {
    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.behavior.viewport = (width, height);
        self
    }

    pub fn scroll_height(mut self, height: f64) -> Self {
        self.behavior.scroll_height = height;
        self
    }

    pub fn scroll_y(mut self, y: f64) -> Self {
        self.behavior.scroll_y = y;
        self
    }

    /// Element at document coordinates
    pub fn element(mut self, selector: &str, rect: ElementRect) -> Self {
        self.behavior.elements.insert(selector.to_string(), rect);
        self
    }

    /// Height added each time a sweep step reaches the bottom, one entry per growth
    pub fn growth(mut self, growth: Vec<f64>) -> Self {
        self.behavior.growth = growth;
        self
    }

    /// The first viewport change leaves the device scale at 2
    pub fn stale_device_scale(mut self) -> Self {
        self.behavior.stale_device_scale = true;
        self
    }

    pub fn fail_native_click(mut self) -> Self {
        self.behavior.fail_native_click = true;
        self
    }

    pub fn fail_synthetic_click(mut self) -> Self {
        self.behavior.fail_synthetic_click = true;
        self
    }

    pub fn fail_scripts(mut self) -> Self {
        self.behavior.fail_scripts = true;
        self
    }

    pub fn network_idle_timeout(mut self) -> Self {
        self.behavior.network_idle_timeout = true;
        self
    }

    pub fn pending_images(mut self, count: u64) -> Self {
        self.behavior.pending_images = count;
        self
    }

    /// Navigation to any URL containing `fragment` times out
    pub fn fail_navigation(mut self, fragment: &str) -> Self {
        self.behavior.failing_urls.push(fragment.to_string());
        self
    }

    /// The element is detached right after a selector wait finds it
    pub fn vanishing(mut self, selector: &str) -> Self {
        self.behavior.vanishing.push(selector.to_string());
        self
    }

    pub fn journal(mut self, journal: Arc<Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn behavior(self) -> PageBehavior {
        self.behavior
    }

    pub fn build(self) -> FakePage {
        FakePage::new(self.behavior, self.journal.unwrap_or_default())
    }
}

struct PageState {
    viewport: (u32, u32),
    device_pixel_ratio: f64,
    viewport_changes: usize,
    scroll_x: f64,
    scroll_y: f64,
    scroll_height: f64,
    elements: HashMap<String, ElementRect>,
    growth: VecDeque<f64>,
    blocking: bool,
}

impl PageState {
    fn max_scroll_y(&self) -> f64 {
        (self.scroll_height - self.viewport.1 as f64).max(0.0)
    }

    fn scroll_to(&mut self, x: f64, y: f64) {
        self.scroll_x = x.max(0.0);
        self.scroll_y = y.clamp(0.0, self.max_scroll_y());
    }

    fn relative_rect(&self, selector: &str) -> Option<ElementRect> {
        self.elements.get(selector).map(|rect| ElementRect {
            left: rect.left - self.scroll_x,
            top: rect.top - self.scroll_y,
            ..*rect
        })
    }

    fn center_on(&mut self, selector: &str, viewport_height: f64) -> bool {
        match self.elements.get(selector).copied() {
            Some(rect) => {
                let target = rect.top + rect.height / 2.0 - viewport_height / 2.0;
                self.scroll_to(self.scroll_x, target);
                true
            }
            None => false,
        }
    }
}

pub struct FakePage {
    behavior: PageBehavior,
    state: Mutex<PageState>,
    journal: Arc<Journal>,
}

impl Default for FakePage {
    fn default() -> Self {
        FakePage::builder().build()
    }
}

impl FakePage {
    pub fn builder() -> FakePageBuilder {
        FakePageBuilder::default()
    }

    pub fn new(behavior: PageBehavior, journal: Arc<Journal>) -> Self {
        let state = PageState {
            viewport: behavior.viewport,
            device_pixel_ratio: 1.0,
            viewport_changes: 0,
            scroll_x: 0.0,
            scroll_y: behavior.scroll_y,
            scroll_height: behavior.scroll_height,
            elements: behavior.elements.clone(),
            growth: behavior.growth.iter().copied().collect(),
            blocking: false,
        };

        Self {
            behavior,
            state: Mutex::new(state),
            journal,
        }
    }

    pub fn journal(&self) -> Arc<Journal> {
        self.journal.clone()
    }

    pub fn scroll_position(&self) -> (f64, f64) {
        let state = self.state.lock().unwrap();
        (state.scroll_x, state.scroll_y)
    }

    pub fn set_scroll(&self, x: f64, y: f64) {
        self.state.lock().unwrap().scroll_to(x, y);
    }

    pub fn set_scroll_height(&self, height: f64) {
        self.state.lock().unwrap().scroll_height = height;
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.state.lock().unwrap().viewport
    }

    pub fn navigation_blocked(&self) -> bool {
        self.state.lock().unwrap().blocking
    }

    fn run_script(&self, name: &str, args: &[Value]) -> Result<Value, SnapshotError> {
        let mut state = self.state.lock().unwrap();
        let selector = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
        let number = |index: usize| args.get(index).and_then(Value::as_f64).unwrap_or(0.0);

        let value = match name {
            "MEASURE" => json!({
                "scrollX": state.scroll_x,
                "scrollY": state.scroll_y,
                "scrollHeight": state.scroll_height,
                "viewportWidth": state.viewport.0,
                "viewportHeight": state.viewport.1,
                "devicePixelRatio": state.device_pixel_ratio,
            }),
            "SCROLL_TO" => {
                state.scroll_to(number(0), number(1));
                json!(true)
            }
            "SWEEP_STEP" => {
                state.scroll_to(0.0, number(0));
                if state.scroll_y >= state.max_scroll_y() {
                    if let Some(extra) = state.growth.pop_front() {
                        state.scroll_height += extra;
                    }
                }
                json!(true)
            }
            "SCROLL_BY" => {
                let (x, y) = (state.scroll_x + number(0), state.scroll_y);
                state.scroll_to(x, y);
                json!(true)
            }
            "ELEMENT_RECT" => match state.relative_rect(&selector) {
                Some(rect) => serde_json::to_value(rect)?,
                None => Value::Null,
            },
            "ELEMENT_IN_VIEWPORT" => match state.relative_rect(&selector) {
                Some(rect) => json!(
                    rect.top >= 0.0
                        && rect.left >= 0.0
                        && rect.top + rect.height <= state.viewport.1 as f64
                        && rect.left + rect.width <= state.viewport.0 as f64
                ),
                None => Value::Null,
            },
            "SCROLL_ELEMENT_CENTER" => {
                let height = state.viewport.1 as f64;
                json!(state.center_on(&selector, height))
            }
            "SCROLL_ELEMENT_SMOOTH" => match state.relative_rect(&selector) {
                Some(rect) => {
                    let viewport_height = state.viewport.1 as f64;
                    let x = state.scroll_x;
                    if rect.top < 0.0 {
                        let y = state.scroll_y + rect.top;
                        state.scroll_to(x, y);
                    } else if rect.top + rect.height > viewport_height {
                        let y = state.scroll_y + rect.top + rect.height - viewport_height;
                        state.scroll_to(x, y);
                    }
                    json!(true)
                }
                None => json!(false),
            },
            "SYNTHETIC_CLICK" => {
                if self.behavior.fail_synthetic_click || !state.elements.contains_key(&selector) {
                    return Err(SnapshotError::Page(format!(
                        "Element not found during JS click: {selector}"
                    )));
                }
                json!(true)
            }
            "NEUTRALIZE_OVERLAYS" => json!(0),
            "APPLY_STYLES" | "SHOW_ELEMENTS" => json!(u64::from(state.elements.contains_key(&selector))),
            "REMOVE_ELEMENTS" => json!(u64::from(state.elements.remove(&selector).is_some())),
            "SELECT_CONTENT" => json!(state.elements.contains_key(&selector)),
            "COMPUTED_STYLES" => match state.relative_rect(&selector) {
                Some(rect) => json!({"matches": 1, "rect": rect, "styles": {"display": "block"}}),
                None => Value::Null,
            },
            "IMAGE_STATUS" => json!({
                "total": self.behavior.pending_images,
                "loaded": 0,
                "failed": 0,
                "pending": self.behavior.pending_images,
            }),
            "EAGER_LOADING" | "PREFETCH_BACKGROUNDS" | "RESOURCE_COUNT" => json!(0),
            "CENTER_ELEMENT" => json!(state.center_on(&selector, number(1))),
            _ => json!(true),
        };

        Ok(value)
    }

    fn render(&self, width: u32, height: u32, format: ImageFormat, quality: Option<u8>) -> Result<Vec<u8>, SnapshotError> {
        let image = image::DynamicImage::ImageLuma8(image::GrayImage::new(width, height));
        let output = match format {
            ImageFormat::Png => image::ImageOutputFormat::Png,
            ImageFormat::Jpeg => image::ImageOutputFormat::Jpeg(quality.unwrap_or(80)),
        };

        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, output)?;
        Ok(bytes.into_inner())
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), SnapshotError> {
        self.journal.push(format!("navigate {url}"));

        if self.behavior.failing_urls.iter().any(|fragment| url.contains(fragment.as_str())) {
            return Err(SnapshotError::timeout(format!("navigation to {url}"), timeout));
        }

        self.state.lock().unwrap().scroll_to(0.0, 0.0);
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, SnapshotError> {
        let (name, args) = identify(script).unwrap_or(("script", Vec::new()));
        self.journal.push(format!("evaluate:{name}"));

        if self.behavior.fail_scripts {
            return Err(SnapshotError::Page(format!("{name} threw")));
        }

        if name == "script" {
            return Ok(Value::Null);
        }
        self.run_script(name, &args)
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), SnapshotError> {
        self.journal.push(format!("wait_for_selector {selector}"));

        let mut state = self.state.lock().unwrap();
        if !state.elements.contains_key(selector) {
            return Err(SnapshotError::timeout(format!("selector {selector}"), timeout));
        }
        if self.behavior.vanishing.iter().any(|vanishing| vanishing == selector) {
            state.elements.remove(selector);
        }
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), SnapshotError> {
        self.journal.push(format!("click {selector}"));

        if self.behavior.fail_native_click {
            return Err(SnapshotError::Page(
                "Node is either not visible or not an HTMLElement".to_string(),
            ));
        }
        if !self.state.lock().unwrap().elements.contains_key(selector) {
            return Err(SnapshotError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }

    async fn hover(&self, selector: &str) -> Result<(), SnapshotError> {
        self.journal.push(format!("hover {selector}"));

        if !self.state.lock().unwrap().elements.contains_key(selector) {
            return Err(SnapshotError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), SnapshotError> {
        self.journal.push(format!("type_text {text}"));
        Ok(())
    }

    async fn mouse_click(&self, x: f64, y: f64) -> Result<(), SnapshotError> {
        self.journal.push(format!("mouse_click {x},{y}"));
        Ok(())
    }

    async fn screenshot(&self, request: &CaptureRequest) -> Result<Vec<u8>, SnapshotError> {
        let (kind, width, height) = {
            let state = self.state.lock().unwrap();
            match (&request.clip, request.full_page) {
                (Some(clip), _) => ("clip", clip.width.round() as u32, clip.height.round() as u32),
                (None, true) => ("full", state.viewport.0, state.scroll_height.round() as u32),
                (None, false) => ("viewport", state.viewport.0, state.viewport.1),
            }
        };

        let label = match request.format {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => kind,
        };
        self.journal.push(format!("screenshot {label}"));

        self.render(width, height, request.format, request.quality)
    }

    async fn set_viewport(&self, width: u32, height: u32, scale_factor: f64) -> Result<(), SnapshotError> {
        self.journal.push(format!("set_viewport {width}x{height}"));

        let mut state = self.state.lock().unwrap();
        state.viewport_changes += 1;
        state.viewport = (width, height);
        state.device_pixel_ratio = if self.behavior.stale_device_scale && state.viewport_changes == 1 {
            2.0
        } else {
            scale_factor
        };
        let (x, y) = (state.scroll_x, state.scroll_y);
        state.scroll_to(x, y);
        Ok(())
    }

    async fn set_navigation_blocking(&self, enabled: bool) -> Result<(), SnapshotError> {
        self.journal.push(format!("set_navigation_blocking {enabled}"));
        self.state.lock().unwrap().blocking = enabled;
        Ok(())
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), SnapshotError> {
        self.journal.push("wait_for_network_idle");

        if self.behavior.network_idle_timeout {
            return Err(SnapshotError::timeout("network idle", timeout));
        }
        Ok(())
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<(), SnapshotError> {
        self.journal.push(format!("authenticate {}", credentials.username));
        Ok(())
    }

    async fn set_user_agent(&self, _user_agent: &str) -> Result<(), SnapshotError> {
        self.journal.push("set_user_agent");
        Ok(())
    }

    async fn close(&self) -> Result<(), SnapshotError> {
        self.journal.push("close_page");
        Ok(())
    }
}

pub struct FakeBrowser {
    instance_id: usize,
    behavior: PageBehavior,
    journal: Arc<Journal>,
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn new_page(&self) -> Result<Box<dyn PageDriver>, SnapshotError> {
        self.journal.push(format!("new_page {}", self.instance_id));
        Ok(Box::new(FakePage::new(self.behavior.clone(), self.journal.clone())))
    }

    async fn close(&self) -> Result<(), SnapshotError> {
        self.journal.push(format!("close_browser {}", self.instance_id));
        Ok(())
    }
}

/// Launches [`FakeBrowser`]s that share one behavior and one journal
pub struct FakeLauncher {
    behavior: PageBehavior,
    journal: Arc<Journal>,
}

impl FakeLauncher {
    pub fn new(behavior: PageBehavior) -> Self {
        Self {
            behavior,
            journal: Arc::new(Journal::default()),
        }
    }

    pub fn journal(&self) -> Arc<Journal> {
        self.journal.clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, instance_id: usize) -> Result<Box<dyn BrowserSession>, SnapshotError> {
        self.journal.push(format!("launch {instance_id}"));
        Ok(Box::new(FakeBrowser {
            instance_id,
            behavior: self.behavior.clone(),
            journal: self.journal.clone(),
        }))
    }
}
