//! Action Engine
//!
//! Authored steps arrive as loosely typed [`ActionSpec`]s. Each is validated
//! into a typed [`Action`] before anything touches the page, then executed
//! by the [`ActionEngine`] that belongs to one screen.

use crate::{
    parse_leading_int, scripts, Config, Metrics, PageDriver, Reporter, ScrollState, SnapshotError,
    ViewportClass,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

pub const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

/// Backdrops neutralized before clicking on a mobile viewport
pub const MOBILE_OVERLAY_SELECTORS: [&str; 6] = [
    ".modal-backdrop",
    ".overlay",
    ".popup-overlay",
    ".mobile-menu-backdrop",
    "[data-dismiss=\"modal\"]",
    ".close-button",
];

const HEIGHT_CHANGE_TOLERANCE: f64 = 100.0;
const RESTORE_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    Delay,
    AdjustStyling,
    ExecuteJs,
    FillForm,
    RemoveElement,
    ShowElement,
    ClickSelector,
    HoverSelector,
    ScrollIntoView,
    ScrollHorizontally,
    DebugElementStyles,
    InjectCss,
    Unknown(String),
}

impl ActionKind {
    pub const ALL: [ActionKind; 12] = [
        ActionKind::Delay,
        ActionKind::AdjustStyling,
        ActionKind::ExecuteJs,
        ActionKind::FillForm,
        ActionKind::RemoveElement,
        ActionKind::ShowElement,
        ActionKind::ClickSelector,
        ActionKind::HoverSelector,
        ActionKind::ScrollIntoView,
        ActionKind::ScrollHorizontally,
        ActionKind::DebugElementStyles,
        ActionKind::InjectCss,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Delay => "Delay",
            ActionKind::AdjustStyling => "Adjust Styling",
            ActionKind::ExecuteJs => "Execute JS",
            ActionKind::FillForm => "Fill Form",
            ActionKind::RemoveElement => "Remove Element",
            ActionKind::ShowElement => "Show Element",
            ActionKind::ClickSelector => "Click Selector",
            ActionKind::HoverSelector => "Hover Selector",
            ActionKind::ScrollIntoView => "Scroll Into View",
            ActionKind::ScrollHorizontally => "Scroll Horizontally",
            ActionKind::DebugElementStyles => "Debug Element Styles",
            ActionKind::InjectCss => "Inject CSS",
            ActionKind::Unknown(name) => name,
        }
    }

    /// Lowercase, dash-separated name used in preview step labels
    pub fn slug(&self) -> String {
        self.as_str()
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl From<String> for ActionKind {
    fn from(name: String) -> Self {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .unwrap_or(ActionKind::Unknown(name))
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step as authored: a kind plus free-form fields
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ActionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub kind: ActionKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Style map, as an object or a JSON string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles: Option<Value>,
}

impl ActionSpec {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            id: None,
            kind,
            selector: None,
            value: None,
            styles: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_styles(mut self, styles: impl Into<Value>) -> Self {
        self.styles = Some(styles.into());
        self
    }

    fn selector_field(&self) -> Option<String> {
        self.selector
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// `value` as text; blank strings and non-scalar values count as missing
    fn value_text(&self) -> Option<String> {
        match self.value.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn required_value(&self, what: &str) -> Result<String, SnapshotError> {
        self.value_text()
            .ok_or_else(|| SnapshotError::validation(self.kind.as_str(), format!("{what} is required")))
    }

    fn required_target(&self) -> Result<String, SnapshotError> {
        self.value_text()
            .map(|s| s.trim().to_string())
            .or_else(|| self.selector_field())
            .ok_or_else(|| SnapshotError::validation(self.kind.as_str(), "selector is required"))
    }

    fn style_map(&self) -> Result<Map<String, Value>, SnapshotError> {
        let kind = self.kind.as_str();
        let parsed = match self.styles.as_ref().or(self.value.as_ref()) {
            Some(Value::Object(map)) => return Ok(map.clone()),
            Some(Value::String(raw)) if !raw.trim().is_empty() => serde_json::from_str::<Value>(raw)
                .map_err(|e| {
                    SnapshotError::validation(
                        kind,
                        format!("invalid JSON for styles, expected {{\"property\": \"value\"}}: {e}"),
                    )
                })?,
            _ => return Err(SnapshotError::validation(kind, "styles are required")),
        };

        match parsed {
            Value::Object(map) => Ok(map),
            other => Err(SnapshotError::validation(
                kind,
                format!("styles must be a JSON object, got {other}"),
            )),
        }
    }
}

/// A validated step, ready to run
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Delay { duration: Duration },
    AdjustStyling { selector: String, styles: Map<String, Value> },
    ExecuteJs { script: String },
    FillForm { selector: String, value: String },
    RemoveElement { selector: String },
    ShowElement { selector: String },
    Click { selector: String },
    Hover { selector: String },
    ScrollIntoView { selector: String },
    ScrollHorizontally { delta: i64 },
    DebugStyles { selector: String },
    InjectCss { css: String },
}

impl TryFrom<&ActionSpec> for Action {
    type Error = SnapshotError;

    fn try_from(spec: &ActionSpec) -> Result<Self, Self::Error> {
        let action = match &spec.kind {
            ActionKind::Delay => {
                let millis = spec
                    .value_text()
                    .and_then(|v| parse_leading_int(&v))
                    .filter(|ms| *ms != 0);
                Action::Delay {
                    duration: millis.map_or(DEFAULT_DELAY, |ms| Duration::from_millis(ms.max(0) as u64)),
                }
            }
            ActionKind::AdjustStyling => {
                let selector = spec
                    .selector_field()
                    .ok_or_else(|| SnapshotError::validation(spec.kind.as_str(), "selector is required"))?;
                Action::AdjustStyling {
                    selector,
                    styles: spec.style_map()?,
                }
            }
            ActionKind::ExecuteJs => Action::ExecuteJs {
                script: spec.required_value("JavaScript code")?,
            },
            ActionKind::FillForm => {
                let selector = spec
                    .selector_field()
                    .ok_or_else(|| SnapshotError::validation(spec.kind.as_str(), "selector is required"))?;
                Action::FillForm {
                    selector,
                    value: spec.required_value("value")?,
                }
            }
            ActionKind::RemoveElement => Action::RemoveElement {
                selector: spec.required_target()?,
            },
            ActionKind::ShowElement => Action::ShowElement {
                selector: spec.required_target()?,
            },
            ActionKind::ClickSelector => Action::Click {
                selector: spec.required_target()?,
            },
            ActionKind::HoverSelector => Action::Hover {
                selector: spec.required_target()?,
            },
            ActionKind::ScrollIntoView => Action::ScrollIntoView {
                selector: spec.required_target()?,
            },
            ActionKind::ScrollHorizontally => Action::ScrollHorizontally {
                delta: spec
                    .value_text()
                    .and_then(|v| parse_leading_int(&v))
                    .unwrap_or(0),
            },
            ActionKind::DebugElementStyles => Action::DebugStyles {
                selector: spec.required_target()?,
            },
            ActionKind::InjectCss => Action::InjectCss {
                css: spec.required_value("CSS")?,
            },
            ActionKind::Unknown(name) => {
                return Err(SnapshotError::validation(
                    name.as_str(),
                    "unknown action type",
                ))
            }
        };

        Ok(action)
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Delay { .. } => ActionKind::Delay,
            Action::AdjustStyling { .. } => ActionKind::AdjustStyling,
            Action::ExecuteJs { .. } => ActionKind::ExecuteJs,
            Action::FillForm { .. } => ActionKind::FillForm,
            Action::RemoveElement { .. } => ActionKind::RemoveElement,
            Action::ShowElement { .. } => ActionKind::ShowElement,
            Action::Click { .. } => ActionKind::ClickSelector,
            Action::Hover { .. } => ActionKind::HoverSelector,
            Action::ScrollIntoView { .. } => ActionKind::ScrollIntoView,
            Action::ScrollHorizontally { .. } => ActionKind::ScrollHorizontally,
            Action::DebugStyles { .. } => ActionKind::DebugElementStyles,
            Action::InjectCss { .. } => ActionKind::InjectCss,
        }
    }

    /// Whether the step visibly changes the page and earns a preview
    pub fn is_significant(&self) -> bool {
        matches!(
            self,
            Action::AdjustStyling { .. }
                | Action::ExecuteJs { .. }
                | Action::RemoveElement { .. }
                | Action::ShowElement { .. }
                | Action::ScrollIntoView { .. }
                | Action::InjectCss { .. }
        )
    }
}

/// Validates a whole list up front, preserving authored order
pub fn validate_actions(specs: &[ActionSpec]) -> Result<Vec<Action>, SnapshotError> {
    specs.iter().map(Action::try_from).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickTier {
    Native,
    Synthetic,
    Pointer,
}

impl ClickTier {
    pub const LADDER: [ClickTier; 3] = [ClickTier::Native, ClickTier::Synthetic, ClickTier::Pointer];
}

impl fmt::Display for ClickTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClickTier::Native => "native",
            ClickTier::Synthetic => "synthetic DOM",
            ClickTier::Pointer => "pointer",
        })
    }
}

/// How the end of the action phase left the scroll position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOutcome {
    /// No state recorded; scrolled to the origin
    Reset,
    /// Scrolled back to the recorded position
    Restored,
    /// Already within tolerance of the recorded position
    InPlace,
    /// Document height drifted too far for the recorded position to be meaningful
    HeightChanged,
}

/// Executes actions for one screen and owns its per-viewport scroll state
pub struct ActionEngine {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    scroll_states: DashMap<ViewportClass, ScrollState>,
}

impl ActionEngine {
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            metrics,
            scroll_states: DashMap::new(),
        }
    }

    pub fn scroll_state(&self, viewport: ViewportClass) -> Option<ScrollState> {
        self.scroll_states.get(&viewport).map(|entry| *entry)
    }

    pub fn clear_scroll_state(&self, viewport: ViewportClass) {
        self.scroll_states.remove(&viewport);
    }

    /// Validates `spec`, then runs it
    pub async fn execute(
        &self,
        page: &dyn PageDriver,
        spec: &ActionSpec,
        viewport: ViewportClass,
        reporter: &Reporter,
    ) -> Result<(), SnapshotError> {
        let action = Action::try_from(spec).map_err(|e| {
            reporter.warn(format!("Error executing {}: {}", spec.kind, e));
            e
        })?;
        self.run(page, &action, viewport, reporter).await
    }

    /// Runs `specs` in order, stopping at the first failure
    ///
    /// The whole list is validated before the first step runs.
    pub async fn execute_list(
        &self,
        page: &dyn PageDriver,
        specs: &[ActionSpec],
        label: &str,
        viewport: ViewportClass,
        reporter: &Reporter,
    ) -> Result<(), SnapshotError> {
        if specs.is_empty() {
            reporter.debug(format!("No {label} actions to execute"));
            return Ok(());
        }

        let actions = validate_actions(specs).map_err(|e| {
            reporter.warn(format!("Invalid {label} action: {e}"));
            e
        })?;

        reporter.info(format!("Executing {} {} action(s)", actions.len(), label));
        for (index, action) in actions.iter().enumerate() {
            self.run(page, action, viewport, reporter).await?;

            if action.is_significant() {
                let step = format!("action-{}-{}", index + 1, action.kind().slug());
                reporter.preview(page, &step).await;
            }
        }

        Ok(())
    }

    pub async fn run(
        &self,
        page: &dyn PageDriver,
        action: &Action,
        viewport: ViewportClass,
        reporter: &Reporter,
    ) -> Result<(), SnapshotError> {
        reporter.info(format!("Executing: {}", action.kind()));

        let result = self.dispatch(page, action, viewport, reporter).await;
        self.metrics.record_action(result.is_ok());

        result.map_err(|e| {
            let kind = action.kind();
            reporter.warn(format!("Error executing {kind}: {e}"));
            SnapshotError::action(kind.as_str(), e)
        })
    }

    async fn dispatch(
        &self,
        page: &dyn PageDriver,
        action: &Action,
        viewport: ViewportClass,
        reporter: &Reporter,
    ) -> Result<(), SnapshotError> {
        match action {
            Action::Delay { duration } => {
                sleep(*duration).await;
            }
            Action::AdjustStyling { selector, styles } => {
                let count = page
                    .evaluate(&scripts::call(
                        scripts::APPLY_STYLES,
                        &[Value::from(selector.as_str()), Value::Object(styles.clone())],
                    ))
                    .await?;
                self.log_matches(reporter, selector, &count);
            }
            Action::ExecuteJs { script } => {
                page.evaluate(script).await?;
            }
            Action::FillForm { selector, value } => {
                page.wait_for_selector(selector, self.config.selector_timeout)
                    .await?;
                let selected = page
                    .evaluate(&scripts::call(scripts::SELECT_CONTENT, &[Value::from(selector.as_str())]))
                    .await?;
                if selected != Value::Bool(true) {
                    return Err(SnapshotError::ElementNotFound(selector.clone()));
                }
                page.type_text(value).await?;
            }
            Action::RemoveElement { selector } => {
                let count = page
                    .evaluate(&scripts::call(scripts::REMOVE_ELEMENTS, &[Value::from(selector.as_str())]))
                    .await?;
                self.log_matches(reporter, selector, &count);
            }
            Action::ShowElement { selector } => {
                let count = page
                    .evaluate(&scripts::call(scripts::SHOW_ELEMENTS, &[Value::from(selector.as_str())]))
                    .await?;
                self.log_matches(reporter, selector, &count);
            }
            Action::Click { selector } => {
                self.click(page, selector, viewport, reporter).await?;
            }
            Action::Hover { selector } => {
                page.wait_for_selector(selector, self.config.selector_timeout)
                    .await?;
                page.hover(selector).await?;
            }
            Action::ScrollIntoView { selector } => {
                page.wait_for_selector(selector, self.config.selector_timeout)
                    .await?;
                page.evaluate(&scripts::call(
                    scripts::SCROLL_ELEMENT_SMOOTH,
                    &[Value::from(selector.as_str())],
                ))
                .await?;
                sleep(self.config.timings.scroll_settle).await;

                let state = self.record_scroll_state(page, viewport).await?;
                reporter.info(format!(
                    "Scroll Into View completed. Stored position: {}px (total height: {}px)",
                    state.scroll_y, state.page_height
                ));
            }
            Action::ScrollHorizontally { delta } => {
                page.evaluate(&scripts::call(scripts::SCROLL_BY, &[Value::from(*delta)]))
                    .await?;
                sleep(self.config.timings.horizontal_scroll_settle).await;

                let state = self.record_scroll_state(page, viewport).await?;
                reporter.info(format!(
                    "Horizontal scroll completed. Position: ({}, {})",
                    state.scroll_x, state.scroll_y
                ));
            }
            Action::DebugStyles { selector } => {
                let details = page
                    .evaluate(&scripts::call(scripts::COMPUTED_STYLES, &[Value::from(selector.as_str())]))
                    .await?;
                if details.is_null() {
                    reporter.info(format!("Debug styles: no element matches {selector}"));
                } else {
                    reporter.info(format!("Debug styles for {selector}: {details}"));
                }
            }
            Action::InjectCss { css } => {
                page.evaluate(&scripts::call(scripts::INJECT_CSS, &[Value::from(css.as_str())]))
                    .await?;
            }
        }

        Ok(())
    }

    fn log_matches(&self, reporter: &Reporter, selector: &str, count: &Value) {
        match count.as_u64() {
            Some(0) => reporter.info(format!("No elements found for selector: {selector}")),
            Some(n) => reporter.debug(format!("{n} element(s) matched {selector}")),
            None => {}
        }
    }

    async fn record_scroll_state(
        &self,
        page: &dyn PageDriver,
        viewport: ViewportClass,
    ) -> Result<ScrollState, SnapshotError> {
        let state = ScrollState::from_metrics(&page.metrics().await?);
        self.scroll_states.insert(viewport, state);
        Ok(state)
    }

    async fn click(
        &self,
        page: &dyn PageDriver,
        selector: &str,
        viewport: ViewportClass,
        reporter: &Reporter,
    ) -> Result<ClickTier, SnapshotError> {
        page.wait_for_selector(selector, self.config.click_timeout)
            .await?;

        if viewport == ViewportClass::Mobile {
            self.neutralize_overlays(page, reporter).await;
        }

        let in_view = page
            .evaluate(&scripts::call(scripts::ELEMENT_IN_VIEWPORT, &[Value::from(selector)]))
            .await?;
        if in_view == Value::Bool(false) {
            reporter.debug(format!("Scrolling {selector} into view before click"));
            page.evaluate(&scripts::call(scripts::SCROLL_ELEMENT_CENTER, &[Value::from(selector)]))
                .await?;
            sleep(self.config.timings.click_scroll_settle).await;
        }

        let tier = self.click_ladder(page, selector, reporter).await?;
        reporter.info(format!("Clicked {selector} via {tier} click"));
        sleep(self.config.timings.click_settle).await;
        Ok(tier)
    }

    /// Tries each click tier in turn; only the last tier's failure is returned
    async fn click_ladder(
        &self,
        page: &dyn PageDriver,
        selector: &str,
        reporter: &Reporter,
    ) -> Result<ClickTier, SnapshotError> {
        let mut last_error = None;

        for tier in ClickTier::LADDER {
            if tier != ClickTier::Native {
                self.metrics.record_click_fallback(tier == ClickTier::Pointer);
            }

            match self.attempt_click(page, selector, tier).await {
                Ok(()) => return Ok(tier),
                Err(e) => {
                    reporter.warn(format!("{tier} click failed for {selector}: {e}"));
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SnapshotError::ElementNotFound(selector.to_string())))
    }

    async fn attempt_click(
        &self,
        page: &dyn PageDriver,
        selector: &str,
        tier: ClickTier,
    ) -> Result<(), SnapshotError> {
        match tier {
            ClickTier::Native => page.click(selector).await,
            ClickTier::Synthetic => page
                .evaluate(&scripts::call(scripts::SYNTHETIC_CLICK, &[Value::from(selector)]))
                .await
                .map(|_| ()),
            ClickTier::Pointer => {
                let rect = page
                    .bounding_box(selector)
                    .await?
                    .filter(|rect| !rect.is_empty())
                    .ok_or_else(|| SnapshotError::ElementNotFound(selector.to_string()))?;
                let (x, y) = rect.center();
                page.mouse_click(x, y).await
            }
        }
    }

    async fn neutralize_overlays(&self, page: &dyn PageDriver, reporter: &Reporter) {
        let selectors = Value::from(MOBILE_OVERLAY_SELECTORS.to_vec());
        match page
            .evaluate(&scripts::call(scripts::NEUTRALIZE_OVERLAYS, &[selectors]))
            .await
        {
            Ok(count) if count.as_u64().unwrap_or(0) > 0 => {
                reporter.debug(format!("Neutralized {count} mobile overlay(s)"));
            }
            Ok(_) => {}
            Err(e) => reporter.debug(format!("Overlay handling skipped: {e}")),
        }
    }

    /// Restores the recorded scroll position for `viewport`, or resets to the origin
    pub async fn restore_scroll(
        &self,
        page: &dyn PageDriver,
        viewport: ViewportClass,
        reporter: &Reporter,
    ) -> Result<ScrollOutcome, SnapshotError> {
        let Some(stored) = self.scroll_state(viewport) else {
            reporter.info("No stored scroll position, resetting to top");
            page.scroll_to(0.0, 0.0).await?;
            sleep(self.config.timings.reset_settle).await;
            return Ok(ScrollOutcome::Reset);
        };

        sleep(self.config.timings.pre_restore_settle).await;
        let current = page.metrics().await?;
        if (current.scroll_height - stored.page_height).abs() > HEIGHT_CHANGE_TOLERANCE {
            reporter.info(format!(
                "Page height changed significantly ({}px -> {}px), skipping restore",
                stored.page_height, current.scroll_height
            ));
            return Ok(ScrollOutcome::HeightChanged);
        }

        let max_y = (current.scroll_height - current.viewport_height).max(0.0);
        let target_y = stored.scroll_y.min(max_y).max(0.0);
        let target_x = stored.scroll_x.max(0.0);

        let needs_restore = (current.scroll_y - target_y).abs() > RESTORE_THRESHOLD
            || (current.scroll_x - target_x).abs() > RESTORE_THRESHOLD;
        if !needs_restore {
            reporter.debug("Scroll position already in place");
            return Ok(ScrollOutcome::InPlace);
        }

        reporter.info(format!(
            "Restoring scroll position from ({}, {}) to ({}, {})",
            current.scroll_x, current.scroll_y, target_x, target_y
        ));
        page.scroll_to(target_x, target_y).await?;
        sleep(self.config.timings.restore_settle).await;

        let restored = page.metrics().await?;
        reporter.debug(format!(
            "Scroll position after restore: ({}, {})",
            restored.scroll_x, restored.scroll_y
        ));
        Ok(ScrollOutcome::Restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{reporter, FakePage};
    use crate::ElementRect;
    use serde_json::json;

    fn engine() -> ActionEngine {
        ActionEngine::new(Arc::new(Config::default()), Arc::new(Metrics::new()))
    }

    fn button() -> ElementRect {
        ElementRect {
            left: 100.0,
            top: 200.0,
            width: 80.0,
            height: 40.0,
        }
    }

    #[test]
    fn test_kind_names_round_trip_through_serde() {
        let spec: ActionSpec = serde_json::from_value(json!({"type": "Scroll Into View", "value": "#faq"})).unwrap();
        assert_eq!(spec.kind, ActionKind::ScrollIntoView);
        assert_eq!(spec.kind.slug(), "scroll-into-view");

        let spec: ActionSpec = serde_json::from_value(json!({"type": "Teleport"})).unwrap();
        assert_eq!(spec.kind, ActionKind::Unknown("Teleport".to_string()));
        let err = Action::try_from(&spec).unwrap_err();
        assert_eq!(err.to_string(), "Teleport: unknown action type");
    }

    #[test]
    fn test_delay_defaults() {
        let delay = |value: Option<Value>| {
            let mut spec = ActionSpec::new(ActionKind::Delay);
            spec.value = value;
            match Action::try_from(&spec).unwrap() {
                Action::Delay { duration } => duration,
                other => panic!("unexpected action: {other:?}"),
            }
        };

        assert_eq!(delay(None), DEFAULT_DELAY);
        assert_eq!(delay(Some(json!("soon"))), DEFAULT_DELAY);
        assert_eq!(delay(Some(json!("0"))), DEFAULT_DELAY);
        assert_eq!(delay(Some(json!("250"))), Duration::from_millis(250));
        assert_eq!(delay(Some(json!(750))), Duration::from_millis(750));
        assert_eq!(delay(Some(json!("-5"))), Duration::ZERO);
    }

    #[test]
    fn test_style_map_accepts_object_or_json_string() {
        let object = ActionSpec::new(ActionKind::AdjustStyling)
            .with_selector(".hero")
            .with_styles(json!({"display": "none"}));
        let string = ActionSpec::new(ActionKind::AdjustStyling)
            .with_selector(".hero")
            .with_styles(r#"{"display": "none"}"#);

        assert_eq!(Action::try_from(&object).unwrap(), Action::try_from(&string).unwrap());

        let broken = ActionSpec::new(ActionKind::AdjustStyling)
            .with_selector(".hero")
            .with_styles("{display: none");
        let err = Action::try_from(&broken).unwrap_err();
        assert!(matches!(err, SnapshotError::Validation { ref kind, .. } if kind == "Adjust Styling"));
        assert!(err.to_string().contains("invalid JSON"));
    }

    #[test]
    fn test_horizontal_scroll_defaults_to_zero() {
        let spec = ActionSpec::new(ActionKind::ScrollHorizontally).with_value("left");
        assert_eq!(Action::try_from(&spec).unwrap(), Action::ScrollHorizontally { delta: 0 });

        let spec = ActionSpec::new(ActionKind::ScrollHorizontally).with_value("-320");
        assert_eq!(Action::try_from(&spec).unwrap(), Action::ScrollHorizontally { delta: -320 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_fields_fail_without_touching_page() {
        let engine = engine();
        let page = FakePage::default();
        let reporter = reporter(ViewportClass::Desktop);

        let invalid = [
            ActionSpec::new(ActionKind::AdjustStyling).with_styles(json!({"color": "red"})),
            ActionSpec::new(ActionKind::AdjustStyling).with_selector("h1"),
            ActionSpec::new(ActionKind::ExecuteJs),
            ActionSpec::new(ActionKind::FillForm).with_value("hello"),
            ActionSpec::new(ActionKind::FillForm).with_selector("#q"),
            ActionSpec::new(ActionKind::RemoveElement).with_value("  "),
            ActionSpec::new(ActionKind::ShowElement),
            ActionSpec::new(ActionKind::ClickSelector),
            ActionSpec::new(ActionKind::HoverSelector),
            ActionSpec::new(ActionKind::ScrollIntoView),
            ActionSpec::new(ActionKind::DebugElementStyles),
            ActionSpec::new(ActionKind::InjectCss),
        ];

        for spec in &invalid {
            let err = engine
                .execute(&page, spec, ViewportClass::Desktop, &reporter)
                .await
                .unwrap_err();
            match err {
                SnapshotError::Validation { kind, .. } => assert_eq!(kind, spec.kind.as_str()),
                other => panic!("expected validation error for {}, got {other}", spec.kind),
            }
        }

        assert!(page.journal().entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_action_aborts_list_before_any_step() {
        let engine = engine();
        let page = FakePage::default();
        let specs = [
            ActionSpec::new(ActionKind::RemoveElement).with_value(".banner"),
            ActionSpec::new(ActionKind::ClickSelector),
        ];

        let result = engine
            .execute_list(&page, &specs, "shared", ViewportClass::Desktop, &reporter(ViewportClass::Desktop))
            .await;

        assert!(result.is_err());
        assert_eq!(page.journal().count("evaluate:REMOVE_ELEMENTS"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_falls_back_to_pointer() {
        let engine = engine();
        let page = FakePage::builder()
            .element("#buy", button())
            .fail_native_click()
            .fail_synthetic_click()
            .build();

        let spec = ActionSpec::new(ActionKind::ClickSelector).with_value("#buy");
        engine
            .execute(&page, &spec, ViewportClass::Desktop, &reporter(ViewportClass::Desktop))
            .await
            .unwrap();

        let journal = page.journal();
        assert_eq!(journal.count("click #buy"), 1);
        assert_eq!(journal.count("evaluate:SYNTHETIC_CLICK"), 1);
        assert_eq!(journal.entries().last().map(String::as_str), Some("mouse_click 140,220"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_stops_at_first_working_tier() {
        let engine = engine();
        let page = FakePage::builder()
            .element("#buy", button())
            .fail_native_click()
            .build();

        let spec = ActionSpec::new(ActionKind::ClickSelector).with_value("#buy");
        engine
            .execute(&page, &spec, ViewportClass::Desktop, &reporter(ViewportClass::Desktop))
            .await
            .unwrap();

        assert_eq!(page.journal().count("evaluate:SYNTHETIC_CLICK"), 1);
        assert_eq!(page.journal().count("mouse_click"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mobile_click_neutralizes_overlays_and_centers_offscreen_target() {
        let engine = engine();
        let page = FakePage::builder()
            .viewport(436, 1080)
            .scroll_height(4000.0)
            .element(
                "#menu",
                ElementRect {
                    top: 2500.0,
                    ..button()
                },
            )
            .build();

        let spec = ActionSpec::new(ActionKind::ClickSelector).with_value("#menu");
        engine
            .execute(&page, &spec, ViewportClass::Mobile, &reporter(ViewportClass::Mobile))
            .await
            .unwrap();

        let journal = page.journal();
        assert_eq!(journal.count("evaluate:NEUTRALIZE_OVERLAYS"), 1);
        assert_eq!(journal.count("evaluate:SCROLL_ELEMENT_CENTER"), 1);
        assert_eq!(journal.count("click #menu"), 1);
        // Only the scroll state store is touched by scroll actions
        assert!(engine.scroll_state(ViewportClass::Mobile).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_fails_when_every_tier_fails() {
        let engine = engine();
        let page = FakePage::builder()
            .element(
                "#ghost",
                ElementRect {
                    width: 0.0,
                    height: 0.0,
                    ..button()
                },
            )
            .fail_native_click()
            .fail_synthetic_click()
            .build();

        let spec = ActionSpec::new(ActionKind::ClickSelector).with_value("#ghost");
        let err = engine
            .execute(&page, &spec, ViewportClass::Desktop, &reporter(ViewportClass::Desktop))
            .await
            .unwrap_err();

        assert!(matches!(err.root_cause(), SnapshotError::ElementNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_actions_record_state_per_viewport() {
        let engine = engine();
        let page = FakePage::builder()
            .scroll_height(5000.0)
            .element(
                "#faq",
                ElementRect {
                    top: 3000.0,
                    ..button()
                },
            )
            .build();

        let spec = ActionSpec::new(ActionKind::ScrollIntoView).with_value("#faq");
        engine
            .execute(&page, &spec, ViewportClass::Desktop, &reporter(ViewportClass::Desktop))
            .await
            .unwrap();

        let state = engine.scroll_state(ViewportClass::Desktop).unwrap();
        assert!(state.scroll_y > 0.0);
        assert_eq!(state.page_height, 5000.0);
        assert!(engine.scroll_state(ViewportClass::Mobile).is_none());

        engine.clear_scroll_state(ViewportClass::Desktop);
        assert!(engine.scroll_state(ViewportClass::Desktop).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_scroll_resets_without_state() {
        let engine = engine();
        let page = FakePage::builder().scroll_height(3000.0).scroll_y(900.0).build();

        let outcome = engine
            .restore_scroll(&page, ViewportClass::Desktop, &reporter(ViewportClass::Desktop))
            .await
            .unwrap();

        assert_eq!(outcome, ScrollOutcome::Reset);
        assert_eq!(page.scroll_position(), (0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_scroll_returns_to_recorded_position() {
        let engine = engine();
        let page = FakePage::builder().scroll_height(3000.0).build();
        let reporter = reporter(ViewportClass::Desktop);

        page.set_scroll(0.0, 1200.0);
        engine.record_scroll_state(&page, ViewportClass::Desktop).await.unwrap();

        page.set_scroll(0.0, 1230.0);
        assert_eq!(
            engine.restore_scroll(&page, ViewportClass::Desktop, &reporter).await.unwrap(),
            ScrollOutcome::InPlace
        );

        page.set_scroll(0.0, 0.0);
        assert_eq!(
            engine.restore_scroll(&page, ViewportClass::Desktop, &reporter).await.unwrap(),
            ScrollOutcome::Restored
        );
        assert_eq!(page.scroll_position(), (0.0, 1200.0));

        page.set_scroll_height(3500.0);
        assert_eq!(
            engine.restore_scroll(&page, ViewportClass::Desktop, &reporter).await.unwrap(),
            ScrollOutcome::HeightChanged
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_significant_actions_emit_previews() {
        use crate::events::{MockEventSink, PreviewEvent};
        use crate::{Reporter, RunLog, ScreenshotMode};

        let mut sink = MockEventSink::new();
        sink.expect_log().return_const(());
        sink.expect_preview()
            .withf(|event: &PreviewEvent| event.step == "action-2-remove-element")
            .times(1)
            .return_const(());

        let reporter = Reporter::new(Arc::new(RunLog::streaming(Arc::new(sink))), "home", ScreenshotMode::FullPage, 60)
            .for_viewport(ViewportClass::Desktop);
        let page = FakePage::builder().element(".banner", button()).build();
        let specs = [
            ActionSpec::new(ActionKind::Delay).with_value("100"),
            ActionSpec::new(ActionKind::RemoveElement).with_value(".banner"),
        ];

        engine()
            .execute_list(&page, &specs, "shared", ViewportClass::Desktop, &reporter)
            .await
            .unwrap();
        assert_eq!(page.journal().count("evaluate:REMOVE_ELEMENTS"), 1);
    }

    fn logged(viewport: ViewportClass) -> (Arc<crate::RunLog>, Reporter) {
        use crate::{RunLog, ScreenshotMode};

        let log = Arc::new(RunLog::new());
        let reporter = Reporter::new(log.clone(), "test", ScreenshotMode::FullPage, 60).for_viewport(viewport);
        (log, reporter)
    }

    fn position(entries: &[String], entry: &str) -> usize {
        entries
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} missing from {entries:?}"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_form_waits_then_selects_then_types() {
        let engine = engine();
        let page = FakePage::builder().element("#email", button()).build();

        let spec = ActionSpec::new(ActionKind::FillForm)
            .with_selector("#email")
            .with_value("qa@example.test");
        engine
            .execute(&page, &spec, ViewportClass::Desktop, &reporter(ViewportClass::Desktop))
            .await
            .unwrap();

        let entries = page.journal().entries();
        let waited = position(&entries, "wait_for_selector #email");
        let selected = position(&entries, "evaluate:SELECT_CONTENT");
        let typed = position(&entries, "type_text qa@example.test");
        assert!(waited < selected && selected < typed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_form_fails_when_field_detaches_before_select() {
        let engine = engine();
        let page = FakePage::builder()
            .element("#email", button())
            .vanishing("#email")
            .build();

        let spec = ActionSpec::new(ActionKind::FillForm)
            .with_selector("#email")
            .with_value("qa@example.test");
        let err = engine
            .execute(&page, &spec, ViewportClass::Desktop, &reporter(ViewportClass::Desktop))
            .await
            .unwrap_err();

        assert!(matches!(err.root_cause(), SnapshotError::ElementNotFound(s) if s == "#email"));
        assert!(err.to_string().starts_with("Fill Form failed"));
        assert_eq!(page.journal().count("type_text"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_styling_without_matches_is_logged_and_succeeds() {
        let engine = engine();
        let page = FakePage::default();
        let (log, reporter) = logged(ViewportClass::Desktop);

        let spec = ActionSpec::new(ActionKind::AdjustStyling)
            .with_selector(".absent")
            .with_styles(json!({"display": "none"}));
        engine
            .execute(&page, &spec, ViewportClass::Desktop, &reporter)
            .await
            .unwrap();

        assert_eq!(page.journal().count("evaluate:APPLY_STYLES"), 1);
        assert!(log
            .lines()
            .iter()
            .any(|line| line.contains("No elements found for selector: .absent")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_horizontal_scroll_records_shifted_position() {
        let engine = engine();
        let page = FakePage::builder().scroll_height(2400.0).build();

        let spec = ActionSpec::new(ActionKind::ScrollHorizontally).with_value("320");
        engine
            .execute(&page, &spec, ViewportClass::Mobile, &reporter(ViewportClass::Mobile))
            .await
            .unwrap();

        assert_eq!(page.journal().count("evaluate:SCROLL_BY"), 1);
        assert_eq!(page.scroll_position(), (320.0, 0.0));

        let state = engine.scroll_state(ViewportClass::Mobile).unwrap();
        assert_eq!(state.scroll_x, 320.0);
        assert_eq!(state.scroll_y, 0.0);
        assert_eq!(state.page_height, 2400.0);
        assert!(engine.scroll_state(ViewportClass::Desktop).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hover_waits_for_target_before_hovering() {
        let engine = engine();
        let page = FakePage::builder().element("#menu", button()).build();
        let reporter = reporter(ViewportClass::Desktop);

        let spec = ActionSpec::new(ActionKind::HoverSelector).with_value("#menu");
        engine.execute(&page, &spec, ViewportClass::Desktop, &reporter).await.unwrap();

        let entries = page.journal().entries();
        assert!(position(&entries, "wait_for_selector #menu") < position(&entries, "hover #menu"));

        let spec = ActionSpec::new(ActionKind::HoverSelector).with_value("#gone");
        let err = engine
            .execute(&page, &spec, ViewportClass::Desktop, &reporter)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.is_retryable());
        assert!(err.to_string().starts_with("Hover Selector failed"));
        assert_eq!(page.journal().count("hover #gone"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_show_element_and_execute_js_run_in_page() {
        let engine = engine();
        let page = FakePage::builder().element(".drawer", button()).build();
        let reporter = reporter(ViewportClass::Desktop);

        let show = ActionSpec::new(ActionKind::ShowElement).with_value(".drawer");
        engine.execute(&page, &show, ViewportClass::Desktop, &reporter).await.unwrap();
        assert_eq!(page.journal().count("evaluate:SHOW_ELEMENTS"), 1);

        let script = ActionSpec::new(ActionKind::ExecuteJs).with_value("document.title = 'ready'");
        engine.execute(&page, &script, ViewportClass::Desktop, &reporter).await.unwrap();
        assert_eq!(page.journal().count("evaluate:script"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_script_errors_carry_the_action_kind() {
        let engine = engine();
        let page = FakePage::builder().fail_scripts().build();

        let spec = ActionSpec::new(ActionKind::ExecuteJs).with_value("throw new Error('boom')");
        let err = engine
            .execute(&page, &spec, ViewportClass::Desktop, &reporter(ViewportClass::Desktop))
            .await
            .unwrap_err();

        match &err {
            SnapshotError::Action { kind, source } => {
                assert_eq!(kind, "Execute JS");
                assert!(matches!(**source, SnapshotError::Page(_)));
            }
            other => panic!("expected action error, got {other:?}"),
        }
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Execute JS failed: Page error: script threw");
    }

    #[tokio::test(start_paused = true)]
    async fn test_debug_styles_logs_details_or_missing_element() {
        let engine = engine();
        let page = FakePage::builder().element("#hero", button()).build();
        let (log, reporter) = logged(ViewportClass::Desktop);

        for selector in ["#hero", "#missing"] {
            let spec = ActionSpec::new(ActionKind::DebugElementStyles).with_value(selector);
            engine.execute(&page, &spec, ViewportClass::Desktop, &reporter).await.unwrap();
        }

        let lines = log.lines();
        assert!(lines.iter().any(|line| line.contains("Debug styles for #hero:")));
        assert!(lines
            .iter()
            .any(|line| line.contains("Debug styles: no element matches #missing")));
        assert_eq!(page.journal().count("evaluate:COMPUTED_STYLES"), 2);
    }
}
