//! Configuration management with serde serialization/deserialization
//!
//! Two layers live here: [`Config`] holds engine settings (batch width, retry
//! policy, timeouts, settle delays, browser launch options) and [`RunConfig`]
//! is one run request as exported by the authoring UI.

use crate::{lenient_opt_u32, ScreenSpec, SnapshotError, ViewportClass};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Engine settings for the snapshot runner
///
/// # Examples
///
/// ```rust
/// use snapshot_runner::Config;
///
/// let config = Config {
///     batch_size: 4,
///     max_retries: 1,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Screens processed concurrently per batch, each in its own browser (default: 8)
    pub batch_size: usize,

    /// Extra attempts per viewport task after the first failure (default: 2)
    pub max_retries: usize,

    /// Fixed pause before a retry attempt (default: 2 seconds)
    pub retry_backoff: Duration,

    /// Pause between batches (default: 1 second)
    pub batch_pause: Duration,

    /// DOM-readiness bound for plain navigation (default: 30 seconds)
    pub navigation_timeout: Duration,

    /// Navigation bound when a credential challenge is involved (default: 90 seconds)
    pub auth_navigation_timeout: Duration,

    /// Wait bound for form, hover and scroll targets (default: 5 seconds)
    pub selector_timeout: Duration,

    /// Wait bound for click targets (default: 10 seconds)
    pub click_timeout: Duration,

    /// Wait bound for the element of a selector-bounded capture (default: 10 seconds)
    pub capture_selector_timeout: Duration,

    pub timings: Timings,

    pub lazy_load: LazyLoadSettings,

    /// JPEG quality of streamed previews (default: 60)
    pub preview_quality: u8,

    pub user_agent: String,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Root directory for screenshots; desktop and mobile get their own subdirectory
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch_size: 8,
            max_retries: 2,
            retry_backoff: Duration::from_secs(2),
            batch_pause: Duration::from_secs(1),
            navigation_timeout: Duration::from_secs(30),
            auth_navigation_timeout: Duration::from_secs(90),
            selector_timeout: Duration::from_secs(5),
            click_timeout: Duration::from_secs(10),
            capture_selector_timeout: Duration::from_secs(10),
            timings: Timings::default(),
            lazy_load: LazyLoadSettings::default(),
            preview_quality: 60,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            chrome_path: None,
            output_dir: PathBuf::from("snapshots"),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.batch_size == 0 {
            return Err(SnapshotError::Configuration(
                "Batch size must be greater than 0".to_string(),
            ));
        }

        if self.navigation_timeout.is_zero() || self.auth_navigation_timeout.is_zero() {
            return Err(SnapshotError::Configuration(
                "Navigation timeouts must be greater than 0".to_string(),
            ));
        }

        if self.preview_quality == 0 || self.preview_quality > 100 {
            return Err(SnapshotError::Configuration(
                "Preview quality must be between 1 and 100".to_string(),
            ));
        }

        if self.lazy_load.max_passes == 0 {
            return Err(SnapshotError::Configuration(
                "Lazy-load pass cap must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Navigation bound for an attempt, longer when credentials are in play
    pub fn navigation_timeout_for(&self, authenticated: bool) -> Duration {
        if authenticated {
            self.auth_navigation_timeout
        } else {
            self.navigation_timeout
        }
    }
}

/// Fixed settle delays between automation steps
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Timings {
    /// After scrolling an off-screen click target to center
    pub click_scroll_settle: Duration,
    /// After any successful click tier
    pub click_settle: Duration,
    /// After a smooth scroll-into-view
    pub scroll_settle: Duration,
    /// After a horizontal scroll
    pub horizontal_scroll_settle: Duration,
    /// Before the final capture
    pub pre_capture_settle: Duration,
    /// Before reading the element of a selector-bounded capture
    pub capture_stability: Duration,
    /// After resizing the viewport for a selector-bounded capture
    pub viewport_settle: Duration,
    /// After centering the captured element
    pub center_settle: Duration,
    /// After resetting to the origin when no scroll was recorded
    pub reset_settle: Duration,
    /// Before restoring a recorded scroll position
    pub pre_restore_settle: Duration,
    /// After restoring a recorded scroll position
    pub restore_settle: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            click_scroll_settle: Duration::from_millis(1500),
            click_settle: Duration::from_millis(500),
            scroll_settle: Duration::from_millis(1500),
            horizontal_scroll_settle: Duration::from_millis(500),
            pre_capture_settle: Duration::from_millis(1000),
            capture_stability: Duration::from_millis(3000),
            viewport_settle: Duration::from_millis(2000),
            center_settle: Duration::from_millis(1500),
            reset_settle: Duration::from_millis(1000),
            pre_restore_settle: Duration::from_millis(2000),
            restore_settle: Duration::from_millis(1000),
        }
    }
}

/// Bounds for the lazy-content sweep and the quiescence waits after it
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LazyLoadSettings {
    pub max_passes: usize,
    pub step_delay: Duration,
    pub pass_settle: Duration,
    pub first_idle_timeout: Duration,
    pub idle_gap: Duration,
    pub second_idle_timeout: Duration,
    pub image_attempts: usize,
    pub image_attempt_ceiling: Duration,
    pub background_prefetch_timeout: Duration,
}

impl Default for LazyLoadSettings {
    fn default() -> Self {
        Self {
            max_passes: 2,
            step_delay: Duration::from_millis(200),
            pass_settle: Duration::from_millis(1000),
            first_idle_timeout: Duration::from_secs(15),
            idle_gap: Duration::from_millis(1500),
            second_idle_timeout: Duration::from_secs(10),
            image_attempts: 5,
            image_attempt_ceiling: Duration::from_secs(3),
            background_prefetch_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Viewport dimensions for one viewport class; device scale is always pinned to 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

impl ViewportSize {
    pub const DESKTOP: ViewportSize = ViewportSize {
        width: 1920,
        height: 1080,
    };
    pub const MOBILE: ViewportSize = ViewportSize {
        width: 436,
        height: 1080,
    };
}

/// One run request: site settings plus the screens to capture
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    #[serde(default)]
    pub site_name: String,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default, deserialize_with = "lenient_opt_u32")]
    pub desktop_width: Option<u32>,

    #[serde(default, deserialize_with = "lenient_opt_u32")]
    pub desktop_height: Option<u32>,

    #[serde(default, deserialize_with = "lenient_opt_u32")]
    pub mobile_width: Option<u32>,

    #[serde(default, deserialize_with = "lenient_opt_u32")]
    pub mobile_height: Option<u32>,

    #[serde(default = "default_lazy_loading")]
    pub enable_lazy_loading: bool,

    #[serde(default)]
    pub screens: Vec<ScreenSpec>,
}

fn default_lazy_loading() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            site_name: String::new(),
            base_url: None,
            username: None,
            password: None,
            desktop_width: None,
            desktop_height: None,
            mobile_width: None,
            mobile_height: None,
            enable_lazy_loading: true,
            screens: Vec::new(),
        }
    }
}

impl RunConfig {
    pub fn from_json(content: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Credentials, present only when both username and password are non-empty
    pub fn credentials(&self) -> Option<Credentials> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Credentials {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            _ => None,
        }
    }

    /// Configured size for `viewport`; zero or missing dimensions fall back to defaults
    pub fn viewport_size(&self, viewport: ViewportClass) -> ViewportSize {
        let (width, height, fallback) = match viewport {
            ViewportClass::Desktop => (self.desktop_width, self.desktop_height, ViewportSize::DESKTOP),
            ViewportClass::Mobile => (self.mobile_width, self.mobile_height, ViewportSize::MOBILE),
        };

        ViewportSize {
            width: width.filter(|w| *w > 0).unwrap_or(fallback.width),
            height: height.filter(|h| *h > 0).unwrap_or(fallback.height),
        }
    }

    /// Absolute http(s) URL for `screen`, joining relative paths onto the base URL
    pub fn resolve_url(&self, screen: &ScreenSpec) -> Result<Url, SnapshotError> {
        let raw = screen.url.trim();
        if raw.is_empty() {
            return Err(SnapshotError::InvalidUrl("No URL".to_string()));
        }

        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self
                    .base_url
                    .as_deref()
                    .filter(|base| !base.trim().is_empty())
                    .ok_or_else(|| SnapshotError::InvalidUrl(format!("{raw} (no base URL configured)")))?;
                Url::parse(base.trim())?.join(raw)?
            }
            Err(e) => return Err(SnapshotError::InvalidUrl(format!("{raw}: {e}"))),
        };

        match url.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(SnapshotError::InvalidUrl(format!(
                "{raw}: unsupported scheme '{scheme}'"
            ))),
        }
    }

    /// Position of the screen with `id` in the full screen list
    pub fn screen_position(&self, id: &str) -> Option<usize> {
        self.screens.iter().position(|screen| screen.id == id)
    }

    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.screens.is_empty() {
            return Err(SnapshotError::Configuration(
                "Invalid configuration or no screens provided".to_string(),
            ));
        }

        for screen in &self.screens {
            screen.validate()?;
        }

        Ok(())
    }
}

/// Generate Chrome command-line arguments for an isolated instance
///
/// Each instance gets its own user-data and temp directory so concurrently
/// launched browsers never contend for the same profile.
pub fn get_chrome_args(config: &Config, instance_id: usize) -> Vec<String> {
    let unique_id = format!("{}-{}", std::process::id(), instance_id);

    vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-setuid-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-accelerated-2d-canvas".to_string(),
        "--no-first-run".to_string(),
        "--no-zygote".to_string(),
        "--disable-gpu".to_string(),
        "--disable-extensions".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--force-device-scale-factor=1".to_string(),
        "--max_old_space_size=4096".to_string(),
        format!(
            "--window-size={},{}",
            ViewportSize::DESKTOP.width,
            ViewportSize::DESKTOP.height
        ),
        format!("--user-data-dir=/tmp/snapshot-runner-{unique_id}"),
        format!("--user-agent={}", config.user_agent),
    ]
}

pub fn create_browser_config(
    config: &Config,
    instance_id: usize,
) -> Result<chromiumoxide::browser::BrowserConfig, SnapshotError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(ViewportSize::DESKTOP.width, ViewportSize::DESKTOP.height)
        .args(get_chrome_args(config, instance_id));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(SnapshotError::BrowserLaunchFailed)
}
