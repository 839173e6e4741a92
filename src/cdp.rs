//! Chrome DevTools implementation of the page automation seam
//!
//! One [`CdpBrowser`] per screen, launched by [`CdpLauncher`] with its own
//! profile directory. Pages are driven through raw CDP commands where
//! chromiumoxide has no helper for what the engines need.

use crate::{
    create_browser_config, scripts, BrowserLauncher, BrowserSession, CaptureRequest, Config,
    Credentials, ImageFormat, PageDriver, SnapshotError,
};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EventAuthRequired, EventRequestPaused, FailRequestParams,
    RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, InsertTextParams, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, ResourceType, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams, FrameId, NavigateParams, Viewport,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const NETWORK_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Resource count must hold still this long to count as idle
const NETWORK_IDLE_WINDOW: Duration = Duration::from_millis(500);

/// What the Fetch domain intercepts for one page
#[derive(Debug, Clone, Default)]
struct FetchPolicy {
    block_navigation: bool,
    credentials: Option<Credentials>,
}

impl FetchPolicy {
    /// `None` means interception should be off
    fn enable_params(&self) -> Option<fetch::EnableParams> {
        if self.credentials.is_some() {
            // Challenges only surface for paused requests, so everything pauses
            let pattern = RequestPattern::builder()
                .url_pattern("*")
                .request_stage(RequestStage::Request)
                .build();
            return Some(
                fetch::EnableParams::builder()
                    .pattern(pattern)
                    .handle_auth_requests(true)
                    .build(),
            );
        }

        if self.block_navigation {
            let pattern = RequestPattern::builder()
                .resource_type(ResourceType::Document)
                .request_stage(RequestStage::Request)
                .build();
            return Some(fetch::EnableParams::builder().pattern(pattern).build());
        }

        None
    }

    fn verdict(&self, resource_type: &ResourceType, frame_id: &FrameId, main_frame: Option<&FrameId>) -> Verdict {
        let top_level = main_frame.map_or(true, |main| main == frame_id);
        if self.block_navigation && *resource_type == ResourceType::Document && top_level {
            Verdict::Abort
        } else {
            Verdict::Continue
        }
    }

    /// Credentials are offered once per request; a repeated challenge means they were rejected
    fn auth_response(&self, first_attempt: bool) -> AuthChallengeResponse {
        match &self.credentials {
            Some(credentials) if first_attempt => AuthChallengeResponse {
                response: AuthChallengeResponseResponse::ProvideCredentials,
                username: Some(credentials.username.clone()),
                password: Some(credentials.password.clone()),
            },
            _ => AuthChallengeResponse::new(AuthChallengeResponseResponse::CancelAuth),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Continue,
    Abort,
}

pub struct CdpLauncher {
    config: Arc<Config>,
}

impl CdpLauncher {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserLauncher for CdpLauncher {
    async fn launch(&self, instance_id: usize) -> Result<Box<dyn BrowserSession>, SnapshotError> {
        let browser_config = create_browser_config(&self.config, instance_id)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| SnapshotError::BrowserLaunchFailed(e.to_string()))?;

        // The handler is a stream that must be polled for the connection to make progress
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser {} handler error: {}", instance_id, e);
                }
            }
            debug!("Browser {} handler stream ended", instance_id);
        });

        info!("Browser instance {} launched", instance_id);

        Ok(Box::new(CdpBrowser {
            instance_id,
            browser: Mutex::new(browser),
            handler: handler_task,
        }))
    }
}

pub struct CdpBrowser {
    instance_id: usize,
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
}

#[async_trait]
impl BrowserSession for CdpBrowser {
    async fn new_page(&self) -> Result<Box<dyn PageDriver>, SnapshotError> {
        let page = self.browser.lock().await.new_page("about:blank").await?;
        Ok(Box::new(CdpPage::new(page)))
    }

    async fn close(&self) -> Result<(), SnapshotError> {
        let mut browser = self.browser.lock().await;
        let result = browser.close().await;
        if let Err(e) = browser.wait().await {
            warn!("Browser {} did not exit cleanly: {}", self.instance_id, e);
        }
        self.handler.abort();

        result?;
        debug!("Browser instance {} closed", self.instance_id);
        Ok(())
    }
}

impl Drop for CdpBrowser {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

pub struct CdpPage {
    page: Page,
    policy: Arc<std::sync::Mutex<FetchPolicy>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl CdpPage {
    pub fn new(page: Page) -> Self {
        Self {
            page,
            policy: Arc::new(std::sync::Mutex::new(FetchPolicy::default())),
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn policy(&self) -> FetchPolicy {
        self.policy
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update_policy(&self, change: impl FnOnce(&mut FetchPolicy)) {
        change(&mut self.policy.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
    }

    async fn poll_until<F, Fut>(&self, bound: Duration, operation: &str, mut check: F) -> Result<(), SnapshotError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = Instant::now() + bound;
        loop {
            if check().await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SnapshotError::timeout(operation, bound));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Navigates, then polls until the DOM is no longer loading
    async fn load_until_ready(&self, url: &str) -> Result<(), SnapshotError> {
        let response = self.page.execute(NavigateParams::new(url)).await?;
        if let Some(error) = &response.result.error_text {
            return Err(SnapshotError::NavigationFailed(format!("{url}: {error}")));
        }

        let ready = scripts::call(scripts::DOCUMENT_READY, &[]);
        loop {
            if self.evaluate(&ready).await.ok() == Some(Value::Bool(true)) {
                return Ok(());
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Returns once the loaded-resource count holds still for [`NETWORK_IDLE_WINDOW`]
    async fn settle_resources(&self) -> Result<(), SnapshotError> {
        let count = scripts::call(scripts::RESOURCE_COUNT, &[]);
        let mut last = self.evaluate(&count).await?;
        let mut stable_since = Instant::now();

        loop {
            sleep(NETWORK_POLL_INTERVAL).await;
            let current = self.evaluate(&count).await?;
            if current != last {
                last = current;
                stable_since = Instant::now();
            } else if stable_since.elapsed() >= NETWORK_IDLE_WINDOW {
                return Ok(());
            }
        }
    }

    /// Subscribes to paused requests and auth challenges; idempotent
    async fn start_listeners(&self) -> Result<(), SnapshotError> {
        let mut listeners = self.listeners.lock().await;
        if !listeners.is_empty() {
            return Ok(());
        }

        let mut paused = self.page.event_listener::<EventRequestPaused>().await?;
        let mut challenges = self.page.event_listener::<EventAuthRequired>().await?;

        let page = self.page.clone();
        let policy = self.policy.clone();
        listeners.push(tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let main_frame = page.mainframe().await.ok().flatten();
                let current = policy.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone();

                let result = match current.verdict(&event.resource_type, &event.frame_id, main_frame.as_ref()) {
                    Verdict::Abort => {
                        debug!("Blocked navigation to {}", event.request.url);
                        page.execute(FailRequestParams::new(event.request_id.clone(), ErrorReason::Aborted))
                            .await
                            .map(|_| ())
                    }
                    Verdict::Continue => page
                        .execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ()),
                };
                if let Err(e) = result {
                    error!("Failed to resolve intercepted request: {}", e);
                }
            }
        }));

        let page = self.page.clone();
        let policy = self.policy.clone();
        listeners.push(tokio::spawn(async move {
            let mut attempted = HashSet::new();
            while let Some(event) = challenges.next().await {
                let first_attempt = attempted.insert(event.request_id.inner().clone());
                if !first_attempt {
                    warn!("Credentials rejected by {}", event.request.url);
                }
                let response = policy
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .auth_response(first_attempt);

                let answer = ContinueWithAuthParams::new(event.request_id.clone(), response);
                if let Err(e) = page.execute(answer).await {
                    error!("Failed to answer auth challenge: {}", e);
                }
            }
        }));

        Ok(())
    }

    /// Sends the Fetch configuration matching the current policy
    async fn apply_policy(&self) -> Result<(), SnapshotError> {
        match self.policy().enable_params() {
            Some(enable) => {
                self.start_listeners().await?;
                self.page.execute(enable).await?;
            }
            None => {
                self.page.execute(fetch::DisableParams::default()).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn navigate(&self, url: &str, bound: Duration) -> Result<(), SnapshotError> {
        timeout(bound, self.load_until_ready(url))
            .await
            .map_err(|_| SnapshotError::timeout(format!("navigation to {url}"), bound))?
    }

    async fn evaluate(&self, script: &str) -> Result<Value, SnapshotError> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(SnapshotError::Page)?;

        let result = self.page.evaluate_expression(params).await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn wait_for_selector(&self, selector: &str, bound: Duration) -> Result<(), SnapshotError> {
        self.poll_until(bound, &format!("selector {selector}"), || async {
            self.page.find_element(selector).await.is_ok()
        })
        .await
    }

    async fn click(&self, selector: &str) -> Result<(), SnapshotError> {
        self.page.find_element(selector).await?.click().await?;
        Ok(())
    }

    async fn hover(&self, selector: &str) -> Result<(), SnapshotError> {
        self.page.find_element(selector).await?.hover().await?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), SnapshotError> {
        self.page.execute(InsertTextParams::new(text)).await?;
        Ok(())
    }

    async fn mouse_click(&self, x: f64, y: f64) -> Result<(), SnapshotError> {
        for kind in [
            DispatchMouseEventType::MouseMoved,
            DispatchMouseEventType::MousePressed,
            DispatchMouseEventType::MouseReleased,
        ] {
            let mut builder = DispatchMouseEventParams::builder().r#type(kind.clone()).x(x).y(y);
            if kind != DispatchMouseEventType::MouseMoved {
                builder = builder.button(MouseButton::Left).click_count(1);
            }
            let params = builder.build().map_err(SnapshotError::Page)?;
            self.page.execute(params).await?;
        }
        Ok(())
    }

    async fn screenshot(&self, request: &CaptureRequest) -> Result<Vec<u8>, SnapshotError> {
        let format = match request.format {
            ImageFormat::Png => CaptureScreenshotFormat::Png,
            ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
        };

        let Some(clip) = request.clip else {
            let mut params = ScreenshotParams::builder()
                .format(format)
                .full_page(request.full_page);
            if let Some(quality) = request.quality {
                params = params.quality(i64::from(quality));
            }
            return self
                .page
                .screenshot(params.build())
                .await
                .map_err(|e| SnapshotError::Capture(e.to_string()));
        };

        let params = CaptureScreenshotParams::builder()
            .format(format)
            .capture_beyond_viewport(true)
            .clip(Viewport {
                x: clip.x,
                y: clip.y,
                width: clip.width,
                height: clip.height,
                scale: 1.0,
            })
            .build();

        let response = self.page.execute(params).await?;
        let encoded: &str = response.result.data.as_ref();
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| SnapshotError::Capture(format!("base64 decode failed: {e}")))
    }

    async fn set_viewport(&self, width: u32, height: u32, scale_factor: f64) -> Result<(), SnapshotError> {
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(width))
            .height(i64::from(height))
            .device_scale_factor(scale_factor)
            .mobile(false)
            .build()
            .map_err(SnapshotError::Page)?;

        self.page.execute(params).await?;
        Ok(())
    }

    async fn set_navigation_blocking(&self, enabled: bool) -> Result<(), SnapshotError> {
        self.update_policy(|policy| policy.block_navigation = enabled);
        self.apply_policy().await
    }

    async fn wait_for_network_idle(&self, bound: Duration) -> Result<(), SnapshotError> {
        timeout(bound, self.settle_resources())
            .await
            .map_err(|_| SnapshotError::timeout("network idle", bound))?
    }

    /// Answers HTTP auth challenges with `credentials`; no header is attached up front
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), SnapshotError> {
        self.update_policy(|policy| policy.credentials = Some(credentials.clone()));
        self.apply_policy().await
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), SnapshotError> {
        self.page
            .execute(SetUserAgentOverrideParams::new(user_agent))
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SnapshotError> {
        for task in self.listeners.lock().await.drain(..) {
            task.abort();
        }
        self.page.clone().close().await?;
        Ok(())
    }
}
