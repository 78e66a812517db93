// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Headless-browser render engine.
//!
//! Converts a device configuration (URL + viewport) into a tightly
//! packed RGB buffer of exactly the declared viewport size. The engine
//! owns a fixed pool of browser contexts; a counting semaphore caps
//! concurrent renders across the pool and a per-slot mutex serializes
//! navigation and screenshot within a context. Browser work runs on the
//! blocking thread pool since the CDP client is synchronous.
//!
//! A context that errors is torn down with its slot left empty; the next
//! render through that slot launches a fresh browser. Contexts are also
//! launched lazily on first use, so a server with no traffic never
//! starts Chromium at all.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab};
use log::{debug, info, warn};
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::error::{Result, WebInkError};
use crate::registry::Device;

/// Settle delay after navigation for late subresources.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// How long an idle browser may sit before the CDP client recycles it.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(120);

/// Anything that can turn a device into a packed RGB frame.
///
/// The snapshot cache depends on this trait rather than on the concrete
/// engine so tests can inject a fake renderer.
pub trait Renderer: Send + Sync {
    /// Renders the device's source URL at its declared viewport.
    ///
    /// Returns `width * height * 3` bytes of packed RGB.
    fn render<'a>(&'a self, device: &'a Device) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// One browser context: a Chromium process plus its single tab.
struct BrowserContext {
    // Owns the process; dropping it tears the browser down.
    _browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserContext {
    /// Launches a fresh headless Chromium.
    fn launch() -> Result<Self> {
        let options = LaunchOptionsBuilder::default()
            .headless(true)
            .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
            .args(vec![
                OsStr::new("--force-device-scale-factor=1"),
                OsStr::new("--hide-scrollbars"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--force-color-profile=sRGB"),
            ])
            .build()
            .map_err(|e| WebInkError::RenderFailed(format!("launch options: {e}")))?;
        let browser =
            Browser::new(options).map_err(|e| WebInkError::RenderFailed(format!("launch: {e}")))?;
        let tab = browser
            .new_tab()
            .map_err(|e| WebInkError::RenderFailed(format!("new tab: {e}")))?;
        info!("Launched headless browser context");
        Ok(Self { _browser: browser, tab })
    }

    /// Navigates, waits for the page to settle, and screenshots the
    /// viewport. Blocking; must run off the async executor.
    fn capture(&self, url: &str, width: u32, height: u32, nav_ceiling: Duration) -> Result<Vec<u8>> {
        self.tab.set_default_timeout(nav_ceiling);
        self.tab
            .navigate_to(url)
            .map_err(|e| WebInkError::RenderFailed(format!("navigate: {e}")))?;
        self.tab
            .wait_until_navigated()
            .map_err(|_| WebInkError::NavigationTimeout)?;

        // The CDP client exposes no in-flight subresource counter; a fixed
        // settle window after the navigation event bounds the same quiesce
        // the protocol describes.
        std::thread::sleep(SETTLE_DELAY);

        let clip = Page::Viewport {
            x: 0.0,
            y: 0.0,
            width: f64::from(width),
            height: f64::from(height),
            scale: 1.0,
        };
        let png = self
            .tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, Some(clip), true)
            .map_err(|e| WebInkError::RenderFailed(format!("screenshot: {e}")))?;

        let image = image::load_from_memory(&png)
            .map_err(|e| WebInkError::RenderFailed(format!("decode: {e}")))?
            .to_rgb8();
        if image.width() != width || image.height() != height {
            return Err(WebInkError::RenderFailed(format!(
                "screenshot is {}x{}, wanted {width}x{height}",
                image.width(),
                image.height()
            )));
        }
        Ok(image.into_raw())
    }
}

/// A pool slot. Empty until first use and after a teardown.
struct Slot {
    context: Option<BrowserContext>,
}

/// Fixed-size pool of headless-browser contexts.
pub struct RenderEngine {
    slots: Vec<Arc<Mutex<Slot>>>,
    permits: Arc<Semaphore>,
    pool_wait: Duration,
    nav_ceiling: Duration,
}

impl RenderEngine {
    /// Creates an engine with `pool_size` contexts (launched lazily).
    #[must_use]
    pub fn new(pool_size: usize, pool_wait: Duration, nav_ceiling: Duration) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            slots: (0..pool_size)
                .map(|_| Arc::new(Mutex::new(Slot { context: None })))
                .collect(),
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_wait,
            nav_ceiling,
        }
    }

    /// Waiter cap the snapshot cache should apply on top of a render:
    /// pool wait + navigation ceiling + settle slack.
    #[must_use]
    pub fn capture_budget(&self) -> Duration {
        self.pool_wait + self.nav_ceiling + Duration::from_secs(5)
    }

    async fn acquire_slot(&self) -> Result<(OwnedMutexGuard<Slot>, OwnedSemaphorePermit)> {
        let permit = timeout(self.pool_wait, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| WebInkError::PoolExhausted)?
            .map_err(|_| WebInkError::PoolExhausted)?;

        // A permit guarantees a free slot; find it.
        for slot in &self.slots {
            if let Ok(guard) = slot.clone().try_lock_owned() {
                return Ok((guard, permit));
            }
        }
        Err(WebInkError::PoolExhausted)
    }

    async fn render_inner(&self, device: &Device) -> Result<Vec<u8>> {
        let (mut guard, _permit) = self.acquire_slot().await?;

        let context = guard.context.take();
        let url = device.source_url.clone();
        let (width, height) = (device.mode.width, device.mode.height);
        let nav_ceiling = self.nav_ceiling;

        debug!("Rendering {url} at {width}x{height}");
        let joined = tokio::task::spawn_blocking(move || {
            let context = match context {
                Some(context) => context,
                None => BrowserContext::launch()?,
            };
            match context.capture(&url, width, height, nav_ceiling) {
                Ok(rgb) => Ok((context, rgb)),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(|e| WebInkError::RenderFailed(format!("render task: {e}")))?;

        match joined {
            Ok((context, rgb)) => {
                guard.context = Some(context);
                Ok(rgb)
            }
            Err(e) => {
                // The erroring context was dropped inside the closure; the
                // slot stays empty and relaunches on next use.
                warn!("Browser context torn down after error: {e}");
                Err(e)
            }
        }
    }
}

impl Renderer for RenderEngine {
    fn render<'a>(&'a self, device: &'a Device) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(self.render_inner(device))
    }
}
