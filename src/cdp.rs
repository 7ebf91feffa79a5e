//! Chrome DevTools Protocol renderer (uses the `headless_chrome` crate)

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Emulation, Page, Target};
use headless_chrome::{Browser, LaunchOptions};
use log::debug;

use crate::{DeviceProfile, Error, Launcher, RawRaster, Renderer, Result, Source, TeardownError};

/// Measures the full document so the capture covers more than the viewport.
const PAGE_SIZE_SCRIPT: &str = r#"
    (function() {
        const d = document.documentElement;
        const b = document.body;
        return JSON.stringify([
            Math.max(d ? d.scrollWidth : 0, b ? b.scrollWidth : 0, window.innerWidth),
            Math.max(d ? d.scrollHeight : 0, b ? b.scrollHeight : 0, window.innerHeight),
        ]);
    })()
"#;

/// Resolves once the current document has fired its load event.
const LOAD_EVENT_SCRIPT: &str = r#"
    new Promise(resolve => {
        if (document.readyState === 'complete') {
            resolve(true);
        } else {
            window.addEventListener('load', () => resolve(true), { once: true });
        }
    })
"#;

/// Launches a new headless Chrome per capture.
#[derive(Debug, Clone)]
pub struct CdpLauncher {
    /// Chrome/Chromium executable; auto-detected when `None`
    pub chrome_path: Option<PathBuf>,
    /// Run Chrome with its sandbox enabled
    pub sandbox: bool,
}

impl Default for CdpLauncher {
    fn default() -> Self {
        Self {
            chrome_path: None,
            sandbox: true,
        }
    }
}

impl Launcher for CdpLauncher {
    fn launch(&self, profile: &DeviceProfile) -> Result<Box<dyn Renderer>> {
        Ok(Box::new(CdpRenderer::launch(self, profile)?))
    }
}

/// One headless Chrome process with a single isolated browsing context and
/// one tab inside it.
pub struct CdpRenderer {
    browser: Option<Browser>,
    context_id: Option<String>,
    tab: Option<Arc<Tab>>,
}

impl CdpRenderer {
    fn launch(launcher: &CdpLauncher, profile: &DeviceProfile) -> Result<Self> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(launcher.sandbox)
            .path(launcher.chrome_path.clone())
            .window_size(Some((profile.viewport.width, profile.viewport.height)))
            .build()
            .map_err(|e| Error::RenderLaunch(format!("Failed to build launch options: {}", e)))?;

        // Any early return below drops `browser`, which kills the process.
        let browser = Browser::new(launch_options)
            .map_err(|e| Error::RenderLaunch(format!("Failed to launch browser: {}", e)))?;

        let (context_id, tab) = {
            let context = browser
                .new_context()
                .map_err(|e| Error::RenderLaunch(format!("Failed to create browsing context: {}", e)))?;
            let tab = context
                .new_tab()
                .map_err(|e| Error::RenderLaunch(format!("Failed to create tab: {}", e)))?;
            (context.get_id().to_string(), tab)
        };

        // Real device metrics, so the page lays out at the profile's DPR
        // instead of being upscaled after the fact.
        tab.call_method(Emulation::SetDeviceMetricsOverride {
            width: profile.viewport.width,
            height: profile.viewport.height,
            device_scale_factor: profile.device_scale_factor,
            mobile: false,
            scale: None,
            screen_width: None,
            screen_height: None,
            position_x: None,
            position_y: None,
            dont_set_visible_size: None,
            screen_orientation: None,
            viewport: None,
            display_feature: None,
            device_posture: None,
        })
        .map_err(|e| Error::RenderLaunch(format!("Failed to apply device metrics: {}", e)))?;

        if let Some(user_agent) = &profile.user_agent {
            tab.set_user_agent(user_agent, None, None)
                .map_err(|e| Error::RenderLaunch(format!("Failed to set user agent: {}", e)))?;
        }

        if !profile.extra_headers.is_empty() {
            // headless_chrome expects a HashMap<&str, &str>
            let headers: HashMap<&str, &str> = profile
                .extra_headers
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            tab.set_extra_http_headers(headers)
                .map_err(|e| Error::RenderLaunch(format!("Failed to set headers: {}", e)))?;
        }

        debug!("Chrome launched with context {}", context_id);
        Ok(Self {
            browser: Some(browser),
            context_id: Some(context_id),
            tab: Some(tab),
        })
    }

    fn tab(&self) -> Option<&Arc<Tab>> {
        self.tab.as_ref()
    }

    /// Replace the main frame's document with `html`, keeping the
    /// `about:blank` origin so storage and cookies stay usable.
    fn set_content(tab: &Tab, html: &str) -> Result<()> {
        tab.navigate_to("about:blank")
            .map_err(|e| Error::Navigation(format!("Failed to open blank page: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| Error::Navigation(format!("Wait for blank page failed: {}", e)))?;

        let frame_id = tab
            .call_method(Page::GetFrameTree(None))
            .map_err(|e| Error::Navigation(format!("Failed to read frame tree: {}", e)))?
            .frame_tree
            .frame
            .id;
        tab.call_method(Page::SetDocumentContent {
            frame_id,
            html: html.to_string(),
        })
        .map_err(|e| Error::Navigation(format!("Failed to set page content: {}", e)))?;

        tab.evaluate(LOAD_EVENT_SCRIPT, true)
            .map_err(|e| Error::Navigation(format!("Wait for load event failed: {}", e)))?;
        Ok(())
    }

    fn page_size(tab: &Tab) -> Result<(f64, f64)> {
        let eval = tab
            .evaluate(PAGE_SIZE_SCRIPT, false)
            .map_err(|e| Error::Capture(format!("Failed to measure page: {}", e)))?;
        let raw = eval
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Capture("Page measurement returned no value".into()))?;
        let (width, height): (f64, f64) = serde_json::from_str(raw)
            .map_err(|e| Error::Capture(format!("Unexpected page measurement {:?}: {}", raw, e)))?;
        Ok((width.max(1.0), height.max(1.0)))
    }
}

impl Renderer for CdpRenderer {
    fn load(&mut self, source: &Source) -> Result<()> {
        let tab = self
            .tab()
            .ok_or_else(|| Error::Navigation("Page is closed".into()))?;

        match source {
            Source::Url(url) => {
                tab.navigate_to(url)
                    .map_err(|e| Error::Navigation(format!("Navigation failed: {}", e)))?;
                tab.wait_until_navigated()
                    .map_err(|e| Error::Navigation(format!("Wait for navigation failed: {}", e)))?;
            }
            Source::Markup(html) => Self::set_content(tab, html)?,
        }
        Ok(())
    }

    fn capture(&mut self) -> Result<RawRaster> {
        let tab = self
            .tab()
            .ok_or_else(|| Error::Capture("Page is closed".into()))?;
        let (width, height) = Self::page_size(tab)?;

        let shot = tab
            .call_method(Page::CaptureScreenshot {
                format: Some(Page::CaptureScreenshotFormatOption::Png),
                quality: None,
                clip: Some(Page::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width,
                    height,
                    // device scale is already applied by the metrics override
                    scale: 1.0,
                }),
                from_surface: Some(true),
                capture_beyond_viewport: Some(true),
                optimize_for_speed: None,
            })
            .map_err(|e| Error::Capture(format!("Screenshot failed: {}", e)))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(shot.data)
            .map_err(|e| Error::Capture(format!("Screenshot payload is not base64: {}", e)))?;
        Ok(RawRaster::new(bytes))
    }

    fn close_context(&mut self) -> std::result::Result<(), TeardownError> {
        self.tab = None;
        let id = self.context_id.take().ok_or(TeardownError::AlreadyClosed)?;
        let browser = self.browser.as_ref().ok_or(TeardownError::AlreadyClosed)?;
        browser
            .call_method(Target::DisposeBrowserContext {
                browser_context_id: id,
            })
            .map(|_| ())
            .map_err(|e| TeardownError::Other(e.to_string()))
    }

    fn close_process(&mut self) -> std::result::Result<(), TeardownError> {
        // Dropping the browser terminates the child process.
        let browser = self.browser.take().ok_or(TeardownError::AlreadyClosed)?;
        drop(browser);
        Ok(())
    }
}
