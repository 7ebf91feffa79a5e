//! Pagesnap
//!
//! Render a URL or a chunk of HTML in a freshly launched, isolated headless
//! Chrome, capture the page as a raster image, normalize it and optionally
//! trim its background, and hand back PNG bytes.
//!
//! # Features
//!
//! - **Process-per-capture**: every capture launches its own renderer with its
//!   own browsing context; nothing is pooled or shared between requests
//! - **Guaranteed teardown**: the renderer is closed on every exit path,
//!   including failures and cancellation
//! - **Deterministic post-processing**: fixed-width resize and optional
//!   background trim
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "cdp")]
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use pagesnap::{CaptureOptions, Capturer, cdp::CdpLauncher};
//!
//! let capturer = Capturer::new(CdpLauncher::default(), CaptureOptions::default());
//! let request = pagesnap::validate(serde_json::json!({
//!     "html": "<h1>Hello</h1>",
//!     "trimColor": "ffffff",
//! }))?;
//! let png = capturer.capture(request).await?;
//! std::fs::write("hello.png", png.as_bytes())?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{CaptureFailure, Error, ErrorKind, Result};

#[cfg(feature = "cdp")]
pub mod cdp;

pub mod capture;
pub mod config;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod validate;

pub use capture::{CaptureOptions, Capturer};
pub use session::{RenderSession, SessionState};
pub use validate::{validate, validate_with_profile};

/// What to render: a page to navigate to, or markup to load directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Url(String),
    Markup(String),
}

/// Viewport dimensions in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Settings used to seed a new browsing context.
///
/// The capture core never looks inside a profile; it is handed to the
/// [`Launcher`] as-is when a session is opened.
///
/// # Examples
///
/// ```
/// let profile = pagesnap::DeviceProfile::default();
/// assert_eq!(profile.viewport.width, 1280);
/// assert_eq!(profile.device_scale_factor, 1.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceProfile {
    /// Initial window/viewport size
    pub viewport: Viewport,
    /// User agent override
    pub user_agent: Option<String>,
    /// Output pixels per CSS pixel
    pub device_scale_factor: f64,
    /// Extra HTTP headers sent with every request of the page
    pub extra_headers: HashMap<String, String>,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            user_agent: None,
            device_scale_factor: 1.0,
            extra_headers: HashMap::new(),
        }
    }
}

/// A validated capture request.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub source: Source,
    /// Seconds to wait after load before capturing
    pub settle_delay_secs: u64,
    /// Six hex digits, no leading `#`; `Some` enables background trimming
    pub trim_color: Option<String>,
    pub device_profile: DeviceProfile,
}

/// Lossless raster bytes as produced by the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRaster(Vec<u8>);

impl RawRaster {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Final PNG output of a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalImage(Vec<u8>);

impl FinalImage {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Why a teardown step did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownError {
    /// The resource was already gone; treated as success
    AlreadyClosed,
    /// Anything else; logged and dropped
    Other(String),
}

/// One launched renderer: a process, an isolated context and a page.
///
/// Implementations are created and driven on a single worker thread and so
/// need not be `Send`.
pub trait Renderer {
    /// Navigate to a URL, or set the page content, and wait for it to load
    fn load(&mut self, source: &Source) -> Result<()>;

    /// Take a full-page raster snapshot of the current page
    fn capture(&mut self) -> Result<RawRaster>;

    /// Dispose the isolated browsing context (and its page)
    fn close_context(&mut self) -> std::result::Result<(), TeardownError>;

    /// Terminate the renderer process
    fn close_process(&mut self) -> std::result::Result<(), TeardownError>;
}

/// Factory for fresh renderers, one per capture.
pub trait Launcher: Send + Sync + 'static {
    /// Launch a new renderer process and open an isolated context and page
    /// seeded with `profile`.
    fn launch(&self, profile: &DeviceProfile) -> Result<Box<dyn Renderer>>;
}
