//! End-to-end capture: open → load → settle → capture → close → process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::pipeline::{ImagePipeline, PipelineOptions};
use crate::session::RenderSession;
use crate::{CaptureFailure, CaptureRequest, Error, FinalImage, Launcher, RawRaster, Result, Source};

/// Knobs for a [`Capturer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureOptions {
    /// Deadline for a whole capture; `None` waits indefinitely
    pub timeout: Option<Duration>,
    pub pipeline: PipelineOptions,
}

/// Runs captures, each in its own freshly launched render session.
///
/// Cheap to clone; clones share the launcher but never a session.
#[derive(Clone)]
pub struct Capturer {
    launcher: Arc<dyn Launcher>,
    options: CaptureOptions,
}

impl Capturer {
    pub fn new(launcher: impl Launcher, options: CaptureOptions) -> Self {
        Self::with_launcher(Arc::new(launcher), options)
    }

    pub fn with_launcher(launcher: Arc<dyn Launcher>, options: CaptureOptions) -> Self {
        Self { launcher, options }
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Render `request` and return the processed PNG.
    ///
    /// The render session is closed before this returns, whatever the
    /// outcome, with one exception: if the configured deadline elapses, the
    /// in-flight session is dropped and `Timeout` is returned right away.
    /// Teardown then happens on the worker thread once its blocking renderer
    /// call returns, and is logged when it completes.
    pub async fn capture(&self, request: CaptureRequest) -> std::result::Result<FinalImage, CaptureFailure> {
        let started = Instant::now();
        let outcome = match self.options.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(request))
                .await
                .unwrap_or_else(|_| Err(Error::Timeout(limit.as_millis() as u64))),
            None => self.run(request).await,
        };

        match outcome {
            Ok(image) => {
                info!("Captured {} bytes in {:?}", image.len(), started.elapsed());
                Ok(image)
            }
            Err(err) => {
                debug!("Capture failed after {:?}: {}", started.elapsed(), err);
                Err(CaptureFailure::from(err))
            }
        }
    }

    async fn run(&self, request: CaptureRequest) -> Result<FinalImage> {
        let CaptureRequest {
            source,
            settle_delay_secs,
            trim_color,
            device_profile,
        } = request;

        let mut session = RenderSession::open(self.launcher.clone(), device_profile).await?;
        let raster = drive(&mut session, &source, settle_delay_secs).await;
        session.close().await;
        let raster = raster?;

        let pipeline = ImagePipeline::new(self.options.pipeline);
        tokio::task::spawn_blocking(move || pipeline.process(raster, trim_color.as_deref()))
            .await
            .map_err(|e| Error::ImageProcessing(format!("Image worker failed: {}", e)))?
    }
}

async fn drive(session: &mut RenderSession, source: &Source, settle_secs: u64) -> Result<RawRaster> {
    session.load(source).await?;
    session.settle(settle_secs).await?;
    session.capture().await
}
