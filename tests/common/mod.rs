//! Chrome-free renderer used by the lifecycle and HTTP tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use pagesnap::{DeviceProfile, Error, Launcher, RawRaster, Renderer, Result, Source, TeardownError};

/// Where the fake renderer should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    Launch,
    Load,
    Capture,
    CorruptRaster,
    /// `load` blocks for this long before succeeding
    SlowLoad(Duration),
}

#[derive(Debug, Default)]
pub struct Tally {
    pub launches: AtomicUsize,
    pub loads: AtomicUsize,
    pub context_closes: AtomicUsize,
    pub process_closes: AtomicUsize,
}

impl Tally {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn context_closes(&self) -> usize {
        self.context_closes.load(Ordering::SeqCst)
    }

    pub fn process_closes(&self) -> usize {
        self.process_closes.load(Ordering::SeqCst)
    }

    /// Poll until `n` processes have been torn down, or give up after 10s.
    pub async fn wait_for_process_closes(&self, n: usize) -> bool {
        for _ in 0..200 {
            if self.process_closes() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }
}

pub struct FakeLauncher {
    tally: Arc<Tally>,
    fault: Fault,
}

impl FakeLauncher {
    pub fn new(fault: Fault) -> Self {
        Self {
            tally: Arc::new(Tally::default()),
            fault,
        }
    }

    pub fn tally(&self) -> Arc<Tally> {
        self.tally.clone()
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, profile: &DeviceProfile) -> Result<Box<dyn Renderer>> {
        self.tally.launches.fetch_add(1, Ordering::SeqCst);
        if self.fault == Fault::Launch {
            return Err(Error::RenderLaunch("chrome binary not found".into()));
        }
        Ok(Box::new(FakeRenderer {
            tally: self.tally.clone(),
            fault: self.fault,
            width: profile.viewport.width,
            height: profile.viewport.height,
            context_open: true,
            process_open: true,
        }))
    }
}

struct FakeRenderer {
    tally: Arc<Tally>,
    fault: Fault,
    width: u32,
    height: u32,
    context_open: bool,
    process_open: bool,
}

impl Renderer for FakeRenderer {
    fn load(&mut self, source: &Source) -> Result<()> {
        self.tally.loads.fetch_add(1, Ordering::SeqCst);
        match self.fault {
            Fault::Load => Err(Error::Navigation(format!("net::ERR_NAME_NOT_RESOLVED loading {:?}", source))),
            Fault::SlowLoad(delay) => {
                std::thread::sleep(delay);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn capture(&mut self) -> Result<RawRaster> {
        match self.fault {
            Fault::Capture => Err(Error::Capture("Target closed".into())),
            Fault::CorruptRaster => Ok(RawRaster::new(b"\x89PNG garbage".to_vec())),
            _ => Ok(page_raster(self.width, self.height)),
        }
    }

    fn close_context(&mut self) -> std::result::Result<(), TeardownError> {
        self.tally.context_closes.fetch_add(1, Ordering::SeqCst);
        if !std::mem::replace(&mut self.context_open, false) {
            return Err(TeardownError::AlreadyClosed);
        }
        Ok(())
    }

    fn close_process(&mut self) -> std::result::Result<(), TeardownError> {
        self.tally.process_closes.fetch_add(1, Ordering::SeqCst);
        if !std::mem::replace(&mut self.process_open, false) {
            return Err(TeardownError::AlreadyClosed);
        }
        Ok(())
    }
}

/// White page with a dark heading block near the top-left.
pub fn page_raster(width: u32, height: u32) -> RawRaster {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        if (40..400).contains(&x) && (30..90).contains(&y) {
            Rgba([20, 20, 20, 255])
        } else {
            Rgba([255, 255, 255, 255])
        }
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode fixture");
    RawRaster::new(bytes)
}
