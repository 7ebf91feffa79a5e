//! Raster post-processing: fixed-width resize, optional background trim, PNG
//! encode.

use std::io::Cursor;

use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbaImage};
use log::debug;

use crate::{Error, FinalImage, RawRaster, Result};

/// Output width every capture is normalized to.
pub const OUTPUT_WIDTH: u32 = 1080;

/// Quality setting for the PNG encoder.
pub const OUTPUT_QUALITY: u8 = 80;

/// Maximum per-channel distance for a pixel to count as background.
pub const TRIM_THRESHOLD: u8 = 10;

/// Largest resized image the pipeline will allocate, in pixels.
pub const MAX_OUTPUT_PIXELS: u64 = OUTPUT_WIDTH as u64 * 32_768;

/// Tunables for [`ImagePipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub width: u32,
    /// 0-100; PNG is lossless so this selects the compression effort
    pub quality: u8,
    pub trim_threshold: u8,
    pub max_pixels: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            width: OUTPUT_WIDTH,
            quality: OUTPUT_QUALITY,
            trim_threshold: TRIM_THRESHOLD,
            max_pixels: MAX_OUTPUT_PIXELS,
        }
    }
}

/// Stateless raster transformer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagePipeline {
    options: PipelineOptions,
}

impl ImagePipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    /// Resize `raw` to the configured width, trim borders matching
    /// `trim_color` when given, and encode as PNG.
    pub fn process(&self, raw: RawRaster, trim_color: Option<&str>) -> Result<FinalImage> {
        let background = trim_color.map(parse_trim_color).transpose()?;

        let decoded = image::load_from_memory(raw.as_bytes())
            .map_err(|e| Error::ImageProcessing(format!("failed to decode raster: {}", e)))?;
        debug!("Decoded raster {}x{}", decoded.width(), decoded.height());

        let mut img = self.resize(decoded)?;

        if let Some(bg) = background {
            let (x, y, w, h) = content_bounds(&img.to_rgba8(), bg, self.options.trim_threshold);
            debug!("Trimming to {}x{} at ({}, {})", w, h, x, y);
            img = img.crop_imm(x, y, w, h);
        }

        let mut out = Vec::new();
        let encoder = PngEncoder::new_with_quality(
            Cursor::new(&mut out),
            compression_for(self.options.quality),
            PngFilter::Adaptive,
        );
        img.write_with_encoder(encoder)
            .map_err(|e| Error::ImageProcessing(format!("failed to encode PNG: {}", e)))?;

        Ok(FinalImage::new(out))
    }

    fn resize(&self, img: DynamicImage) -> Result<DynamicImage> {
        let (w, h) = (img.width(), img.height());
        let target_w = self.options.width;
        // round to nearest, never collapse to zero rows
        let target_h = ((u64::from(h) * u64::from(target_w) + u64::from(w) / 2) / u64::from(w)).max(1);
        let pixels = u64::from(target_w) * target_h;
        if pixels > self.options.max_pixels {
            return Err(Error::ImageProcessing(format!(
                "resized image {}x{} exceeds the {} pixel limit",
                target_w, target_h, self.options.max_pixels
            )));
        }
        let target_h = u32::try_from(target_h)
            .map_err(|_| Error::ImageProcessing(format!("resized height {} is out of range", target_h)))?;
        if (w, h) == (target_w, target_h) {
            return Ok(img);
        }
        Ok(img.resize_exact(target_w, target_h, FilterType::Lanczos3))
    }
}

/// Run the default pipeline.
pub fn process(raw: RawRaster, trim_color: Option<&str>) -> Result<FinalImage> {
    ImagePipeline::default().process(raw, trim_color)
}

/// Parse a six-digit hex color such as `ffffff` or `1A2b3C`.
pub fn parse_trim_color(s: &str) -> Result<Rgb<u8>> {
    let invalid = || Error::ImageProcessing(format!("cannot parse trim color {:?}", s));
    if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let channel = |i: usize| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| invalid());
    Ok(Rgb([channel(0)?, channel(2)?, channel(4)?]))
}

fn compression_for(quality: u8) -> CompressionType {
    match quality {
        0..=39 => CompressionType::Fast,
        40..=69 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

fn is_background(px: &image::Rgba<u8>, bg: Rgb<u8>, threshold: u8) -> bool {
    if px[3] == 0 {
        return true;
    }
    (0..3).all(|c| px[c].abs_diff(bg[c]) <= threshold)
}

/// Bounding box `(x, y, width, height)` of pixels that differ from `bg`.
/// An all-background image keeps its full extent.
fn content_bounds(img: &RgbaImage, bg: Rgb<u8>, threshold: u8) -> (u32, u32, u32, u32) {
    let (w, h) = img.dimensions();
    let mut min_x = w;
    let mut min_y = h;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut found = false;

    for (x, y, px) in img.enumerate_pixels() {
        if is_background(px, bg, threshold) {
            continue;
        }
        found = true;
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    if !found {
        return (0, 0, w, h);
    }
    (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
}
