//! Request validation: decoded JSON in, [`CaptureRequest`] out.

use serde::Deserialize;
use serde_json::Value;

use crate::{CaptureRequest, DeviceProfile, Error, Result, Source};

/// Largest viewport side a request may ask for, in CSS pixels.
pub const MAX_VIEWPORT_DIMENSION: u32 = 10_000;

/// Largest device scale factor a request may ask for.
pub const MAX_DEVICE_SCALE_FACTOR: f64 = 4.0;

/// Wire shape of a capture request. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequest {
    url: Option<String>,
    html: Option<String>,
    #[serde(alias = "settleDelaySeconds")]
    wait_for: Option<i64>,
    trim_color: Option<String>,
    device: Option<DeviceProfile>,
}

/// Validate a decoded request body using the default [`DeviceProfile`].
pub fn validate(value: Value) -> Result<CaptureRequest> {
    validate_with_profile(value, &DeviceProfile::default())
}

/// Validate a decoded request body.
///
/// `default_profile` is used unless the request carries its own `device`
/// object. Empty `url`, `html` and `trimColor` strings count as absent.
pub fn validate_with_profile(value: Value, default_profile: &DeviceProfile) -> Result<CaptureRequest> {
    if !value.is_object() {
        return Err(Error::InvalidParameters("request body must be a JSON object".into()));
    }

    let raw: RawRequest =
        serde_json::from_value(value).map_err(|e| Error::InvalidParameters(e.to_string()))?;

    let url = raw.url.filter(|s| !s.is_empty());
    let html = raw.html.filter(|s| !s.is_empty());

    let source = match (url, html) {
        (Some(_), Some(_)) => {
            return Err(Error::InvalidParameters("provide either `url` or `html`, not both".into()))
        }
        (None, None) => return Err(Error::InvalidParameters("one of `url` or `html` is required".into())),
        (Some(url), None) => {
            url::Url::parse(&url)
                .map_err(|e| Error::InvalidParameters(format!("`url` is not a valid absolute URL: {}", e)))?;
            Source::Url(url)
        }
        (None, Some(html)) => Source::Markup(html),
    };

    let settle_delay_secs = match raw.wait_for {
        None => 0,
        Some(secs) => u64::try_from(secs)
            .map_err(|_| Error::InvalidParameters(format!("`waitFor` must be non-negative, got {}", secs)))?,
    };

    let trim_color = match raw.trim_color.filter(|s| !s.is_empty()) {
        None => None,
        Some(color) if is_hex_color(&color) => Some(color),
        Some(color) => {
            return Err(Error::InvalidParameters(format!(
                "`trimColor` must be six hex digits, got {:?}",
                color
            )))
        }
    };

    let device_profile = match raw.device {
        Some(profile) => {
            check_profile(&profile)?;
            profile
        }
        None => default_profile.clone(),
    };

    Ok(CaptureRequest {
        source,
        settle_delay_secs,
        trim_color,
        device_profile,
    })
}

fn is_hex_color(s: &str) -> bool {
    s.len() == 6 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn check_profile(profile: &DeviceProfile) -> Result<()> {
    if profile.viewport.width == 0 || profile.viewport.height == 0 {
        return Err(Error::InvalidParameters("`device.viewport` must be non-empty".into()));
    }
    if profile.viewport.width > MAX_VIEWPORT_DIMENSION || profile.viewport.height > MAX_VIEWPORT_DIMENSION {
        return Err(Error::InvalidParameters(format!(
            "`device.viewport` sides must be at most {}, got {}x{}",
            MAX_VIEWPORT_DIMENSION, profile.viewport.width, profile.viewport.height
        )));
    }
    let scale = profile.device_scale_factor;
    if !scale.is_finite() || scale <= 0.0 || scale > MAX_DEVICE_SCALE_FACTOR {
        return Err(Error::InvalidParameters(format!(
            "`device.deviceScaleFactor` must be in (0, {}], got {}",
            MAX_DEVICE_SCALE_FACTOR, scale
        )));
    }
    Ok(())
}
