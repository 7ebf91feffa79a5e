//! Error types for the capture pipeline

use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a failure, stable across message wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameters,
    RenderLaunch,
    Navigation,
    Capture,
    ImageProcessing,
    Timeout,
}

/// Errors that can occur while capturing a page
#[derive(Error, Debug)]
pub enum Error {
    /// The request was malformed or contradictory
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// The renderer process could not be started
    #[error("Renderer launch failed: {0}")]
    RenderLaunch(String),

    /// Navigation or content injection failed
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// Raster capture failed
    #[error("Capture failed: {0}")]
    Capture(String),

    /// The raster could not be post-processed
    #[error("Image processing failed: {0}")]
    ImageProcessing(String),

    /// The configured capture deadline elapsed
    #[error("Capture timed out after {0}ms")]
    Timeout(u64),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidParameters(_) => ErrorKind::InvalidParameters,
            Error::RenderLaunch(_) => ErrorKind::RenderLaunch,
            Error::Navigation(_) => ErrorKind::Navigation,
            Error::Capture(_) => ErrorKind::Capture,
            Error::ImageProcessing(_) => ErrorKind::ImageProcessing,
            Error::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

/// The single failure value surfaced by [`crate::Capturer::capture`].
///
/// Carries the originating error unchanged; `Display` forwards to it so the
/// HTTP boundary can echo the underlying message.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct CaptureFailure {
    #[source]
    source: Error,
}

impl CaptureFailure {
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    pub fn cause(&self) -> &Error {
        &self.source
    }

    pub fn into_cause(self) -> Error {
        self.source
    }
}

impl From<Error> for CaptureFailure {
    fn from(source: Error) -> Self {
        Self { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reports_cause_kind_and_message() {
        let failure = CaptureFailure::from(Error::Navigation("net::ERR_NAME_NOT_RESOLVED".into()));
        assert_eq!(failure.kind(), ErrorKind::Navigation);
        assert_eq!(failure.to_string(), "Navigation failed: net::ERR_NAME_NOT_RESOLVED");
        assert!(std::error::Error::source(&failure).is_some());
    }

    #[test]
    fn timeout_message_names_the_deadline() {
        let err = Error::Timeout(30_000);
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.to_string(), "Capture timed out after 30000ms");
    }
}
