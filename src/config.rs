//! Service configuration: command-line flags with environment fallbacks.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::{DeviceProfile, Viewport};

const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Command-line arguments for the `pagesnap` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "pagesnap", version, about = "Screenshot API backed by headless Chrome")]
pub struct Cli {
    /// Interface to listen on.
    #[arg(long, env = "LISTEN_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Token expected as the first path segment of every request.
    #[arg(long, env = "TOKEN", default_value = "token", hide_env_values = true)]
    pub token: String,

    /// Chrome/Chromium executable; auto-detected when omitted.
    #[arg(long, env = "CHROME_PATH", value_name = "PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Launch Chrome without its sandbox (needed in some containers).
    #[arg(long, env = "CHROME_NO_SANDBOX")]
    pub no_sandbox: bool,

    /// Abort a capture after this many seconds; unlimited when omitted.
    #[arg(long, env = "CAPTURE_TIMEOUT_SECS", value_name = "SECS")]
    pub capture_timeout_secs: Option<u64>,

    /// Largest accepted request body.
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Default viewport width for new pages.
    #[arg(long, env = "VIEWPORT_WIDTH", default_value_t = 1280)]
    pub viewport_width: u32,

    /// Default viewport height for new pages.
    #[arg(long, env = "VIEWPORT_HEIGHT", default_value_t = 720)]
    pub viewport_height: u32,

    /// Default user agent for new pages.
    #[arg(long, env = "USER_AGENT")]
    pub user_agent: Option<String>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("token must not be empty")]
    EmptyToken,
    #[error("viewport must be non-empty, got {0}x{1}")]
    EmptyViewport(u32, u32),
    #[error("capture timeout must be at least one second")]
    ZeroTimeout,
}

/// Validated service settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub token: String,
    pub chrome_path: Option<PathBuf>,
    pub sandbox: bool,
    pub capture_timeout: Option<Duration>,
    pub max_body_bytes: usize,
    pub default_profile: DeviceProfile,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        if cli.token.is_empty() {
            return Err(ConfigError::EmptyToken);
        }
        if cli.viewport_width == 0 || cli.viewport_height == 0 {
            return Err(ConfigError::EmptyViewport(cli.viewport_width, cli.viewport_height));
        }
        let capture_timeout = match cli.capture_timeout_secs {
            Some(0) => return Err(ConfigError::ZeroTimeout),
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        Ok(Self {
            addr: SocketAddr::new(cli.host, cli.port),
            token: cli.token,
            chrome_path: cli.chrome_path,
            sandbox: !cli.no_sandbox,
            capture_timeout,
            max_body_bytes: cli.max_body_bytes,
            default_profile: DeviceProfile {
                viewport: Viewport {
                    width: cli.viewport_width,
                    height: cli.viewport_height,
                },
                user_agent: cli.user_agent,
                ..Default::default()
            },
        })
    }
}
