use clap::Parser;
use env_logger::Env;
use pagesnap::cdp::CdpLauncher;
use pagesnap::config::{Cli, ServerConfig};
use pagesnap::{CaptureOptions, Capturer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(cli.log_level.as_str())).init();

    let config = ServerConfig::try_from(cli)?;
    if config.capture_timeout.is_none() {
        log::debug!("No capture timeout configured; a hung page blocks its request indefinitely");
    }

    let launcher = CdpLauncher {
        chrome_path: config.chrome_path.clone(),
        sandbox: config.sandbox,
    };
    let capturer = Capturer::new(
        launcher,
        CaptureOptions {
            timeout: config.capture_timeout,
            ..Default::default()
        },
    );

    pagesnap::server::serve(&config, capturer).await?;
    Ok(())
}
