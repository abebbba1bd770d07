use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use transcode_proxy::config::{resolve_config, ConfigOverrides};
use transcode_proxy::lifecycle::startup;
use transcode_proxy::observability::init_logging;

#[derive(Parser)]
#[command(name = "transcode-proxy", version)]
#[command(about = "HTTP proxy that transcodes upstream media through an external process", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "TRANSCODE_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Upstream base URL, e.g. http://frigate:5000
    #[arg(short, long, env = "REMOTE_HOST")]
    upstream: Option<String>,

    /// Listen address, e.g. 0.0.0.0:8080
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Log level or filter directives
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let overrides = ConfigOverrides {
        upstream_base: cli.upstream,
        bind_address: cli.listen,
        log_level: cli.log_level,
    };
    let config = match resolve_config(cli.config.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("transcode-proxy: invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("transcode-proxy: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.base_url,
        transcoder = %config.transcoder.program,
        "transcode-proxy starting"
    );

    match startup::run(config).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}
