use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use docuchat_web::WebServerConfig;

/// Docuchat web server
#[derive(Parser)]
#[command(name = "docuchat-web")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML); defaults apply when it does not exist
    #[arg(short, long, default_value = "docuchat.toml", env = "DOCUCHAT_CONFIG")]
    config: PathBuf,

    /// Listen address, overrides the config file and DOCUCHAT_WEB_ADDR
    #[arg(long)]
    listen: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = WebServerConfig::load(&cli.config)?;
    cfg.apply_env();
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
    }

    let addr: SocketAddr = cfg.listen.parse()?;

    info!(
        "Starting Docuchat on http://{} (config: {}, password gate: {})",
        addr,
        cli.config.display(),
        if cfg.access_password.is_some() { "on" } else { "off" }
    );

    docuchat_web::server::serve(addr, cfg).await
}
