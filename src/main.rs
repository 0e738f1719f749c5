use clap::Parser;
use tracing::info;

use tarn::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::parse();

    let level = if config.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(version = env!("CARGO_PKG_VERSION"), "tarn starting");

    let server = tarn::irc::server::start(&config).await?;
    info!(
        irc = ?server.irc_addr(),
        tls = ?server.tls_addr(),
        metrics = ?server.metrics_addr(),
        health = ?server.health_addr(),
        "accepting connections"
    );
    tokio::signal::ctrl_c().await?;
    server.shutdown().await;
    Ok(())
}
