mod channel;
mod codec;
mod config;
mod crc32;
mod dispatcher;
mod participant;
mod registry;

use anyhow::Context;
use clap::Parser;
use config::{Config, ServerConfig};
use dispatcher::Dispatcher;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Config::parse();
    let bind_addr = cli.bind_addr().context("invalid --host/--port")?;
    let server_config = ServerConfig::from(&cli);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    runtime.block_on(async move {
        let dispatcher = Dispatcher::bind(bind_addr, server_config)
            .with_context(|| format!("failed to bind udp socket on {bind_addr}"))?;
        info!(addr = %dispatcher.local_addr()?, "throttletalk-server listening");
        dispatcher.run().await
    })
}
