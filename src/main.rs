use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use sfu_signal::config::{Config, Opts};
use sfu_signal::core::Core;
use sfu_signal::media::sim::SimMediaEngine;
use sfu_signal::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::try_init().context("failed to install logger")?;

    let config = Config::resolve(Opts::parse());
    log::info!("starting sfu-signal on port {}", config.port);

    let engine = Arc::new(SimMediaEngine::new());
    let core = Core::new(config.token_secret, engine);

    server::serve(core, config.port).await;
    Ok(())
}
