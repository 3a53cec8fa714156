//! Reactor command

use std::sync::Arc;

use aftershock_bank::TemplateBank;
use aftershock_core::Config;
use aftershock_reactor::{FdsnClient, Reactor, notifier_from_config, tcp_source_factory};
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run the full reactive system until ctrl-c.
pub async fn cmd_reactor(config: Config) -> Result<()> {
  let bank = Arc::new(TemplateBank::open(config.bank.clone()).context("could not open the template bank")?);
  let client = Arc::new(FdsnClient::new(&config.client).context("could not build the web service client")?);
  let notifier = notifier_from_config(&config.detection);
  let sources = tcp_source_factory(&config.streaming);
  let detect_directory = config.detection.detect_directory.clone();
  let cancel = CancellationToken::new();

  let reactor = Reactor::new(
    client.clone(),
    client.clone(),
    client,
    sources,
    bank,
    config,
    notifier,
    cancel.clone(),
  );
  let task = reactor.spawn();

  tokio::signal::ctrl_c().await.context("could not listen for ctrl-c")?;
  info!("ctrl-c received, shutting down");
  cancel.cancel();
  let party = task.await.context("reactor task failed")?;

  println!(
    "Made {} detections, written under {}",
    party.len(),
    detect_directory.display()
  );
  Ok(())
}
