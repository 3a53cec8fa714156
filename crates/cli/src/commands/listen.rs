//! Listen command

use std::sync::Arc;

use aftershock_bank::TemplateBank;
use aftershock_core::Config;
use aftershock_reactor::{CatalogListener, FdsnClient};
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run the catalog listener alone until ctrl-c.
pub async fn cmd_listen(config: Config) -> Result<()> {
  let bank = Arc::new(TemplateBank::open(config.bank).context("could not open the template bank")?);
  let client = Arc::new(FdsnClient::new(&config.client).context("could not build the web service client")?);
  let cancel = CancellationToken::new();

  let listener = CatalogListener::new(
    client.clone(),
    bank.clone(),
    client,
    config.listener,
    config.template,
    cancel.clone(),
  );
  let task = listener.spawn();

  tokio::signal::ctrl_c().await.context("could not listen for ctrl-c")?;
  info!("ctrl-c received, shutting down");
  cancel.cancel();
  task.await.context("listener task failed")?;

  println!("Bank now holds {} events", bank.event_count());
  Ok(())
}
