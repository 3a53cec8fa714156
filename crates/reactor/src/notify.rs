//! Webhook notification sink.

use std::sync::Arc;

use aftershock_core::config::DetectionConfig;
use aftershock_core::{LogNotifier, Notifier};
use tracing::warn;

/// POSTs notifications as JSON to a fixed URL.
///
/// Sends are fire-and-forget on the current runtime so a slow or dead
/// endpoint cannot stall the detection loop.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
  client: reqwest::Client,
  url: String,
  level: u8,
}

impl WebhookNotifier {
  pub fn new(url: impl Into<String>, level: u8) -> Self {
    Self {
      client: reqwest::Client::new(),
      url: url.into(),
      level,
    }
  }
}

impl Notifier for WebhookNotifier {
  fn level(&self) -> u8 {
    self.level
  }

  fn send(&self, message: &str) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
      warn!("webhook notifier used outside a runtime, dropping message");
      return;
    };
    let client = self.client.clone();
    let url = self.url.clone();
    let payload = serde_json::json!({ "message": message });
    handle.spawn(async move {
      if let Err(error) = client.post(&url).json(&payload).send().await {
        warn!(%error, "webhook notification failed");
      }
    });
  }
}

/// Webhook when one is configured, otherwise plain log output.
pub fn notifier_from_config(config: &DetectionConfig) -> Arc<dyn Notifier> {
  match &config.webhook_url {
    Some(url) => Arc::new(WebhookNotifier::new(url.clone(), 2)),
    None => Arc::new(LogNotifier::default()),
  }
}
