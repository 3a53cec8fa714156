//! CatalogListener - catalog polling actor
//!
//! Polls an event service for newly catalogued seismicity, quality-controls
//! what comes back, and files accepted events (and optionally their
//! templates) into the bank. A cloneable [`ListenerHandle`] exposes the
//! recently accepted event ids so the reactor can evaluate triggers without
//! reaching into the actor.
//!
//! # Lifecycle
//! 1. Poll immediately on start, then every `poll_interval` seconds
//! 2. Each poll covers (previous poll, now); a failed fetch skips the window
//! 3. Accepted events stay in the dedup memory for `keep` seconds
//! 4. Cancellation stops the loop at the next sleep

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use aftershock_bank::{EventQuery, TemplateBank, WaveformSource};
use aftershock_core::config::{ListenerConfig, TemplateConfig};
use aftershock_core::{EvaluationMode, Event, ResourceId, UtcTime, event_time};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::client::EventSource;

/// Quality-control a freshly fetched catalog.
///
/// Events are dropped when their type is outside the allow-list, when the
/// manual-review policy excludes them, or when fewer than `min_stations`
/// distinct stations carry picks. With `require_manual_picks` set,
/// automatic picks are stripped before stations are counted.
pub fn filter_events(events: Vec<Event>, config: &ListenerConfig) -> Vec<Event> {
  let before = events.len();
  let mut kept = Vec::with_capacity(before);
  for mut event in events {
    if let Some(types) = &config.event_types {
      let listed = event
        .event_type
        .as_deref()
        .is_some_and(|t| types.iter().any(|allowed| allowed == t));
      if !listed {
        debug!(id = %event.resource_id, kind = ?event.event_type, "dropping event outside the type allow-list");
        continue;
      }
    }
    if config.require_manual_picks {
      if event.all_picks_automatic() {
        debug!(id = %event.resource_id, "dropping event with only automatic picks");
        continue;
      }
      event.picks.retain(|p| p.evaluation_mode == EvaluationMode::Manual);
    }
    let stations = event.picked_stations().len();
    if stations < config.min_stations {
      debug!(
        id = %event.resource_id,
        stations,
        min_stations = config.min_stations,
        "dropping event picked on too few stations"
      );
      continue;
    }
    kept.push(event);
  }
  if kept.len() < before {
    debug!(before, after = kept.len(), "catalog filter dropped events");
  }
  kept
}

/// Shared view of what the listener has accepted recently.
///
/// The reactor polls this when evaluating triggers; the listener uses it to
/// avoid re-ingesting events across polls. Entries age out after the
/// configured `keep` window.
#[derive(Debug, Clone, Default)]
pub struct ListenerHandle {
  seen: Arc<RwLock<Vec<(ResourceId, UtcTime)>>>,
}

impl ListenerHandle {
  fn read(&self) -> RwLockReadGuard<'_, Vec<(ResourceId, UtcTime)>> {
    self.seen.read().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn write(&self) -> RwLockWriteGuard<'_, Vec<(ResourceId, UtcTime)>> {
    self.seen.write().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn known(&self, id: &ResourceId) -> bool {
    self.read().iter().any(|(seen, _)| seen == id)
  }

  /// Ids currently in memory, oldest first.
  pub fn recent_ids(&self) -> Vec<ResourceId> {
    self.read().iter().map(|(id, _)| id.clone()).collect()
  }

  pub fn recent_count(&self) -> usize {
    self.read().len()
  }

  pub fn remember(&self, events: &[Event]) {
    let mut seen = self.write();
    for event in events {
      seen.push((event.resource_id.clone(), event_time(event)));
    }
  }

  /// Forget events that happened before `cutoff`.
  pub fn expire(&self, cutoff: UtcTime) {
    self.write().retain(|(_, time)| *time >= cutoff);
  }
}

/// Catalog polling actor. See the module docs for the lifecycle.
pub struct CatalogListener {
  source: Arc<dyn EventSource>,
  bank: Arc<TemplateBank>,
  waveforms: Arc<dyn WaveformSource>,
  config: ListenerConfig,
  template_config: TemplateConfig,
  handle: ListenerHandle,
  previous_time: UtcTime,
  cancel: CancellationToken,
}

impl CatalogListener {
  pub fn new(
    source: Arc<dyn EventSource>,
    bank: Arc<TemplateBank>,
    waveforms: Arc<dyn WaveformSource>,
    config: ListenerConfig,
    template_config: TemplateConfig,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      source,
      bank,
      waveforms,
      config,
      template_config,
      handle: ListenerHandle::default(),
      previous_time: UtcTime::now(),
      cancel,
    }
  }

  /// Pre-seed the dedup memory, typically with events already in the bank,
  /// so a restart does not re-ingest them.
  pub fn with_memory(self, events: &[Event]) -> Self {
    self.handle.remember(events);
    self
  }

  /// Poll from `time` instead of from construction time.
  pub fn with_start_time(mut self, time: UtcTime) -> Self {
    self.previous_time = time;
    self
  }

  pub fn handle(&self) -> ListenerHandle {
    self.handle.clone()
  }

  pub fn spawn(self) -> JoinHandle<()> {
    tokio::spawn(self.run())
  }

  pub async fn run(mut self) {
    info!("CatalogListener started");
    loop {
      self.poll().await;
      tokio::select! {
        biased;
        _ = self.cancel.cancelled() => {
          info!("CatalogListener shutting down (cancelled)");
          break;
        }
        _ = tokio::time::sleep(Duration::from_secs_f64(self.config.poll_interval)) => {}
      }
    }
    info!("CatalogListener stopped");
  }

  async fn poll(&mut self) {
    let now = UtcTime::now();
    self.handle.expire(now - self.config.keep);

    let query = EventQuery::between(self.previous_time, now);
    let fetched = match self.source.get_events(&query).await {
      Ok(events) => events,
      Err(error) => {
        error!(start = %self.previous_time, end = %now, %error, "could not download events");
        self.previous_time = now;
        return;
      }
    };
    self.previous_time = now;

    let fresh: Vec<Event> = filter_events(fetched, &self.config)
      .into_iter()
      .filter(|event| !self.handle.known(&event.resource_id))
      .collect();
    if fresh.is_empty() {
      return;
    }
    info!(events = fresh.len(), "listener accepted new events");

    if let Err(error) = self.bank.put_events(&fresh) {
      error!(%error, "could not store events, will retry next poll");
      return;
    }
    self.handle.remember(&fresh);

    if self.config.build_templates {
      match self
        .bank
        .make_templates(&fresh, self.waveforms.as_ref(), &self.template_config)
        .await
      {
        Ok(tribe) => debug!(templates = tribe.len(), "built templates for new events"),
        Err(error) => error!(%error, "template construction failed"),
      }
    }
  }
}
