//! Reactor - turns catalog activity into detection runs
//!
//! The reactor supervises one [`CatalogListener`] and any number of
//! [`RealTimeDetector`] runs. Each pass it pulls the recently seen events
//! from the listener, applies the trigger policy, and for every fresh
//! trigger: estimates a search region, loads the bank's templates for it,
//! ranks stations, opens a packet stream, and spawns a detector. A template
//! only ever runs in one detector at a time.
//!
//! # Lifecycle
//! 1. Spawn the listener
//! 2. Every `sleep_step` seconds: reap finished runs, evaluate triggers,
//!    spin up new runs while slots are free
//! 3. On cancellation: drain the detectors first, then stop the listener

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use aftershock_bank::{EventQuery, TemplateBank, WaveformSource};
use aftershock_core::config::{Config, StreamingConfig};
use aftershock_core::geo::km_to_degrees;
use aftershock_core::{Event, Notifier, Region, ResourceId, SeedId, UtcTime};
use aftershock_stream::{PacketSource, SourceError, StreamingClient, TcpPacketSource, WaveArchive, backfill};
use aftershock_xcorr::Party;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{CHANNEL_PRIORITIES, EventSource, StationSource};
use crate::detector::RealTimeDetector;
use crate::listener::{CatalogListener, ListenerHandle};
use crate::triggers::{MIN_REGION_LENGTH_KM, estimate_region, magnitude_rate_trigger, select_stations};

/// Decides which catalog events deserve a detection run.
pub type TriggerFunc = Arc<dyn Fn(&[Event]) -> Vec<Event> + Send + Sync>;

/// Opens a fresh packet source for each detection run.
pub type SourceFactory = Arc<dyn Fn() -> BoxFuture<'static, Result<Box<dyn PacketSource>, SourceError>> + Send + Sync>;

/// A [`SourceFactory`] connecting to the configured TCP packet feed.
pub fn tcp_source_factory(config: &StreamingConfig) -> SourceFactory {
  let host = config.host.clone();
  let port = config.port;
  Arc::new(move || {
    let host = host.clone();
    Box::pin(async move {
      let source = TcpPacketSource::connect(&host, port).await?;
      Ok(Box::new(source) as Box<dyn PacketSource>)
    })
  })
}

/// One live detection run as seen from outside.
#[derive(Debug, Clone)]
pub struct RunStatus {
  pub trigger_id: ResourceId,
  pub templates: usize,
  pub channels: usize,
  pub started: UtcTime,
}

/// Shared view of the runs currently spinning. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ReactorHandle {
  runs: Arc<DashMap<String, RunStatus>>,
}

impl ReactorHandle {
  pub fn running_count(&self) -> usize {
    self.runs.len()
  }

  pub fn is_running(&self, id: &ResourceId) -> bool {
    self.runs.contains_key(&id.0)
  }

  pub fn statuses(&self) -> Vec<RunStatus> {
    self.runs.iter().map(|entry| entry.value().clone()).collect()
  }

  fn insert(&self, status: RunStatus) {
    self.runs.insert(status.trigger_id.0.clone(), status);
  }

  fn remove(&self, id: &ResourceId) {
    self.runs.remove(&id.0);
  }
}

struct DetectionRun {
  trigger_id: ResourceId,
  template_names: Vec<String>,
  cancel: CancellationToken,
  detector: JoinHandle<Party>,
  client: JoinHandle<()>,
}

/// The orchestrator. See the module docs for the lifecycle.
pub struct Reactor {
  listener: Option<CatalogListener>,
  listener_cancel: CancellationToken,
  listener_handle: ListenerHandle,
  bank: Arc<TemplateBank>,
  stations: Arc<dyn StationSource>,
  sources: SourceFactory,
  config: Config,
  notifier: Arc<dyn Notifier>,
  trigger: TriggerFunc,
  handle: ReactorHandle,
  runs: Vec<DetectionRun>,
  running_templates: HashSet<String>,
  seen_triggers: HashSet<ResourceId>,
  party: Party,
  max_parallel: usize,
  speed_up: f64,
  cancel: CancellationToken,
}

impl Reactor {
  pub fn new(
    events: Arc<dyn EventSource>,
    stations: Arc<dyn StationSource>,
    waveforms: Arc<dyn WaveformSource>,
    sources: SourceFactory,
    bank: Arc<TemplateBank>,
    config: Config,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
  ) -> Self {
    // The listener gets its own token so detectors can be drained before
    // it stops feeding the bank.
    let listener_cancel = CancellationToken::new();
    let listener = CatalogListener::new(
      events,
      bank.clone(),
      waveforms,
      config.listener.clone(),
      config.template.clone(),
      listener_cancel.clone(),
    );
    let listener_handle = listener.handle();

    let trigger_config = config.reactor.clone();
    let trigger: TriggerFunc = Arc::new(move |catalog| magnitude_rate_trigger(catalog, &trigger_config));
    let max_parallel = config
      .reactor
      .max_parallel_detections
      .unwrap_or_else(|| (num_cpus::get() / 2).max(1));

    Self {
      listener: Some(listener),
      listener_cancel,
      listener_handle,
      bank,
      stations,
      sources,
      config,
      notifier,
      trigger,
      handle: ReactorHandle::default(),
      runs: Vec::new(),
      running_templates: HashSet::new(),
      seen_triggers: HashSet::new(),
      party: Party::new(),
      max_parallel,
      speed_up: 1.0,
      cancel,
    }
  }

  /// Replace the default magnitude-or-rate policy.
  pub fn with_trigger(mut self, trigger: TriggerFunc) -> Self {
    self.trigger = trigger;
    self
  }

  /// Scale detector waits down by `speed_up` (at least 1) when replaying
  /// faster than real time.
  pub fn with_speed_up(mut self, speed_up: f64) -> Self {
    self.speed_up = speed_up.max(1.0);
    self
  }

  pub fn handle(&self) -> ReactorHandle {
    self.handle.clone()
  }

  pub fn listener_handle(&self) -> ListenerHandle {
    self.listener_handle.clone()
  }

  pub fn spawn(self) -> JoinHandle<Party> {
    tokio::spawn(self.run())
  }

  /// Run until cancelled. Returns every detection made across all runs,
  /// merged into one party.
  pub async fn run(mut self) -> Party {
    info!(max_parallel = self.max_parallel, "Reactor started");
    let Some(listener) = self.listener.take() else {
      error!("Reactor started twice");
      return std::mem::take(&mut self.party);
    };
    let listener_task = listener.spawn();

    loop {
      self.reap_finished().await;
      self.process_triggers().await;
      tokio::select! {
        biased;
        _ = self.cancel.cancelled() => {
          info!("Reactor shutting down (cancelled)");
          break;
        }
        _ = tokio::time::sleep(Duration::from_secs_f64(self.config.reactor.sleep_step)) => {}
      }
    }

    // Run tokens are children of ours, so every detector is already
    // winding down. Drain them before silencing the listener.
    for run in std::mem::take(&mut self.runs) {
      match run.detector.await {
        Ok(party) => {
          info!(trigger = %run.trigger_id, detections = party.len(), "detection run finished");
          self.party.merge(party);
        }
        Err(error) => error!(trigger = %run.trigger_id, %error, "detection run panicked"),
      }
      let _ = run.client.await;
      self.handle.remove(&run.trigger_id);
    }
    self.listener_cancel.cancel();
    if let Err(error) = listener_task.await {
      error!(%error, "listener task died");
    }

    info!(detections = self.party.len(), "Reactor stopped");
    self.party
  }

  /// Collect finished runs and release their templates for re-triggering.
  async fn reap_finished(&mut self) {
    for run in std::mem::take(&mut self.runs) {
      if !run.detector.is_finished() {
        self.runs.push(run);
        continue;
      }
      match run.detector.await {
        Ok(party) => {
          info!(trigger = %run.trigger_id, detections = party.len(), "detection run finished");
          self.party.merge(party);
        }
        Err(error) => error!(trigger = %run.trigger_id, %error, "detection run panicked"),
      }
      run.cancel.cancel();
      let _ = run.client.await;
      for name in &run.template_names {
        self.running_templates.remove(name);
      }
      self.handle.remove(&run.trigger_id);
    }
  }

  async fn process_triggers(&mut self) {
    let ids = self.listener_handle.recent_ids();
    if ids.is_empty() {
      return;
    }
    let catalog = match self.bank.get_events_by_id(&ids) {
      Ok(events) => events,
      Err(error) => {
        error!(%error, "could not load recent events from the bank");
        return;
      }
    };
    for event in (self.trigger)(&catalog) {
      if self.seen_triggers.contains(&event.resource_id) {
        continue;
      }
      if self.runs.len() >= self.max_parallel {
        warn!(running = self.runs.len(), "no free detection slots, deferring trigger");
        break;
      }
      self.spin_up(event).await;
    }
  }

  /// Try to start a detection run for one triggering event. Transient
  /// failures leave the trigger unseen so the next pass retries it.
  async fn spin_up(&mut self, event: Event) {
    let trigger_id = event.resource_id.clone();
    let Some(region) = estimate_region(&event, MIN_REGION_LENGTH_KM) else {
      // Nothing to centre a search on. Never retry.
      self.seen_triggers.insert(trigger_id);
      return;
    };

    let mut tribe = match self.bank.get_templates(&EventQuery::within(region)).await {
      Ok(tribe) => tribe,
      Err(error) => {
        error!(trigger = %trigger_id, %error, "could not load templates, will retry");
        return;
      }
    };
    tribe.templates.retain(|t| !self.running_templates.contains(&t.name));
    if tribe.is_empty() {
      // The listener may still be building templates for this sequence.
      debug!(trigger = %trigger_id, "no free templates around the trigger yet");
      return;
    }

    let station_region = Region::new(
      region.latitude,
      region.longitude,
      km_to_degrees(self.config.reactor.max_station_distance),
    );
    let stations = match self.stations.get_stations(&station_region, &CHANNEL_PRIORITIES).await {
      Ok(stations) => stations,
      Err(error) => {
        error!(trigger = %trigger_id, %error, "station query failed, will retry");
        return;
      }
    };
    let chosen = select_stations(&stations, &tribe, self.config.reactor.n_stations, &station_region);
    if chosen.is_empty() {
      warn!(trigger = %trigger_id, "no stations available around the trigger, will retry");
      return;
    }

    let source = match (self.sources)().await {
      Ok(source) => source,
      Err(error) => {
        error!(trigger = %trigger_id, %error, "could not open a packet source, will retry");
        return;
      }
    };
    let run_cancel = self.cancel.child_token();
    let capacity = self.config.streaming.buffer_capacity;
    let mut client = StreamingClient::new(source, capacity, run_cancel.clone());
    if let Some(path) = &self.config.streaming.archive_path {
      client = client.with_archive(WaveArchive::new(path));
    }
    for info in &chosen {
      if let Err(error) = client
        .select_stream(&info.seed_id.network, &info.seed_id.station, &info.seed_id.channel)
        .await
      {
        warn!(id = %info.seed_id, %error, "could not select channel");
      }
    }
    let buffer = client.handle();
    let available: Vec<SeedId> = chosen.iter().map(|info| info.seed_id.clone()).collect();
    if let Some(path) = &self.config.streaming.archive_path {
      backfill(&buffer, &WaveArchive::new(path), &available, UtcTime::now(), capacity).await;
    }

    let detector = match RealTimeDetector::new(
      format!("run-{}", trigger_id.tail()),
      tribe,
      buffer,
      capacity,
      &available,
      self.config.detection.clone(),
      self.notifier.clone(),
      run_cancel.clone(),
    ) {
      Ok(detector) => detector.with_speed_up(self.speed_up),
      Err(error) => {
        // A structural mismatch will not fix itself. Never retry.
        error!(trigger = %trigger_id, %error, "could not build a detector for the trigger");
        self.seen_triggers.insert(trigger_id);
        return;
      }
    };
    let template_names = detector.template_names();

    info!(
      trigger = %trigger_id,
      templates = template_names.len(),
      channels = available.len(),
      "spinning up detection run"
    );
    self.notifier.notify(
      &format!(
        "Reactor triggered by event {trigger_id}, running {} templates",
        template_names.len()
      ),
      2,
    );
    self.running_templates.extend(template_names.iter().cloned());
    self.seen_triggers.insert(trigger_id.clone());
    self.handle.insert(RunStatus {
      trigger_id: trigger_id.clone(),
      templates: template_names.len(),
      channels: available.len(),
      started: UtcTime::now(),
    });
    self.runs.push(DetectionRun {
      trigger_id,
      template_names,
      cancel: run_cancel,
      detector: detector.spawn(),
      client: client.spawn(),
    });
  }
}
