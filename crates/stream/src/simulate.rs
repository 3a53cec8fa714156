//! SimulatedClient - Replay an archive as if it were arriving live
//!
//! Drip-feeds archived waveforms into a buffer at (optionally accelerated)
//! wall-clock pace, so the whole detection pipeline can be exercised against
//! a past sequence without touching a seedlink server. Query timing is
//! jittered the way a real feed's packet cadence is.

use std::time::Duration;

use aftershock_core::{SeedId, UtcTime};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::archive::WaveArchive;
use crate::client::BufferHandle;

pub struct SimulatedClient {
  archive: WaveArchive,
  selectors: Vec<SeedId>,
  start: UtcTime,
  end: UtcTime,
  speed_up: f64,
  query_interval: f64,
  handle: BufferHandle,
  cancel: CancellationToken,
}

impl SimulatedClient {
  pub fn new(
    archive: WaveArchive,
    capacity_secs: f64,
    start: UtcTime,
    end: UtcTime,
    speed_up: f64,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      archive,
      selectors: Vec::new(),
      start,
      end,
      speed_up: speed_up.max(f64::MIN_POSITIVE),
      query_interval: 10.0,
      handle: BufferHandle::new(capacity_secs),
      cancel,
    }
  }

  /// Seconds of simulated time delivered per query. Defaults to 10.
  pub fn with_query_interval(mut self, secs: f64) -> Self {
    self.query_interval = secs.max(f64::MIN_POSITIVE);
    self
  }

  /// Restrict replay to channels matching `selector`. With no selections,
  /// every channel in the archive is replayed.
  pub fn select_stream(&mut self, selector: SeedId) {
    self.selectors.push(selector);
  }

  pub fn handle(&self) -> BufferHandle {
    self.handle.clone()
  }

  pub fn spawn(self) -> tokio::task::JoinHandle<()> {
    tokio::spawn(self.run())
  }

  /// Run the replay until the end time, or until cancelled.
  pub async fn run(mut self) {
    if self.selectors.is_empty() {
      self.selectors = self.archive.channels();
    }
    info!(
      start = %self.start,
      end = %self.end,
      speed_up = self.speed_up,
      channels = self.selectors.len(),
      "SimulatedClient started"
    );

    let mut current = self.start;
    while current < self.end && !self.cancel.is_cancelled() {
      let window_end = (current + self.query_interval).min(self.end);
      for selector in &self.selectors {
        match self.archive.get_waveforms(selector, current, window_end) {
          Ok(stream) if !stream.is_empty() => {
            self.handle.add_stream(&stream).await;
          }
          Ok(_) => {}
          Err(error) => {
            warn!(selector = %selector, %error, "replay read failed");
          }
        }
      }

      // Real feeds do not tick like clockwork.
      let jitter = rand::thread_rng().gen_range(0.8..1.2);
      let pause = Duration::from_secs_f64(self.query_interval * jitter / self.speed_up);
      tokio::select! {
        biased;
        _ = self.cancel.cancelled() => break,
        _ = tokio::time::sleep(pause) => {}
      }
      current = window_end;
    }

    info!("SimulatedClient stopped");
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use aftershock_waveform::Trace;
  use tempfile::TempDir;

  use super::*;

  #[tokio::test]
  async fn replays_archive_into_buffer() {
    let dir = TempDir::new().unwrap();
    let archive = WaveArchive::new(dir.path());
    let trace = Trace::new(
      "NZ.WVZ.10.HHZ".parse().unwrap(),
      UtcTime::from_epoch(0.0),
      1.0,
      (0..30).map(|v| v as f32).collect(),
    );
    archive.append(&trace).unwrap();

    let cancel = CancellationToken::new();
    let client = SimulatedClient::new(
      archive,
      60.0,
      UtcTime::from_epoch(0.0),
      UtcTime::from_epoch(30.0),
      1000.0,
      cancel,
    );
    let handle = client.handle();
    // Three 10 s windows at ~10 ms simulated pace each.
    tokio::time::timeout(Duration::from_secs(5), client.run()).await.unwrap();

    assert!(handle.buffer_length_secs().await >= 29.0);
    let stream = handle.snapshot().await;
    assert_eq!(stream.len(), 1);
    let trace = &stream.traces[0];
    assert_eq!(trace.data[trace.data.len() - 1], 29.0);
  }

  #[tokio::test]
  async fn cancellation_stops_replay() {
    let dir = TempDir::new().unwrap();
    let archive = WaveArchive::new(dir.path());
    archive
      .append(&Trace::new(
        "NZ.WVZ.10.HHZ".parse().unwrap(),
        UtcTime::from_epoch(0.0),
        1.0,
        vec![1.0; 100],
      ))
      .unwrap();

    let cancel = CancellationToken::new();
    // Slow replay, cancelled almost immediately.
    let client = SimulatedClient::new(
      archive,
      120.0,
      UtcTime::from_epoch(0.0),
      UtcTime::from_epoch(100.0),
      1.0,
      cancel.clone(),
    );
    let task = client.spawn();
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
  }
}
