//! RealTimeDetector - repeated matched-filter passes over a live buffer
//!
//! One detector owns a tribe and a [`BufferHandle`] and correlates the two
//! every `detect_interval` seconds. Detections accumulate in a [`Party`]
//! that is declustered across passes, written under the detect directory,
//! and announced through the notifier.
//!
//! # Lifecycle
//! 1. Wait (up to a minute) for the expected channels to start flowing
//! 2. Let the buffer fill to one full process length
//! 3. Every `detect_interval` seconds: snapshot, process, correlate, report
//! 4. Stops on cancellation or the optional run-length and rate limits

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aftershock_core::config::DetectionConfig;
use aftershock_core::{Notifier, SeedId, UtcTime};
use aftershock_stream::BufferHandle;
use aftershock_waveform::{Stream, Trace, process};
use aftershock_xcorr::{Detection, Party, Tribe, match_filter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
  #[error("tribe has no usable templates")]
  EmptyTribe,
  #[error("buffer capacity {capacity}s is shorter than the template process length {needed}s")]
  BufferTooShort { capacity: f64, needed: f64 },
  #[error("buffer capacity {capacity}s is shorter than the detect interval {interval}s")]
  IntervalTooLong { capacity: f64, interval: f64 },
}

/// Matched-filter actor over one buffer. See the module docs for the
/// lifecycle.
pub struct RealTimeDetector {
  name: String,
  tribe: Tribe,
  buffer: BufferHandle,
  buffer_capacity: f64,
  expected_channels: HashSet<SeedId>,
  config: DetectionConfig,
  notifier: Arc<dyn Notifier>,
  party: Party,
  known_detections: HashSet<String>,
  cancel: CancellationToken,
  speed_up: f64,
  /// Longest template process length; one pass needs this much data.
  minimum_data: f64,
  lowcut: f64,
  highcut: f64,
  filt_order: u32,
  samp_rate: f64,
}

impl std::fmt::Debug for RealTimeDetector {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RealTimeDetector").field("name", &self.name).finish_non_exhaustive()
  }
}

impl RealTimeDetector {
  /// Build a detector over `buffer`.
  ///
  /// Channels used for detection are the template channels, intersected
  /// with `available_channels` when that list is non-empty, minus anything
  /// matching `config.exclude_channels`. Templates whose processing
  /// parameters disagree with the first template are dropped; the stream
  /// is processed once per pass and must match every template.
  pub fn new(
    name: impl Into<String>,
    tribe: Tribe,
    buffer: BufferHandle,
    buffer_capacity_secs: f64,
    available_channels: &[SeedId],
    config: DetectionConfig,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
  ) -> Result<Self, DetectorError> {
    let name = name.into();
    let Some(reference) = tribe.templates.first() else {
      return Err(DetectorError::EmptyTribe);
    };
    let (lowcut, highcut, filt_order, samp_rate) =
      (reference.lowcut, reference.highcut, reference.filt_order, reference.samp_rate);

    let mut tribe = tribe;
    let before = tribe.len();
    tribe.templates.retain(|t| {
      (t.samp_rate - samp_rate).abs() < 1e-6
        && (t.lowcut - lowcut).abs() < 1e-9
        && (t.highcut - highcut).abs() < 1e-9
        && t.filt_order == filt_order
    });
    if tribe.len() < before {
      warn!(
        detector = %name,
        dropped = before - tribe.len(),
        "dropping templates with mismatched processing parameters"
      );
    }
    if tribe.is_empty() {
      return Err(DetectorError::EmptyTribe);
    }

    let minimum_data = tribe.iter().map(|t| t.process_length).fold(0.0, f64::max);
    if buffer_capacity_secs < minimum_data {
      return Err(DetectorError::BufferTooShort {
        capacity: buffer_capacity_secs,
        needed: minimum_data,
      });
    }
    if buffer_capacity_secs < config.detect_interval {
      return Err(DetectorError::IntervalTooLong {
        capacity: buffer_capacity_secs,
        interval: config.detect_interval,
      });
    }

    let mut expected: HashSet<SeedId> = tribe.iter().flat_map(|t| t.channel_ids()).collect();
    if !available_channels.is_empty() {
      let available: HashSet<&SeedId> = available_channels.iter().collect();
      expected.retain(|id| available.contains(id));
    }
    expected.retain(|id| !config.exclude_channels.iter().any(|pattern| id.channel_matches(pattern)));
    if expected.is_empty() {
      warn!(detector = %name, "no detectable channels between the tribe and the available set");
    }

    Ok(Self {
      name,
      tribe,
      buffer,
      buffer_capacity: buffer_capacity_secs,
      expected_channels: expected,
      config,
      notifier,
      party: Party::new(),
      known_detections: HashSet::new(),
      cancel,
      speed_up: 1.0,
      minimum_data,
      lowcut,
      highcut,
      filt_order,
      samp_rate,
    })
  }

  /// Scale every wait down by `speed_up` (at least 1) when replaying
  /// archived data faster than real time.
  pub fn with_speed_up(mut self, speed_up: f64) -> Self {
    self.speed_up = speed_up.max(1.0);
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn template_names(&self) -> Vec<String> {
    self.tribe.template_names()
  }

  pub fn expected_channels(&self) -> &HashSet<SeedId> {
    &self.expected_channels
  }

  pub fn spawn(self) -> JoinHandle<Party> {
    tokio::spawn(self.run())
  }

  /// Run until cancelled or a stop condition fires. Returns everything
  /// detected, declustered.
  pub async fn run(mut self) -> Party {
    info!(
      detector = %self.name,
      templates = self.tribe.len(),
      channels = self.expected_channels.len(),
      "RealTimeDetector started"
    );
    let run_start = UtcTime::now();

    if self.wait_for_channels().await {
      info!(detector = %self.name, "RealTimeDetector stopped");
      return self.party;
    }
    let buffered = self.buffer.buffer_length_secs().await;
    if buffered < self.minimum_data {
      let wait = (self.minimum_data - buffered + 5.0) / self.speed_up;
      debug!(detector = %self.name, wait, "letting the buffer fill");
      if self.sleep_or_cancelled(wait).await {
        info!(detector = %self.name, "RealTimeDetector stopped");
        return self.party;
      }
    }

    let mut first_data: Option<UtcTime> = None;
    let mut iteration = 0usize;
    loop {
      if self.cancel.is_cancelled() {
        info!(detector = %self.name, "RealTimeDetector shutting down (cancelled)");
        break;
      }
      let pass_started = Instant::now();
      let snapshot = self.buffer.snapshot().await;
      let Some(last_data) = snapshot.latest_end() else {
        warn!(detector = %self.name, "no data in the buffer");
        if self.sleep_or_cancelled(self.config.detect_interval / self.speed_up).await {
          break;
        }
        continue;
      };
      if first_data.is_none() {
        first_data = snapshot.earliest_start();
      }

      let stream = self.prepare_stream(snapshot, last_data, iteration > 0);
      iteration += 1;
      if stream.is_empty() {
        warn!(detector = %self.name, "no usable channels this pass");
        if self.sleep_or_cancelled(self.config.detect_interval / self.speed_up).await {
          break;
        }
        continue;
      }

      let tribe = self.tribe.clone();
      let input = stream.clone();
      let (threshold, kind, trig_int) = (self.config.threshold, self.config.threshold_type, self.config.trig_int);
      let outcome = tokio::task::spawn_blocking(move || match_filter(&tribe, &input, threshold, kind, trig_int)).await;
      match outcome {
        Ok(Ok(fresh)) => self.handle_detections(fresh, &stream, last_data),
        Ok(Err(error)) => warn!(detector = %self.name, %error, "matched-filter pass failed"),
        Err(error) => {
          error!(detector = %self.name, %error, "matched-filter task died, stopping");
          break;
        }
      }

      let run_time = pass_started.elapsed().as_secs_f64();
      if self.config.detect_interval <= run_time {
        warn!(
          detector = %self.name,
          run_time,
          detect_interval = self.config.detect_interval,
          "detection is slower than the detect interval, backing off"
        );
        self.config.detect_interval = run_time + 10.0;
      }

      if let Some(max_run) = self.config.max_run_length
        && UtcTime::now() - run_start >= max_run
      {
        info!(detector = %self.name, "hit maximum run time, stopping");
        break;
      }
      if self.rate_below_minimum(first_data, last_data) {
        break;
      }
      if self.sleep_or_cancelled((self.config.detect_interval - run_time) / self.speed_up).await {
        break;
      }
    }

    info!(detector = %self.name, detections = self.party.len(), "RealTimeDetector stopped");
    self.party
  }

  /// Block until every expected channel is flowing, for at most a minute
  /// (scaled by speed_up). Returns true when cancelled instead.
  async fn wait_for_channels(&self) -> bool {
    if self.expected_channels.is_empty() {
      return false;
    }
    let max_wait = 60.0_f64.min(self.buffer_capacity);
    let deadline = Instant::now() + Duration::from_secs_f64(max_wait / self.speed_up);
    loop {
      let have = self
        .buffer
        .channels()
        .await
        .into_iter()
        .filter(|id| self.expected_channels.contains(id))
        .count();
      if have >= self.expected_channels.len() {
        debug!(detector = %self.name, channels = have, "all expected channels are flowing");
        return false;
      }
      if Instant::now() >= deadline {
        warn!(
          detector = %self.name,
          have,
          expected = self.expected_channels.len(),
          "starting without the full channel set"
        );
        return false;
      }
      if self.sleep_or_cancelled(1.0 / self.speed_up).await {
        return true;
      }
    }
  }

  /// Sleep, returning true early when cancelled. Logs the shutdown so the
  /// callers only have to break.
  async fn sleep_or_cancelled(&self, secs: f64) -> bool {
    let cancelled = if secs <= 0.0 {
      self.cancel.is_cancelled()
    } else {
      tokio::select! {
        biased;
        _ = self.cancel.cancelled() => true,
        _ = tokio::time::sleep(Duration::from_secs_f64(secs)) => false,
      }
    };
    if cancelled {
      info!(detector = %self.name, "RealTimeDetector shutting down (cancelled)");
    }
    cancelled
  }

  /// Turn a raw buffer snapshot into correlator input: trim to the working
  /// window, drop unexpected or underfilled channels, zero the gaps,
  /// process to the template band and rate, align to a common grid.
  fn prepare_stream(&self, mut snapshot: Stream, last_data: UtcTime, trim: bool) -> Stream {
    // The first pass detects in everything the buffer holds.
    if trim {
      snapshot.trim(last_data - self.minimum_data, last_data);
    }
    snapshot.traces.retain(|tr| self.expected_channels.contains(&tr.id));

    let mut processed = Vec::with_capacity(snapshot.len());
    for mut trace in snapshot.traces {
      if (trace.valid_len() as f64) < 0.8 * self.minimum_data * trace.sampling_rate {
        warn!(
          detector = %self.name,
          id = %trace.id,
          valid = trace.valid_len(),
          "channel has too little data this pass, skipping"
        );
        continue;
      }
      // A masked lead-in or tail would ring through the filters; interior
      // gaps correlate as dead signal rather than stale ring samples.
      trace = trace.trim_masked_ends();
      if let Some(mask) = trace.mask.take() {
        for (k, masked) in mask.into_iter().enumerate() {
          if masked {
            trace.data[k] = 0.0;
          }
        }
      }
      match process(&trace, Some(self.lowcut), Some(self.highcut), self.filt_order, self.samp_rate) {
        Ok(trace) => processed.push(trace),
        Err(error) => warn!(detector = %self.name, id = %trace.id, %error, "could not process channel, skipping"),
      }
    }

    // The correlator wants equal starts and lengths across channels.
    let Some(start) = processed.iter().map(|tr| tr.starttime).max() else {
      return Stream::default();
    };
    let end = processed.iter().map(|tr| tr.endtime()).min().unwrap_or(start);
    let mut aligned: Vec<Trace> = processed.iter().map(|tr| tr.slice(start, end)).collect();
    let npts = aligned.iter().map(|tr| tr.npts()).min().unwrap_or(0);
    if npts == 0 {
      return Stream::default();
    }
    for trace in &mut aligned {
      trace.data.truncate(npts);
      if let Some(mask) = &mut trace.mask {
        mask.truncate(npts);
      }
    }
    Stream::new(aligned)
  }

  /// Fold a pass's detections into the running party, then write and
  /// announce whatever survives declustering and is new.
  fn handle_detections(&mut self, fresh: Party, stream: &Stream, last_data: UtcTime) {
    self.party.merge(fresh);
    self.party.decluster(self.config.trig_int);
    self.party.prune(last_data - self.config.keep_detections);

    let unseen: Vec<Detection> = self
      .party
      .detections()
      .filter(|d| !self.known_detections.contains(&d.id()))
      .cloned()
      .collect();
    for detection in &unseen {
      if let Err(error) = self.write_detection(detection, stream) {
        warn!(detector = %self.name, %error, "could not write detection");
      }
      self.notifier.notify(&format!("Made detection at {}", detection.detect_time), 2);
    }
    if !unseen.is_empty() {
      info!(detector = %self.name, new = unseen.len(), total = self.party.len(), "made detections");
    }
    self.known_detections = self.party.detections().map(|d| d.id()).collect();
  }

  /// One JSON file per detection under `{detect_directory}/{year}/{julday}`,
  /// with a waveform snippet beside it when configured.
  fn write_detection(&self, detection: &Detection, stream: &Stream) -> std::io::Result<()> {
    let dir = self.config.detect_directory.join(detection.detect_time.day_path());
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}.json", detection.id()));
    std::fs::write(&path, serde_json::to_string_pretty(detection).map_err(std::io::Error::other)?)?;

    if self.config.save_waveforms
      && let Some(event) = &detection.event
      && !event.picks.is_empty()
    {
      let mut times: Vec<UtcTime> = event.picks.iter().map(|p| p.time).collect();
      times.sort();
      let mut snippet = stream.clone();
      snippet.trim(times[0] - 10.0, times[times.len() - 1] + 20.0);
      let wf_path = dir.join(format!("{}.wf.json", detection.id()));
      std::fs::write(&wf_path, serde_json::to_string(&snippet).map_err(std::io::Error::other)?)?;
    }
    debug!(detector = %self.name, path = %path.display(), "wrote detection");
    Ok(())
  }

  /// True when the detection rate over the buffered window has fallen below
  /// the configured minimum. Never fires before the first detection.
  fn rate_below_minimum(&self, first_data: Option<UtcTime>, last_data: UtcTime) -> bool {
    let Some(minimum_rate) = self.config.minimum_rate else {
      return false;
    };
    if self.party.is_empty() {
      return false;
    }
    let earliest = last_data - self.config.keep_detections;
    let window_start = first_data.map_or(earliest, |fd| if fd > earliest { fd } else { earliest });
    let window_days = (last_data - window_start) / 86400.0;
    if window_days <= 0.0 {
      return false;
    }
    let count = self.party.detections().filter(|d| d.detect_time >= window_start).count();
    let rate = count as f64 / window_days;
    if rate < minimum_rate {
      info!(detector = %self.name, rate, minimum_rate, "detection rate fell below the minimum, stopping");
      return true;
    }
    false
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use aftershock_core::config::ThresholdKind;
  use aftershock_core::event::{EvaluationMode, Pick, ResourceId};
  use aftershock_core::{Event, LogNotifier};
  use aftershock_xcorr::{Family, Template};
  use pretty_assertions::assert_eq;
  use tempfile::TempDir;

  use super::*;

  fn noise(seed: u64, n: usize) -> Vec<f32> {
    let mut state = seed;
    (0..n)
      .map(|_| {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (state >> 33) as f32 / (1u64 << 31) as f32 - 1.0
      })
      .collect()
  }

  fn wiggle(n: usize) -> Vec<f32> {
    (0..n)
      .map(|i| ((i as f32 * 0.7).sin() * 2.0 + (i as f32 * 1.3).cos()) * 5.0)
      .collect()
  }

  fn template(name: &str, stream: Stream, pick_time: UtcTime) -> Template {
    let mut event = Event::new(ResourceId::generate());
    if let Some(first) = stream.traces.first() {
      event.picks.push(Pick {
        time: pick_time,
        waveform_id: first.id.clone(),
        phase_hint: Some("P".to_string()),
        evaluation_mode: EvaluationMode::Manual,
      });
    }
    Template {
      name: name.to_string(),
      event,
      stream,
      process_length: 30.0,
      prepick: 0.15,
      lowcut: 2.0,
      highcut: 10.0,
      samp_rate: 25.0,
      filt_order: 4,
    }
  }

  fn dummy_template(name: &str) -> Template {
    let t0 = UtcTime::from_epoch(0.0);
    template(
      name,
      Stream::new(vec![Trace::new("NZ.WVZ.10.HHZ".parse().unwrap(), t0, 25.0, vec![0.5; 100])]),
      t0 + 0.2,
    )
  }

  fn config(dir: &TempDir) -> DetectionConfig {
    DetectionConfig {
      detect_interval: 20.0,
      detect_directory: dir.path().to_path_buf(),
      ..DetectionConfig::default()
    }
  }

  fn detector(tribe: Tribe, capacity: f64, config: DetectionConfig) -> RealTimeDetector {
    RealTimeDetector::new(
      "det",
      tribe,
      BufferHandle::new(capacity),
      capacity,
      &[],
      config,
      Arc::new(LogNotifier::default()),
      CancellationToken::new(),
    )
    .unwrap()
  }

  #[test]
  fn constructor_rejects_unusable_setups() {
    let dir = TempDir::new().unwrap();
    let tribe = Tribe::new(vec![dummy_template("a")]);

    // Capacity below the 30 s process length.
    let err = RealTimeDetector::new(
      "det",
      tribe.clone(),
      BufferHandle::new(10.0),
      10.0,
      &[],
      config(&dir),
      Arc::new(LogNotifier::default()),
      CancellationToken::new(),
    )
    .unwrap_err();
    assert!(matches!(err, DetectorError::BufferTooShort { .. }));

    // Capacity below the detect interval.
    let mut cfg = config(&dir);
    cfg.detect_interval = 120.0;
    let err = RealTimeDetector::new(
      "det",
      tribe,
      BufferHandle::new(40.0),
      40.0,
      &[],
      cfg,
      Arc::new(LogNotifier::default()),
      CancellationToken::new(),
    )
    .unwrap_err();
    assert!(matches!(err, DetectorError::IntervalTooLong { .. }));

    let err = RealTimeDetector::new(
      "det",
      Tribe::default(),
      BufferHandle::new(40.0),
      40.0,
      &[],
      config(&dir),
      Arc::new(LogNotifier::default()),
      CancellationToken::new(),
    )
    .unwrap_err();
    assert!(matches!(err, DetectorError::EmptyTribe));
  }

  #[test]
  fn expected_channels_intersect_available_and_skip_horizontals() {
    let dir = TempDir::new().unwrap();
    let t0 = UtcTime::from_epoch(0.0);
    let tribe = Tribe::new(vec![template(
      "a",
      Stream::new(vec![
        Trace::new("NZ.WVZ.10.HHZ".parse().unwrap(), t0, 25.0, vec![0.5; 100]),
        Trace::new("NZ.WVZ.10.HHN".parse().unwrap(), t0, 25.0, vec![0.5; 100]),
      ]),
      t0 + 0.2,
    )]);

    // No availability list: template channels minus the excluded HHN.
    let det = detector(tribe.clone(), 60.0, config(&dir));
    assert_eq!(det.expected_channels().len(), 1);
    assert!(det.expected_channels().contains(&"NZ.WVZ.10.HHZ".parse().unwrap()));

    // An availability list that misses the template entirely.
    let available: Vec<SeedId> = vec!["NZ.JCZ.10.HHZ".parse().unwrap()];
    let det = RealTimeDetector::new(
      "det",
      tribe,
      BufferHandle::new(60.0),
      60.0,
      &available,
      config(&dir),
      Arc::new(LogNotifier::default()),
      CancellationToken::new(),
    )
    .unwrap();
    assert!(det.expected_channels().is_empty());
  }

  #[test]
  fn prepare_drops_short_channels_and_aligns_the_rest() {
    let dir = TempDir::new().unwrap();
    let t0 = UtcTime::from_epoch(0.0);
    let tribe = Tribe::new(vec![template(
      "a",
      Stream::new(vec![
        Trace::new("NZ.WVZ.10.HHZ".parse().unwrap(), t0, 25.0, vec![0.5; 100]),
        Trace::new("NZ.JCZ.10.HHZ".parse().unwrap(), t0, 25.0, vec![0.5; 100]),
        Trace::new("NZ.FOZ.10.HHZ".parse().unwrap(), t0, 25.0, vec![0.5; 100]),
      ]),
      t0 + 0.2,
    )]);
    let det = detector(tribe, 60.0, config(&dir));

    // 50 Hz raw channels: two long enough, one with only 10 s of data.
    let snapshot = Stream::new(vec![
      Trace::new("NZ.WVZ.10.HHZ".parse().unwrap(), UtcTime::from_epoch(0.0), 50.0, noise(1, 2000)),
      Trace::new("NZ.JCZ.10.HHZ".parse().unwrap(), UtcTime::from_epoch(5.0), 50.0, noise(2, 1750)),
      Trace::new("NZ.FOZ.10.HHZ".parse().unwrap(), UtcTime::from_epoch(30.0), 50.0, noise(3, 500)),
    ]);
    let prepared = det.prepare_stream(snapshot, UtcTime::from_epoch(40.0), false);

    assert_eq!(prepared.len(), 2);
    let a = &prepared.traces[0];
    let b = &prepared.traces[1];
    assert!((a.sampling_rate - 25.0).abs() < 1e-9);
    assert_eq!(a.npts(), b.npts());
    assert!((a.starttime - b.starttime).abs() < 0.5 / 25.0);
    // Roughly the 35 s overlap at the decimated rate.
    assert!(a.npts() >= 860);
    assert!(prepared.get(&"NZ.FOZ.10.HHZ".parse().unwrap()).is_none());
  }

  #[derive(Default)]
  struct Recorder {
    seen: Mutex<Vec<String>>,
  }

  impl Notifier for Recorder {
    fn level(&self) -> u8 {
      0
    }

    fn send(&self, message: &str) {
      self.seen.lock().unwrap().push(message.to_string());
    }
  }

  fn bare_detection(name: &str, epoch: f64, detect_val: f64) -> Detection {
    Detection {
      template_name: name.to_string(),
      detect_time: UtcTime::from_epoch(epoch),
      detect_val,
      threshold: 1.0,
      threshold_type: ThresholdKind::AvChanCorr,
      threshold_input: 0.5,
      no_chans: 1,
      chans: vec!["NZ.WVZ.10.HHZ".parse().unwrap()],
      event: None,
    }
  }

  #[test]
  fn repeated_detections_are_reported_once() {
    let dir = TempDir::new().unwrap();
    let recorder = Arc::new(Recorder::default());
    let tribe = Tribe::new(vec![dummy_template("a")]);
    let mut cfg = config(&dir);
    cfg.save_waveforms = false;
    let mut det = RealTimeDetector::new(
      "det",
      tribe.clone(),
      BufferHandle::new(60.0),
      60.0,
      &[],
      cfg,
      recorder.clone(),
      CancellationToken::new(),
    )
    .unwrap();

    let mut family = Family::new(tribe.templates[0].clone());
    family.detections.push(bare_detection("a", 100.0, 3.0));
    det.handle_detections(
      Party {
        families: vec![family.clone()],
      },
      &Stream::default(),
      UtcTime::from_epoch(100.0),
    );
    assert_eq!(recorder.seen.lock().unwrap().len(), 1);

    // The next pass sees the same detection again plus a new one.
    family.detections.push(bare_detection("a", 200.0, 4.0));
    det.handle_detections(
      Party { families: vec![family] },
      &Stream::default(),
      UtcTime::from_epoch(200.0),
    );
    assert_eq!(recorder.seen.lock().unwrap().len(), 2);

    // Both detections are on disk under {year}/{julday}.
    let day_dir = dir.path().join("1970").join("001");
    assert_eq!(std::fs::read_dir(day_dir).unwrap().count(), 2);
  }

  #[tokio::test]
  async fn detects_injected_signal_from_a_live_buffer() {
    let dir = TempDir::new().unwrap();
    let id: SeedId = "NZ.WVZ.10.HHZ".parse().unwrap();

    // Build the template from a processed copy of the signal to inject.
    let t0 = UtcTime::from_epoch(1_000.0);
    let wig = wiggle(200);
    let mut quiet = vec![0.0f32; 1000];
    quiet[500..700].copy_from_slice(&wig);
    let raw_template = Trace::new(id.clone(), t0, 50.0, quiet);
    let processed = process(&raw_template, Some(2.0), Some(10.0), 4, 25.0).unwrap();
    let snippet = processed.slice(t0 + 10.0, t0 + 14.0);
    let tribe = Tribe::new(vec![template("t1", Stream::new(vec![snippet]), t0 + 10.2)]);

    // 60 s of continuous noise with the same signal 30 s in.
    let c0 = UtcTime::from_epoch(5_000.0);
    let mut data = noise(7, 3000);
    data[1500..1700].copy_from_slice(&wig);
    let buffer = BufferHandle::new(60.0);
    buffer
      .add_stream(&Stream::new(vec![Trace::new(id.clone(), c0, 50.0, data)]))
      .await;

    let mut cfg = config(&dir);
    cfg.threshold = 0.6;
    cfg.detect_interval = 5.0;
    let cancel = CancellationToken::new();
    let det = RealTimeDetector::new(
      "aftershock-test",
      tribe,
      buffer,
      60.0,
      &[],
      cfg,
      Arc::new(LogNotifier::default()),
      cancel.clone(),
    )
    .unwrap();
    let task = det.spawn();

    // Detections land as JSON under the day directory.
    let day_dir = dir.path().join("1970").join("001");
    for _ in 0..400 {
      if day_dir.exists() && std::fs::read_dir(&day_dir).unwrap().count() > 0 {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();
    let party = task.await.unwrap();

    assert!(party.len() >= 1);
    assert!(
      party
        .detections()
        .any(|d| (d.detect_time.epoch() - 5_030.0).abs() < 0.5),
      "no detection near the injection time"
    );
    let detection = party.detections().next().unwrap();
    assert!(detection.event.is_some());
    assert!(day_dir.join(format!("{}.json", detection.id())).exists());
  }
}
