//! Rolling in-memory buffers for streamed waveform data.
//!
//! Each channel gets a fixed-capacity [`TraceBuffer`] anchored on the time of
//! its newest sample; older samples roll off the front as new packets arrive.
//! Slots that never received data stay masked, so gaps survive snapshotting
//! and can be discounted when judging whether a channel holds enough data to
//! correlate.

use std::collections::BTreeMap;

use aftershock_core::{SeedId, UtcTime};
use tracing::{debug, warn};

use crate::trace::{Stream, Trace};

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
  #[error("seed ids {expected} and {got} differ")]
  IdMismatch { expected: SeedId, got: SeedId },
  #[error("sampling rates {expected} and {got} differ")]
  SamplingMismatch { expected: f64, got: f64 },
}

/// Fixed-length ring of samples with a validity mask.
///
/// The ring is always at full capacity; slots without data are masked and
/// hold 0.0. Extending past the capacity drops the leftmost slots.
#[derive(Debug, Clone)]
pub struct SampleDeque {
  data: Vec<f32>,
  mask: Vec<bool>,
}

impl SampleDeque {
  pub fn new(maxlen: usize) -> Self {
    Self {
      data: vec![0.0; maxlen],
      mask: vec![true; maxlen],
    }
  }

  /// Seed with initial samples, right-aligned. Only the trailing `maxlen`
  /// samples are kept when `initial` is longer than the ring.
  pub fn with_data(initial: &[f32], maxlen: usize) -> Self {
    let mut ring = Self::new(maxlen);
    let take = initial.len().min(maxlen);
    let dest = maxlen - take;
    ring.data[dest..].copy_from_slice(&initial[initial.len() - take..]);
    for slot in &mut ring.mask[dest..] {
      *slot = false;
    }
    ring
  }

  pub fn maxlen(&self) -> usize {
    self.data.len()
  }

  pub fn valid_len(&self) -> usize {
    self.mask.iter().filter(|&&m| !m).count()
  }

  pub fn first_valid(&self) -> Option<usize> {
    self.mask.iter().position(|&m| !m)
  }

  /// Roll the ring `n` slots to the left; the freed trailing slots are
  /// masked. Rolling by the full capacity clears the ring.
  pub fn advance(&mut self, n: usize) {
    let maxlen = self.maxlen();
    if n == 0 {
      return;
    }
    if n >= maxlen {
      self.data.fill(0.0);
      self.mask.fill(true);
      return;
    }
    self.data.copy_within(n.., 0);
    self.mask.copy_within(n.., 0);
    let tail = maxlen - n;
    self.data[tail..].fill(0.0);
    self.mask[tail..].fill(true);
  }

  /// Overwrite one slot and mark it valid. Out-of-range writes are ignored.
  pub fn write(&mut self, index: i64, value: f32) {
    if index < 0 || index as usize >= self.maxlen() {
      return;
    }
    self.data[index as usize] = value;
    self.mask[index as usize] = false;
  }

  /// Write one slot only when it is still masked. Out-of-range writes are
  /// ignored.
  pub fn fill(&mut self, index: i64, value: f32) {
    if index < 0 || index as usize >= self.maxlen() {
      return;
    }
    if self.mask[index as usize] {
      self.data[index as usize] = value;
      self.mask[index as usize] = false;
    }
  }

  /// Append samples on the right, rolling the ring as needed.
  pub fn extend(&mut self, samples: &[f32]) {
    let maxlen = self.maxlen();
    if samples.len() >= maxlen {
      self.data.copy_from_slice(&samples[samples.len() - maxlen..]);
      self.mask.fill(false);
      return;
    }
    self.advance(samples.len());
    let dest = maxlen - samples.len();
    self.data[dest..].copy_from_slice(samples);
    self.mask[dest..].fill(false);
  }

  pub fn get(&self, index: usize) -> Option<f32> {
    if index < self.maxlen() && !self.mask[index] {
      Some(self.data[index])
    } else {
      None
    }
  }

  pub fn samples(&self) -> &[f32] {
    &self.data
  }

  pub fn mask(&self) -> &[bool] {
    &self.mask
  }
}

/// Rolling window of one channel, anchored on the time of its last slot.
///
/// The window always spans `maxlen` samples; `starttime` is derived as
/// `endtime - (maxlen - 1) * delta`. Samples land on the slot nearest their
/// timestamp. A trace whose samples are newer rolls the window forward and
/// replaces whatever its span overlapped; late data only fills slots that
/// never received a sample.
#[derive(Debug, Clone)]
pub struct TraceBuffer {
  id: SeedId,
  sampling_rate: f64,
  endtime: UtcTime,
  ring: SampleDeque,
}

impl TraceBuffer {
  pub fn from_trace(trace: &Trace, maxlen: usize) -> Self {
    let mut buffer = Self {
      id: trace.id.clone(),
      sampling_rate: trace.sampling_rate,
      endtime: trace.endtime(),
      ring: SampleDeque::new(maxlen),
    };
    buffer.write_samples(trace, true);
    buffer
  }

  pub fn id(&self) -> &SeedId {
    &self.id
  }

  pub fn sampling_rate(&self) -> f64 {
    self.sampling_rate
  }

  pub fn delta(&self) -> f64 {
    1.0 / self.sampling_rate
  }

  pub fn maxlen(&self) -> usize {
    self.ring.maxlen()
  }

  pub fn endtime(&self) -> UtcTime {
    self.endtime
  }

  /// Time of the first slot. The window always spans the full capacity.
  pub fn starttime(&self) -> UtcTime {
    self.endtime - (self.maxlen() as f64 - 1.0) * self.delta()
  }

  pub fn valid_len(&self) -> usize {
    self.ring.valid_len()
  }

  /// Seconds of real data currently held.
  pub fn data_seconds(&self) -> f64 {
    self.valid_len() as f64 * self.delta()
  }

  pub fn is_full(&self) -> bool {
    self.valid_len() == self.maxlen()
  }

  /// Fold a new trace into the window.
  ///
  /// Data newer than the current window rolls it forward, masking any gap,
  /// and replaces whatever its span overlapped; data at or before the window
  /// end only fills still-masked slots. Samples older than the window start
  /// are silently dropped.
  pub fn add_trace(&mut self, trace: &Trace) -> Result<(), BufferError> {
    if trace.id != self.id {
      return Err(BufferError::IdMismatch {
        expected: self.id.clone(),
        got: trace.id.clone(),
      });
    }
    if (trace.sampling_rate - self.sampling_rate).abs() > 1e-6 {
      return Err(BufferError::SamplingMismatch {
        expected: self.sampling_rate,
        got: trace.sampling_rate,
      });
    }
    if trace.data.is_empty() {
      return Ok(());
    }
    let trace_end = trace.endtime();
    if trace_end > self.endtime {
      let advance = ((trace_end - self.endtime) * self.sampling_rate).round() as usize;
      self.ring.advance(advance.min(self.maxlen()));
      self.endtime = trace_end;
      self.write_samples(trace, true);
    } else {
      // Late data may only fill holes; what already arrived stands.
      self.write_samples(trace, false);
    }
    Ok(())
  }

  fn write_samples(&mut self, trace: &Trace, overwrite: bool) {
    // Slot of the trace's first sample relative to the window start.
    let last = self.maxlen() as i64 - 1;
    let base = last - ((self.endtime - trace.starttime) * self.sampling_rate).round() as i64;
    let source_mask = trace.mask.as_deref();
    for (k, &value) in trace.data.iter().enumerate() {
      if source_mask.is_some_and(|m| m[k]) {
        continue;
      }
      if overwrite {
        self.ring.write(base + k as i64, value);
      } else {
        self.ring.fill(base + k as i64, value);
      }
    }
  }

  /// Static snapshot of the full window; masked where data never arrived.
  pub fn to_trace(&self) -> Trace {
    let mask = self.ring.mask();
    Trace {
      id: self.id.clone(),
      starttime: self.starttime(),
      sampling_rate: self.sampling_rate,
      data: self.ring.samples().to_vec(),
      mask: if mask.iter().any(|&m| m) {
        Some(mask.to_vec())
      } else {
        None
      },
    }
  }
}

/// Per-channel collection of [`TraceBuffer`]s.
#[derive(Debug, Clone)]
pub struct WaveBuffer {
  capacity_secs: f64,
  buffers: BTreeMap<SeedId, TraceBuffer>,
}

impl WaveBuffer {
  pub fn new(capacity_secs: f64) -> Self {
    Self {
      capacity_secs,
      buffers: BTreeMap::new(),
    }
  }

  pub fn capacity_secs(&self) -> f64 {
    self.capacity_secs
  }

  pub fn channel_count(&self) -> usize {
    self.buffers.len()
  }

  pub fn channels(&self) -> Vec<SeedId> {
    self.buffers.keys().cloned().collect()
  }

  pub fn get(&self, id: &SeedId) -> Option<&TraceBuffer> {
    self.buffers.get(id)
  }

  /// Fold one trace in, creating the channel's buffer on first sight.
  pub fn add_trace(&mut self, trace: &Trace) -> Result<(), BufferError> {
    if trace.data.is_empty() {
      return Ok(());
    }
    match self.buffers.get_mut(&trace.id) {
      Some(buffer) => buffer.add_trace(trace),
      None => {
        let maxlen = (self.capacity_secs * trace.sampling_rate).round() as usize;
        debug!(id = %trace.id, maxlen, "opening channel buffer");
        self
          .buffers
          .insert(trace.id.clone(), TraceBuffer::from_trace(trace, maxlen.max(1)));
        Ok(())
      }
    }
  }

  /// Fold a whole stream in, logging and skipping traces that do not fit
  /// their channel buffer rather than abandoning the rest.
  pub fn add_stream(&mut self, stream: &Stream) {
    for trace in stream {
      if let Err(error) = self.add_trace(trace) {
        warn!(id = %trace.id, %error, "discarding incompatible packet");
      }
    }
  }

  /// Longest span of real data over all channels, in seconds.
  pub fn buffer_length_secs(&self) -> f64 {
    self
      .buffers
      .values()
      .map(|b| b.data_seconds())
      .fold(0.0, f64::max)
  }

  pub fn is_full(&self) -> bool {
    !self.buffers.is_empty() && self.buffers.values().all(|b| b.is_full())
  }

  /// Snapshot every channel as a static stream.
  pub fn stream(&self) -> Stream {
    self.buffers.values().map(|b| b.to_trace()).collect()
  }

  pub fn clear(&mut self) {
    self.buffers.clear();
  }
}
