use std::collections::BTreeMap;

use aftershock_core::{SeedId, UtcTime};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A contiguous run of evenly sampled data for one channel.
///
/// `mask` marks slots with no real data (dropped packets, zero-padded gaps);
/// `None` means every sample is valid. Masked slots always hold 0.0 so the
/// raw buffer can be handed to numeric code without a second pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
  pub id: SeedId,
  pub starttime: UtcTime,
  pub sampling_rate: f64,
  pub data: Vec<f32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub mask: Option<Vec<bool>>,
}

impl Trace {
  pub fn new(id: SeedId, starttime: UtcTime, sampling_rate: f64, data: Vec<f32>) -> Self {
    Self {
      id,
      starttime,
      sampling_rate,
      data,
      mask: None,
    }
  }

  pub fn delta(&self) -> f64 {
    1.0 / self.sampling_rate
  }

  pub fn npts(&self) -> usize {
    self.data.len()
  }

  /// Number of real (unmasked) samples.
  pub fn valid_len(&self) -> usize {
    match &self.mask {
      Some(mask) => mask.iter().filter(|&&m| !m).count(),
      None => self.data.len(),
    }
  }

  /// Time of the last sample. Equal to `starttime` for empty traces.
  pub fn endtime(&self) -> UtcTime {
    if self.data.is_empty() {
      return self.starttime;
    }
    self.starttime + (self.data.len() as f64 - 1.0) * self.delta()
  }

  pub fn time_of(&self, index: usize) -> UtcTime {
    self.starttime + index as f64 * self.delta()
  }

  /// Sample index nearest to `time`. May fall outside the trace.
  pub fn index_of(&self, time: UtcTime) -> i64 {
    ((time - self.starttime) * self.sampling_rate).round() as i64
  }

  fn is_masked(&self, index: usize) -> bool {
    self.mask.as_ref().is_some_and(|m| m[index])
  }

  /// Cut to the samples nearest `start` through `end` inclusive.
  /// Out-of-range bounds are clamped; a window past either end of the trace
  /// yields an empty trace.
  pub fn slice(&self, start: UtcTime, end: UtcTime) -> Trace {
    if self.data.is_empty() || end < start {
      return Trace::new(self.id.clone(), start, self.sampling_rate, Vec::new());
    }
    let i0 = self.index_of(start).max(0) as usize;
    let i1_signed = self.index_of(end).min(self.data.len() as i64 - 1);
    if i1_signed < i0 as i64 {
      return Trace::new(self.id.clone(), start, self.sampling_rate, Vec::new());
    }
    let i1 = i1_signed as usize;
    Trace {
      id: self.id.clone(),
      starttime: self.time_of(i0),
      sampling_rate: self.sampling_rate,
      data: self.data[i0..=i1].to_vec(),
      mask: self.mask.as_ref().map(|m| m[i0..=i1].to_vec()),
    }
  }

  /// Break into contiguous unmasked segments.
  pub fn split(&self) -> Vec<Trace> {
    let Some(mask) = &self.mask else {
      return vec![self.clone()];
    };
    let mut segments = Vec::new();
    let mut run_start: Option<usize> = None;
    for i in 0..=self.data.len() {
      let valid = i < self.data.len() && !mask[i];
      match (run_start, valid) {
        (None, true) => run_start = Some(i),
        (Some(s), false) => {
          segments.push(Trace::new(
            self.id.clone(),
            self.time_of(s),
            self.sampling_rate,
            self.data[s..i].to_vec(),
          ));
          run_start = None;
        }
        _ => {}
      }
    }
    segments
  }

  /// Drop masked samples off both ends, keeping interior gaps.
  pub fn trim_masked_ends(&self) -> Trace {
    let Some(mask) = &self.mask else {
      return self.clone();
    };
    let first = mask.iter().position(|&m| !m);
    let last = mask.iter().rposition(|&m| !m);
    match (first, last) {
      (Some(i0), Some(i1)) => {
        let interior = &mask[i0..=i1];
        Trace {
          id: self.id.clone(),
          starttime: self.time_of(i0),
          sampling_rate: self.sampling_rate,
          data: self.data[i0..=i1].to_vec(),
          mask: if interior.iter().any(|&m| m) {
            Some(interior.to_vec())
          } else {
            None
          },
        }
      }
      _ => Trace::new(self.id.clone(), self.starttime, self.sampling_rate, Vec::new()),
    }
  }
}

/// An ordered collection of traces, usually one per channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stream {
  pub traces: Vec<Trace>,
}

impl Stream {
  pub fn new(traces: Vec<Trace>) -> Self {
    Self { traces }
  }

  pub fn len(&self) -> usize {
    self.traces.len()
  }

  pub fn is_empty(&self) -> bool {
    self.traces.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Trace> {
    self.traces.iter()
  }

  pub fn push(&mut self, trace: Trace) {
    self.traces.push(trace);
  }

  pub fn get(&self, id: &SeedId) -> Option<&Trace> {
    self.traces.iter().find(|tr| &tr.id == id)
  }

  /// Traces whose id matches a wildcard selector.
  pub fn select(&self, selector: &SeedId) -> Stream {
    Stream::new(
      self
        .traces
        .iter()
        .filter(|tr| tr.id.matches(selector))
        .cloned()
        .collect(),
    )
  }

  pub fn channel_ids(&self) -> Vec<SeedId> {
    self.traces.iter().map(|tr| tr.id.clone()).collect()
  }

  pub fn earliest_start(&self) -> Option<UtcTime> {
    self.traces.iter().map(|tr| tr.starttime).min()
  }

  pub fn latest_end(&self) -> Option<UtcTime> {
    self.traces.iter().map(|tr| tr.endtime()).max()
  }

  pub fn sort_by_id(&mut self) {
    self.traces.sort_by(|a, b| a.id.cmp(&b.id).then(a.starttime.cmp(&b.starttime)));
  }

  /// Join traces sharing an id onto one time grid per channel.
  ///
  /// Where segments overlap the later-starting segment wins; uncovered spans
  /// between segments become masked gaps. Traces whose sampling rate differs
  /// from the first segment of their channel are dropped with a warning.
  pub fn merge(self) -> Stream {
    let mut groups: BTreeMap<SeedId, Vec<Trace>> = BTreeMap::new();
    for trace in self.traces {
      groups.entry(trace.id.clone()).or_default().push(trace);
    }
    let mut merged = Vec::with_capacity(groups.len());
    for (_, group) in groups {
      if let Some(trace) = merge_group(group) {
        merged.push(trace);
      }
    }
    Stream::new(merged)
  }

  /// Cut every trace to the samples within `[start, end]`.
  pub fn trim(&mut self, start: UtcTime, end: UtcTime) {
    for trace in &mut self.traces {
      *trace = trace.slice(start, end);
    }
    self.traces.retain(|tr| !tr.data.is_empty());
  }
}

impl IntoIterator for Stream {
  type Item = Trace;
  type IntoIter = std::vec::IntoIter<Trace>;

  fn into_iter(self) -> Self::IntoIter {
    self.traces.into_iter()
  }
}

impl<'a> IntoIterator for &'a Stream {
  type Item = &'a Trace;
  type IntoIter = std::slice::Iter<'a, Trace>;

  fn into_iter(self) -> Self::IntoIter {
    self.traces.iter()
  }
}

impl FromIterator<Trace> for Stream {
  fn from_iter<T: IntoIterator<Item = Trace>>(iter: T) -> Self {
    Stream::new(iter.into_iter().collect())
  }
}

fn merge_group(mut group: Vec<Trace>) -> Option<Trace> {
  group.retain(|tr| !tr.data.is_empty());
  if group.is_empty() {
    return None;
  }
  if group.len() == 1 {
    return group.pop();
  }
  group.sort_by(|a, b| a.starttime.cmp(&b.starttime));
  let sampling_rate = group[0].sampling_rate;
  let id = group[0].id.clone();
  group.retain(|tr| {
    let ok = (tr.sampling_rate - sampling_rate).abs() < 1e-6;
    if !ok {
      warn!(
        id = %tr.id,
        expected = sampling_rate,
        got = tr.sampling_rate,
        "dropping segment with mismatched sampling rate"
      );
    }
    ok
  });
  let start = group.iter().map(|tr| tr.starttime).min()?;
  let end = group.iter().map(|tr| tr.endtime()).max()?;
  let npts = ((end - start) * sampling_rate).round() as usize + 1;
  let mut data = vec![0.0f32; npts];
  let mut mask = vec![true; npts];
  for trace in &group {
    let offset = ((trace.starttime - start) * sampling_rate).round() as i64;
    for (k, &value) in trace.data.iter().enumerate() {
      if trace.is_masked(k) {
        continue;
      }
      let slot = offset + k as i64;
      if slot >= 0 && (slot as usize) < npts {
        data[slot as usize] = value;
        mask[slot as usize] = false;
      }
    }
  }
  let mask = if mask.iter().any(|&m| m) { Some(mask) } else { None };
  Some(Trace {
    id,
    starttime: start,
    sampling_rate,
    data,
    mask,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn trace(start: f64, data: Vec<f32>) -> Trace {
    Trace::new(
      "NZ.WVZ.10.HHZ".parse().unwrap(),
      UtcTime::from_epoch(start),
      1.0,
      data,
    )
  }

  #[test]
  fn endtime_spans_samples() {
    let tr = trace(100.0, vec![0.0; 10]);
    assert!((tr.endtime() - tr.starttime - 9.0).abs() < 1e-9);
    let empty = trace(100.0, Vec::new());
    assert_eq!(empty.endtime(), empty.starttime);
  }

  #[test]
  fn slice_clamps_to_trace() {
    let tr = trace(100.0, (0..10).map(|v| v as f32).collect());
    let cut = tr.slice(UtcTime::from_epoch(102.0), UtcTime::from_epoch(105.0));
    assert_eq!(cut.data, vec![2.0, 3.0, 4.0, 5.0]);
    assert!((cut.starttime.epoch() - 102.0).abs() < 1e-9);

    let over = tr.slice(UtcTime::from_epoch(90.0), UtcTime::from_epoch(200.0));
    assert_eq!(over.data.len(), 10);

    let outside = tr.slice(UtcTime::from_epoch(200.0), UtcTime::from_epoch(300.0));
    assert!(outside.data.is_empty());
  }

  #[test]
  fn split_breaks_on_gaps() {
    let mut tr = trace(0.0, vec![1.0, 2.0, 0.0, 0.0, 3.0, 4.0]);
    tr.mask = Some(vec![false, false, true, true, false, false]);
    let segments = tr.split();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].data, vec![1.0, 2.0]);
    assert_eq!(segments[1].data, vec![3.0, 4.0]);
    assert!((segments[1].starttime.epoch() - 4.0).abs() < 1e-9);
  }

  #[test]
  fn merge_joins_segments_with_gap() {
    let st = Stream::new(vec![trace(0.0, vec![1.0, 2.0]), trace(4.0, vec![3.0, 4.0])]);
    let merged = st.merge();
    assert_eq!(merged.len(), 1);
    let tr = &merged.traces[0];
    assert_eq!(tr.npts(), 6);
    assert_eq!(tr.valid_len(), 4);
    assert_eq!(tr.mask.as_ref().unwrap(), &vec![false, false, true, true, false, false]);
  }

  #[test]
  fn merge_later_segment_wins_overlap() {
    let st = Stream::new(vec![
      trace(0.0, vec![1.0, 1.0, 1.0, 1.0]),
      trace(2.0, vec![9.0, 9.0]),
    ]);
    let merged = st.merge();
    let tr = &merged.traces[0];
    assert_eq!(tr.data, vec![1.0, 1.0, 9.0, 9.0]);
    assert!(tr.mask.is_none());
  }

  #[test]
  fn merge_keeps_channels_separate() {
    let mut other = trace(0.0, vec![5.0]);
    other.id = "NZ.JCZ.10.HHZ".parse().unwrap();
    let st = Stream::new(vec![trace(0.0, vec![1.0]), other]);
    assert_eq!(st.merge().len(), 2);
  }

  #[test]
  fn trim_drops_emptied_traces() {
    let mut st = Stream::new(vec![trace(0.0, vec![1.0, 2.0, 3.0]), trace(100.0, vec![4.0])]);
    st.trim(UtcTime::from_epoch(0.0), UtcTime::from_epoch(10.0));
    assert_eq!(st.len(), 1);
    assert_eq!(st.traces[0].data, vec![1.0, 2.0, 3.0]);
  }

  #[test]
  fn select_uses_wildcards() {
    let st = Stream::new(vec![trace(0.0, vec![1.0])]);
    let hits = st.select(&"NZ.*.*.HH?".parse().unwrap());
    assert_eq!(hits.len(), 1);
    let misses = st.select(&"NZ.*.*.EH?".parse().unwrap());
    assert!(misses.is_empty());
  }

  #[test]
  fn trim_masked_ends_keeps_interior_gap() {
    let mut tr = trace(0.0, vec![0.0, 1.0, 0.0, 2.0, 0.0]);
    tr.mask = Some(vec![true, false, true, false, true]);
    let trimmed = tr.trim_masked_ends();
    assert_eq!(trimmed.data, vec![1.0, 0.0, 2.0]);
    assert_eq!(trimmed.mask, Some(vec![false, true, false]));
    assert!((trimmed.starttime.epoch() - 1.0).abs() < 1e-9);
  }
}
