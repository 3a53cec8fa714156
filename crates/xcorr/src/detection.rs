//! Detections, families, and parties.
//!
//! One matched-filter pass yields a [`Party`]: per-template [`Family`]s of
//! [`Detection`]s. Parties accumulate across passes and are declustered so
//! one earthquake seen by several templates is only reported once.

use std::collections::HashSet;

use aftershock_core::{EvaluationMode, Event, Pick, ResourceId, SeedId, ThresholdKind, UtcTime, event_time};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::template::Template;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub template_name: String,
  pub detect_time: UtcTime,
  pub detect_val: f64,
  pub threshold: f64,
  pub threshold_type: ThresholdKind,
  pub threshold_input: f64,
  pub no_chans: usize,
  pub chans: Vec<SeedId>,
  #[serde(default)]
  pub event: Option<Event>,
}

impl Detection {
  /// Stable identifier, unique to the microsecond per template.
  pub fn id(&self) -> String {
    format!("{}_{}", self.template_name, self.detect_time.compact_micros())
  }

  /// Time used for ordering and declustering: the attached event's time when
  /// one exists, otherwise the raw detection time.
  pub fn origin_time(&self) -> UtcTime {
    match &self.event {
      Some(event) if !event.origins.is_empty() || !event.picks.is_empty() => event_time(event),
      _ => self.detect_time,
    }
  }

  /// Build a catalog event by shifting the template's picks to this
  /// detection's time frame.
  pub fn to_event(&self, template: &Template) -> Event {
    let mut event = Event::new(ResourceId::generate());
    if let Some(template_start) = template.earliest_start() {
      let channels: HashSet<SeedId> = template.channel_ids().into_iter().collect();
      for pick in &template.event.picks {
        if !channels.contains(&pick.waveform_id) {
          continue;
        }
        event.picks.push(Pick {
          time: self.detect_time + (pick.time - template_start),
          waveform_id: pick.waveform_id.clone(),
          phase_hint: pick.phase_hint.clone(),
          evaluation_mode: EvaluationMode::Automatic,
        });
      }
    }
    event.comments.push(format!("Detected using template: {}", self.template_name));
    event.comments.push(format!(
      "threshold={:.3} detect_val={:.3} no_chans={}",
      self.threshold, self.detect_val, self.no_chans
    ));
    event
  }
}

/// All detections made with one template.
#[derive(Debug, Clone)]
pub struct Family {
  pub template: Template,
  pub detections: Vec<Detection>,
}

impl Family {
  pub fn new(template: Template) -> Self {
    Self {
      template,
      detections: Vec::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.detections.len()
  }

  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }

  pub fn sort_by_time(&mut self) {
    self.detections.sort_by(|a, b| a.detect_time.cmp(&b.detect_time));
  }
}

/// Families grouped by template, the unit the detector accumulates.
#[derive(Debug, Clone, Default)]
pub struct Party {
  pub families: Vec<Family>,
}

impl Party {
  pub fn new() -> Self {
    Self::default()
  }

  /// Total detections across all families.
  pub fn len(&self) -> usize {
    self.families.iter().map(|f| f.len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.families.iter().all(|f| f.is_empty())
  }

  pub fn family_count(&self) -> usize {
    self.families.len()
  }

  pub fn get_family(&self, template_name: &str) -> Option<&Family> {
    self.families.iter().find(|f| f.template.name == template_name)
  }

  pub fn detections(&self) -> impl Iterator<Item = &Detection> {
    self.families.iter().flat_map(|f| f.detections.iter())
  }

  /// Fold another party in, merging families of the same template and
  /// dropping detections whose id is already present.
  pub fn merge(&mut self, other: Party) {
    for family in other.families {
      match self.families.iter_mut().find(|f| f.template.name == family.template.name) {
        Some(existing) => {
          let known: HashSet<String> = existing.detections.iter().map(|d| d.id()).collect();
          existing
            .detections
            .extend(family.detections.into_iter().filter(|d| !known.contains(&d.id())));
          existing.sort_by_time();
        }
        None => self.families.push(family),
      }
    }
  }

  /// Remove detections within `trig_int` seconds of a stronger one,
  /// across all families. Strength is the absolute network correlation sum;
  /// timing prefers the attached event's time over the raw detection time.
  pub fn decluster(&mut self, trig_int: f64) {
    let total = self.len();
    if total < 2 {
      return;
    }
    let mut candidates: Vec<(usize, usize, UtcTime, f64)> = Vec::with_capacity(total);
    for (fi, family) in self.families.iter().enumerate() {
      for (di, detection) in family.detections.iter().enumerate() {
        candidates.push((fi, di, detection.origin_time(), detection.detect_val.abs()));
      }
    }
    candidates.sort_by(|a, b| b.3.partial_cmp(&a.3).unwrap_or(std::cmp::Ordering::Equal));
    let mut accepted_times: Vec<UtcTime> = Vec::new();
    let mut keep: HashSet<(usize, usize)> = HashSet::new();
    for (fi, di, time, _) in candidates {
      if accepted_times.iter().all(|&t| (time - t).abs() > trig_int) {
        accepted_times.push(time);
        keep.insert((fi, di));
      }
    }
    for (fi, family) in self.families.iter_mut().enumerate() {
      let mut di = 0;
      family.detections.retain(|_| {
        let kept = keep.contains(&(fi, di));
        di += 1;
        kept
      });
      family.sort_by_time();
    }
    if self.len() < total {
      debug!(before = total, after = self.len(), "declustered detections");
    }
  }

  /// Drop detections older than `min_time`.
  pub fn prune(&mut self, min_time: UtcTime) {
    for family in &mut self.families {
      family.detections.retain(|d| d.detect_time >= min_time);
    }
  }
}

/// Mean event rate in events per day over the span of `times`.
/// Fewer than two events, or a degenerate span, give 0.0.
pub fn average_rate(times: &[UtcTime]) -> f64 {
  if times.len() < 2 {
    return 0.0;
  }
  let first = times.iter().min().copied().unwrap_or(UtcTime::UNIX_EPOCH);
  let last = times.iter().max().copied().unwrap_or(UtcTime::UNIX_EPOCH);
  let span_days = (last - first) / 86400.0;
  if span_days <= 0.0 {
    return 0.0;
  }
  times.len() as f64 / span_days
}

#[cfg(test)]
mod tests {
  use super::*;
  use aftershock_core::Origin;
  use aftershock_waveform::{Stream, Trace};
  use pretty_assertions::assert_eq;

  fn template(name: &str) -> Template {
    let mut event = Event::new(ResourceId::generate());
    event.picks.push(Pick {
      time: UtcTime::from_epoch(1000.5),
      waveform_id: "NZ.WVZ.10.HHZ".parse().unwrap(),
      phase_hint: Some("P".to_string()),
      evaluation_mode: EvaluationMode::Manual,
    });
    Template {
      name: name.to_string(),
      event,
      stream: Stream::new(vec![Trace::new(
        "NZ.WVZ.10.HHZ".parse().unwrap(),
        UtcTime::from_epoch(1000.0),
        50.0,
        vec![0.0; 100],
      )]),
      process_length: 300.0,
      prepick: 0.15,
      lowcut: 2.0,
      highcut: 15.0,
      samp_rate: 50.0,
      filt_order: 4,
    }
  }

  fn detection(name: &str, epoch: f64, detect_val: f64) -> Detection {
    Detection {
      template_name: name.to_string(),
      detect_time: UtcTime::from_epoch(epoch),
      detect_val,
      threshold: 1.0,
      threshold_type: ThresholdKind::AvChanCorr,
      threshold_input: 0.5,
      no_chans: 2,
      chans: vec!["NZ.WVZ.10.HHZ".parse().unwrap()],
      event: None,
    }
  }

  #[test]
  fn id_carries_template_and_time() {
    let d = detection("tmpl", 1_560_000_000.0, 3.0);
    assert!(d.id().starts_with("tmpl_"));
    assert_eq!(d.id().len(), "tmpl_".len() + 21);
  }

  #[test]
  fn to_event_shifts_picks() {
    let t = template("tmpl");
    let d = detection("tmpl", 2000.0, 3.0);
    let event = d.to_event(&t);
    assert_eq!(event.picks.len(), 1);
    // Template pick was 0.5 s after the template stream start.
    assert!((event.picks[0].time.epoch() - 2000.5).abs() < 1e-6);
    assert_eq!(event.picks[0].evaluation_mode, EvaluationMode::Automatic);
    assert!(event.comments.iter().any(|c| c.contains("tmpl")));
  }

  #[test]
  fn origin_time_prefers_event() {
    let mut d = detection("tmpl", 2000.0, 3.0);
    assert!((d.origin_time().epoch() - 2000.0).abs() < 1e-9);
    let mut event = Event::new(ResourceId::generate());
    event.origins.push(Origin {
      time: UtcTime::from_epoch(1999.0),
      latitude: -42.0,
      longitude: 173.0,
      depth_km: 5.0,
    });
    d.event = Some(event);
    assert!((d.origin_time().epoch() - 1999.0).abs() < 1e-9);
  }

  #[test]
  fn merge_deduplicates_by_id() {
    let mut party = Party::new();
    let mut family = Family::new(template("tmpl"));
    family.detections.push(detection("tmpl", 100.0, 3.0));
    party.merge(Party { families: vec![family.clone()] });
    family.detections.push(detection("tmpl", 200.0, 4.0));
    party.merge(Party { families: vec![family] });
    assert_eq!(party.len(), 2);
    assert_eq!(party.family_count(), 1);
  }

  #[test]
  fn decluster_keeps_strongest_in_window() {
    let mut a = Family::new(template("a"));
    a.detections.push(detection("a", 100.0, 3.0));
    a.detections.push(detection("a", 101.0, 5.0));
    let mut b = Family::new(template("b"));
    b.detections.push(detection("b", 100.5, 4.0));
    b.detections.push(detection("b", 200.0, 2.0));
    let mut party = Party { families: vec![a, b] };
    party.decluster(2.0);
    // The three within 2 s of each other collapse to the strongest.
    assert_eq!(party.len(), 2);
    assert_eq!(party.get_family("a").unwrap().len(), 1);
    assert!((party.get_family("a").unwrap().detections[0].detect_val - 5.0).abs() < 1e-9);
    assert_eq!(party.get_family("b").unwrap().len(), 1);
    assert!((party.get_family("b").unwrap().detections[0].detect_time.epoch() - 200.0).abs() < 1e-9);
  }

  #[test]
  fn prune_drops_old_detections() {
    let mut family = Family::new(template("a"));
    family.detections.push(detection("a", 100.0, 3.0));
    family.detections.push(detection("a", 500.0, 3.0));
    let mut party = Party { families: vec![family] };
    party.prune(UtcTime::from_epoch(200.0));
    assert_eq!(party.len(), 1);
  }

  #[test]
  fn rate_of_regular_sequence() {
    // Ten events spaced 100 s apart over 900 s.
    let times: Vec<UtcTime> = (0..10).map(|i| UtcTime::from_epoch(i as f64 * 100.0)).collect();
    let rate = average_rate(&times);
    assert!((rate - 960.0).abs() < 0.1);
  }

  #[test]
  fn rate_of_degenerate_catalogs() {
    assert_eq!(average_rate(&[]), 0.0);
    assert_eq!(average_rate(&[UtcTime::from_epoch(1.0)]), 0.0);
    assert_eq!(average_rate(&[UtcTime::from_epoch(1.0), UtcTime::from_epoch(1.0)]), 0.0);
  }
}
