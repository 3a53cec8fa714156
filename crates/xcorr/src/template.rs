//! Templates and tribes.
//!
//! A template is a processed waveform snippet per channel plus the catalog
//! event it was cut around. Detection quality depends on templates and
//! continuous data going through identical processing, so the processing
//! parameters travel with the template.

use std::collections::{HashMap, HashSet};

use aftershock_core::{Event, SeedId, UtcTime};
use aftershock_waveform::Stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
  pub name: String,
  pub event: Event,
  pub stream: Stream,
  pub process_length: f64,
  pub prepick: f64,
  pub lowcut: f64,
  pub highcut: f64,
  pub samp_rate: f64,
  pub filt_order: u32,
}

impl Template {
  /// Start of the earliest channel; pick times in detections are measured
  /// from here.
  pub fn earliest_start(&self) -> Option<UtcTime> {
    self.stream.earliest_start()
  }

  pub fn channel_ids(&self) -> Vec<SeedId> {
    self.stream.channel_ids()
  }

  /// Distinct `NET.STA` keys with template data.
  pub fn station_count(&self) -> usize {
    self
      .stream
      .iter()
      .map(|tr| tr.id.station_key())
      .collect::<HashSet<_>>()
      .len()
  }
}

/// A named collection of templates, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tribe {
  pub templates: Vec<Template>,
}

impl Tribe {
  pub fn new(templates: Vec<Template>) -> Self {
    Self { templates }
  }

  pub fn len(&self) -> usize {
    self.templates.len()
  }

  pub fn is_empty(&self) -> bool {
    self.templates.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Template> {
    self.templates.iter()
  }

  pub fn get(&self, name: &str) -> Option<&Template> {
    self.templates.iter().find(|t| t.name == name)
  }

  pub fn template_names(&self) -> Vec<String> {
    self.templates.iter().map(|t| t.name.clone()).collect()
  }

  /// Add templates, replacing any existing template with the same name.
  pub fn extend(&mut self, templates: impl IntoIterator<Item = Template>) {
    for template in templates {
      match self.templates.iter_mut().find(|t| t.name == template.name) {
        Some(existing) => *existing = template,
        None => self.templates.push(template),
      }
    }
  }
}

impl IntoIterator for Tribe {
  type Item = Template;
  type IntoIter = std::vec::IntoIter<Template>;

  fn into_iter(self) -> Self::IntoIter {
    self.templates.into_iter()
  }
}

impl<'a> IntoIterator for &'a Tribe {
  type Item = &'a Template;
  type IntoIter = std::slice::Iter<'a, Template>;

  fn into_iter(self) -> Self::IntoIter {
    self.templates.iter()
  }
}

impl FromIterator<Template> for Tribe {
  fn from_iter<T: IntoIterator<Item = Template>>(iter: T) -> Self {
    Tribe::new(iter.into_iter().collect())
  }
}

/// Filter a tribe down to templates the correlator can use.
///
/// Within each template, traces whose length differs from that template's
/// most common length are dropped, as are traces outside `seed_ids` when a
/// set is given. Templates left with fewer than `min_stations` distinct
/// stations are dropped entirely.
pub fn check_tribe_quality(tribe: Tribe, seed_ids: Option<&HashSet<SeedId>>, min_stations: usize) -> Tribe {
  let before = tribe.len();
  let mut kept = Vec::with_capacity(before);
  for mut template in tribe {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for trace in &template.stream {
      *counts.entry(trace.npts()).or_insert(0) += 1;
    }
    if counts.len() > 1 {
      let common = counts
        .iter()
        .max_by_key(|&(npts, count)| (*count, *npts))
        .map(|(&npts, _)| npts)
        .unwrap_or(0);
      warn!(
        template = %template.name,
        npts = common,
        "template channels have mixed lengths, keeping the most common"
      );
      template.stream.traces.retain(|tr| tr.npts() == common);
    }
    if let Some(ids) = seed_ids {
      template.stream.traces.retain(|tr| ids.contains(&tr.id));
    }
    if template.station_count() < min_stations {
      debug!(
        template = %template.name,
        stations = template.station_count(),
        min_stations,
        "dropping template with too few stations"
      );
      continue;
    }
    kept.push(template);
  }
  if kept.len() < before {
    debug!(before, after = kept.len(), "tribe quality check dropped templates");
  }
  Tribe::new(kept)
}
