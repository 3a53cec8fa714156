//! Catalog event model.
//!
//! A deliberately small QuakeML-shaped subset: enough to carry what the
//! detection pipeline actually consumes (origins for location and time,
//! magnitudes for triggering, picks for template construction). Events are
//! serialised as JSON both in the bank and on the wire.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::id::SeedId;
use crate::time::UtcTime;

/// Identifier for catalog objects.
///
/// Remote services provide their own ids (e.g. `smi:nz.org.geonet/2019p304574`);
/// locally created events get a fresh uuid under `smi:local/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
  pub fn new(id: impl Into<String>) -> Self {
    ResourceId(id.into())
  }

  pub fn generate() -> Self {
    ResourceId(format!("smi:local/{}", uuid::Uuid::new_v4()))
  }

  /// Trailing path segment of the id, used for bank file names.
  pub fn tail(&self) -> &str {
    self.0.rsplit(['/', '=']).next().unwrap_or(&self.0)
  }
}

impl std::fmt::Display for ResourceId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationMode {
  #[default]
  Manual,
  Automatic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pick {
  pub time: UtcTime,
  pub waveform_id: SeedId,
  #[serde(default)]
  pub phase_hint: Option<String>,
  #[serde(default)]
  pub evaluation_mode: EvaluationMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Origin {
  pub time: UtcTime,
  pub latitude: f64,
  pub longitude: f64,
  #[serde(default)]
  pub depth_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Magnitude {
  pub magnitude: f64,
  #[serde(default)]
  pub magnitude_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  pub resource_id: ResourceId,
  #[serde(default)]
  pub event_type: Option<String>,
  #[serde(default)]
  pub origins: Vec<Origin>,
  #[serde(default)]
  pub magnitudes: Vec<Magnitude>,
  #[serde(default)]
  pub picks: Vec<Pick>,
  #[serde(default)]
  pub comments: Vec<String>,
}

impl Event {
  pub fn new(resource_id: ResourceId) -> Self {
    Self {
      resource_id,
      event_type: None,
      origins: Vec::new(),
      magnitudes: Vec::new(),
      picks: Vec::new(),
      comments: Vec::new(),
    }
  }

  /// The preferred origin is the first one listed.
  pub fn preferred_origin(&self) -> Option<&Origin> {
    self.origins.first()
  }

  /// The preferred magnitude is the first one listed.
  pub fn preferred_magnitude(&self) -> Option<&Magnitude> {
    self.magnitudes.first()
  }

  pub fn magnitude_value(&self) -> Option<f64> {
    self.preferred_magnitude().map(|m| m.magnitude)
  }

  /// Distinct `NET.STA` keys with at least one pick.
  pub fn picked_stations(&self) -> HashSet<String> {
    self.picks.iter().map(|p| p.waveform_id.station_key()).collect()
  }

  pub fn picked_channels(&self) -> HashSet<SeedId> {
    self.picks.iter().map(|p| p.waveform_id.clone()).collect()
  }

  /// Whether every pick was made automatically.
  pub fn all_picks_automatic(&self) -> bool {
    !self.picks.is_empty()
      && self
        .picks
        .iter()
        .all(|p| p.evaluation_mode == EvaluationMode::Automatic)
  }
}

/// Best-guess time of an event: preferred origin time, else the earliest
/// pick, else the epoch.
pub fn event_time(event: &Event) -> UtcTime {
  if let Some(origin) = event.preferred_origin() {
    return origin.time;
  }
  event
    .picks
    .iter()
    .map(|p| p.time)
    .min()
    .unwrap_or(UtcTime::UNIX_EPOCH)
}
