//! Bank index.
//!
//! One `index.json` at the bank root summarises every stored event so
//! queries do not have to open event files. The index is rewritten on every
//! put and can always be rebuilt by walking the tree.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use aftershock_core::{Event, Region, UtcTime, event_time};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::bank::{BankError, Result};

pub const INDEX_NAME: &str = "index.json";

/// Template file suffix, alongside `{name}.json` event files.
pub const TEMPLATE_SUFFIX: &str = ".tpl.json";
/// Raw waveform file suffix.
pub const RAW_SUFFIX: &str = ".raw.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
  /// Event file path relative to the bank root
  pub path: PathBuf,
  pub time: UtcTime,
  pub latitude: Option<f64>,
  pub longitude: Option<f64>,
  pub magnitude: Option<f64>,
}

impl IndexEntry {
  pub fn describe(event: &Event, path: PathBuf) -> Self {
    let origin = event.preferred_origin();
    Self {
      path,
      time: event_time(event),
      latitude: origin.map(|o| o.latitude),
      longitude: origin.map(|o| o.longitude),
      magnitude: event.magnitude_value(),
    }
  }
}

/// Filters for bank queries. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventQuery {
  pub starttime: Option<UtcTime>,
  pub endtime: Option<UtcTime>,
  pub region: Option<Region>,
  pub min_magnitude: Option<f64>,
  pub max_magnitude: Option<f64>,
}

impl EventQuery {
  pub fn all() -> Self {
    Self::default()
  }

  pub fn within(region: Region) -> Self {
    Self {
      region: Some(region),
      ..Self::default()
    }
  }

  pub fn between(starttime: UtcTime, endtime: UtcTime) -> Self {
    Self {
      starttime: Some(starttime),
      endtime: Some(endtime),
      ..Self::default()
    }
  }

  pub fn with_region(mut self, region: Region) -> Self {
    self.region = Some(region);
    self
  }

  pub fn with_min_magnitude(mut self, magnitude: f64) -> Self {
    self.min_magnitude = Some(magnitude);
    self
  }

  /// Whether an index entry satisfies every set filter. Entries missing a
  /// field a filter needs (no location, no magnitude) do not match it.
  pub fn matches(&self, entry: &IndexEntry) -> bool {
    if self.starttime.is_some_and(|t| entry.time < t) {
      return false;
    }
    if self.endtime.is_some_and(|t| entry.time > t) {
      return false;
    }
    if let Some(region) = self.region {
      match (entry.latitude, entry.longitude) {
        (Some(lat), Some(lon)) => {
          if !region.contains(lat, lon) {
            return false;
          }
        }
        _ => return false,
      }
    }
    if self.min_magnitude.is_some() || self.max_magnitude.is_some() {
      let Some(magnitude) = entry.magnitude else {
        return false;
      };
      if self.min_magnitude.is_some_and(|m| magnitude < m) {
        return false;
      }
      if self.max_magnitude.is_some_and(|m| magnitude > m) {
        return false;
      }
    }
    true
  }
}

/// Event-id keyed summary of the bank contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BankIndex {
  pub entries: BTreeMap<String, IndexEntry>,
}

impl BankIndex {
  /// Load the index file if one exists.
  pub fn load(root: &Path) -> Result<Option<Self>> {
    let path = root.join(INDEX_NAME);
    if !path.exists() {
      return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(|source| BankError::Io { path, source })?;
    Ok(Some(serde_json::from_str(&contents)?))
  }

  pub fn save(&self, root: &Path) -> Result<()> {
    let path = root.join(INDEX_NAME);
    let contents = serde_json::to_string_pretty(self)?;
    std::fs::write(&path, contents).map_err(|source| BankError::Io { path, source })
  }

  /// Rebuild from the tree, parsing every event file found. Unreadable
  /// files are skipped with a warning so one bad write cannot wedge the
  /// whole bank.
  pub fn rebuild(root: &Path) -> Result<Self> {
    let mut index = Self::default();
    for entry in WalkDir::new(root).into_iter().flatten() {
      let path = entry.path();
      if !entry.file_type().is_file() || !is_event_file(path) {
        continue;
      }
      let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) => {
          warn!(path = %path.display(), %error, "skipping unreadable event file");
          continue;
        }
      };
      let event: Event = match serde_json::from_str(&contents) {
        Ok(event) => event,
        Err(error) => {
          warn!(path = %path.display(), %error, "skipping unparseable event file");
          continue;
        }
      };
      let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
      index.upsert(&event, relative);
    }
    debug!(events = index.entries.len(), "rebuilt bank index");
    Ok(index)
  }

  pub fn upsert(&mut self, event: &Event, path: PathBuf) {
    self
      .entries
      .insert(event.resource_id.to_string(), IndexEntry::describe(event, path));
  }

  pub fn query(&self, query: &EventQuery) -> Vec<&IndexEntry> {
    self.entries.values().filter(|entry| query.matches(entry)).collect()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// Event files are plain `.json`, excluding the index itself and the
/// template/raw companions.
fn is_event_file(path: &Path) -> bool {
  let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
    return false;
  };
  name.ends_with(".json") && name != INDEX_NAME && !name.ends_with(TEMPLATE_SUFFIX) && !name.ends_with(RAW_SUFFIX)
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn entry(time: f64, lat: f64, lon: f64, magnitude: Option<f64>) -> IndexEntry {
    IndexEntry {
      path: PathBuf::from("x.json"),
      time: UtcTime::from_epoch(time),
      latitude: Some(lat),
      longitude: Some(lon),
      magnitude,
    }
  }

  #[test]
  fn query_filters_compose() {
    let e = entry(1000.0, -42.0, 173.0, Some(5.0));

    assert!(EventQuery::all().matches(&e));
    assert!(EventQuery::between(UtcTime::from_epoch(900.0), UtcTime::from_epoch(1100.0)).matches(&e));
    assert!(!EventQuery::between(UtcTime::from_epoch(0.0), UtcTime::from_epoch(900.0)).matches(&e));
    assert!(EventQuery::within(Region::new(-42.0, 173.0, 1.0)).matches(&e));
    assert!(!EventQuery::within(Region::new(-30.0, 173.0, 1.0)).matches(&e));
    assert!(EventQuery::all().with_min_magnitude(4.0).matches(&e));
    assert!(!EventQuery::all().with_min_magnitude(6.0).matches(&e));
  }

  #[test]
  fn missing_fields_fail_filters_that_need_them() {
    let no_magnitude = entry(0.0, -42.0, 173.0, None);
    assert!(EventQuery::all().matches(&no_magnitude));
    assert!(!EventQuery::all().with_min_magnitude(1.0).matches(&no_magnitude));

    let no_location = IndexEntry {
      latitude: None,
      longitude: None,
      ..entry(0.0, 0.0, 0.0, None)
    };
    assert!(!EventQuery::within(Region::new(-42.0, 173.0, 10.0)).matches(&no_location));
  }

  #[test]
  fn event_file_detection() {
    assert!(is_event_file(Path::new("2019/06/abc/abc.json")));
    assert!(!is_event_file(Path::new("index.json")));
    assert!(!is_event_file(Path::new("2019/06/abc/abc.tpl.json")));
    assert!(!is_event_file(Path::new("2019/06/abc/abc.raw.json")));
    assert!(!is_event_file(Path::new("notes.txt")));
  }
}
