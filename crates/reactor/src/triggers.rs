//! Trigger functions deciding which catalog events deserve a detection run.
//!
//! The default policy fires on either a single large event or a spatially
//! dense burst of smaller ones. Triggering events are then turned into a
//! template search region and a ranked station set for the detector.

use std::collections::{BTreeMap, HashSet};

use aftershock_core::config::ReactorConfig;
use aftershock_core::geo::{great_circle_distance, km_to_degrees};
use aftershock_core::{Event, Region, ResourceId, UtcTime, event_time};
use aftershock_xcorr::{Tribe, average_rate};
use tracing::{debug, error, warn};

use crate::client::StationInfo;

/// Smallest region diameter worth searching for templates, in km.
pub const MIN_REGION_LENGTH_KM: f64 = 50.0;

/// Separation of two events in degrees of arc. Events without an origin are
/// treated as infinitely far apart.
fn inter_event_distance(a: &Event, b: &Event) -> f64 {
  match (a.preferred_origin(), b.preferred_origin()) {
    (Some(origin_a), Some(origin_b)) => great_circle_distance(
      origin_a.latitude,
      origin_a.longitude,
      origin_b.latitude,
      origin_b.longitude,
    ),
    _ => 180.0,
  }
}

/// Events at or above `magnitude_threshold`. Events without a magnitude
/// never trigger.
pub fn magnitude_trigger(catalog: &[Event], magnitude_threshold: f64) -> Vec<Event> {
  catalog
    .iter()
    .filter(|event| event.magnitude_value().is_some_and(|m| m >= magnitude_threshold))
    .cloned()
    .collect()
}

/// Events belonging to a spatial bin whose rate is at or above
/// `rate_threshold` events per day.
///
/// Each event anchors a bin of every catalog event within `rate_radius`
/// degrees of it. Bins smaller than `minimum_events_in_bin` are ignored so a
/// lone pair of close events cannot fake a high rate over a tiny span.
pub fn rate_trigger(
  catalog: &[Event],
  rate_threshold: f64,
  rate_radius: f64,
  minimum_events_in_bin: usize,
) -> Vec<Event> {
  let mut triggered: Vec<Event> = Vec::new();
  let mut seen: HashSet<ResourceId> = HashSet::new();
  for event in catalog {
    let bin: Vec<&Event> = catalog
      .iter()
      .filter(|other| inter_event_distance(event, other) <= rate_radius)
      .collect();
    if bin.len() < minimum_events_in_bin {
      continue;
    }
    let times: Vec<UtcTime> = bin.iter().map(|e| event_time(e)).collect();
    let rate = average_rate(&times);
    if rate < rate_threshold {
      continue;
    }
    debug!(
      anchor = %event.resource_id,
      bin = bin.len(),
      rate = format!("{rate:.1}"),
      "event rate above threshold"
    );
    for member in bin {
      if seen.insert(member.resource_id.clone()) {
        triggered.push(member.clone());
      }
    }
  }
  triggered
}

/// The default trigger policy: magnitude or rate, de-duplicated.
pub fn magnitude_rate_trigger(catalog: &[Event], config: &ReactorConfig) -> Vec<Event> {
  let mut triggered = magnitude_trigger(catalog, config.magnitude_threshold);
  let mut seen: HashSet<ResourceId> = triggered.iter().map(|e| e.resource_id.clone()).collect();
  let by_rate = rate_trigger(
    catalog,
    config.rate_threshold,
    config.rate_radius,
    config.minimum_events_in_bin,
  );
  for event in by_rate {
    if seen.insert(event.resource_id.clone()) {
      triggered.push(event);
    }
  }
  triggered
}

/// Region to search for templates around a triggering event.
///
/// Radius comes from the Wells & Coppersmith surface rupture length
/// `10^((M - 5.08) / 1.16)` km, padded by 1.25x to cover the aftershock zone
/// and floored at `min_length_km`. Events without an origin give `None`;
/// events without a magnitude fall back to the minimum length.
pub fn estimate_region(event: &Event, min_length_km: f64) -> Option<Region> {
  let origin = match event.preferred_origin() {
    Some(origin) => origin,
    None => {
      error!(event = %event.resource_id, "triggering event has no origin, not using");
      return None;
    }
  };
  let length_km = match event.magnitude_value() {
    Some(magnitude) => 10f64.powf((magnitude - 5.08) / 1.16) * 1.25,
    None => {
      warn!(event = %event.resource_id, min_length_km, "triggering event has no magnitude, using minimum length");
      min_length_km
    }
  };
  let length_km = length_km.max(min_length_km);
  Some(Region::new(
    origin.latitude,
    origin.longitude,
    km_to_degrees(length_km) / 2.0,
  ))
}

/// Pick the most useful stations for a tribe: those appearing in the most
/// template picks, tie-broken by distance to the region centre, capped at
/// `n_stations`. Stations outside the region are dropped. All channels of a
/// chosen station travel together.
pub fn select_stations(stations: &[StationInfo], tribe: &Tribe, n_stations: usize, region: &Region) -> Vec<StationInfo> {
  let mut pick_count: BTreeMap<String, usize> = BTreeMap::new();
  for template in tribe {
    for pick in &template.event.picks {
      *pick_count.entry(pick.waveform_id.station_key()).or_default() += 1;
    }
  }
  let mut by_station: BTreeMap<String, Vec<&StationInfo>> = BTreeMap::new();
  for info in stations {
    if region.contains(info.latitude, info.longitude) {
      by_station.entry(info.seed_id.station_key()).or_default().push(info);
    }
  }
  if by_station.len() <= n_stations {
    return by_station.into_values().flatten().cloned().collect();
  }
  let mut ranked: Vec<(String, usize, f64)> = by_station
    .iter()
    .map(|(key, infos)| {
      let picks = pick_count.get(key).copied().unwrap_or(0);
      let distance = great_circle_distance(region.latitude, region.longitude, infos[0].latitude, infos[0].longitude);
      (key.clone(), picks, distance)
    })
    .collect();
  ranked.sort_by(|a, b| {
    b.1
      .cmp(&a.1)
      .then(a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
  });
  let chosen: HashSet<String> = ranked.into_iter().take(n_stations).map(|(key, _, _)| key).collect();
  by_station
    .into_iter()
    .filter(|(key, _)| chosen.contains(key))
    .flat_map(|(_, infos)| infos.into_iter().cloned())
    .collect()
}
