use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A SEED channel identifier in `NET.STA.LOC.CHA` form.
///
/// Location codes are frequently empty; the empty string is preserved as-is
/// so that ids round-trip through `Display` unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeedId {
  pub network: String,
  pub station: String,
  pub location: String,
  pub channel: String,
}

impl SeedId {
  pub fn new(
    network: impl Into<String>,
    station: impl Into<String>,
    location: impl Into<String>,
    channel: impl Into<String>,
  ) -> Self {
    Self {
      network: network.into(),
      station: station.into(),
      location: location.into(),
      channel: channel.into(),
    }
  }

  /// The `NET.STA` part, used when counting distinct stations.
  pub fn station_key(&self) -> String {
    format!("{}.{}", self.network, self.station)
  }

  /// Field-wise match against a selector that may contain `?` (any single
  /// character) and `*` (any run of characters).
  pub fn matches(&self, selector: &SeedId) -> bool {
    wildcard_match(&self.network, &selector.network)
      && wildcard_match(&self.station, &selector.station)
      && wildcard_match(&self.location, &selector.location)
      && wildcard_match(&self.channel, &selector.channel)
  }

  /// Match only the channel code against a pattern such as `EH?`.
  pub fn channel_matches(&self, pattern: &str) -> bool {
    wildcard_match(&self.channel, pattern)
  }
}

fn wildcard_match(value: &str, pattern: &str) -> bool {
  let v: Vec<char> = value.chars().collect();
  let p: Vec<char> = pattern.chars().collect();
  let (mut vi, mut pi) = (0usize, 0usize);
  let mut star: Option<(usize, usize)> = None;
  while vi < v.len() {
    if pi < p.len() && (p[pi] == '?' || p[pi] == v[vi]) {
      vi += 1;
      pi += 1;
    } else if pi < p.len() && p[pi] == '*' {
      star = Some((pi, vi));
      pi += 1;
    } else if let Some((star_pi, star_vi)) = star {
      // Backtrack: let the last `*` swallow one more character.
      pi = star_pi + 1;
      vi = star_vi + 1;
      star = Some((star_pi, star_vi + 1));
    } else {
      return false;
    }
  }
  p[pi..].iter().all(|&c| c == '*')
}

impl fmt::Display for SeedId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}.{}.{}.{}",
      self.network, self.station, self.location, self.channel
    )
  }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid seed id {0:?}, expected NET.STA.LOC.CHA")]
pub struct ParseSeedIdError(pub String);

impl FromStr for SeedId {
  type Err = ParseSeedIdError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut parts = s.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
      (Some(net), Some(sta), Some(loc), Some(cha), None) => Ok(SeedId::new(net, sta, loc, cha)),
      _ => Err(ParseSeedIdError(s.to_string())),
    }
  }
}

impl Serialize for SeedId {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for SeedId {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}
