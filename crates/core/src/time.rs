use std::fmt;
use std::ops::{Add, Sub};

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

/// UTC timestamp with fractional-second arithmetic.
///
/// Waveform timing is naturally expressed as seconds-since-epoch floats,
/// while calendar maths (day-of-year paths, file stamps) wants a real
/// datetime. This wraps `chrono` and converts at the boundary, rounding to
/// whole nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtcTime(DateTime<Utc>);

impl UtcTime {
  pub const UNIX_EPOCH: UtcTime = UtcTime(DateTime::UNIX_EPOCH);

  pub fn now() -> Self {
    UtcTime(Utc::now())
  }

  /// Build from fractional seconds since the Unix epoch.
  pub fn from_epoch(seconds: f64) -> Self {
    let whole = seconds.floor();
    let mut nanos = ((seconds - whole) * 1e9).round() as i64;
    let mut secs = whole as i64;
    if nanos >= 1_000_000_000 {
      secs += 1;
      nanos -= 1_000_000_000;
    }
    UtcTime(DateTime::from_timestamp(secs, nanos as u32).unwrap_or(DateTime::UNIX_EPOCH))
  }

  /// Fractional seconds since the Unix epoch.
  pub fn epoch(&self) -> f64 {
    self.0.timestamp() as f64 + f64::from(self.0.timestamp_subsec_nanos()) * 1e-9
  }

  pub fn parse_rfc3339(s: &str) -> Result<Self, chrono::ParseError> {
    Ok(UtcTime(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc)))
  }

  pub fn year(&self) -> i32 {
    self.0.year()
  }

  pub fn month(&self) -> u32 {
    self.0.month()
  }

  pub fn day(&self) -> u32 {
    self.0.day()
  }

  /// Day-of-year, 1 through 366.
  pub fn julian_day(&self) -> u32 {
    self.0.ordinal()
  }

  /// Compact stamp for file names: `YYYYmmddTHHMMSS`.
  pub fn compact(&self) -> String {
    self.0.format("%Y%m%dT%H%M%S").to_string()
  }

  /// Compact stamp with microseconds, unique enough for detection ids.
  pub fn compact_micros(&self) -> String {
    self.0.format("%Y%m%dT%H%M%S%6f").to_string()
  }

  /// `YYYY/jjj` path segment for day-binned directories.
  pub fn day_path(&self) -> String {
    self.0.format("%Y/%j").to_string()
  }

  pub fn inner(&self) -> DateTime<Utc> {
    self.0
  }
}

impl From<DateTime<Utc>> for UtcTime {
  fn from(value: DateTime<Utc>) -> Self {
    UtcTime(value)
  }
}

impl Add<f64> for UtcTime {
  type Output = UtcTime;

  fn add(self, seconds: f64) -> UtcTime {
    UtcTime(self.0 + Duration::nanoseconds((seconds * 1e9).round() as i64))
  }
}

impl Sub<f64> for UtcTime {
  type Output = UtcTime;

  fn sub(self, seconds: f64) -> UtcTime {
    self + (-seconds)
  }
}

impl Sub for UtcTime {
  type Output = f64;

  /// Difference in seconds.
  fn sub(self, rhs: UtcTime) -> f64 {
    let delta = self.0 - rhs.0;
    delta
      .num_nanoseconds()
      .map(|n| n as f64 * 1e-9)
      .unwrap_or_else(|| delta.num_milliseconds() as f64 * 1e-3)
  }
}

impl fmt::Display for UtcTime {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.format("%Y-%m-%dT%H:%M:%S%.3fZ"))
  }
}
