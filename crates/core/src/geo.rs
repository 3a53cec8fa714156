//! Spherical-Earth helpers for distances and search regions.

use serde::{Deserialize, Serialize};

/// Mean kilometres per degree of great-circle arc.
pub const KM_PER_DEGREE: f64 = 111.2;

/// Great-circle separation between two points, in degrees of arc.
pub fn great_circle_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
  let phi1 = lat1.to_radians();
  let phi2 = lat2.to_radians();
  let dphi = (lat2 - lat1).to_radians();
  let dlambda = (lon2 - lon1).to_radians();
  let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
  let c = 2.0 * a.sqrt().clamp(0.0, 1.0).asin();
  c.to_degrees()
}

pub fn degrees_to_km(degrees: f64) -> f64 {
  degrees * KM_PER_DEGREE
}

pub fn km_to_degrees(km: f64) -> f64 {
  km / KM_PER_DEGREE
}

/// Circular search region centred on a point, radius in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
  pub latitude: f64,
  pub longitude: f64,
  pub max_radius: f64,
}

impl Region {
  pub fn new(latitude: f64, longitude: f64, max_radius: f64) -> Self {
    Self {
      latitude,
      longitude,
      max_radius,
    }
  }

  pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
    great_circle_distance(self.latitude, self.longitude, latitude, longitude) <= self.max_radius
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_distance_to_self() {
    assert!(great_circle_distance(-43.5, 172.6, -43.5, 172.6).abs() < 1e-12);
  }

  #[test]
  fn one_degree_of_latitude() {
    let d = great_circle_distance(0.0, 0.0, 1.0, 0.0);
    assert!((d - 1.0).abs() < 1e-9);
  }

  #[test]
  fn longitude_shrinks_with_latitude() {
    // A degree of longitude spans less arc away from the equator.
    let at_equator = great_circle_distance(0.0, 0.0, 0.0, 1.0);
    let at_60 = great_circle_distance(60.0, 0.0, 60.0, 1.0);
    assert!(at_60 < at_equator);
    assert!((at_60 - 0.5).abs() < 0.01);
  }

  #[test]
  fn km_conversion_round_trip() {
    let km = degrees_to_km(2.0);
    assert!((km - 222.4).abs() < 1e-9);
    assert!((km_to_degrees(km) - 2.0).abs() < 1e-12);
  }

  #[test]
  fn region_containment() {
    let region = Region::new(-42.0, 173.0, 1.0);
    assert!(region.contains(-42.5, 173.0));
    assert!(!region.contains(-40.0, 173.0));
  }
}
