//! Wire packets.
//!
//! One packet carries a short, gapless run of samples for one channel. The
//! wire format is newline-delimited JSON; anything that can produce these
//! packets can feed the streaming client.

use aftershock_core::{SeedId, UtcTime};
use aftershock_waveform::Trace;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracePacket {
  pub seed_id: SeedId,
  pub starttime: UtcTime,
  pub sampling_rate: f64,
  pub samples: Vec<f32>,
}

impl TracePacket {
  /// Time of the last sample.
  pub fn endtime(&self) -> UtcTime {
    if self.samples.is_empty() {
      return self.starttime;
    }
    self.starttime + (self.samples.len() as f64 - 1.0) / self.sampling_rate
  }

  pub fn into_trace(self) -> Trace {
    Trace::new(self.seed_id, self.starttime, self.sampling_rate, self.samples)
  }

  /// Packets are gapless, so masked traces must be split before packeting.
  pub fn from_trace(trace: &Trace) -> Vec<TracePacket> {
    trace
      .split()
      .into_iter()
      .filter(|segment| !segment.data.is_empty())
      .map(|segment| TracePacket {
        seed_id: segment.id,
        starttime: segment.starttime,
        sampling_rate: segment.sampling_rate,
        samples: segment.data,
      })
      .collect()
  }
}

/// Channel selection sent to a packet server before streaming begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSelection {
  pub network: String,
  pub station: String,
  pub selector: String,
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn json_round_trip() {
    let packet = TracePacket {
      seed_id: "NZ.WVZ.10.HHZ".parse().unwrap(),
      starttime: UtcTime::from_epoch(1000.0),
      sampling_rate: 100.0,
      samples: vec![0.5, -0.5, 1.0],
    };
    let line = serde_json::to_string(&packet).unwrap();
    let back: TracePacket = serde_json::from_str(&line).unwrap();
    assert_eq!(back, packet);
    assert!((back.endtime().epoch() - 1000.02).abs() < 1e-9);
  }

  #[test]
  fn gappy_traces_split_into_packets() {
    let mut trace = Trace::new(
      "NZ.WVZ.10.HHZ".parse().unwrap(),
      UtcTime::from_epoch(0.0),
      1.0,
      vec![1.0, 2.0, 0.0, 3.0, 4.0],
    );
    trace.mask = Some(vec![false, false, true, false, false]);
    let packets = TracePacket::from_trace(&trace);
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].samples, vec![1.0, 2.0]);
    assert!((packets[1].starttime.epoch() - 3.0).abs() < 1e-9);
  }
}
