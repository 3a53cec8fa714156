//! Template construction.
//!
//! Turns a picked catalog event plus raw waveforms into a [`Template`]:
//! every channel is processed to the template band and rate, then cut to a
//! short window starting just before its pick. Channels that cannot be cut
//! cleanly (missing data, gaps, low signal-to-noise) are dropped with a
//! log line rather than failing the whole event.

use aftershock_core::config::{PickWindow, TemplateConfig};
use aftershock_core::{Event, SeedId, UtcTime};
use aftershock_waveform::{Stream, Trace, process};
use aftershock_xcorr::Template;
use tracing::{debug, warn};

use crate::bank::{BankError, Result};

/// Where raw waveforms come from when building templates.
///
/// Implemented over HTTP by the reactor crate's FDSN-style client and by
/// in-memory fakes in tests.
#[async_trait::async_trait]
pub trait WaveformSource: Send + Sync {
  /// Fetch all the requested windows in one call. Channels with no data
  /// are simply absent from the returned stream.
  async fn get_waveforms_bulk(&self, bulk: &[(SeedId, UtcTime, UtcTime)]) -> std::result::Result<Stream, FetchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  #[error("waveform service error: {0}")]
  Service(String),
  #[error("connection error: {0}")]
  Io(#[from] std::io::Error),
}

/// The deduplicated per-channel download windows for an event:
/// `download_data_len` seconds split 45% before / 55% after each pick.
pub fn download_windows(event: &Event, download_data_len: f64) -> Vec<(SeedId, UtcTime, UtcTime)> {
  let mut bulk: Vec<(SeedId, UtcTime, UtcTime)> = event
    .picks
    .iter()
    .map(|pick| {
      (
        pick.waveform_id.clone(),
        pick.time - 0.45 * download_data_len,
        pick.time + 0.55 * download_data_len,
      )
    })
    .collect();
  bulk.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
  bulk.dedup();
  bulk
}

fn pick_in_window(phase_hint: Option<&str>, swin: PickWindow) -> bool {
  match swin {
    PickWindow::All => true,
    PickWindow::P => phase_hint.is_some_and(|p| p.to_ascii_uppercase().starts_with('P')),
    PickWindow::S => phase_hint.is_some_and(|p| p.to_ascii_uppercase().starts_with('S')),
  }
}

/// Root-mean-square of the unmasked samples.
fn rms(trace: &Trace) -> f64 {
  let mut sum = 0.0f64;
  let mut count = 0usize;
  for (k, &value) in trace.data.iter().enumerate() {
    if trace.mask.as_ref().is_some_and(|m| m[k]) {
      continue;
    }
    sum += f64::from(value) * f64::from(value);
    count += 1;
  }
  if count == 0 { 0.0 } else { (sum / count as f64).sqrt() }
}

fn peak_amplitude(trace: &Trace) -> f64 {
  trace.data.iter().fold(0.0f64, |acc, &v| acc.max(f64::from(v).abs()))
}

/// Build one template from an event and raw waveforms covering its picks.
pub fn build_template(event: &Event, raw: &Stream, params: &TemplateConfig) -> Result<Template> {
  let event_id = event.resource_id.to_string();
  if event.picks.is_empty() {
    return Err(BankError::EmptyTemplate(event_id));
  }

  // Process whole channels once; cuts share the filtered data.
  let mut processed = Vec::new();
  for trace in raw.clone().merge() {
    match process(
      &trace,
      Some(params.lowcut),
      Some(params.highcut),
      params.filt_order as u32,
      params.samp_rate,
    ) {
      Ok(trace) => processed.push(trace),
      Err(error) => {
        warn!(id = %trace.id, %error, "could not process channel, skipping");
      }
    }
  }

  let want_npts = (params.length * params.samp_rate).round() as usize;
  let mut snippets = Vec::new();
  for pick in &event.picks {
    if !pick_in_window(pick.phase_hint.as_deref(), params.swin) {
      continue;
    }
    let Some(trace) = processed.iter().find(|tr| tr.id == pick.waveform_id) else {
      debug!(id = %pick.waveform_id, "no data for picked channel");
      continue;
    };
    let cut_start = pick.time - params.prepick;
    let mut cut = trace.slice(cut_start, cut_start + params.length);
    cut.data.truncate(want_npts);
    if let Some(mask) = &mut cut.mask {
      mask.truncate(want_npts);
    }
    if cut.data.len() < want_npts || cut.valid_len() < cut.npts() {
      warn!(id = %pick.waveform_id, "picked channel has insufficient data, skipping");
      continue;
    }
    if params.min_snr > 0.0 {
      let noise = trace.slice(cut_start - params.length, cut_start);
      let noise_rms = rms(&noise);
      if noise_rms > 0.0 {
        let snr = peak_amplitude(&cut) / noise_rms;
        if snr < params.min_snr {
          debug!(id = %pick.waveform_id, snr, "channel below min_snr, skipping");
          continue;
        }
      }
    }
    cut.mask = None;
    snippets.push(cut);
  }
  if snippets.is_empty() {
    return Err(BankError::EmptyTemplate(event_id));
  }
  snippets.sort_by(|a, b| a.id.cmp(&b.id).then(a.starttime.cmp(&b.starttime)));

  Ok(Template {
    name: event.resource_id.tail().to_string(),
    event: event.clone(),
    stream: Stream::new(snippets),
    process_length: params.process_len,
    prepick: params.prepick,
    lowcut: params.lowcut,
    highcut: params.highcut,
    samp_rate: params.samp_rate,
    filt_order: params.filt_order as u32,
  })
}

#[cfg(test)]
mod tests {
  use aftershock_core::event::{EvaluationMode, Pick, ResourceId};
  use pretty_assertions::assert_eq;

  use super::*;

  fn noise(seed: u64, n: usize, amplitude: f32) -> Vec<f32> {
    let mut state = seed;
    (0..n)
      .map(|_| {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let unit = (state >> 33) as f32 / (1u64 << 31) as f32 - 1.0;
        unit * amplitude
      })
      .collect()
  }

  fn pick(id: &str, epoch: f64, phase: &str) -> Pick {
    Pick {
      time: UtcTime::from_epoch(epoch),
      waveform_id: id.parse().unwrap(),
      phase_hint: Some(phase.to_string()),
      evaluation_mode: EvaluationMode::Manual,
    }
  }

  fn raw_trace(id: &str, start: f64, n: usize, seed: u64, spike_at: Option<usize>) -> Trace {
    let mut data = noise(seed, n, 1.0);
    if let Some(at) = spike_at {
      data[at] = 1000.0;
      data[at + 1] = -800.0;
    }
    Trace::new(id.parse().unwrap(), UtcTime::from_epoch(start), 100.0, data)
  }

  fn params() -> TemplateConfig {
    TemplateConfig {
      length: 4.0,
      prepick: 0.15,
      samp_rate: 50.0,
      download_data_len: 20.0,
      ..TemplateConfig::default()
    }
  }

  #[test]
  fn download_windows_dedup_and_split() {
    let mut event = Event::new(ResourceId::new("smi:local/test"));
    event.picks.push(pick("NZ.WVZ.10.HHZ", 100.0, "P"));
    event.picks.push(pick("NZ.WVZ.10.HHZ", 100.0, "S"));
    event.picks.push(pick("NZ.JCZ.10.HHZ", 102.0, "P"));
    let bulk = download_windows(&event, 20.0);
    assert_eq!(bulk.len(), 2);
    assert!((bulk[1].1.epoch() - 91.0).abs() < 1e-9);
    assert!((bulk[1].2.epoch() - 111.0).abs() < 1e-9);
  }

  #[test]
  fn template_cut_geometry() {
    let mut event = Event::new(ResourceId::new("smi:local/ev1"));
    // Picks 9 s into 20 s of 100 Hz data.
    event.picks.push(pick("NZ.WVZ.10.HHZ", 109.0, "P"));
    event.picks.push(pick("NZ.JCZ.10.HHZ", 109.2, "P"));
    let raw = Stream::new(vec![
      raw_trace("NZ.WVZ.10.HHZ", 100.0, 2000, 7, Some(900)),
      raw_trace("NZ.JCZ.10.HHZ", 100.0, 2000, 11, Some(920)),
    ]);

    let template = build_template(&event, &raw, &params()).unwrap();
    assert_eq!(template.name, "ev1");
    assert_eq!(template.stream.len(), 2);
    for trace in &template.stream {
      // 4 s at the template rate of 50 Hz.
      assert_eq!(trace.npts(), 200);
      assert!((trace.sampling_rate - 50.0).abs() < 1e-9);
    }
    // Cuts start one prepick before each pick, on the decimated grid.
    let wvz = template.stream.get(&"NZ.WVZ.10.HHZ".parse().unwrap()).unwrap();
    assert!((wvz.starttime.epoch() - 108.85).abs() < 0.02);
  }

  #[test]
  fn swin_filters_picks_by_phase() {
    let mut event = Event::new(ResourceId::new("smi:local/ev2"));
    event.picks.push(pick("NZ.WVZ.10.HHZ", 109.0, "P"));
    event.picks.push(pick("NZ.WVZ.10.HHN", 109.5, "S"));
    let raw = Stream::new(vec![
      raw_trace("NZ.WVZ.10.HHZ", 100.0, 2000, 7, Some(900)),
      raw_trace("NZ.WVZ.10.HHN", 100.0, 2000, 13, Some(950)),
    ]);

    let mut p_only = params();
    p_only.swin = PickWindow::P;
    let template = build_template(&event, &raw, &p_only).unwrap();
    assert_eq!(template.stream.len(), 1);
    assert_eq!(template.stream.traces[0].id.to_string(), "NZ.WVZ.10.HHZ");
  }

  #[test]
  fn min_snr_drops_quiet_channels() {
    let mut event = Event::new(ResourceId::new("smi:local/ev3"));
    event.picks.push(pick("NZ.WVZ.10.HHZ", 109.0, "P"));
    event.picks.push(pick("NZ.QUI.10.HHZ", 109.0, "P"));
    let raw = Stream::new(vec![
      raw_trace("NZ.WVZ.10.HHZ", 100.0, 2000, 7, Some(900)),
      // Noise only, no signal.
      raw_trace("NZ.QUI.10.HHZ", 100.0, 2000, 17, None),
    ]);

    let mut gated = params();
    gated.min_snr = 8.0;
    let template = build_template(&event, &raw, &gated).unwrap();
    assert_eq!(template.stream.len(), 1);
    assert_eq!(template.stream.traces[0].id.to_string(), "NZ.WVZ.10.HHZ");
  }

  #[test]
  fn event_without_usable_channels_is_an_error() {
    let mut event = Event::new(ResourceId::new("smi:local/ev4"));
    event.picks.push(pick("NZ.WVZ.10.HHZ", 109.0, "P"));
    // No data at all for the picked channel.
    let raw = Stream::new(vec![raw_trace("NZ.JCZ.10.HHZ", 100.0, 2000, 7, None)]);
    let err = build_template(&event, &raw, &params()).unwrap_err();
    assert!(matches!(err, BankError::EmptyTemplate(_)));

    let empty = Event::new(ResourceId::new("smi:local/ev5"));
    assert!(matches!(
      build_template(&empty, &raw, &params()),
      Err(BankError::EmptyTemplate(_))
    ));
  }
}
