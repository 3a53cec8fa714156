//! Filtering and resampling for detection pre-processing.
//!
//! Continuous data and templates must go through the same pipeline or their
//! correlations are meaningless, so everything funnels through [`process`]:
//! demean, detrend, taper, zero-phase Butterworth bandpass, then integer
//! decimation to the target rate. Gaps stay zero-filled and masked; the mask
//! rides along so later stages can discount them.

use crate::trace::Trace;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
  #[error("cannot resample {from} Hz to {to} Hz: ratio is not a whole number")]
  UnsupportedSampling { from: f64, to: f64 },
  #[error("corner {corner} Hz is at or above the Nyquist frequency {nyquist} Hz")]
  CornerAboveNyquist { corner: f64, nyquist: f64 },
  #[error("filter band {low}-{high} Hz is empty")]
  EmptyBand { low: f64, high: f64 },
  #[error("decimation factor must be at least 1")]
  InvalidDecimation,
}

/// Subtract the mean in place.
pub fn demean(data: &mut [f32]) {
  if data.is_empty() {
    return;
  }
  let mean = data.iter().map(|&v| v as f64).sum::<f64>() / data.len() as f64;
  for value in data {
    *value = (*value as f64 - mean) as f32;
  }
}

/// Subtract the least-squares line in place.
pub fn detrend_linear(data: &mut [f32]) {
  let n = data.len();
  if n < 2 {
    demean(data);
    return;
  }
  let nf = n as f64;
  let mut sum_y = 0.0f64;
  let mut sum_xy = 0.0f64;
  for (i, &value) in data.iter().enumerate() {
    sum_y += value as f64;
    sum_xy += i as f64 * value as f64;
  }
  let sum_x = nf * (nf - 1.0) / 2.0;
  let sum_xx = (nf - 1.0) * nf * (2.0 * nf - 1.0) / 6.0;
  let slope = (nf * sum_xy - sum_x * sum_y) / (nf * sum_xx - sum_x * sum_x);
  let intercept = (sum_y - slope * sum_x) / nf;
  for (i, value) in data.iter_mut().enumerate() {
    *value = (*value as f64 - (intercept + slope * i as f64)) as f32;
  }
}

/// Cosine taper over `fraction` of each end (0.05 tapers 5% per side).
pub fn cosine_taper(data: &mut [f32], fraction: f64) {
  let n = data.len();
  let taper_len = ((n as f64 * fraction).round() as usize).min(n / 2);
  if taper_len == 0 {
    return;
  }
  for i in 0..taper_len {
    let w = 0.5 * (1.0 - (std::f64::consts::PI * i as f64 / taper_len as f64).cos());
    data[i] = (data[i] as f64 * w) as f32;
    data[n - 1 - i] = (data[n - 1 - i] as f64 * w) as f32;
  }
}

/// One second-order filter section, run with f64 state over f32 samples.
#[derive(Debug, Clone, Copy)]
struct Biquad {
  b0: f64,
  b1: f64,
  b2: f64,
  a1: f64,
  a2: f64,
}

impl Biquad {
  fn run(&self, data: &mut [f32]) {
    // Direct form II transposed.
    let mut s1 = 0.0f64;
    let mut s2 = 0.0f64;
    for value in data {
      let x = *value as f64;
      let y = self.b0 * x + s1;
      s1 = self.b1 * x - self.a1 * y + s2;
      s2 = self.b2 * x - self.a2 * y;
      *value = y as f32;
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterKind {
  Lowpass,
  Highpass,
}

/// Butterworth cascade via the bilinear transform, prewarped at the corner.
/// Even orders come out as conjugate-pair biquads; odd orders append one
/// first-order section.
fn butterworth_sections(kind: FilterKind, order: u32, corner: f64, sampling_rate: f64) -> Vec<Biquad> {
  let order = order.max(1);
  let omega = 2.0 * std::f64::consts::PI * corner / sampling_rate;
  let (sin_w, cos_w) = omega.sin_cos();
  let mut sections = Vec::with_capacity(order as usize / 2 + 1);
  for k in 1..=(order / 2) {
    let phi = (2 * k - 1) as f64 * std::f64::consts::PI / (2.0 * order as f64);
    let q = 1.0 / (2.0 * phi.sin());
    let alpha = sin_w / (2.0 * q);
    let a0 = 1.0 + alpha;
    let section = match kind {
      FilterKind::Lowpass => Biquad {
        b0: (1.0 - cos_w) / (2.0 * a0),
        b1: (1.0 - cos_w) / a0,
        b2: (1.0 - cos_w) / (2.0 * a0),
        a1: -2.0 * cos_w / a0,
        a2: (1.0 - alpha) / a0,
      },
      FilterKind::Highpass => Biquad {
        b0: (1.0 + cos_w) / (2.0 * a0),
        b1: -(1.0 + cos_w) / a0,
        b2: (1.0 + cos_w) / (2.0 * a0),
        a1: -2.0 * cos_w / a0,
        a2: (1.0 - alpha) / a0,
      },
    };
    sections.push(section);
  }
  if order % 2 == 1 {
    let k = (omega / 2.0).tan();
    let a0 = 1.0 + k;
    let section = match kind {
      FilterKind::Lowpass => Biquad {
        b0: k / a0,
        b1: k / a0,
        b2: 0.0,
        a1: (k - 1.0) / a0,
        a2: 0.0,
      },
      FilterKind::Highpass => Biquad {
        b0: 1.0 / a0,
        b1: -1.0 / a0,
        b2: 0.0,
        a1: (k - 1.0) / a0,
        a2: 0.0,
      },
    };
    sections.push(section);
  }
  sections
}

fn run_cascade(data: &mut [f32], sections: &[Biquad], zerophase: bool) {
  for section in sections {
    section.run(data);
  }
  if zerophase {
    data.reverse();
    for section in sections {
      section.run(data);
    }
    data.reverse();
  }
}

fn check_corner(corner: f64, sampling_rate: f64) -> Result<(), ProcessError> {
  let nyquist = sampling_rate / 2.0;
  if corner >= nyquist {
    return Err(ProcessError::CornerAboveNyquist { corner, nyquist });
  }
  Ok(())
}

/// Butterworth lowpass in place.
pub fn lowpass(trace: &mut Trace, corner: f64, order: u32, zerophase: bool) -> Result<(), ProcessError> {
  check_corner(corner, trace.sampling_rate)?;
  let sections = butterworth_sections(FilterKind::Lowpass, order, corner, trace.sampling_rate);
  run_cascade(&mut trace.data, &sections, zerophase);
  Ok(())
}

/// Butterworth highpass in place.
pub fn highpass(trace: &mut Trace, corner: f64, order: u32, zerophase: bool) -> Result<(), ProcessError> {
  check_corner(corner, trace.sampling_rate)?;
  let sections = butterworth_sections(FilterKind::Highpass, order, corner, trace.sampling_rate);
  run_cascade(&mut trace.data, &sections, zerophase);
  Ok(())
}

/// Butterworth bandpass in place: a highpass at `low` cascaded with a
/// lowpass at `high`, each of the given order.
pub fn bandpass(trace: &mut Trace, low: f64, high: f64, order: u32, zerophase: bool) -> Result<(), ProcessError> {
  if low >= high {
    return Err(ProcessError::EmptyBand { low, high });
  }
  highpass(trace, low, order, zerophase)?;
  lowpass(trace, high, order, zerophase)?;
  Ok(())
}

/// Downsample by an integer factor after an anti-alias lowpass at 0.4 times
/// the new rate. The mask is strided along with the data.
pub fn decimate(trace: &mut Trace, factor: usize) -> Result<(), ProcessError> {
  if factor == 0 {
    return Err(ProcessError::InvalidDecimation);
  }
  if factor == 1 {
    return Ok(());
  }
  let new_rate = trace.sampling_rate / factor as f64;
  lowpass(trace, 0.4 * new_rate, 4, true)?;
  trace.data = trace.data.iter().step_by(factor).copied().collect();
  trace.mask = trace
    .mask
    .as_ref()
    .map(|m| m.iter().step_by(factor).copied().collect());
  trace.sampling_rate = new_rate;
  Ok(())
}

/// Full pre-processing pipeline: demean, detrend, 5% cosine taper, zero-phase
/// bandpass, integer decimation to `target_rate`. Returns a new trace; the
/// input is untouched.
pub fn process(
  trace: &Trace,
  lowcut: Option<f64>,
  highcut: Option<f64>,
  filt_order: u32,
  target_rate: f64,
) -> Result<Trace, ProcessError> {
  let ratio = trace.sampling_rate / target_rate;
  let factor = ratio.round();
  if factor < 1.0 || (ratio - factor).abs() > 1e-6 {
    return Err(ProcessError::UnsupportedSampling {
      from: trace.sampling_rate,
      to: target_rate,
    });
  }
  if let Some(high) = highcut {
    // Checked against the post-decimation Nyquist, where aliasing would bite.
    check_corner(high, target_rate)?;
  }
  let mut out = trace.clone();
  demean(&mut out.data);
  detrend_linear(&mut out.data);
  cosine_taper(&mut out.data, 0.05);
  match (lowcut, highcut) {
    (Some(low), Some(high)) => bandpass(&mut out, low, high, filt_order, true)?,
    (Some(low), None) => highpass(&mut out, low, filt_order, true)?,
    (None, Some(high)) => lowpass(&mut out, high, filt_order, true)?,
    (None, None) => {}
  }
  decimate(&mut out, factor as usize)?;
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use aftershock_core::UtcTime;

  fn sine(freq: f64, sampling_rate: f64, seconds: f64) -> Trace {
    let n = (sampling_rate * seconds) as usize;
    let data = (0..n)
      .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sampling_rate).sin() as f32)
      .collect();
    Trace::new("NZ.WVZ.10.HHZ".parse().unwrap(), UtcTime::from_epoch(0.0), sampling_rate, data)
  }

  fn rms(data: &[f32]) -> f64 {
    (data.iter().map(|&v| (v as f64).powi(2)).sum::<f64>() / data.len() as f64).sqrt()
  }

  #[test]
  fn detrend_removes_exact_line() {
    let mut data: Vec<f32> = (0..100).map(|i| 2.0 + 3.0 * i as f32).collect();
    detrend_linear(&mut data);
    assert!(data.iter().all(|&v| v.abs() < 1e-3));
  }

  #[test]
  fn taper_pins_ends_and_leaves_middle() {
    let mut data = vec![1.0f32; 100];
    cosine_taper(&mut data, 0.05);
    assert!(data[0].abs() < 1e-6);
    assert!(data[99].abs() < 1e-6);
    assert!((data[50] - 1.0).abs() < 1e-6);
  }

  #[test]
  fn bandpass_rejects_out_of_band() {
    let mut low_tone = sine(0.5, 100.0, 20.0);
    let input_rms = rms(&low_tone.data);
    bandpass(&mut low_tone, 5.0, 15.0, 4, true).unwrap();
    assert!(rms(&low_tone.data) < 0.01 * input_rms);
  }

  #[test]
  fn bandpass_passes_in_band() {
    let mut tone = sine(10.0, 100.0, 20.0);
    let input_rms = rms(&tone.data[500..1500]);
    bandpass(&mut tone, 5.0, 15.0, 4, true).unwrap();
    assert!(rms(&tone.data[500..1500]) > 0.7 * input_rms);
  }

  #[test]
  fn filters_reject_corners_past_nyquist() {
    let mut tone = sine(1.0, 100.0, 2.0);
    assert!(matches!(
      lowpass(&mut tone, 60.0, 4, false),
      Err(ProcessError::CornerAboveNyquist { .. })
    ));
    assert!(matches!(
      bandpass(&mut tone, 15.0, 5.0, 4, false),
      Err(ProcessError::EmptyBand { .. })
    ));
  }

  #[test]
  fn decimate_strides_data_and_mask() {
    let mut tr = sine(1.0, 100.0, 10.0);
    let mut mask = vec![false; tr.npts()];
    mask[3] = true;
    tr.mask = Some(mask);
    decimate(&mut tr, 2).unwrap();
    assert_eq!(tr.npts(), 500);
    assert!((tr.sampling_rate - 50.0).abs() < 1e-9);
    assert_eq!(tr.mask.as_ref().unwrap().len(), 500);
  }

  #[test]
  fn decimate_keeps_dc_level() {
    let mut tr = Trace::new(
      "NZ.WVZ.10.HHZ".parse().unwrap(),
      UtcTime::from_epoch(0.0),
      100.0,
      vec![1.0; 1000],
    );
    decimate(&mut tr, 4).unwrap();
    assert!((tr.data[125] - 1.0).abs() < 1e-3);
  }

  #[test]
  fn process_runs_full_pipeline() {
    let tr = sine(10.0, 100.0, 20.0);
    let out = process(&tr, Some(2.0), Some(15.0), 4, 50.0).unwrap();
    assert!((out.sampling_rate - 50.0).abs() < 1e-9);
    assert_eq!(out.npts(), 1000);
    assert!(rms(&out.data[250..750]) > 0.5);
  }

  #[test]
  fn process_rejects_bad_rates() {
    let tr = sine(10.0, 100.0, 2.0);
    assert!(matches!(
      process(&tr, Some(2.0), Some(15.0), 4, 40.0),
      Err(ProcessError::UnsupportedSampling { .. })
    ));
    assert!(matches!(
      process(&tr, Some(2.0), Some(30.0), 4, 50.0),
      Err(ProcessError::CornerAboveNyquist { .. })
    ));
  }
}
