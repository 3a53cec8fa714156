//! Normalised cross-correlation and peak finding.
//!
//! Correlation runs in the time domain with running-sum normalisation: the
//! window mean and variance come from cumulative sums, so each lag costs one
//! dot product and O(1) normalisation. Accumulation is f64 throughout; day
//! scale cumulative sums overflow f32 precision badly.

use aftershock_core::{SeedId, ThresholdKind};
use aftershock_waveform::Stream;
use rayon::prelude::*;
use tracing::debug;

use crate::template::Template;

/// Variance below this fraction of the window's energy is treated as flat.
/// Zero-padded gaps and clipped segments land here.
const FLAT_TOLERANCE: f64 = 1e-10;

/// Normalised cross-correlation of `template` against every window of
/// `series`. Output length is `series.len() - template.len() + 1`; windows
/// with no variance correlate at exactly 0.0.
pub fn normxcorr(template: &[f32], series: &[f32]) -> Vec<f32> {
  let m = template.len();
  let n = series.len();
  if m == 0 || n < m {
    return Vec::new();
  }
  let mean_t = template.iter().map(|&v| v as f64).sum::<f64>() / m as f64;
  let demeaned: Vec<f64> = template.iter().map(|&v| v as f64 - mean_t).collect();
  let norm_t = demeaned.iter().map(|v| v * v).sum::<f64>().sqrt();
  let out_len = n - m + 1;
  if norm_t == 0.0 {
    return vec![0.0; out_len];
  }
  // Cumulative sum and square-sum, one slot of lead-in.
  let mut cum = vec![0.0f64; n + 1];
  let mut cum_sq = vec![0.0f64; n + 1];
  for (i, &v) in series.iter().enumerate() {
    let v = v as f64;
    cum[i + 1] = cum[i] + v;
    cum_sq[i + 1] = cum_sq[i] + v * v;
  }
  let mut out = Vec::with_capacity(out_len);
  for i in 0..out_len {
    let window_sum = cum[i + m] - cum[i];
    let window_energy = cum_sq[i + m] - cum_sq[i];
    let variance = window_energy - window_sum * window_sum / m as f64;
    if variance <= FLAT_TOLERANCE * window_energy.max(f64::MIN_POSITIVE) {
      out.push(0.0);
      continue;
    }
    let mut dot = 0.0f64;
    for (j, td) in demeaned.iter().enumerate() {
      dot += td * series[i + j] as f64;
    }
    out.push((dot / (norm_t * variance.sqrt())).clamp(-1.0, 1.0) as f32);
  }
  out
}

/// One template's network correlation against a stream.
#[derive(Debug, Clone)]
pub struct TemplateCorrelation {
  pub cccsum: Vec<f32>,
  pub no_chans: usize,
  pub chans: Vec<SeedId>,
}

/// Correlate every template channel against its stream channel and sum into
/// per-template network correlation sums.
///
/// Template channels are aligned on their offsets from the template's
/// earliest channel, so `cccsum[i]` is the network correlation with the
/// template's start placed at stream sample `i`. Channels absent from the
/// stream contribute nothing. All stream traces must share start, length,
/// and sampling rate; [`crate::match_filter`] checks that.
pub fn multi_channel_normxcorr(templates: &[Template], stream: &Stream) -> Vec<TemplateCorrelation> {
  let stream_npts = stream.traces.first().map(|tr| tr.npts()).unwrap_or(0);
  // (template index, channel offset in samples, template trace, stream trace)
  let mut pairs = Vec::new();
  let mut spans = vec![0usize; templates.len()];
  for (ti, template) in templates.iter().enumerate() {
    let Some(t0) = template.earliest_start() else {
      continue;
    };
    for trace in &template.stream {
      let offset = ((trace.starttime - t0) * trace.sampling_rate).round() as usize;
      spans[ti] = spans[ti].max(offset + trace.npts());
      if let Some(continuous) = stream.get(&trace.id) {
        pairs.push((ti, offset, trace, continuous));
      }
    }
  }
  debug!(
    templates = templates.len(),
    pairs = pairs.len(),
    stream_npts,
    "running network correlation"
  );
  let correlations: Vec<(usize, usize, SeedId, Vec<f32>)> = pairs
    .par_iter()
    .map(|&(ti, offset, trace, continuous)| (ti, offset, trace.id.clone(), normxcorr(&trace.data, &continuous.data)))
    .collect();
  let mut results: Vec<TemplateCorrelation> = spans
    .iter()
    .map(|&span| TemplateCorrelation {
      cccsum: if span > 0 && span <= stream_npts {
        vec![0.0; stream_npts - span + 1]
      } else {
        Vec::new()
      },
      no_chans: 0,
      chans: Vec::new(),
    })
    .collect();
  for (ti, offset, id, ccc) in correlations {
    let result = &mut results[ti];
    result.no_chans += 1;
    result.chans.push(id);
    for (i, slot) in result.cccsum.iter_mut().enumerate() {
      if let Some(&value) = ccc.get(i + offset) {
        *slot += value;
      }
    }
  }
  for result in &mut results {
    result.chans.sort();
  }
  results
}

/// Resolve the detection threshold for one correlation sum.
pub fn threshold_value(cccsum: &[f32], kind: ThresholdKind, input: f64, no_chans: usize) -> f64 {
  match kind {
    ThresholdKind::Mad => input * median_abs(cccsum),
    ThresholdKind::Absolute => input,
    ThresholdKind::AvChanCorr => input * no_chans as f64,
  }
}

fn median_abs(values: &[f32]) -> f64 {
  if values.is_empty() {
    return 0.0;
  }
  let mut magnitudes: Vec<f64> = values.iter().map(|&v| (v as f64).abs()).collect();
  magnitudes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
  let mid = magnitudes.len() / 2;
  if magnitudes.len() % 2 == 1 {
    magnitudes[mid]
  } else {
    (magnitudes[mid - 1] + magnitudes[mid]) / 2.0
  }
}

/// Local maxima of `|cccsum|` above `threshold`, greedily suppressing any
/// peak within `trig_int_samples` of a larger accepted peak. Returned in
/// index order with their original sign.
pub fn find_peaks(cccsum: &[f32], threshold: f64, trig_int_samples: usize) -> Vec<(usize, f32)> {
  let mut candidates: Vec<(usize, f32)> = Vec::new();
  for (i, &value) in cccsum.iter().enumerate() {
    let magnitude = value.abs() as f64;
    if magnitude <= threshold {
      continue;
    }
    let left = if i > 0 { cccsum[i - 1].abs() } else { f32::NEG_INFINITY };
    let right = if i + 1 < cccsum.len() {
      cccsum[i + 1].abs()
    } else {
      f32::NEG_INFINITY
    };
    if value.abs() >= left && value.abs() > right {
      candidates.push((i, value));
    }
  }
  candidates.sort_by(|a, b| {
    b.1
      .abs()
      .partial_cmp(&a.1.abs())
      .unwrap_or(std::cmp::Ordering::Equal)
  });
  let mut accepted: Vec<(usize, f32)> = Vec::new();
  for (i, value) in candidates {
    if accepted
      .iter()
      .all(|&(j, _)| i.abs_diff(j) > trig_int_samples)
    {
      accepted.push((i, value));
    }
  }
  accepted.sort_by_key(|&(i, _)| i);
  accepted
}

#[cfg(test)]
mod tests {
  use super::*;
  use aftershock_core::{Event, ResourceId, UtcTime};
  use aftershock_waveform::Trace;

  fn pseudo_noise(seed: u64, n: usize) -> Vec<f32> {
    let mut state = seed;
    (0..n)
      .map(|_| {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((state >> 33) as f32 / (1u64 << 31) as f32) - 0.5
      })
      .collect()
  }

  #[test]
  fn perfect_match_correlates_at_one() {
    let template = vec![0.0f32, 1.0, -1.0, 2.0, 0.5];
    let mut series = pseudo_noise(7, 50);
    series[20..25].copy_from_slice(&template);
    let ccc = normxcorr(&template, &series);
    assert_eq!(ccc.len(), 46);
    assert!((ccc[20] - 1.0).abs() < 1e-5);
    assert!(ccc.iter().all(|&v| (-1.0..=1.0).contains(&v)));
  }

  #[test]
  fn inverted_match_correlates_at_minus_one() {
    let template = vec![0.0f32, 1.0, -1.0, 2.0, 0.5];
    let mut series = pseudo_noise(11, 40);
    for (i, v) in template.iter().enumerate() {
      series[10 + i] = -v;
    }
    let ccc = normxcorr(&template, &series);
    assert!((ccc[10] + 1.0).abs() < 1e-5);
  }

  #[test]
  fn flat_windows_correlate_at_zero() {
    let template = vec![1.0f32, 2.0, 3.0];
    let series = vec![5.0f32; 10];
    let ccc = normxcorr(&template, &series);
    assert!(ccc.iter().all(|&v| v == 0.0));
  }

  #[test]
  fn multi_channel_sums_aligned_channels() {
    let template_data = vec![0.0f32, 1.0, -1.0, 2.0, 0.5];
    // Channel two starts 2 samples after channel one.
    let t_a = Trace::new("NZ.WVZ.10.HHZ".parse().unwrap(), UtcTime::from_epoch(100.0), 1.0, template_data.clone());
    let t_b = Trace::new("NZ.JCZ.10.HHZ".parse().unwrap(), UtcTime::from_epoch(102.0), 1.0, template_data.clone());
    let template = Template {
      name: "t1".to_string(),
      event: Event::new(ResourceId::generate()),
      stream: Stream::new(vec![t_a, t_b]),
      process_length: 300.0,
      prepick: 0.15,
      lowcut: 2.0,
      highcut: 15.0,
      samp_rate: 1.0,
      filt_order: 4,
    };
    let mut data_a = pseudo_noise(3, 40);
    let mut data_b = pseudo_noise(5, 40);
    data_a[12..17].copy_from_slice(&template_data);
    data_b[14..19].copy_from_slice(&template_data);
    let stream = Stream::new(vec![
      Trace::new("NZ.WVZ.10.HHZ".parse().unwrap(), UtcTime::from_epoch(0.0), 1.0, data_a),
      Trace::new("NZ.JCZ.10.HHZ".parse().unwrap(), UtcTime::from_epoch(0.0), 1.0, data_b),
    ]);
    let results = multi_channel_normxcorr(std::slice::from_ref(&template), &stream);
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.no_chans, 2);
    // Span is 2 + 5, so 40 - 7 + 1 windows.
    assert_eq!(result.cccsum.len(), 34);
    assert!((result.cccsum[12] - 2.0).abs() < 1e-4);
    let peak = result
      .cccsum
      .iter()
      .enumerate()
      .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
      .unwrap();
    assert_eq!(peak.0, 12);
  }

  #[test]
  fn missing_channels_reduce_counts() {
    let t_a = Trace::new("NZ.WVZ.10.HHZ".parse().unwrap(), UtcTime::from_epoch(0.0), 1.0, vec![1.0, -1.0, 1.0]);
    let t_b = Trace::new("NZ.FOZ.10.HHZ".parse().unwrap(), UtcTime::from_epoch(0.0), 1.0, vec![1.0, -1.0, 1.0]);
    let template = Template {
      name: "t1".to_string(),
      event: Event::new(ResourceId::generate()),
      stream: Stream::new(vec![t_a, t_b]),
      process_length: 300.0,
      prepick: 0.15,
      lowcut: 2.0,
      highcut: 15.0,
      samp_rate: 1.0,
      filt_order: 4,
    };
    let stream = Stream::new(vec![Trace::new(
      "NZ.WVZ.10.HHZ".parse().unwrap(),
      UtcTime::from_epoch(0.0),
      1.0,
      pseudo_noise(9, 20),
    )]);
    let results = multi_channel_normxcorr(std::slice::from_ref(&template), &stream);
    assert_eq!(results[0].no_chans, 1);
    assert_eq!(results[0].chans.len(), 1);
  }

  #[test]
  fn thresholds_dispatch_by_kind() {
    let cccsum = vec![-1.0f32, 2.0, -3.0, 4.0, 5.0];
    assert!((threshold_value(&cccsum, ThresholdKind::Absolute, 2.5, 4) - 2.5).abs() < 1e-9);
    assert!((threshold_value(&cccsum, ThresholdKind::AvChanCorr, 0.5, 4) - 2.0).abs() < 1e-9);
    // Median of |.| = 3.
    assert!((threshold_value(&cccsum, ThresholdKind::Mad, 8.0, 4) - 24.0).abs() < 1e-9);
  }

  #[test]
  fn peaks_suppress_within_trigger_window() {
    let mut cccsum = vec![0.0f32; 100];
    cccsum[10] = 5.0;
    cccsum[13] = 4.0;
    cccsum[40] = -6.0;
    cccsum[80] = 3.0;
    let peaks = find_peaks(&cccsum, 2.0, 5);
    let indices: Vec<usize> = peaks.iter().map(|&(i, _)| i).collect();
    assert_eq!(indices, vec![10, 40, 80]);
    // Negative peaks keep their sign.
    assert!((peaks[1].1 + 6.0).abs() < 1e-9);
  }

  #[test]
  fn peaks_below_threshold_are_ignored() {
    let cccsum = vec![0.0f32, 1.0, 0.0];
    assert!(find_peaks(&cccsum, 2.0, 5).is_empty());
  }
}
