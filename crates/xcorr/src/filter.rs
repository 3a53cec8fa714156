//! The matched-filter pass: tribe against a stream snapshot, out comes a
//! party of detections.

use aftershock_core::ThresholdKind;
use aftershock_waveform::Stream;
use tracing::{debug, info};

use crate::correlate::{find_peaks, multi_channel_normxcorr, threshold_value};
use crate::detection::{Detection, Family, Party};
use crate::template::Tribe;

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
  #[error("continuous stream is empty")]
  EmptyStream,
  #[error("tribe has no templates")]
  EmptyTribe,
  #[error("stream traces have unequal lengths")]
  UnequalLengths,
  #[error("stream traces have unequal sampling rates")]
  UnequalRates,
  #[error("stream traces are not aligned in time")]
  UnalignedStarts,
  #[error("template {template} sampled at {template_rate} Hz but stream is {stream_rate} Hz")]
  SamplingMismatch {
    template: String,
    template_rate: f64,
    stream_rate: f64,
  },
}

/// Run every template in `tribe` over `stream`.
///
/// The stream must be one merged, gap-padded trace per channel, all sharing
/// start time, length, and sampling rate; snapshots from the wave buffer came
/// that way already. Detections closer together than `trig_int` seconds are
/// left in; declustering across repeated passes is the caller's business.
pub fn match_filter(
  tribe: &Tribe,
  stream: &Stream,
  threshold_input: f64,
  threshold_type: ThresholdKind,
  trig_int: f64,
) -> Result<Party, MatchError> {
  let first = stream.traces.first().ok_or(MatchError::EmptyStream)?;
  if tribe.is_empty() {
    return Err(MatchError::EmptyTribe);
  }
  let npts = first.npts();
  let rate = first.sampling_rate;
  let start = first.starttime;
  for trace in stream {
    if trace.npts() != npts {
      return Err(MatchError::UnequalLengths);
    }
    if (trace.sampling_rate - rate).abs() > 1e-6 {
      return Err(MatchError::UnequalRates);
    }
    if (trace.starttime - start).abs() > 0.5 / rate {
      return Err(MatchError::UnalignedStarts);
    }
  }
  for template in tribe {
    if (template.samp_rate - rate).abs() > 1e-6 {
      return Err(MatchError::SamplingMismatch {
        template: template.name.clone(),
        template_rate: template.samp_rate,
        stream_rate: rate,
      });
    }
  }

  let delta = 1.0 / rate;
  let trig_int_samples = (trig_int * rate).round() as usize;
  let correlations = multi_channel_normxcorr(&tribe.templates, stream);
  let mut party = Party::new();
  for (template, correlation) in tribe.iter().zip(correlations) {
    if correlation.cccsum.is_empty() || correlation.no_chans == 0 {
      debug!(template = %template.name, "no usable channels in stream");
      continue;
    }
    let threshold = threshold_value(
      &correlation.cccsum,
      threshold_type,
      threshold_input,
      correlation.no_chans,
    );
    let peaks = find_peaks(&correlation.cccsum, threshold, trig_int_samples);
    if peaks.is_empty() {
      continue;
    }
    let mut family = Family::new(template.clone());
    for (index, value) in peaks {
      let mut detection = Detection {
        template_name: template.name.clone(),
        detect_time: start + index as f64 * delta,
        detect_val: value as f64,
        threshold,
        threshold_type,
        threshold_input,
        no_chans: correlation.no_chans,
        chans: correlation.chans.clone(),
        event: None,
      };
      detection.event = Some(detection.to_event(template));
      family.detections.push(detection);
    }
    debug!(template = %template.name, detections = family.len(), threshold, "template matched");
    party.families.push(family);
  }
  info!(
    templates = tribe.len(),
    channels = stream.len(),
    detections = party.len(),
    "matched-filter pass complete"
  );
  Ok(party)
}
