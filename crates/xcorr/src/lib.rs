//! Matched-filter earthquake detection: template waveforms correlated
//! against continuous data, thresholded into detections.

pub mod correlate;
pub mod detection;
pub mod filter;
pub mod template;

pub use correlate::{TemplateCorrelation, find_peaks, multi_channel_normxcorr, normxcorr, threshold_value};
pub use detection::{Detection, Family, Party, average_rate};
pub use filter::{MatchError, match_filter};
pub use template::{Template, Tribe, check_tribe_quality};
