//! Runtime configuration.
//!
//! One TOML file drives every component: catalog and waveform services, the
//! real-time feed, detection, the template bank, template construction, the
//! reactor and logging. Every section has complete defaults so a missing
//! file (or an empty one) is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ============================================================================
// Client Configuration
// ============================================================================

/// Catalog and waveform web services (FDSN-style, JSON responses).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
  /// Base URL of the event/station/waveform service
  pub base_url: String,

  /// Request timeout in seconds (default: 30)
  pub timeout_secs: u64,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      base_url: "https://service.geonet.org.nz".to_string(),
      timeout_secs: 30,
    }
  }
}

// ============================================================================
// Streaming Configuration
// ============================================================================

/// Real-time waveform feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
  /// Host serving framed trace packets
  pub host: String,

  /// Port of the packet feed (default: 18000)
  pub port: u16,

  /// Seconds of data each channel buffer holds (default: 300)
  pub buffer_capacity: f64,

  /// Directory to archive received packets into, for backfill.
  /// Disabled when unset.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub archive_path: Option<PathBuf>,
}

impl Default for StreamingConfig {
  fn default() -> Self {
    Self {
      host: "link.geonet.org.nz".to_string(),
      port: 18000,
      buffer_capacity: 300.0,
      archive_path: None,
    }
  }
}

// ============================================================================
// Detection Configuration
// ============================================================================

/// How a network correlation sum is turned into an absolute threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
  /// Multiple of the median absolute deviation of the correlation sum
  Mad,
  /// Use the configured value directly
  Absolute,
  /// Multiple of the number of contributing channels
  #[default]
  AvChanCorr,
}

/// Real-time matched-filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
  /// Threshold input value (default: 0.5)
  pub threshold: f64,

  /// Threshold interpretation (default: av_chan_corr)
  pub threshold_type: ThresholdKind,

  /// Minimum seconds between detections of one template (default: 2.0)
  pub trig_int: f64,

  /// Seconds between detection runs (default: 120)
  pub detect_interval: f64,

  /// Seconds to keep past detections in memory (default: 86400)
  pub keep_detections: f64,

  /// Head directory for detection output files
  pub detect_directory: PathBuf,

  /// Write a waveform snippet beside each detection (default: true)
  pub save_waveforms: bool,

  /// Stop a detection run after this many seconds. Unset runs forever.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_run_length: Option<f64>,

  /// Stop when the detection rate (events/day) drops below this.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub minimum_rate: Option<f64>,

  /// Channel codes never used for detection (horizontal components)
  pub exclude_channels: Vec<String>,

  /// POST detection notifications to this URL as JSON. Unset logs instead.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub webhook_url: Option<String>,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    Self {
      threshold: 0.5,
      threshold_type: ThresholdKind::AvChanCorr,
      trig_int: 2.0,
      detect_interval: 120.0,
      keep_detections: 86400.0,
      detect_directory: PathBuf::from("detections"),
      save_waveforms: true,
      max_run_length: None,
      minimum_rate: None,
      exclude_channels: ["EHE", "EHN", "EH1", "EH2", "HHE", "HHN", "HH1", "HH2"]
        .into_iter()
        .map(String::from)
        .collect(),
      webhook_url: None,
    }
  }
}

// ============================================================================
// Bank Configuration
// ============================================================================

/// On-disk event and template store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
  /// Root directory of the bank (default: current directory)
  pub base_path: PathBuf,

  /// Directory layout under the root.
  /// Supports `{year}`, `{month}`, `{day}` and `{event_id_end}`.
  pub path_structure: String,

  /// File-name layout, same placeholders as `path_structure`
  pub event_name_structure: String,

  /// Recently read templates kept in memory (default: 5)
  pub cache_size: u64,

  /// Minimum distinct stations for a usable template (default: 5)
  pub min_stations: usize,

  /// Store raw downloaded waveforms beside templates (default: true)
  pub save_raw: bool,
}

impl Default for BankConfig {
  fn default() -> Self {
    Self {
      base_path: PathBuf::from("."),
      path_structure: "{year}/{month}/{event_id_end}".to_string(),
      event_name_structure: "{event_id_end}".to_string(),
      cache_size: 5,
      min_stations: 5,
      save_raw: true,
    }
  }
}

// ============================================================================
// Template Configuration
// ============================================================================

/// Which picks contribute channels to a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PickWindow {
  #[default]
  All,
  P,
  S,
}

/// Template construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
  /// Bandpass low corner in Hz (default: 2.0)
  pub lowcut: f64,

  /// Bandpass high corner in Hz (default: 15.0)
  pub highcut: f64,

  /// Filter order (default: 4)
  pub filt_order: usize,

  /// Target sampling rate in Hz (default: 50)
  pub samp_rate: f64,

  /// Template length in seconds (default: 4.0)
  pub length: f64,

  /// Seconds of data before the pick (default: 0.15)
  pub prepick: f64,

  /// Picks to build channels from (default: all)
  pub swin: PickWindow,

  /// Seconds of continuous data a detection run needs (default: 300)
  pub process_len: f64,

  /// Drop template channels below this signal-to-noise ratio.
  /// Zero disables the check.
  pub min_snr: f64,

  /// Seconds of raw data to download around each event (default: 600)
  pub download_data_len: f64,
}

impl Default for TemplateConfig {
  fn default() -> Self {
    Self {
      lowcut: 2.0,
      highcut: 15.0,
      filt_order: 4,
      samp_rate: 50.0,
      length: 4.0,
      prepick: 0.15,
      swin: PickWindow::All,
      process_len: 300.0,
      min_snr: 0.0,
      download_data_len: 600.0,
    }
  }
}

// ============================================================================
// Listener Configuration
// ============================================================================

/// Catalog polling and filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
  /// Seconds between catalog queries (default: 600)
  pub poll_interval: f64,

  /// Seconds to remember events for deduplication (default: 86400)
  pub keep: f64,

  /// Ignore events picked on fewer stations (default: 5)
  pub min_stations: usize,

  /// Drop events whose picks are all automatic (default: false)
  pub require_manual_picks: bool,

  /// Accept only these event types when set
  #[serde(skip_serializing_if = "Option::is_none")]
  pub event_types: Option<Vec<String>>,

  /// Build templates for accepted events as they arrive (default: true)
  pub build_templates: bool,
}

impl Default for ListenerConfig {
  fn default() -> Self {
    Self {
      poll_interval: 600.0,
      keep: 86400.0,
      min_stations: 5,
      require_manual_picks: false,
      event_types: None,
      build_templates: true,
    }
  }
}

// ============================================================================
// Reactor Configuration
// ============================================================================

/// Trigger thresholds and spin-up behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
  /// Magnitude at or above which an event triggers (default: 6.0)
  pub magnitude_threshold: f64,

  /// Events per day within a bin to trigger on rate (default: 20)
  pub rate_threshold: f64,

  /// Radius in degrees of each rate bin (default: 0.5)
  pub rate_radius: f64,

  /// Minimum events in a bin before its rate counts (default: 5)
  pub minimum_events_in_bin: usize,

  /// Seconds between reactor passes (default: 10)
  pub sleep_step: f64,

  /// Stations further than this from a trigger are not used, km
  /// (default: 1000)
  pub max_station_distance: f64,

  /// Stations per detection run (default: 10)
  pub n_stations: usize,

  /// Concurrent detection runs. Defaults to a core-count based limit.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_parallel_detections: Option<usize>,
}

impl Default for ReactorConfig {
  fn default() -> Self {
    Self {
      magnitude_threshold: 6.0,
      rate_threshold: 20.0,
      rate_radius: 0.5,
      minimum_events_in_bin: 5,
      sleep_step: 10.0,
      max_station_distance: 1000.0,
      n_stations: 10,
      max_parallel_detections: None,
    }
  }
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
  #[default]
  Daily,
  Hourly,
  Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Filter directive, e.g. "info" or "aftershock=debug"
  pub level: String,

  /// Log to this file as well as the console when set
  #[serde(skip_serializing_if = "Option::is_none")]
  pub file: Option<PathBuf>,

  /// File rotation policy (default: daily)
  pub rotation: LogRotation,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
      rotation: LogRotation::Daily,
    }
  }
}

// ============================================================================
// Top-level Configuration
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub client: ClientConfig,
  pub streaming: StreamingConfig,
  pub detection: DetectionConfig,
  pub bank: BankConfig,
  pub template: TemplateConfig,
  pub listener: ListenerConfig,
  pub reactor: ReactorConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("could not read config at {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("could not write config to {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("invalid config: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("could not serialise config: {0}")]
  Serialize(#[from] toml::ser::Error),
}

impl Config {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(toml::from_str(&content)?)
  }

  /// Load the user-level config if one exists, otherwise defaults.
  pub fn load_or_default() -> Self {
    if let Some(path) = Self::user_config_path()
      && path.exists()
      && let Ok(config) = Self::load(&path)
    {
      return config;
    }
    Self::default()
  }

  pub fn write(&self, path: &Path) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(self)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Write {
      path: path.to_path_buf(),
      source,
    })
  }

  /// The user-level config path, honouring `AFTERSHOCK_CONFIG`.
  pub fn user_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("AFTERSHOCK_CONFIG") {
      return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|p| p.join("aftershock").join("config.toml"))
  }

  /// Default config rendered as a commented TOML template.
  pub fn template() -> String {
    let body = toml::to_string_pretty(&Self::default()).unwrap_or_default();
    format!(
      "# aftershock configuration\n\
       # Place at ~/.config/aftershock/config.toml or pass with --config.\n\
       # Every key is optional; the values below are the defaults.\n\n{body}"
    )
  }
}
