//! The reactive layer: from catalog activity to running detections.
//!
//! A [`listener`] polls the catalog into the template bank, [`triggers`]
//! decide which events matter, and the [`reactor`] answers by spinning up
//! matched-filter [`detector`] runs over live data. Web services are
//! reached through [`client`], and detections are announced via [`notify`].

pub mod client;
pub mod detector;
pub mod listener;
pub mod notify;
pub mod reactor;
pub mod triggers;

pub use client::{CHANNEL_PRIORITIES, ClientError, EventSource, FdsnClient, StationInfo, StationSource};
pub use detector::{DetectorError, RealTimeDetector};
pub use listener::{CatalogListener, ListenerHandle, filter_events};
pub use notify::{WebhookNotifier, notifier_from_config};
pub use reactor::{Reactor, ReactorHandle, RunStatus, SourceFactory, TriggerFunc, tcp_source_factory};
pub use triggers::{
  MIN_REGION_LENGTH_KM, estimate_region, magnitude_rate_trigger, magnitude_trigger, rate_trigger, select_stations,
};
