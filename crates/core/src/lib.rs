pub mod config;
pub mod event;
pub mod geo;
pub mod id;
pub mod notify;
pub mod time;

pub use config::{Config, ThresholdKind};
pub use event::{EvaluationMode, Event, Magnitude, Origin, Pick, ResourceId, event_time};
pub use geo::Region;
pub use id::SeedId;
pub use notify::{LogNotifier, Notifier};
pub use time::UtcTime;
