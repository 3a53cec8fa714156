//! FDSN-style web service client.
//!
//! One [`FdsnClient`] covers the three catalog-facing services the system
//! needs: `event/query` for the listener, `station/query` for picking
//! detection stations, and `dataselect/query` for template waveforms. All
//! three speak JSON over the FDSN URL shapes, and each sits behind a trait
//! so in-memory fakes can stand in during tests.

use std::time::Duration;

use aftershock_bank::{EventQuery, FetchError, WaveformSource};
use aftershock_core::config::ClientConfig;
use aftershock_core::{Event, Region, SeedId, UtcTime};
use aftershock_stream::TracePacket;
use aftershock_waveform::Stream;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Channel codes worth detecting on, most preferred first.
pub const CHANNEL_PRIORITIES: [&str; 2] = ["EH?", "HH?"];

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
  #[error("request failed: {0}")]
  Http(#[from] reqwest::Error),
  #[error("service returned {status}: {body}")]
  Service { status: u16, body: String },
}

/// Where catalog events come from.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
  async fn get_events(&self, query: &EventQuery) -> Result<Vec<Event>, ClientError>;
}

/// Where station coordinates come from.
#[async_trait::async_trait]
pub trait StationSource: Send + Sync {
  /// Channels inside `region` matching one of `channel_priorities`.
  async fn get_stations(&self, region: &Region, channel_priorities: &[&str])
  -> Result<Vec<StationInfo>, ClientError>;
}

/// One located channel of one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationInfo {
  pub seed_id: SeedId,
  pub latitude: f64,
  pub longitude: f64,
}

#[derive(Debug, Clone)]
pub struct FdsnClient {
  client: reqwest::Client,
  base_url: String,
}

impl FdsnClient {
  pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()?;
    Ok(Self {
      client,
      base_url: config.base_url.trim_end_matches('/').to_string(),
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  fn event_url(&self) -> String {
    format!("{}/event/query", self.base_url)
  }

  fn station_url(&self) -> String {
    format!("{}/station/query", self.base_url)
  }

  fn dataselect_url(&self) -> String {
    format!("{}/dataselect/query", self.base_url)
  }

  async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    if response.status().is_success() {
      return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Service { status, body })
  }
}

/// FDSN query parameters for an event search. Unset filters are omitted.
fn event_params(query: &EventQuery) -> Vec<(&'static str, String)> {
  let mut params = vec![("format", "json".to_string())];
  if let Some(start) = query.starttime {
    params.push(("starttime", start.to_string()));
  }
  if let Some(end) = query.endtime {
    params.push(("endtime", end.to_string()));
  }
  if let Some(region) = query.region {
    params.push(("latitude", region.latitude.to_string()));
    params.push(("longitude", region.longitude.to_string()));
    params.push(("maxradius", region.max_radius.to_string()));
  }
  if let Some(magnitude) = query.min_magnitude {
    params.push(("minmagnitude", magnitude.to_string()));
  }
  if let Some(magnitude) = query.max_magnitude {
    params.push(("maxmagnitude", magnitude.to_string()));
  }
  params
}

fn station_params(region: &Region, channel_priorities: &[&str]) -> Vec<(&'static str, String)> {
  vec![
    ("format", "json".to_string()),
    ("level", "channel".to_string()),
    ("latitude", region.latitude.to_string()),
    ("longitude", region.longitude.to_string()),
    ("maxradius", region.max_radius.to_string()),
    ("channel", channel_priorities.join(",")),
  ]
}

#[derive(Debug, Deserialize)]
struct EventQueryResponse {
  events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct StationQueryResponse {
  stations: Vec<StationInfo>,
}

#[derive(Debug, Serialize)]
struct WaveformRequest<'a> {
  bulk: Vec<BulkWindow<'a>>,
}

#[derive(Debug, Serialize)]
struct BulkWindow<'a> {
  id: &'a SeedId,
  starttime: UtcTime,
  endtime: UtcTime,
}

#[derive(Debug, Deserialize)]
struct WaveformResponse {
  traces: Vec<TracePacket>,
}

#[async_trait::async_trait]
impl EventSource for FdsnClient {
  async fn get_events(&self, query: &EventQuery) -> Result<Vec<Event>, ClientError> {
    let response = self
      .client
      .get(self.event_url())
      .query(&event_params(query))
      .send()
      .await?;
    let response = Self::check(response).await?;
    let result: EventQueryResponse = response.json().await?;
    debug!(events = result.events.len(), "event query complete");
    Ok(result.events)
  }
}

#[async_trait::async_trait]
impl StationSource for FdsnClient {
  async fn get_stations(
    &self,
    region: &Region,
    channel_priorities: &[&str],
  ) -> Result<Vec<StationInfo>, ClientError> {
    let response = self
      .client
      .get(self.station_url())
      .query(&station_params(region, channel_priorities))
      .send()
      .await?;
    let response = Self::check(response).await?;
    let result: StationQueryResponse = response.json().await?;
    debug!(stations = result.stations.len(), "station query complete");
    Ok(result.stations)
  }
}

#[async_trait::async_trait]
impl WaveformSource for FdsnClient {
  async fn get_waveforms_bulk(&self, bulk: &[(SeedId, UtcTime, UtcTime)]) -> Result<Stream, FetchError> {
    let request = WaveformRequest {
      bulk: bulk
        .iter()
        .map(|(id, start, end)| BulkWindow {
          id,
          starttime: *start,
          endtime: *end,
        })
        .collect(),
    };
    let response = self
      .client
      .post(self.dataselect_url())
      .json(&request)
      .send()
      .await
      .map_err(|error| FetchError::Service(error.to_string()))?;
    if !response.status().is_success() {
      let status = response.status();
      let body = response.text().await.unwrap_or_default();
      return Err(FetchError::Service(format!("dataselect returned {status}: {body}")));
    }
    let result: WaveformResponse = response
      .json()
      .await
      .map_err(|error| FetchError::Service(error.to_string()))?;
    let traces = result.traces.into_iter().map(TracePacket::into_trace).collect();
    Ok(Stream::new(traces).merge())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn event_params_omit_unset_filters() {
    let params = event_params(&EventQuery::all());
    assert_eq!(params, vec![("format", "json".to_string())]);

    let query = EventQuery::between(UtcTime::from_epoch(0.0), UtcTime::from_epoch(60.0)).with_min_magnitude(4.0);
    let params = event_params(&query);
    assert_eq!(params.len(), 4);
    assert!(params.contains(&("starttime", "1970-01-01T00:00:00.000Z".to_string())));
    assert!(params.contains(&("minmagnitude", "4".to_string())));
  }

  #[test]
  fn event_params_carry_region() {
    let query = EventQuery::within(Region {
      latitude: -42.5,
      longitude: 173.0,
      max_radius: 1.5,
    });
    let params = event_params(&query);
    assert!(params.contains(&("latitude", "-42.5".to_string())));
    assert!(params.contains(&("longitude", "173".to_string())));
    assert!(params.contains(&("maxradius", "1.5".to_string())));
  }

  #[test]
  fn station_params_join_channel_priorities() {
    let region = Region {
      latitude: -42.5,
      longitude: 173.0,
      max_radius: 1.0,
    };
    let params = station_params(&region, &CHANNEL_PRIORITIES);
    assert!(params.contains(&("channel", "EH?,HH?".to_string())));
    assert!(params.contains(&("level", "channel".to_string())));
  }

  #[test]
  fn bulk_request_wire_shape() {
    let id: SeedId = "NZ.WVZ.10.HHZ".parse().unwrap();
    let request = WaveformRequest {
      bulk: vec![BulkWindow {
        id: &id,
        starttime: UtcTime::from_epoch(0.0),
        endtime: UtcTime::from_epoch(10.0),
      }],
    };
    let json = serde_json::to_string(&request).unwrap();
    assert!(json.contains("\"id\":\"NZ.WVZ.10.HHZ\""));
    assert!(json.contains("\"starttime\":\"1970-01-01T00:00:00Z\""));
  }

  #[tokio::test]
  #[ignore = "Requires an FDSN-style JSON service"]
  async fn live_event_query() {
    let client = FdsnClient::new(&ClientConfig::default()).unwrap();
    let query = EventQuery::between(UtcTime::now() - 86400.0, UtcTime::now()).with_min_magnitude(4.0);
    let events = client.get_events(&query).await.unwrap();
    for event in &events {
      assert!(event.magnitude_value().is_some_and(|m| m >= 4.0));
    }
  }

  #[tokio::test]
  #[ignore = "Requires an FDSN-style JSON service"]
  async fn live_station_query() {
    let client = FdsnClient::new(&ClientConfig::default()).unwrap();
    let region = Region {
      latitude: -42.5,
      longitude: 173.0,
      max_radius: 2.0,
    };
    let stations = client.get_stations(&region, &CHANNEL_PRIORITIES).await.unwrap();
    assert!(!stations.is_empty());
  }
}
