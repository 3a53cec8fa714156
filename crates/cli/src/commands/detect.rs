//! Detect command - one matched-filter run over a region

use std::path::PathBuf;

use aftershock_bank::{EventQuery, TemplateBank};
use aftershock_core::geo::km_to_degrees;
use aftershock_core::{Config, Region, ResourceId, SeedId, UtcTime};
use aftershock_reactor::{
  CHANNEL_PRIORITIES, FdsnClient, MIN_REGION_LENGTH_KM, RealTimeDetector, StationSource, estimate_region,
  notifier_from_config, select_stations,
};
use aftershock_stream::{BufferHandle, SimulatedClient, StreamingClient, TcpPacketSource, WaveArchive, backfill};
use anyhow::{Context, Result, bail};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Where the detection run should look, from either a bank event or
/// explicit coordinates.
fn resolve_region(
  bank: &TemplateBank,
  eventid: Option<String>,
  latitude: Option<f64>,
  longitude: Option<f64>,
  radius: f64,
) -> Result<Region> {
  if let Some(id) = eventid {
    let id = ResourceId::new(id);
    let event = bank
      .get_events_by_id(std::slice::from_ref(&id))?
      .into_iter()
      .next()
      .with_context(|| format!("event {id} is not in the bank; run `aftershock listen` first or give coordinates"))?;
    return estimate_region(&event, MIN_REGION_LENGTH_KM).context("the event has no origin to centre a run on");
  }
  match (latitude, longitude) {
    (Some(latitude), Some(longitude)) => Ok(Region::new(latitude, longitude, radius)),
    _ => bail!("give --eventid or both --latitude and --longitude"),
  }
}

/// Run one detector over the region until it stops or ctrl-c.
pub async fn cmd_detect(
  config: Config,
  eventid: Option<String>,
  latitude: Option<f64>,
  longitude: Option<f64>,
  radius: f64,
  simulate: Option<PathBuf>,
  speed_up: f64,
) -> Result<()> {
  let bank = TemplateBank::open(config.bank.clone()).context("could not open the template bank")?;
  let region = resolve_region(&bank, eventid, latitude, longitude, radius)?;
  info!(
    latitude = region.latitude,
    longitude = region.longitude,
    radius = region.max_radius,
    "detection region"
  );

  let tribe = bank
    .get_templates(&EventQuery::within(region))
    .await
    .context("could not load templates")?;
  if tribe.is_empty() {
    bail!("no templates in the bank for this region");
  }
  println!("Running {} templates", tribe.len());

  let notifier = notifier_from_config(&config.detection);
  let cancel = CancellationToken::new();
  let capacity = config.streaming.buffer_capacity;

  // Either replay an archive or stream live data into the buffer.
  let (buffer, available, feeder): (BufferHandle, Vec<SeedId>, JoinHandle<()>) = match simulate {
    Some(dir) => {
      let archive = WaveArchive::new(&dir);
      let (start, end) = archive
        .time_span()
        .with_context(|| format!("the archive at {} holds no data", dir.display()))?;
      let available = archive.channels();
      let client = SimulatedClient::new(archive, capacity, start, end, speed_up, cancel.clone());
      let buffer = client.handle();
      info!(start = %start, end = %end, speed_up, "replaying archive");
      (buffer, available, client.spawn())
    }
    None => {
      let fdsn = FdsnClient::new(&config.client).context("could not build the web service client")?;
      let station_region = Region::new(
        region.latitude,
        region.longitude,
        km_to_degrees(config.reactor.max_station_distance),
      );
      let stations = fdsn
        .get_stations(&station_region, &CHANNEL_PRIORITIES)
        .await
        .context("station query failed")?;
      let chosen = select_stations(&stations, &tribe, config.reactor.n_stations, &station_region);
      if chosen.is_empty() {
        bail!("no stations available around the detection region");
      }

      let source = TcpPacketSource::connect(&config.streaming.host, config.streaming.port)
        .await
        .with_context(|| format!("could not reach {}:{}", config.streaming.host, config.streaming.port))?;
      let mut client = StreamingClient::new(Box::new(source), capacity, cancel.clone());
      if let Some(path) = &config.streaming.archive_path {
        client = client.with_archive(WaveArchive::new(path));
      }
      for info in &chosen {
        if let Err(error) = client
          .select_stream(&info.seed_id.network, &info.seed_id.station, &info.seed_id.channel)
          .await
        {
          warn!(id = %info.seed_id, %error, "could not select channel");
        }
      }
      let buffer = client.handle();
      let available: Vec<SeedId> = chosen.iter().map(|info| info.seed_id.clone()).collect();
      if let Some(path) = &config.streaming.archive_path {
        backfill(&buffer, &WaveArchive::new(path), &available, UtcTime::now(), capacity).await;
      }
      (buffer, available, client.spawn())
    }
  };

  let detector = RealTimeDetector::new(
    "detect",
    tribe,
    buffer,
    capacity,
    &available,
    config.detection.clone(),
    notifier,
    cancel.clone(),
  )?
  .with_speed_up(speed_up);
  let mut task = detector.spawn();

  let party = tokio::select! {
    result = &mut task => result.context("detector task failed")?,
    _ = tokio::signal::ctrl_c() => {
      info!("ctrl-c received, shutting down");
      cancel.cancel();
      task.await.context("detector task failed")?
    }
  };
  cancel.cancel();
  let _ = feeder.await;

  println!(
    "Made {} detections, written under {}",
    party.len(),
    config.detection.detect_directory.display()
  );
  for detection in party.detections() {
    println!(
      "  {}  {}  value {:.2} on {} channels",
      detection.detect_time, detection.template_name, detection.detect_val, detection.no_chans
    );
  }
  Ok(())
}
