//! StreamingClient - Async task that keeps a rolling waveform buffer filled
//!
//! The client owns a [`PacketSource`] and pushes every packet it yields into
//! a shared [`WaveBuffer`]. Detectors never talk to the wire themselves; they
//! hold a [`BufferHandle`] and take snapshots of the buffer whenever they
//! want to run.
//!
//! # Lifecycle
//!
//! The client runs until:
//! - The `CancellationToken` is triggered
//! - The source reports an unrecoverable error (connection closed, io error)
//!
//! Malformed packets are logged and skipped; the stream keeps flowing.

use std::sync::Arc;

use aftershock_core::{SeedId, UtcTime};
use aftershock_waveform::{Stream, WaveBuffer};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::WaveArchive;
use crate::source::{PacketSource, SourceError};

// ============================================================================
// BufferHandle
// ============================================================================

/// Cloneable read/write handle to a client's wave buffer.
#[derive(Clone)]
pub struct BufferHandle {
  buffer: Arc<RwLock<WaveBuffer>>,
}

impl BufferHandle {
  pub fn new(capacity_secs: f64) -> Self {
    Self {
      buffer: Arc::new(RwLock::new(WaveBuffer::new(capacity_secs))),
    }
  }

  /// Copy the current buffer contents out as a stream.
  pub async fn snapshot(&self) -> Stream {
    self.buffer.read().await.stream()
  }

  /// Longest span of buffered data over all channels, in seconds.
  pub async fn buffer_length_secs(&self) -> f64 {
    self.buffer.read().await.buffer_length_secs()
  }

  pub async fn channel_count(&self) -> usize {
    self.buffer.read().await.channel_count()
  }

  pub async fn channels(&self) -> Vec<SeedId> {
    self.buffer.read().await.channels()
  }

  pub async fn is_full(&self) -> bool {
    self.buffer.read().await.is_full()
  }

  /// Merge a stream into the buffer, skipping traces that do not fit.
  pub async fn add_stream(&self, stream: &Stream) {
    self.buffer.write().await.add_stream(stream);
  }

  pub async fn clear(&self) {
    self.buffer.write().await.clear();
  }
}

// ============================================================================
// StreamingClient
// ============================================================================

/// Async task that drains a packet source into a shared buffer.
///
/// # Example
///
/// ```ignore
/// let source = TcpPacketSource::connect("link.geonet.org.nz", 18000).await?;
/// let mut client = StreamingClient::new(Box::new(source), 300.0, cancel);
/// client.select_stream("NZ", "WVZ", "HHZ").await?;
/// let handle = client.handle();
/// tokio::spawn(client.run());
/// ```
pub struct StreamingClient {
  source: Box<dyn PacketSource>,
  handle: BufferHandle,
  archive: Option<WaveArchive>,
  cancel: CancellationToken,
}

impl StreamingClient {
  pub fn new(source: Box<dyn PacketSource>, capacity_secs: f64, cancel: CancellationToken) -> Self {
    Self {
      source,
      handle: BufferHandle::new(capacity_secs),
      archive: None,
      cancel,
    }
  }

  /// Also append every received packet to an on-disk archive.
  pub fn with_archive(mut self, archive: WaveArchive) -> Self {
    self.archive = Some(archive);
    self
  }

  /// Ask the upstream server for a channel. Call before `run`.
  pub async fn select_stream(&mut self, network: &str, station: &str, selector: &str) -> Result<(), SourceError> {
    self.source.select_stream(network, station, selector).await
  }

  pub fn handle(&self) -> BufferHandle {
    self.handle.clone()
  }

  pub fn spawn(self) -> tokio::task::JoinHandle<()> {
    tokio::spawn(self.run())
  }

  /// Run the client until cancelled or the source fails.
  pub async fn run(mut self) {
    info!("StreamingClient started");

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          info!("StreamingClient shutting down (cancelled)");
          break;
        }

        packet = self.source.next_packet() => {
          match packet {
            Ok(packet) => {
              let trace = packet.into_trace();
              debug!(id = %trace.id, npts = trace.npts(), "packet received");
              if let Some(ref archive) = self.archive
                && let Err(error) = archive.append(&trace)
              {
                warn!(%error, "failed to archive packet");
              }
              let mut buffer = self.handle.buffer.write().await;
              if let Err(error) = buffer.add_trace(&trace) {
                warn!(id = %trace.id, %error, "dropping packet");
              }
            }
            Err(error) if error.is_recoverable() => {
              warn!(%error, "skipping bad packet");
            }
            Err(error) => {
              warn!(%error, "StreamingClient shutting down (source failed)");
              break;
            }
          }
        }
      }
    }

    info!("StreamingClient stopped");
  }
}

// ============================================================================
// Backfill
// ============================================================================

/// Seed a buffer from the archive so detection can start with history
/// instead of waiting for the buffer to fill in real time.
///
/// Reads up to `max_secs` of data ending at `to` for each selector and
/// merges it into the buffer. Returns the number of traces added.
pub async fn backfill(
  handle: &BufferHandle,
  archive: &WaveArchive,
  selectors: &[SeedId],
  to: UtcTime,
  max_secs: f64,
) -> usize {
  let start = to - max_secs;
  let mut added = 0;
  for selector in selectors {
    match archive.get_waveforms(selector, start, to) {
      Ok(stream) => {
        added += stream.len();
        handle.add_stream(&stream).await;
      }
      Err(error) => {
        warn!(selector = %selector, %error, "backfill read failed");
      }
    }
  }
  info!(traces = added, secs = max_secs, "backfilled buffer from archive");
  added
}
