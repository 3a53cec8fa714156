//! Packet sources.
//!
//! A [`PacketSource`] is anything the streaming client can pull packets
//! from. The real one speaks newline-delimited JSON over TCP; tests swap in
//! scripted sources.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info};

use crate::packet::{StreamSelection, TracePacket};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
  #[error("connection error: {0}")]
  Io(#[from] std::io::Error),
  #[error("framing error: {0}")]
  Codec(#[from] tokio_util::codec::LinesCodecError),
  #[error("malformed packet: {0}")]
  Malformed(#[from] serde_json::Error),
  #[error("source closed")]
  Closed,
}

impl SourceError {
  /// Whether the source can still produce packets after this error.
  pub fn is_recoverable(&self) -> bool {
    matches!(self, SourceError::Malformed(_))
  }
}

/// A pull-based stream of trace packets.
///
/// Selections must all be issued before the first `next_packet` call; the
/// streaming client enforces that by taking the source by value when it
/// starts.
#[async_trait::async_trait]
pub trait PacketSource: Send {
  /// Ask the server for one more channel. `selector` may carry `?`/`*`
  /// wildcards, e.g. `HH?`.
  async fn select_stream(&mut self, network: &str, station: &str, selector: &str) -> Result<(), SourceError>;

  /// Pull the next packet, waiting for one to arrive. `Err(Closed)` means
  /// the stream ended and no further packets will come.
  async fn next_packet(&mut self) -> Result<TracePacket, SourceError>;
}

/// TCP packet source: one JSON object per line, selections up, packets down.
pub struct TcpPacketSource {
  framed: Framed<TcpStream, LinesCodec>,
  peer: String,
}

impl TcpPacketSource {
  pub async fn connect(host: &str, port: u16) -> Result<Self, SourceError> {
    let stream = TcpStream::connect((host, port)).await?;
    info!(host, port, "connected to packet server");
    Ok(Self {
      framed: Framed::new(stream, LinesCodec::new()),
      peer: format!("{host}:{port}"),
    })
  }

  pub fn peer(&self) -> &str {
    &self.peer
  }
}

#[async_trait::async_trait]
impl PacketSource for TcpPacketSource {
  async fn select_stream(&mut self, network: &str, station: &str, selector: &str) -> Result<(), SourceError> {
    let selection = StreamSelection {
      network: network.to_string(),
      station: station.to_string(),
      selector: selector.to_string(),
    };
    debug!(network, station, selector, "selecting stream");
    self.framed.send(serde_json::to_string(&selection)?).await?;
    Ok(())
  }

  async fn next_packet(&mut self) -> Result<TracePacket, SourceError> {
    match self.framed.next().await {
      Some(Ok(line)) => Ok(serde_json::from_str(&line)?),
      Some(Err(e)) => Err(e.into()),
      None => Err(SourceError::Closed),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use aftershock_core::UtcTime;
  use tokio::net::TcpListener;

  #[tokio::test]
  async fn tcp_source_round_trips_packets() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      let mut framed = Framed::new(stream, LinesCodec::new());
      // First line is the selection.
      let line = framed.next().await.unwrap().unwrap();
      let selection: StreamSelection = serde_json::from_str(&line).unwrap();
      assert_eq!(selection.station, "WVZ");
      let packet = TracePacket {
        seed_id: "NZ.WVZ.10.HHZ".parse().unwrap(),
        starttime: UtcTime::from_epoch(100.0),
        sampling_rate: 100.0,
        samples: vec![1.0, 2.0, 3.0],
      };
      framed.send(serde_json::to_string(&packet).unwrap()).await.unwrap();
    });

    let mut source = TcpPacketSource::connect("127.0.0.1", addr.port()).await.unwrap();
    source.select_stream("NZ", "WVZ", "HHZ").await.unwrap();
    let packet = source.next_packet().await.unwrap();
    assert_eq!(packet.samples, vec![1.0, 2.0, 3.0]);
    // Server hangs up after one packet.
    assert!(matches!(source.next_packet().await, Err(SourceError::Closed)));
    server.await.unwrap();
  }

  #[tokio::test]
  async fn malformed_lines_are_recoverable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      let mut framed = Framed::new(stream, LinesCodec::new());
      framed.send("not json".to_string()).await.unwrap();
      let packet = TracePacket {
        seed_id: "NZ.WVZ.10.HHZ".parse().unwrap(),
        starttime: UtcTime::from_epoch(100.0),
        sampling_rate: 100.0,
        samples: vec![1.0],
      };
      framed.send(serde_json::to_string(&packet).unwrap()).await.unwrap();
    });

    let mut source = TcpPacketSource::connect("127.0.0.1", addr.port()).await.unwrap();
    let err = source.next_packet().await.unwrap_err();
    assert!(err.is_recoverable());
    let packet = source.next_packet().await.unwrap();
    assert_eq!(packet.samples, vec![1.0]);
  }
}
