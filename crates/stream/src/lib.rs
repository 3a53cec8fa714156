//! Real-time waveform acquisition.
//!
//! Packets arrive over the wire ([`source`]), land in a rolling buffer that
//! detectors snapshot ([`client`]), and are optionally journalled to disk
//! ([`archive`]) so a past sequence can be replayed at speed ([`simulate`]).

pub mod archive;
pub mod client;
pub mod packet;
pub mod simulate;
pub mod source;

pub use archive::{ArchiveError, WaveArchive};
pub use client::{BufferHandle, StreamingClient, backfill};
pub use packet::{StreamSelection, TracePacket};
pub use simulate::SimulatedClient;
pub use source::{PacketSource, SourceError, TcpPacketSource};
