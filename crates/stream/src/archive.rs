//! On-disk packet archive.
//!
//! Every packet the streaming client receives can be appended here, giving
//! the detector something to backfill from after a restart and the simulator
//! something to replay. Layout is one file per channel per UTC day:
//!
//! ```text
//! {root}/{year}/{julian day}/{seed id}.jsonl
//! ```
//!
//! Files are newline-delimited JSON packets, append-only. A torn final line
//! from an unclean shutdown is skipped on read.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use aftershock_core::{SeedId, UtcTime};
use aftershock_waveform::{Stream, Trace};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::packet::TracePacket;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
  #[error("archive io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

#[derive(Debug, Clone)]
pub struct WaveArchive {
  root: PathBuf,
}

impl WaveArchive {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn day_file(&self, id: &SeedId, day: UtcTime) -> PathBuf {
    self.root.join(day.day_path()).join(format!("{id}.jsonl"))
  }

  /// Append a trace. Masked spans are dropped; each contiguous run becomes
  /// one packet in the file for the day it starts in.
  pub fn append(&self, trace: &Trace) -> Result<(), ArchiveError> {
    for packet in TracePacket::from_trace(trace) {
      let path = self.day_file(&packet.seed_id, packet.starttime);
      if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ArchiveError::Io {
          path: parent.to_path_buf(),
          source,
        })?;
      }
      let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| ArchiveError::Io { path: path.clone(), source })?;
      let line = match serde_json::to_string(&packet) {
        Ok(line) => line,
        Err(error) => {
          warn!(%error, "failed to encode packet, dropping");
          continue;
        }
      };
      writeln!(file, "{line}").map_err(|source| ArchiveError::Io { path: path.clone(), source })?;
    }
    Ok(())
  }

  /// Read everything matching `selector` that overlaps `[start, end]`,
  /// merged per channel and trimmed to the window.
  pub fn get_waveforms(&self, selector: &SeedId, start: UtcTime, end: UtcTime) -> Result<Stream, ArchiveError> {
    let mut traces = Vec::new();
    for day_dir in self.day_dirs(start, end) {
      let entries = match fs::read_dir(&day_dir) {
        Ok(entries) => entries,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => continue,
        Err(source) => return Err(ArchiveError::Io { path: day_dir, source }),
      };
      for entry in entries.flatten() {
        let path = entry.path();
        let Some(id) = channel_of(&path) else {
          continue;
        };
        if !id.matches(selector) {
          continue;
        }
        let contents = fs::read_to_string(&path).map_err(|source| ArchiveError::Io { path: path.clone(), source })?;
        for line in contents.lines() {
          let packet: TracePacket = match serde_json::from_str(line) {
            Ok(packet) => packet,
            Err(error) => {
              // Likely a torn write at the tail of the file.
              warn!(path = %path.display(), %error, "skipping unreadable packet");
              continue;
            }
          };
          if packet.endtime() >= start && packet.starttime <= end {
            traces.push(packet.into_trace());
          }
        }
      }
    }
    debug!(selector = %selector, packets = traces.len(), "read from archive");
    let mut stream = Stream::new(traces).merge();
    stream.trim(start, end);
    stream.sort_by_id();
    Ok(stream)
  }

  /// Every channel with at least one packet anywhere in the archive.
  pub fn channels(&self) -> Vec<SeedId> {
    let mut ids = BTreeSet::new();
    for entry in WalkDir::new(&self.root).into_iter().flatten() {
      if entry.file_type().is_file()
        && let Some(id) = channel_of(entry.path())
      {
        ids.insert(id);
      }
    }
    ids.into_iter().collect()
  }

  /// Earliest and latest packet times over the whole archive, if any.
  pub fn time_span(&self) -> Option<(UtcTime, UtcTime)> {
    let mut span: Option<(UtcTime, UtcTime)> = None;
    for entry in WalkDir::new(&self.root).into_iter().flatten() {
      if !entry.file_type().is_file() || channel_of(entry.path()).is_none() {
        continue;
      }
      let Ok(contents) = fs::read_to_string(entry.path()) else {
        continue;
      };
      for line in contents.lines() {
        let Ok(packet) = serde_json::from_str::<TracePacket>(line) else {
          continue;
        };
        span = Some(match span {
          Some((first, last)) => (first.min(packet.starttime), last.max(packet.endtime())),
          None => (packet.starttime, packet.endtime()),
        });
      }
    }
    span
  }

  /// Day directories that could hold packets overlapping `[start, end]`.
  /// The preceding day is included because a packet is filed under the day
  /// it starts in.
  fn day_dirs(&self, start: UtcTime, end: UtcTime) -> Vec<PathBuf> {
    let mut dirs = BTreeSet::new();
    let mut day = start - 86_400.0;
    while day <= end {
      dirs.insert(self.root.join(day.day_path()));
      day = day + 86_400.0;
    }
    dirs.insert(self.root.join(end.day_path()));
    dirs.into_iter().collect()
  }
}

fn channel_of(path: &Path) -> Option<SeedId> {
  if path.extension().is_none_or(|ext| ext != "jsonl") {
    return None;
  }
  path.file_stem()?.to_str()?.parse().ok()
}
