//! TemplateBank - directory-backed event and template store
//!
//! Events and their templates live together under a configurable directory
//! layout (default `{year}/{month}/{event_id_end}`), one JSON file per
//! object:
//!
//! ```text
//! {root}/2019/06/2019p304574/2019p304574.json       event
//! {root}/2019/06/2019p304574/2019p304574.tpl.json   template
//! {root}/2019/06/2019p304574/2019p304574.raw.json   raw waveforms (optional)
//! {root}/index.json                                  query index
//! ```
//!
//! Reads go through the index and a small in-memory template cache;
//! template files are parsed in parallel on a blocking thread. Unreadable
//! files are skipped with a warning, never a hard failure, so a corrupt
//! write cannot take the bank down.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aftershock_core::config::{BankConfig, TemplateConfig};
use aftershock_core::{Event, ResourceId, event_time};
use aftershock_xcorr::{Template, Tribe, check_tribe_quality};
use moka::future::Cache;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::builder::{FetchError, WaveformSource, build_template, download_windows};
use crate::index::{BankIndex, EventQuery, RAW_SUFFIX, TEMPLATE_SUFFIX};

#[derive(Debug, thiserror::Error)]
pub enum BankError {
  #[error("bank io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("waveform fetch failed: {0}")]
  Fetch(#[from] FetchError),
  #[error("no usable channels for event {0}")]
  EmptyTemplate(String),
}

pub type Result<T> = std::result::Result<T, BankError>;

pub struct TemplateBank {
  root: PathBuf,
  config: BankConfig,
  index: Mutex<BankIndex>,
  cache: Cache<String, Template>,
}

impl TemplateBank {
  /// Open a bank at `config.base_path`, creating the directory if needed.
  /// A missing index is rebuilt from whatever event files are on disk.
  pub fn open(config: BankConfig) -> Result<Self> {
    let root = config.base_path.clone();
    std::fs::create_dir_all(&root).map_err(|source| BankError::Io {
      path: root.clone(),
      source,
    })?;
    let index = match BankIndex::load(&root)? {
      Some(index) => index,
      None => {
        let index = BankIndex::rebuild(&root)?;
        index.save(&root)?;
        index
      }
    };
    info!(root = %root.display(), events = index.len(), "opened template bank");
    Ok(Self {
      cache: Cache::new(config.cache_size),
      root,
      config,
      index: Mutex::new(index),
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn event_count(&self) -> usize {
    self.lock_index().len()
  }

  fn lock_index(&self) -> std::sync::MutexGuard<'_, BankIndex> {
    self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Re-scan the tree and rewrite the index. Returns the event count.
  pub fn update_index(&self) -> Result<usize> {
    let rebuilt = BankIndex::rebuild(&self.root)?;
    rebuilt.save(&self.root)?;
    let count = rebuilt.len();
    *self.lock_index() = rebuilt;
    info!(events = count, "bank index rebuilt");
    Ok(count)
  }

  fn relative_event_path(&self, event: &Event) -> PathBuf {
    let dir = expand(&self.config.path_structure, event);
    let name = expand(&self.config.event_name_structure, event);
    PathBuf::from(dir).join(format!("{name}.json"))
  }

  pub fn event_path(&self, event: &Event) -> PathBuf {
    self.root.join(self.relative_event_path(event))
  }

  pub fn template_path(&self, event: &Event) -> PathBuf {
    companion_path(&self.event_path(event), TEMPLATE_SUFFIX)
  }

  pub fn raw_path(&self, event: &Event) -> PathBuf {
    companion_path(&self.event_path(event), RAW_SUFFIX)
  }

  // ==========================================================================
  // Events
  // ==========================================================================

  pub fn put_events(&self, events: &[Event]) -> Result<()> {
    let mut index = self.lock_index();
    for event in events {
      let relative = self.relative_event_path(event);
      let path = self.root.join(&relative);
      write_json_file(&path, &serde_json::to_string_pretty(event)?)?;
      index.upsert(event, relative);
    }
    index.save(&self.root)?;
    debug!(events = events.len(), "stored events");
    Ok(())
  }

  pub fn get_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
    let paths: Vec<PathBuf> = {
      let index = self.lock_index();
      index.query(query).into_iter().map(|e| self.root.join(&e.path)).collect()
    };
    self.read_events(paths)
  }

  /// Look up events by resource id. Ids not in the bank are silently
  /// skipped, so the result may be shorter than the request.
  pub fn get_events_by_id(&self, ids: &[ResourceId]) -> Result<Vec<Event>> {
    let paths: Vec<PathBuf> = {
      let index = self.lock_index();
      ids
        .iter()
        .filter_map(|id| index.entries.get(&id.0).map(|e| self.root.join(&e.path)))
        .collect()
    };
    self.read_events(paths)
  }

  fn read_events(&self, paths: Vec<PathBuf>) -> Result<Vec<Event>> {
    let mut events = Vec::with_capacity(paths.len());
    for path in paths {
      match read_json_file::<Event>(&path) {
        Ok(event) => events.push(event),
        Err(error) => warn!(path = %path.display(), %error, "skipping unreadable event"),
      }
    }
    Ok(events)
  }

  // ==========================================================================
  // Templates
  // ==========================================================================

  pub async fn put_templates(&self, tribe: &Tribe) -> Result<()> {
    let events: Vec<Event> = tribe.iter().map(|t| t.event.clone()).collect();
    self.put_events(&events)?;
    for template in tribe {
      let path = self.template_path(&template.event);
      write_json_file(&path, &serde_json::to_string(template)?)?;
      self
        .cache
        .insert(template.event.resource_id.to_string(), template.clone())
        .await;
    }
    info!(templates = tribe.len(), "stored templates");
    Ok(())
  }

  /// Load the templates of every indexed event matching `query`.
  ///
  /// Recently used templates come from the cache; the rest are read from
  /// disk in parallel. Events without a readable template file are skipped
  /// with a warning.
  pub async fn get_templates(&self, query: &EventQuery) -> Result<Tribe> {
    let candidates: Vec<(String, PathBuf)> = {
      let index = self.lock_index();
      index
        .entries
        .iter()
        .filter(|(_, entry)| query.matches(entry))
        .map(|(id, entry)| (id.clone(), companion_path(&self.root.join(&entry.path), TEMPLATE_SUFFIX)))
        .collect()
    };

    let mut templates = Vec::with_capacity(candidates.len());
    let mut misses = Vec::new();
    for (id, path) in candidates {
      match self.cache.get(&id).await {
        Some(template) => templates.push(template),
        None => misses.push((id, path)),
      }
    }

    if !misses.is_empty() {
      let read: Vec<(String, Template)> = tokio::task::spawn_blocking(move || {
        misses
          .par_iter()
          .filter_map(|(id, path)| match read_json_file::<Template>(path) {
            Ok(template) => Some((id.clone(), template)),
            Err(error) => {
              warn!(path = %path.display(), %error, "skipping unreadable template");
              None
            }
          })
          .collect()
      })
      .await
      .unwrap_or_else(|error| {
        warn!(%error, "template read task failed");
        Vec::new()
      });
      for (id, template) in read {
        self.cache.insert(id, template.clone()).await;
        templates.push(template);
      }
    }

    templates.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(templates = templates.len(), "loaded templates");
    Ok(Tribe::new(templates))
  }

  /// Build, quality-check and store templates for a batch of events.
  ///
  /// Per-event failures (no picks, fetch errors, no usable channels) are
  /// logged and the event skipped; the batch carries on.
  pub async fn make_templates(
    &self,
    events: &[Event],
    waveforms: &dyn WaveformSource,
    params: &TemplateConfig,
  ) -> Result<Tribe> {
    let mut templates = Vec::new();
    for event in events {
      if event.picks.is_empty() {
        warn!(id = %event.resource_id, "event has no picks, no template created");
        continue;
      }
      let bulk = download_windows(event, params.download_data_len);
      let raw = match waveforms.get_waveforms_bulk(&bulk).await {
        Ok(stream) => stream,
        Err(error) => {
          warn!(id = %event.resource_id, %error, "could not fetch waveforms");
          continue;
        }
      };
      if self.config.save_raw
        && let Err(error) = write_json_file(&self.raw_path(event), &serde_json::to_string(&raw)?)
      {
        warn!(id = %event.resource_id, %error, "could not save raw stream");
      }
      match build_template(event, &raw, params) {
        Ok(template) => templates.push(template),
        Err(error) => warn!(id = %event.resource_id, %error, "template construction failed"),
      }
    }
    let tribe = check_tribe_quality(Tribe::new(templates), None, self.config.min_stations);
    self.put_templates(&tribe).await?;
    info!(templates = tribe.len(), events = events.len(), "built templates");
    Ok(tribe)
  }
}

/// Fill `{year}`, `{month}`, `{day}` and `{event_id_end}` placeholders.
fn expand(structure: &str, event: &Event) -> String {
  let time = event_time(event);
  structure
    .replace("{year}", &format!("{:04}", time.year()))
    .replace("{month}", &format!("{:02}", time.month()))
    .replace("{day}", &format!("{:02}", time.day()))
    .replace("{event_id_end}", event.resource_id.tail())
}

/// Sibling file sharing the event's name: `x.json` -> `x{suffix}`.
fn companion_path(event_path: &Path, suffix: &str) -> PathBuf {
  let name = event_path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
  let stem = name.strip_suffix(".json").unwrap_or(name);
  event_path.with_file_name(format!("{stem}{suffix}"))
}

fn write_json_file(path: &Path, contents: &str) -> Result<()> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).map_err(|source| BankError::Io {
      path: parent.to_path_buf(),
      source,
    })?;
  }
  std::fs::write(path, contents).map_err(|source| BankError::Io {
    path: path.to_path_buf(),
    source,
  })
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
  let contents = std::fs::read_to_string(path).map_err(|source| BankError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  Ok(serde_json::from_str(&contents)?)
}
