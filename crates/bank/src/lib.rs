//! Event and template storage.
//!
//! A [`TemplateBank`] is a plain directory of JSON files with a queryable
//! index: catalog events go in, matched-filter templates are built beside
//! them, and detection runs pull tribes back out by region and time.

pub mod bank;
pub mod builder;
pub mod index;

pub use bank::{BankError, TemplateBank};
pub use builder::{FetchError, WaveformSource, build_template, download_windows};
pub use index::{BankIndex, EventQuery, IndexEntry};
