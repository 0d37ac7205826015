//! JSON file sink
//!
//! Writes each task's offers to `{name}_{YYYYmmdd_HHMMSS}.json` in a
//! directory.

use crate::model::FlightOffer;
use crate::output::offers_to_json;
use crate::storage::traits::{OfferSink, StorageResult};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};

/// Offer sink writing one JSON file per task
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    /// Creates the sink, creating `dir` if needed
    pub fn new(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A path that does not exist yet; a numeric suffix is added when the
    /// same name was already written within the same second
    fn file_path(&self, name: &str) -> PathBuf {
        let base = format!(
            "{}_{}",
            sanitize_file_stem(name),
            Local::now().format("%Y%m%d_%H%M%S")
        );
        let mut path = self.dir.join(format!("{}.json", base));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}_{}.json", base, n));
            n += 1;
        }
        path
    }
}

/// Replaces characters that are unsafe in file names with `_`
fn sanitize_file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if stem.is_empty() {
        "offers".to_string()
    } else {
        stem
    }
}

impl OfferSink for JsonFileSink {
    fn name(&self) -> &str {
        "json"
    }

    fn save_offers(&mut self, offers: &[FlightOffer], name: &str) -> StorageResult<usize> {
        let path = self.file_path(name);
        fs::write(&path, offers_to_json(offers)?)?;
        tracing::info!("Wrote {} offers to {}", offers.len(), path.display());
        Ok(offers.len())
    }
}
