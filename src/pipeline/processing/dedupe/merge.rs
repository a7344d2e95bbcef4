//! Survivor selection, the manual block-list and merge bookkeeping.

use std::cmp::Ordering;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::common::error::{PipelineError, Result};
use crate::domain::FilmRecord;

/// A pair of films an operator has said must never be merged.
///
/// Each side matches either a film id or an external catalog id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlockedPair {
    pub a: String,
    pub b: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MergeBlocklist {
    #[serde(default, rename = "blocked")]
    pub pairs: Vec<BlockedPair>,
}

impl MergeBlocklist {
    pub fn new(pairs: Vec<BlockedPair>) -> Self {
        Self { pairs }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load the block-list; a missing file means nothing is blocked
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let blocklist = Self::from_toml_str(&content)?;
        info!("Loaded {} blocked merge pair(s) from {}", blocklist.pairs.len(), path.display());
        Ok(blocklist)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn is_blocked(&self, left: &FilmRecord, right: &FilmRecord) -> bool {
        self.pairs.iter().any(|pair| {
            (identifies(&pair.a, left) && identifies(&pair.b, right))
                || (identifies(&pair.a, right) && identifies(&pair.b, left))
        })
    }
}

fn identifies(key: &str, film: &FilmRecord) -> bool {
    let key = key.trim();
    film.id.to_string().eq_ignore_ascii_case(key)
        || film
            .external_catalog_id
            .as_deref()
            .map(|ext| ext.eq_ignore_ascii_case(key))
            .unwrap_or(false)
}

/// Order films so the best survivor comes first: has an external id, has a
/// poster, has a synopsis, created earliest, then lowest id.
pub fn survivor_order(a: &FilmRecord, b: &FilmRecord) -> Ordering {
    b.external_catalog_id
        .is_some()
        .cmp(&a.external_catalog_id.is_some())
        .then_with(|| b.poster_url.is_some().cmp(&a.poster_url.is_some()))
        .then_with(|| b.synopsis.is_some().cmp(&a.synopsis.is_some()))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn choose_survivor(members: &[FilmRecord]) -> Option<&FilmRecord> {
    members.iter().min_by(|a, b| survivor_order(a, b))
}

/// What one cluster merge did to the catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClusterMergeOutcome {
    pub films_deleted: usize,
    pub screenings_migrated: usize,
    pub screenings_dropped: usize,
}

/// Audit summary of a merge run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub clusters_merged: usize,
    pub films_deleted: usize,
    pub screenings_migrated: usize,
    pub screenings_dropped: usize,
    /// Unions refused because of the block-list
    pub skipped_blocked: usize,
    /// Clusters whose merge failed and were left untouched
    pub failed_clusters: usize,
    pub blocked_pairs: Vec<(Uuid, Uuid)>,
}

impl MergeReport {
    pub fn absorb(&mut self, outcome: ClusterMergeOutcome) {
        self.clusters_merged += 1;
        self.films_deleted += outcome.films_deleted;
        self.screenings_migrated += outcome.screenings_migrated;
        self.screenings_dropped += outcome.screenings_dropped;
    }
}
