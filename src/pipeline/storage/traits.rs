use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::common::error::Result;
use crate::domain::{FestivalTag, FilmRecord, HealthSnapshot, Screening, Venue};
use crate::pipeline::processing::dedupe::ClusterMergeOutcome;

/// Persistence for the film catalog, screenings, scrape bookkeeping and
/// health history.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    // Venue registry
    async fn upsert_venue(&self, venue: &Venue) -> Result<()>;
    async fn venue(&self, id: &str) -> Result<Option<Venue>>;
    async fn venues(&self) -> Result<Vec<Venue>>;

    // Films
    async fn upsert_film(&self, film: &FilmRecord) -> Result<()>;
    async fn film(&self, id: Uuid) -> Result<Option<FilmRecord>>;
    /// The film stored under `canonical_key`, or the survivor a film with that
    /// key was merged into
    async fn film_by_canonical_key(&self, canonical_key: &str) -> Result<Option<FilmRecord>>;
    /// Films whose normalized title equals the normalized `title`
    async fn films_by_title(&self, title: &str) -> Result<Vec<FilmRecord>>;
    async fn films_with_upcoming_screenings(&self, now: DateTime<Utc>) -> Result<Vec<FilmRecord>>;
    /// Returns false when no such film existed
    async fn delete_film(&self, id: Uuid) -> Result<bool>;

    // Screenings
    /// Insert or update on (venue_id, datetime, canonical_title). An existing
    /// row keeps its id; the stored screening is returned.
    async fn upsert_screening(&self, screening: &Screening) -> Result<Screening>;
    /// Screenings at a venue with `from <= datetime`, and `datetime < to` when given
    async fn screenings_for_venue(
        &self,
        venue_id: &str,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Screening>>;
    async fn screenings_for_film(&self, film_id: Uuid) -> Result<Vec<Screening>>;
    async fn screenings_for_festival(&self, festival_slug: &str) -> Result<Vec<Screening>>;
    async fn update_festival_tag(&self, screening_id: Uuid, tag: Option<&FestivalTag>) -> Result<()>;

    /// Re-point every loser screening at the survivor, dropping any that would
    /// collide with a survivor screening at the same venue and time, then
    /// delete the losers. Each loser's canonical key becomes an alias of the
    /// survivor. All or nothing.
    async fn merge_cluster(&self, survivor_id: Uuid, loser_ids: &[Uuid]) -> Result<ClusterMergeOutcome>;

    // Scrape bookkeeping
    async fn record_scrape(&self, venue_id: &str, at: DateTime<Utc>) -> Result<()>;
    async fn last_scrape_at(&self, venue_id: &str) -> Result<Option<DateTime<Utc>>>;

    // Health history (append-only)
    async fn append_health_snapshot(&self, snapshot: &HealthSnapshot) -> Result<()>;
    /// The most recent snapshot of every venue
    async fn latest_snapshots(&self) -> Result<Vec<HealthSnapshot>>;
    /// The most recent snapshot of `venue_id` computed at or before `cutoff`
    async fn snapshot_before(&self, venue_id: &str, cutoff: DateTime<Utc>) -> Result<Option<HealthSnapshot>>;
}
