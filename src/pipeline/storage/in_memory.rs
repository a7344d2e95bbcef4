use super::traits::CatalogRepository;
use crate::common::error::{PipelineError, Result};
use crate::domain::*;
use crate::pipeline::processing::dedupe::ClusterMergeOutcome;
use crate::pipeline::processing::title::normalize_title;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct CatalogState {
    venues: HashMap<String, Venue>,
    films: HashMap<Uuid, FilmRecord>,
    screenings: HashMap<Uuid, Screening>,
    /// Canonical keys of merged-away films, pointing at their survivor
    aliases: HashMap<String, Uuid>,
    scrapes: HashMap<String, DateTime<Utc>>,
    snapshots: Vec<HealthSnapshot>,
}

/// In-memory repository for development and tests.
///
/// All state sits behind one lock, so a cluster merge is atomic.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<CatalogState>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn screening_count(&self) -> usize {
        self.state().screenings.len()
    }

    pub fn film_count(&self) -> usize {
        self.state().films.len()
    }
}

fn sorted_screenings(mut screenings: Vec<Screening>) -> Vec<Screening> {
    screenings.sort_by(|a, b| a.datetime.cmp(&b.datetime).then_with(|| a.id.cmp(&b.id)));
    screenings
}

#[async_trait]
impl CatalogRepository for InMemoryRepository {
    async fn upsert_venue(&self, venue: &Venue) -> Result<()> {
        self.state().venues.insert(venue.id.clone(), venue.clone());
        Ok(())
    }

    async fn venue(&self, id: &str) -> Result<Option<Venue>> {
        Ok(self.state().venues.get(id).cloned())
    }

    async fn venues(&self) -> Result<Vec<Venue>> {
        let mut venues: Vec<Venue> = self.state().venues.values().cloned().collect();
        venues.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(venues)
    }

    async fn upsert_film(&self, film: &FilmRecord) -> Result<()> {
        self.state().films.insert(film.id, film.clone());
        debug!("Stored film: {} with id {}", film.title, film.id);
        Ok(())
    }

    async fn film(&self, id: Uuid) -> Result<Option<FilmRecord>> {
        Ok(self.state().films.get(&id).cloned())
    }

    async fn film_by_canonical_key(&self, canonical_key: &str) -> Result<Option<FilmRecord>> {
        let state = self.state();
        // Oldest first so repeated lookups agree with survivor selection
        let film = state
            .films
            .values()
            .filter(|f| f.canonical_key == canonical_key)
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .or_else(|| state.aliases.get(canonical_key).and_then(|id| state.films.get(id)))
            .cloned();
        Ok(film)
    }

    async fn films_by_title(&self, title: &str) -> Result<Vec<FilmRecord>> {
        let wanted = normalize_title(title);
        let mut films: Vec<FilmRecord> = self
            .state()
            .films
            .values()
            .filter(|f| normalize_title(&f.title) == wanted)
            .cloned()
            .collect();
        films.sort_by_key(|f| f.id);
        Ok(films)
    }

    async fn films_with_upcoming_screenings(&self, now: DateTime<Utc>) -> Result<Vec<FilmRecord>> {
        let state = self.state();
        let upcoming: HashSet<Uuid> = state
            .screenings
            .values()
            .filter(|s| s.datetime >= now)
            .map(|s| s.film_id)
            .collect();
        let mut films: Vec<FilmRecord> = upcoming.iter().filter_map(|id| state.films.get(id).cloned()).collect();
        films.sort_by_key(|f| f.id);
        Ok(films)
    }

    async fn delete_film(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state();
        if state.screenings.values().any(|s| s.film_id == id) {
            return Err(PipelineError::Api {
                message: format!("film {} still has screenings", id),
            });
        }
        state.aliases.retain(|_, target| *target != id);
        Ok(state.films.remove(&id).is_some())
    }

    async fn upsert_screening(&self, screening: &Screening) -> Result<Screening> {
        let mut state = self.state();
        let existing = state
            .screenings
            .values()
            .find(|s| {
                s.venue_id == screening.venue_id
                    && s.datetime == screening.datetime
                    && s.canonical_title == screening.canonical_title
            })
            .map(|s| s.id);

        let stored = Screening {
            id: existing.unwrap_or(screening.id),
            ..screening.clone()
        };
        state.screenings.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn screenings_for_venue(
        &self,
        venue_id: &str,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Screening>> {
        let screenings = self
            .state()
            .screenings
            .values()
            .filter(|s| s.venue_id == venue_id && s.datetime >= from && to.map_or(true, |to| s.datetime < to))
            .cloned()
            .collect();
        Ok(sorted_screenings(screenings))
    }

    async fn screenings_for_film(&self, film_id: Uuid) -> Result<Vec<Screening>> {
        let screenings = self
            .state()
            .screenings
            .values()
            .filter(|s| s.film_id == film_id)
            .cloned()
            .collect();
        Ok(sorted_screenings(screenings))
    }

    async fn screenings_for_festival(&self, festival_slug: &str) -> Result<Vec<Screening>> {
        let screenings = self
            .state()
            .screenings
            .values()
            .filter(|s| s.festival.as_ref().map_or(false, |t| t.festival_slug == festival_slug))
            .cloned()
            .collect();
        Ok(sorted_screenings(screenings))
    }

    async fn update_festival_tag(&self, screening_id: Uuid, tag: Option<&FestivalTag>) -> Result<()> {
        let mut state = self.state();
        let screening = state
            .screenings
            .get_mut(&screening_id)
            .ok_or_else(|| PipelineError::NotFound(format!("screening {}", screening_id)))?;
        screening.festival = tag.cloned();
        Ok(())
    }

    async fn merge_cluster(&self, survivor_id: Uuid, loser_ids: &[Uuid]) -> Result<ClusterMergeOutcome> {
        let mut state = self.state();
        if !state.films.contains_key(&survivor_id) {
            return Err(PipelineError::NotFound(format!("survivor film {}", survivor_id)));
        }

        let mut taken: HashSet<(String, DateTime<Utc>)> = state
            .screenings
            .values()
            .filter(|s| s.film_id == survivor_id)
            .map(|s| (s.venue_id.clone(), s.datetime))
            .collect();

        let losers: HashSet<Uuid> = loser_ids.iter().copied().filter(|id| *id != survivor_id).collect();
        let mut moving: Vec<Uuid> = state
            .screenings
            .values()
            .filter(|s| losers.contains(&s.film_id))
            .map(|s| s.id)
            .collect();
        moving.sort_by_key(|id| state.screenings.get(id).map(|s| (s.datetime, s.id)));

        let mut outcome = ClusterMergeOutcome::default();
        for id in moving {
            let Some(screening) = state.screenings.get(&id).cloned() else { continue };
            if taken.insert((screening.venue_id.clone(), screening.datetime)) {
                if let Some(s) = state.screenings.get_mut(&id) {
                    s.film_id = survivor_id;
                }
                outcome.screenings_migrated += 1;
            } else {
                state.screenings.remove(&id);
                outcome.screenings_dropped += 1;
            }
        }
        for target in state.aliases.values_mut() {
            if losers.contains(target) {
                *target = survivor_id;
            }
        }
        for loser in &losers {
            if let Some(film) = state.films.remove(loser) {
                state.aliases.insert(film.canonical_key, survivor_id);
                outcome.films_deleted += 1;
            }
        }
        Ok(outcome)
    }

    async fn record_scrape(&self, venue_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state();
        let entry = state.scrapes.entry(venue_id.to_string()).or_insert(at);
        if at > *entry {
            *entry = at;
        }
        Ok(())
    }

    async fn last_scrape_at(&self, venue_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state().scrapes.get(venue_id).copied())
    }

    async fn append_health_snapshot(&self, snapshot: &HealthSnapshot) -> Result<()> {
        self.state().snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn latest_snapshots(&self) -> Result<Vec<HealthSnapshot>> {
        let state = self.state();
        let mut latest: HashMap<&str, &HealthSnapshot> = HashMap::new();
        for snapshot in &state.snapshots {
            match latest.get(snapshot.venue_id.as_str()) {
                Some(current) if current.computed_at > snapshot.computed_at => {}
                _ => {
                    latest.insert(snapshot.venue_id.as_str(), snapshot);
                }
            }
        }
        let mut snapshots: Vec<HealthSnapshot> = latest.into_values().cloned().collect();
        snapshots.sort_by(|a, b| a.venue_id.cmp(&b.venue_id));
        Ok(snapshots)
    }

    async fn snapshot_before(&self, venue_id: &str, cutoff: DateTime<Utc>) -> Result<Option<HealthSnapshot>> {
        let state = self.state();
        let snapshot = state
            .snapshots
            .iter()
            .filter(|s| s.venue_id == venue_id && s.computed_at <= cutoff)
            .max_by_key(|s| s.computed_at)
            .cloned();
        Ok(snapshot)
    }
}
