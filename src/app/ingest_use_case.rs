use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::dedupe_use_case::DedupeUseCase;
use crate::domain::{ExtractionResult, FilmRecord, RawScreening, Screening, Venue};
use crate::pipeline::processing::dedupe::MergeReport;
use crate::pipeline::processing::fallback::{BatchSummary, GenerativeExtractor, TitleRequest};
use crate::pipeline::processing::festival::FestivalTagger;
use crate::pipeline::processing::title::{self, canonical_key};
use crate::pipeline::storage::CatalogRepository;

/// Counts for one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub received: usize,
    pub persisted: usize,
    pub non_film: usize,
    pub skipped_unknown_venue: usize,
    pub failed: usize,
    pub festival_tagged: usize,
    pub films_created: usize,
    pub extraction: BatchSummary,
    pub merge: MergeReport,
}

/// Use case for turning scraped listings into catalog screenings
pub struct IngestUseCase {
    repository: Arc<dyn CatalogRepository>,
    tagger: Arc<FestivalTagger>,
    extractor: Option<GenerativeExtractor>,
    dedupe: Option<Arc<DedupeUseCase>>,
}

impl IngestUseCase {
    pub fn new(repository: Arc<dyn CatalogRepository>, tagger: Arc<FestivalTagger>) -> Self {
        Self {
            repository,
            tagger,
            extractor: None,
            dedupe: None,
        }
    }

    /// Send unclean titles to the generative stage
    pub fn with_extractor(mut self, extractor: GenerativeExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Check for duplicates of every newly created film
    pub fn with_dedupe(mut self, dedupe: Arc<DedupeUseCase>) -> Self {
        self.dedupe = Some(dedupe);
        self
    }

    /// Ingest one scrape batch. Listings at unknown venues are skipped, and
    /// non-film listings are never stored.
    pub async fn ingest_batch(&self, listings: &[RawScreening], now: DateTime<Utc>) -> Result<IngestReport> {
        let mut report = IngestReport {
            received: listings.len(),
            ..IngestReport::default()
        };

        let venues = self.known_venues(listings).await?;
        let accepted: Vec<&RawScreening> = listings
            .iter()
            .filter(|raw| {
                let known = venues.contains_key(raw.venue_id.as_str());
                if !known {
                    warn!("Skipping '{}': unknown venue '{}'", raw.raw_title, raw.venue_id);
                    crate::observability::metrics::ingest::unknown_venue();
                }
                known
            })
            .collect();
        report.skipped_unknown_venue = listings.len() - accepted.len();

        let (extractions, summary) = self.extract_titles(&accepted).await;
        report.extraction = summary;

        let mut new_titles = BTreeSet::new();
        for (raw, extraction) in accepted.iter().zip(extractions) {
            crate::observability::metrics::extraction::title_extracted(
                extraction.method.as_str(),
                extraction.classification.as_str(),
                extraction.confidence,
            );
            if extraction.is_non_film() {
                debug!("Not a film, skipping: '{}'", raw.raw_title);
                report.non_film += 1;
                continue;
            }
            match self.persist(raw, &extraction, now).await {
                Ok(persisted) => {
                    report.persisted += 1;
                    if persisted.tagged {
                        report.festival_tagged += 1;
                    }
                    if let Some(title) = persisted.created_film {
                        report.films_created += 1;
                        new_titles.insert(title);
                    }
                }
                Err(e) => {
                    warn!("Failed to store screening '{}' at {}: {}", raw.raw_title, raw.venue_id, e);
                    report.failed += 1;
                }
            }
        }

        let scraped: BTreeSet<&str> = accepted.iter().map(|raw| raw.venue_id.as_str()).collect();
        for venue_id in scraped {
            self.repository.record_scrape(venue_id, now).await?;
        }

        if let Some(dedupe) = &self.dedupe {
            for title in &new_titles {
                match dedupe.merge_for_title(title).await {
                    Ok(merged) => accumulate(&mut report.merge, merged),
                    Err(e) => warn!("Duplicate check for '{}' failed: {}", title, e),
                }
            }
        }

        crate::observability::metrics::ingest::batch_processed(
            report.received,
            report.persisted,
            report.non_film,
        );
        info!(
            "Ingested {} listing(s): {} stored, {} non-film, {} unknown venue, {} failed, {} festival-tagged, {} new film(s)",
            report.received,
            report.persisted,
            report.non_film,
            report.skipped_unknown_venue,
            report.failed,
            report.festival_tagged,
            report.films_created
        );
        Ok(report)
    }

    async fn known_venues(&self, listings: &[RawScreening]) -> Result<HashMap<String, Venue>> {
        let ids: BTreeSet<&str> = listings.iter().map(|raw| raw.venue_id.as_str()).collect();
        let mut venues = HashMap::new();
        for id in ids {
            if let Some(venue) = self.repository.venue(id).await? {
                venues.insert(id.to_string(), venue);
            }
        }
        Ok(venues)
    }

    async fn extract_titles(&self, listings: &[&RawScreening]) -> (Vec<ExtractionResult>, BatchSummary) {
        match &self.extractor {
            Some(extractor) => {
                let requests: Vec<TitleRequest> = listings
                    .iter()
                    .map(|raw| TitleRequest {
                        raw_title: raw.raw_title.clone(),
                        description: raw.description.clone(),
                    })
                    .collect();
                let batch = extractor.extract_batch(&requests).await;
                (batch.results, batch.summary)
            }
            None => {
                let results: Vec<ExtractionResult> = listings.iter().map(|raw| title::extract(&raw.raw_title)).collect();
                let summary = BatchSummary {
                    clean: results.len(),
                    ..BatchSummary::default()
                };
                (results, summary)
            }
        }
    }

    async fn persist(&self, raw: &RawScreening, extraction: &ExtractionResult, now: DateTime<Utc>) -> Result<Persisted> {
        let key = canonical_key(&extraction.canonical_title, extraction.year);
        let (film, created_film) = match self.repository.film_by_canonical_key(&key).await? {
            Some(film) => (film, None),
            None => {
                let film = FilmRecord {
                    id: Uuid::new_v4(),
                    title: extraction.canonical_title.clone(),
                    canonical_key: key,
                    year: extraction.year,
                    classification: extraction.classification,
                    external_catalog_id: None,
                    poster_url: None,
                    synopsis: None,
                    created_at: now,
                    updated_at: now,
                };
                self.repository.upsert_film(&film).await?;
                crate::observability::metrics::ingest::film_created();
                let title = film.title.clone();
                (film, Some(title))
            }
        };

        let festival = self
            .tagger
            .detect(&raw.venue_id, &raw.raw_title, raw.datetime, raw.booking_url.as_deref());
        let tagged = festival.is_some();

        // A merge may have dropped this listing in favour of the survivor's
        // screening in the same slot under another title
        let slot = self
            .repository
            .screenings_for_venue(&raw.venue_id, raw.datetime, Some(raw.datetime + Duration::milliseconds(1)))
            .await?;
        if slot
            .iter()
            .any(|s| s.film_id == film.id && s.canonical_title != extraction.canonical_title)
        {
            debug!(
                "'{}' at {} is already stored for merged film {}",
                raw.raw_title, raw.venue_id, film.id
            );
            return Ok(Persisted { tagged, created_film });
        }

        let screening = Screening {
            id: Uuid::new_v4(),
            film_id: film.id,
            venue_id: raw.venue_id.clone(),
            datetime: raw.datetime,
            booking_url: raw.booking_url.clone(),
            source_id: raw.source_id.clone(),
            raw_title: raw.raw_title.clone(),
            extracted_title: extraction.extracted_title.clone(),
            canonical_title: extraction.canonical_title.clone(),
            classification: extraction.classification,
            confidence: extraction.confidence,
            extraction_method: extraction.method,
            festival,
            scraped_at: now,
        };
        self.repository.upsert_screening(&screening).await?;

        Ok(Persisted { tagged, created_film })
    }
}

struct Persisted {
    tagged: bool,
    created_film: Option<String>,
}

fn accumulate(total: &mut MergeReport, run: MergeReport) {
    total.clusters_merged += run.clusters_merged;
    total.films_deleted += run.films_deleted;
    total.screenings_migrated += run.screenings_migrated;
    total.screenings_dropped += run.screenings_dropped;
    total.skipped_blocked += run.skipped_blocked;
    total.failed_clusters += run.failed_clusters;
    total.blocked_pairs.extend(run.blocked_pairs);
}
