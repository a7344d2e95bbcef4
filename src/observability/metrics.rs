//! Prometheus metrics for the listing pipeline.
//!
//! Every series is named through [`MetricName`] so the dashboard generator
//! and the recording functions below cannot drift apart.

pub mod dashboard;

use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::info;

use self::dashboard::MetricType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    Heartbeat,

    // Title extraction
    ExtractionTitlesExtracted,
    ExtractionConfidence,

    // Generative fallback
    FallbackGenerationRequests,
    FallbackGenerationSuccess,
    FallbackGenerationDegraded,
    FallbackRateLimited,
    FallbackRetriesScheduled,
    FallbackCacheHits,
    FallbackCacheMisses,
    FallbackBatchSize,

    // Festival tagging
    FestivalScreeningsTagged,
    FestivalScreeningsUntagged,

    // Duplicate merging
    DedupeSweeps,
    DedupeClustersMerged,
    DedupeFilmsDeleted,
    DedupeScreeningsMigrated,
    DedupeScreeningsDropped,
    DedupeMergesBlocked,
    DedupeMergesFailed,

    // Source health
    HealthVenueScore,
    HealthAnomalies,
    HealthRuns,
    HealthVenuesByStatus,

    // Ingest
    IngestListingsReceived,
    IngestScreeningsPersisted,
    IngestNonFilm,
    IngestUnknownVenue,
    IngestFilmsCreated,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Heartbeat => "cinema_heartbeat_total",

            MetricName::ExtractionTitlesExtracted => "cinema_extraction_titles_extracted_total",
            MetricName::ExtractionConfidence => "cinema_extraction_confidence",

            MetricName::FallbackGenerationRequests => "cinema_fallback_generation_requests_total",
            MetricName::FallbackGenerationSuccess => "cinema_fallback_generation_success_total",
            MetricName::FallbackGenerationDegraded => "cinema_fallback_generation_degraded_total",
            MetricName::FallbackRateLimited => "cinema_fallback_rate_limited_total",
            MetricName::FallbackRetriesScheduled => "cinema_fallback_retries_scheduled_total",
            MetricName::FallbackCacheHits => "cinema_fallback_cache_hits_total",
            MetricName::FallbackCacheMisses => "cinema_fallback_cache_misses_total",
            MetricName::FallbackBatchSize => "cinema_fallback_batch_size",

            MetricName::FestivalScreeningsTagged => "cinema_festival_screenings_tagged_total",
            MetricName::FestivalScreeningsUntagged => "cinema_festival_screenings_untagged_total",

            MetricName::DedupeSweeps => "cinema_dedupe_sweeps_total",
            MetricName::DedupeClustersMerged => "cinema_dedupe_clusters_merged_total",
            MetricName::DedupeFilmsDeleted => "cinema_dedupe_films_deleted_total",
            MetricName::DedupeScreeningsMigrated => "cinema_dedupe_screenings_migrated_total",
            MetricName::DedupeScreeningsDropped => "cinema_dedupe_screenings_dropped_total",
            MetricName::DedupeMergesBlocked => "cinema_dedupe_merges_blocked_total",
            MetricName::DedupeMergesFailed => "cinema_dedupe_merges_failed_total",

            MetricName::HealthVenueScore => "cinema_health_venue_score",
            MetricName::HealthAnomalies => "cinema_health_anomalies_total",
            MetricName::HealthRuns => "cinema_health_runs_total",
            MetricName::HealthVenuesByStatus => "cinema_health_venues",

            MetricName::IngestListingsReceived => "cinema_ingest_listings_received_total",
            MetricName::IngestScreeningsPersisted => "cinema_ingest_screenings_persisted_total",
            MetricName::IngestNonFilm => "cinema_ingest_non_film_total",
            MetricName::IngestUnknownVenue => "cinema_ingest_unknown_venue_total",
            MetricName::IngestFilmsCreated => "cinema_ingest_films_created_total",
        }
    }

    /// Every metric, in dashboard order
    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            Heartbeat,
            ExtractionTitlesExtracted,
            ExtractionConfidence,
            FallbackGenerationRequests,
            FallbackGenerationSuccess,
            FallbackGenerationDegraded,
            FallbackRateLimited,
            FallbackRetriesScheduled,
            FallbackCacheHits,
            FallbackCacheMisses,
            FallbackBatchSize,
            FestivalScreeningsTagged,
            FestivalScreeningsUntagged,
            DedupeSweeps,
            DedupeClustersMerged,
            DedupeFilmsDeleted,
            DedupeScreeningsMigrated,
            DedupeScreeningsDropped,
            DedupeMergesBlocked,
            DedupeMergesFailed,
            HealthVenueScore,
            HealthAnomalies,
            HealthRuns,
            HealthVenuesByStatus,
            IngestListingsReceived,
            IngestScreeningsPersisted,
            IngestNonFilm,
            IngestUnknownVenue,
            IngestFilmsCreated,
        ]
        .into_iter()
    }

    /// (phase, description, unit) for dashboard generation
    pub fn metadata(&self) -> (&'static str, &'static str, Option<&'static str>) {
        match self {
            MetricName::Heartbeat => ("system", "Heartbeat counter", None),

            MetricName::ExtractionTitlesExtracted => ("extraction", "Titles extracted", None),
            MetricName::ExtractionConfidence => ("extraction", "Extraction confidence", None),

            MetricName::FallbackGenerationRequests => ("fallback", "Generation requests", None),
            MetricName::FallbackGenerationSuccess => ("fallback", "Generated titles accepted", None),
            MetricName::FallbackGenerationDegraded => ("fallback", "Generations degraded to pattern result", None),
            MetricName::FallbackRateLimited => ("fallback", "Rate-limited generation calls", None),
            MetricName::FallbackRetriesScheduled => ("fallback", "Generation retries scheduled", None),
            MetricName::FallbackCacheHits => ("fallback", "Extraction cache hits", None),
            MetricName::FallbackCacheMisses => ("fallback", "Extraction cache misses", None),
            MetricName::FallbackBatchSize => ("fallback", "Titles per extraction batch", None),

            MetricName::FestivalScreeningsTagged => ("festival", "Screenings tagged with a festival", None),
            MetricName::FestivalScreeningsUntagged => ("festival", "Screenings outside any festival", None),

            MetricName::DedupeSweeps => ("dedupe", "Duplicate sweeps run", None),
            MetricName::DedupeClustersMerged => ("dedupe", "Duplicate clusters merged", None),
            MetricName::DedupeFilmsDeleted => ("dedupe", "Duplicate films deleted", None),
            MetricName::DedupeScreeningsMigrated => ("dedupe", "Screenings moved to a survivor", None),
            MetricName::DedupeScreeningsDropped => ("dedupe", "Colliding screenings dropped", None),
            MetricName::DedupeMergesBlocked => ("dedupe", "Merges refused by the blocklist", None),
            MetricName::DedupeMergesFailed => ("dedupe", "Cluster merges that failed", None),

            MetricName::HealthVenueScore => ("health", "Overall venue health score", None),
            MetricName::HealthAnomalies => ("health", "Venue anomalies detected", None),
            MetricName::HealthRuns => ("health", "Health checks run", None),
            MetricName::HealthVenuesByStatus => ("health", "Venues per health status", None),

            MetricName::IngestListingsReceived => ("ingest", "Listings received", None),
            MetricName::IngestScreeningsPersisted => ("ingest", "Screenings stored", None),
            MetricName::IngestNonFilm => ("ingest", "Non-film listings skipped", None),
            MetricName::IngestUnknownVenue => ("ingest", "Listings for unknown venues", None),
            MetricName::IngestFilmsCreated => ("ingest", "New films created", None),
        }
    }

    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricName::ExtractionConfidence | MetricName::FallbackBatchSize => MetricType::Histogram,
            MetricName::HealthVenueScore | MetricName::HealthVenuesByStatus => MetricType::Gauge,
            _ => MetricType::Counter,
        }
    }
}

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the global Prometheus recorder. Calling it twice is harmless.
pub fn init() -> Result<()> {
    if PROMETHEUS.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow!("Failed to install Prometheus recorder: {}", e))?;
    let _ = PROMETHEUS.set(handle);
    info!("Metrics recorder installed");
    Ok(())
}

/// Current metrics in Prometheus text format, if the recorder is installed
pub fn render() -> Option<String> {
    PROMETHEUS.get().map(|handle| handle.render())
}

/// How often long-running commands report they are alive
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

pub fn heartbeat() {
    ::metrics::counter!(MetricName::Heartbeat.as_str()).increment(1);
}

/// Bump the heartbeat every `period` until the runtime shuts down.
pub fn spawn_heartbeat(period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            heartbeat();
        }
    })
}

pub mod extraction {
    use super::MetricName;

    pub fn title_extracted(method: &str, classification: &str, confidence: f64) {
        ::metrics::counter!(
            MetricName::ExtractionTitlesExtracted.as_str(),
            "method" => method.to_string(),
            "classification" => classification.to_string()
        )
        .increment(1);
        ::metrics::histogram!(MetricName::ExtractionConfidence.as_str(), "method" => method.to_string())
            .record(confidence);
    }
}

pub mod fallback {
    use super::MetricName;

    pub fn generation_requested() {
        ::metrics::counter!(MetricName::FallbackGenerationRequests.as_str()).increment(1);
    }

    pub fn generation_succeeded() {
        ::metrics::counter!(MetricName::FallbackGenerationSuccess.as_str()).increment(1);
    }

    pub fn generation_degraded(cause: &str) {
        ::metrics::counter!(MetricName::FallbackGenerationDegraded.as_str(), "cause" => cause.to_string())
            .increment(1);
    }

    pub fn rate_limited() {
        ::metrics::counter!(MetricName::FallbackRateLimited.as_str()).increment(1);
    }

    pub fn retry_scheduled() {
        ::metrics::counter!(MetricName::FallbackRetriesScheduled.as_str()).increment(1);
    }

    pub fn cache_hit() {
        ::metrics::counter!(MetricName::FallbackCacheHits.as_str()).increment(1);
    }

    pub fn cache_miss() {
        ::metrics::counter!(MetricName::FallbackCacheMisses.as_str()).increment(1);
    }

    pub fn batch_processed(clean: usize, generated: usize, degraded: usize, cached: usize) {
        let total = clean + generated + degraded + cached;
        ::metrics::histogram!(MetricName::FallbackBatchSize.as_str()).record(total as f64);
    }
}

pub mod festival {
    use super::MetricName;

    pub fn screening_tagged(festival_slug: &str) {
        ::metrics::counter!(
            MetricName::FestivalScreeningsTagged.as_str(),
            "festival" => festival_slug.to_string()
        )
        .increment(1);
    }

    pub fn screening_untagged() {
        ::metrics::counter!(MetricName::FestivalScreeningsUntagged.as_str()).increment(1);
    }
}

pub mod dedupe {
    use super::MetricName;

    pub fn sweep_completed() {
        ::metrics::counter!(MetricName::DedupeSweeps.as_str()).increment(1);
    }

    pub fn cluster_merged(films_deleted: usize, screenings_migrated: usize, screenings_dropped: usize) {
        ::metrics::counter!(MetricName::DedupeClustersMerged.as_str()).increment(1);
        ::metrics::counter!(MetricName::DedupeFilmsDeleted.as_str()).increment(films_deleted as u64);
        ::metrics::counter!(MetricName::DedupeScreeningsMigrated.as_str()).increment(screenings_migrated as u64);
        ::metrics::counter!(MetricName::DedupeScreeningsDropped.as_str()).increment(screenings_dropped as u64);
    }

    pub fn merge_blocked() {
        ::metrics::counter!(MetricName::DedupeMergesBlocked.as_str()).increment(1);
    }

    pub fn merge_failed() {
        ::metrics::counter!(MetricName::DedupeMergesFailed.as_str()).increment(1);
    }
}

pub mod health {
    use super::MetricName;

    pub fn venue_scored(venue_id: &str, score: f64, status: &str) {
        ::metrics::gauge!(
            MetricName::HealthVenueScore.as_str(),
            "venue" => venue_id.to_string(),
            "status" => status.to_string()
        )
        .set(score);
    }

    pub fn anomaly_detected(reason: &str) {
        ::metrics::counter!(MetricName::HealthAnomalies.as_str(), "reason" => reason.to_string()).increment(1);
    }

    pub fn run_completed(healthy: usize, warning: usize, critical: usize) {
        ::metrics::counter!(MetricName::HealthRuns.as_str()).increment(1);
        for (status, count) in [("healthy", healthy), ("warning", warning), ("critical", critical)] {
            ::metrics::gauge!(MetricName::HealthVenuesByStatus.as_str(), "status" => status).set(count as f64);
        }
    }
}

pub mod ingest {
    use super::MetricName;

    pub fn batch_processed(received: usize, persisted: usize, non_film: usize) {
        ::metrics::counter!(MetricName::IngestListingsReceived.as_str()).increment(received as u64);
        ::metrics::counter!(MetricName::IngestScreeningsPersisted.as_str()).increment(persisted as u64);
        ::metrics::counter!(MetricName::IngestNonFilm.as_str()).increment(non_film as u64);
    }

    pub fn unknown_venue() {
        ::metrics::counter!(MetricName::IngestUnknownVenue.as_str()).increment(1);
    }

    pub fn film_created() {
        ::metrics::counter!(MetricName::IngestFilmsCreated.as_str()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn metric_names_are_unique_and_prefixed() {
        let names: Vec<&str> = MetricName::all_metrics().map(|m| m.as_str()).collect();
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(names.len(), unique.len());
        assert!(names.iter().all(|n| n.starts_with("cinema_")));
    }

    #[test]
    fn counters_end_in_total() {
        for metric in MetricName::all_metrics() {
            if metric.metric_type() == MetricType::Counter {
                assert!(metric.as_str().ends_with("_total"), "{}", metric);
            }
        }
    }

    #[test]
    fn heartbeat_reaches_the_prometheus_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        ::metrics::with_local_recorder(&recorder, || {
            heartbeat();
            heartbeat();
        });
        assert!(handle.render().contains("cinema_heartbeat_total 2"));
    }

    #[tokio::test]
    async fn spawned_heartbeat_ticks_until_aborted() {
        let task = spawn_heartbeat(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        task.abort();
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        fallback::cache_hit();
        health::anomaly_detected("SUDDEN_DROP");
        ingest::batch_processed(3, 2, 1);
    }
}
