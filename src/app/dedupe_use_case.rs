use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::FilmRecord;
use crate::pipeline::processing::dedupe::{find_clusters, ClusterPlan, DedupeConfig, MergeBlocklist, MergeReport};
use crate::pipeline::storage::CatalogRepository;

/// Use case for finding and merging duplicate films
pub struct DedupeUseCase {
    repository: Arc<dyn CatalogRepository>,
    config: DedupeConfig,
    blocklist: MergeBlocklist,
}

impl DedupeUseCase {
    pub fn new(repository: Arc<dyn CatalogRepository>, config: DedupeConfig, blocklist: MergeBlocklist) -> Self {
        Self {
            repository,
            config,
            blocklist,
        }
    }

    /// Create a use case with default thresholds and an empty block-list
    pub fn with_defaults(repository: Arc<dyn CatalogRepository>) -> Self {
        Self::new(repository, DedupeConfig::default(), MergeBlocklist::default())
    }

    /// Periodic sweep over every film with upcoming screenings
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<MergeReport> {
        let films = self.repository.films_with_upcoming_screenings(now).await?;
        info!("Duplicate sweep over {} film(s) with upcoming screenings", films.len());
        let report = self.merge_among(&films).await;
        crate::observability::metrics::dedupe::sweep_completed();
        Ok(report)
    }

    /// Cheap check run when a film is written: only films sharing its title
    pub async fn merge_for_title(&self, title: &str) -> Result<MergeReport> {
        let films = self.repository.films_by_title(title).await?;
        if films.len() < 2 {
            return Ok(MergeReport::default());
        }
        Ok(self.merge_among(&films).await)
    }

    pub fn plan(&self, films: &[FilmRecord]) -> ClusterPlan {
        find_clusters(films, &self.config, &self.blocklist)
    }

    async fn merge_among(&self, films: &[FilmRecord]) -> MergeReport {
        let plan = self.plan(films);
        let mut report = MergeReport {
            skipped_blocked: plan.skipped_blocked.len(),
            blocked_pairs: plan.skipped_blocked.clone(),
            ..MergeReport::default()
        };
        for _ in &plan.skipped_blocked {
            crate::observability::metrics::dedupe::merge_blocked();
        }

        for cluster in &plan.clusters {
            let losers: Vec<Uuid> = cluster.losers().map(|f| f.id).collect();
            match self.repository.merge_cluster(cluster.survivor.id, &losers).await {
                Ok(outcome) => {
                    info!(
                        "Merged {} film(s) into '{}' ({}): {} screening(s) moved, {} dropped",
                        outcome.films_deleted,
                        cluster.survivor.title,
                        cluster.survivor.id,
                        outcome.screenings_migrated,
                        outcome.screenings_dropped
                    );
                    crate::observability::metrics::dedupe::cluster_merged(
                        outcome.films_deleted,
                        outcome.screenings_migrated,
                        outcome.screenings_dropped,
                    );
                    report.absorb(outcome);
                }
                Err(e) => {
                    warn!("Failed to merge cluster around '{}': {}", cluster.survivor.title, e);
                    crate::observability::metrics::dedupe::merge_failed();
                    report.failed_clusters += 1;
                }
            }
        }

        if report.clusters_merged > 0 || report.skipped_blocked > 0 || report.failed_clusters > 0 {
            info!(
                "Merge report: {} cluster(s), {} film(s) deleted, {} screening(s) migrated, {} dropped, {} blocked, {} failed",
                report.clusters_merged,
                report.films_deleted,
                report.screenings_migrated,
                report.screenings_dropped,
                report.skipped_blocked,
                report.failed_clusters
            );
        }
        report
    }
}
