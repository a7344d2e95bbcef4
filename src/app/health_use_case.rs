use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::{HealthSnapshot, HealthStatus, Venue};
use crate::pipeline::processing::health::{dashboard_view, score_venue, sort_for_dashboard, DashboardView, HealthConfig, VenueHealthInput};
use crate::pipeline::storage::CatalogRepository;

/// Scores every active venue and keeps the snapshot history
pub struct HealthUseCase {
    repository: Arc<dyn CatalogRepository>,
    config: HealthConfig,
}

impl HealthUseCase {
    pub fn new(repository: Arc<dyn CatalogRepository>, config: HealthConfig) -> Self {
        Self { repository, config }
    }

    pub fn with_defaults(repository: Arc<dyn CatalogRepository>) -> Self {
        Self::new(repository, HealthConfig::default())
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Compute and persist a snapshot per active venue, most urgent first.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<Vec<HealthSnapshot>> {
        let venues: Vec<Venue> = self.repository.venues().await?.into_iter().filter(|v| v.active).collect();

        let mut future_by_venue: HashMap<String, Vec<DateTime<Utc>>> = HashMap::new();
        for venue in &venues {
            let times = self
                .repository
                .screenings_for_venue(&venue.id, now, None)
                .await?
                .into_iter()
                .map(|s| s.datetime)
                .collect();
            future_by_venue.insert(venue.id.clone(), times);
        }

        let cutoff = self.config.baseline_cutoff(now);
        let mut snapshots = Vec::with_capacity(venues.len());
        for venue in &venues {
            let peer_counts = match &venue.chain {
                Some(chain) => venues
                    .iter()
                    .filter(|other| other.id != venue.id && other.chain.as_deref() == Some(chain.as_str()))
                    .map(|other| future_by_venue.get(&other.id).map_or(0, |t| t.len() as u32))
                    .collect(),
                None => Vec::new(),
            };
            let input = VenueHealthInput {
                venue: venue.clone(),
                last_scrape_at: self.repository.last_scrape_at(&venue.id).await?,
                future_screenings: future_by_venue.remove(&venue.id).unwrap_or_default(),
                previous_future_count: self
                    .repository
                    .snapshot_before(&venue.id, cutoff)
                    .await?
                    .map(|s| s.future_screenings),
                peer_counts,
            };

            let snapshot = score_venue(&input, &self.config, now);
            self.repository.append_health_snapshot(&snapshot).await?;
            crate::observability::metrics::health::venue_scored(
                &snapshot.venue_id,
                snapshot.overall_score,
                snapshot.status.as_str(),
            );
            if snapshot.is_anomalous() {
                let reasons: Vec<&str> = snapshot.anomaly_reasons.iter().map(|r| r.as_str()).collect();
                for reason in &reasons {
                    crate::observability::metrics::health::anomaly_detected(reason);
                }
                warn!(
                    "Venue {} is {} ({:.1}): {}",
                    snapshot.venue_id,
                    snapshot.status.as_str(),
                    snapshot.overall_score,
                    reasons.join(", ")
                );
            }
            snapshots.push(snapshot);
        }

        sort_for_dashboard(&mut snapshots);
        let count = |status: HealthStatus| snapshots.iter().filter(|s| s.status == status).count();
        let (healthy, warning, critical) = (
            count(HealthStatus::Healthy),
            count(HealthStatus::Warning),
            count(HealthStatus::Critical),
        );
        crate::observability::metrics::health::run_completed(healthy, warning, critical);
        info!(
            "Health check over {} venue(s): {} healthy, {} warning, {} critical",
            snapshots.len(),
            healthy,
            warning,
            critical
        );
        Ok(snapshots)
    }

    /// Latest snapshot per venue, without recomputing anything
    pub async fn dashboard(&self) -> Result<DashboardView> {
        let snapshots = self.repository.latest_snapshots().await?;
        Ok(dashboard_view(snapshots, &self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnomalyReason, Classification, ExtractionMethod, Screening};
    use crate::pipeline::storage::InMemoryRepository;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn venue(id: &str, chain: &str) -> Venue {
        Venue {
            id: id.into(),
            name: id.to_uppercase(),
            chain: Some(chain.into()),
            active: true,
        }
    }

    async fn add_screenings(repo: &InMemoryRepository, venue_id: &str, count: usize) {
        for i in 0..count {
            let screening = Screening {
                id: Uuid::new_v4(),
                film_id: Uuid::from_u128(1),
                venue_id: venue_id.into(),
                datetime: now() + Duration::days(1 + (i / 4) as i64) + Duration::hours(6 + (i % 4) as i64),
                booking_url: None,
                source_id: format!("{}-{}", venue_id, i),
                raw_title: "Perfect Days".into(),
                extracted_title: "Perfect Days".into(),
                canonical_title: "Perfect Days".into(),
                classification: Classification::Normal,
                confidence: 1.0,
                extraction_method: ExtractionMethod::Passthrough,
                festival: None,
                scraped_at: now(),
            };
            repo.upsert_screening(&screening).await.unwrap();
        }
    }

    #[tokio::test]
    async fn scores_every_active_venue_and_persists() {
        let repo = InMemoryRepository::new();
        for id in ["a", "b", "c"] {
            repo.upsert_venue(&venue(id, "picturehouse")).await.unwrap();
            repo.record_scrape(id, now() - Duration::hours(1)).await.unwrap();
        }
        repo.upsert_venue(&Venue {
            active: false,
            ..venue("closed", "picturehouse")
        })
        .await
        .unwrap();
        add_screenings(&repo, "a", 40).await;
        add_screenings(&repo, "b", 44).await;
        add_screenings(&repo, "c", 3).await;

        let use_case = HealthUseCase::with_defaults(Arc::new(repo.clone()));
        let snapshots = use_case.run(now()).await.unwrap();

        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].venue_id, "c");
        assert!(snapshots[0].anomaly_reasons.contains(&AnomalyReason::LowVolume));
        assert!(!snapshots[1].is_anomalous());

        let view = use_case.dashboard().await.unwrap();
        assert_eq!(view.venues.len(), 3);
        assert_eq!(view.venues[0].venue_id, "c");
    }

    #[tokio::test]
    async fn never_scraped_venue_is_critical() {
        let repo = InMemoryRepository::new();
        repo.upsert_venue(&venue("a", "solo")).await.unwrap();

        let snapshots = HealthUseCase::with_defaults(Arc::new(repo)).run(now()).await.unwrap();
        assert_eq!(snapshots[0].status, HealthStatus::Critical);
        assert!(snapshots[0].anomaly_reasons.contains(&AnomalyReason::CriticalStale));
        assert!(snapshots[0].anomaly_reasons.contains(&AnomalyReason::ZeroScreenings));
    }
}
