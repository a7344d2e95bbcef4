use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use cinema_pipeline::app::health_use_case::HealthUseCase;
use cinema_pipeline::domain::{
    AnomalyReason, Classification, ExtractionMethod, HealthSnapshot, HealthStatus, Screening, Venue,
};
use cinema_pipeline::pipeline::processing::health::HealthConfig;
use cinema_pipeline::pipeline::storage::{CatalogRepository, InMemoryRepository};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 20, 12, 0, 0).unwrap()
}

fn venue(id: &str) -> Venue {
    Venue {
        id: id.to_string(),
        name: id.to_string(),
        chain: Some("picturehouse".to_string()),
        active: true,
    }
}

async fn add_evening_screenings(repo: &InMemoryRepository, venue_id: &str, count: usize) -> Result<()> {
    for i in 0..count {
        repo.upsert_screening(&Screening {
            id: Uuid::new_v4(),
            film_id: Uuid::from_u128(7),
            venue_id: venue_id.to_string(),
            datetime: now() + Duration::days(1 + (i / 4) as i64) + Duration::hours(6 + (i % 4) as i64),
            booking_url: None,
            source_id: format!("{}-{}", venue_id, i),
            raw_title: "Past Lives".to_string(),
            extracted_title: "Past Lives".to_string(),
            canonical_title: "Past Lives".to_string(),
            classification: Classification::Normal,
            confidence: 1.0,
            extraction_method: ExtractionMethod::Passthrough,
            festival: None,
            scraped_at: now(),
        })
        .await?;
    }
    Ok(())
}

fn history(venue_id: &str, days_ago: i64, future_screenings: u32) -> HealthSnapshot {
    HealthSnapshot {
        venue_id: venue_id.to_string(),
        venue_name: venue_id.to_string(),
        chain: Some("picturehouse".to_string()),
        freshness_score: 100.0,
        volume_score: 100.0,
        overall_score: 100.0,
        status: HealthStatus::Healthy,
        anomaly_reasons: vec![],
        future_screenings,
        hours_since_scrape: Some(1.0),
        computed_at: now() - Duration::days(days_ago),
    }
}

async fn seeded() -> Result<InMemoryRepository> {
    let repo = InMemoryRepository::new();
    for (id, count) in [("target", 2), ("peer-a", 40), ("peer-b", 60)] {
        repo.upsert_venue(&venue(id)).await?;
        add_evening_screenings(&repo, id, count).await?;
    }
    repo.record_scrape("target", now() - Duration::hours(40)).await?;
    repo.record_scrape("peer-a", now() - Duration::hours(1)).await?;
    repo.record_scrape("peer-b", now() - Duration::hours(1)).await?;

    // Week-old baseline, plus a newer snapshot too recent to count as one
    repo.append_health_snapshot(&history("target", 7, 50)).await?;
    repo.append_health_snapshot(&history("target", 1, 3)).await?;
    Ok(repo)
}

#[tokio::test]
async fn stale_collapsing_venue_is_critical_with_every_reason() -> Result<()> {
    let repo = seeded().await?;
    let use_case = HealthUseCase::new(Arc::new(repo.clone()), HealthConfig::default());

    let snapshots = use_case.run(now()).await?;

    let target = &snapshots[0];
    assert_eq!(target.venue_id, "target");
    assert_eq!(target.status, HealthStatus::Critical);
    assert_eq!(
        target.anomaly_reasons,
        vec![AnomalyReason::WarningStale, AnomalyReason::LowVolume, AnomalyReason::SuddenDrop]
    );
    assert_eq!(target.future_screenings, 2);
    assert_eq!(target.hours_since_scrape, Some(40.0));
    assert!(target.overall_score < 50.0);

    for peer in &snapshots[1..] {
        assert_eq!(peer.status, HealthStatus::Healthy, "{}", peer.venue_id);
        assert!(peer.anomaly_reasons.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn dashboard_reads_latest_snapshots() -> Result<()> {
    let repo = seeded().await?;
    let use_case = HealthUseCase::new(Arc::new(repo.clone()), HealthConfig::default());
    use_case.run(now()).await?;

    let view = use_case.dashboard().await?;

    assert_eq!(view.venues.len(), 3);
    assert_eq!(view.critical, 1);
    assert_eq!(view.healthy, 2);
    assert_eq!(view.venues[0].venue_id, "target");
    assert_eq!(view.venues[0].computed_at, now());
    assert_eq!(view.thresholds.critical_stale_hours, 48.0);
    Ok(())
}

#[tokio::test]
async fn without_a_week_old_baseline_no_drop_is_reported() -> Result<()> {
    let repo = InMemoryRepository::new();
    repo.upsert_venue(&Venue {
        chain: None,
        ..venue("solo")
    })
    .await?;
    add_evening_screenings(&repo, "solo", 2).await?;
    repo.record_scrape("solo", now()).await?;
    repo.append_health_snapshot(&history("solo", 2, 50)).await?;

    let snapshots = HealthUseCase::new(Arc::new(repo), HealthConfig::default()).run(now()).await?;

    assert!(snapshots[0].anomaly_reasons.is_empty());
    assert_eq!(snapshots[0].status, HealthStatus::Healthy);
    Ok(())
}
