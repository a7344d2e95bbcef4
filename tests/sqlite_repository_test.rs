use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::tempdir;
use uuid::Uuid;

use cinema_pipeline::domain::{
    AnomalyReason, Classification, ExtractionMethod, FestivalTag, FilmRecord, HealthSnapshot, HealthStatus, Screening,
    Venue,
};
use cinema_pipeline::pipeline::processing::title::canonical_key;
use cinema_pipeline::pipeline::storage::{CatalogRepository, SqliteRepository};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 20, 9, 30, 0).unwrap()
}

fn film() -> FilmRecord {
    FilmRecord {
        id: Uuid::from_u128(42),
        title: "Possession".to_string(),
        canonical_key: canonical_key("Possession", Some(1981)),
        year: Some(1981),
        classification: Classification::Normal,
        external_catalog_id: Some("tmdb:21484".to_string()),
        poster_url: None,
        synopsis: Some("A spy comes home to a marriage falling apart.".to_string()),
        created_at: now(),
        updated_at: now(),
    }
}

fn screening(id: u128, hours_ahead: i64) -> Screening {
    Screening {
        id: Uuid::from_u128(id),
        film_id: film().id,
        venue_id: "prince-charles-cinema".to_string(),
        datetime: now() + Duration::hours(hours_ahead),
        booking_url: Some("https://princecharlescinema.com/frightfest/possession".to_string()),
        source_id: format!("pcc-{}", id),
        raw_title: "FrightFest: Possession".to_string(),
        extracted_title: "Possession".to_string(),
        canonical_title: "Possession".to_string(),
        classification: Classification::Normal,
        confidence: 0.9,
        extraction_method: ExtractionMethod::Pattern,
        festival: None,
        scraped_at: now(),
    }
}

fn snapshot(venue_id: &str, computed_at: DateTime<Utc>, status: HealthStatus) -> HealthSnapshot {
    HealthSnapshot {
        venue_id: venue_id.to_string(),
        venue_name: "Prince Charles Cinema".to_string(),
        chain: None,
        freshness_score: 70.0,
        volume_score: 40.0,
        overall_score: 58.0,
        status,
        anomaly_reasons: vec![AnomalyReason::WarningStale, AnomalyReason::SuddenDrop],
        future_screenings: 12,
        hours_since_scrape: Some(24.0),
        computed_at,
    }
}

#[tokio::test]
async fn catalog_survives_reopening() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db").join("cinema.db");

    {
        let repo = SqliteRepository::open(&path)?;
        repo.upsert_venue(&Venue {
            id: "prince-charles-cinema".to_string(),
            name: "Prince Charles Cinema".to_string(),
            chain: None,
            active: true,
        })
        .await?;
        repo.upsert_film(&film()).await?;
        repo.upsert_screening(&screening(1, 24)).await?;
        repo.record_scrape("prince-charles-cinema", now()).await?;
    }

    let repo = SqliteRepository::open(&path)?;
    assert_eq!(repo.venues().await?.len(), 1);
    assert_eq!(repo.film(film().id).await?, Some(film()));
    assert_eq!(
        repo.film_by_canonical_key(&film().canonical_key).await?.map(|f| f.id),
        Some(film().id)
    );
    assert_eq!(repo.films_by_title("POSSESSION").await?.len(), 1);
    assert_eq!(repo.screenings_for_film(film().id).await?, vec![screening(1, 24)]);
    assert_eq!(repo.last_scrape_at("prince-charles-cinema").await?, Some(now()));
    Ok(())
}

#[tokio::test]
async fn screenings_upsert_on_venue_time_and_title() -> Result<()> {
    let repo = SqliteRepository::open_in_memory()?;
    repo.upsert_film(&film()).await?;

    let first = repo.upsert_screening(&screening(1, 24)).await?;
    let mut rescraped = screening(2, 24);
    rescraped.confidence = 0.95;
    let second = repo.upsert_screening(&rescraped).await?;

    assert_eq!(first.id, second.id);
    assert_eq!(second.confidence, 0.95);
    assert_eq!(repo.screenings_for_film(film().id).await?.len(), 1);

    let upcoming = repo
        .screenings_for_venue("prince-charles-cinema", now(), Some(now() + Duration::hours(12)))
        .await?;
    assert!(upcoming.is_empty());
    assert_eq!(repo.films_with_upcoming_screenings(now()).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn festival_tags_can_be_set_and_cleared() -> Result<()> {
    let repo = SqliteRepository::open_in_memory()?;
    repo.upsert_film(&film()).await?;
    let stored = repo.upsert_screening(&screening(1, 24)).await?;
    let tag = FestivalTag {
        festival_slug: "frightfest-2026".to_string(),
        festival_section: Some("First Blood".to_string()),
    };

    repo.update_festival_tag(stored.id, Some(&tag)).await?;
    let tagged = repo.screenings_for_festival("frightfest-2026").await?;
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].festival, Some(tag));

    repo.update_festival_tag(stored.id, None).await?;
    assert!(repo.screenings_for_festival("frightfest-2026").await?.is_empty());
    assert!(repo.update_festival_tag(Uuid::from_u128(999), None).await.is_err());
    Ok(())
}

#[tokio::test]
async fn films_with_screenings_cannot_be_deleted() -> Result<()> {
    let repo = SqliteRepository::open_in_memory()?;
    repo.upsert_film(&film()).await?;
    repo.upsert_screening(&screening(1, 24)).await?;
    assert!(repo.delete_film(film().id).await.is_err());

    let mut other = film();
    other.id = Uuid::from_u128(43);
    repo.upsert_film(&other).await?;
    assert!(repo.delete_film(other.id).await?);
    assert!(!repo.delete_film(other.id).await?);
    Ok(())
}

#[tokio::test]
async fn merge_moves_screenings_and_drops_collisions() -> Result<()> {
    let repo = SqliteRepository::open_in_memory()?;
    let survivor = film();
    let mut loser = film();
    loser.id = Uuid::from_u128(7);
    loser.title = "POSSESSION".to_string();
    repo.upsert_film(&survivor).await?;
    repo.upsert_film(&loser).await?;

    repo.upsert_screening(&screening(1, 24)).await?;
    let mut collision = screening(2, 24);
    collision.film_id = loser.id;
    collision.canonical_title = "POSSESSION".to_string();
    repo.upsert_screening(&collision).await?;
    let mut moved = screening(3, 48);
    moved.film_id = loser.id;
    repo.upsert_screening(&moved).await?;

    let outcome = repo.merge_cluster(survivor.id, &[loser.id]).await?;

    assert_eq!(outcome.films_deleted, 1);
    assert_eq!(outcome.screenings_dropped, 1);
    assert_eq!(outcome.screenings_migrated, 1);
    assert!(repo.film(loser.id).await?.is_none());
    assert_eq!(repo.screenings_for_film(survivor.id).await?.len(), 2);
    assert!(repo.merge_cluster(Uuid::from_u128(1000), &[survivor.id]).await.is_err());
    Ok(())
}

#[tokio::test]
async fn snapshot_history_queries() -> Result<()> {
    let repo = SqliteRepository::open_in_memory()?;
    let week_ago = now() - Duration::days(7);
    repo.append_health_snapshot(&snapshot("prince-charles-cinema", week_ago, HealthStatus::Healthy)).await?;
    repo.append_health_snapshot(&snapshot("prince-charles-cinema", now(), HealthStatus::Warning)).await?;
    repo.append_health_snapshot(&snapshot("rio-cinema", now(), HealthStatus::Critical)).await?;

    let latest = repo.latest_snapshots().await?;
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].venue_id, "prince-charles-cinema");
    assert_eq!(latest[0].status, HealthStatus::Warning);
    assert_eq!(
        latest[0].anomaly_reasons,
        vec![AnomalyReason::WarningStale, AnomalyReason::SuddenDrop]
    );

    let baseline = repo
        .snapshot_before("prince-charles-cinema", now() - Duration::days(6))
        .await?
        .unwrap();
    assert_eq!(baseline.computed_at, week_ago);
    assert_eq!(baseline.status, HealthStatus::Healthy);
    assert!(repo.snapshot_before("rio-cinema", now() - Duration::days(6)).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn merged_keys_resolve_to_the_survivor() -> Result<()> {
    let repo = SqliteRepository::open_in_memory()?;
    let restored = film();
    let mut undated = film();
    undated.id = Uuid::from_u128(7);
    undated.year = None;
    undated.canonical_key = canonical_key("Possession", None);
    let mut typo = film();
    typo.id = Uuid::from_u128(8);
    typo.title = "Posession".to_string();
    typo.canonical_key = canonical_key("Posession", Some(1981));
    for f in [&restored, &undated, &typo] {
        repo.upsert_film(f).await?;
    }

    repo.merge_cluster(undated.id, &[typo.id]).await?;
    let resolved = repo.film_by_canonical_key(&typo.canonical_key).await?;
    assert_eq!(resolved.map(|f| f.id), Some(undated.id));

    // A later merge carries earlier aliases along
    repo.merge_cluster(restored.id, &[undated.id]).await?;
    for key in [&typo.canonical_key, &undated.canonical_key, &restored.canonical_key] {
        assert_eq!(repo.film_by_canonical_key(key).await?.map(|f| f.id), Some(restored.id));
    }
    assert!(repo.film_by_canonical_key(&canonical_key("Heat", None)).await?.is_none());
    Ok(())
}
