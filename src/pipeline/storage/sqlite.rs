//! SQLite-backed catalog. Timestamps are stored as UTC epoch milliseconds.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::traits::CatalogRepository;
use crate::common::error::{PipelineError, Result};
use crate::domain::*;
use crate::pipeline::processing::dedupe::ClusterMergeOutcome;
use crate::pipeline::processing::title::normalize_title;

const SCHEMA: &str = r#"
    PRAGMA foreign_keys=ON;
    CREATE TABLE IF NOT EXISTS venues (
        id      TEXT PRIMARY KEY,
        name    TEXT NOT NULL,
        chain   TEXT,
        active  INTEGER NOT NULL DEFAULT 1
    );
    CREATE TABLE IF NOT EXISTS films (
        id                   TEXT PRIMARY KEY,
        title                TEXT NOT NULL,
        normalized_title     TEXT NOT NULL,
        canonical_key        TEXT NOT NULL,
        year                 INTEGER,
        classification       TEXT NOT NULL,
        external_catalog_id  TEXT,
        poster_url           TEXT,
        synopsis             TEXT,
        created_at           INTEGER NOT NULL,
        updated_at           INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS films_canonical_key ON films (canonical_key);
    CREATE INDEX IF NOT EXISTS films_normalized_title ON films (normalized_title);
    CREATE TABLE IF NOT EXISTS film_aliases (
        canonical_key  TEXT PRIMARY KEY,
        film_id        TEXT NOT NULL REFERENCES films (id)
    );
    CREATE TABLE IF NOT EXISTS screenings (
        id                 TEXT PRIMARY KEY,
        film_id            TEXT NOT NULL REFERENCES films (id),
        venue_id           TEXT NOT NULL,
        datetime           INTEGER NOT NULL,
        booking_url        TEXT,
        source_id          TEXT NOT NULL,
        raw_title          TEXT NOT NULL,
        extracted_title    TEXT NOT NULL,
        canonical_title    TEXT NOT NULL,
        classification     TEXT NOT NULL,
        confidence         REAL NOT NULL,
        extraction_method  TEXT NOT NULL,
        festival_slug      TEXT,
        festival_section   TEXT,
        scraped_at         INTEGER NOT NULL,
        UNIQUE (venue_id, datetime, canonical_title)
    );
    CREATE INDEX IF NOT EXISTS screenings_film ON screenings (film_id);
    CREATE INDEX IF NOT EXISTS screenings_festival ON screenings (festival_slug);
    CREATE TABLE IF NOT EXISTS scrape_runs (
        venue_id        TEXT PRIMARY KEY,
        last_scrape_at  INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS health_snapshots (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        venue_id            TEXT NOT NULL,
        venue_name          TEXT NOT NULL,
        chain               TEXT,
        freshness_score     REAL NOT NULL,
        volume_score        REAL NOT NULL,
        overall_score       REAL NOT NULL,
        status              TEXT NOT NULL,
        anomaly_reasons     TEXT NOT NULL,
        future_screenings   INTEGER NOT NULL,
        hours_since_scrape  REAL,
        computed_at         INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS health_snapshots_venue ON health_snapshots (venue_id, computed_at);
"#;

const FILM_COLUMNS: &str = "id, title, canonical_key, year, classification, external_catalog_id, poster_url, synopsis, created_at, updated_at";
const SCREENING_COLUMNS: &str = "id, film_id, venue_id, datetime, booking_url, source_id, raw_title, extracted_title, canonical_title, classification, confidence, extraction_method, festival_slug, festival_section, scraped_at";
const SNAPSHOT_COLUMNS: &str = "venue_id, venue_name, chain, freshness_score, volume_score, overall_score, status, anomaly_reasons, future_screenings, hours_since_scrape, computed_at";

pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!("Opened catalog database at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn millis_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| conversion_error(idx, format!("timestamp out of range: {}", ms)))
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn classification_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Classification> {
    let raw: String = row.get(idx)?;
    Classification::parse(&raw).ok_or_else(|| conversion_error(idx, format!("unknown classification {}", raw)))
}

fn film_from_row(row: &Row<'_>) -> rusqlite::Result<FilmRecord> {
    Ok(FilmRecord {
        id: uuid_at(row, 0)?,
        title: row.get(1)?,
        canonical_key: row.get(2)?,
        year: row.get(3)?,
        classification: classification_at(row, 4)?,
        external_catalog_id: row.get(5)?,
        poster_url: row.get(6)?,
        synopsis: row.get(7)?,
        created_at: millis_at(row, 8)?,
        updated_at: millis_at(row, 9)?,
    })
}

fn screening_from_row(row: &Row<'_>) -> rusqlite::Result<Screening> {
    let method: String = row.get(11)?;
    let festival_slug: Option<String> = row.get(12)?;
    let festival_section: Option<String> = row.get(13)?;
    Ok(Screening {
        id: uuid_at(row, 0)?,
        film_id: uuid_at(row, 1)?,
        venue_id: row.get(2)?,
        datetime: millis_at(row, 3)?,
        booking_url: row.get(4)?,
        source_id: row.get(5)?,
        raw_title: row.get(6)?,
        extracted_title: row.get(7)?,
        canonical_title: row.get(8)?,
        classification: classification_at(row, 9)?,
        confidence: row.get(10)?,
        extraction_method: ExtractionMethod::parse(&method)
            .ok_or_else(|| conversion_error(11, format!("unknown extraction method {}", method)))?,
        festival: festival_slug.map(|festival_slug| FestivalTag {
            festival_slug,
            festival_section,
        }),
        scraped_at: millis_at(row, 14)?,
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<HealthSnapshot> {
    let status: String = row.get(6)?;
    let reasons: String = row.get(7)?;
    let future: i64 = row.get(8)?;
    Ok(HealthSnapshot {
        venue_id: row.get(0)?,
        venue_name: row.get(1)?,
        chain: row.get(2)?,
        freshness_score: row.get(3)?,
        volume_score: row.get(4)?,
        overall_score: row.get(5)?,
        status: match status.as_str() {
            "healthy" => HealthStatus::Healthy,
            "warning" => HealthStatus::Warning,
            "critical" => HealthStatus::Critical,
            other => return Err(conversion_error(6, format!("unknown status {}", other))),
        },
        anomaly_reasons: reasons
            .split(',')
            .filter(|r| !r.is_empty())
            .map(|r| AnomalyReason::parse(r).ok_or_else(|| conversion_error(7, format!("unknown reason {}", r))))
            .collect::<rusqlite::Result<Vec<_>>>()?,
        future_screenings: future.max(0) as u32,
        hours_since_scrape: row.get(9)?,
        computed_at: millis_at(row, 10)?,
    })
}

fn venue_from_row(row: &Row<'_>) -> rusqlite::Result<Venue> {
    let active: i64 = row.get(3)?;
    Ok(Venue {
        id: row.get(0)?,
        name: row.get(1)?,
        chain: row.get(2)?,
        active: active != 0,
    })
}

#[async_trait]
impl CatalogRepository for SqliteRepository {
    async fn upsert_venue(&self, venue: &Venue) -> Result<()> {
        self.conn().execute(
            "INSERT INTO venues (id, name, chain, active) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name=excluded.name, chain=excluded.chain, active=excluded.active",
            params![venue.id, venue.name, venue.chain, venue.active as i64],
        )?;
        Ok(())
    }

    async fn venue(&self, id: &str) -> Result<Option<Venue>> {
        let conn = self.conn();
        let venue = conn
            .query_row(
                "SELECT id, name, chain, active FROM venues WHERE id = ?1",
                params![id],
                venue_from_row,
            )
            .optional()?;
        Ok(venue)
    }

    async fn venues(&self) -> Result<Vec<Venue>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, name, chain, active FROM venues ORDER BY id")?;
        let venues = stmt.query_map([], venue_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(venues)
    }

    async fn upsert_film(&self, film: &FilmRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO films (id, title, normalized_title, canonical_key, year, classification,
                                external_catalog_id, poster_url, synopsis, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                title=excluded.title, normalized_title=excluded.normalized_title,
                canonical_key=excluded.canonical_key, year=excluded.year,
                classification=excluded.classification, external_catalog_id=excluded.external_catalog_id,
                poster_url=excluded.poster_url, synopsis=excluded.synopsis, updated_at=excluded.updated_at",
            params![
                film.id.to_string(),
                film.title,
                normalize_title(&film.title),
                film.canonical_key,
                film.year,
                film.classification.as_str(),
                film.external_catalog_id,
                film.poster_url,
                film.synopsis,
                to_millis(film.created_at),
                to_millis(film.updated_at),
            ],
        )?;
        debug!("Stored film: {} with id {}", film.title, film.id);
        Ok(())
    }

    async fn film(&self, id: Uuid) -> Result<Option<FilmRecord>> {
        let conn = self.conn();
        let film = conn
            .query_row(
                &format!("SELECT {} FROM films WHERE id = ?1", FILM_COLUMNS),
                params![id.to_string()],
                film_from_row,
            )
            .optional()?;
        Ok(film)
    }

    async fn film_by_canonical_key(&self, canonical_key: &str) -> Result<Option<FilmRecord>> {
        let conn = self.conn();
        let film = conn
            .query_row(
                &format!(
                    "SELECT {} FROM films WHERE canonical_key = ?1 ORDER BY created_at, id LIMIT 1",
                    FILM_COLUMNS
                ),
                params![canonical_key],
                film_from_row,
            )
            .optional()?;
        if film.is_some() {
            return Ok(film);
        }
        let merged_into = conn
            .query_row(
                &format!(
                    "SELECT {} FROM films WHERE id = (SELECT film_id FROM film_aliases WHERE canonical_key = ?1)",
                    FILM_COLUMNS
                ),
                params![canonical_key],
                film_from_row,
            )
            .optional()?;
        Ok(merged_into)
    }

    async fn films_by_title(&self, title: &str) -> Result<Vec<FilmRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM films WHERE normalized_title = ?1 ORDER BY id",
            FILM_COLUMNS
        ))?;
        let films = stmt
            .query_map(params![normalize_title(title)], film_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(films)
    }

    async fn films_with_upcoming_screenings(&self, now: DateTime<Utc>) -> Result<Vec<FilmRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM films WHERE id IN (SELECT DISTINCT film_id FROM screenings WHERE datetime >= ?1) ORDER BY id",
            FILM_COLUMNS
        ))?;
        let films = stmt
            .query_map(params![to_millis(now)], film_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(films)
    }

    async fn delete_film(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn();
        let remaining: i64 = conn.query_row(
            "SELECT COUNT(*) FROM screenings WHERE film_id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        if remaining > 0 {
            return Err(PipelineError::Api {
                message: format!("film {} still has {} screening(s)", id, remaining),
            });
        }
        conn.execute("DELETE FROM film_aliases WHERE film_id = ?1", params![id.to_string()])?;
        let deleted = conn.execute("DELETE FROM films WHERE id = ?1", params![id.to_string()])?;
        Ok(deleted > 0)
    }

    async fn upsert_screening(&self, screening: &Screening) -> Result<Screening> {
        let conn = self.conn();
        let (slug, section) = match &screening.festival {
            Some(tag) => (Some(tag.festival_slug.as_str()), tag.festival_section.as_deref()),
            None => (None, None),
        };
        conn.execute(
            "INSERT INTO screenings (id, film_id, venue_id, datetime, booking_url, source_id, raw_title,
                                     extracted_title, canonical_title, classification, confidence,
                                     extraction_method, festival_slug, festival_section, scraped_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(venue_id, datetime, canonical_title) DO UPDATE SET
                film_id=excluded.film_id, booking_url=excluded.booking_url, source_id=excluded.source_id,
                raw_title=excluded.raw_title, extracted_title=excluded.extracted_title,
                classification=excluded.classification, confidence=excluded.confidence,
                extraction_method=excluded.extraction_method, festival_slug=excluded.festival_slug,
                festival_section=excluded.festival_section, scraped_at=excluded.scraped_at",
            params![
                screening.id.to_string(),
                screening.film_id.to_string(),
                screening.venue_id,
                to_millis(screening.datetime),
                screening.booking_url,
                screening.source_id,
                screening.raw_title,
                screening.extracted_title,
                screening.canonical_title,
                screening.classification.as_str(),
                screening.confidence,
                screening.extraction_method.as_str(),
                slug,
                section,
                to_millis(screening.scraped_at),
            ],
        )?;
        let stored = conn.query_row(
            &format!(
                "SELECT {} FROM screenings WHERE venue_id = ?1 AND datetime = ?2 AND canonical_title = ?3",
                SCREENING_COLUMNS
            ),
            params![screening.venue_id, to_millis(screening.datetime), screening.canonical_title],
            screening_from_row,
        )?;
        Ok(stored)
    }

    async fn screenings_for_venue(
        &self,
        venue_id: &str,
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Screening>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM screenings
             WHERE venue_id = ?1 AND datetime >= ?2 AND (?3 IS NULL OR datetime < ?3)
             ORDER BY datetime, id",
            SCREENING_COLUMNS
        ))?;
        let screenings = stmt
            .query_map(params![venue_id, to_millis(from), to.map(to_millis)], screening_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(screenings)
    }

    async fn screenings_for_film(&self, film_id: Uuid) -> Result<Vec<Screening>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM screenings WHERE film_id = ?1 ORDER BY datetime, id",
            SCREENING_COLUMNS
        ))?;
        let screenings = stmt
            .query_map(params![film_id.to_string()], screening_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(screenings)
    }

    async fn screenings_for_festival(&self, festival_slug: &str) -> Result<Vec<Screening>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM screenings WHERE festival_slug = ?1 ORDER BY datetime, id",
            SCREENING_COLUMNS
        ))?;
        let screenings = stmt
            .query_map(params![festival_slug], screening_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(screenings)
    }

    async fn update_festival_tag(&self, screening_id: Uuid, tag: Option<&FestivalTag>) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE screenings SET festival_slug = ?2, festival_section = ?3 WHERE id = ?1",
            params![
                screening_id.to_string(),
                tag.map(|t| t.festival_slug.as_str()),
                tag.and_then(|t| t.festival_section.as_deref()),
            ],
        )?;
        if updated == 0 {
            return Err(PipelineError::NotFound(format!("screening {}", screening_id)));
        }
        Ok(())
    }

    async fn merge_cluster(&self, survivor_id: Uuid, loser_ids: &[Uuid]) -> Result<ClusterMergeOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let survivor = survivor_id.to_string();

        let exists: i64 = tx.query_row("SELECT COUNT(*) FROM films WHERE id = ?1", params![survivor], |row| {
            row.get(0)
        })?;
        if exists == 0 {
            return Err(PipelineError::NotFound(format!("survivor film {}", survivor_id)));
        }

        let mut outcome = ClusterMergeOutcome::default();
        for loser in loser_ids.iter().filter(|id| **id != survivor_id) {
            let loser = loser.to_string();
            // Loser screenings at a slot the survivor already occupies are duplicates
            outcome.screenings_dropped += tx.execute(
                "DELETE FROM screenings
                 WHERE film_id = ?1
                   AND EXISTS (SELECT 1 FROM screenings s
                               WHERE s.film_id = ?2
                                 AND s.venue_id = screenings.venue_id
                                 AND s.datetime = screenings.datetime)",
                params![loser, survivor],
            )?;
            // Two losers can share a slot; keep the earliest row per slot
            outcome.screenings_dropped += tx.execute(
                "DELETE FROM screenings
                 WHERE film_id = ?1
                   AND EXISTS (SELECT 1 FROM screenings s
                               WHERE s.film_id = ?1
                                 AND s.venue_id = screenings.venue_id
                                 AND s.datetime = screenings.datetime
                                 AND s.id < screenings.id)",
                params![loser],
            )?;
            outcome.screenings_migrated += tx.execute(
                "UPDATE screenings SET film_id = ?2 WHERE film_id = ?1",
                params![loser, survivor],
            )?;
            tx.execute(
                "UPDATE film_aliases SET film_id = ?2 WHERE film_id = ?1",
                params![loser, survivor],
            )?;
            tx.execute(
                "INSERT INTO film_aliases (canonical_key, film_id)
                 SELECT canonical_key, ?2 FROM films WHERE id = ?1
                 ON CONFLICT(canonical_key) DO UPDATE SET film_id=excluded.film_id",
                params![loser, survivor],
            )?;
            outcome.films_deleted += tx.execute("DELETE FROM films WHERE id = ?1", params![loser])?;
        }
        tx.commit()?;
        Ok(outcome)
    }

    async fn record_scrape(&self, venue_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO scrape_runs (venue_id, last_scrape_at) VALUES (?1, ?2)
             ON CONFLICT(venue_id) DO UPDATE SET last_scrape_at=MAX(last_scrape_at, excluded.last_scrape_at)",
            params![venue_id, to_millis(at)],
        )?;
        Ok(())
    }

    async fn last_scrape_at(&self, venue_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn();
        let at = conn
            .query_row(
                "SELECT last_scrape_at FROM scrape_runs WHERE venue_id = ?1",
                params![venue_id],
                |row| millis_at(row, 0),
            )
            .optional()?;
        Ok(at)
    }

    async fn append_health_snapshot(&self, snapshot: &HealthSnapshot) -> Result<()> {
        let reasons: Vec<&str> = snapshot.anomaly_reasons.iter().map(|r| r.as_str()).collect();
        self.conn().execute(
            &format!(
                "INSERT INTO health_snapshots ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                SNAPSHOT_COLUMNS
            ),
            params![
                snapshot.venue_id,
                snapshot.venue_name,
                snapshot.chain,
                snapshot.freshness_score,
                snapshot.volume_score,
                snapshot.overall_score,
                snapshot.status.as_str(),
                reasons.join(","),
                snapshot.future_screenings as i64,
                snapshot.hours_since_scrape,
                to_millis(snapshot.computed_at),
            ],
        )?;
        Ok(())
    }

    async fn latest_snapshots(&self) -> Result<Vec<HealthSnapshot>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM health_snapshots h
             WHERE h.id = (SELECT id FROM health_snapshots l
                           WHERE l.venue_id = h.venue_id
                           ORDER BY l.computed_at DESC, l.id DESC LIMIT 1)
             ORDER BY h.venue_id",
            SNAPSHOT_COLUMNS
        ))?;
        let snapshots = stmt
            .query_map([], snapshot_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    async fn snapshot_before(&self, venue_id: &str, cutoff: DateTime<Utc>) -> Result<Option<HealthSnapshot>> {
        let conn = self.conn();
        let snapshot = conn
            .query_row(
                &format!(
                    "SELECT {} FROM health_snapshots
                     WHERE venue_id = ?1 AND computed_at <= ?2
                     ORDER BY computed_at DESC, id DESC LIMIT 1",
                    SNAPSHOT_COLUMNS
                ),
                params![venue_id, to_millis(cutoff)],
                snapshot_from_row,
            )
            .optional()?;
        Ok(snapshot)
    }
}
