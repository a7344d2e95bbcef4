use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// An unprocessed listing as produced by a venue scraper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawScreening {
    pub venue_id: String,
    pub raw_title: String,
    pub datetime: DateTime<Utc>,
    #[serde(default)]
    pub booking_url: Option<String>,
    pub source_id: String,
    /// Listing blurb, when the scraper captured one. Only used as extra context
    /// for the generative fallback.
    #[serde(default)]
    pub description: Option<String>,
}

/// How a listing should be treated downstream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Normal,
    /// Festival shorts programmes and similar bundles; excluded from film matching
    Compilation,
    /// Theatre, opera and ballet relays
    LiveBroadcast,
    /// Quizzes, book clubs, workshops. Never persisted as a film.
    NonFilm,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Normal => "normal",
            Classification::Compilation => "compilation",
            Classification::LiveBroadcast => "live_broadcast",
            Classification::NonFilm => "non_film",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "normal" => Some(Classification::Normal),
            "compilation" => Some(Classification::Compilation),
            "live_broadcast" => Some(Classification::LiveBroadcast),
            "non_film" => Some(Classification::NonFilm),
            _ => None,
        }
    }

    /// Whether records of this class take part in duplicate clustering.
    pub fn is_matchable(&self) -> bool {
        match self {
            Classification::Normal | Classification::LiveBroadcast => true,
            Classification::Compilation | Classification::NonFilm => false,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stage produced an extraction result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// No rule fired, the raw string was trusted as-is
    Passthrough,
    Pattern,
    Generative,
    /// The generative stage failed and the pattern cleanup was used at low confidence
    Degraded,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Passthrough => "passthrough",
            ExtractionMethod::Pattern => "pattern",
            ExtractionMethod::Generative => "generative",
            ExtractionMethod::Degraded => "degraded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "passthrough" => Some(ExtractionMethod::Passthrough),
            "pattern" => Some(ExtractionMethod::Pattern),
            "generative" => Some(ExtractionMethod::Generative),
            "degraded" => Some(ExtractionMethod::Degraded),
            _ => None,
        }
    }
}

/// Output of the title extraction stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionResult {
    /// Display-safe title (keeps version suffixes such as "Final Cut")
    pub extracted_title: String,
    /// Title used for matching, with any version suffix removed
    pub canonical_title: String,
    pub version: Option<String>,
    /// Release year recovered from a trailing "(YYYY)"
    pub year: Option<i32>,
    /// Event or series name stripped from the listing, if any
    pub event: Option<String>,
    pub classification: Classification,
    /// Always within [0, 1]; zero for non-film listings
    pub confidence: f64,
    pub method: ExtractionMethod,
}

impl ExtractionResult {
    pub fn non_film(raw_title: &str) -> Self {
        let title = raw_title.trim().to_string();
        Self {
            extracted_title: title.clone(),
            canonical_title: title,
            version: None,
            year: None,
            event: None,
            classification: Classification::NonFilm,
            confidence: 0.0,
            method: ExtractionMethod::Pattern,
        }
    }

    pub fn is_non_film(&self) -> bool {
        self.classification == Classification::NonFilm
    }
}

/// How a festival decides whether a screening at one of its venues belongs to it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceStrategy {
    /// Venue is exclusive to the festival during its window
    Auto,
    /// Venue also hosts regular programming, a keyword or URL signal is required
    Title,
}

/// A named section of a festival programme, recognised by title keywords.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FestivalSection {
    pub name: String,
    pub keywords: Vec<String>,
}

/// One edition of a festival, resolved to concrete dates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FestivalWindow {
    pub slug_base: String,
    pub year: i32,
    pub venues: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub strategy: ConfidenceStrategy,
    #[serde(default)]
    pub title_keywords: Vec<String>,
    #[serde(default)]
    pub url_patterns: Vec<String>,
    #[serde(default)]
    pub typical_months: Vec<u32>,
    #[serde(default)]
    pub sections: Vec<FestivalSection>,
}

impl FestivalWindow {
    pub fn slug(&self) -> String {
        format!("{}-{}", self.slug_base, self.year)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FestivalTag {
    pub festival_slug: String,
    pub festival_section: Option<String>,
}

/// A cinema known to the venue registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Venue {
    pub id: String,
    pub name: String,
    /// Operator chain, used to find peers for volume baselines
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilmRecord {
    pub id: Uuid,
    pub title: String,
    /// Deterministic hash of the normalized title and year
    pub canonical_key: String,
    pub year: Option<i32>,
    pub classification: Classification,
    pub external_catalog_id: Option<String>,
    pub poster_url: Option<String>,
    pub synopsis: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted screening. Extraction and festival fields are computed once at ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Screening {
    pub id: Uuid,
    pub film_id: Uuid,
    pub venue_id: String,
    pub datetime: DateTime<Utc>,
    pub booking_url: Option<String>,
    pub source_id: String,
    pub raw_title: String,
    pub extracted_title: String,
    pub canonical_title: String,
    pub classification: Classification,
    pub confidence: f64,
    pub extraction_method: ExtractionMethod,
    pub festival: Option<FestivalTag>,
    pub scraped_at: DateTime<Utc>,
}

/// Films judged to describe the same underlying film.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateCluster {
    pub survivor: FilmRecord,
    /// Every member including the survivor
    pub members: Vec<FilmRecord>,
}

impl DuplicateCluster {
    pub fn losers(&self) -> impl Iterator<Item = &FilmRecord> {
        let survivor_id = self.survivor.id;
        self.members.iter().filter(move |m| m.id != survivor_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyReason {
    CriticalStale,
    WarningStale,
    ZeroScreenings,
    LowVolume,
    SuddenDrop,
    ParseErrorSuspected,
}

impl AnomalyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyReason::CriticalStale => "CRITICAL_STALE",
            AnomalyReason::WarningStale => "WARNING_STALE",
            AnomalyReason::ZeroScreenings => "ZERO_SCREENINGS",
            AnomalyReason::LowVolume => "LOW_VOLUME",
            AnomalyReason::SuddenDrop => "SUDDEN_DROP",
            AnomalyReason::ParseErrorSuspected => "PARSE_ERROR_SUSPECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CRITICAL_STALE" => Some(AnomalyReason::CriticalStale),
            "WARNING_STALE" => Some(AnomalyReason::WarningStale),
            "ZERO_SCREENINGS" => Some(AnomalyReason::ZeroScreenings),
            "LOW_VOLUME" => Some(AnomalyReason::LowVolume),
            "SUDDEN_DROP" => Some(AnomalyReason::SuddenDrop),
            "PARSE_ERROR_SUSPECTED" => Some(AnomalyReason::ParseErrorSuspected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }
}

/// Per-venue scraper health at one point in time. Append-only; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSnapshot {
    pub venue_id: String,
    pub venue_name: String,
    pub chain: Option<String>,
    pub freshness_score: f64,
    pub volume_score: f64,
    pub overall_score: f64,
    pub status: HealthStatus,
    pub anomaly_reasons: Vec<AnomalyReason>,
    /// Future screenings counted for this run; becomes next week's baseline
    pub future_screenings: u32,
    pub hours_since_scrape: Option<f64>,
    pub computed_at: DateTime<Utc>,
}

impl HealthSnapshot {
    pub fn is_anomalous(&self) -> bool {
        !self.anomaly_reasons.is_empty()
    }
}
