//! Festival tagging for screenings.
//!
//! The tagger holds an explicit cache of resolved festival windows. With an
//! empty cache it tags nothing.

pub mod config;

use std::sync::RwLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::common::constants::FESTIVAL_GRACE_DAYS;
use crate::domain::{ConfidenceStrategy, FestivalTag, FestivalWindow};

pub use config::{validate_windows, FestivalRegistry};

#[derive(Debug, Default)]
pub struct FestivalTagger {
    windows: RwLock<Vec<FestivalWindow>>,
}

impl FestivalTagger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tagger with `windows` already loaded
    pub fn with_windows(windows: Vec<FestivalWindow>) -> Self {
        let tagger = Self::new();
        tagger.preload(windows);
        tagger
    }

    /// Replace the cached windows. They are kept sorted by start date then
    /// slug so that the first match is deterministic.
    pub fn preload(&self, mut windows: Vec<FestivalWindow>) {
        windows.sort_by(|a, b| a.start_date.cmp(&b.start_date).then_with(|| a.slug().cmp(&b.slug())));
        for overlap in config::find_overlaps(&windows) {
            warn!("Overlapping festival windows, earliest wins: {}", overlap);
        }
        info!("Festival tagger loaded {} window(s)", windows.len());
        *self.windows.write().unwrap_or_else(|e| e.into_inner()) = windows;
    }

    pub fn clear_cache(&self) {
        self.windows.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn is_loaded(&self) -> bool {
        !self.windows.read().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    pub fn window_count(&self) -> usize {
        self.windows.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Find the festival a screening belongs to, if any.
    pub fn detect(
        &self,
        venue_id: &str,
        title: &str,
        datetime: DateTime<Utc>,
        booking_url: Option<&str>,
    ) -> Option<FestivalTag> {
        let windows = self.windows.read().unwrap_or_else(|e| e.into_inner());
        if windows.is_empty() {
            return None;
        }
        let tag = windows
            .iter()
            .find(|window| matches_window(window, venue_id, title, datetime, booking_url))
            .map(|window| FestivalTag {
                festival_slug: window.slug(),
                festival_section: detect_section(window, title),
            });
        match &tag {
            Some(tag) => {
                debug!("Tagged '{}' at {} as {}", title, venue_id, tag.festival_slug);
                crate::observability::metrics::festival::screening_tagged(&tag.festival_slug);
            }
            None => crate::observability::metrics::festival::screening_untagged(),
        }
        tag
    }

    /// Like [`detect`](Self::detect) but only against the festival with `slug`
    pub fn detect_for(
        &self,
        slug: &str,
        venue_id: &str,
        title: &str,
        datetime: DateTime<Utc>,
        booking_url: Option<&str>,
    ) -> Option<FestivalTag> {
        let windows = self.windows.read().unwrap_or_else(|e| e.into_inner());
        windows
            .iter()
            .filter(|window| window.slug() == slug)
            .find(|window| matches_window(window, venue_id, title, datetime, booking_url))
            .map(|window| FestivalTag {
                festival_slug: window.slug(),
                festival_section: detect_section(window, title),
            })
    }

    /// First opening and last closing date of the festival with `slug`
    pub fn dates_for(&self, slug: &str) -> Option<(NaiveDate, NaiveDate)> {
        let windows = self.windows.read().unwrap_or_else(|e| e.into_inner());
        windows
            .iter()
            .filter(|window| window.slug() == slug)
            .fold(None, |acc, window| match acc {
                None => Some((window.start_date, window.end_date)),
                Some((start, end)) => Some((start.min(window.start_date), end.max(window.end_date))),
            })
    }

    /// Venues covered by the festival with `slug`
    pub fn venues_for(&self, slug: &str) -> Vec<String> {
        let windows = self.windows.read().unwrap_or_else(|e| e.into_inner());
        windows
            .iter()
            .filter(|window| window.slug() == slug)
            .flat_map(|window| window.venues.iter().cloned())
            .collect()
    }
}

fn matches_window(
    window: &FestivalWindow,
    venue_id: &str,
    title: &str,
    datetime: DateTime<Utc>,
    booking_url: Option<&str>,
) -> bool {
    if !window.venues.iter().any(|v| v == venue_id) {
        return false;
    }
    let date = datetime.date_naive();
    let opens = window.start_date - Duration::days(FESTIVAL_GRACE_DAYS);
    if date < opens || date > window.end_date {
        return false;
    }
    match window.strategy {
        ConfidenceStrategy::Auto => true,
        ConfidenceStrategy::Title => has_keyword(title, &window.title_keywords) || has_url_pattern(booking_url, &window.url_patterns),
    }
}

fn has_keyword(title: &str, keywords: &[String]) -> bool {
    let lowered = title.to_lowercase();
    keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .any(|k| lowered.contains(&k.to_lowercase()))
}

fn has_url_pattern(booking_url: Option<&str>, patterns: &[String]) -> bool {
    let Some(url) = booking_url else { return false };
    let lowered = url.to_lowercase();
    patterns
        .iter()
        .filter(|p| !p.trim().is_empty())
        .any(|p| lowered.contains(&p.to_lowercase()))
}

fn detect_section(window: &FestivalWindow, title: &str) -> Option<String> {
    window
        .sections
        .iter()
        .find(|section| has_keyword(title, &section.keywords))
        .map(|section| section.name.clone())
}
