//! Festival registry: templates with per-year editions, resolved into
//! concrete [`FestivalWindow`]s and validated against the venue registry.

use std::collections::HashSet;
use std::path::Path;

use chrono::{Datelike, Duration, NaiveDate};
use serde::Deserialize;
use tracing::{info, warn};

use crate::common::constants::FESTIVAL_GRACE_DAYS;
use crate::common::error::{FestivalConfigError, PipelineError, Result};
use crate::domain::{ConfidenceStrategy, FestivalSection, FestivalWindow};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FestivalRegistry {
    #[serde(default, rename = "festival")]
    pub festivals: Vec<FestivalTemplate>,
}

/// Everything about a festival that stays the same year to year
#[derive(Debug, Clone, Deserialize)]
pub struct FestivalTemplate {
    pub slug_base: String,
    pub name: String,
    pub strategy: ConfidenceStrategy,
    #[serde(default)]
    pub venues: Vec<String>,
    #[serde(default)]
    pub title_keywords: Vec<String>,
    #[serde(default)]
    pub url_patterns: Vec<String>,
    #[serde(default)]
    pub typical_months: Vec<u32>,
    #[serde(default)]
    pub sections: Vec<FestivalSection>,
    #[serde(default)]
    pub editions: Vec<FestivalEdition>,
}

/// One year's dates; may narrow the venue list or switch strategy
#[derive(Debug, Clone, Deserialize)]
pub struct FestivalEdition {
    pub year: i32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub venues: Option<Vec<String>>,
    #[serde(default)]
    pub strategy: Option<ConfidenceStrategy>,
}

impl FestivalRegistry {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let registry = Self::from_toml_str(&content)?;
        info!(
            "Loaded {} festival template(s) from {}",
            registry.festivals.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Expand every template edition into a window
    pub fn windows(&self) -> Vec<FestivalWindow> {
        self.festivals
            .iter()
            .flat_map(|template| template.editions.iter().map(move |edition| template.resolve(edition)))
            .collect()
    }

    /// Windows whose edition year is `year`
    pub fn windows_for_year(&self, year: i32) -> Vec<FestivalWindow> {
        self.windows().into_iter().filter(|w| w.year == year).collect()
    }
}

impl FestivalTemplate {
    pub fn resolve(&self, edition: &FestivalEdition) -> FestivalWindow {
        FestivalWindow {
            slug_base: self.slug_base.clone(),
            year: edition.year,
            venues: edition.venues.clone().unwrap_or_else(|| self.venues.clone()),
            start_date: edition.start_date,
            end_date: edition.end_date,
            strategy: edition.strategy.unwrap_or(self.strategy),
            title_keywords: self.title_keywords.clone(),
            url_patterns: self.url_patterns.clone(),
            typical_months: self.typical_months.clone(),
            sections: self.sections.clone(),
        }
    }
}

/// Check resolved windows against the set of known venue ids.
///
/// Returns every problem found; an empty list means the registry is usable.
pub fn validate_windows(windows: &[FestivalWindow], known_venues: &HashSet<String>) -> Vec<FestivalConfigError> {
    let mut issues = Vec::new();

    for window in windows {
        let slug = window.slug();
        for venue in &window.venues {
            if !known_venues.contains(venue) {
                issues.push(FestivalConfigError::UnknownVenue {
                    slug: slug.clone(),
                    venue: venue.clone(),
                });
            }
        }
        if window.end_date < window.start_date {
            issues.push(FestivalConfigError::InvertedRange {
                slug: slug.clone(),
                start: window.start_date.to_string(),
                end: window.end_date.to_string(),
            });
        }
        let month = window.start_date.month();
        if !window.typical_months.is_empty() && !window.typical_months.contains(&month) {
            issues.push(FestivalConfigError::UnexpectedMonth {
                slug,
                month,
                expected: window.typical_months.clone(),
            });
        }
    }

    issues.extend(find_overlaps(windows));
    issues
}

/// Pairs of windows that share a venue and could both match the same
/// screening, counting the grace days before each opening
pub fn find_overlaps(windows: &[FestivalWindow]) -> Vec<FestivalConfigError> {
    let mut overlaps = Vec::new();
    for (i, a) in windows.iter().enumerate() {
        for b in &windows[i + 1..] {
            if !ranges_intersect(matching_opens(a), a.end_date, matching_opens(b), b.end_date) {
                continue;
            }
            if let Some(venue) = a.venues.iter().find(|v| b.venues.contains(v)) {
                overlaps.push(FestivalConfigError::Overlap {
                    first: a.slug(),
                    second: b.slug(),
                    venue: venue.clone(),
                });
            }
        }
    }
    overlaps
}

fn matching_opens(window: &FestivalWindow) -> NaiveDate {
    window.start_date - Duration::days(FESTIVAL_GRACE_DAYS)
}

fn ranges_intersect(a_start: NaiveDate, a_end: NaiveDate, b_start: NaiveDate, b_end: NaiveDate) -> bool {
    a_start <= b_end && b_start <= a_end
}

/// Log validation problems; used when the registry is loaded at runtime
pub fn warn_on_issues(issues: &[FestivalConfigError]) {
    for issue in issues {
        warn!("Festival registry: {}", issue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[festival]]
        slug_base = "frightfest"
        name = "FrightFest"
        strategy = "AUTO"
        venues = ["cineworld-leicester-square"]
        typical_months = [8]

        [[festival.editions]]
        year = 2026
        start_date = "2026-08-27"
        end_date = "2026-08-31"

        [[festival]]
        slug_base = "lff"
        name = "BFI London Film Festival"
        strategy = "TITLE"
        venues = ["bfi-southbank", "prince-charles"]
        title_keywords = ["LFF"]
        typical_months = [10]

        [[festival.sections]]
        name = "Gala"
        keywords = ["gala"]

        [[festival.editions]]
        year = 2026
        start_date = "2026-10-07"
        end_date = "2026-10-18"

        [[festival.editions]]
        year = 2027
        start_date = "2027-10-06"
        end_date = "2027-10-17"
        venues = ["bfi-southbank"]
    "#;

    fn known() -> HashSet<String> {
        ["cineworld-leicester-square", "bfi-southbank", "prince-charles"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn editions_resolve_to_windows() {
        let registry = FestivalRegistry::from_toml_str(SAMPLE).unwrap();
        let windows = registry.windows();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[1].slug(), "lff-2026");
        assert_eq!(windows[1].sections[0].name, "Gala");
        assert_eq!(windows[2].venues, vec!["bfi-southbank".to_string()]);
        assert_eq!(registry.windows_for_year(2027).len(), 1);
        assert!(validate_windows(&windows, &known()).is_empty());
    }

    #[test]
    fn validation_reports_each_problem() {
        let registry = FestivalRegistry::from_toml_str(SAMPLE).unwrap();
        let mut windows = registry.windows();
        windows[0].venues.push("nowhere".to_string());
        windows[0].start_date = NaiveDate::from_ymd_opt(2026, 10, 10).unwrap();
        windows[0].end_date = NaiveDate::from_ymd_opt(2026, 10, 9).unwrap();
        windows[2].start_date = NaiveDate::from_ymd_opt(2026, 10, 12).unwrap();
        windows[2].end_date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();

        let issues = validate_windows(&windows, &known());
        assert!(issues.contains(&FestivalConfigError::UnknownVenue {
            slug: "frightfest-2026".into(),
            venue: "nowhere".into()
        }));
        assert!(issues
            .iter()
            .any(|i| matches!(i, FestivalConfigError::InvertedRange { slug, .. } if slug == "frightfest-2026")));
        assert!(issues
            .iter()
            .any(|i| matches!(i, FestivalConfigError::UnexpectedMonth { month: 10, .. })));
        assert!(issues.contains(&FestivalConfigError::Overlap {
            first: "lff-2026".into(),
            second: "lff-2027".into(),
            venue: "bfi-southbank".into()
        }));
    }

    #[test]
    fn grace_days_count_towards_overlap() {
        let registry = FestivalRegistry::from_toml_str(SAMPLE).unwrap();
        let frightfest = registry.windows()[0].clone();
        let mut next = frightfest.clone();
        next.slug_base = "grimmfest".to_string();
        next.start_date = frightfest.end_date + Duration::days(2);
        next.end_date = next.start_date + Duration::days(4);

        let overlaps = find_overlaps(&[frightfest.clone(), next.clone()]);
        assert_eq!(
            overlaps,
            vec![FestivalConfigError::Overlap {
                first: "frightfest-2026".into(),
                second: "grimmfest-2026".into(),
                venue: "cineworld-leicester-square".into()
            }]
        );

        next.start_date = frightfest.end_date + Duration::days(FESTIVAL_GRACE_DAYS + 1);
        next.end_date = next.start_date + Duration::days(4);
        assert!(find_overlaps(&[frightfest, next]).is_empty());
    }
}
