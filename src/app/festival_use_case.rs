use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::common::constants::FESTIVAL_GRACE_DAYS;
use crate::domain::Screening;
use crate::pipeline::processing::festival::FestivalTagger;
use crate::pipeline::storage::CatalogRepository;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RescanReport {
    pub examined: usize,
    pub tagged: usize,
    pub cleared: usize,
    /// Screenings whose tag actually changed
    pub changed: usize,
}

/// Admin operations that re-run festival detection over stored screenings
pub struct FestivalUseCase {
    repository: Arc<dyn CatalogRepository>,
    tagger: Arc<FestivalTagger>,
}

impl FestivalUseCase {
    pub fn new(repository: Arc<dyn CatalogRepository>, tagger: Arc<FestivalTagger>) -> Self {
        Self { repository, tagger }
    }

    /// Re-detect festival tags on upcoming screenings, for one venue or all.
    pub async fn rescan(&self, venue_id: Option<&str>, now: DateTime<Utc>) -> Result<RescanReport> {
        let venue_ids: Vec<String> = match venue_id {
            Some(id) => {
                if self.repository.venue(id).await?.is_none() {
                    bail!("Unknown venue '{}'", id);
                }
                vec![id.to_string()]
            }
            None => self.repository.venues().await?.into_iter().map(|v| v.id).collect(),
        };

        let mut report = RescanReport::default();
        for venue in &venue_ids {
            let screenings = self.repository.screenings_for_venue(venue, now, None).await?;
            for screening in screenings {
                let tag = self.tagger.detect(
                    &screening.venue_id,
                    &screening.raw_title,
                    screening.datetime,
                    screening.booking_url.as_deref(),
                );
                report.examined += 1;
                if tag.is_some() {
                    report.tagged += 1;
                }
                if tag != screening.festival {
                    if tag.is_none() {
                        report.cleared += 1;
                    }
                    self.repository.update_festival_tag(screening.id, tag.as_ref()).await?;
                    report.changed += 1;
                }
            }
        }

        info!(
            "Festival rescan over {} venue(s): {} examined, {} tagged, {} changed",
            venue_ids.len(),
            report.examined,
            report.tagged,
            report.changed
        );
        Ok(report)
    }

    /// Clear every tag of festival `slug`, then re-detect it against only
    /// that festival. Screenings tagged with another festival are left alone.
    pub async fn reverse_tag(&self, slug: &str) -> Result<RescanReport> {
        let Some((start, end)) = self.tagger.dates_for(slug) else {
            bail!("Festival '{}' is not loaded", slug);
        };

        let mut report = RescanReport::default();
        let previously: Vec<Screening> = self.repository.screenings_for_festival(slug).await?;
        for screening in &previously {
            self.repository.update_festival_tag(screening.id, None).await?;
        }
        let previous_ids: HashSet<_> = previously.iter().map(|s| s.id).collect();
        let mut retagged = HashSet::new();

        let from = (start - Duration::days(FESTIVAL_GRACE_DAYS))
            .and_hms_opt(0, 0, 0)
            .map(|t| Utc.from_utc_datetime(&t));
        let to = (end + Duration::days(1)).and_hms_opt(0, 0, 0).map(|t| Utc.from_utc_datetime(&t));
        let (Some(from), Some(to)) = (from, to) else {
            bail!("Festival '{}' has an unrepresentable date range", slug);
        };

        let mut venues = self.tagger.venues_for(slug);
        venues.sort();
        venues.dedup();
        for venue in &venues {
            for screening in self.repository.screenings_for_venue(venue, from, Some(to)).await? {
                let other_festival = screening
                    .festival
                    .as_ref()
                    .map_or(false, |tag| tag.festival_slug != slug);
                if other_festival {
                    continue;
                }
                report.examined += 1;
                let tag = self.tagger.detect_for(
                    slug,
                    &screening.venue_id,
                    &screening.raw_title,
                    screening.datetime,
                    screening.booking_url.as_deref(),
                );
                if let Some(tag) = tag {
                    self.repository.update_festival_tag(screening.id, Some(&tag)).await?;
                    report.tagged += 1;
                    retagged.insert(screening.id);
                    debug!("Reverse-tagged '{}' at {} as {}", screening.raw_title, venue, slug);
                }
            }
        }

        let was_tagged = previously.len();
        report.cleared = previous_ids.difference(&retagged).count();
        report.changed = report.cleared + retagged.difference(&previous_ids).count();
        info!(
            "Reverse-tagged {}: {} screening(s) tagged, {} previously tagged",
            slug, report.tagged, was_tagged
        );
        Ok(report)
    }
}
