//! Source health scoring.
//!
//! Everything here is pure: the same inputs and the same `now` always give
//! the same snapshot.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::common::constants::{
    CRITICAL_STALE_HOURS, FRESHNESS_WEIGHT, HEALTHY_SCORE_CUTOFF, LOW_CHAIN_VOLUME_PERCENT, SUDDEN_DROP_PERCENT,
    WARNING_SCORE_CUTOFF, WARNING_STALE_HOURS,
};
use crate::domain::{AnomalyReason, HealthSnapshot, HealthStatus, Venue};

/// Freshness score right at the warning threshold
const FRESHNESS_AT_WARNING: f64 = 70.0;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    pub warning_stale_hours: f64,
    pub critical_stale_hours: f64,
    pub healthy_cutoff: f64,
    pub warning_cutoff: f64,
    pub low_chain_volume_percent: f64,
    pub sudden_drop_percent: f64,
    pub freshness_weight: f64,
    /// A snapshot must be at least this old to serve as the week-ago baseline
    pub baseline_min_age_days: i64,
    /// Drops are only judged against baselines at least this large
    pub min_drop_baseline: u32,
    pub parse_error_min_screenings: usize,
    /// Share of screenings before 10:00 UTC that suggests a time parsing bug
    pub parse_error_early_share: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            warning_stale_hours: WARNING_STALE_HOURS,
            critical_stale_hours: CRITICAL_STALE_HOURS,
            healthy_cutoff: HEALTHY_SCORE_CUTOFF,
            warning_cutoff: WARNING_SCORE_CUTOFF,
            low_chain_volume_percent: LOW_CHAIN_VOLUME_PERCENT,
            sudden_drop_percent: SUDDEN_DROP_PERCENT,
            freshness_weight: FRESHNESS_WEIGHT,
            baseline_min_age_days: 6,
            min_drop_baseline: 10,
            parse_error_min_screenings: 5,
            parse_error_early_share: 0.5,
        }
    }
}

impl HealthConfig {
    pub fn baseline_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.baseline_min_age_days)
    }
}

/// What the scorer needs to know about one venue
#[derive(Debug, Clone, PartialEq)]
pub struct VenueHealthInput {
    pub venue: Venue,
    pub last_scrape_at: Option<DateTime<Utc>>,
    /// Start times of every screening after `now`
    pub future_screenings: Vec<DateTime<Utc>>,
    /// Future-screening count from the baseline snapshot, if one exists
    pub previous_future_count: Option<u32>,
    /// Current future-screening counts of other venues in the same chain
    pub peer_counts: Vec<u32>,
}

pub fn hours_since(last_scrape_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<f64> {
    last_scrape_at.map(|at| ((now - at).num_seconds() as f64 / 3600.0).max(0.0))
}

/// 100 when just scraped, 70 at the warning threshold, 0 from the critical
/// threshold on. Never scraped counts as critically stale.
pub fn freshness(hours: Option<f64>, config: &HealthConfig) -> (f64, Option<AnomalyReason>) {
    let Some(hours) = hours else {
        return (0.0, Some(AnomalyReason::CriticalStale));
    };
    let warning = config.warning_stale_hours.max(f64::EPSILON);
    let critical = config.critical_stale_hours.max(warning);
    if hours >= critical {
        return (0.0, Some(AnomalyReason::CriticalStale));
    }
    if hours >= warning {
        let span = (critical - warning).max(f64::EPSILON);
        let score = FRESHNESS_AT_WARNING * (1.0 - (hours - warning) / span);
        return (score, Some(AnomalyReason::WarningStale));
    }
    let score = 100.0 - (100.0 - FRESHNESS_AT_WARNING) * (hours / warning);
    (score, None)
}

pub fn median(values: &[u32]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0
    } else {
        sorted[mid] as f64
    })
}

/// Volume score against the venue's own baseline and its chain peers
pub fn volume(
    future: u32,
    previous: Option<u32>,
    peer_counts: &[u32],
    config: &HealthConfig,
) -> (f64, Vec<AnomalyReason>) {
    if future == 0 {
        return (0.0, vec![AnomalyReason::ZeroScreenings]);
    }
    let mut reasons = Vec::new();
    let mut baselines = Vec::new();

    if let Some(previous) = previous.filter(|p| *p > 0) {
        baselines.push(previous as f64);
        let floor = previous as f64 * (1.0 - config.sudden_drop_percent / 100.0);
        if previous >= config.min_drop_baseline && (future as f64) < floor {
            reasons.push(AnomalyReason::SuddenDrop);
        }
    }
    if let Some(peer_median) = median(peer_counts).filter(|m| *m > 0.0) {
        baselines.push(peer_median);
        if (future as f64) < peer_median * config.low_chain_volume_percent / 100.0 {
            reasons.push(AnomalyReason::LowVolume);
        }
    }

    let ratio = baselines
        .iter()
        .map(|baseline| (future as f64 / baseline).min(1.0))
        .fold(1.0_f64, f64::min);
    (100.0 * ratio, reasons)
}

/// Most screenings landing before 10:00 UTC usually means times were parsed wrongly
pub fn parse_error_suspected(times: &[DateTime<Utc>], config: &HealthConfig) -> bool {
    if times.len() < config.parse_error_min_screenings.max(1) {
        return false;
    }
    let early = times.iter().filter(|t| t.hour() < 10).count();
    early as f64 / times.len() as f64 >= config.parse_error_early_share
}

pub fn status_for(score: f64, config: &HealthConfig) -> HealthStatus {
    if score >= config.healthy_cutoff {
        HealthStatus::Healthy
    } else if score >= config.warning_cutoff {
        HealthStatus::Warning
    } else {
        HealthStatus::Critical
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Score one venue at `now`.
pub fn score_venue(input: &VenueHealthInput, config: &HealthConfig, now: DateTime<Utc>) -> HealthSnapshot {
    let hours = hours_since(input.last_scrape_at, now);
    let (fresh, stale_reason) = freshness(hours, config);
    let future = input.future_screenings.len() as u32;
    let (vol, mut reasons) = volume(future, input.previous_future_count, &input.peer_counts, config);

    reasons.extend(stale_reason);
    if parse_error_suspected(&input.future_screenings, config) {
        reasons.push(AnomalyReason::ParseErrorSuspected);
    }
    reasons.sort();
    reasons.dedup();

    let weight = config.freshness_weight.clamp(0.0, 1.0);
    let overall = round1(weight * fresh + (1.0 - weight) * vol);

    HealthSnapshot {
        venue_id: input.venue.id.clone(),
        venue_name: input.venue.name.clone(),
        chain: input.venue.chain.clone(),
        freshness_score: round1(fresh),
        volume_score: round1(vol),
        overall_score: overall,
        status: status_for(overall, config),
        anomaly_reasons: reasons,
        future_screenings: future,
        hours_since_scrape: hours.map(round1),
        computed_at: now,
    }
}

/// Thresholds shown next to the venue list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardThresholds {
    pub healthy_cutoff: f64,
    pub warning_cutoff: f64,
    pub warning_stale_hours: f64,
    pub critical_stale_hours: f64,
    pub low_chain_volume_percent: f64,
}

impl From<&HealthConfig> for DashboardThresholds {
    fn from(config: &HealthConfig) -> Self {
        Self {
            healthy_cutoff: config.healthy_cutoff,
            warning_cutoff: config.warning_cutoff,
            warning_stale_hours: config.warning_stale_hours,
            critical_stale_hours: config.critical_stale_hours,
            low_chain_volume_percent: config.low_chain_volume_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub venues: Vec<HealthSnapshot>,
    pub thresholds: DashboardThresholds,
    pub healthy: usize,
    pub warning: usize,
    pub critical: usize,
}

/// Anomalous venues first, then lowest score, then name
pub fn sort_for_dashboard(snapshots: &mut [HealthSnapshot]) {
    snapshots.sort_by(|a, b| {
        b.is_anomalous()
            .cmp(&a.is_anomalous())
            .then_with(|| a.overall_score.total_cmp(&b.overall_score))
            .then_with(|| a.venue_name.cmp(&b.venue_name))
    });
}

pub fn dashboard_view(mut snapshots: Vec<HealthSnapshot>, config: &HealthConfig) -> DashboardView {
    sort_for_dashboard(&mut snapshots);
    let count = |status: HealthStatus| snapshots.iter().filter(|s| s.status == status).count();
    DashboardView {
        healthy: count(HealthStatus::Healthy),
        warning: count(HealthStatus::Warning),
        critical: count(HealthStatus::Critical),
        thresholds: DashboardThresholds::from(config),
        venues: snapshots,
    }
}
