//! Fixed thresholds shared between the health monitor and the operational
//! dashboard. The dashboard renders these verbatim, so they live in one place.

/// Overall score at or above which a venue is healthy
pub const HEALTHY_SCORE_CUTOFF: f64 = 80.0;
/// Overall score at or above which a venue is in warning (below is critical)
pub const WARNING_SCORE_CUTOFF: f64 = 50.0;

/// Hours since the last successful scrape before freshness starts to matter
pub const WARNING_STALE_HOURS: f64 = 24.0;
/// Hours since the last successful scrape at which freshness reaches zero
pub const CRITICAL_STALE_HOURS: f64 = 48.0;

/// A venue below this percentage of its chain's median volume is LOW_VOLUME
pub const LOW_CHAIN_VOLUME_PERCENT: f64 = 30.0;
/// Week-over-week loss (percent) that counts as a SUDDEN_DROP
pub const SUDDEN_DROP_PERCENT: f64 = 50.0;

/// Weight of freshness in the overall score; volume gets the remainder
pub const FRESHNESS_WEIGHT: f64 = 0.6;

/// Days before a festival opens during which listings are already tagged
pub const FESTIVAL_GRACE_DAYS: i64 = 3;

/// Confidence assigned to a degraded ("low") extraction
pub const LOW_CONFIDENCE: f64 = 0.4;

/// Default name of the service in logs and the health endpoint
pub const SERVICE_NAME: &str = "cinema-pipeline";
