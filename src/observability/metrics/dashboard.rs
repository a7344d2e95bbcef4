//! Grafana dashboard for the pipeline, generated from [`MetricName`].

use serde_json::{json, Value};

use super::MetricName;
use crate::common::constants::{HEALTHY_SCORE_CUTOFF, WARNING_SCORE_CUTOFF};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
}

/// Rows in the order listings flow through the pipeline
pub const PHASE_ORDER: &[&str] = &["ingest", "extraction", "fallback", "festival", "dedupe", "health", "system"];

const GRID_WIDTH: u32 = 24;
const PANEL_WIDTH: u32 = 8;
const PANEL_HEIGHT: u32 = 7;

/// Label a series is split by on its panel, if any
fn breakdown(metric: MetricName) -> Option<&'static str> {
    match metric {
        MetricName::ExtractionTitlesExtracted | MetricName::ExtractionConfidence => Some("method"),
        MetricName::FallbackGenerationDegraded => Some("cause"),
        MetricName::FestivalScreeningsTagged => Some("festival"),
        MetricName::HealthVenueScore => Some("venue"),
        MetricName::HealthAnomalies => Some("reason"),
        MetricName::HealthVenuesByStatus => Some("status"),
        _ => None,
    }
}

/// A percentage panel computed from counters
struct Ratio {
    phase: &'static str,
    title: &'static str,
    numerator: MetricName,
    denominator: &'static [MetricName],
}

const RATIOS: &[Ratio] = &[
    Ratio {
        phase: "ingest",
        title: "Listings persisted as screenings",
        numerator: MetricName::IngestScreeningsPersisted,
        denominator: &[MetricName::IngestListingsReceived],
    },
    Ratio {
        phase: "fallback",
        title: "Generation degraded",
        numerator: MetricName::FallbackGenerationDegraded,
        denominator: &[MetricName::FallbackGenerationRequests],
    },
    Ratio {
        phase: "fallback",
        title: "Extraction cache hit rate",
        numerator: MetricName::FallbackCacheHits,
        denominator: &[MetricName::FallbackCacheHits, MetricName::FallbackCacheMisses],
    },
];

/// Hands out panel ids and grid positions, three panels to a line.
struct Cursor {
    next_id: u32,
    x: u32,
    y: u32,
}

impl Cursor {
    fn id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn row(&mut self) -> Value {
        self.finish_line();
        let pos = json!({ "x": 0, "y": self.y, "w": GRID_WIDTH, "h": 1 });
        self.y += 1;
        pos
    }

    fn panel(&mut self) -> Value {
        if self.x + PANEL_WIDTH > GRID_WIDTH {
            self.finish_line();
        }
        let pos = json!({ "x": self.x, "y": self.y, "w": PANEL_WIDTH, "h": PANEL_HEIGHT });
        self.x += PANEL_WIDTH;
        pos
    }

    fn finish_line(&mut self) {
        if self.x > 0 {
            self.x = 0;
            self.y += PANEL_HEIGHT;
        }
    }
}

pub struct PipelineDashboard {
    title: String,
    datasource: String,
    metrics: Vec<MetricName>,
}

impl Default for PipelineDashboard {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineDashboard {
    /// Every recorded metric
    pub fn new() -> Self {
        Self {
            title: "Cinema Pipeline".to_string(),
            datasource: "Prometheus".to_string(),
            metrics: MetricName::all_metrics().collect(),
        }
    }

    pub fn with_datasource(mut self, datasource: impl Into<String>) -> Self {
        self.datasource = datasource.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    fn target(expr: String, legend: &str, ref_id: &str) -> Value {
        json!({ "expr": expr, "legendFormat": legend, "refId": ref_id })
    }

    fn metric_panel(&self, metric: MetricName, id: u32, grid_pos: Value) -> Value {
        let (_, description, unit) = metric.metadata();
        let name = metric.as_str();
        let by = breakdown(metric);
        let legend = by.map(|label| format!("{{{{{}}}}}", label)).unwrap_or_else(|| description.to_string());

        let (panel_type, targets, extra) = match metric.metric_type() {
            MetricType::Counter => {
                let expr = match by {
                    Some(label) => format!("sum by ({}) (increase({}[1h]))", label, name),
                    None => format!("sum(increase({}[1h]))", name),
                };
                ("timeseries", vec![Self::target(expr, &legend, "A")], json!({}))
            }
            MetricType::Histogram => {
                let grouping = by.map(|label| format!("le, {}", label)).unwrap_or_else(|| "le".to_string());
                let targets = [("0.5", "p50", "A"), ("0.9", "p90", "B")]
                    .iter()
                    .map(|(quantile, suffix, ref_id)| {
                        Self::target(
                            format!(
                                "histogram_quantile({}, sum by ({}) (rate({}_bucket[15m])))",
                                quantile, grouping, name
                            ),
                            &format!("{} {}", legend, suffix),
                            ref_id,
                        )
                    })
                    .collect();
                ("timeseries", targets, json!({}))
            }
            MetricType::Gauge if metric == MetricName::HealthVenueScore => (
                "bargauge",
                vec![Self::target(format!("sort({})", name), &legend, "A")],
                json!({
                    "thresholds": {
                        "mode": "absolute",
                        "steps": [
                            { "color": "red", "value": null },
                            { "color": "orange", "value": WARNING_SCORE_CUTOFF },
                            { "color": "green", "value": HEALTHY_SCORE_CUTOFF }
                        ]
                    },
                    "min": 0,
                    "max": 100
                }),
            ),
            MetricType::Gauge => ("stat", vec![Self::target(name.to_string(), &legend, "A")], json!({})),
        };

        let mut defaults = json!({ "unit": unit.unwrap_or("short") });
        if let (Some(defaults), Some(extra)) = (defaults.as_object_mut(), extra.as_object()) {
            defaults.extend(extra.clone());
        }

        json!({
            "id": id,
            "type": panel_type,
            "title": description,
            "gridPos": grid_pos,
            "datasource": self.datasource,
            "targets": targets,
            "fieldConfig": { "defaults": defaults, "overrides": [] }
        })
    }

    fn ratio_panel(&self, ratio: &Ratio, id: u32, grid_pos: Value) -> Value {
        let denominator = ratio
            .denominator
            .iter()
            .map(|m| format!("sum(increase({}[6h]))", m.as_str()))
            .collect::<Vec<_>>()
            .join(" + ");
        let expr = format!(
            "100 * sum(increase({}[6h])) / clamp_min({}, 1)",
            ratio.numerator.as_str(),
            denominator
        );
        json!({
            "id": id,
            "type": "stat",
            "title": ratio.title,
            "gridPos": grid_pos,
            "datasource": self.datasource,
            "targets": [Self::target(expr, ratio.title, "A")],
            "fieldConfig": { "defaults": { "unit": "percent", "min": 0, "max": 100 }, "overrides": [] }
        })
    }

    /// Grafana provisioning JSON, one row per pipeline phase
    pub fn build(&self) -> Value {
        let mut cursor = Cursor { next_id: 1, x: 0, y: 0 };
        let mut panels = Vec::new();

        for phase in PHASE_ORDER {
            let metrics: Vec<MetricName> = self
                .metrics
                .iter()
                .copied()
                .filter(|m| m.metadata().0 == *phase)
                .collect();
            if metrics.is_empty() {
                continue;
            }

            let id = cursor.id();
            panels.push(json!({
                "id": id,
                "type": "row",
                "title": phase.to_uppercase(),
                "gridPos": cursor.row(),
                "collapsed": false
            }));
            for ratio in RATIOS.iter().filter(|r| r.phase == *phase) {
                let id = cursor.id();
                panels.push(self.ratio_panel(ratio, id, cursor.panel()));
            }
            for metric in metrics {
                let id = cursor.id();
                panels.push(self.metric_panel(metric, id, cursor.panel()));
            }
        }

        json!({
            "id": null,
            "uid": "cinema-pipeline",
            "title": self.title,
            "tags": ["cinema", "pipeline"],
            "timezone": "utc",
            "schemaVersion": 38,
            "version": 0,
            "refresh": "5m",
            "time": { "from": "now-7d", "to": "now" },
            "panels": panels
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panels(dashboard: &Value) -> Vec<Value> {
        dashboard["panels"].as_array().cloned().unwrap_or_default()
    }

    #[test]
    fn rows_follow_the_pipeline() {
        let dashboard = PipelineDashboard::new().build();
        let rows: Vec<String> = panels(&dashboard)
            .iter()
            .filter(|p| p["type"] == "row")
            .filter_map(|p| p["title"].as_str().map(str::to_string))
            .collect();
        assert_eq!(rows, vec!["INGEST", "EXTRACTION", "FALLBACK", "FESTIVAL", "DEDUPE", "HEALTH", "SYSTEM"]);

        let charted = panels(&dashboard)
            .iter()
            .filter(|p| p["type"] != "row")
            .count();
        assert_eq!(charted, MetricName::all_metrics().count() + RATIOS.len());
    }

    #[test]
    fn every_metric_phase_has_a_row() {
        for metric in MetricName::all_metrics() {
            assert!(PHASE_ORDER.contains(&metric.metadata().0), "{metric} has no row");
        }
    }

    #[test]
    fn venue_scores_use_health_cutoffs() {
        let dashboard = PipelineDashboard::new().build();
        let all = panels(&dashboard);
        let score = all
            .iter()
            .find(|p| p["type"] == "bargauge")
            .expect("venue score panel");
        let steps = &score["fieldConfig"]["defaults"]["thresholds"]["steps"];
        assert_eq!(steps[1]["value"], json!(WARNING_SCORE_CUTOFF));
        assert_eq!(steps[2]["value"], json!(HEALTHY_SCORE_CUTOFF));
        assert!(score["targets"][0]["legendFormat"] == "{{venue}}");
    }

    #[test]
    fn ids_are_unique_and_datasource_applies() {
        let dashboard = PipelineDashboard::new().with_datasource("prom").build();
        let all = panels(&dashboard);
        let mut ids: Vec<u64> = all.iter().filter_map(|p| p["id"].as_u64()).collect();
        let count = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), count);
        assert!(all.iter().filter(|p| p["type"] != "row").all(|p| p["datasource"] == "prom"));
    }

    #[test]
    fn panels_never_overflow_the_grid() {
        let dashboard = PipelineDashboard::new().build();
        for panel in panels(&dashboard) {
            let x = panel["gridPos"]["x"].as_u64().unwrap_or(0);
            let w = panel["gridPos"]["w"].as_u64().unwrap_or(0);
            assert!(x + w <= GRID_WIDTH as u64);
        }
    }
}
