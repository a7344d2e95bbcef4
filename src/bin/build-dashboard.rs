//! Writes the Grafana dashboard for the pipeline's Prometheus metrics.
//!
//! Usage: build-dashboard [OUTPUT]   (default: grafana/cinema-pipeline.json)
//! GRAFANA_DATASOURCE selects the Prometheus datasource name.

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use cinema_pipeline::observability::metrics::dashboard::PipelineDashboard;

fn main() -> Result<()> {
    let output = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("grafana/cinema-pipeline.json"));

    let mut dashboard = PipelineDashboard::new();
    if let Ok(datasource) = env::var("GRAFANA_DATASOURCE") {
        dashboard = dashboard.with_datasource(datasource);
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(&dashboard.build())?;
    fs::write(&output, json).with_context(|| format!("writing {}", output.display()))?;

    eprintln!("Dashboard written to {}", output.display());
    Ok(())
}
