//! Wires configuration, registries and adapters into the use cases.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::{info, warn};

use crate::app::dedupe_use_case::DedupeUseCase;
use crate::app::festival_use_case::FestivalUseCase;
use crate::app::health_use_case::HealthUseCase;
use crate::app::ingest_use_case::IngestUseCase;
use crate::config::{Config, VenueRegistry};
use crate::infra::{ChatCompletionsClient, TokioSleeper};
use crate::pipeline::processing::dedupe::MergeBlocklist;
use crate::pipeline::processing::fallback::GenerativeExtractor;
use crate::pipeline::processing::festival::config::warn_on_issues;
use crate::pipeline::processing::festival::{validate_windows, FestivalRegistry, FestivalTagger};
use crate::pipeline::storage::{CatalogRepository, SqliteRepository};

pub struct Services {
    pub repository: Arc<dyn CatalogRepository>,
    pub tagger: Arc<FestivalTagger>,
    pub ingest: IngestUseCase,
    pub dedupe: Arc<DedupeUseCase>,
    pub festival: FestivalUseCase,
    pub health: Arc<HealthUseCase>,
}

impl Services {
    /// Open the SQLite catalog at the configured path and build everything on top of it
    pub async fn open(config: &Config) -> Result<Self> {
        let repository = SqliteRepository::open(&config.storage.db_path)
            .with_context(|| format!("opening catalog at {}", config.storage.db_path.display()))?;
        Self::build(config, Arc::new(repository)).await
    }

    pub async fn build(config: &Config, repository: Arc<dyn CatalogRepository>) -> Result<Self> {
        let venues = VenueRegistry::load(&config.registry.venues_path).context("loading venue registry")?;
        for venue in &venues.venues {
            repository.upsert_venue(venue).await?;
        }
        info!("Registered {} venue(s)", venues.venues.len());

        let tagger = Arc::new(FestivalTagger::new());
        if config.registry.festivals_path.exists() {
            let registry = FestivalRegistry::load(&config.registry.festivals_path)?;
            let windows = registry.windows();
            warn_on_issues(&validate_windows(&windows, &venues.ids()));
            tagger.preload(windows);
        } else {
            warn!(
                "No festival registry at {}, festival tagging disabled",
                config.registry.festivals_path.display()
            );
        }

        let blocklist = MergeBlocklist::load(&config.registry.merge_blocklist_path)?;
        let dedupe = Arc::new(DedupeUseCase::new(repository.clone(), config.dedupe.clone(), blocklist));

        let mut ingest = IngestUseCase::new(repository.clone(), tagger.clone()).with_dedupe(dedupe.clone());
        if config.inference.enabled {
            let client = ChatCompletionsClient::from_config(&config.inference)
                .map_err(|e| anyhow::anyhow!("building inference client: {}", e))?;
            let extractor = GenerativeExtractor::new(Arc::new(client), Arc::new(TokioSleeper))
                .with_config(config.fallback.clone());
            ingest = ingest.with_extractor(extractor);
            info!("Generative title fallback enabled ({})", config.inference.model);
        } else {
            info!("Generative title fallback disabled, using pattern extraction only");
        }

        Ok(Self {
            festival: FestivalUseCase::new(repository.clone(), tagger.clone()),
            health: Arc::new(HealthUseCase::new(repository.clone(), config.health.clone())),
            repository,
            tagger,
            ingest,
            dedupe,
        })
    }
}
