//! Generative fallback for titles the pattern cascade could not clean.
//!
//! Never fails: rate limits are retried with backoff, and anything else
//! degrades to the pattern result with low confidence.

pub mod cache;
pub mod prompt;
pub mod retry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::app::ports::{GenerationOptions, SleeperPort, TextGenerationPort};
use crate::common::constants::LOW_CONFIDENCE;
use crate::domain::{Classification, ExtractionMethod, ExtractionResult};
use crate::pipeline::processing::title::{self, clean_punctuation, is_likely_clean, split_version, COMPILATION_CONFIDENCE};

pub use cache::{CacheStats, ExtractionCache};
pub use prompt::{build_prompt, parse_response, GeneratedTitle};
pub use retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Concurrent inference workers in a batch
    pub workers: usize,
    /// Pause each worker takes between its own calls
    pub inter_call_delay_ms: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub retry: RetryPolicy,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            inter_call_delay_ms: 1_000,
            max_tokens: 256,
            temperature: 0.0,
            retry: RetryPolicy::default(),
        }
    }
}

impl FallbackConfig {
    pub fn inter_call_delay(&self) -> Duration {
        Duration::from_millis(self.inter_call_delay_ms)
    }

    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            json_response: true,
        }
    }
}

/// One listing to resolve
#[derive(Debug, Clone, PartialEq)]
pub struct TitleRequest {
    pub raw_title: String,
    pub description: Option<String>,
}

impl TitleRequest {
    pub fn new(raw_title: impl Into<String>) -> Self {
        Self {
            raw_title: raw_title.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn cache_key(&self) -> String {
        ExtractionCache::key(&self.raw_title, self.description.as_deref())
    }
}

/// How one listing was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Pattern result was good enough, no call made
    Clean,
    Generated,
    Degraded,
    Cached,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub clean: usize,
    pub generated: usize,
    pub degraded: usize,
    pub cached: usize,
}

impl BatchSummary {
    fn count(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::Clean => self.clean += 1,
            Resolution::Generated => self.generated += 1,
            Resolution::Degraded => self.degraded += 1,
            Resolution::Cached => self.cached += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.clean + self.generated + self.degraded + self.cached
    }
}

#[derive(Debug, Clone)]
pub struct BatchExtraction {
    /// One result per request, in request order
    pub results: Vec<ExtractionResult>,
    pub summary: BatchSummary,
}

/// True when the pattern result should be handed to the generative stage
pub fn needs_generation(pattern: &ExtractionResult) -> bool {
    match pattern.classification {
        Classification::NonFilm | Classification::Compilation => false,
        Classification::Normal | Classification::LiveBroadcast => !is_likely_clean(&pattern.extracted_title),
    }
}

/// Pattern result marked as degraded, with confidence capped low
pub fn degraded(pattern: &ExtractionResult) -> ExtractionResult {
    ExtractionResult {
        confidence: pattern.confidence.min(LOW_CONFIDENCE),
        method: ExtractionMethod::Degraded,
        ..pattern.clone()
    }
}

/// Merge a provider answer with what the pattern stage already knew
pub fn from_generated(pattern: &ExtractionResult, generated: GeneratedTitle) -> Option<ExtractionResult> {
    let extracted_title = clean_punctuation(&generated.title);
    if extracted_title.is_empty() {
        return None;
    }
    let (split_canonical, split_version_name) = split_version(&extracted_title);
    let canonical_title = generated
        .canonical
        .as_deref()
        .map(clean_punctuation)
        .filter(|c| !c.is_empty())
        .unwrap_or(split_canonical);
    let version = generated
        .version
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or(split_version_name);

    let classification = match pattern.classification {
        Classification::LiveBroadcast | Classification::Compilation => pattern.classification,
        Classification::Normal | Classification::NonFilm => Classification::Normal,
    };
    let mut confidence = generated.confidence.score();
    if classification == Classification::Compilation {
        confidence = confidence.min(COMPILATION_CONFIDENCE);
    }

    Some(ExtractionResult {
        extracted_title,
        canonical_title,
        version,
        year: pattern.year,
        event: generated
            .event
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .or_else(|| pattern.event.clone()),
        classification,
        confidence,
        method: ExtractionMethod::Generative,
    })
}

/// Second-stage extractor backed by a [`TextGenerationPort`].
#[derive(Clone)]
pub struct GenerativeExtractor {
    generator: Arc<dyn TextGenerationPort>,
    sleeper: Arc<dyn SleeperPort>,
    cache: Arc<ExtractionCache>,
    config: FallbackConfig,
}

impl GenerativeExtractor {
    pub fn new(generator: Arc<dyn TextGenerationPort>, sleeper: Arc<dyn SleeperPort>) -> Self {
        Self {
            generator,
            sleeper,
            cache: Arc::new(ExtractionCache::new()),
            config: FallbackConfig::default(),
        }
    }

    pub fn with_config(mut self, config: FallbackConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a cache between extractors (or keep one across runs)
    pub fn with_cache(mut self, cache: Arc<ExtractionCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &ExtractionCache {
        &self.cache
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Resolve one listing: pattern first, provider only when needed.
    pub async fn extract(&self, request: &TitleRequest) -> (ExtractionResult, Resolution) {
        let pattern = title::extract(&request.raw_title);
        if !needs_generation(&pattern) {
            return (pattern, Resolution::Clean);
        }
        let key = request.cache_key();
        if let Some(hit) = self.cache.get(&key) {
            return (hit, Resolution::Cached);
        }
        let (result, resolution) = self.generate(request, &pattern).await;
        self.cache.insert(key, result.clone());
        (result, resolution)
    }

    /// Resolve a batch. Clean listings cost nothing; the rest are deduplicated
    /// and spread round-robin over a small pool of workers, each pausing
    /// between its own calls. Results come back in request order.
    pub async fn extract_batch(&self, requests: &[TitleRequest]) -> BatchExtraction {
        let mut results: Vec<Option<ExtractionResult>> = vec![None; requests.len()];
        let mut resolutions: Vec<Option<Resolution>> = vec![None; requests.len()];

        // Unique pending listings in first-seen order, with every index that shares them
        let mut pending: Vec<(String, TitleRequest, ExtractionResult)> = Vec::new();
        let mut waiting: HashMap<String, Vec<usize>> = HashMap::new();

        for (i, request) in requests.iter().enumerate() {
            let pattern = title::extract(&request.raw_title);
            if !needs_generation(&pattern) {
                results[i] = Some(pattern);
                resolutions[i] = Some(Resolution::Clean);
                continue;
            }
            let key = request.cache_key();
            if let Some(indices) = waiting.get_mut(&key) {
                indices.push(i);
                continue;
            }
            if let Some(hit) = self.cache.get(&key) {
                results[i] = Some(hit);
                resolutions[i] = Some(Resolution::Cached);
                continue;
            }
            waiting.insert(key.clone(), vec![i]);
            pending.push((key, request.clone(), pattern));
        }

        if !pending.is_empty() {
            info!(
                "Generative extraction for {} unique listing(s) across {} worker(s)",
                pending.len(),
                self.config.workers.max(1).min(pending.len())
            );
        }

        let resolved = self.run_workers(pending.clone()).await;

        for (key, _, pattern) in &pending {
            let (result, resolution) = match resolved.get(key) {
                Some(found) => found.clone(),
                None => (degraded(pattern), Resolution::Degraded),
            };
            self.cache.insert(key.clone(), result.clone());
            let Some(indices) = waiting.get(key) else { continue };
            for (n, &i) in indices.iter().enumerate() {
                results[i] = Some(result.clone());
                // Repeats of a listing inside one batch are served from the memo
                resolutions[i] = Some(if n == 0 { resolution } else { Resolution::Cached });
            }
        }

        let mut summary = BatchSummary::default();
        let results = results
            .into_iter()
            .zip(resolutions)
            .zip(requests)
            .map(|((result, resolution), request)| {
                summary.count(resolution.unwrap_or(Resolution::Degraded));
                result.unwrap_or_else(|| degraded(&title::extract(&request.raw_title)))
            })
            .collect();

        crate::observability::metrics::fallback::batch_processed(
            summary.clean,
            summary.generated,
            summary.degraded,
            summary.cached,
        );
        info!(
            "Title batch done: {} clean, {} generated, {} degraded, {} cached",
            summary.clean, summary.generated, summary.degraded, summary.cached
        );

        BatchExtraction { results, summary }
    }

    async fn run_workers(
        &self,
        pending: Vec<(String, TitleRequest, ExtractionResult)>,
    ) -> HashMap<String, (ExtractionResult, Resolution)> {
        let workers = self.config.workers.max(1);
        let mut buckets: Vec<Vec<(String, TitleRequest, ExtractionResult)>> = vec![Vec::new(); workers];
        for (n, job) in pending.into_iter().enumerate() {
            buckets[n % workers].push(job);
        }

        let mut set = JoinSet::new();
        for bucket in buckets.into_iter().filter(|b| !b.is_empty()) {
            let extractor = self.clone();
            set.spawn(async move {
                let delay = extractor.config.inter_call_delay();
                let mut out = Vec::with_capacity(bucket.len());
                for (n, (key, request, pattern)) in bucket.into_iter().enumerate() {
                    if n > 0 && !delay.is_zero() {
                        extractor.sleeper.sleep(delay).await;
                    }
                    let resolved = extractor.generate(&request, &pattern).await;
                    out.push((key, resolved));
                }
                out
            });
        }

        let mut resolved = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(batch) => resolved.extend(batch),
                Err(e) => warn!("Generative extraction worker failed: {}", e),
            }
        }
        resolved
    }

    async fn generate(&self, request: &TitleRequest, pattern: &ExtractionResult) -> (ExtractionResult, Resolution) {
        crate::observability::metrics::fallback::generation_requested();
        let prompt = build_prompt(&request.raw_title, request.description.as_deref(), pattern);
        let options = self.config.generation_options();
        let generator = self.generator.as_ref();
        let prompt_ref = prompt.as_str();
        let options_ref = &options;

        let response = self
            .config
            .retry
            .run(self.sleeper.as_ref(), move || generator.generate_text(prompt_ref, options_ref))
            .await;

        let text = match response {
            Ok(text) => text,
            Err(e) => {
                warn!("Degrading '{}' after inference error: {}", request.raw_title, e);
                crate::observability::metrics::fallback::generation_degraded("inference_error");
                return (degraded(pattern), Resolution::Degraded);
            }
        };

        match parse_response(&text).and_then(|generated| from_generated(pattern, generated)) {
            Some(result) => {
                debug!(
                    "Generated title '{}' for '{}' (confidence {:.2})",
                    result.extracted_title, request.raw_title, result.confidence
                );
                crate::observability::metrics::fallback::generation_succeeded();
                (result, Resolution::Generated)
            }
            None => {
                warn!("Degrading '{}': unparsable inference output", request.raw_title);
                crate::observability::metrics::fallback::generation_degraded("unparsable");
                (degraded(pattern), Resolution::Degraded)
            }
        }
    }
}
