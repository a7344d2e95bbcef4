use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::Serialize;

use crate::domain::ExtractionResult;

/// Memo of fallback results keyed by raw title and description.
///
/// Degraded results are cached too, so a title that failed once in a run is
/// not sent to the provider again.
#[derive(Debug, Default)]
pub struct ExtractionCache {
    entries: RwLock<HashMap<String, ExtractionResult>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64
    }
}

impl ExtractionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(raw_title: &str, description: Option<&str>) -> String {
        format!(
            "{}\u{1f}{}",
            raw_title.trim().to_lowercase(),
            description.map(str::trim).unwrap_or_default()
        )
    }

    pub fn get(&self, key: &str) -> Option<ExtractionResult> {
        let found = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();
        match found {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                crate::observability::metrics::fallback::cache_hit();
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                crate::observability::metrics::fallback::cache_miss();
            }
        }
        found
    }

    pub fn insert(&self, key: String, result: ExtractionResult) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, result);
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.read().unwrap_or_else(|e| e.into_inner()).len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::title;

    #[test]
    fn key_ignores_case_and_padding() {
        assert_eq!(
            ExtractionCache::key("  Vertigo + Q&A ", None),
            ExtractionCache::key("vertigo + q&a", None)
        );
        assert_ne!(
            ExtractionCache::key("Vertigo", Some("35mm print")),
            ExtractionCache::key("Vertigo", None)
        );
    }

    #[test]
    fn counts_hits_and_misses() {
        let cache = ExtractionCache::new();
        let key = ExtractionCache::key("Alien + Aliens", None);
        assert!(cache.get(&key).is_none());
        cache.insert(key.clone(), title::extract("Alien + Aliens"));
        assert!(cache.get(&key).is_some());

        let stats = cache.stats();
        assert_eq!(stats, CacheStats { entries: 1, hits: 1, misses: 1 });
        assert_eq!(stats.hit_rate(), 0.5);

        cache.clear();
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
