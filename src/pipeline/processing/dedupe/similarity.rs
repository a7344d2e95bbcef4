use std::collections::HashSet;

use crate::pipeline::processing::title::normalize_title;

/// Character trigrams of the normalized title, padded so short words still count.
pub fn trigrams(title: &str) -> HashSet<String> {
    let normalized = normalize_title(title);
    if normalized.is_empty() {
        return HashSet::new();
    }
    let padded: Vec<char> = format!("  {} ", normalized).chars().collect();
    padded.windows(3).map(|w| w.iter().collect()).collect()
}

/// Jaccard similarity of the two titles' trigram sets, in [0, 1]
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let left = trigrams(a);
    let right = trigrams(b);
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Jaro-Winkler over normalized titles; used to veto trigram matches that
/// only share scattered fragments
pub fn jaro_winkler_similarity(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(&normalize_title(a), &normalize_title(b))
}
