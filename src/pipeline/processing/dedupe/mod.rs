//! Duplicate film detection.
//!
//! Films are linked by shared external catalog id or canonical key first,
//! then by title similarity with compatible years. Links are applied with a
//! union-find that refuses any union putting a block-listed pair together.

pub mod merge;
pub mod similarity;

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{DuplicateCluster, FilmRecord};

pub use merge::{choose_survivor, ClusterMergeOutcome, MergeBlocklist, MergeReport};
pub use similarity::{jaro_winkler_similarity, trigram_similarity};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DedupeConfig {
    /// Minimum trigram similarity for a fuzzy link
    pub similarity_threshold: f64,
    /// Fuzzy links also need at least this Jaro-Winkler score
    pub min_jaro_winkler: f64,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            min_jaro_winkler: 0.85,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkKind {
    ExternalId,
    CanonicalKey,
    Similar,
}

#[derive(Debug, Clone, PartialEq)]
struct Link {
    kind: LinkKind,
    score: f64,
    left: usize,
    right: usize,
}

/// Result of clustering: what to merge and what the block-list stopped
#[derive(Debug, Clone, Default)]
pub struct ClusterPlan {
    pub clusters: Vec<DuplicateCluster>,
    pub skipped_blocked: Vec<(Uuid, Uuid)>,
}

/// An unknown year is compatible with any year
pub fn years_compatible(a: Option<i32>, b: Option<i32>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

fn external_ids_conflict(a: &FilmRecord, b: &FilmRecord) -> bool {
    match (&a.external_catalog_id, &b.external_catalog_id) {
        (Some(x), Some(y)) => !x.eq_ignore_ascii_case(y),
        _ => false,
    }
}

/// How two films are related, if at all
fn link_between(a: &FilmRecord, b: &FilmRecord, config: &DedupeConfig) -> Option<(LinkKind, f64)> {
    if let (Some(x), Some(y)) = (&a.external_catalog_id, &b.external_catalog_id) {
        if x.eq_ignore_ascii_case(y) {
            return Some((LinkKind::ExternalId, 1.0));
        }
    }
    if external_ids_conflict(a, b) {
        return None;
    }
    if a.canonical_key == b.canonical_key {
        return Some((LinkKind::CanonicalKey, 1.0));
    }
    if !years_compatible(a.year, b.year) {
        return None;
    }
    let score = trigram_similarity(&a.title, &b.title);
    if score >= config.similarity_threshold && jaro_winkler_similarity(&a.title, &b.title) >= config.min_jaro_winkler {
        return Some((LinkKind::Similar, score));
    }
    None
}

struct DisjointSet {
    parent: Vec<usize>,
    members: Vec<Vec<usize>>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            members: (0..size).map(|i| vec![i]).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let (keep, absorb) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[absorb] = keep;
        let moved = std::mem::take(&mut self.members[absorb]);
        self.members[keep].extend(moved);
    }
}

/// Group `films` into duplicate clusters.
///
/// Only films with a matchable classification take part. The result is
/// deterministic for a given input set regardless of input order.
pub fn find_clusters(films: &[FilmRecord], config: &DedupeConfig, blocklist: &MergeBlocklist) -> ClusterPlan {
    let mut candidates: Vec<&FilmRecord> = films.iter().filter(|f| f.classification.is_matchable()).collect();
    candidates.sort_by_key(|f| f.id);
    candidates.dedup_by_key(|f| f.id);

    let mut links = Vec::new();
    for i in 0..candidates.len() {
        for j in (i + 1)..candidates.len() {
            if let Some((kind, score)) = link_between(candidates[i], candidates[j], config) {
                links.push(Link { kind, score, left: i, right: j });
            }
        }
    }
    // Strongest evidence first, so a block-list refusal never discards an exact match in favour of a fuzzy one
    links.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| b.score.total_cmp(&a.score))
            .then_with(|| (a.left, a.right).cmp(&(b.left, b.right)))
    });

    let mut sets = DisjointSet::new(candidates.len());
    let mut skipped_blocked = Vec::new();
    for link in &links {
        let (ra, rb) = (sets.find(link.left), sets.find(link.right));
        if ra == rb {
            continue;
        }
        // An undated film must not chain two differently dated films together
        let conflicting = link.kind != LinkKind::ExternalId
            && sets.members[ra].iter().any(|&x| {
                sets.members[rb].iter().any(|&y| {
                    !years_compatible(candidates[x].year, candidates[y].year)
                        || external_ids_conflict(candidates[x], candidates[y])
                })
            });
        if conflicting {
            continue;
        }
        let blocked = !blocklist.is_empty()
            && sets.members[ra].iter().any(|&x| {
                sets.members[rb]
                    .iter()
                    .any(|&y| blocklist.is_blocked(candidates[x], candidates[y]))
            });
        if blocked {
            debug!(
                "Refusing merge of '{}' and '{}': block-listed pair",
                candidates[link.left].title, candidates[link.right].title
            );
            skipped_blocked.push((candidates[link.left].id, candidates[link.right].id));
            continue;
        }
        sets.union(link.left, link.right);
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..candidates.len() {
        let root = sets.find(i);
        groups.entry(root).or_default().push(i);
    }

    let clusters: Vec<DuplicateCluster> = groups
        .into_values()
        .filter(|group| group.len() > 1)
        .filter_map(|group| {
            let members: Vec<FilmRecord> = group.iter().map(|&i| candidates[i].clone()).collect();
            let survivor = choose_survivor(&members)?.clone();
            Some(DuplicateCluster { survivor, members })
        })
        .collect();

    if !clusters.is_empty() || !skipped_blocked.is_empty() {
        info!(
            "Found {} duplicate cluster(s) among {} film(s), {} blocked union(s)",
            clusters.len(),
            candidates.len(),
            skipped_blocked.len()
        );
    }

    ClusterPlan {
        clusters,
        skipped_blocked,
    }
}

/// Films sharing a canonical key with `film`; run on every write
pub fn same_key_matches<'a>(film: &FilmRecord, others: &'a [FilmRecord]) -> Vec<&'a FilmRecord> {
    let by_key: HashMap<&str, Vec<&FilmRecord>> = others.iter().fold(HashMap::new(), |mut acc, other| {
        acc.entry(other.canonical_key.as_str()).or_default().push(other);
        acc
    });
    by_key
        .get(film.canonical_key.as_str())
        .map(|found| found.iter().copied().filter(|o| o.id != film.id).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Classification;
    use crate::pipeline::processing::title::canonical_key;
    use chrono::{TimeZone, Utc};

    fn film(n: u128, title: &str, year: Option<i32>) -> FilmRecord {
        let created = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        FilmRecord {
            id: Uuid::from_u128(n),
            title: title.to_string(),
            canonical_key: canonical_key(title, year),
            year,
            classification: Classification::Normal,
            external_catalog_id: None,
            poster_url: None,
            synopsis: None,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn transitive_links_form_one_cluster() {
        let a = film(1, "The Grand Budapest Hotel", None);
        let b = film(2, "The Grand Budapest Hotell", None);
        let mut c = film(3, "Grand Budapest Hotel", Some(2014));
        c.external_catalog_id = Some("tmdb:120467".into());
        let mut d = film(4, "The Grand Budapest Hotel", None);
        d.external_catalog_id = Some("tmdb:120467".into());

        let plan = find_clusters(&[c.clone(), b, a, d], &DedupeConfig::default(), &MergeBlocklist::default());

        assert_eq!(plan.clusters.len(), 1);
        let cluster = &plan.clusters[0];
        assert_eq!(cluster.members.len(), 4);
        // Earliest-created tie falls through to the external id, then lowest id
        assert_eq!(cluster.survivor.id, c.id);
        assert_eq!(cluster.losers().count(), 3);
    }

    #[test]
    fn different_years_or_external_ids_stay_apart() {
        let a = film(1, "Suspiria", Some(1977));
        let b = film(2, "Suspiria", Some(2018));
        let mut c = film(3, "Dune", None);
        c.external_catalog_id = Some("tmdb:841".into());
        let mut d = film(4, "Dune", None);
        d.external_catalog_id = Some("tmdb:438631".into());

        let plan = find_clusters(&[a, b, c, d], &DedupeConfig::default(), &MergeBlocklist::default());
        assert!(plan.clusters.is_empty());
    }

    #[test]
    fn undated_film_joins_at_most_one_dated_film() {
        let undated = film(1, "Suspiria", None);
        let original = film(2, "Suspiria", Some(1977));
        let remake = film(3, "Suspiria", Some(2018));

        let plan = find_clusters(
            &[remake.clone(), undated.clone(), original.clone()],
            &DedupeConfig::default(),
            &MergeBlocklist::default(),
        );

        assert_eq!(plan.clusters.len(), 1);
        let ids: Vec<Uuid> = plan.clusters[0].members.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![undated.id, original.id]);
        assert!(plan.skipped_blocked.is_empty());
    }

    #[test]
    fn blocklisted_pair_is_never_joined_even_transitively() {
        let a = film(1, "Three Colours: Blue", None);
        let b = film(2, "Three Colours Blue", None);
        let c = film(3, "Three Colours: Blue", None);
        let blocklist = MergeBlocklist::new(vec![merge::BlockedPair {
            a: a.id.to_string(),
            b: b.id.to_string(),
            reason: None,
        }]);

        let plan = find_clusters(&[a.clone(), b.clone(), c.clone()], &DedupeConfig::default(), &blocklist);

        assert_eq!(plan.clusters.len(), 1);
        let ids: Vec<Uuid> = plan.clusters[0].members.iter().map(|m| m.id).collect();
        assert!(ids.contains(&a.id) && ids.contains(&c.id));
        assert!(!ids.contains(&b.id));
        assert!(!plan.skipped_blocked.is_empty());
    }

    #[test]
    fn non_matchable_films_are_ignored() {
        let mut a = film(1, "LSFF Shorts", None);
        a.classification = Classification::Compilation;
        let mut b = film(2, "LSFF Shorts", None);
        b.classification = Classification::Compilation;
        let plan = find_clusters(&[a, b], &DedupeConfig::default(), &MergeBlocklist::default());
        assert!(plan.clusters.is_empty());
    }

    #[test]
    fn same_key_lookup_skips_self() {
        let a = film(1, "Heat", Some(1995));
        let b = film(2, "HEAT", Some(1995));
        let c = film(3, "Heat", None);
        let others = vec![a.clone(), b.clone(), c];
        let found = same_key_matches(&a, &others);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, b.id);
    }
}
