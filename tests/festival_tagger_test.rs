use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};

use cinema_pipeline::config::VenueRegistry;
use cinema_pipeline::pipeline::processing::festival::{validate_windows, FestivalRegistry, FestivalTagger};

fn registry_path(file: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("registry").join(file)
}

fn tagger() -> FestivalTagger {
    let registry = FestivalRegistry::load(registry_path("festivals.toml")).unwrap();
    FestivalTagger::with_windows(registry.windows())
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

#[test]
fn shipped_registry_is_consistent_with_venues() {
    let venues = VenueRegistry::load(registry_path("venues.toml")).unwrap();
    let registry = FestivalRegistry::load(registry_path("festivals.toml")).unwrap();
    let issues = validate_windows(&registry.windows(), &venues.ids());
    assert!(issues.is_empty(), "{:?}", issues);
}

#[test]
fn title_strategy_needs_a_keyword() {
    let tagger = tagger();
    let tag = tagger
        .detect("bfi-southbank", "LFF Gala: Hamnet", at(2026, 10, 8, 19), None)
        .unwrap();
    assert_eq!(tag.festival_slug, "lff-2026");
    assert_eq!(tag.festival_section.as_deref(), Some("Gala"));

    assert!(tagger.detect("bfi-southbank", "Hamnet", at(2026, 10, 8, 19), None).is_none());

    let by_url = tagger.detect(
        "curzon-mayfair",
        "Hamnet",
        at(2026, 10, 9, 18),
        Some("https://whatson.bfi.org.uk/lff/Online/default.asp"),
    );
    assert_eq!(by_url.unwrap().festival_slug, "lff-2026");
}

#[test]
fn auto_strategy_tags_everything_at_the_venue() {
    let tagger = tagger();
    let tag = tagger
        .detect("bfi-southbank", "Minds: Orlando, My Political Biography", at(2026, 3, 20, 18), None)
        .unwrap();
    assert_eq!(tag.festival_slug, "bfi-flare-2026");
    assert_eq!(tag.festival_section.as_deref(), Some("Minds"));

    assert!(tagger.detect("bfi-imax", "Dune", at(2026, 3, 20, 18), None).is_none());
}

#[test]
fn windows_open_three_days_early_and_close_on_the_last_day() {
    let tagger = tagger();
    let title = "Sundance London: Preview";
    assert!(tagger.detect("picturehouse-central", title, at(2026, 6, 2, 20), None).is_some());
    assert!(tagger.detect("picturehouse-central", title, at(2026, 6, 1, 20), None).is_none());
    assert!(tagger.detect("picturehouse-central", title, at(2026, 6, 8, 22), None).is_some());
    assert!(tagger.detect("picturehouse-central", title, at(2026, 6, 9, 12), None).is_none());
}

#[test]
fn empty_tagger_tags_nothing() {
    let tagger = FestivalTagger::new();
    assert!(!tagger.is_loaded());
    assert!(tagger
        .detect("bfi-southbank", "LFF Gala: Hamnet", at(2026, 10, 8, 19), None)
        .is_none());

    let loaded = self::tagger();
    assert!(loaded.window_count() >= 6);
    loaded.clear_cache();
    assert!(!loaded.is_loaded());
}

#[test]
fn slug_lookups() {
    let tagger = tagger();
    let (start, end) = tagger.dates_for("frightfest-2026").unwrap();
    assert_eq!(start.to_string(), "2026-08-27");
    assert_eq!(end.to_string(), "2026-08-31");
    assert!(tagger.venues_for("frightfest-2026").contains(&"prince-charles-cinema".to_string()));
    assert!(tagger.dates_for("frightfest-1999").is_none());
}
