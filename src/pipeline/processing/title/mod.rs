//! Pattern title extractor.
//!
//! Reduces a raw listing string to a film title through an ordered cascade of
//! pure rules. Each rule looks at the current [`TitleDraft`] and either leaves
//! it alone, rewrites it, or stops the cascade with a final result. The fold
//! in [`extract`] is the only place precedence is decided.

pub mod canonical;
pub mod clean;
pub mod patterns;

use std::ops::ControlFlow;

use crate::domain::{Classification, ExtractionMethod, ExtractionResult};
use patterns::{PrefixKind, DOUBLE_FEATURE, NON_FILM, NON_FILM_EXEMPT, PREFIX_RULES, PRESENTS, SING_ALONG, SUFFIX_RULES, VERSION_SUFFIX};

pub use canonical::{canonical_key, normalize_title};
pub use clean::is_likely_clean;

pub const PRESENTS_CONFIDENCE: f64 = 0.95;
pub const SING_ALONG_CONFIDENCE: f64 = 0.90;
pub const PREFIX_CONFIDENCE: f64 = 0.90;
pub const COMPILATION_CONFIDENCE: f64 = 0.30;
pub const SUFFIX_CONFIDENCE: f64 = 0.85;
pub const DOUBLE_FEATURE_CONFIDENCE: f64 = 0.70;

/// Stacked prefixes ("Members' Screening: 35mm: Vertigo") are peeled at most this many times
const MAX_PREFIX_PASSES: usize = 3;
const MAX_SUFFIX_PASSES: usize = 6;

/// Working state threaded through the cascade
#[derive(Debug, Clone, PartialEq)]
pub struct TitleDraft {
    pub title: String,
    pub confidence: f64,
    pub classification: Classification,
    pub year: Option<i32>,
    pub event: Option<String>,
    /// Names of the rules that changed the title, in order
    pub fired: Vec<&'static str>,
}

impl TitleDraft {
    pub fn new(raw: &str) -> Self {
        Self {
            title: raw.trim().to_string(),
            confidence: 1.0,
            classification: Classification::Normal,
            year: None,
            event: None,
            fired: Vec::new(),
        }
    }

    fn capped(mut self, rule: &'static str, cap: f64) -> Self {
        self.confidence = self.confidence.min(cap);
        self.fired.push(rule);
        self
    }
}

pub enum RuleOutcome {
    Rewrite(TitleDraft),
    Stop(ExtractionResult),
}

/// One step of the cascade
pub struct TitleRule {
    pub name: &'static str,
    pub apply: fn(&TitleDraft) -> Option<RuleOutcome>,
}

/// The cascade, in precedence order
pub static CASCADE: &[TitleRule] = &[
    TitleRule { name: "non_film", apply: non_film_rule },
    TitleRule { name: "decode_entities", apply: decode_entities_rule },
    TitleRule { name: "presents", apply: presents_rule },
    TitleRule { name: "sing_along", apply: sing_along_rule },
    TitleRule { name: "event_prefix", apply: event_prefix_rule },
    TitleRule { name: "suffix", apply: suffix_rule },
    TitleRule { name: "double_feature", apply: double_feature_rule },
    TitleRule { name: "cleanup", apply: cleanup_rule },
];

/// Run the full cascade over a raw listing string.
pub fn extract(raw: &str) -> ExtractionResult {
    let folded = CASCADE
        .iter()
        .try_fold(TitleDraft::new(raw), |draft, rule| match (rule.apply)(&draft) {
            None => ControlFlow::Continue(draft),
            Some(RuleOutcome::Rewrite(next)) => ControlFlow::Continue(next),
            Some(RuleOutcome::Stop(result)) => ControlFlow::Break(result),
        });

    match folded {
        ControlFlow::Break(result) => result,
        ControlFlow::Continue(draft) => finish(raw, draft),
    }
}

/// Turn the final draft into a result, splitting off any version suffix.
pub fn finish(raw: &str, draft: TitleDraft) -> ExtractionResult {
    let mut title = draft.title;
    if title.is_empty() {
        // Everything was cruft; keep the listing rather than an empty title
        title = collapse_whitespace(raw);
    }
    let (canonical_title, version) = split_version(&title);
    let method = if draft.fired.is_empty() {
        ExtractionMethod::Passthrough
    } else {
        ExtractionMethod::Pattern
    };

    ExtractionResult {
        extracted_title: title,
        canonical_title,
        version,
        year: draft.year,
        event: draft.event,
        classification: draft.classification,
        confidence: draft.confidence.clamp(0.0, 1.0),
        method,
    }
}

/// Split "Apocalypse Now : Final Cut" into ("Apocalypse Now", Some("Final Cut")).
///
/// A bare trailing version phrase needs at least two words in front of it so
/// that films actually called "The Final Cut" survive.
pub fn split_version(title: &str) -> (String, Option<String>) {
    let Some(re) = VERSION_SUFFIX.as_ref() else {
        return (title.to_string(), None);
    };
    let Some(caps) = re.captures(title) else {
        return (title.to_string(), None);
    };
    let base = caps.name("base").map(|m| m.as_str().trim()).unwrap_or_default();
    let explicit_separator = caps
        .name("sep")
        .map(|m| !m.as_str().trim().is_empty())
        .unwrap_or(false);
    let base_words = base.split_whitespace().count();
    if base.is_empty() || (!explicit_separator && base_words < 2) {
        return (title.to_string(), None);
    }
    let version = caps.name("version").map(|m| m.as_str().trim().to_string());
    let base = base.trim_end_matches(|c: char| c == ':' || c == '-' || c.is_whitespace());
    (base.to_string(), version)
}

pub fn is_non_film(title: &str) -> bool {
    let trimmed = title.trim();
    if NON_FILM_EXEMPT.iter().any(|re| re.is_match(trimmed)) {
        return false;
    }
    NON_FILM.iter().any(|re| re.is_match(trimmed))
}

fn non_film_rule(draft: &TitleDraft) -> Option<RuleOutcome> {
    let decoded = decode_entities(&draft.title);
    if is_non_film(&decoded) {
        return Some(RuleOutcome::Stop(ExtractionResult::non_film(&decoded)));
    }
    None
}

fn decode_entities_rule(draft: &TitleDraft) -> Option<RuleOutcome> {
    let decoded = decode_entities(&draft.title);
    if decoded == draft.title {
        return None;
    }
    Some(RuleOutcome::Rewrite(TitleDraft {
        title: decoded,
        ..draft.clone()
    }))
}

/// Unescape HTML entities ("&amp;", "&#8217;") left behind by scrapers.
pub fn decode_entities(title: &str) -> String {
    if !(title.contains('&') && title.contains(';')) {
        return title.to_string();
    }
    // Escape markup first so the parser only ever sees text and entities
    let escaped = title.replace('<', "&lt;").replace('>', "&gt;");
    let fragment = scraper::Html::parse_fragment(&escaped);
    let text: String = fragment.root_element().text().collect();
    if text.trim().is_empty() {
        title.to_string()
    } else {
        text
    }
}

fn presents_rule(draft: &TitleDraft) -> Option<RuleOutcome> {
    let caps = PRESENTS.as_ref()?.captures(&draft.title)?;
    let title = caps.name("title")?.as_str().trim();
    if title.is_empty() {
        return None;
    }
    let presenter = caps.name("presenter").map(|m| m.as_str().trim().to_string());
    let mut next = draft.clone().capped("presents", PRESENTS_CONFIDENCE);
    next.title = title.to_string();
    next.event = next.event.or(presenter);
    Some(RuleOutcome::Rewrite(next))
}

fn sing_along_rule(draft: &TitleDraft) -> Option<RuleOutcome> {
    let title = SING_ALONG.iter().find_map(|re| {
        re.captures(&draft.title)
            .and_then(|caps| caps.name("title").map(|m| m.as_str().trim().to_string()))
            .filter(|t| !t.is_empty())
    })?;
    let mut next = draft.clone().capped("sing_along", SING_ALONG_CONFIDENCE);
    next.title = title;
    next.event = next.event.or_else(|| Some("Sing-along".to_string()));
    Some(RuleOutcome::Rewrite(next))
}

fn event_prefix_rule(draft: &TitleDraft) -> Option<RuleOutcome> {
    let mut next = draft.clone();
    let mut stripped_any = false;

    for _ in 0..MAX_PREFIX_PASSES {
        let found = PREFIX_RULES.iter().find_map(|rule| {
            rule.regex
                .find(&next.title)
                .filter(|m| m.end() < next.title.len())
                .map(|m| (rule.kind, m.end()))
        });
        let Some((kind, end)) = found else { break };

        let prefix = next.title[..end]
            .trim()
            .trim_end_matches(|c: char| matches!(c, ':' | '|' | '-' | '–' | '—'))
            .trim()
            .to_string();
        next.title = next.title[end..].trim().to_string();
        next.event = next.event.or(Some(prefix));
        next = match kind {
            PrefixKind::FestivalCompilation => {
                next.classification = Classification::Compilation;
                next.capped("compilation_prefix", COMPILATION_CONFIDENCE)
            }
            PrefixKind::LiveBroadcast => {
                next.classification = Classification::LiveBroadcast;
                next.capped("live_broadcast_prefix", PREFIX_CONFIDENCE)
            }
            PrefixKind::Series | PrefixKind::Format | PrefixKind::Festival | PrefixKind::Premiere => {
                next.capped("event_prefix", PREFIX_CONFIDENCE)
            }
        };
        stripped_any = true;
    }

    stripped_any.then_some(RuleOutcome::Rewrite(next))
}

fn suffix_rule(draft: &TitleDraft) -> Option<RuleOutcome> {
    let mut next = draft.clone();
    let mut stripped_any = false;

    for _ in 0..MAX_SUFFIX_PASSES {
        let found = SUFFIX_RULES.iter().find_map(|rule| {
            let caps = rule.regex.captures(&next.title)?;
            let whole = caps.get(0)?;
            if whole.start() == 0 {
                // Never strip the whole title
                return None;
            }
            let year = if rule.captures_year {
                caps.get(1).and_then(|m| m.as_str().parse::<i32>().ok())
            } else {
                None
            };
            Some((rule.name, whole.start(), year))
        });
        let Some((name, start, year)) = found else { break };

        next.title = next.title[..start].trim_end().to_string();
        if year.is_some() {
            next.year = year;
        }
        next = next.capped(name, SUFFIX_CONFIDENCE);
        stripped_any = true;
    }

    stripped_any.then_some(RuleOutcome::Rewrite(next))
}

fn double_feature_rule(draft: &TitleDraft) -> Option<RuleOutcome> {
    let caps = DOUBLE_FEATURE.as_ref()?.captures(&draft.title)?;
    let first = caps.name("first")?.as_str().trim();
    if first.is_empty() {
        return None;
    }
    let mut next = draft.clone().capped("double_feature", DOUBLE_FEATURE_CONFIDENCE);
    next.title = first.to_string();
    Some(RuleOutcome::Rewrite(next))
}

fn cleanup_rule(draft: &TitleDraft) -> Option<RuleOutcome> {
    let cleaned = clean_punctuation(&draft.title);
    if cleaned == draft.title {
        return None;
    }
    Some(RuleOutcome::Rewrite(TitleDraft {
        title: cleaned,
        ..draft.clone()
    }))
}

/// Collapse whitespace, strip wrapping quotes and dangling separators.
pub fn clean_punctuation(title: &str) -> String {
    let mut current = collapse_whitespace(title);
    loop {
        let before = current.clone();
        for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”'), ('‘', '’')] {
            if current.chars().count() >= 2 && current.starts_with(open) && current.ends_with(close) {
                let inner: String = {
                    let mut chars = current.chars();
                    chars.next();
                    chars.next_back();
                    chars.collect()
                };
                current = inner.trim().to_string();
            }
        }
        current = current
            .trim_end_matches(|c: char| matches!(c, ':' | '|' | '-' | '–' | '—' | ',' | '/') || c.is_whitespace())
            .trim_start_matches(|c: char| matches!(c, ':' | '|' | '-' | '–' | '—' | ',') || c.is_whitespace())
            .to_string();
        if current == before {
            return current;
        }
    }
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untouched_title_is_trusted_fully() {
        let result = extract("Paris, Texas");
        assert_eq!(result.extracted_title, "Paris, Texas");
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.method, ExtractionMethod::Passthrough);
        assert_eq!(result.classification, Classification::Normal);
    }

    #[test]
    fn picture_club_prefix_is_stripped_with_high_confidence() {
        let result = extract("Saturday Morning Picture Club: Song of the Sea");
        assert_eq!(result.extracted_title, "Song of the Sea");
        assert!(result.confidence >= 0.9);
        assert_eq!(result.classification, Classification::Normal);
        assert_eq!(result.event.as_deref(), Some("Saturday Morning Picture Club"));
    }

    #[test]
    fn nt_live_is_a_live_broadcast() {
        let result = extract("NT Live: Hamlet");
        assert_eq!(result.extracted_title, "Hamlet");
        assert_eq!(result.classification, Classification::LiveBroadcast);
    }

    #[test]
    fn encore_relay_keeps_year_out_of_title() {
        let result = extract("RBO Encore: Woolf Works (2026)");
        assert_eq!(result.extracted_title, "Woolf Works");
        assert_eq!(result.year, Some(2026));
        assert_eq!(result.classification, Classification::LiveBroadcast);
        assert!(result.confidence <= SUFFIX_CONFIDENCE);
    }

    #[test]
    fn version_suffix_stays_in_display_title() {
        let result = extract("Apocalypse Now : Final Cut");
        assert_eq!(result.extracted_title, "Apocalypse Now : Final Cut");
        assert_eq!(result.canonical_title, "Apocalypse Now");
        assert_eq!(result.version.as_deref(), Some("Final Cut"));
    }

    #[test]
    fn film_named_after_a_version_is_not_split() {
        let (canonical, version) = split_version("The Final Cut");
        assert_eq!(canonical, "The Final Cut");
        assert!(version.is_none());

        let (canonical, version) = split_version("Apocalypse Now Redux");
        assert_eq!(canonical, "Apocalypse Now");
        assert_eq!(version.as_deref(), Some("Redux"));
    }

    #[test]
    fn quiz_is_not_a_film() {
        let result = extract("Quiz of Rassilon");
        assert_eq!(result.classification, Classification::NonFilm);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn exempt_titles_are_films() {
        assert!(!is_non_film("Quiz Show"));
        assert!(!is_non_film("Official Competition"));
        assert!(is_non_film("Film Club Book Group"));
    }

    #[test]
    fn presents_takes_the_trailing_title() {
        let result = extract("Cigarette Burns presents Possession");
        assert_eq!(result.extracted_title, "Possession");
        assert_eq!(result.confidence, PRESENTS_CONFIDENCE);
    }

    #[test]
    fn singular_present_is_part_of_the_title() {
        for raw in ["Past Present Future", "A Christmas Present for Ebenezer"] {
            let result = extract(raw);
            assert_eq!(result.extracted_title, raw);
            assert_eq!(result.method, ExtractionMethod::Passthrough);
            assert_eq!(result.confidence, 1.0);
        }
        assert_eq!(extract("Cigarette Burns Presents: Possession").extracted_title, "Possession");
    }

    #[test]
    fn sing_along_variants() {
        assert_eq!(extract("Sing-A-Long-A Sound of Music").extracted_title, "Sound of Music");
        let result = extract("Mamma Mia! Sing-Along");
        assert_eq!(result.extracted_title, "Mamma Mia!");
        assert_eq!(result.confidence, SING_ALONG_CONFIDENCE);
    }

    #[test]
    fn compilation_prefix_caps_confidence() {
        let result = extract("LSFF: Animation Showcase");
        assert_eq!(result.classification, Classification::Compilation);
        assert_eq!(result.confidence, COMPILATION_CONFIDENCE);
    }

    #[test]
    fn premiere_marker_without_colon() {
        let result = extract("UK PREMIERE I Only Rest in the Storm");
        assert_eq!(result.extracted_title, "I Only Rest in the Storm");
    }

    #[test]
    fn suffixes_each_cap_confidence() {
        let result = extract("Vertigo (PG) + Q&A with the restorer");
        assert_eq!(result.extracted_title, "Vertigo");
        assert_eq!(result.confidence, SUFFIX_CONFIDENCE);

        let result = extract("Jaws - 50th Anniversary");
        assert_eq!(result.extracted_title, "Jaws");

        let result = extract("Stalker (4K Restoration)");
        assert_eq!(result.extracted_title, "Stalker");
    }

    #[test]
    fn double_feature_takes_the_first_film() {
        let result = extract("Alien + Aliens");
        assert_eq!(result.extracted_title, "Alien");
        assert_eq!(result.confidence, DOUBLE_FEATURE_CONFIDENCE);
    }

    #[test]
    fn qa_suffix_is_stripped_before_double_feature_split() {
        // Suffix rules run first, then the remaining "+" is a double bill
        let result = extract("Alien + Aliens + Q&A");
        assert_eq!(result.extracted_title, "Alien");
        assert_eq!(result.confidence, DOUBLE_FEATURE_CONFIDENCE);

        // A lone "+ Q&A" is consumed by the suffix rule and never split
        let result = extract("Aftersun + Q&A");
        assert_eq!(result.extracted_title, "Aftersun");
        assert_eq!(result.confidence, SUFFIX_CONFIDENCE);
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(decode_entities("Tom &amp; Jerry"), "Tom & Jerry");
        assert_eq!(decode_entities("Don&#8217;t Look Now"), "Don\u{2019}t Look Now");
        assert_eq!(decode_entities("Love <3 &amp; Hate"), "Love <3 & Hate");
        assert_eq!(extract("Tom &amp; Jerry").extracted_title, "Tom & Jerry");
    }

    #[test]
    fn wrapping_quotes_and_whitespace_are_cleaned() {
        assert_eq!(extract("  \"Withnail   and I\"  ").extracted_title, "Withnail and I");
    }

    #[test]
    fn stacked_prefixes_are_peeled() {
        let result = extract("Members' Screening: 35mm: Vertigo");
        assert_eq!(result.extracted_title, "Vertigo");
    }

    #[test]
    fn extraction_is_idempotent_on_its_output() {
        for raw in [
            "Saturday Morning Picture Club: Song of the Sea",
            "NT Live: Hamlet",
            "Apocalypse Now : Final Cut",
            "Vertigo (1958) (PG)",
            "Alien + Aliens",
            "Cigarette Burns presents Possession",
            "UK PREMIERE I Only Rest in the Storm",
        ] {
            let once = extract(raw);
            let twice = extract(&once.extracted_title);
            assert_eq!(twice.extracted_title, once.extracted_title, "not idempotent for {raw}");
        }
    }
}
