//! Pattern tables shared by the title cascade and the clean-title heuristic.
//!
//! Order inside each table is significant: the first matching entry wins.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

/// What kind of event series a stripped prefix belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixKind {
    /// Recurring cinema clubs and screening strands
    Series,
    /// Projection format markers ("35mm:", "IMAX:")
    Format,
    /// Theatre, opera and ballet relay brands
    LiveBroadcast,
    /// Festival shorts bundles; not a single film
    FestivalCompilation,
    /// Festival abbreviations used as a listing prefix
    Festival,
    /// "UK Premiere" style markers, separator optional
    Premiere,
}

pub struct PrefixRule {
    pub kind: PrefixKind,
    pub regex: Regex,
}

struct PrefixEntry {
    kind: PrefixKind,
    pattern: &'static str,
    separator_required: bool,
}

const fn entry(kind: PrefixKind, pattern: &'static str) -> PrefixEntry {
    PrefixEntry {
        kind,
        pattern,
        separator_required: true,
    }
}

const PREFIX_ENTRIES: &[PrefixEntry] = &[
    // Live relays first: "NT Live Encore" must not be read as a series called "NT"
    entry(PrefixKind::LiveBroadcast, r"(?:nt|national theatre) live(?: encore)?"),
    entry(PrefixKind::LiveBroadcast, r"rbo(?: encore| live)?"),
    entry(PrefixKind::LiveBroadcast, r"royal ballet (?:&|and) opera(?: live| encore)?"),
    entry(PrefixKind::LiveBroadcast, r"(?:roh|royal opera house)(?: live| encore)?"),
    entry(PrefixKind::LiveBroadcast, r"(?:the )?met opera(?: live| encore)?(?: in hd)?"),
    entry(PrefixKind::LiveBroadcast, r"met live in hd"),
    entry(PrefixKind::LiveBroadcast, r"bolshoi ballet(?: live| encore)?"),
    entry(PrefixKind::LiveBroadcast, r"(?:exhibition on screen|eos)"),
    entry(PrefixKind::LiveBroadcast, r"(?:globe on screen|rsc live)"),
    // Festival compilations
    entry(PrefixKind::FestivalCompilation, r"(?:lsff|london short film festival)"),
    entry(PrefixKind::FestivalCompilation, r"(?:bfi )?flare shorts"),
    entry(PrefixKind::FestivalCompilation, r"shorts?(?: programme| night| showcase)?"),
    entry(PrefixKind::FestivalCompilation, r"short film (?:showcase|programme|night)"),
    // Festival abbreviations
    entry(PrefixKind::Festival, r"(?:lff|bfi london film festival)"),
    entry(PrefixKind::Festival, r"bfi flare"),
    entry(PrefixKind::Festival, r"frightfest"),
    entry(PrefixKind::Festival, r"sundance london"),
    entry(PrefixKind::Festival, r"raindance"),
    entry(PrefixKind::Festival, r"doc ?'?n ?roll"),
    entry(PrefixKind::Festival, r"(?:sheffield )?doc ?/? ?fest"),
    entry(PrefixKind::Festival, r"open city docs"),
    entry(PrefixKind::Festival, r"kinoteka"),
    // Format markers
    entry(PrefixKind::Format, r"(?:16|35|70) ?mm"),
    entry(PrefixKind::Format, r"4k(?: restoration)?"),
    entry(PrefixKind::Format, r"imax(?: 70mm)?"),
    entry(PrefixKind::Format, r"(?:3d|4dx|screenx)"),
    entry(PrefixKind::Format, r"dolby (?:atmos|cinema)"),
    // Cinema clubs and strands
    entry(PrefixKind::Series, r"saturday morning picture club"),
    entry(PrefixKind::Series, r"(?:family|kids'?|children'?s) (?:film )?club"),
    entry(PrefixKind::Series, r"(?:film|cinema|movie|bad movie|queer film) club"),
    entry(PrefixKind::Series, r"(?:classic matinee|matinee classics?)"),
    entry(PrefixKind::Series, r"parent (?:&|and) baby(?: screening)?"),
    entry(PrefixKind::Series, r"carers? (?:&|and) bab(?:y|ies)"),
    entry(PrefixKind::Series, r"(?:relaxed|autism[- ]friendly|dementia[- ]friendly)(?: screening)?"),
    entry(PrefixKind::Series, r"silver screen"),
    entry(PrefixKind::Series, r"cult classics?"),
    entry(PrefixKind::Series, r"members'? screening"),
    entry(PrefixKind::Series, r"(?:sneak |secret )?preview"),
    entry(PrefixKind::Series, r"throwback(?: thursday)?"),
    entry(PrefixKind::Series, r"late night(?: horror| movies| classics)?"),
    entry(PrefixKind::Series, r"double (?:bill|feature)"),
    entry(PrefixKind::Series, r"(?:special|advance) screening"),
    PrefixEntry {
        kind: PrefixKind::Premiere,
        pattern: r"(?:uk|world|european|international|london|irish|scottish) premiere",
        separator_required: false,
    },
];

pub static PREFIX_RULES: Lazy<Vec<PrefixRule>> = Lazy::new(|| {
    PREFIX_ENTRIES
        .iter()
        .filter_map(|s| {
            let separator = if s.separator_required {
                r"\s*(?::|\||-|–|—)\s*"
            } else {
                r"\s*(?::|\||-|–|—)?\s+"
            };
            let pattern = format!(r"(?i)^\s*(?:{}){}", s.pattern, separator);
            match Regex::new(&pattern) {
                Ok(regex) => Some(PrefixRule { kind: s.kind, regex }),
                Err(e) => {
                    warn!("Skipping invalid prefix pattern {}: {}", s.pattern, e);
                    None
                }
            }
        })
        .collect()
});

/// Number of prefix entries, for checking that every pattern compiled
pub fn prefix_entry_count() -> usize {
    PREFIX_ENTRIES.len()
}

/// Listings that are not films at all
const NON_FILM_PATTERNS: &[&str] = &[
    r"(?i)\bquiz(?:zes)?\b",
    r"(?i)\b(?:reading|book) (?:group|club)\b",
    r"(?i)^competition\b",
    r"(?i)\b(?:short film|photography|screenwriting|film[- ]?making|poster|costume|fancy dress) competition\b",
    r"(?i)\bworkshop\b",
    r"(?i)\bmasterclass\b",
    r"(?i)\b(?:private|venue) hire\b",
    r"(?i)\bkaraoke\b",
    r"(?i)\bcomedy (?:night|club)\b",
    r"(?i)\bdj set\b",
    r"(?i)\bgift (?:card|voucher)s?\b",
    r"(?i)\bmembership\b",
    r"(?i)\bcinema (?:is )?closed\b",
    r"(?i)^closed\b",
    r"(?i)\bopen mic\b",
    r"(?i)\bbingo\b",
    r"(?i)\bwine tasting\b",
    r"(?i)\blife drawing\b",
];

/// Real film titles that would otherwise trip a non-film pattern
const NON_FILM_EXEMPTIONS: &[&str] = &[
    r"(?i)^quiz show(?:\s*\(1994\))?$",
    r"(?i)^official competition(?:\s*\(20\d{2}\))?$",
];

pub static NON_FILM: Lazy<Vec<Regex>> = Lazy::new(|| compile_all(NON_FILM_PATTERNS));
pub static NON_FILM_EXEMPT: Lazy<Vec<Regex>> = Lazy::new(|| compile_all(NON_FILM_EXEMPTIONS));

pub static PRESENTS: Lazy<Option<Regex>> =
    Lazy::new(|| compile_one(r"(?i)^(?P<presenter>.+?)\s+presents\s*:?\s+(?P<title>.+)$"));

const SING_ALONG_PATTERNS: &[&str] = &[
    r"(?i)^sing[\s-]*a[\s-]*long[\s-]*a\s+(?P<title>.+)$",
    r"(?i)^sing[\s-]*a[\s-]*long\s*(?::|-|–|—)\s*(?P<title>.+)$",
    r"(?i)^(?P<title>.+?)\s*(?:(?::|-|–|—|\()\s*)?sing[\s-]*a[\s-]*long(?:[\s-]*a)?(?:\s+screening)?\s*\)?$",
];

pub static SING_ALONG: Lazy<Vec<Regex>> = Lazy::new(|| compile_all(SING_ALONG_PATTERNS));

/// A trailing-cruft rule. `captures_year` marks the year placeholder rule.
pub struct SuffixRule {
    pub name: &'static str,
    pub regex: Regex,
    pub captures_year: bool,
}

const SUFFIX_ENTRIES: &[(&str, &str, bool)] = &[
    (
        "event_extra",
        r"(?i)\s*(?:\+|&|\bwith\b|\bplus\b|\band\b)\s+(?:(?:an?|live|recorded|extended|filmmaker|director|cast|special)\s+)*(?:q\s*&\s*a|q\s+and\s+a|qa|intro(?:duction)?|discussion|panel(?:\s+discussion)?|talk|in conversation|conversation|live score|live music|short films?|shorts)\b.*$",
        false,
    ),
    (
        "event_extra_separated",
        r"(?i)\s*(?:\(|\[|-|–|—|:|\|)\s*(?:with\s+|plus\s+|\+\s*)?(?:q\s*&\s*a|q\s+and\s+a|intro(?:duction)?|introduced by\b|discussion|panel discussion|director(?:'|’)?s? q\s*&\s*a|in conversation\b)[^)\]]*[)\]]?\s*$",
        false,
    ),
    (
        "bbfc_rating",
        r"(?i)\s*[(\[]\s*(?:u|pg|12a?|15|18|r18|tbc|ctbc)\s*\*?\s*[)\]]\s*$",
        false,
    ),
    (
        "format_parenthetical",
        r"(?i)\s*[(\[][^)\]]*\b(?:restor(?:ation|ed)|remaster(?:ed)?|4k|2k|(?:16|35|70)\s?mm|digital|re-?release|subtitled|dubbed|original version|imax|3d)\b[^)\]]*[)\]]\s*$",
        false,
    ),
    (
        "format_separated",
        r"(?i)\s*(?:-|–|—|:|\|)\s*(?:new\s+)?(?:4k\s+)?(?:restoration|remaster(?:ed)?|(?:16|35|70)\s?mm|4k|re-?release|subtitled|dubbed)\s*$",
        false,
    ),
    (
        "anniversary",
        r"(?i)\s*(?:\(|\[|-|–|—|:|\|)?\s*(?:\d{1,3}(?:st|nd|rd|th)|tenth|twentieth|twenty-fifth|thirtieth|fortieth|fiftieth|sixtieth)\s+anniversary(?:\s+(?:screening|edition|re-?release|restoration))?\s*[)\]]?\s*$",
        false,
    ),
    (
        "screening_type",
        r"(?i)\s*(?:\(|\[|-|–|—|:|\|)\s*(?:parent\s*(?:&|and)\s*baby|relaxed|autism[- ]friendly|dementia[- ]friendly|subtitled|hoh|audio described)(?:\s+screening)?\s*[)\]]?\s*$",
        false,
    ),
    (
        "year_placeholder",
        r"\s*[(\[]\s*((?:19|20)\d{2})\s*[)\]]\s*$",
        true,
    ),
];

pub static SUFFIX_RULES: Lazy<Vec<SuffixRule>> = Lazy::new(|| {
    SUFFIX_ENTRIES
        .iter()
        .filter_map(|(name, pattern, captures_year)| match Regex::new(pattern) {
            Ok(regex) => Some(SuffixRule {
                name,
                regex,
                captures_year: *captures_year,
            }),
            Err(e) => {
                warn!("Skipping invalid suffix pattern {}: {}", name, e);
                None
            }
        })
        .collect()
});

pub fn suffix_entry_count() -> usize {
    SUFFIX_ENTRIES.len()
}

pub static DOUBLE_FEATURE: Lazy<Option<Regex>> =
    Lazy::new(|| compile_one(r"^(?P<first>.+?)\s+\+\s+(?P<second>.+)$"));

/// Version suffixes kept for display but stripped for matching
pub static VERSION_SUFFIX: Lazy<Option<Regex>> = Lazy::new(|| {
    compile_one(
        r"(?i)^(?P<base>.+?)(?P<sep>\s*(?::|-|–|—|\(|\[)\s*|\s+)(?P<version>(?:the\s+)?(?:final cut|director(?:'|’)?s cut|extended (?:edition|cut)|redux|theatrical cut|ultimate (?:edition|cut)|special edition|international cut|black (?:and|&) chrome(?: edition)?))\s*[)\]]?$",
    )
});

pub static TRAILING_YEAR: Lazy<Option<Regex>> =
    Lazy::new(|| compile_one(r"[(\[]\s*(?:19|20)\d{2}\s*[)\]]\s*$"));

/// Words the clean-title heuristic treats as event cruft
pub static EVENT_WORDS: Lazy<Option<Regex>> = Lazy::new(|| {
    compile_one(
        r"(?i)\b(?:presents|screening|premiere|double bill|double feature|marathon|all-nighter|encore|q\s*&\s*a|intro|introduced by|in conversation|sing[\s-]*a[\s-]*long)\b",
    )
});

/// Franchises whose titles legitimately carry a short phrase before a colon
pub const FRANCHISE_ALLOW_LIST: &[&str] = &[
    "star wars",
    "star trek",
    "john wick",
    "blade runner",
    "mission: impossible",
    "mission impossible",
    "indiana jones",
    "harry potter",
    "mad max",
    "alien",
    "aliens",
    "predator",
    "dune",
    "the matrix",
    "kill bill",
    "pirates of the caribbean",
    "the hobbit",
    "the lord of the rings",
    "lord of the rings",
    "spider-man",
    "avengers",
    "guardians of the galaxy",
    "captain america",
    "wallace & gromit",
    "wallace and gromit",
    "shaun the sheep",
    "paddington",
    "despicable me",
    "toy story",
    "jurassic world",
    "fantastic beasts",
    "rogue one",
    "tron",
    "terminator",
    "godzilla",
    "mobile suit gundam",
    "evangelion",
    "batman",
];

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| compile_one(p)).collect()
}

fn compile_one(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Skipping invalid title pattern {}: {}", pattern, e);
            None
        }
    }
}
