//! Cheap check for titles that need no further extraction.

use super::patterns::{
    EVENT_WORDS, FRANCHISE_ALLOW_LIST, PREFIX_RULES, PRESENTS, SING_ALONG, SUFFIX_RULES, TRAILING_YEAR,
};
use super::split_version;

pub const MAX_CLEAN_LENGTH: usize = 60;
const SUSPICIOUS_PRE_COLON_WORDS: usize = 2;

/// True when `title` looks like a bare film title.
///
/// Version suffixes are allowed, so "Apocalypse Now : Final Cut" counts as clean.
pub fn is_likely_clean(title: &str) -> bool {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return false;
    }
    let (base, _) = split_version(trimmed);
    let base = base.as_str();

    if base.chars().count() > MAX_CLEAN_LENGTH {
        return false;
    }
    if is_shouting(base) {
        return false;
    }
    if TRAILING_YEAR.as_ref().map(|re| re.is_match(base)).unwrap_or(false) {
        return false;
    }
    if base.contains('+') {
        return false;
    }
    if EVENT_WORDS.as_ref().map(|re| re.is_match(base)).unwrap_or(false) {
        return false;
    }
    if PRESENTS.as_ref().map(|re| re.is_match(base)).unwrap_or(false) {
        return false;
    }
    if SING_ALONG.iter().any(|re| re.is_match(base)) {
        return false;
    }
    if PREFIX_RULES.iter().any(|rule| rule.regex.is_match(base)) {
        return false;
    }
    if SUFFIX_RULES
        .iter()
        .any(|rule| rule.regex.find(base).map(|m| m.start() > 0).unwrap_or(false))
    {
        return false;
    }
    !suspicious_colon(base)
}

/// A short phrase before a colon is usually a series name, unless it's a franchise.
fn suspicious_colon(title: &str) -> bool {
    let Some((before, after)) = title.split_once(':') else {
        return false;
    };
    if after.trim().is_empty() {
        return true;
    }
    if before.split_whitespace().count() > SUSPICIOUS_PRE_COLON_WORDS {
        return false;
    }
    let lowered = title.to_lowercase();
    let before_lowered = before.trim().to_lowercase();
    !FRANCHISE_ALLOW_LIST
        .iter()
        .any(|franchise| starts_with_franchise(&lowered, franchise) || before_lowered == *franchise)
}

/// "alien: romulus" names the franchise, "alienation club: heat" does not
fn starts_with_franchise(lowered: &str, franchise: &str) -> bool {
    lowered
        .strip_prefix(franchise)
        .map(|rest| rest.is_empty() || rest.starts_with(':') || rest.starts_with(char::is_whitespace))
        .unwrap_or(false)
}

fn is_shouting(title: &str) -> bool {
    let letters: Vec<char> = title.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() > 3 && letters.iter().all(|c| c.is_uppercase())
}
