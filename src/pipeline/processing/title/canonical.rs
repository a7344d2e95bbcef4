//! Matching keys derived from cleaned titles.

use sha2::{Digest, Sha256};

/// Lowercase, spell out "&", drop punctuation and collapse whitespace.
///
/// Articles are kept: "The Thing" and "Thing" are different films.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase().replace('&', " and ");
    let kept: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 hex of the normalized title, plus `|year` when a year is known.
pub fn canonical_key(title: &str, year: Option<i32>) -> String {
    let mut material = normalize_title(title);
    if let Some(year) = year {
        material.push('|');
        material.push_str(&year.to_string());
    }
    let mut hasher = Sha256::new();
    hasher.update(material.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_ignores_case_and_punctuation() {
        assert_eq!(normalize_title("  Tom & Jerry!  "), "tom and jerry");
        assert_eq!(normalize_title("Tom and Jerry"), "tom and jerry");
        assert_eq!(normalize_title("Spider-Man: No Way Home"), "spider man no way home");
        assert_eq!(normalize_title("The Thing"), "the thing");
    }

    #[test]
    fn key_is_stable_and_year_sensitive() {
        let a = canonical_key("Dune", Some(2021));
        let b = canonical_key("DUNE", Some(2021));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, canonical_key("Dune", Some(1984)));
        assert_ne!(a, canonical_key("Dune", None));
    }
}
