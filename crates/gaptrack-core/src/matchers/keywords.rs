//! Fixed keyword tables for the built-in matchers.
//!
//! Matching is plain substring containment over case-folded input. Changing
//! an entry changes which inputs match, so new behaviour belongs in a new
//! rule type rather than an edit here.

use lazy_static::lazy_static;

lazy_static! {
    pub static ref TEMPORAL_KEYWORDS: Vec<&'static str> = vec![
        "yesterday", "tomorrow", "next week", "last month", "ago", "later"
    ];

    pub static ref SCOPE_QUANTIFIERS: Vec<&'static str> = vec![
        "all", "every", "some", "none", "most", "few"
    ];

    pub static ref VAGUE_REFERENCES: Vec<&'static str> = vec![
        "it", "that", "this", "there", "place", "thing"
    ];

    pub static ref CONTRADICTORY_PAIRS: Vec<(&'static str, &'static str)> = vec![
        ("yes", "no"),
        ("always", "never"),
        ("all", "none"),
        ("before", "after"),
        ("increase", "decrease"),
    ];

    pub static ref AMBIGUOUS_PRONOUNS: Vec<&'static str> = vec![
        "he", "she", "it", "they", "them", "this", "that"
    ];
}

/// Table entries contained in `folded`, in table order.
pub fn hits<'a>(folded: &'a str, table: &'a [&'static str]) -> impl Iterator<Item = &'static str> + 'a {
    table.iter().copied().filter(move |kw| folded.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hits_preserve_table_order() {
        let found: Vec<&str> = hits("later, yesterday", &TEMPORAL_KEYWORDS).collect();
        assert_eq!(found, vec!["yesterday", "later"]);
    }

    #[test]
    fn test_hits_are_substring_based() {
        // "within" contains "it"
        let found: Vec<&str> = hits("within", &VAGUE_REFERENCES).collect();
        assert_eq!(found, vec!["it"]);
    }
}
