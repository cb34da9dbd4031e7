//! Whole-word phrase matching for wake words and scene exit conditions.
//!
//! A phrase only counts when it appears as a standalone word and is not
//! enclosed in quotation marks, so the model merely *mentioning* the phrase
//! (`He said "potatoes"`) does not fire it. The regex crates carry no
//! lookbehind, so the quote exclusion inspects the characters adjacent to
//! each match instead.

use anyhow::{Context, Result};
use regex_lite::Regex;

/// Quote characters that suppress a match: ASCII double quote plus the
/// curly double quotes. Single quotes are deliberately excluded so
/// apostrophes in contractions don't swallow legitimate matches.
const QUOTES: [char; 3] = ['"', '\u{201C}', '\u{201D}'];

pub struct PhraseMatcher {
    phrase: String,
    regex: Regex,
}

impl PhraseMatcher {
    pub fn new(phrase: &str) -> Result<Self> {
        let pattern = format!(r"(?i)\b{}\b", regex_lite::escape(phrase.trim()));
        let regex = Regex::new(&pattern)
            .with_context(|| format!("invalid phrase pattern for {:?}", phrase))?;
        Ok(Self {
            phrase: phrase.trim().to_string(),
            regex,
        })
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Case-insensitive whole-word match, rejecting occurrences with a quote
    /// character immediately before or after the word.
    pub fn matches_unquoted(&self, text: &str) -> bool {
        for found in self.regex.find_iter(text) {
            let before = text[..found.start()].chars().next_back();
            let after = text[found.end()..].chars().next();
            let quoted = before.map(|c| QUOTES.contains(&c)).unwrap_or(false)
                || after.map(|c| QUOTES.contains(&c)).unwrap_or(false);
            if !quoted {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(phrase: &str) -> PhraseMatcher {
        PhraseMatcher::new(phrase).unwrap()
    }

    #[test]
    fn matches_whole_word_in_sentence() {
        assert!(matcher("potatoes").matches_unquoted("Say potatoes to win"));
    }

    #[test]
    fn match_is_case_insensitive() {
        assert!(matcher("potatoes").matches_unquoted("SAY POTATOES TO WIN"));
        assert!(matcher("Potatoes").matches_unquoted("say potatoes now"));
    }

    #[test]
    fn quoted_occurrence_does_not_match() {
        assert!(!matcher("potatoes").matches_unquoted(r#"He said "potatoes""#));
    }

    #[test]
    fn smart_quoted_occurrence_does_not_match() {
        assert!(!matcher("potatoes").matches_unquoted("He said \u{201C}potatoes\u{201D} again"));
    }

    #[test]
    fn later_unquoted_occurrence_still_matches() {
        assert!(matcher("potatoes").matches_unquoted(r#"Not "potatoes" but potatoes it is"#));
    }

    #[test]
    fn partial_word_does_not_match() {
        assert!(!matcher("art").matches_unquoted("He departed quickly"));
    }

    #[test]
    fn multi_word_phrase_matches() {
        assert!(matcher("let the game begin").matches_unquoted("Very well. Let the game begin!"));
    }
}
