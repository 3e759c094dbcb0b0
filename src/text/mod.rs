// Dictionary-based profanity detection for plain text.
//
// Matching is whole-token and case-insensitive: the text is lowercased and
// split into [a-z0-9$@] runs. Dictionary entries are split the same way, so
// an entry such as "blow job" or "f*ck" matches as a run of consecutive
// tokens. The dictionary is built once and shared read-only behind an Arc,
// so cloning a TextModerator is cheap and safe across tasks.

pub mod wordlist;

use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use regex_lite::Regex;
use tracing::{debug, warn};

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[a-z0-9$@]+").expect("valid token regex"));

/// Single-token words plus multi-token phrases, all lowercase.
#[derive(Debug, Clone, Default)]
struct Dictionary {
    words: HashSet<String>,
    phrases: HashSet<Vec<String>>,
}

impl Dictionary {
    fn insert(&mut self, entry: &str) {
        let entry = entry.trim();
        if entry.is_empty() {
            return;
        }
        let mut tokens: Vec<String> = TOKEN
            .find_iter(&entry.to_lowercase())
            .map(|m| m.as_str().to_string())
            .collect();
        match tokens.len() {
            0 => warn!(entry, "Word list entry has no letters or digits, skipping"),
            1 => {
                self.words.extend(tokens.pop());
            }
            _ => {
                self.phrases.insert(tokens);
            }
        }
    }

    fn len(&self) -> usize {
        self.words.len() + self.phrases.len()
    }

    /// Token count of the longest entry that `tokens` starts with.
    fn match_at(&self, tokens: &[&str]) -> Option<usize> {
        let phrase = self
            .phrases
            .iter()
            .filter(|p| {
                p.len() <= tokens.len() && p.iter().zip(tokens).all(|(w, t)| w.as_str() == *t)
            })
            .map(Vec::len)
            .max();
        phrase.or_else(|| {
            tokens
                .first()
                .filter(|t| self.words.contains(**t))
                .map(|_| 1)
        })
    }

    /// Non-overlapping token ranges covered by dictionary entries, longest first.
    fn matches(&self, tokens: &[&str]) -> Vec<Range<usize>> {
        let mut found = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            match self.match_at(&tokens[i..]) {
                Some(n) => {
                    found.push(i..i + n);
                    i += n;
                }
                None => i += 1,
            }
        }
        found
    }
}

/// Profanity detector over a fixed, read-only dictionary.
#[derive(Debug, Clone)]
pub struct TextModerator {
    dictionary: Arc<Dictionary>,
}

impl Default for TextModerator {
    fn default() -> Self {
        Self::with_words(wordlist::DEFAULT_WORDS.iter().copied())
    }
}

impl TextModerator {
    /// Build a moderator from an explicit word list (replaces the default list).
    ///
    /// Entries with no letters or digits can never match and are dropped
    /// with a warning.
    pub fn with_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dictionary = Dictionary::default();
        for word in words {
            dictionary.insert(word.as_ref());
        }
        Self {
            dictionary: Arc::new(dictionary),
        }
    }

    /// Return a moderator whose dictionary is this one plus `extra`.
    pub fn extend<I, S>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dictionary = (*self.dictionary).clone();
        for word in extra {
            dictionary.insert(word.as_ref());
        }
        Self {
            dictionary: Arc::new(dictionary),
        }
    }

    /// Default dictionary plus the words in `path` (one per line, `#` comments).
    pub fn with_wordlist_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read word list {}", path.display()))?;
        let extra = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));
        let moderator = Self::default().extend(extra);
        debug!(
            path = %path.display(),
            words = moderator.len(),
            "Loaded profanity word list"
        );
        Ok(moderator)
    }

    /// Number of dictionary entries.
    pub fn len(&self) -> usize {
        self.dictionary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when any token, or run of tokens, of `text` is a dictionary entry.
    ///
    /// Empty or absent text is never flagged.
    pub fn moderate_text(&self, text: Option<&str>) -> bool {
        let Some(text) = text.filter(|t| !t.is_empty()) else {
            return false;
        };
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = TOKEN.find_iter(&lowered).map(|m| m.as_str()).collect();
        let flagged = (0..tokens.len()).any(|i| self.dictionary.match_at(&tokens[i..]).is_some());
        if flagged {
            debug!(text_preview = %truncate_chars(text, 50), "Text matched profanity list");
        }
        flagged
    }

    /// Replace every matched token in `text` with `*` of the same length.
    pub fn clean(&self, text: &str) -> String {
        let spans: Vec<Range<usize>> = TOKEN.find_iter(text).map(|m| m.range()).collect();
        let lowered: Vec<String> = spans.iter().map(|r| text[r.clone()].to_lowercase()).collect();
        let tokens: Vec<&str> = lowered.iter().map(String::as_str).collect();

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for found in self.dictionary.matches(&tokens) {
            for span in &spans[found] {
                out.push_str(&text[last..span.start]);
                out.push_str(&"*".repeat(text[span.clone()].chars().count()));
                last = span.end;
            }
        }
        out.push_str(&text[last..]);
        out
    }
}

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Respects UTF-8 character boundaries, so it is safe for log previews of
/// arbitrary user text.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_absent_text_not_flagged() {
        let moderator = TextModerator::default();
        assert!(!moderator.moderate_text(None));
        assert!(!moderator.moderate_text(Some("")));
    }

    #[test]
    fn test_case_variations_flagged() {
        let moderator = TextModerator::default();
        for text in ["shit happens", "SHIT happens", "what the Fuck", "you BiTcH!"] {
            assert!(moderator.moderate_text(Some(text)), "expected flag for {text:?}");
        }
    }

    #[test]
    fn test_clean_text_not_flagged() {
        let moderator = TextModerator::default();
        assert!(!moderator.moderate_text(Some("Join us for the picnic on Saturday")));
    }

    #[test]
    fn test_substring_of_clean_word_not_flagged() {
        // "class" and "scunthorpe" contain dictionary words but are not words themselves
        let moderator = TextModerator::default();
        assert!(!moderator.moderate_text(Some("Classic Scunthorpe assessment")));
    }

    #[test]
    fn test_punctuation_does_not_hide_words() {
        let moderator = TextModerator::default();
        assert!(moderator.moderate_text(Some("well...shit.")));
    }

    #[test]
    fn test_extend_adds_words_without_mutating_original() {
        let base = TextModerator::with_words(["darn"]);
        let extended = base.extend(["Heck"]);
        assert!(extended.moderate_text(Some("oh heck")));
        assert!(!base.moderate_text(Some("oh heck")));
        assert_eq!(extended.len(), 2);
    }

    #[test]
    fn test_clean_masks_words_preserving_length() {
        let moderator = TextModerator::with_words(["darn"]);
        assert_eq!(moderator.clean("Darn it, darn!"), "**** it, ****!");
    }

    #[test]
    fn test_wordlist_file_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.txt");
        std::fs::write(&path, "# local additions\n\nfrak\n  gorram  \n").unwrap();

        let moderator = TextModerator::with_wordlist_file(&path).unwrap();
        assert!(moderator.moderate_text(Some("Frak this")));
        assert!(moderator.moderate_text(Some("gorram ship")));
        assert!(moderator.moderate_text(Some("shit")), "defaults still present");
        assert!(!moderator.moderate_text(Some("# local additions")));
    }

    #[test]
    fn test_multi_token_entries_match_as_sequences() {
        let moderator = TextModerator::with_words(["blow job", "f*ck"]);
        assert_eq!(moderator.len(), 2);
        assert!(moderator.moderate_text(Some("blow job")));
        assert!(moderator.moderate_text(Some("a BLOW-JOB joke")));
        assert!(moderator.moderate_text(Some("f*ck off")));
        assert!(!moderator.moderate_text(Some("blow out the candles")));
        assert!(!moderator.moderate_text(Some("job done")));
    }

    #[test]
    fn test_clean_masks_phrase_tokens() {
        let moderator = TextModerator::with_words(["blow job", "darn"]);
        assert_eq!(moderator.clean("Blow job, darn."), "**** ***, ****.");
        assert_eq!(moderator.clean("blow the horn"), "blow the horn");
    }

    #[test]
    fn test_entries_without_letters_are_dropped() {
        let moderator = TextModerator::with_words(["***", "--", "frak"]);
        assert_eq!(moderator.len(), 1);
        assert!(moderator.moderate_text(Some("frak")));
    }

    #[test]
    fn test_wordlist_file_phrases_are_matched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.txt");
        std::fs::write(&path, "son of a gun\nbad-word\n").unwrap();

        let moderator = TextModerator::with_wordlist_file(&path).unwrap();
        assert!(moderator.moderate_text(Some("You son of a gun!")));
        assert!(moderator.moderate_text(Some("such a Bad Word")));
        assert!(!moderator.moderate_text(Some("a son of mine")));
    }

    #[test]
    fn test_wordlist_file_missing_is_error() {
        let result = TextModerator::with_wordlist_file(Path::new("/nonexistent/words.txt"));
        assert!(result.is_err());
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
