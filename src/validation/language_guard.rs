/*!
 * Wrong-language detection for translated chapters.
 *
 * Some endpoints answer a translation request by back-translating into
 * English. When the translation collaborator flags a batch as suspect, the
 * scheduler asks a `LanguageGuard` whether each result really looks like
 * the wrong language before accepting it.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static WORD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z']+").expect("word regex is valid"));

static ENGLISH_STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "of", "to", "is", "was", "he", "she", "it", "that", "in", "his", "her",
        "you", "with", "for", "on", "at", "they", "be", "had", "have", "not", "but", "this",
        "from", "were", "are", "said", "would", "could", "what", "there", "their", "him",
    ]
    .into_iter()
    .collect()
});

/// Pluggable classifier for "this text is actually in the wrong language"
pub trait LanguageGuard: Send + Sync {
    /// Returns true when the text looks like it was written in the wrong language
    fn looks_like_wrong_language(&self, text: &str) -> bool;
}

/// Default guard: flags text dominated by English function words
#[derive(Debug, Clone)]
pub struct EnglishStopwordGuard {
    /// Fraction of whitespace-separated tokens that must be English stop words
    pub min_stopword_ratio: f64,
    /// Texts with fewer tokens are never flagged
    pub min_tokens: usize,
}

impl Default for EnglishStopwordGuard {
    fn default() -> Self {
        Self {
            min_stopword_ratio: 0.2,
            min_tokens: 20,
        }
    }
}

impl LanguageGuard for EnglishStopwordGuard {
    fn looks_like_wrong_language(&self, text: &str) -> bool {
        let tokens = text.split_whitespace().count();
        if tokens < self.min_tokens {
            return false;
        }

        let hits = WORD_REGEX
            .find_iter(text)
            .filter(|word| ENGLISH_STOPWORDS.contains(word.as_str().to_lowercase().as_str()))
            .count();

        hits as f64 / tokens as f64 >= self.min_stopword_ratio
    }
}
