use isolang::Language;
use serde::{Deserialize, Serialize};

/// Language utilities for chapter sources
///
/// This module turns a free-text declared source language ("Chinese", "zh",
/// "tiếng Hàn", ...) into one of the language classes the validator and the
/// batch assembler understand, and detects characters still written in an
/// untranslated source script.
/// Language class of a declared source language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageClass {
    Vietnamese,
    English,
    Krjp,
    Chinese,
}

impl LanguageClass {
    /// All classes, in classification order
    pub const ALL: [LanguageClass; 4] = [
        LanguageClass::Vietnamese,
        LanguageClass::English,
        LanguageClass::Krjp,
        LanguageClass::Chinese,
    ];

    /// Lowercase identifier used in config files and diagnostics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vietnamese => "vietnamese",
            Self::English => "english",
            Self::Krjp => "krjp",
            Self::Chinese => "chinese",
        }
    }

    /// Language-name fragments that select this class
    fn fragments(&self) -> &'static [&'static str] {
        match self {
            Self::Vietnamese => &["vietnam", "việt", "viet"],
            Self::English => &["english", "tiếng anh", "英语", "英文"],
            Self::Krjp => &[
                "korean", "japanese", "hàn", "nhật", "한국", "日本", "韓", "韩",
            ],
            Self::Chinese => &[
                "chinese", "mandarin", "cantonese", "trung", "中文", "汉语", "漢語",
            ],
        }
    }

    /// Content class implied by this language class
    pub fn content_class(&self) -> ContentClass {
        match self {
            Self::Vietnamese | Self::English => ContentClass::Simple,
            Self::Krjp | Self::Chinese => ContentClass::Complex,
        }
    }
}

impl std::fmt::Display for LanguageClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Batch-sizing class of the content being translated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentClass {
    /// Latin-script sources
    Simple,
    /// CJK sources, or text that still carries raw source script
    Complex,
}

/// Resolve a bare ISO 639-1 / 639-2 code to its English language name
///
/// Region suffixes (`zh-CN`, `pt_BR`) are ignored. Returns `None` when the
/// hint is not a code.
pub fn resolve_language_name(hint: &str) -> Option<&'static str> {
    let trimmed = hint.trim().to_lowercase();
    let code = trimmed.split(['-', '_']).next().unwrap_or_default();

    let language = match code.len() {
        2 => Language::from_639_1(code),
        // ISO 639-2/B "chi" differs from 639-2/T "zho"
        3 if code == "chi" => Language::from_639_3("zho"),
        3 => Language::from_639_3(code),
        _ => None,
    }?;

    Some(language.to_name())
}

/// Classify a declared source language hint
///
/// Matching is a case-insensitive substring search against known language
/// name fragments. ISO codes are resolved to names first. Hints that match
/// nothing fall back to `Chinese`.
pub fn classify_language(hint: &str) -> LanguageClass {
    let lowered = hint.trim().to_lowercase();
    let resolved = resolve_language_name(&lowered)
        .map(|name| name.to_lowercase())
        .unwrap_or(lowered);

    LanguageClass::ALL
        .into_iter()
        .find(|class| {
            class
                .fragments()
                .iter()
                .any(|fragment| resolved.contains(fragment))
        })
        .unwrap_or(LanguageClass::Chinese)
}

/// Whether a character belongs to a CJK source script (Han, kana, Hangul)
pub fn is_raw_char(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{309F}'     // Hiragana
        | '\u{30A0}'..='\u{30FF}'   // Katakana
        | '\u{31F0}'..='\u{31FF}'   // Katakana phonetic extensions
        | '\u{3400}'..='\u{4DBF}'   // CJK extension A
        | '\u{4E00}'..='\u{9FFF}'   // CJK unified ideographs
        | '\u{F900}'..='\u{FAFF}'   // CJK compatibility ideographs
        | '\u{1100}'..='\u{11FF}'   // Hangul jamo
        | '\u{3130}'..='\u{318F}'   // Hangul compatibility jamo
        | '\u{AC00}'..='\u{D7AF}'   // Hangul syllables
        | '\u{20000}'..='\u{2A6DF}' // CJK extension B
    )
}

/// Count characters in a translated text that are still in raw source script
pub fn count_raw_chars(text: &str) -> usize {
    text.chars().filter(|c| is_raw_char(*c)).count()
}

/// Whether a single line still contains untranslated source script
pub fn line_has_raw(line: &str) -> bool {
    line.chars().any(is_raw_char)
}
