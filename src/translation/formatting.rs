/*!
 * Baseline post-formatting for translated chapters.
 *
 * Applied after line repair and by the final automation step. The pass is
 * idempotent: formatting an already formatted text returns it unchanged.
 */

use once_cell::sync::Lazy;
use regex::Regex;

/// Trailing spaces and tabs at the end of a line
static TRAILING_WHITESPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)[ \t\u{3000}]+$").expect("valid trailing whitespace regex"));

/// Three or more line breaks (with blank lines in between)
static BLANK_RUN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid blank run regex"));

/// Full-width punctuation and its ASCII replacement
const PUNCTUATION_MAP: &[(char, char)] = &[
    ('，', ','),
    ('。', '.'),
    ('！', '!'),
    ('？', '?'),
    ('：', ':'),
    ('；', ';'),
    ('、', ','),
    ('（', '('),
    ('）', ')'),
    ('【', '['),
    ('】', ']'),
    ('“', '"'),
    ('”', '"'),
    ('‘', '\''),
    ('’', '\''),
];

/// Replacements that need a space before a following word
const SENTENCE_PUNCTUATION: &[char] = &[',', '.', '!', '?', ':', ';'];

/// Baseline formatter for translated text
pub struct TextFormatter;

impl TextFormatter {
    /// Apply every baseline rule
    pub fn format(text: &str) -> String {
        let mut result = Self::normalize_line_endings(text);
        result = Self::replace_fullwidth_punctuation(&result);
        result = Self::collapse_inline_spaces(&result);
        result = TRAILING_WHITESPACE_REGEX.replace_all(&result, "").into_owned();
        result = BLANK_RUN_REGEX.replace_all(&result, "\n\n").into_owned();
        result.trim_matches('\n').to_string()
    }

    /// Convert CRLF and lone CR to LF
    pub fn normalize_line_endings(text: &str) -> String {
        text.replace("\r\n", "\n").replace('\r', "\n")
    }

    /// Map full-width CJK punctuation to ASCII
    ///
    /// Sentence punctuation gets a space when a word follows it directly.
    pub fn replace_fullwidth_punctuation(text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            let Some((_, ascii)) = PUNCTUATION_MAP.iter().find(|(from, _)| *from == c) else {
                result.push(c);
                continue;
            };
            result.push(*ascii);
            if SENTENCE_PUNCTUATION.contains(ascii) && chars.peek().is_some_and(|next| next.is_alphanumeric()) {
                result.push(' ');
            }
        }
        result
    }

    /// Collapse runs of spaces inside lines, keeping indentation
    fn collapse_inline_spaces(text: &str) -> String {
        text.split('\n')
            .map(|line| {
                let content = line.trim_start_matches([' ', '\t']);
                let indent = &line[..line.len() - content.len()];
                let mut collapsed = String::with_capacity(line.len());
                collapsed.push_str(indent);
                let mut previous_space = false;
                for c in content.chars() {
                    if c == ' ' {
                        if !previous_space {
                            collapsed.push(c);
                        }
                        previous_space = true;
                    } else {
                        collapsed.push(c);
                        previous_space = false;
                    }
                }
                collapsed
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
