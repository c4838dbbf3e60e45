//! Stable, lossless text tokenization.
//!
//! A token is either a single CJK ideograph / kana / hangul syllable, a run
//! of other non-whitespace characters together with the whitespace that
//! follows it, or a run of leading whitespace. Concatenating the tokens of a
//! text always reproduces the text exactly.

use std::sync::LazyLock;

use regex::Regex;

static TOKEN_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?:[\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}]|[^\s\p{Han}\p{Hiragana}\p{Katakana}\p{Hangul}]+)\s*|\s+",
    )
    .ok()
});

#[derive(Debug, Clone, Copy, Default)]
pub struct Tokenizer;

impl Tokenizer {
    pub fn new() -> Self {
        Self
    }

    pub fn tokenize<'a>(&self, text: &'a str) -> Vec<&'a str> {
        match TOKEN_PATTERN.as_ref() {
            Some(re) => re.find_iter(text).map(|m| m.as_str()).collect(),
            None if text.is_empty() => Vec::new(),
            None => vec![text],
        }
    }

    pub fn count(&self, text: &str) -> u32 {
        match TOKEN_PATTERN.as_ref() {
            Some(re) => re.find_iter(text).count() as u32,
            None => u32::from(!text.is_empty()),
        }
    }
}
