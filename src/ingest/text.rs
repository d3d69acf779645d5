//! Text normalization, script conversion and pinyin transliteration.
//!
//! Conversion and transliteration are capabilities the caller constructs and
//! injects (see [`Transformer`](super::transform::Transformer)); nothing here
//! is a process-wide singleton.

use pinyin::ToPinyin;
use thiserror::Error;
use zhconv::{zhconv, Variant};

use crate::models::ScriptMode;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Poem has no title and no content")]
    EmptyPoem,
    #[error("Poem has no author")]
    MissingAuthor,
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TransformError>;

/// Trim, drop zero-width marks and collapse whitespace (ASCII and U+3000) to
/// a single ASCII space.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        match c {
            '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{feff}' => {}
            c if c.is_whitespace() => pending_space = !out.is_empty(),
            c => {
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                out.push(c);
            }
        }
    }
    out
}

/// Normalize every paragraph and drop the ones that end up empty.
pub fn normalize_paragraphs(paragraphs: &[String]) -> Vec<String> {
    paragraphs
        .iter()
        .map(|p| normalize(p))
        .filter(|p| !p.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Script conversion
// ---------------------------------------------------------------------------

/// Converts text between traditional and simplified characters.
pub trait ScriptConverter: Send + Sync {
    fn mode(&self) -> ScriptMode;

    fn convert(&self, text: &str) -> String;

    fn convert_all(&self, texts: &[String]) -> Vec<String> {
        texts.iter().map(|t| self.convert(t)).collect()
    }
}

/// Dictionary-based converter (OpenCC/MediaWiki tables via `zhconv`).
/// Handles phrase-level mappings, not just single characters.
pub struct ZhConverter {
    mode: ScriptMode,
    target: Variant,
}

impl ZhConverter {
    pub fn new(mode: ScriptMode) -> Self {
        let target = match mode {
            ScriptMode::Simplified => Variant::ZhHans,
            ScriptMode::Traditional => Variant::ZhHant,
        };
        Self { mode, target }
    }
}

impl ScriptConverter for ZhConverter {
    fn mode(&self) -> ScriptMode {
        self.mode
    }

    fn convert(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        zhconv(text, self.target)
    }
}

// ---------------------------------------------------------------------------
// Transliteration
// ---------------------------------------------------------------------------

/// Phonetic (pinyin) rendering of Han text.
pub trait Transliterator: Send + Sync {
    /// Space-separated syllables, e.g. `jing ye si`.
    fn full(&self, text: &str) -> String;

    /// Syllable initials, e.g. `jys`.
    fn abbreviated(&self, text: &str) -> String;
}

/// Toneless pinyin from the `pinyin` crate's dictionary. Polyphonic
/// characters take their primary reading.
#[derive(Debug, Default, Clone, Copy)]
pub struct PinyinTransliterator;

impl PinyinTransliterator {
    pub fn new() -> Self {
        Self
    }

    /// Tokenize into syllables: Han characters become their reading, ASCII
    /// alphanumeric runs stay as one lowercase word, Han characters without a
    /// reading are kept verbatim, everything else separates.
    fn syllables(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut word = String::new();
        for c in text.chars() {
            if c.is_ascii_alphanumeric() {
                word.push(c.to_ascii_lowercase());
                continue;
            }
            if !word.is_empty() {
                out.push(std::mem::take(&mut word));
            }
            if let Some(p) = c.to_pinyin() {
                out.push(p.plain().to_string());
            } else if is_han(c) {
                out.push(c.to_string());
            }
        }
        if !word.is_empty() {
            out.push(word);
        }
        out
    }
}

impl Transliterator for PinyinTransliterator {
    fn full(&self, text: &str) -> String {
        self.syllables(text).join(" ")
    }

    fn abbreviated(&self, text: &str) -> String {
        self.syllables(text)
            .iter()
            .filter_map(|s| s.chars().next())
            .filter(|c| c.is_ascii_alphanumeric())
            .collect()
    }
}

/// CJK Unified Ideographs plus extension A.
fn is_han(c: char) -> bool {
    matches!(c, '\u{4e00}'..='\u{9fff}' | '\u{3400}'..='\u{4dbf}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize("  静夜思\u{3000}\n"), "静夜思");
        assert_eq!(normalize("a \t b"), "a b");
        assert_eq!(normalize("\u{feff}床前\u{200b}明月光"), "床前明月光");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_normalize_paragraphs_drops_empty() {
        let paras = vec!["床前明月光，".to_string(), " \u{3000} ".to_string(), " 疑是地上霜。".to_string()];
        assert_eq!(normalize_paragraphs(&paras), vec!["床前明月光，", "疑是地上霜。"]);
    }

    #[test]
    fn test_convert_to_simplified() {
        let conv = ZhConverter::new(ScriptMode::Simplified);
        assert_eq!(conv.mode(), ScriptMode::Simplified);
        assert_eq!(conv.convert("靜夜思"), "静夜思");
        assert_eq!(conv.convert("舉頭望明月"), "举头望明月");
        assert_eq!(conv.convert("羌笛何須怨楊柳，春風不度玉門關。"), "羌笛何须怨杨柳，春风不度玉门关。");
        assert_eq!(conv.convert("黃河之水天上來，奔流到海不復回。"), "黄河之水天上来，奔流到海不复回。");
        assert_eq!(conv.convert("李白"), "李白");
        assert_eq!(conv.convert(""), "");
    }

    #[test]
    fn test_convert_to_traditional() {
        let conv = ZhConverter::new(ScriptMode::Traditional);
        assert_eq!(conv.convert("静夜思"), "靜夜思");
        assert_eq!(
            conv.convert_all(&["低头思故乡".to_string(), "举头望明月".to_string()]),
            vec!["低頭思故鄉".to_string(), "舉頭望明月".to_string()]
        );
    }

    #[test]
    fn test_pinyin_full_and_abbreviated() {
        let py = PinyinTransliterator::new();
        assert_eq!(py.full("静夜思"), "jing ye si");
        assert_eq!(py.abbreviated("静夜思"), "jys");
        assert_eq!(py.full("将进酒"), "jiang jin jiu");
        assert_eq!(py.full("王之涣"), "wang zhi huan");
        assert_eq!(py.abbreviated("登鹳"), "dg");
        assert_eq!(py.full("靜夜思"), "jing ye si");
    }

    #[test]
    fn test_pinyin_mixed_text() {
        let py = PinyinTransliterator::new();
        assert_eq!(py.full("春晓 No.2"), "chun xiao no 2");
        assert_eq!(py.abbreviated("春晓 No.2"), "cxn2");
        assert_eq!(py.full("，。"), "");
    }
}
