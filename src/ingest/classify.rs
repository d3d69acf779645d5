//! Structural classification of poems from line shape and tune tags.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Line-ending punctuation, both full-width and ASCII.
static LINE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[，。！？；、：,.!?;:]+").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoemForm {
    WuyanJueju,
    QiyanJueju,
    WuyanLvshi,
    QiyanLvshi,
    WuyanPailv,
    QiyanPailv,
    Ci,
    Qu,
    Gushi,
}

const FORMS: [PoemForm; 9] = [
    PoemForm::WuyanJueju,
    PoemForm::QiyanJueju,
    PoemForm::WuyanLvshi,
    PoemForm::QiyanLvshi,
    PoemForm::WuyanPailv,
    PoemForm::QiyanPailv,
    PoemForm::Ci,
    PoemForm::Qu,
    PoemForm::Gushi,
];

impl PoemForm {
    /// Display name stored in `poem_types.name`.
    pub fn name(&self) -> &'static str {
        match self {
            PoemForm::WuyanJueju => "五言绝句",
            PoemForm::QiyanJueju => "七言绝句",
            PoemForm::WuyanLvshi => "五言律诗",
            PoemForm::QiyanLvshi => "七言律诗",
            PoemForm::WuyanPailv => "五言排律",
            PoemForm::QiyanPailv => "七言排律",
            PoemForm::Ci => "词",
            PoemForm::Qu => "曲",
            PoemForm::Gushi => "古体诗",
        }
    }

    /// Form named by a dataset tag, in either script.
    pub fn from_name(tag: &str) -> Option<Self> {
        let simplified: String = tag
            .trim()
            .chars()
            .map(|c| match c {
                '絕' => '绝',
                '詩' => '诗',
                '詞' => '词',
                '體' => '体',
                c => c,
            })
            .collect();
        FORMS.iter().copied().find(|f| f.name() == simplified)
    }

    pub fn category(&self) -> &'static str {
        match self {
            PoemForm::Ci => "ci",
            PoemForm::Qu => "qu",
            _ => "shi",
        }
    }
}

/// Split paragraphs into verse lines on punctuation.
pub fn split_lines(paragraphs: &[String]) -> Vec<String> {
    paragraphs
        .iter()
        .flat_map(|p| LINE_BREAK.split(p))
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Classify a poem. A tune tag wins, then a form name among `tags`;
/// otherwise regulated forms are recognized by line count and uniform line
/// length.
pub fn classify(
    paragraphs: &[String],
    rhythmic: Option<&str>,
    tags: &[String],
    source: &str,
) -> PoemForm {
    if rhythmic.is_some_and(|r| !r.trim().is_empty()) {
        return if source.contains("yuanqu") || source.contains(".qu") {
            PoemForm::Qu
        } else {
            PoemForm::Ci
        };
    }
    if let Some(form) = tags.iter().find_map(|t| PoemForm::from_name(t)) {
        return form;
    }

    let lines = split_lines(paragraphs);
    let Some(first) = lines.first() else {
        return PoemForm::Gushi;
    };
    let width = first.chars().count();
    if !lines.iter().all(|l| l.chars().count() == width) {
        return PoemForm::Gushi;
    }

    match (lines.len(), width) {
        (4, 5) => PoemForm::WuyanJueju,
        (4, 7) => PoemForm::QiyanJueju,
        (8, 5) => PoemForm::WuyanLvshi,
        (8, 7) => PoemForm::QiyanLvshi,
        (n, 5) if n > 8 && n % 2 == 0 => PoemForm::WuyanPailv,
        (n, 7) if n > 8 && n % 2 == 0 => PoemForm::QiyanPailv,
        _ => PoemForm::Gushi,
    }
}
