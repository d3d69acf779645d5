//! Per-item CPU-bound transformation: normalize → convert → transliterate →
//! classify → hash. Pure; storage lookups happen afterwards in the worker.

use std::sync::Arc;

use smol_str::SmolStr;

use super::classify::{classify, PoemForm};
use super::identity;
use super::text::{
    normalize, normalize_paragraphs, PinyinTransliterator, Result, ScriptConverter,
    TransformError, Transliterator, ZhConverter,
};
use crate::models::{ScriptMode, WorkItem};

/// A work item after every pure step, waiting for its foreign keys.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub id: i64,
    pub title: String,
    pub title_pinyin: String,
    pub title_pinyin_abbr: String,
    pub author: String,
    pub author_id: i64,
    pub author_pinyin: String,
    pub author_pinyin_abbr: String,
    pub dynasty: String,
    pub rhythmic: Option<String>,
    pub paragraphs: Vec<String>,
    pub content: String,
    pub content_hash: String,
    pub form: PoemForm,
    pub source: SmolStr,
}

/// Bundles the injected conversion capabilities.
#[derive(Clone)]
pub struct Transformer {
    converter: Arc<dyn ScriptConverter>,
    pinyin: Arc<dyn Transliterator>,
}

impl Transformer {
    pub fn new(converter: Arc<dyn ScriptConverter>, pinyin: Arc<dyn Transliterator>) -> Self {
        Self { converter, pinyin }
    }

    /// Transformer backed by the dictionary converters.
    pub fn builtin(mode: ScriptMode) -> Self {
        Self::new(
            Arc::new(ZhConverter::new(mode)),
            Arc::new(PinyinTransliterator::new()),
        )
    }

    pub fn mode(&self) -> ScriptMode {
        self.converter.mode()
    }

    pub fn transform(&self, item: &WorkItem) -> Result<Transformed> {
        let conv = &self.converter;

        let paragraphs = conv.convert_all(&normalize_paragraphs(&item.paragraphs));
        let author = conv.convert(&normalize(&item.author));
        let rhythmic = item
            .rhythmic
            .as_deref()
            .map(|r| conv.convert(&normalize(r)))
            .filter(|r| !r.is_empty());

        // Ci are usually untitled: fall back to the tune name.
        let mut title = conv.convert(&normalize(&item.title));
        if title.is_empty() {
            if let Some(r) = &rhythmic {
                title = r.clone();
            }
        }

        if title.is_empty() && paragraphs.is_empty() {
            return Err(TransformError::EmptyPoem);
        }
        if author.is_empty() {
            return Err(TransformError::MissingAuthor);
        }

        let dynasty = conv.convert(&normalize(&item.dynasty));
        let form = classify(&paragraphs, rhythmic.as_deref(), &item.tags, &item.source);
        let content = identity::serialize_paragraphs(&paragraphs)?;

        Ok(Transformed {
            id: identity::stable_id(&title, &author, &paragraphs),
            title_pinyin: self.pinyin.full(&title),
            title_pinyin_abbr: self.pinyin.abbreviated(&title),
            author_id: identity::author_id(&author),
            author_pinyin: self.pinyin.full(&author),
            author_pinyin_abbr: self.pinyin.abbreviated(&author),
            content_hash: identity::content_hash(&content),
            title,
            author,
            dynasty,
            rhythmic,
            paragraphs,
            content,
            form,
            source: item.source.clone(),
        })
    }
}
