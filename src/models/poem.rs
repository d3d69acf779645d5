use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Script variant a run converts text into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptMode {
    #[default]
    Simplified,
    Traditional,
}

impl ScriptMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptMode::Simplified => "simplified",
            ScriptMode::Traditional => "traditional",
        }
    }
}

/// Raw poem record produced by the loader, consumed once by one worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub title: String,
    pub author: String,
    pub paragraphs: Vec<String>,
    /// Tune pattern for ci/qu (词牌 / 曲牌)
    pub rhythmic: Option<String>,
    /// Dataset tags; a form name here (e.g. 五言绝句) overrides line analysis
    #[serde(default)]
    pub tags: Vec<String>,
    /// Dataset key the record came from, e.g. `poet.tang`
    pub source: SmolStr,
    /// Era label inferred by the loader
    pub dynasty: SmolStr,
}

impl WorkItem {
    /// Short human-readable identity used in logs and error records.
    pub fn label(&self) -> String {
        format!("《{}》 {} [{}]", self.title, self.author, self.source)
    }
}

/// Fully normalized, classified, identity-assigned poem ready for storage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedRecord {
    pub id: i64,
    pub title: String,
    pub title_pinyin: String,
    pub title_pinyin_abbr: String,
    pub author: String,
    pub author_id: i64,
    pub dynasty_id: i64,
    pub type_id: i64,
    pub rhythmic: Option<String>,
    pub paragraphs: Vec<String>,
    /// Paragraphs serialized as a JSON array
    pub content: String,
    pub content_hash: String,
    pub source: SmolStr,
}

/// Stored poem row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Poem {
    pub id: i64,
    pub title: String,
    pub title_pinyin: String,
    pub title_pinyin_abbr: String,
    pub author_id: i64,
    pub dynasty_id: i64,
    pub type_id: i64,
    pub rhythmic: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub source: String,
    pub created_at: i64,
}

impl Poem {
    pub fn paragraphs(&self) -> Vec<String> {
        serde_json::from_str(&self.content).unwrap_or_default()
    }
}

/// Stored author row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub dynasty_id: i64,
    pub pinyin: String,
    pub pinyin_abbr: String,
}

/// Kind of reference row resolved through lookup-or-create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Dynasty,
    Author,
    PoemType,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityKind::Dynasty => "dynasty",
            EntityKind::Author => "author",
            EntityKind::PoemType => "poem_type",
        };
        f.write_str(s)
    }
}

/// Reference row to insert-if-absent. Authors carry their derived id.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Dynasty {
        name: &'a str,
    },
    Author {
        id: i64,
        name: &'a str,
        dynasty_id: i64,
        pinyin: &'a str,
        pinyin_abbr: &'a str,
    },
    PoemType {
        name: &'a str,
        category: &'a str,
    },
}

impl Entity<'_> {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Dynasty { .. } => EntityKind::Dynasty,
            Entity::Author { .. } => EntityKind::Author,
            Entity::PoemType { .. } => EntityKind::PoemType,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Entity::Dynasty { name } | Entity::Author { name, .. } | Entity::PoemType { name, .. } => {
                name
            }
        }
    }
}

/// Row counts per table, reported by `shiku status`
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreCounts {
    pub poems: i64,
    pub authors: i64,
    pub dynasties: i64,
    pub poem_types: i64,
    pub runs: i64,
}

/// One completed (or aborted) ingestion run
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct IngestRun {
    pub id: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub dispatched: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub written: i64,
    pub status: String,
}
