//! Dataset loader: JSON poem files → WorkItems.
//!
//! Files are discovered with a directory walk, then parsed in parallel on
//! the rayon pool. Each file is a JSON array of poem objects.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Deserialize;
use smol_str::SmolStr;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

use crate::models::WorkItem;

/// Author used when a record carries none.
pub const ANONYMOUS: &str = "佚名";

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

pub type Result<T> = std::result::Result<T, LoaderError>;

/// One poem object as it appears in the dataset files.
#[derive(Debug, Deserialize)]
struct RawPoem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default, alias = "content")]
    paragraphs: Vec<String>,
    #[serde(default)]
    rhythmic: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

/// Load every `.json` dataset file under `path` (or `path` itself).
/// `default_dynasty` applies when the file name names no known era.
pub fn load_path(path: &Path, default_dynasty: &str) -> Result<Vec<WorkItem>> {
    if !path.exists() {
        return Err(LoaderError::PathNotFound(path.to_path_buf()));
    }

    let files = discover(path)?;
    tracing::info!("Loader: {} dataset files under {}", files.len(), path.display());

    let per_file: Vec<Vec<WorkItem>> = files
        .par_iter()
        .map(|file| load_file(file, default_dynasty))
        .collect::<Result<_>>()?;

    let items: Vec<WorkItem> = per_file.into_iter().flatten().collect();
    tracing::info!("Loader: {} poems loaded", items.len());
    Ok(items)
}

/// Parse one dataset file.
pub fn load_file(path: &Path, default_dynasty: &str) -> Result<Vec<WorkItem>> {
    let bytes = std::fs::read(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: Vec<RawPoem> = serde_json::from_slice(&bytes).map_err(|source| LoaderError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let source = source_key(&stem);
    let dynasty = SmolStr::new(infer_dynasty(&stem).unwrap_or(default_dynasty));

    tracing::debug!("Loader: {} poems from {}", raw.len(), path.display());

    Ok(raw
        .into_iter()
        .map(|p| WorkItem {
            title: p.title,
            author: p
                .author
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| ANONYMOUS.to_string()),
            paragraphs: p.paragraphs,
            rhythmic: p.rhythmic,
            tags: p.tags,
            source: source.clone(),
            dynasty: dynasty.clone(),
        })
        .collect())
}

fn discover(root: &Path) -> Result<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e: &DirEntry| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() && is_dataset_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// `.json` files that hold poems; author biography files are skipped.
fn is_dataset_file(path: &Path) -> bool {
    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    is_json && !name.starts_with("author")
}

/// Era named by a file stem, e.g. `poet.tang.3000` → 唐.
pub fn infer_dynasty(stem: &str) -> Option<&'static str> {
    stem.split(['.', '_', '-']).find_map(|seg| match seg {
        "tang" => Some("唐"),
        "song" => Some("宋"),
        "yuan" => Some("元"),
        "ming" => Some("明"),
        "qing" => Some("清"),
        "shijing" | "chuci" => Some("先秦"),
        _ => None,
    })
}

/// Dataset key: the stem without its numeric shard segments.
/// `poet.tang.3000` → `poet.tang`.
pub fn source_key(stem: &str) -> SmolStr {
    let key: Vec<&str> = stem
        .split('.')
        .filter(|seg| !seg.is_empty() && !seg.chars().all(|c| c.is_ascii_digit()))
        .collect();
    if key.is_empty() {
        SmolStr::new(stem)
    } else {
        SmolStr::new(key.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const TANG: &str = r#"[
        {"title": "静夜思", "author": "李白", "paragraphs": ["床前明月光，疑是地上霜。", "举头望明月，低头思故乡。"]},
        {"title": "春晓", "author": "孟浩然", "paragraphs": ["春眠不觉晓，处处闻啼鸟。"], "tags": ["五言绝句"]}
    ]"#;

    const CI: &str = r#"[
        {"author": "苏轼", "rhythmic": "水调歌头", "paragraphs": ["明月几时有？把酒问青天。"]}
    ]"#;

    #[test]
    fn test_infer_dynasty_and_source_key() {
        assert_eq!(infer_dynasty("poet.tang.3000"), Some("唐"));
        assert_eq!(infer_dynasty("ci.song.0"), Some("宋"));
        assert_eq!(infer_dynasty("chuci"), Some("先秦"));
        assert_eq!(infer_dynasty("misc"), None);

        assert_eq!(source_key("poet.tang.3000"), "poet.tang");
        assert_eq!(source_key("ci.song.21000"), "ci.song");
        assert_eq!(source_key("123"), "123");
    }

    #[test]
    fn test_load_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("poet.tang.0.json"), TANG).unwrap();
        fs::create_dir(dir.path().join("ci")).unwrap();
        fs::write(dir.path().join("ci").join("ci.song.0.json"), CI).unwrap();
        fs::write(dir.path().join("authors.tang.json"), "[{\"name\": \"李白\"}]").unwrap();
        fs::write(dir.path().join("README.md"), "not data").unwrap();

        let mut items = load_path(dir.path(), "唐").unwrap();
        items.sort_by(|a, b| a.author.cmp(&b.author));
        assert_eq!(items.len(), 3);

        let ci = items.iter().find(|i| i.author == "苏轼").unwrap();
        assert_eq!(ci.title, "");
        assert_eq!(ci.rhythmic.as_deref(), Some("水调歌头"));
        assert_eq!(ci.source, "ci.song");
        assert_eq!(ci.dynasty, "宋");

        let li = items.iter().find(|i| i.author == "李白").unwrap();
        assert_eq!(li.paragraphs.len(), 2);
        assert_eq!(li.source, "poet.tang");
        assert!(li.tags.is_empty());

        let meng = items.iter().find(|i| i.author == "孟浩然").unwrap();
        assert_eq!(meng.tags, vec!["五言绝句".to_string()]);
    }

    #[test]
    fn test_missing_author_and_default_dynasty() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("misc.json");
        fs::write(&file, r#"[{"title": "无题", "content": ["一二三"]}, {"title": "x", "author": " ", "paragraphs": []}]"#)
            .unwrap();

        let items = load_file(&file, "唐").unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.author == ANONYMOUS));
        assert_eq!(items[0].paragraphs, vec!["一二三".to_string()]);
        assert_eq!(items[0].dynasty, "唐");
    }

    #[test]
    fn test_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            load_path(&missing, "唐"),
            Err(LoaderError::PathNotFound(_))
        ));

        let bad = dir.path().join("poet.song.0.json");
        fs::write(&bad, "{not json").unwrap();
        assert!(matches!(load_path(dir.path(), "宋"), Err(LoaderError::Parse { .. })));
    }
}
