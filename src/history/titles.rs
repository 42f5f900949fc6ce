//! Per-title history store
//!
//! Each title (a conversation's persistent identity) owns a directory with
//! `meta.json`, `source.txt`, and `target.txt`. The bilingual context tail
//! pairs the last K aligned SOURCE/TARGET lines for LLM grounding.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TitleMeta {
    pub title_id: String,
    pub title_name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TitleDetail {
    pub title_id: String,
    pub title_name: String,
    pub original_text: String,
    pub translated_text: String,
}

pub struct TitleStore {
    root: PathBuf,
}

impl TitleStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let root = data_dir.join("history");
        fs::create_dir_all(&root).context("Failed to create history root")?;
        Ok(Self { root })
    }

    fn folder(&self, title_id: &str) -> PathBuf {
        // title ids come off the wire; keep them from escaping the root
        let safe: String = title_id
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(safe)
    }

    /// Create the title directory and empty files if missing.
    pub fn ensure(&self, title_id: &str, title_name: Option<&str>) -> Result<PathBuf> {
        let folder = self.folder(title_id);
        fs::create_dir_all(&folder).context("Failed to create title folder")?;

        let meta_path = folder.join("meta.json");
        if !meta_path.exists() {
            let meta = TitleMeta {
                title_id: title_id.to_string(),
                title_name: title_name.unwrap_or(title_id).to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
            };
            fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)
                .context("Failed to write meta.json")?;
        }
        for name in ["source.txt", "target.txt"] {
            let path = folder.join(name);
            if !path.exists() {
                fs::write(&path, "")?;
            }
        }
        Ok(folder)
    }

    /// Create a fresh title keyed by timestamp.
    pub fn create(&self, title_name: Option<&str>) -> Result<TitleMeta> {
        let ts = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let title_id = ts.clone();
        let title_name = title_name.unwrap_or(&ts).to_string();
        let folder = self.ensure(&title_id, Some(&title_name))?;

        let meta = TitleMeta {
            title_id: title_id.clone(),
            title_name,
            created_at: ts,
        };
        fs::write(
            folder.join("meta.json"),
            serde_json::to_string_pretty(&meta)?,
        )?;
        fs::write(folder.join("source.txt"), "")?;
        fs::write(folder.join("target.txt"), "")?;
        Ok(meta)
    }

    pub fn list(&self) -> Result<Vec<TitleMeta>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let meta = fs::read_to_string(entry.path().join("meta.json"))
                .ok()
                .and_then(|s| serde_json::from_str::<TitleMeta>(&s).ok())
                .unwrap_or(TitleMeta {
                    title_id: name.clone(),
                    title_name: name.clone(),
                    created_at: name,
                });
            out.push(meta);
        }
        out.sort_by(|a, b| b.title_id.cmp(&a.title_id));
        Ok(out)
    }

    pub fn detail(&self, title_id: &str) -> Result<TitleDetail> {
        let folder = self.ensure(title_id, None)?;
        let meta = fs::read_to_string(folder.join("meta.json"))
            .ok()
            .and_then(|s| serde_json::from_str::<TitleMeta>(&s).ok());
        let (source, target) = self.read_source_target(title_id)?;
        Ok(TitleDetail {
            title_id: title_id.to_string(),
            title_name: meta
                .map(|m| m.title_name)
                .unwrap_or_else(|| title_id.to_string()),
            original_text: source,
            translated_text: target,
        })
    }

    pub fn read_source_target(&self, title_id: &str) -> Result<(String, String)> {
        let folder = self.ensure(title_id, None)?;
        let source = fs::read_to_string(folder.join("source.txt")).unwrap_or_default();
        let target = fs::read_to_string(folder.join("target.txt")).unwrap_or_default();
        Ok((source, target))
    }

    pub fn write_source(&self, title_id: &str, text: &str) -> Result<()> {
        self.write_file(title_id, "source.txt", text)
    }

    pub fn write_target(&self, title_id: &str, text: &str) -> Result<()> {
        self.write_file(title_id, "target.txt", text)
    }

    /// Atomic replace via a sibling temp file; falls back to a plain write
    /// when the rename is not possible.
    fn write_file(&self, title_id: &str, name: &str, text: &str) -> Result<()> {
        let folder = self.ensure(title_id, None)?;
        let path = folder.join(name);
        let tmp = folder.join(format!("{}.tmp", name));

        let atomic = fs::write(&tmp, text)
            .and_then(|_| fs::rename(&tmp, &path));
        if let Err(e) = atomic {
            warn!("atomic replace of {} failed ({}), writing in place", name, e);
            let _ = fs::remove_file(&tmp);
            fs::write(&path, text).with_context(|| format!("Failed to write {}", name))?;
        }
        Ok(())
    }
}

/// Bilingual grounding window: the last `max_lines` non-empty lines of
/// source and target, paired by index from the end. Unmatched source
/// lines keep an empty TARGET rather than guessing a realignment.
pub fn build_title_context_tail(prev_source: &str, prev_target: &str, max_lines: usize) -> String {
    let s_lines: Vec<&str> = prev_source
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let t_lines: Vec<&str> = prev_target
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let s_tail = &s_lines[s_lines.len().saturating_sub(max_lines)..];
    let t_tail = &t_lines[t_lines.len().saturating_sub(max_lines)..];

    let n = s_tail.len().min(t_tail.len());
    let mut pairs = Vec::new();
    for i in 0..n {
        pairs.push(format!("SOURCE: {}\nTARGET: {}", s_tail[i], t_tail[i]));
    }
    for line in &s_tail[n..] {
        pairs.push(format!("SOURCE: {}\nTARGET: ", line));
    }
    pairs.join("\n---\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_and_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TitleStore::new(dir.path()).unwrap();

        store.ensure("t1", Some("Demo")).unwrap();
        store.write_source("t1", "hello\n").unwrap();
        store.write_target("t1", "xin chào\n").unwrap();

        let (src, tgt) = store.read_source_target("t1").unwrap();
        assert_eq!(src, "hello\n");
        assert_eq!(tgt, "xin chào\n");

        let detail = store.detail("t1").unwrap();
        assert_eq!(detail.title_name, "Demo");
        assert_eq!(detail.original_text, "hello\n");
    }

    #[test]
    fn test_list_sorted_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = TitleStore::new(dir.path()).unwrap();
        store.ensure("2024-01-01_00-00-00", None).unwrap();
        store.ensure("2024-06-01_00-00-00", None).unwrap();

        let titles = store.list().unwrap();
        assert_eq!(titles.len(), 2);
        assert_eq!(titles[0].title_id, "2024-06-01_00-00-00");
    }

    #[test]
    fn test_title_id_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = TitleStore::new(dir.path()).unwrap();
        let folder = store.ensure("../evil", None).unwrap();
        assert!(folder.starts_with(dir.path()));
    }

    #[test]
    fn test_tail_aligned() {
        let tail = build_title_context_tail("a\nb\nc", "x\ny\nz", 2);
        assert_eq!(tail, "SOURCE: b\nTARGET: y\n---\nSOURCE: c\nTARGET: z");
    }

    #[test]
    fn test_tail_source_surplus_keeps_empty_target() {
        let tail = build_title_context_tail("a\nb\nc", "x", 12);
        assert!(tail.starts_with("SOURCE: a\nTARGET: x"));
        assert!(tail.contains("SOURCE: b\nTARGET: "));
        assert!(tail.ends_with("SOURCE: c\nTARGET:"));
    }

    #[test]
    fn test_tail_empty_inputs() {
        assert_eq!(build_title_context_tail("", "", 12), "");
    }
}
