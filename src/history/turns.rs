//! Assistant turn history
//!
//! An append-only JSON array file of `{q, a}` pairs, truncated to the
//! newest `max_entries` on every write. Feeds the free-form chat prompt
//! with recent conversational context.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub q: String,
    pub a: String,
}

#[derive(Clone)]
pub struct TurnHistory {
    path: PathBuf,
    max_entries: usize,
}

impl TurnHistory {
    pub fn new(data_dir: &Path, max_entries: usize) -> Result<Self> {
        fs::create_dir_all(data_dir).context("Failed to create data dir")?;
        Ok(Self {
            path: data_dir.join("assistant_history.json"),
            max_entries: max_entries.max(1),
        })
    }

    pub fn load(&self) -> Vec<Turn> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Append one turn and persist, keeping only the newest entries.
    pub fn append(&self, q: &str, a: &str) -> Result<()> {
        let mut turns = self.load();
        turns.push(Turn {
            q: q.to_string(),
            a: a.to_string(),
        });
        if turns.len() > self.max_entries {
            let drop = turns.len() - self.max_entries;
            turns.drain(..drop);
        }
        fs::write(&self.path, serde_json::to_string_pretty(&turns)?)
            .context("Failed to write assistant history")?;
        Ok(())
    }

    /// Newest `n` turns, oldest first
    pub fn recent(&self, n: usize) -> Vec<Turn> {
        let turns = self.load();
        let skip = turns.len().saturating_sub(n);
        turns.into_iter().skip(skip).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let history = TurnHistory::new(dir.path(), 3).unwrap();

        for i in 0..5 {
            history.append(&format!("q{}", i), &format!("a{}", i)).unwrap();
        }

        let turns = history.load();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].q, "q2");
        assert_eq!(turns[2].q, "q4");
    }

    #[test]
    fn test_recent() {
        let dir = tempfile::tempdir().unwrap();
        let history = TurnHistory::new(dir.path(), 10).unwrap();
        history.append("first", "1").unwrap();
        history.append("second", "2").unwrap();

        let recent = history.recent(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].q, "second");
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = TurnHistory::new(dir.path(), 10).unwrap();
        assert!(history.load().is_empty());
    }
}
