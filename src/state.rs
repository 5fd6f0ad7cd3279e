//! Indexing progress (`state.json`) and workspace summary (`metadata.json`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::now_ms;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexingState {
    /// `"idle"`, `"indexing"`, `"done"`, or `"failed"`.
    pub status: String,
    pub total_files: usize,
    pub indexed_files: usize,
    pub skipped_files: usize,
    pub error_count: usize,
    pub started_at: i64,
    pub finished_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkspaceMetadata {
    pub workspace_root: String,
    pub model_name: String,
    pub dimensions: usize,
    pub total_files: usize,
    pub total_blocks: usize,
    pub languages: HashMap<String, usize>,
    pub updated_at: i64,
}

pub struct StateManager {
    dir: PathBuf,
    pub state: IndexingState,
    pub metadata: WorkspaceMetadata,
}

impl StateManager {
    pub fn load(dir: &Path) -> Self {
        let state = read_json(&dir.join("state.json")).unwrap_or_default();
        let metadata = read_json(&dir.join("metadata.json")).unwrap_or_default();
        Self {
            dir: dir.to_path_buf(),
            state,
            metadata,
        }
    }

    pub fn begin_run(&mut self, total_files: usize) {
        self.state = IndexingState {
            status: "indexing".to_string(),
            total_files,
            started_at: now_ms(),
            ..Default::default()
        };
    }

    pub fn finish_run(&mut self, failed: bool) {
        self.state.status = if failed { "failed" } else { "done" }.to_string();
        self.state.finished_at = now_ms();
    }

    pub fn persist(&self) -> Result<()> {
        write_json(&self.dir.join("state.json"), &self.state)?;
        write_json(&self.dir.join("metadata.json"), &self.metadata)?;
        Ok(())
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("writing {}", path.display()))
}
