//! Workspace tree walker.
//!
//! Yields candidate files as workspace-relative paths, honoring the default
//! directory denylist, configured exclude globs, the extension allowlist, and
//! a file-size cap. Symlinked directories are not followed.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::language::{indexable_extensions, IGNORED_DIRS, MAX_SCAN_DEPTH};

pub struct Scanner {
    root: PathBuf,
    exclude_patterns: Vec<glob::Pattern>,
    max_file_size: u64,
}

/// A scanned candidate with the metadata change detection needs.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Workspace-relative path with forward slashes.
    pub rel_path: String,
    pub mtime_ms: i64,
    pub size_bytes: u64,
}

impl Scanner {
    pub fn new(root: &Path, exclude_patterns: &[String], max_file_size: u64) -> Result<Self> {
        let patterns = exclude_patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p).with_context(|| format!("invalid exclude pattern {p:?}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            root: root.to_path_buf(),
            exclude_patterns: patterns,
            max_file_size,
        })
    }

    /// Walk the workspace and collect indexable files.
    pub fn scan(&self) -> Vec<ScannedFile> {
        let extensions = indexable_extensions();
        let mut files = Vec::new();

        let walker = WalkDir::new(&self.root)
            .max_depth(MAX_SCAN_DEPTH)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.file_type().is_dir() {
                    let name = entry.file_name().to_string_lossy();
                    !IGNORED_DIRS.contains(&name.as_ref())
                } else {
                    true
                }
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("scan error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !extensions.contains(ext) {
                continue;
            }

            let Ok(rel) = path.strip_prefix(&self.root) else {
                continue;
            };
            let rel_path = rel.to_string_lossy().replace('\\', "/");
            if self
                .exclude_patterns
                .iter()
                .any(|p| p.matches(&rel_path))
            {
                debug!("excluded by pattern: {}", rel_path);
                continue;
            }

            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.len() > self.max_file_size {
                debug!(
                    "skipping {} ({} bytes over the {} byte cap)",
                    rel_path,
                    meta.len(),
                    self.max_file_size
                );
                continue;
            }

            files.push(ScannedFile {
                rel_path,
                mtime_ms: mtime_ms(&meta),
                size_bytes: meta.len(),
            });
        }

        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        files
    }
}

pub fn mtime_ms(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
