//! Debounced filesystem watching feeding the single-file ingest path.
//!
//! Raw notify events restart a per-path timer; only when a path has been
//! quiet for the debounce interval does it reach the ingestor, and writes
//! additionally wait out a short stability window so half-written files are
//! never embedded. The timer logic lives in [`Debouncer`], which is pure and
//! clock-injected so coalescing behavior is testable.

use anyhow::{Context, Result};
use notify::Watcher as _;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::ingest::Ingestor;
use crate::language::{indexable_extensions, IGNORED_DIRS};

/// Writes younger than this are assumed still in progress.
const STABILITY_WINDOW: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Upsert,
    Remove,
}

struct PendingChange {
    kind: ChangeKind,
    deadline: Instant,
}

/// Per-path debounce timers. A new event for a path restarts its timer, so a
/// burst of writes collapses into one ingest after quiescence; a path never
/// fires while an earlier timer for it is still pending.
pub struct Debouncer {
    debounce: Duration,
    pending: HashMap<PathBuf, PendingChange>,
}

impl Debouncer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: HashMap::new(),
        }
    }

    /// Record an event, restarting the path's timer. A later event's kind
    /// wins (a remove after writes is a remove).
    pub fn note(&mut self, path: PathBuf, kind: ChangeKind, now: Instant) {
        self.pending.insert(
            path,
            PendingChange {
                kind,
                deadline: now + self.debounce,
            },
        );
    }

    /// Push a path's deadline out without changing its kind.
    pub fn defer(&mut self, path: PathBuf, kind: ChangeKind, now: Instant, delay: Duration) {
        self.pending.insert(
            path,
            PendingChange {
                kind,
                deadline: now + delay,
            },
        );
    }

    /// Remove and return every path whose timer has expired.
    pub fn take_due(&mut self, now: Instant) -> Vec<(PathBuf, ChangeKind)> {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        due.into_iter()
            .filter_map(|path| {
                self.pending
                    .remove(&path)
                    .map(|p| (path, p.kind))
            })
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Whether a raw event path is worth watching at all.
fn relevant(root: &Path, path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    if !indexable_extensions().contains(ext) {
        return None;
    }
    let rel = path.strip_prefix(root).ok()?;
    for component in rel.components() {
        let name = component.as_os_str().to_string_lossy();
        if IGNORED_DIRS.contains(&name.as_ref()) {
            return None;
        }
    }
    Some(rel.to_string_lossy().replace('\\', "/"))
}

fn write_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Watch `root` until the shutdown flag goes up, feeding debounced changes to
/// the ingestor and flushing stores after each quiet period.
pub async fn watch_workspace(
    root: PathBuf,
    config: &Config,
    ingestor: Arc<Ingestor>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();

    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    })?;
    watcher
        .watch(&root, notify::RecursiveMode::Recursive)
        .context("failed to start watching workspace")?;
    info!("watching {} for changes", root.display());

    let ignored: Vec<glob::Pattern> = config
        .watch
        .ignored
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect();

    let mut debouncer = Debouncer::new(Duration::from_millis(config.watch.debounce_ms));
    let mut tick = tokio::time::interval(Duration::from_millis(50));
    let mut dirty = false;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    Ok(event) => {
                        let kind = match event.kind {
                            notify::EventKind::Create(_) | notify::EventKind::Modify(_) => {
                                ChangeKind::Upsert
                            }
                            notify::EventKind::Remove(_) => ChangeKind::Remove,
                            _ => continue,
                        };
                        let now = Instant::now();
                        for path in event.paths {
                            let Some(rel) = relevant(&root, &path) else { continue };
                            if ignored.iter().any(|p| p.matches(&rel)) {
                                continue;
                            }
                            debug!("fs event: {:?} {}", kind, rel);
                            debouncer.note(path, kind, now);
                        }
                    }
                    Err(e) => warn!("watch error: {}", e),
                }
            }
            _ = tick.tick() => {
                let now = Instant::now();
                for (path, kind) in debouncer.take_due(now) {
                    let Some(rel) = relevant(&root, &path) else { continue };
                    match kind {
                        ChangeKind::Upsert => {
                            // Stability window: re-arm while the file is
                            // still being written.
                            if path.exists() {
                                if let Some(age) = write_age(&path) {
                                    if age < STABILITY_WINDOW {
                                        debouncer.defer(path, kind, now, STABILITY_WINDOW);
                                        continue;
                                    }
                                }
                                if let Err(e) = ingestor.ingest_file(&rel).await {
                                    error!("failed to re-ingest {}: {}", rel, e);
                                }
                            } else if let Err(e) = ingestor.remove_file(&rel).await {
                                error!("failed to remove {}: {}", rel, e);
                            }
                            dirty = true;
                        }
                        ChangeKind::Remove => {
                            if let Err(e) = ingestor.remove_file(&rel).await {
                                error!("failed to remove {}: {}", rel, e);
                            }
                            dirty = true;
                        }
                    }
                }
                if dirty && debouncer.pending_count() == 0 {
                    if let Err(e) = ingestor.persist_stores().await {
                        error!("failed to persist stores: {}", e);
                    }
                    dirty = false;
                }
            }
        }
    }

    drop(watcher);
    ingestor.persist_stores().await?;
    info!("watcher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn burst_of_writes_coalesces_to_one_firing() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        let start = Instant::now();

        // 10 writes inside 300ms.
        for i in 0..10 {
            debouncer.note(
                path("x.ts"),
                ChangeKind::Upsert,
                start + Duration::from_millis(i * 30),
            );
        }

        // Nothing is due until 500ms after the last event.
        let last = start + Duration::from_millis(270);
        assert!(debouncer.take_due(last + Duration::from_millis(499)).is_empty());

        let due = debouncer.take_due(last + Duration::from_millis(501));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0], (path("x.ts"), ChangeKind::Upsert));
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[test]
    fn paths_debounce_independently() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        let start = Instant::now();
        debouncer.note(path("a.ts"), ChangeKind::Upsert, start);
        debouncer.note(
            path("b.ts"),
            ChangeKind::Upsert,
            start + Duration::from_millis(400),
        );

        let due = debouncer.take_due(start + Duration::from_millis(600));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, path("a.ts"));

        let due = debouncer.take_due(start + Duration::from_millis(1000));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, path("b.ts"));
    }

    #[test]
    fn later_remove_wins_over_earlier_write() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        let start = Instant::now();
        debouncer.note(path("a.ts"), ChangeKind::Upsert, start);
        debouncer.note(
            path("a.ts"),
            ChangeKind::Remove,
            start + Duration::from_millis(100),
        );

        let due = debouncer.take_due(start + Duration::from_millis(700));
        assert_eq!(due, vec![(path("a.ts"), ChangeKind::Remove)]);
    }

    #[test]
    fn defer_pushes_deadline_out() {
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        let start = Instant::now();
        debouncer.note(path("a.ts"), ChangeKind::Upsert, start);

        let fire_time = start + Duration::from_millis(600);
        let due = debouncer.take_due(fire_time);
        assert_eq!(due.len(), 1);

        debouncer.defer(
            path("a.ts"),
            ChangeKind::Upsert,
            fire_time,
            Duration::from_millis(200),
        );
        assert!(debouncer.take_due(fire_time + Duration::from_millis(100)).is_empty());
        assert_eq!(
            debouncer
                .take_due(fire_time + Duration::from_millis(201))
                .len(),
            1
        );
    }

    #[test]
    fn irrelevant_paths_are_filtered() {
        let root = path("/ws");
        assert!(relevant(&root, &path("/ws/src/a.ts")).is_some());
        assert!(relevant(&root, &path("/ws/a.png")).is_none());
        assert!(relevant(&root, &path("/ws/node_modules/x/i.js")).is_none());
        assert!(relevant(&root, &path("/ws/.syntheo/semantics/cache.db")).is_none());
        assert!(relevant(&root, &path("/elsewhere/a.ts")).is_none());
    }
}
