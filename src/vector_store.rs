//! Persistent approximate-nearest-neighbor index over cosine-normalized
//! vectors.
//!
//! The HNSW graph is an accelerator; the durable source of truth for vectors
//! is the `vector_map` table. Deletion is a tombstone (the mapping row goes
//! away and the label joins the in-memory tombstone set); the graph entry
//! stays until a rebuild. Capacity growth doubles the declared size and
//! rebuilds the graph from the durable vectors, so an insert never fails for
//! capacity reasons.

use anyhow::{anyhow, Result};
use hnsw_rs::hnswio::{HnswIo, ReloadOptions};
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::IndexerError;

/// hnsw_rs NB_LAYER_MAX; the full layer budget is required for dump persistence.
const ANN_MAX_LAYERS: usize = 16;
/// Dump basename; the library writes `vectors.hnsw.graph` + `vectors.hnsw.data`.
const ANN_BASENAME: &str = "vectors";

#[derive(Debug, Serialize, Deserialize)]
struct AnnMeta {
    dimensions: usize,
    capacity: usize,
    count: usize,
}

/// Holds a graph together with the reader that loaded it.
///
/// `HnswIo::load_hnsw` ties the graph's lifetime to the reader. With the
/// default reload options (no memory mapping) the loaded graph owns all its
/// data, so extending the lifetime to `'static` is sound; the reader is kept
/// alive alongside it anyway.
struct LoadedAnnIndex {
    _io: Option<Box<HnswIo>>,
    hnsw: Hnsw<'static, f32, DistCosine>,
}

impl LoadedAnnIndex {
    fn build(capacity: usize, max_connections: usize, ef_construction: usize) -> Self {
        let mut hnsw = Hnsw::<'static, f32, DistCosine>::new(
            max_connections,
            capacity.max(1),
            ANN_MAX_LAYERS,
            ef_construction,
            DistCosine {},
        );
        hnsw.set_searching_mode(true);
        Self { _io: None, hnsw }
    }

    fn load(dir: &Path) -> Result<Self> {
        let mut io = HnswIo::new(dir, ANN_BASENAME);
        io.set_options(ReloadOptions::default());

        let loaded: Hnsw<'_, f32, DistCosine> = io
            .load_hnsw::<f32, DistCosine>()
            .map_err(|e| anyhow!("failed to load ANN index from {}: {}", dir.display(), e))?;

        // SAFETY: ReloadOptions::default() disables memory mapping, so
        // load_hnsw copies all vector data into the graph's own buffers and
        // the result borrows nothing from `io`. The reader is retained in
        // `_io` regardless.
        let mut hnsw: Hnsw<'static, f32, DistCosine> = unsafe { std::mem::transmute(loaded) };
        hnsw.set_searching_mode(true);

        Ok(Self {
            _io: Some(Box::new(io)),
            hnsw,
        })
    }
}

pub struct VectorStore {
    dimensions: usize,
    capacity: usize,
    max_connections: usize,
    ef_construction: usize,
    /// Points present in the graph, tombstoned ones included.
    count: usize,
    tombstones: HashSet<u64>,
    index: Option<LoadedAnnIndex>,
}

impl VectorStore {
    /// Load the index from `dir` or start empty. A dump whose declared
    /// capacity is below `initial_capacity` is resized upward (the larger
    /// figure simply becomes the growth threshold).
    pub fn open(
        dir: &Path,
        dimensions: usize,
        initial_capacity: usize,
        max_connections: usize,
        ef_construction: usize,
    ) -> Result<Self> {
        let meta_path = dir.join(format!("{ANN_BASENAME}.meta.json"));
        let graph_path = dir.join(format!("{ANN_BASENAME}.hnsw.graph"));

        if meta_path.exists() && graph_path.exists() {
            let raw = std::fs::read_to_string(&meta_path)?;
            let meta: AnnMeta = serde_json::from_str(&raw).map_err(|e| {
                anyhow!(
                    "unreadable ANN metadata at {}: {}",
                    meta_path.display(),
                    e
                )
            })?;
            if meta.dimensions != dimensions {
                return Err(anyhow!(
                    "ANN index has {} dimensions, embedder produces {}",
                    meta.dimensions,
                    dimensions
                ));
            }
            let index = LoadedAnnIndex::load(dir)?;
            info!(
                "loaded ANN index: {} points, capacity {}",
                meta.count, meta.capacity
            );
            return Ok(Self {
                dimensions,
                capacity: meta.capacity.max(initial_capacity),
                max_connections,
                ef_construction,
                count: meta.count,
                tombstones: HashSet::new(),
                index: Some(index),
            });
        }

        debug!("no ANN index at {}, starting empty", dir.display());
        Ok(Self {
            dimensions,
            capacity: initial_capacity,
            max_connections,
            ef_construction,
            count: 0,
            tombstones: HashSet::new(),
            index: None,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Points currently searchable (graph points minus tombstones).
    pub fn live_count(&self) -> usize {
        self.count - self.tombstones.len().min(self.count)
    }

    /// Whether `additional` more points fit without growing.
    pub fn has_room(&self, additional: usize) -> bool {
        self.count + additional < self.capacity.saturating_sub(1).max(1)
    }

    /// Double the capacity until `additional` more points fit, rebuilding the
    /// graph from the durable `(label, vector)` entries.
    pub fn grow(&mut self, entries: &[(u64, Vec<f32>)], additional: usize) -> Result<()> {
        let needed = entries.len() + additional + 1;
        let mut capacity = self.capacity.max(1);
        while capacity <= needed {
            capacity *= 2;
        }
        info!(
            "growing ANN capacity {} -> {} ({} live vectors)",
            self.capacity,
            capacity,
            entries.len()
        );
        self.rebuild(entries, capacity)
    }

    /// Build a fresh graph of `capacity` from scratch. Tombstones vanish
    /// because only live entries are re-inserted.
    pub fn rebuild(&mut self, entries: &[(u64, Vec<f32>)], capacity: usize) -> Result<()> {
        let index = LoadedAnnIndex::build(capacity, self.max_connections, self.ef_construction);
        for (label, vector) in entries {
            if vector.len() != self.dimensions {
                warn!(
                    "skipping label {} during rebuild: {} dims, expected {}",
                    label,
                    vector.len(),
                    self.dimensions
                );
                continue;
            }
            index.hnsw.insert((vector.as_slice(), *label as usize));
        }
        self.capacity = capacity;
        self.count = entries.len();
        self.tombstones.clear();
        self.index = Some(index);
        Ok(())
    }

    /// Add one point under an already-allocated label. The caller guarantees
    /// room (see [`Self::has_room`] / [`Self::grow`]).
    pub fn insert(&mut self, label: u64, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(anyhow!(
                "vector has {} dims, index expects {}",
                vector.len(),
                self.dimensions
            ));
        }
        if self.count >= self.capacity.saturating_sub(1) {
            return Err(IndexerError::CapacityExhausted(self.capacity).into());
        }
        let index = self.index.get_or_insert_with(|| {
            LoadedAnnIndex::build(self.capacity, self.max_connections, self.ef_construction)
        });
        index.hnsw.insert((vector, label as usize));
        self.count += 1;
        Ok(())
    }

    /// Mark labels deleted. Their graph entries linger until a rebuild, but
    /// search drops them.
    pub fn tombstone(&mut self, labels: &[u64]) {
        for label in labels {
            self.tombstones.insert(*label);
        }
    }

    /// Up to `k` nearest labels with their cosine distances, ascending.
    /// Tombstoned labels are filtered here; callers additionally drop any
    /// label the mapping no longer resolves.
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Vec<(u64, f32)> {
        let Some(index) = self.index.as_ref() else {
            return Vec::new();
        };
        if query.len() != self.dimensions || k == 0 {
            return Vec::new();
        }

        // Over-fetch a little so tombstones don't eat into k.
        let fetch = k + self.tombstones.len().min(k);
        index
            .hnsw
            .search(query, fetch, ef_search.max(k))
            .into_iter()
            .map(|n| (n.d_id as u64, n.distance))
            .filter(|(label, _)| !self.tombstones.contains(label))
            .take(k)
            .collect()
    }

    /// Dump the graph and its metadata sidecar to `dir`.
    pub fn persist(&mut self, dir: &Path) -> Result<()> {
        let Some(index) = self.index.as_mut() else {
            return Ok(());
        };

        std::fs::create_dir_all(dir)?;

        // The searching flag blocks the dump's internal writes.
        index.hnsw.set_searching_mode(false);
        let dump_result = index.hnsw.file_dump(dir, ANN_BASENAME);
        index.hnsw.set_searching_mode(true);

        dump_result.map_err(|e| anyhow!("failed to dump ANN index: {}", e))?;

        let meta = AnnMeta {
            dimensions: self.dimensions,
            capacity: self.capacity,
            count: self.count,
        };
        std::fs::write(
            dir.join(format!("{ANN_BASENAME}.meta.json")),
            serde_json::to_string(&meta)?,
        )?;

        debug!("persisted ANN index ({} points) to {}", self.count, dir.display());
        Ok(())
    }
}

/// Cosine similarity score from an ANN distance, clipped into `[0, 1]`.
pub fn similarity_from_distance(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit(x: f32, y: f32) -> Vec<f32> {
        let norm = (x * x + y * y).sqrt();
        vec![x / norm, y / norm]
    }

    fn store() -> VectorStore {
        let dir = TempDir::new().unwrap();
        VectorStore::open(dir.path(), 2, 64, 16, 200).unwrap()
    }

    #[test]
    fn nearest_neighbor_comes_back_first() {
        let mut store = store();
        store.insert(1, &unit(1.0, 0.0)).unwrap();
        store.insert(2, &unit(0.0, 1.0)).unwrap();
        store.insert(3, &unit(1.0, 0.1)).unwrap();

        let hits = store.search(&unit(1.0, 0.0), 2, 100);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 1);
        assert!(hits[0].1 <= hits[1].1);
        assert!(similarity_from_distance(hits[0].1) > 0.99);
    }

    #[test]
    fn tombstoned_labels_are_skipped() {
        let mut store = store();
        store.insert(1, &unit(1.0, 0.0)).unwrap();
        store.insert(2, &unit(0.9, 0.1)).unwrap();
        store.tombstone(&[1]);

        let hits = store.search(&unit(1.0, 0.0), 2, 100);
        assert!(hits.iter().all(|(label, _)| *label != 1));
        assert_eq!(store.live_count(), 1);
    }

    #[test]
    fn growth_rebuilds_and_clears_tombstones() {
        let dir = TempDir::new().unwrap();
        let mut store = VectorStore::open(dir.path(), 2, 4, 16, 200).unwrap();

        let mut entries = Vec::new();
        for i in 0..3u64 {
            let v = unit(1.0, i as f32);
            store.insert(i + 1, &v).unwrap();
            entries.push((i + 1, v));
        }
        assert!(!store.has_room(1));

        store.tombstone(&[2]);
        entries.retain(|(label, _)| *label != 2);
        store.grow(&entries, 8).unwrap();

        assert!(store.capacity() >= 16);
        assert!(store.has_room(8));
        assert_eq!(store.live_count(), 2);
        let hits = store.search(&unit(1.0, 1.0), 3, 100);
        assert!(hits.iter().all(|(label, _)| *label != 2));
    }

    #[test]
    fn exceeding_initial_capacity_succeeds_after_growth() {
        let dir = TempDir::new().unwrap();
        let mut store = VectorStore::open(dir.path(), 2, 4, 16, 200).unwrap();

        let mut entries: Vec<(u64, Vec<f32>)> = Vec::new();
        for i in 0..5u64 {
            let v = unit((i + 1) as f32, 1.0);
            if !store.has_room(1) {
                store.grow(&entries.clone(), 1).unwrap();
            }
            store.insert(i + 1, &v).unwrap();
            entries.push((i + 1, v));
        }
        assert_eq!(store.live_count(), 5);
    }

    #[test]
    fn persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = VectorStore::open(dir.path(), 2, 64, 16, 200).unwrap();
            store.insert(1, &unit(1.0, 0.0)).unwrap();
            store.insert(2, &unit(0.0, 1.0)).unwrap();
            store.persist(dir.path()).unwrap();
        }

        let store = VectorStore::open(dir.path(), 2, 64, 16, 200).unwrap();
        assert_eq!(store.live_count(), 2);
        let hits = store.search(&unit(0.0, 1.0), 1, 100);
        assert_eq!(hits[0].0, 2);
    }

    #[test]
    fn empty_store_searches_clean() {
        let store = store();
        assert!(store.search(&unit(1.0, 0.0), 5, 100).is_empty());
    }

    #[test]
    fn similarity_clips_to_unit_interval() {
        assert_eq!(similarity_from_distance(0.0), 1.0);
        assert_eq!(similarity_from_distance(1.0), 0.0);
        assert_eq!(similarity_from_distance(1.7), 0.0);
    }
}
