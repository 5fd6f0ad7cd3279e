use thiserror::Error;

/// Error classes surfaced by the indexing and retrieval pipeline.
///
/// Per-file failures (`TransientIo`, `ParseFailure`) are logged and skipped so
/// a batch always completes; `EmbedderUnavailable` aborts the remainder of a
/// run; `StoreCorruption` refuses startup until the operator runs `clear`.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("I/O error reading {path}: {source}")]
    TransientIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("embedding service unavailable: {0}")]
    EmbedderUnavailable(String),

    #[error("failed to parse {0}")]
    ParseFailure(String),

    #[error("store corruption: {0}; refusing to start (run `syntheo clear` to rebuild)")]
    StoreCorruption(String),

    #[error("vector index capacity exhausted at {0} entries")]
    CapacityExhausted(usize),
}
