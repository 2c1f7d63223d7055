use serde::{Deserialize, Serialize};

/// Default minimum similarity for search results; candidates scoring strictly
/// below this are dropped.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.3;

/// Default number of search results returned.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// A conversation message extracted from a log file, ready for indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessage {
    /// Stable external identifier from the source record. May be empty, which
    /// weakens dedup-on-reingest guarantees.
    pub uuid: String,
    /// `"user"` or `"assistant"`.
    pub role: String,
    pub content: String,
    /// ISO-8601 timestamp string from the source record.
    pub timestamp: String,
    pub session_id: String,
    pub file_path: String,
    /// 1-based line number, counted from the start of the file.
    pub line_number: u64,
    /// Byte offset of the start of the originating line.
    pub byte_offset: u64,
}

/// A search result pointing back into the original log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub uuid: String,
    pub file_path: String,
    pub line_number: u64,
    pub role: String,
    /// Display snippet, at most 300 chars with an ellipsis suffix.
    pub snippet: String,
    /// Similarity score, higher is more relevant.
    pub score: f32,
    pub timestamp: String,
    pub session_id: String,
}

/// Point count and status for a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionStats {
    pub collection: String,
    pub points_count: u64,
    /// Backend-specific status string; `"not_found"` when the collection does
    /// not exist yet, which is a valid state rather than an error.
    pub status: String,
}

impl CollectionStats {
    pub fn not_found(collection: impl Into<String>) -> Self {
        CollectionStats {
            collection: collection.into(),
            points_count: 0,
            status: "not_found".to_string(),
        }
    }
}

/// Text-to-vector capability. The same text always maps to the same vector
/// within a process lifetime.
pub trait TextEmbedder: Send + Sync {
    /// Embeds a single text into a fixed-length vector.
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Embeds multiple texts, order-preserving. An empty input yields an empty
    /// output without touching the backing model.
    fn embed_many(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>>;

    /// Length of the vectors this embedder produces.
    fn dimension(&self) -> usize;
}

/// Trait for managing a project's message collection in a vector store.
pub trait MessageIndexer {
    /// Creates the backing collection if it does not exist. Idempotent.
    fn ensure_collection(&self) -> anyhow::Result<()>;

    /// Embeds and persists a batch of messages, returning the number indexed.
    /// An empty batch is a no-op returning 0. Re-indexing an identifier
    /// overwrites the stored point rather than duplicating it.
    fn index_messages(&self, messages: &[LogMessage]) -> anyhow::Result<usize>;

    /// Point count and status; a missing collection reports `"not_found"`.
    fn stats(&self) -> anyhow::Result<CollectionStats>;

    /// Removes the collection entirely.
    fn drop_collection(&self) -> anyhow::Result<()>;
}

/// Trait for nearest-neighbor queries over indexed messages.
pub trait MessageSearch {
    /// Searches for messages similar to `query`, capped at `limit` candidates.
    /// Hits scoring strictly below `score_threshold` are dropped. A collection
    /// that was never created yields an empty list, not an error.
    fn search(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f32,
    ) -> anyhow::Result<Vec<SearchHit>>;
}

/// A full vector store backend. Both engine variants implement this, so
/// callers can hold one boxed backend and swap implementations freely.
pub trait MessageEngine: MessageIndexer + MessageSearch {}

impl<T: MessageIndexer + MessageSearch> MessageEngine for T {}
