//! # Conversation Search
//!
//! Incremental semantic search over append-only conversation logs, built in
//! Rust with vector embeddings and interchangeable storage backends.
//!
//! ## Features
//!
//! - Byte-offset resumable parsing of newline-delimited JSON logs
//! - Semantic search using local vector embeddings
//! - Two interchangeable backends: embedded SQLite or a Qdrant server
//! - Per-project progress tracking for incremental re-ingestion
//! - Both library and CLI interfaces
//! - Configurable cache and state directories using system directories
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use convsearch::{
//!     ConvsearchDirs, MessageIndexer, MessageSearch, SqliteMessageEngine, StateStore,
//!     ingest_project,
//! };
//!
//! # fn main() -> anyhow::Result<()> {
//! let dirs = ConvsearchDirs::new();
//! let state = StateStore::new();
//!
//! // Open the embedded store for a project, sharing the process-wide embedder
//! let embedder = convsearch::embed::shared()?;
//! let engine = SqliteMessageEngine::open(&state.db_path("myproject"), embedder)?;
//!
//! // Incrementally ingest everything new under the project's log directory
//! let project_dir = dirs.logs_root().join("myproject");
//! let report = ingest_project(&engine, &state, "myproject", &project_dir, false)?;
//! println!("indexed {} new message(s)", report.messages_indexed);
//!
//! // Query it
//! let hits = engine.search("how did we fix the build", 5, 0.3)?;
//! for hit in hits {
//!     println!("{:.3} {}:{}", hit.score, hit.file_path, hit.line_number);
//! }
//! # Ok(())
//! # }
//! ```

pub mod traits;
pub use traits::{
    CollectionStats, DEFAULT_SCORE_THRESHOLD, DEFAULT_SEARCH_LIMIT, LogMessage, MessageEngine,
    MessageIndexer, MessageSearch, SearchHit, TextEmbedder,
};

pub mod config;
pub use config::{BackendConfig, ConvsearchDirs};

pub mod embed;
pub use embed::{EMBEDDING_DIM, LocalEmbedder};

pub mod parser;
pub use parser::{LogLines, LogRecord, collect_messages, discover_log_files, list_all_projects};

pub mod state;
pub use state::{FileProgress, ProjectState, StateStore};

pub mod engines;
pub use engines::{BackendUnreachable, QdrantMessageEngine, SqliteMessageEngine};

pub mod ingest;
pub use ingest::{IngestReport, ProjectHit, ingest_project, search_projects};
