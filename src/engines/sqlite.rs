use crate::engines::make_snippet;
use crate::traits::{
    CollectionStats, LogMessage, MessageIndexer, MessageSearch, SearchHit, TextEmbedder,
};
use anyhow::{anyhow, ensure};
use log::{debug, info};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Embedded vector store backed by a per-project SQLite database file.
///
/// Vectors are stored as little-endian f32 blobs and ranked in process by dot
/// product (embeddings are L2-normalized, so this is cosine similarity). The
/// uuid is the primary key of both tables, so re-indexing an identifier
/// replaces the stored row instead of accumulating duplicates, matching the
/// networked backend's upsert-by-id semantics.
pub struct SqliteMessageEngine {
    db_path: PathBuf,
    conn: Connection,
    embedder: Arc<dyn TextEmbedder>,
}

impl SqliteMessageEngine {
    /// Opens (creating if necessary) the database at `db_path`.
    pub fn open(db_path: &Path, embedder: Arc<dyn TextEmbedder>) -> anyhow::Result<Self> {
        info!("Opening embedded vector store at {:?}", db_path);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| anyhow!("Failed to open database {:?}: {}", db_path, e))?;
        Ok(SqliteMessageEngine {
            db_path: db_path.to_path_buf(),
            conn,
            embedder,
        })
    }

    fn collection_exists(&self) -> anyhow::Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='messages'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn search_by_embedding(
        &self,
        query_embedding: &[f32],
        limit: usize,
        score_threshold: f32,
    ) -> anyhow::Result<Vec<SearchHit>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT m.uuid, m.file_path, m.line_number, m.role, m.snippet,
                        m.timestamp, m.session_id, e.embedding
                 FROM messages m
                 JOIN message_embeddings e ON m.uuid = e.uuid",
            )
            .map_err(|e| anyhow!("Failed to prepare search query: {}", e))?;

        let row_iter = stmt
            .query_map([], |row| {
                let embedding_bytes: Vec<u8> = row.get(7)?;
                Ok((
                    SearchHit {
                        uuid: row.get(0)?,
                        file_path: row.get(1)?,
                        line_number: row.get::<_, i64>(2)? as u64,
                        role: row.get(3)?,
                        snippet: row.get(4)?,
                        score: 0.0,
                        timestamp: row.get(5)?,
                        session_id: row.get(6)?,
                    },
                    embedding_bytes,
                ))
            })
            .map_err(|e| anyhow!("Failed to query embeddings: {}", e))?;

        let mut hits = Vec::new();
        for row in row_iter {
            let (mut hit, embedding_bytes) =
                row.map_err(|e| anyhow!("Failed to read embedding row: {}", e))?;

            // Convert bytes back to f32 vector
            let embedding: Vec<f32> = embedding_bytes
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect();

            hit.score = cosine_similarity(query_embedding, &embedding);
            if hit.score >= score_threshold {
                hits.push(hit);
            }
        }

        // Rank by similarity descending, then cap at the requested limit
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);

        debug!("Embedded search returned {} hit(s).", hits.len());
        Ok(hits)
    }
}

/// Dot product of two vectors; for L2-normalized embeddings this is cosine
/// similarity. Mismatched lengths score 0.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

impl MessageIndexer for SqliteMessageEngine {
    fn ensure_collection(&self) -> anyhow::Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                    uuid TEXT PRIMARY KEY,
                    file_path TEXT NOT NULL,
                    line_number INTEGER NOT NULL,
                    role TEXT NOT NULL,
                    snippet TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    session_id TEXT NOT NULL
                )",
            [],
        )?;
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS message_embeddings (
                    uuid TEXT PRIMARY KEY,
                    embedding BLOB NOT NULL
                )",
            [],
        )?;
        debug!("Ensured vector tables in {:?}", self.db_path);
        Ok(())
    }

    fn index_messages(&self, messages: &[LogMessage]) -> anyhow::Result<usize> {
        if messages.is_empty() {
            return Ok(0);
        }

        self.ensure_collection()?;

        let texts: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        let embeddings = self.embedder.embed_many(&texts)?;
        ensure!(
            embeddings.len() == messages.len(),
            "Embedding batch size mismatch: {} message(s) but {} embedding(s)",
            messages.len(),
            embeddings.len()
        );

        for (message, embedding) in messages.iter().zip(embeddings.iter()) {
            let embedding_bytes: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
            self.conn
                .execute(
                    "INSERT OR REPLACE INTO messages
                         (uuid, file_path, line_number, role, snippet, timestamp, session_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        message.uuid,
                        message.file_path,
                        message.line_number as i64,
                        message.role,
                        make_snippet(&message.content),
                        message.timestamp,
                        message.session_id,
                    ],
                )
                .map_err(|e| anyhow!("Failed to insert message: {}", e))?;
            self.conn
                .execute(
                    "INSERT OR REPLACE INTO message_embeddings (uuid, embedding) VALUES (?1, ?2)",
                    rusqlite::params![message.uuid, embedding_bytes],
                )
                .map_err(|e| anyhow!("Failed to insert embedding: {}", e))?;
        }

        debug!(
            "Indexed {} message(s) into {:?}",
            messages.len(),
            self.db_path
        );
        Ok(messages.len())
    }

    fn stats(&self) -> anyhow::Result<CollectionStats> {
        let collection = self.db_path.to_string_lossy().into_owned();
        if !self.collection_exists()? {
            return Ok(CollectionStats::not_found(collection));
        }
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(CollectionStats {
            collection,
            points_count: count as u64,
            status: "ok".to_string(),
        })
    }

    fn drop_collection(&self) -> anyhow::Result<()> {
        self.conn.execute("DROP TABLE IF EXISTS message_embeddings", [])?;
        self.conn.execute("DROP TABLE IF EXISTS messages", [])?;
        info!("Dropped vector tables in {:?}", self.db_path);
        Ok(())
    }
}

impl MessageSearch for SqliteMessageEngine {
    fn search(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f32,
    ) -> anyhow::Result<Vec<SearchHit>> {
        // A never-ingested project is a valid, queryable-but-empty state
        if !self.collection_exists()? {
            debug!("No collection in {:?}; returning empty results", self.db_path);
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query)?;
        self.search_by_embedding(&query_embedding, limit, score_threshold)
    }
}
