use crate::engines::make_snippet;
use crate::traits::{
    CollectionStats, LogMessage, MessageIndexer, MessageSearch, SearchHit, TextEmbedder,
};
use anyhow::{bail, ensure};
use log::{debug, info};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Points per physical upsert call against the networked store.
pub const WRITE_BATCH: usize = 100;

/// The index backend could not be reached at all. Kept as a distinct error
/// type so callers can tell "backend down" apart from "no results found".
#[derive(Debug)]
pub struct BackendUnreachable {
    pub url: String,
    pub detail: String,
}

impl std::fmt::Display for BackendUnreachable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cannot reach the index backend at {}: {}",
            self.url, self.detail
        )
    }
}

impl std::error::Error for BackendUnreachable {}

/// Networked vector store backed by the Qdrant REST API, one collection per
/// project. Upserts are keyed by point id, so re-indexing an identifier
/// overwrites the stored point.
pub struct QdrantMessageEngine {
    base_url: String,
    collection: String,
    client: Client,
    embedder: Arc<dyn TextEmbedder>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    result: T,
}

#[derive(Debug, Default, Deserialize)]
struct CollectionDescription {
    #[serde(default)]
    status: String,
    #[serde(default)]
    points_count: Option<u64>,
}

#[derive(Debug, Serialize)]
struct VectorParams {
    size: usize,
    distance: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct PointPayload {
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub line_number: u64,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Serialize)]
struct PointStruct {
    id: String,
    vector: Vec<f32>,
    payload: PointPayload,
}

#[derive(Debug, Serialize)]
struct UpsertPoints<'a> {
    points: &'a [PointStruct],
}

#[derive(Debug, Serialize)]
struct SearchRequest {
    vector: Vec<f32>,
    limit: usize,
    score_threshold: f32,
    with_payload: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Option<PointPayload>,
}

impl QdrantMessageEngine {
    pub fn new(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        embedder: Arc<dyn TextEmbedder>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        QdrantMessageEngine {
            base_url,
            collection: collection.into(),
            client: Client::new(),
            embedder,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.base_url, self.collection)
    }

    /// Maps transport-level failures to [`BackendUnreachable`]; other errors
    /// pass through untouched.
    fn classify(&self, error: reqwest::Error) -> anyhow::Error {
        if error.is_connect() || error.is_timeout() {
            anyhow::Error::new(BackendUnreachable {
                url: self.base_url.clone(),
                detail: error.to_string(),
            })
        } else {
            error.into()
        }
    }

    /// Fetches collection metadata; `None` when the collection does not exist.
    fn collection_info(&self) -> anyhow::Result<Option<CollectionDescription>> {
        let response = self
            .client
            .get(self.collection_url())
            .send()
            .map_err(|e| self.classify(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: ApiResponse<CollectionDescription> = response.json()?;
                Ok(Some(body.result))
            }
            status => bail!(
                "Unexpected status {} fetching collection {}",
                status,
                self.collection
            ),
        }
    }
}

/// Converts backend search hits into [`SearchHit`]s, dropping candidates
/// strictly below the similarity threshold. Qdrant's cosine score is already
/// a similarity (higher is better).
pub(crate) fn hits_from_points(points: Vec<ScoredPoint>, score_threshold: f32) -> Vec<SearchHit> {
    points
        .into_iter()
        .filter(|p| p.score >= score_threshold)
        .map(|p| {
            let payload = p.payload.unwrap_or_default();
            SearchHit {
                uuid: payload.uuid,
                file_path: payload.file_path,
                line_number: payload.line_number,
                role: payload.role,
                snippet: payload.snippet,
                score: p.score,
                timestamp: payload.timestamp,
                session_id: payload.session_id,
            }
        })
        .collect()
}

impl MessageIndexer for QdrantMessageEngine {
    fn ensure_collection(&self) -> anyhow::Result<()> {
        if self.collection_info()?.is_some() {
            return Ok(());
        }

        let body = CreateCollection {
            vectors: VectorParams {
                size: self.embedder.dimension(),
                distance: "Cosine",
            },
        };
        let response = self
            .client
            .put(self.collection_url())
            .json(&body)
            .send()
            .map_err(|e| self.classify(e))?;

        if response.status().is_success() {
            info!("Created collection {}", self.collection);
            return Ok(());
        }
        // A concurrent creator may have won the race; that still counts as
        // "exists" for create-if-absent semantics.
        if self.collection_info()?.is_some() {
            return Ok(());
        }
        bail!(
            "Failed to create collection {}: status {}",
            self.collection,
            response.status()
        )
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

        let points: Vec<PointStruct> = messages
            .iter()
            .zip(embeddings)
            .map(|(message, vector)| PointStruct {
                id: message.uuid.clone(),
                vector,
                payload: PointPayload {
                    file_path: message.file_path.clone(),
                    line_number: message.line_number,
                    uuid: message.uuid.clone(),
                    role: message.role.clone(),
                    snippet: make_snippet(&message.content),
                    timestamp: message.timestamp.clone(),
                    session_id: message.session_id.clone(),
                },
            })
            .collect();

        // Chunked writes: a mid-batch failure can leave earlier chunks
        // durably indexed. Re-running from the unmoved offset is safe because
        // upserts dedup by id.
        let url = format!("{}/points?wait=true", self.collection_url());
        for (chunk_index, chunk) in points.chunks(WRITE_BATCH).enumerate() {
            let response = self
                .client
                .put(&url)
                .json(&UpsertPoints { points: chunk })
                .send()
                .map_err(|e| self.classify(e))?;
            if !response.status().is_success() {
                bail!(
                    "Upsert batch {} into {} failed: status {}",
                    chunk_index,
                    self.collection,
                    response.status()
                );
            }
            debug!(
                "Upserted batch {} ({} point(s)) into {}",
                chunk_index,
                chunk.len(),
                self.collection
            );
        }

        Ok(points.len())
    }

    fn stats(&self) -> anyhow::Result<CollectionStats> {
        match self.collection_info()? {
            Some(info) => Ok(CollectionStats {
                collection: self.collection.clone(),
                points_count: info.points_count.unwrap_or(0),
                status: info.status,
            }),
            None => Ok(CollectionStats::not_found(self.collection.clone())),
        }
    }

    fn drop_collection(&self) -> anyhow::Result<()> {
        let response = self
            .client
            .delete(self.collection_url())
            .send()
            .map_err(|e| self.classify(e))?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            info!("Dropped collection {}", self.collection);
            Ok(())
        } else {
            bail!(
                "Failed to drop collection {}: status {}",
                self.collection,
                response.status()
            )
        }
    }
}

impl MessageSearch for QdrantMessageEngine {
    fn search(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f32,
    ) -> anyhow::Result<Vec<SearchHit>> {
        // A never-ingested project is a valid, queryable-but-empty state
        if self.collection_info()?.is_none() {
            debug!(
                "Collection {} does not exist; returning empty results",
                self.collection
            );
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query)?;
        let request = SearchRequest {
            vector,
            limit,
            score_threshold,
            with_payload: true,
        };
        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&request)
            .send()
            .map_err(|e| self.classify(e))?;
        if !response.status().is_success() {
            bail!(
                "Search in {} failed: status {}",
                self.collection,
                response.status()
            );
        }

        let body: ApiResponse<Vec<ScoredPoint>> = response.json()?;
        Ok(hits_from_points(body.result, score_threshold))
    }
}
