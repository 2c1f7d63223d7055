//! End-to-end flow over the embedded backend: parse JSONL logs, index,
//! track progress, search. Uses a deterministic token-hash embedder so no
//! model download is needed.

use anyhow::Result;
use convsearch::{
    MessageIndexer, MessageSearch, SqliteMessageEngine, StateStore, TextEmbedder, collect_messages,
    ingest_project, search_projects,
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Deterministic bag-of-tokens embedder: texts sharing tokens land close in
/// vector space, disjoint texts stay orthogonal.
struct HashEmbedder {
    dim: usize,
}

impl TextEmbedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text.to_lowercase().split_whitespace() {
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            vector[(hash % self.dim as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 1e-5 {
            for x in vector.iter_mut() {
                *x /= norm;
            }
        }
        Ok(vector)
    }

    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

fn embedder() -> Arc<dyn TextEmbedder> {
    Arc::new(HashEmbedder { dim: 64 })
}

fn entry(kind: &str, uuid: &str, content: serde_json::Value) -> String {
    serde_json::json!({
        "type": kind,
        "uuid": uuid,
        "message": {"role": kind, "content": content},
        "timestamp": "2025-01-15T10:00:00Z",
        "sessionId": "session-e2e",
    })
    .to_string()
}

/// 4-line conversation: 2 user messages, one assistant answer, and one
/// assistant entry carrying only a thinking block (no indexable text).
fn sample_conversation() -> Vec<String> {
    vec![
        entry(
            "user",
            "user-001",
            serde_json::json!("How do I configure nginx as a reverse proxy?"),
        ),
        entry(
            "assistant",
            "asst-001",
            serde_json::json!([{
                "type": "text",
                "text": "Edit nginx.conf and add a location block with proxy_pass."
            }]),
        ),
        entry(
            "user",
            "user-002",
            serde_json::json!("What about SSL termination for nginx?"),
        ),
        entry(
            "assistant",
            "asst-002",
            serde_json::json!([{"type": "thinking", "thinking": "considering options"}]),
        ),
    ]
}

fn write_lines(path: &Path, lines: &[String]) {
    let mut file = std::fs::File::create(path).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
}

#[test]
fn index_and_search_flow() {
    let logs = TempDir::new().unwrap();
    let state_dir = TempDir::new().unwrap();
    let log_path = logs.path().join("session.jsonl");
    write_lines(&log_path, &sample_conversation());

    // The thinking-only assistant entry is dropped at extraction
    let (messages, _) = collect_messages(&log_path, 0).unwrap();
    assert_eq!(messages.len(), 3);

    let state = StateStore::with_base_dir(state_dir.path());
    let engine = SqliteMessageEngine::open(&state.db_path("proj"), embedder()).unwrap();
    let indexed = engine.index_messages(&messages).unwrap();
    assert_eq!(indexed, 3);

    let stats = engine.stats().unwrap();
    assert_eq!(stats.points_count, 3);
    assert_eq!(stats.status, "ok");

    let hits = engine.search("nginx reverse proxy configuration", 5, 0.1).unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().any(|h| h.snippet.to_lowercase().contains("nginx")));
    // Hits point back into the original file
    assert_eq!(hits[0].file_path, log_path.to_string_lossy());
    assert!(hits[0].line_number >= 1);
}

#[test]
fn incremental_ingest_appends_without_resetting_counts() {
    let logs = TempDir::new().unwrap();
    let state_dir = TempDir::new().unwrap();
    let project_dir = logs.path().join("proj");
    std::fs::create_dir(&project_dir).unwrap();
    let log_path = project_dir.join("session.jsonl");
    write_lines(&log_path, &sample_conversation());

    let state = StateStore::with_base_dir(state_dir.path());
    let engine = SqliteMessageEngine::open(&state.db_path("proj"), embedder()).unwrap();

    let report = ingest_project(&engine, &state, "proj", &project_dir, false).unwrap();
    assert_eq!(report.messages_indexed, 3);
    let recorded = state.offset("proj", "session.jsonl").unwrap();
    assert_eq!(recorded, std::fs::metadata(&log_path).unwrap().len());

    // Append one new message and re-ingest from the recorded offset
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&log_path)
            .unwrap();
        writeln!(
            file,
            "{}",
            entry(
                "user",
                "user-003",
                serde_json::json!("How do I enable HTTP/2 in nginx?")
            )
        )
        .unwrap();
    }

    let report = ingest_project(&engine, &state, "proj", &project_dir, false).unwrap();
    assert_eq!(report.messages_indexed, 1);
    assert_eq!(engine.stats().unwrap().points_count, 4);

    // Cumulative count grows by exactly one, it is not reset
    let summary = state.summary("proj").unwrap();
    assert_eq!(summary.total_indexed, 4);
}

#[test]
fn split_run_union_matches_full_run() {
    let logs = TempDir::new().unwrap();
    let lines = sample_conversation();

    // Full run over the complete file
    let full_path = logs.path().join("full.jsonl");
    write_lines(&full_path, &lines);
    let (full, _) = collect_messages(&full_path, 0).unwrap();

    // Split run: first half, then resume from the recorded end offset
    let split_path = logs.path().join("split.jsonl");
    write_lines(&split_path, &lines[..2]);
    let (first, end) = collect_messages(&split_path, 0).unwrap();
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&split_path)
            .unwrap();
        for line in &lines[2..] {
            writeln!(file, "{}", line).unwrap();
        }
    }
    let (second, _) = collect_messages(&split_path, end).unwrap();

    let full_uuids: Vec<&str> = full.iter().map(|m| m.uuid.as_str()).collect();
    let split_uuids: Vec<&str> = first
        .iter()
        .chain(second.iter())
        .map(|m| m.uuid.as_str())
        .collect();
    assert_eq!(split_uuids, full_uuids);

    // Line numbers are stable across the split
    let full_lines: Vec<u64> = full.iter().map(|m| m.line_number).collect();
    let split_lines: Vec<u64> = first
        .iter()
        .chain(second.iter())
        .map(|m| m.line_number)
        .collect();
    assert_eq!(split_lines, full_lines);
}

#[test]
fn reingest_from_zero_does_not_duplicate() {
    let logs = TempDir::new().unwrap();
    let state_dir = TempDir::new().unwrap();
    let log_path = logs.path().join("session.jsonl");
    write_lines(&log_path, &sample_conversation());

    let state = StateStore::with_base_dir(state_dir.path());
    let engine = SqliteMessageEngine::open(&state.db_path("proj"), embedder()).unwrap();

    let (messages, _) = collect_messages(&log_path, 0).unwrap();
    engine.index_messages(&messages).unwrap();
    engine.index_messages(&messages).unwrap();

    // The store dedups by identifier, so a repeat ingest is idempotent
    assert_eq!(engine.stats().unwrap().points_count, 3);
}

#[test]
fn drop_then_stats_reports_not_found() {
    let state_dir = TempDir::new().unwrap();
    let state = StateStore::with_base_dir(state_dir.path());
    let engine = SqliteMessageEngine::open(&state.db_path("proj"), embedder()).unwrap();

    let logs = TempDir::new().unwrap();
    let log_path = logs.path().join("session.jsonl");
    write_lines(&log_path, &sample_conversation());
    let (messages, _) = collect_messages(&log_path, 0).unwrap();
    engine.index_messages(&messages).unwrap();
    assert_eq!(engine.stats().unwrap().points_count, 3);

    engine.drop_collection().unwrap();

    let stats = engine.stats().unwrap();
    assert_eq!(stats.status, "not_found");
    assert_eq!(stats.points_count, 0);
    assert!(engine.search("nginx", 5, 0.0).unwrap().is_empty());
}

#[test]
fn never_created_collection_searches_empty() {
    let state_dir = TempDir::new().unwrap();
    let state = StateStore::with_base_dir(state_dir.path());
    let engine = SqliteMessageEngine::open(&state.db_path("proj"), embedder()).unwrap();
    let hits = engine.search("anything at all", 5, 0.3).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn high_threshold_never_returns_more_than_low() {
    let state_dir = TempDir::new().unwrap();
    let state = StateStore::with_base_dir(state_dir.path());
    let engine = SqliteMessageEngine::open(&state.db_path("proj"), embedder()).unwrap();

    let logs = TempDir::new().unwrap();
    let log_path = logs.path().join("session.jsonl");
    write_lines(&log_path, &sample_conversation());
    let (messages, _) = collect_messages(&log_path, 0).unwrap();
    engine.index_messages(&messages).unwrap();

    let high = engine
        .search("unrelated quantum entanglement lecture", 5, 0.9)
        .unwrap();
    let low = engine
        .search("unrelated quantum entanglement lecture", 5, 0.1)
        .unwrap();
    assert!(high.len() <= low.len());
}

#[test]
fn cross_project_query_tags_and_ranks() {
    let state_dir = TempDir::new().unwrap();
    let state = StateStore::with_base_dir(state_dir.path());
    let shared = embedder();

    let logs = TempDir::new().unwrap();
    for (project, content) in [
        ("infra", "kubernetes ingress routing rules"),
        ("docs", "weekend hiking trail notes"),
    ] {
        let project_dir = logs.path().join(project);
        std::fs::create_dir(&project_dir).unwrap();
        write_lines(
            &project_dir.join("s.jsonl"),
            &[entry("user", &format!("{}-001", project), serde_json::json!(content))],
        );
        let engine = SqliteMessageEngine::open(&state.db_path(project), shared.clone()).unwrap();
        ingest_project(&engine, &state, project, &project_dir, false).unwrap();
    }

    let projects = vec![
        "infra".to_string(),
        "docs".to_string(),
        "empty-project".to_string(),
    ];
    let state_ref = &state;
    let shared_ref = &shared;
    let hits = search_projects(
        |project| {
            let engine: Box<dyn MessageSearch> = Box::new(SqliteMessageEngine::open(
                &state_ref.db_path(project),
                shared_ref.clone(),
            )?);
            Ok(engine)
        },
        &projects,
        "kubernetes ingress routing",
        5,
        0.0,
    )
    .unwrap();

    assert!(!hits.is_empty());
    assert_eq!(hits[0].project, "infra");
    for pair in hits.windows(2) {
        assert!(pair[0].hit.score >= pair[1].hit.score);
    }
}
