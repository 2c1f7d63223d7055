use crate::parser::{collect_messages, discover_log_files};
use crate::state::StateStore;
use crate::traits::{MessageIndexer, MessageSearch, SearchHit};
use anyhow::Result;
use log::{debug, info, warn};
use std::path::Path;

/// Outcome of one ingestion run over a project.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Log files discovered for the project.
    pub files_seen: usize,
    /// Files that produced at least one newly indexed message.
    pub files_indexed: usize,
    /// Messages indexed across all files this run.
    pub messages_indexed: usize,
    /// Per-file failures, as "<file>: <error>". A failing file never blocks
    /// the others.
    pub failures: Vec<String>,
}

/// A search hit tagged with the project it came from.
#[derive(Debug, Clone)]
pub struct ProjectHit {
    pub project: String,
    pub hit: SearchHit,
}

/// Runs one incremental ingestion pass over a project's log directory.
///
/// Each file is handled independently: read the tracked offset (0 when `full`
/// forces a rebuild), materialize all new messages up to the current end of
/// file, skip the file when nothing new is found, otherwise index the batch
/// and only then record the scan's end-of-data offset. Progress is never
/// advanced past data that has not been durably written, so a crash costs at
/// worst re-processing, never lost records.
pub fn ingest_project(
    engine: &dyn MessageIndexer,
    state: &StateStore,
    project: &str,
    project_dir: &Path,
    full: bool,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();

    let log_files = discover_log_files(project_dir);
    report.files_seen = log_files.len();
    debug!(
        "Ingesting project {}: {} log file(s) in {:?}",
        project,
        log_files.len(),
        project_dir
    );

    for log_file in &log_files {
        let filename = log_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match ingest_file(engine, state, project, log_file, &filename, full) {
            Ok(0) => {}
            Ok(count) => {
                report.files_indexed += 1;
                report.messages_indexed += count;
            }
            Err(e) => {
                // A dead backend fails every file the same way; surface it
                // once instead of degrading into per-file noise.
                if e.downcast_ref::<crate::engines::BackendUnreachable>().is_some() {
                    return Err(e);
                }
                warn!("Failed to ingest {}/{}: {:#}", project, filename, e);
                report.failures.push(format!("{}: {:#}", filename, e));
            }
        }
    }

    if report.messages_indexed > 0 {
        info!(
            "Indexed {} message(s) from {} file(s) in project {}",
            report.messages_indexed, report.files_indexed, project
        );
    }
    Ok(report)
}

fn ingest_file(
    engine: &dyn MessageIndexer,
    state: &StateStore,
    project: &str,
    log_file: &Path,
    filename: &str,
    full: bool,
) -> Result<usize> {
    let start_offset = if full {
        0
    } else {
        state.offset(project, filename)?
    };

    let (messages, end_offset) = collect_messages(log_file, start_offset)?;
    if messages.is_empty() {
        debug!("No new messages in {} (offset {})", filename, start_offset);
        return Ok(0);
    }

    let count = engine.index_messages(&messages)?;
    state.record_progress(project, filename, end_offset, count as u64)?;
    Ok(count)
}

/// Searches across a set of projects, each against its own collection.
///
/// A project that was never ingested contributes zero results; that is not an
/// error for the overall query. Results are merged, sorted by similarity
/// descending, and truncated to `limit`. Backend connectivity failures
/// propagate so callers can surface them distinctly from an empty result set.
pub fn search_projects<F>(
    open_engine: F,
    projects: &[String],
    query: &str,
    limit: usize,
    score_threshold: f32,
) -> Result<Vec<ProjectHit>>
where
    F: Fn(&str) -> Result<Box<dyn MessageSearch>>,
{
    let mut all_hits = Vec::new();

    for project in projects {
        let engine = open_engine(project)?;
        let hits = engine.search(query, limit, score_threshold)?;
        debug!("Project {} contributed {} hit(s)", project, hits.len());
        all_hits.extend(hits.into_iter().map(|hit| ProjectHit {
            project: project.clone(),
            hit,
        }));
    }

    all_hits.sort_by(|a, b| {
        b.hit
            .score
            .partial_cmp(&a.hit.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    all_hits.truncate(limit);
    Ok(all_hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::SqliteMessageEngine;
    use crate::traits::TextEmbedder;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::TempDir;

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
        Arc::new(HashEmbedder { dim: 32 })
    }

    fn user_line(uuid: &str, content: &str) -> String {
        serde_json::json!({
            "type": "user",
            "uuid": uuid,
            "message": {"role": "user", "content": content},
            "timestamp": "2025-01-15T10:00:00Z",
            "sessionId": "session-001",
        })
        .to_string()
    }

    fn write_lines(path: &Path, lines: &[String]) {
        let mut file = std::fs::File::create(path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    #[test]
    fn ingest_then_incremental_append() {
        let state_dir = TempDir::new().unwrap();
        let logs_dir = TempDir::new().unwrap();
        let state = StateStore::with_base_dir(state_dir.path());
        let engine =
            SqliteMessageEngine::open(&state.db_path("proj"), embedder()).unwrap();

        let log_path = logs_dir.path().join("session.jsonl");
        write_lines(
            &log_path,
            &[user_line("u-1", "first"), user_line("u-2", "second")],
        );

        let report = ingest_project(&engine, &state, "proj", logs_dir.path(), false).unwrap();
        assert_eq!(report.files_seen, 1);
        assert_eq!(report.messages_indexed, 2);
        assert!(report.failures.is_empty());
        assert_eq!(engine.stats().unwrap().points_count, 2);

        // Second pass with no new data indexes nothing and keeps counts
        let report = ingest_project(&engine, &state, "proj", logs_dir.path(), false).unwrap();
        assert_eq!(report.messages_indexed, 0);
        assert_eq!(state.summary("proj").unwrap().total_indexed, 2);

        // Append one record; only it is picked up, and counts accumulate
        {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&log_path)
                .unwrap();
            writeln!(file, "{}", user_line("u-3", "third")).unwrap();
        }
        let report = ingest_project(&engine, &state, "proj", logs_dir.path(), false).unwrap();
        assert_eq!(report.messages_indexed, 1);
        assert_eq!(engine.stats().unwrap().points_count, 3);
        assert_eq!(state.summary("proj").unwrap().total_indexed, 3);
    }

    #[test]
    fn file_with_no_ingestible_records_is_skipped() {
        let state_dir = TempDir::new().unwrap();
        let logs_dir = TempDir::new().unwrap();
        let state = StateStore::with_base_dir(state_dir.path());
        let engine =
            SqliteMessageEngine::open(&state.db_path("proj"), embedder()).unwrap();

        write_lines(
            &logs_dir.path().join("noise.jsonl"),
            &[r#"{"type": "file-history-snapshot", "snapshot": {}}"#.to_string()],
        );

        let report = ingest_project(&engine, &state, "proj", logs_dir.path(), false).unwrap();
        assert_eq!(report.files_seen, 1);
        assert_eq!(report.messages_indexed, 0);
        // Skipped entirely: no progress entry, no collection created
        assert_eq!(state.summary("proj").unwrap().files_tracked, 0);
        assert_eq!(engine.stats().unwrap().status, "not_found");
    }

    #[test]
    fn full_rebuild_rereads_from_offset_zero() {
        let state_dir = TempDir::new().unwrap();
        let logs_dir = TempDir::new().unwrap();
        let state = StateStore::with_base_dir(state_dir.path());
        let engine =
            SqliteMessageEngine::open(&state.db_path("proj"), embedder()).unwrap();

        let log_path = logs_dir.path().join("session.jsonl");
        write_lines(&log_path, &[user_line("u-1", "first")]);

        ingest_project(&engine, &state, "proj", logs_dir.path(), false).unwrap();
        let report = ingest_project(&engine, &state, "proj", logs_dir.path(), true).unwrap();
        assert_eq!(report.messages_indexed, 1);
        // The store dedups by uuid, so a rebuild does not duplicate points
        assert_eq!(engine.stats().unwrap().points_count, 1);
    }

    #[test]
    fn search_merges_ranks_and_truncates_across_projects() {
        let state_dir = TempDir::new().unwrap();
        let state = StateStore::with_base_dir(state_dir.path());
        let shared = embedder();

        for (project, uuid, content) in [
            ("alpha", "a-1", "rust borrow checker lifetimes"),
            ("beta", "b-1", "rust async executors"),
            ("beta", "b-2", "gardening tips for spring"),
        ] {
            let engine =
                SqliteMessageEngine::open(&state.db_path(project), shared.clone()).unwrap();
            engine
                .index_messages(&[crate::traits::LogMessage {
                    uuid: uuid.to_string(),
                    role: "user".to_string(),
                    content: content.to_string(),
                    timestamp: "2025-01-15T10:00:00Z".to_string(),
                    session_id: "s".to_string(),
                    file_path: "/x.jsonl".to_string(),
                    line_number: 1,
                    byte_offset: 0,
                }])
                .unwrap();
        }

        let projects = vec![
            "alpha".to_string(),
            "beta".to_string(),
            "never-ingested".to_string(),
        ];
        let state_ref = &state;
        let shared_ref = &shared;
        let hits = search_projects(
            |project| {
                let engine =
                    SqliteMessageEngine::open(&state_ref.db_path(project), shared_ref.clone())?;
                Ok(Box::new(engine) as Box<dyn MessageSearch>)
            },
            &projects,
            "rust lifetimes",
            2,
            0.0,
        )
        .unwrap();

        assert_eq!(hits.len(), 2);
        // Sorted by similarity descending across projects
        assert!(hits[0].hit.score >= hits[1].hit.score);
        assert_eq!(hits[0].project, "alpha");
    }

    #[test]
    fn empty_project_set_searches_to_empty() {
        let open = |_: &str| -> Result<Box<dyn MessageSearch>> {
            unreachable!("no projects to open")
        };
        let hits = search_projects(open, &[], "anything", 5, 0.3).unwrap();
        assert!(hits.is_empty());
    }
}
