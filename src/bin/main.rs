use anyhow::anyhow;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use convsearch::{
    BackendConfig, BackendUnreachable, ConvsearchDirs, DEFAULT_SCORE_THRESHOLD,
    DEFAULT_SEARCH_LIMIT, MessageEngine, MessageIndexer, MessageSearch, QdrantMessageEngine,
    SqliteMessageEngine, StateStore, ingest_project, parser, search_projects,
};

#[derive(Parser)]
#[command(name = "convsearch")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[clap(flatten)]
    verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum BackendKind {
    /// Per-project SQLite database, no external services
    Embedded,
    /// Qdrant server (QDRANT_URL or config.json)
    Qdrant,
}

#[derive(Subcommand)]
enum Commands {
    /// Index new conversation log content
    Index {
        /// Project to index (default: all projects with logs)
        #[clap(long, short)]
        project: Option<String>,
        /// Reindex every file from the start instead of resuming
        #[clap(long, short)]
        full: bool,
        #[clap(long, value_enum, default_value = "embedded")]
        backend: BackendKind,
    },
    /// Search indexed conversations
    Search {
        /// Search query
        query: String,
        /// Project to search (default: all indexed projects)
        #[clap(long, short)]
        project: Option<String>,
        /// Maximum number of results to return
        #[clap(long, short, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
        /// Minimum similarity score; results below are dropped
        #[clap(long, default_value_t = DEFAULT_SCORE_THRESHOLD)]
        threshold: f32,
        #[clap(long, value_enum, default_value = "embedded")]
        backend: BackendKind,
        /// Output search results in pretty format instead of json text
        #[clap(long)]
        pretty: bool,
    },
    /// Show indexing status per project
    Status {
        /// Project to check (default: all indexed projects)
        #[clap(long, short)]
        project: Option<String>,
        #[clap(long, value_enum, default_value = "embedded")]
        backend: BackendKind,
    },
    /// List projects with conversation logs
    List,
    /// Drop a project's vector collection
    Drop {
        /// Project whose collection should be removed
        #[clap(long, short)]
        project: String,
        #[clap(long, value_enum, default_value = "embedded")]
        backend: BackendKind,
    },
}

fn open_engine(
    backend: BackendKind,
    state: &StateStore,
    project: &str,
) -> anyhow::Result<Box<dyn MessageEngine>> {
    let embedder = convsearch::embed::shared()?;
    match backend {
        BackendKind::Embedded => Ok(Box::new(SqliteMessageEngine::open(
            &state.db_path(project),
            embedder,
        )?)),
        BackendKind::Qdrant => {
            let config = BackendConfig::load();
            let collection = state.load(project)?.collection_name;
            Ok(Box::new(QdrantMessageEngine::new(
                config.url(),
                collection,
                embedder,
            )))
        }
    }
}

/// Prints an actionable message and exits when the backend is unreachable,
/// so a down server is never mistaken for an empty index.
fn exit_if_unreachable(error: &anyhow::Error) {
    if let Some(unreachable) = error.downcast_ref::<BackendUnreachable>() {
        eprintln!(
            "Error: {}. Is the vector store server running?",
            unreachable
        );
        std::process::exit(1);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    let dirs = ConvsearchDirs::new();
    let state = StateStore::new();

    match cli.command {
        Commands::Index {
            project,
            full,
            backend,
        } => {
            let logs_root = dirs.logs_root();
            let projects = match project {
                Some(p) => vec![p],
                None => parser::list_all_projects(&logs_root),
            };
            if projects.is_empty() {
                println!("No projects found to index.");
                return Ok(());
            }

            let mut total_indexed = 0;
            for project in &projects {
                let project_dir = parser::project_path(&logs_root, project);
                if !project_dir.exists() {
                    println!("Project directory not found: {}", project_dir.display());
                    continue;
                }

                let engine = open_engine(backend, &state, project)?;
                let report = match ingest_project(&*engine, &state, project, &project_dir, full) {
                    Ok(report) => report,
                    Err(e) => {
                        exit_if_unreachable(&e);
                        return Err(e);
                    }
                };

                for failure in &report.failures {
                    println!("  ✗ {}", failure);
                }
                if report.messages_indexed > 0 {
                    println!(
                        "Indexed {} message(s) in {}",
                        report.messages_indexed, project
                    );
                }
                total_indexed += report.messages_indexed;
            }

            println!("\nTotal indexed: {} message(s)", total_indexed);
        }
        Commands::Search {
            query,
            project,
            limit,
            threshold,
            backend,
            pretty,
        } => {
            let projects = match project {
                Some(p) => vec![p],
                None => state.list_projects(),
            };
            if projects.is_empty() {
                return Err(anyhow!(
                    "No projects indexed. Run 'convsearch index' first."
                ));
            }

            let results = search_projects(
                |project| {
                    let engine: Box<dyn MessageSearch> = open_engine(backend, &state, project)?;
                    Ok(engine)
                },
                &projects,
                &query,
                limit,
                threshold,
            );
            let results = match results {
                Ok(results) => results,
                Err(e) => {
                    exit_if_unreachable(&e);
                    return Err(e);
                }
            };

            if !pretty {
                let json_output = serde_json::json!({
                    "query": query,
                    "results_count": results.len(),
                    "results": results.iter().map(|r| {
                        serde_json::json!({
                            "project": r.project,
                            "score": r.hit.score,
                            "role": r.hit.role,
                            "file": r.hit.file_path,
                            "line": r.hit.line_number,
                            "timestamp": r.hit.timestamp,
                            "session_id": r.hit.session_id,
                            "snippet": r.hit.snippet,
                        })
                    }).collect::<Vec<_>>()
                });
                println!("{}", serde_json::to_string_pretty(&json_output)?);
                return Ok(());
            }

            if results.is_empty() {
                println!("No results found.");
                return Ok(());
            }

            println!("Found {} result(s):", results.len());
            println!();
            for (i, result) in results.iter().enumerate() {
                let role = match result.hit.role.as_str() {
                    "user" => result.hit.role.blue(),
                    _ => result.hit.role.green(),
                };
                println!(
                    "{}. [{}] Score: {:.3}",
                    i + 1,
                    role,
                    result.hit.score
                );
                println!("   Project: {}", result.project);
                println!("   File: {}:{}", result.hit.file_path, result.hit.line_number);
                if !result.hit.timestamp.is_empty() {
                    println!("   Time: {}", result.hit.timestamp);
                }
                println!("   Preview: {}", result.hit.snippet);
                println!();
            }
        }
        Commands::Status { project, backend } => {
            let projects = match project {
                Some(p) => vec![p],
                None => state.list_projects(),
            };
            if projects.is_empty() {
                println!("No projects indexed yet.");
                return Ok(());
            }

            println!("Indexing status:\n");
            for project in &projects {
                let summary = state.summary(project)?;
                println!("Project: {}", project);
                println!("  Collection: {}", summary.collection_name);
                println!("  Files tracked: {}", summary.files_tracked);
                println!("  Total indexed: {}", summary.total_indexed);

                let engine = open_engine(backend, &state, project)?;
                match engine.stats() {
                    Ok(stats) => {
                        println!("  Store points: {}", stats.points_count);
                        println!("  Store status: {}", stats.status);
                    }
                    Err(e) => {
                        exit_if_unreachable(&e);
                        println!("  Store status: error ({:#})", e);
                    }
                }
                println!();
            }
        }
        Commands::List => {
            let logs_root = dirs.logs_root();
            let projects = parser::list_all_projects(&logs_root);
            if projects.is_empty() {
                println!("No projects found in {}", logs_root.display());
                return Ok(());
            }

            println!("Available projects:\n");
            for project in projects {
                let files = parser::discover_log_files(&parser::project_path(&logs_root, &project));
                println!("  {} ({} file(s))", project, files.len());
            }
        }
        Commands::Drop { project, backend } => {
            let engine = open_engine(backend, &state, &project)?;
            if let Err(e) = engine.drop_collection() {
                exit_if_unreachable(&e);
                return Err(e);
            }
            println!("Dropped collection for project {}", project);
        }
    }
    Ok(())
}
