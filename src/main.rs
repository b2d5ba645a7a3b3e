//! # ragline CLI
//!
//! ```bash
//! ragline --config ./config/ragline.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragline init` | Create the SQLite database and run schema migrations |
//! | `ragline sync` | One poll cycle: detect changes and process them now |
//! | `ragline watch` | Run the watcher/processor loop until interrupted |
//! | `ragline ask "<question>"` | Answer a question from indexed context |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use ragline::agent::QueryAgent;
use ragline::bus::{MessageBus, TOPIC_CHANGES, TOPIC_FAILED};
use ragline::config::{load_config, Config};
use ragline::embedding::OpenAiEmbeddings;
use ragline::llm::OpenAiChat;
use ragline::models::Query;
use ragline::processor::DocumentProcessor;
use ragline::source::DocumentSource;
use ragline::source_drive::DriveSource;
use ragline::source_fs::FilesystemSource;
use ragline::store::VectorStore;
use ragline::store_sqlite::SqliteStore;
use ragline::watcher::SourceWatcher;
use ragline::{db, migrate};

/// ragline — watch a document folder, embed its contents, and answer
/// questions against them.
#[derive(Parser)]
#[command(
    name = "ragline",
    about = "A drive-folder RAG service: watch, chunk, embed, retrieve, answer",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Run one poll cycle and process every detected change before exiting.
    Sync,

    /// Watch the source on a timer, processing changes as they arrive.
    /// Stops on Ctrl-C.
    Watch,

    /// Ask a question against the indexed context.
    Ask {
        /// The question text.
        question: String,

        /// Retrieval partition to search ("docs" or "business").
        #[arg(long, default_value = "docs")]
        context_type: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ragline=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Sync => run_sync(&config).await,
        Commands::Watch => run_watch(&config).await,
        Commands::Ask {
            question,
            context_type,
        } => run_ask(&config, &question, &context_type).await,
    }
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    println!("initialized {}", config.db.path.display());
    Ok(())
}

fn build_source(config: &Config) -> Result<Arc<dyn DocumentSource>> {
    if let Some(fs) = &config.source.filesystem {
        return Ok(Arc::new(FilesystemSource::new(fs)?));
    }
    if let Some(drive) = &config.source.drive {
        return Ok(Arc::new(DriveSource::new(drive)?));
    }
    bail!("no document source configured; set [source.filesystem] or [source.drive]");
}

async fn run_sync(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let source = build_source(config)?;
    let store: Arc<dyn VectorStore> = Arc::new(SqliteStore::new(pool));
    let embedder = Arc::new(OpenAiEmbeddings::new(&config.embedding)?);
    let bus = Arc::new(MessageBus::new());

    let processor = DocumentProcessor::new(
        Arc::clone(&source),
        Arc::clone(&store),
        embedder,
        Arc::clone(&bus),
        config.chunking.clone(),
        config.embedding.batch_size,
    );

    let watcher = SourceWatcher::new(source, bus);
    watcher.seed_from_store(store.as_ref()).await?;

    let (stats, events) = watcher.scan().await?;
    let mut processed = 0usize;
    let mut failed = 0usize;
    for event in &events {
        match processor.handle_change(event).await {
            Ok(()) => processed += 1,
            Err(err) => {
                failed += 1;
                eprintln!("  {}: {}", event.source_id, err);
            }
        }
    }

    println!("sync");
    println!("  created: {}", stats.created);
    println!("  modified: {}", stats.modified);
    println!("  deleted: {}", stats.deleted);
    println!("  processed: {processed}");
    if failed > 0 {
        println!("  failed: {failed}");
    }
    println!("ok");
    Ok(())
}

async fn run_watch(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let source = build_source(config)?;
    let store: Arc<dyn VectorStore> = Arc::new(SqliteStore::new(pool));
    let embedder = Arc::new(OpenAiEmbeddings::new(&config.embedding)?);
    let bus = Arc::new(MessageBus::new());

    let processor = Arc::new(DocumentProcessor::new(
        Arc::clone(&source),
        Arc::clone(&store),
        embedder,
        Arc::clone(&bus),
        config.chunking.clone(),
        config.embedding.batch_size,
    ));
    bus.subscribe(TOPIC_CHANGES, processor);

    let watcher = SourceWatcher::new(source, Arc::clone(&bus));
    bus.subscribe(TOPIC_FAILED, watcher.failure_subscriber());
    watcher.seed_from_store(store.as_ref()).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupt received; shutting down");
        let _ = shutdown_tx.send(true);
    });

    info!(
        interval_secs = config.watcher.poll_interval_secs,
        "watching for changes"
    );
    watcher
        .run(
            std::time::Duration::from_secs(config.watcher.poll_interval_secs),
            shutdown_rx,
        )
        .await;
    Ok(())
}

async fn run_ask(config: &Config, question: &str, context_type: &str) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;

    let store: Arc<dyn VectorStore> = Arc::new(SqliteStore::new(pool));
    let embedder = Arc::new(OpenAiEmbeddings::new(&config.embedding)?);
    let llm = Arc::new(OpenAiChat::new(&config.llm)?);

    let agent = QueryAgent::new(
        store,
        embedder,
        llm,
        config.retrieval.top_k,
        config.retrieval.max_context_chars,
    );

    let answer = agent
        .answer(&Query {
            text: question.to_string(),
            context_type: context_type.to_string(),
        })
        .await
        .map_err(|err| anyhow::anyhow!("query failed: {err}"))?;

    println!("{}", answer.text);
    if answer.has_context() {
        println!();
        println!("supporting chunks:");
        for id in &answer.supporting_chunk_ids {
            println!("  {id}");
        }
    }
    Ok(())
}
