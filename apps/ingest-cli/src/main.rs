//! Ingest CLI entry point.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use ingest_protocol::{Blob, CommitPayload, Origin, UploadItem, UploadSource};
use ingest_transfer::{
    MemoryTransport, ResumableTransport, SessionStore, TusClient, default_store_path,
};
use ingest_uploader::{
    DefaultPayloadBuilder, HttpIngest, IngestApi, IngestFuture, Orchestrator, QueueEvent,
    UploadQueue,
};
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "ingest")]
#[command(about = "Upload files, URLs and pasted text to the ingestion API")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, env = "INGEST_CONFIG")]
    config: Option<PathBuf>,

    /// Server root URL (overrides config)
    #[arg(long)]
    server: Option<String>,

    /// API key (overrides config)
    #[arg(long, env = "INGEST_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Destination history id (overrides config)
    #[arg(long)]
    history: Option<String>,

    /// Bytes per chunk
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Give up after this many retries of a transient failure
    #[arg(long)]
    attempts: Option<u32>,

    /// Remote URL for the backend to fetch (repeatable)
    #[arg(long = "url")]
    urls: Vec<String>,

    /// Text to upload as a dataset (repeatable)
    #[arg(long = "paste")]
    pastes: Vec<String>,

    /// Path in the server-side FTP staging area (repeatable)
    #[arg(long = "staged")]
    staged: Vec<String>,

    /// Commit all staged paths in one request
    #[arg(long)]
    batch_staged: bool,

    /// Datatype extension for every item, e.g. `fastqsanger`
    #[arg(long)]
    ext: Option<String>,

    /// Genome build for every item
    #[arg(long)]
    dbkey: Option<String>,

    /// Queue files even if one with the same name and size is already queued
    #[arg(long)]
    force: bool,

    /// Run against an in-memory transport and log payloads instead of sending
    #[arg(long)]
    dry_run: bool,

    /// Local files to upload
    files: Vec<PathBuf>,
}

/// Logs commit payloads instead of posting them.
struct DryRunIngest;

impl IngestApi for DryRunIngest {
    fn fetch<'a>(&'a self, payload: &'a CommitPayload) -> IngestFuture<'a> {
        Box::pin(async move {
            let json = serde_json::to_value(payload)?;
            tracing::info!(payload = %json, "dry run: commit not sent");
            Ok(json)
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match CliConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            CliConfig::default()
        }
    };
    if let Some(server) = &cli.server {
        config.server_url = server.clone();
    }
    if let Some(key) = &cli.api_key {
        config.api_key = key.clone();
    }
    if let Some(history) = &cli.history {
        config.history_id = history.clone();
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    if cli.attempts.is_some() {
        config.attempts = cli.attempts;
    }
    if config.history_id.is_empty() {
        bail!("no destination history: pass --history or set history_id in the config");
    }

    let items = collect_items(&cli, &config.history_id)?;
    if items.is_empty() {
        bail!("nothing to upload");
    }

    let upload_config = config.upload_config();
    let (transport, api): (Arc<dyn ResumableTransport>, Arc<dyn IngestApi>) = if cli.dry_run {
        (Arc::new(MemoryTransport::default()), Arc::new(DryRunIngest))
    } else {
        let http = upload_config
            .http_client()
            .context("failed to build HTTP client")?;
        let store = match config.session_store.clone().or_else(default_store_path) {
            Some(path) => SessionStore::open(path).context("failed to open session store")?,
            None => SessionStore::in_memory(),
        };
        let mut tus = TusClient::new(http.clone(), &config.server_url, Arc::new(store))?;
        let mut ingest = HttpIngest::new(http, &config.server_url)?;
        if !config.api_key.is_empty() {
            tus = tus.with_api_key(config.api_key.clone());
            ingest = ingest.with_api_key(config.api_key.clone());
        }
        (Arc::new(tus), Arc::new(ingest))
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        server = %config.server_url,
        history = %config.history_id,
        dry_run = cli.dry_run,
        "starting upload"
    );

    let orchestrator = Arc::new(Orchestrator::new(transport, api, &upload_config));
    let queue = Arc::new(UploadQueue::new(
        orchestrator,
        Arc::new(DefaultPayloadBuilder),
        &upload_config,
    ));
    let mut events = queue
        .take_events()
        .context("queue events already taken")?;
    queue.add(items);

    let handle = queue
        .start(cli.batch_staged)
        .context("queue is already running")?;

    tokio::spawn(handle_interrupts(Arc::clone(&queue), || async {
        tokio::signal::ctrl_c().await.is_ok()
    }));

    let mut failures = 0usize;
    while let Some(event) = events.recv().await {
        match event {
            QueueEvent::Announced { index, item } => {
                println!("[{index}] queued {}", item.name())
            }
            QueueEvent::Started { index } => println!("[{index}] uploading"),
            QueueEvent::Progress { index, percent } => println!("[{index}] {percent}%"),
            QueueEvent::Warning { index, message } => eprintln!("[{index}] {message}"),
            QueueEvent::Success { index, response } => println!("[{index}] done: {response}"),
            QueueEvent::Error { index, message } => {
                failures += 1;
                eprintln!("[{index}] failed: {message}");
            }
            QueueEvent::Complete => break,
        }
    }
    handle.await.context("upload task panicked")?;

    if failures > 0 {
        bail!("{failures} upload(s) failed");
    }
    if !queue.is_empty() {
        bail!("{} upload(s) not started", queue.len());
    }
    Ok(())
}

/// Pauses the queue on the first interrupt and aborts the active upload on
/// the second. `interrupted` resolves to `false` if no signal can arrive.
async fn handle_interrupts<F, Fut>(queue: Arc<UploadQueue>, mut interrupted: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if !interrupted().await {
        return;
    }
    tracing::warn!("interrupted, stopping after the current upload (Ctrl-C again to abort it)");
    queue.stop();

    if interrupted().await {
        tracing::warn!("interrupted again, aborting the current upload");
        queue.cancel_token().cancel();
    }
}

/// Turns the command line sources into queue items.
fn collect_items(cli: &Cli, history_id: &str) -> Result<Vec<UploadItem>> {
    let mut items = Vec::new();

    for path in &cli.files {
        let blob = Blob::from_path(path)
            .with_context(|| format!("cannot upload {}", path.display()))?;
        let origin = if cli.force { Origin::New } else { Origin::Local };
        items.push(
            UploadItem::new(path.display().to_string(), history_id, origin)
                .with_source(UploadSource::Blob(blob)),
        );
    }
    for url in &cli.urls {
        items.push(
            UploadItem::new(url.clone(), history_id, Origin::Url).with_source(UploadSource::Url {
                url: url.clone(),
                name: None,
            }),
        );
    }
    for (i, content) in cli.pastes.iter().enumerate() {
        items.push(
            UploadItem::new(format!("paste-{i}"), history_id, Origin::Pasted).with_source(
                UploadSource::Pasted {
                    content: content.clone(),
                    name: None,
                },
            ),
        );
    }
    for path in &cli.staged {
        items.push(
            UploadItem::new(path.clone(), history_id, Origin::FtpStaged)
                .with_source(UploadSource::Staged { path: path.clone() }),
        );
    }

    for item in &mut items {
        if let Some(ext) = &cli.ext {
            item.metadata.insert("ext".into(), ext.clone().into());
        }
        if let Some(dbkey) = &cli.dbkey {
            item.metadata.insert("dbkey".into(), dbkey.clone().into());
        }
    }
    Ok(items)
}
