//! effin-node - cross-bank fraud signal node
//!
//! Generates (or replays) this bank's transaction stream, shares fingerprints
//! through the common index and raises alerts on cross-bank matches.
//! Serves `/health`, `/metrics` and the alert feed over HTTP.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use effin_common::config::NodeConfig;
use effin_common::crypto::LedgerCipher;
use effin_common::events::EventBus;

use effin_node::audit::EncryptedLedger;
use effin_node::encoder::FraudEncoder;
use effin_node::index::http::HttpIndexClient;
use effin_node::index::memory::InMemoryIndex;
use effin_node::index::{ensure_index, with_timeout, IndexClient, IndexConfig};
use effin_node::pipeline::{transaction_queue, Pipeline};
use effin_node::source::{run_producer, SyntheticSource};
use effin_node::AppState;

const EVENT_BUS_CAPACITY: usize = 1000;
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "effin-node", version, about = "Cross-bank fraud signal node")]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "EFFIN_CONFIG")]
    config: Option<PathBuf>,

    /// Origin this node submits as
    #[arg(short, long)]
    bank_id: Option<String>,

    /// HTTP port for health, metrics and alerts
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of worker tasks
    #[arg(short, long)]
    workers: Option<usize>,

    /// Synthetic transactions per second
    #[arg(long)]
    tps: Option<f64>,

    /// Remote index endpoint; the in-process index is used when unset
    #[arg(long)]
    index_endpoint: Option<String>,

    /// Encrypted audit ledger path
    #[arg(long)]
    audit_file: Option<PathBuf>,

    /// Log every neighbor returned by the index
    #[arg(long)]
    debug_neighbors: bool,
}

impl Args {
    fn apply(&self, config: &mut NodeConfig) {
        if let Some(bank_id) = &self.bank_id {
            config.bank_id = bank_id.clone();
            if self.audit_file.is_none() && std::env::var("EFFIN_AUDIT_FILE").is_err() {
                config.audit.file = PathBuf::from(format!("audit_{}.jsonl", bank_id));
            }
        }
        if let Some(port) = self.port {
            config.http_port = port;
        }
        if let Some(workers) = self.workers {
            config.pipeline.workers = workers;
        }
        if let Some(tps) = self.tps {
            config.source.tps = tps;
        }
        if let Some(endpoint) = &self.index_endpoint {
            config.index.endpoint = Some(endpoint.trim_end_matches('/').to_string());
        }
        if let Some(file) = &self.audit_file {
            config.audit.file = file.clone();
        }
        if self.debug_neighbors {
            config.debug_neighbors = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = NodeConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate().context("Invalid configuration")?;

    info!("Starting effin-node v{}", env!("CARGO_PKG_VERSION"));
    info!(
        bank = %config.bank_id,
        index = %config.index.name,
        workers = config.pipeline.workers,
        batch_size = config.pipeline.batch_size,
        train_after = config.pipeline.train_after,
        "Configuration resolved"
    );

    let audit_key = config
        .audit
        .key
        .as_deref()
        .context("An audit key is required (EFFIN_AUDIT_KEY or [audit] key); generate one with `effin-audit keygen`")?;
    let cipher = LedgerCipher::from_base64_key(audit_key).context("Invalid audit key")?;

    let index: Arc<dyn IndexClient> = match &config.index.endpoint {
        Some(endpoint) => {
            info!("Index endpoint: {}", endpoint);
            Arc::new(
                HttpIndexClient::new(
                    endpoint,
                    &config.index.api_key,
                    &config.index.key,
                    config.index.request_timeout,
                )
                .context("Failed to build index client")?,
            )
        }
        None => {
            warn!("No index endpoint configured, using the in-process index (alerts stay local)");
            Arc::new(InMemoryIndex::new())
        }
    };

    with_timeout(
        config.index.request_timeout,
        ensure_index(
            index.as_ref(),
            &config.index.name,
            &IndexConfig::ivfflat(config.index.dimension),
            config.index.recreate_on_start,
        ),
    )
    .await
    .context("Failed to prepare the shared index")?;

    let ledger = EncryptedLedger::open(&config.audit.file, cipher.clone())
        .await
        .context("Failed to open audit ledger")?;

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let pipeline = Pipeline::new(
        &config,
        Arc::new(FraudEncoder::new(config.index.dimension)),
        index,
        Arc::new(ledger),
        cipher,
        event_bus.clone(),
    );

    let cancel = CancellationToken::new();
    let (sender, receiver) = transaction_queue(config.pipeline.queue_capacity);
    let queue_depth = sender.depth_handle();

    let mut workers = pipeline.spawn(&receiver, &cancel);
    drop(receiver);

    let source = SyntheticSource::new(
        config.bank_id.clone(),
        config.source.tps,
        config.source.fraud_probability,
    );
    let producer = tokio::spawn(run_producer(source, sender, cancel.clone()));

    let state = AppState::new(config.bank_id.clone(), event_bus, pipeline.metrics(), queue_depth.clone());
    state.spawn_alert_recorder();
    let app = effin_node::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let server_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => {}
                _ = server_cancel.cancelled() => {}
            }
        })
        .await
        .context("HTTP server error")?;

    // The producer stops and drops its sender; workers drain the queue,
    // flush what they hold and exit once the queue is closed.
    cancel.cancel();
    match producer.await {
        Ok(produced) => info!(produced, "Producer finished"),
        Err(e) => error!("Producer task failed: {}", e),
    }

    let drained = tokio::time::timeout(WORKER_DRAIN_TIMEOUT, async {
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!("Worker task failed: {}", e);
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            dropped = queue_depth.get(),
            "Workers did not finish within {:?}, aborting",
            WORKER_DRAIN_TIMEOUT
        );
        workers.abort_all();
    }

    let snapshot = pipeline.metrics().snapshot();
    info!(
        processed = snapshot.processed,
        alerts = snapshot.alerts,
        upserts = snapshot.upserts,
        untrained_upserts = pipeline.coordinator().pending(),
        "effin-node stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
