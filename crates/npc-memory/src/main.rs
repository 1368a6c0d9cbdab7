//! NPC Memory daemon - gateway, worker, or both in one process

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use npc_memory::MemoryError;
use npc_memory::config::{Config, PipelineMode};
use npc_memory::embedding::{build_embedder, build_fallback};
use npc_memory::error::Result;
use npc_memory::gateway::{Dispatch, GatewayState, RequestGateway, create_gateway_router};
use npc_memory::index::build_index;
use npc_memory::metrics;
use npc_memory::queue::{DirectPushQueue, LocalQueue, RedeliveryPolicy, TaskQueue};
use npc_memory::reply::{HttpReplyChannel, MemoryReplyChannel, ReplyChannel, reply_routes};
use npc_memory::worker::{AdmissionGate, PushWorker, TaskExecutor, create_worker_router};

const REPLY_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// NPC Memory - conversational memory for game characters
#[derive(Parser)]
#[command(name = "npc-memory")]
#[command(about = "Request-reply memory pipeline for game characters")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start serving HTTP (default command)
    #[command(name = "serve")]
    Serve {
        /// Which side of the pipeline this process runs
        #[arg(long, value_enum, default_value_t = Role::All)]
        role: Role,

        /// Override `server.listen_addr`
        #[arg(long)]
        listen: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Client-facing API plus the reply store
    Gateway,
    /// Push endpoint executing tasks
    Worker,
    /// Gateway and worker in one process over an in-process queue
    All,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None => serve(cli.config, Role::All, None).await,
        Some(Command::Serve { role, listen }) => serve(cli.config, role, listen).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,npc_memory=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(config_path: Option<PathBuf>, role: Role, listen: Option<String>) -> Result<()> {
    tracing::info!(?role, "Starting NPC memory service");

    let mut config = Config::load(config_path.as_deref())?;
    if let Some(addr) = listen {
        config.server.listen_addr = addr;
    }
    tracing::debug!("Config loaded: {:?}", config);

    let mut app = match role {
        Role::Gateway => gateway_app(&config).await?,
        Role::Worker => worker_app(&config).await?,
        Role::All => combined_app(&config).await?,
    };
    if config.metrics.enabled {
        app = app.merge(metrics::metrics_routes(metrics::install()?));
        tracing::info!("Prometheus metrics at /metrics");
    }

    let addr = &config.server.listen_addr;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| MemoryError::Config(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!(?role, "Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("NPC memory service stopped");
    Ok(())
}

async fn build_executor(config: &Config) -> Result<Arc<TaskExecutor>> {
    let embedder = build_embedder(&config.embedding)?;
    let fallback = build_fallback(&config.embedding);
    let index = build_index(&config.index, config.embedding.dimension).await?;
    tracing::info!(
        embedder = embedder.name(),
        index = index.name(),
        "Executor initialized"
    );
    Ok(Arc::new(TaskExecutor::from_config(
        config, embedder, fallback, index,
    )))
}

fn reply_store() -> Arc<MemoryReplyChannel> {
    let store = Arc::new(MemoryReplyChannel::new());
    store.spawn_sweeper(REPLY_SWEEP_INTERVAL);
    store
}

async fn gateway_app(config: &Config) -> Result<Router> {
    let timeout = config.pipeline.request_timeout();

    if config.pipeline.mode == PipelineMode::Sync {
        let executor = build_executor(config).await?;
        let state = GatewayState {
            index: Some(Arc::clone(executor.index())),
            gateway: RequestGateway::new(Dispatch::Direct(executor), timeout),
        };
        return Ok(create_gateway_router(Arc::new(state)));
    }

    let store = reply_store();
    let queue: Arc<dyn TaskQueue> = Arc::new(DirectPushQueue::new(&config.queue)?);
    let replies: Arc<dyn ReplyChannel> = store;
    let state = GatewayState {
        gateway: RequestGateway::new(
            Dispatch::Queued {
                queue,
                replies: Arc::clone(&replies),
            },
            timeout,
        ),
        index: None,
    };

    Ok(create_gateway_router(Arc::new(state)).merge(reply_routes(replies)))
}

async fn worker_app(config: &Config) -> Result<Router> {
    let reply_url = config.pipeline.reply_store_url.as_deref().ok_or_else(|| {
        MemoryError::Config("pipeline.reply_store_url is required for the worker role".to_string())
    })?;
    let replies: Arc<dyn ReplyChannel> = Arc::new(
        HttpReplyChannel::new(reply_url)?
            .with_push_timeout(config.pipeline.reply_push_timeout()),
    );

    let executor = build_executor(config).await?;
    let worker = PushWorker::new(
        AdmissionGate::new(config.worker.max_in_flight),
        executor,
        replies,
        config.pipeline.reply_ttl(),
    );
    tracing::info!(
        max_in_flight = config.worker.max_in_flight,
        reply_store = reply_url,
        "Worker initialized"
    );
    Ok(create_worker_router(Arc::new(worker)))
}

async fn combined_app(config: &Config) -> Result<Router> {
    let executor = build_executor(config).await?;
    let index = Arc::clone(executor.index());
    let timeout = config.pipeline.request_timeout();

    let dispatch = match config.pipeline.mode {
        PipelineMode::Sync => Dispatch::Direct(executor),
        PipelineMode::AsyncRequestReply => {
            let replies: Arc<dyn ReplyChannel> = reply_store();
            let worker = Arc::new(PushWorker::new(
                AdmissionGate::new(config.worker.max_in_flight),
                executor,
                Arc::clone(&replies),
                config.pipeline.reply_ttl(),
            ));
            let queue: Arc<dyn TaskQueue> = Arc::new(LocalQueue::new(
                worker,
                config.queue.subscription.clone(),
                RedeliveryPolicy::from_config(&config.queue),
            ));
            Dispatch::Queued { queue, replies }
        }
    };

    let state = GatewayState {
        gateway: RequestGateway::new(dispatch, timeout),
        index: Some(index),
    };
    Ok(create_gateway_router(Arc::new(state)))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
