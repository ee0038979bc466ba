use anyhow::Context;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use clap::Parser;
use link_queue_broker::api::{create_router, serve, ApiState};
use link_queue_broker::config::LogFormat;
use link_queue_broker::executor::AttemptExecutor;
use link_queue_broker::handler::HttpLinkHandler;
use link_queue_broker::metrics::BrokerMetrics;
use link_queue_broker::probe::HttpProbe;
use link_queue_broker::{Broker, BrokerConfig, ConsumerMode, ProcessorHandle, QueueProcessor, RequestQueue};
use link_queue_core::RetryPolicy;
use link_queue_persistence::SnapshotStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "lq-broker")]
#[command(about = "Durable linking request queue with worker API", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// API bind host
    #[arg(long)]
    host: Option<String>,

    /// API port
    #[arg(long, env = "QUEUE_API_PORT")]
    port: Option<u16>,

    /// Bearer secret required by the API
    #[arg(long, env = "QUEUE_API_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Queue snapshot file
    #[arg(long, env = "QUEUE_DATA_FILE")]
    data_file: Option<PathBuf>,

    /// Retry ceiling for failed attempts
    #[arg(long, env = "QUEUE_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Which component consumes the queue
    #[arg(long, env = "QUEUE_CONSUMER_MODE", value_enum)]
    consumer_mode: Option<ConsumerMode>,

    /// Endpoint probed before each processor cycle
    #[arg(long, env = "WORKER_HEALTH_URL")]
    health_url: Option<String>,

    /// Linking service used by the in-process processor
    #[arg(long, env = "LINKER_API_URL")]
    linker_url: Option<String>,

    /// Bearer secret for the linking service
    #[arg(long, env = "LINKER_API_SECRET", hide_env_values = true)]
    linker_secret: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_found = args.config.exists();
    let mut config = if config_found {
        BrokerConfig::from_file(&args.config)?
    } else {
        BrokerConfig::default()
    };
    apply_overrides(&mut config, args);

    init_tracing(&config);

    if !config_found {
        tracing::warn!("Config file not found, using defaults");
    }
    config.validate().context("Invalid configuration")?;

    tracing::info!("Starting broker with config: {:?}", config.redacted());

    let queue = Arc::new(RequestQueue::open(SnapshotStore::new(&config.queue.data_file)));
    let metrics = Arc::new(BrokerMetrics::new()?);
    let broker = Arc::new(Broker::new(
        queue,
        RetryPolicy::new(config.queue.max_retries),
        metrics,
    ));
    broker.refresh_queue_metrics();

    // Start metrics server
    if let Some(port) = config.monitoring.prometheus_port {
        let metrics_broker = broker.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics_broker, port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    let processor = match config.processor.consumer_mode {
        ConsumerMode::Processor => Some(start_processor(&config, broker.clone())?),
        ConsumerMode::Api => {
            tracing::info!("Consumer mode is api, queue is drained by the external worker");
            None
        }
    };

    let app = create_router(ApiState::new(broker.clone(), config.api.bearer_secret.clone()));
    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    tracing::info!("Queue API listening on {}", addr);
    serve(listener, app, shutdown, processor, config.shutdown_grace()).await?;

    tracing::info!(remaining = broker.queue().len(), "Broker stopped");
    Ok(())
}

fn apply_overrides(config: &mut BrokerConfig, args: Args) {
    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(secret) = args.secret {
        config.api.bearer_secret = secret;
    }
    if let Some(data_file) = args.data_file {
        config.queue.data_file = data_file;
    }
    if let Some(max_retries) = args.max_retries {
        config.queue.max_retries = max_retries;
    }
    if let Some(mode) = args.consumer_mode {
        config.processor.consumer_mode = mode;
    }
    if let Some(url) = args.health_url {
        config.probe.url = url;
    }
    if let Some(url) = args.linker_url {
        config.linker.url = Some(url);
    }
    if let Some(secret) = args.linker_secret {
        config.linker.bearer_secret = Some(secret);
    }
    if let Some(format) = args.log_format {
        config.monitoring.log_format = format;
    }
}

fn init_tracing(config: &BrokerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.monitoring.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.monitoring.log_format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

fn start_processor(config: &BrokerConfig, broker: Arc<Broker>) -> anyhow::Result<ProcessorHandle> {
    let linker_url = config
        .linker
        .url
        .clone()
        .context("linker.url is required in processor mode")?;

    let probe = HttpProbe::new(config.probe.url.clone(), config.probe_method()?, config.probe_timeout())?;
    let handler = HttpLinkHandler::new(
        linker_url,
        config.linker.bearer_secret.clone(),
        Duration::from_millis(config.linker.timeout_ms),
    )?;

    let processor = QueueProcessor::new(
        broker,
        Arc::new(probe),
        AttemptExecutor::new(Arc::new(handler), config.attempt_timeout()),
        config.check_interval(),
        config.item_delay(),
    );
    Ok(processor.start())
}

async fn start_metrics_server(broker: Arc<Broker>, port: u16) -> anyhow::Result<()> {
    async fn metrics_handler(State(broker): State<Arc<Broker>>) -> Result<String, (StatusCode, String)> {
        broker.refresh_queue_metrics();
        broker
            .metrics()
            .render()
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(broker);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
