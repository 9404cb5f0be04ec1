// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tessera Node
//!
//! Entry point for the `tessera-node` binary. Parses CLI arguments,
//! initializes logging and metrics, wires the deposit pipeline to its
//! source and minting capability, and serves the HTTP/WS API.
//!
//! The binary supports four subcommands:
//!
//! - `run`      — start the node
//! - `status`   — query a running node's status endpoint
//! - `classify` — show the tier an amount falls into, offline
//! - `version`  — print build version information

mod api;
mod cli;
mod logging;
mod metrics;
mod minter;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};

use tessera_contracts::SoulboundRegistry;
use tessera_core::admin::AdminGate;
use tessera_core::clock::{Clock, SystemClock};
use tessera_core::config::{
    MinterConfig, PipelineConfig, VerifierConfig, DEPOSIT_QUEUE_CAPACITY, PIPELINE_VERSION,
};
use tessera_core::events::EventBus;
use tessera_core::minter::{AttestationMinter, MintingCapability};
use tessera_core::pipeline::DepositPipeline;
use tessera_core::source::SourceKind;
use tessera_core::storage::TesseraDB;
use tessera_core::tier::TierTable;
use tessera_core::verifier::DepositVerifier;

use cli::{Commands, MinterKind, TesseraNodeCli};
use logging::LogFormat;
use metrics::PipelineMetrics;
use minter::RemoteMinter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = TesseraNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Status(args) => query_status(args).await,
        Commands::Classify(args) => classify_amount(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full node: deposit source, pipeline, API server, and
/// metrics endpoint. Returns once a shutdown signal has been handled and
/// storage is flushed.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        logging::DEFAULT_FILTER,
        LogFormat::from_str_lossy(&args.log_format),
    );

    // --- Configuration (all failures here are fatal) ---
    let tiers: TierTable = args
        .tiers
        .parse()
        .with_context(|| format!("invalid tier table '{}'", args.tiers))?;
    let source_kind: SourceKind = args.source.parse()?;

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        source = %source_kind,
        minter = ?args.minter,
        auto_mint = args.auto_mint,
        data_dir = %args.data_dir.display(),
        "starting tessera-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;

    let db = Arc::new(
        TesseraDB::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );
    tracing::info!(
        path = %db_path.display(),
        deposits = db.deposit_count(),
        attestations = db.attestation_count(),
        "database opened"
    );

    // --- Minting capability ---
    let capability: Arc<dyn MintingCapability> = match args.minter {
        MinterKind::Local => {
            let last_serial = db
                .highest_serial_token_id()
                .context("failed to scan stored attestations")?;
            tracing::info!(last_serial, "using local soulbound registry");
            Arc::new(SoulboundRegistry::resume_from("local-registry", last_serial))
        }
        MinterKind::Remote => {
            let remote = RemoteMinter::new(args.mint_endpoint.clone(), args.mint_api_key.clone())?;
            tracing::info!(endpoint = remote.endpoint(), "using remote minter");
            Arc::new(remote)
        }
    };

    // --- Pipeline ---
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let verifier_config = VerifierConfig {
        rate_limit: args.rate_limit,
        rate_window: Duration::from_secs(args.rate_window_secs),
        ..VerifierConfig::default()
    };
    let verifier = DepositVerifier::with_config(verifier_config, Arc::clone(&clock));

    let minter = Arc::new(AttestationMinter::new(
        db.clone(),
        capability,
        MinterConfig {
            mint_timeout: Duration::from_secs(args.mint_timeout_secs),
        },
        Arc::clone(&clock),
    ));

    let admin = AdminGate::new(args.admin_key.as_deref());
    if !admin.is_enabled() {
        tracing::warn!("no admin key configured, force-mint is disabled");
    }

    let pipeline = Arc::new(DepositPipeline::new(
        PipelineConfig {
            tiers,
            auto_mint: args.auto_mint,
            metadata_uri_base: args.metadata_uri_base.clone(),
        },
        db.clone(),
        verifier,
        minter,
        EventBus::default(),
        admin,
    ));

    // --- Metrics ---
    let node_metrics = Arc::new(PipelineMetrics::new().context("failed to register metrics")?);
    let recorder = metrics::record_events(Arc::clone(&node_metrics), pipeline.bus());

    // --- Rate limiter sweep ---
    let limiter = Arc::clone(pipeline.verifier().limiter());
    let gauge = node_metrics.rate_limited_wallets.clone();
    let sweep_every = Duration::from_secs(args.rate_window_secs.max(1));
    let sweep_clock = Arc::clone(&clock);
    let sweeper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        loop {
            interval.tick().await;
            let dropped = limiter.prune_idle(sweep_clock.now());
            gauge.set(limiter.tracked_wallets() as i64);
            if dropped > 0 {
                tracing::debug!(dropped, "pruned idle rate-limit entries");
            }
        }
    });

    // --- Deposit source ---
    let (mut source, webhook) =
        source_kind.build(Duration::from_secs(args.mock_interval_secs.max(1)));
    let (deposit_tx, deposit_rx) = mpsc::channel(DEPOSIT_QUEUE_CAPACITY);
    source
        .start(deposit_tx)
        .with_context(|| format!("failed to start {} source", source.name()))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pipeline_task = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run(deposit_rx, shutdown_rx).await })
    };

    // --- API server ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        source: source.name().to_string(),
        pipeline: Arc::clone(&pipeline),
        db: Arc::clone(&db),
        webhook,
    };
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, stopping pipeline");
        }
    }

    // --- Teardown: source first, then the pipeline drains what it accepted ---
    source.stop();
    let _ = shutdown_tx.send(true);
    if let Err(e) = pipeline_task.await {
        tracing::error!("pipeline task failed: {}", e);
    }
    sweeper.abort();
    recorder.abort();

    db.flush().context("failed to flush database")?;
    tracing::info!("tessera-node stopped");
    Ok(())
}

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.api_url.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;

    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("failed to reach {}", url))?;
    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("{} returned {}", url, status);
    }

    let body: serde_json::Value = response
        .json()
        .await
        .context("status response was not JSON")?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Classifies an amount against a tier table without touching a node.
fn classify_amount(args: cli::ClassifyArgs) -> Result<()> {
    let tiers: TierTable = args
        .tiers
        .parse()
        .with_context(|| format!("invalid tier table '{}'", args.tiers))?;
    let assignment = tiers.classify(args.amount);

    println!("Tier            : {}", assignment.tier);
    println!("Bucketed amount : {}", assignment.bucketed_amount);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("tessera-node {}", env!("CARGO_PKG_VERSION"));
    println!("pipeline     {}", PIPELINE_VERSION);
    println!("rustc        {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. A handler that fails
/// to install is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
