//! profd — the profgrid daemon.
//!
//! Single binary assembling the profiling control plane:
//! - State store (redb): associations, backends, policies, leases
//! - Association registry (leader role)
//! - Slot pool + per-process-group planners (backend role)
//! - REST API for recorders, backends, and admins
//!
//! Standalone mode runs the leader and one backend in the same process.
//!
//! # Usage
//!
//! ```text
//! profd standalone --port 2491 --data-dir /var/lib/profgrid --backend-id 1
//! ```

mod delegation;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{RwLock, watch};
use tracing::info;

use profgrid_association::{AssociationRegistry, LeastAssociated};
use profgrid_planner::WindowLookup;
use profgrid_scheduler::{ScheduleConfig, SlotPool, WorkIdGenerator};

use delegation::{Delegator, DelegatorConfig};

#[derive(Parser)]
#[command(name = "profd", about = "profgrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run leader and backend in one process (single-node mode).
    Standalone {
        /// Port to listen on.
        #[arg(long, default_value = "2491")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/profgrid")]
        data_dir: PathBuf,

        /// This backend's fleet-unique id (high bits of every work id).
        #[arg(long, default_value = "1")]
        backend_id: u32,

        /// Concurrent recording capacity of this backend.
        #[arg(long, default_value = "100")]
        slot_capacity: u32,

        /// Aggregation window length in minutes.
        #[arg(long, default_value = "20")]
        window_duration_mins: u32,

        /// Seconds before window end by which all work must finish.
        #[arg(long, default_value = "30")]
        window_end_tolerance_secs: u32,

        /// Scheduling buffer; half of it is the minimum start delay.
        #[arg(long, default_value = "120")]
        scheduling_buffer_secs: u32,

        /// Latest acceptable start delay within a window.
        #[arg(long, default_value = "300")]
        max_acceptable_delay_secs: u32,

        /// Lead time before rotation at which the policy is fetched.
        #[arg(long, default_value = "180")]
        policy_refresh_buffer_secs: u32,

        /// Backend load-report cadence in seconds.
        #[arg(long, default_value = "10")]
        reporting_frequency_secs: u64,

        /// Missed reports tolerated before a backend is defunct.
        #[arg(long, default_value = "2")]
        max_allowed_skips: u32,

        /// Seconds of poll silence before a recorder leaves the census.
        #[arg(long, default_value = "120")]
        recorder_defunct_threshold_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,profd=debug,profgrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            port,
            data_dir,
            backend_id,
            slot_capacity,
            window_duration_mins,
            window_end_tolerance_secs,
            scheduling_buffer_secs,
            max_acceptable_delay_secs,
            policy_refresh_buffer_secs,
            reporting_frequency_secs,
            max_allowed_skips,
            recorder_defunct_threshold_secs,
        } => {
            let schedule_config = ScheduleConfig::new(
                window_duration_mins,
                window_end_tolerance_secs,
                scheduling_buffer_secs,
                max_acceptable_delay_secs,
            )?;
            run_standalone(StandaloneOpts {
                port,
                data_dir,
                backend_id,
                slot_capacity,
                schedule_config,
                policy_refresh_buffer_secs,
                reporting_frequency_secs,
                max_allowed_skips,
                recorder_defunct_threshold_secs,
            })
            .await
        }
    }
}

struct StandaloneOpts {
    port: u16,
    data_dir: PathBuf,
    backend_id: u32,
    slot_capacity: u32,
    schedule_config: ScheduleConfig,
    policy_refresh_buffer_secs: u32,
    reporting_frequency_secs: u64,
    max_allowed_skips: u32,
    recorder_defunct_threshold_secs: u64,
}

async fn run_standalone(opts: StandaloneOpts) -> anyhow::Result<()> {
    info!("profgrid daemon starting in standalone mode");

    std::fs::create_dir_all(&opts.data_dir)?;
    let db_path = opts.data_dir.join("profgrid.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = profgrid_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let controller_id = format!("backend-{}", opts.backend_id);
    let registry = Arc::new(AssociationRegistry::new(
        store.clone(),
        Box::new(LeastAssociated),
        opts.reporting_frequency_secs,
        opts.max_allowed_skips,
        &controller_id,
    ));
    registry.load().await?;
    info!("association registry loaded");

    let slot_pool = Arc::new(SlotPool::new(opts.slot_capacity));
    let work_ids = Arc::new(WorkIdGenerator::new(opts.backend_id));
    let lookup = Arc::new(WindowLookup::new());
    let contexts: profgrid_api::ContextMap = Arc::new(RwLock::new(HashMap::new()));
    info!(
        backend_id = opts.backend_id,
        slot_capacity = opts.slot_capacity,
        "backend runtime initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Delegation loop ────────────────────────────────────────

    let delegator = Delegator::new(
        Arc::clone(&registry),
        store.clone(),
        Arc::clone(&slot_pool),
        Arc::clone(&lookup),
        Arc::clone(&contexts),
        work_ids,
        opts.schedule_config,
        DelegatorConfig {
            ip: "127.0.0.1".to_string(),
            port: opts.port,
            reporting_frequency_secs: opts.reporting_frequency_secs,
            policy_refresh_buffer_secs: opts.policy_refresh_buffer_secs,
            recorder_defunct_threshold_secs: opts.recorder_defunct_threshold_secs,
        },
    );
    let delegation_handle = tokio::spawn(delegator.run(shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = profgrid_api::build_router(profgrid_api::ApiState {
        store,
        registry,
        lookup,
        contexts,
        controller_id,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], opts.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Planners expire their windows before the process exits.
    let _ = delegation_handle.await;

    info!("profgrid daemon stopped");
    Ok(())
}
