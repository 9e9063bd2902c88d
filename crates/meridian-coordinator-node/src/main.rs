//! meridian-coordinator-node — the Job Lifecycle Engine binary (spec
//! §4.3, §6: `coordinator: serve, migrate, audit-log, tenants
//! list|add|remove`).
//!
//! `serve` opens the shared relational store, wraps a `JobEngine` in the
//! shared `meridian-rpc` HTTP surface (`/jobs/*`, `/miner/poll|result|
//! failure`, `/match`), and runs two background loops the spec assigns to
//! the coordinator but that have no single public-contract entry point of
//! their own: an assignment sweep that calls `JobEngine::assign` for every
//! `QUEUED` job, and the deadline watchdog (`JobEngine::expire_watchdog`,
//! spec §4.3). Both write through the same `JobEngine` the RPC handlers
//! use, so there is exactly one lock domain per job (spec §5 "per-`job_id`
//! lock").

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use meridian_chain::{ChainParams, EconomicBounds, Mempool};
use meridian_coordinator::{CoordinatorConfig, JobEngine};
use meridian_core::job::JobState;
use meridian_crypto::{KeyPair, ZkVerifierRegistry};
use meridian_genesis::GenesisParams;
use meridian_rpc::auth::JwtKeys;
use meridian_rpc::ratelimit::RateLimiters;
use meridian_rpc::{build_router, serve, AppState};
use meridian_storage::Storage;
use meridian_sync::Broker;

/// Cadence of the `QUEUED`-job assignment sweep. A dedicated constant
/// rather than a spec-named option — `assign` itself is spec-mandated,
/// the polling cadence driving it is an implementation detail of this
/// binary.
const ASSIGN_SWEEP_INTERVAL_MS: u64 = 500;
/// Cadence of the deadline watchdog sweep.
const WATCHDOG_SWEEP_INTERVAL_SEC: u64 = 5;

#[derive(Parser, Debug)]
#[command(name = "meridian-coordinator-node", version, about = "Meridian Coordinator — job lifecycle engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the coordinator: RPC surface, assignment sweep, deadline watchdog.
    Serve(ServeArgs),
    /// Apply pending schema migrations and exit.
    Migrate(MigrateArgs),
    /// Print the job audit trail.
    AuditLog(AuditLogArgs),
    /// Manage the onboarded-tenant list.
    Tenants(TenantsArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://meridian-coordinator.db")]
    database_url: String,

    #[arg(long, env = "RPC_BIND", default_value = "127.0.0.1:8647")]
    rpc_bind: SocketAddr,

    /// Genesis parameters JSON (spec §6 "schema file is authoritative") —
    /// the coordinator reads the same chain parameters the chain node
    /// itself was bootstrapped with, to keep `coordinator_ratio`/mint
    /// bookkeeping consistent across processes.
    #[arg(long)]
    genesis_params: PathBuf,

    /// Keyfile for the coordinator's relay account (spec §6
    /// `RECEIPT_ATTESTATION_KEY`) — the chain-level signer for every
    /// `RECEIPT_CLAIM` this coordinator relays on a miner's behalf
    /// (see DESIGN.md).
    #[arg(long, env = "RECEIPT_ATTESTATION_KEY")]
    receipt_attestation_key: PathBuf,

    #[arg(long, env = "JWT_SECRET")]
    jwt_secret: String,

    #[arg(long, env = "CORS_ALLOWED_ORIGINS", value_delimiter = ',')]
    cors_allowed_origins: Vec<String>,

    #[arg(long, env = "JOB_FEE", default_value_t = meridian_core::DEFAULT_MIN_FEE)]
    job_fee: u128,

    #[arg(long, env = "COORDINATOR_CUT", default_value_t = meridian_core::DEFAULT_COORDINATOR_CUT)]
    coordinator_cut: f64,

    #[arg(long, env = "MAX_RETRIES", default_value_t = meridian_core::MAX_RETRIES)]
    max_retries: u32,

    #[arg(long, env = "CHAIN_MIN_FEE", default_value_t = meridian_core::DEFAULT_MIN_FEE)]
    chain_min_fee: u128,
}

#[derive(Args, Debug)]
struct MigrateArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
}

#[derive(Args, Debug)]
struct AuditLogArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, default_value_t = 100)]
    limit: u32,
}

#[derive(Args, Debug)]
struct TenantsArgs {
    #[command(subcommand)]
    action: TenantAction,
}

#[derive(Subcommand, Debug)]
enum TenantAction {
    List(TenantListArgs),
    Add(TenantAddArgs),
    Remove(TenantRemoveArgs),
}

#[derive(Args, Debug)]
struct TenantListArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
}

#[derive(Args, Debug)]
struct TenantAddArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
    #[arg(long)]
    address: String,
    #[arg(long)]
    label: String,
}

#[derive(Args, Debug)]
struct TenantRemoveArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
    #[arg(long)]
    address: String,
}

/// Exit codes per spec §6: 0 success, 1 configuration error, 2 startup
/// failure, 3 migration failure, 64+ per-command semantic errors.
enum NodeError {
    Config(String),
    Startup(String),
    Migration(String),
    Command(String),
}

impl NodeError {
    fn code(&self) -> u8 {
        match self {
            NodeError::Config(_) => 1,
            NodeError::Startup(_) => 2,
            NodeError::Migration(_) => 3,
            NodeError::Command(_) => 64,
        }
    }

    fn message(&self) -> &str {
        match self {
            NodeError::Config(m) | NodeError::Startup(m) | NodeError::Migration(m) | NodeError::Command(m) => m,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,meridian=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match dispatch(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = e.message(), "meridian-coordinator-node exiting");
            ExitCode::from(e.code())
        }
    }
}

async fn dispatch(command: Command) -> Result<(), NodeError> {
    match command {
        Command::Serve(args) => run_serve(args).await,
        Command::Migrate(args) => run_migrate(args).await,
        Command::AuditLog(args) => run_audit_log(args).await,
        Command::Tenants(args) => run_tenants(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<(), NodeError> {
    if args.jwt_secret.trim().is_empty() {
        return Err(NodeError::Config("JWT_SECRET must not be empty".into()));
    }

    let storage = Storage::connect(&args.database_url)
        .await
        .map_err(|e| NodeError::Startup(format!("opening database: {e}")))?;
    storage.migrate().await.map_err(|e| NodeError::Migration(e.to_string()))?;

    let relay_keypair = Arc::new(load_keypair(&args.receipt_attestation_key).map_err(NodeError::Startup)?);

    let json = std::fs::read_to_string(&args.genesis_params)
        .map_err(|e| NodeError::Config(format!("reading genesis params: {e}")))?;
    let params: GenesisParams =
        serde_json::from_str(&json).map_err(|e| NodeError::Config(format!("parsing genesis params: {e}")))?;
    let chain_params = ChainParams {
        mint_per_unit: params.mint_per_unit,
        coordinator_ratio: params.coordinator_ratio,
        treasury_address: params.treasury_address,
        trusted_proposers: params.trusted_proposers,
    };

    info!(relay = %relay_keypair.address, "meridian-coordinator-node starting");

    let config = CoordinatorConfig {
        job_fee: args.job_fee,
        coordinator_cut: args.coordinator_cut,
        max_retries: args.max_retries,
        chain_min_fee: args.chain_min_fee,
        ..CoordinatorConfig::default()
    };

    // Not shared with any proposer process — this node only ever writes
    // pending transactions through storage, which `meridian-chain`'s
    // proposer tick re-admits into its own mempool on the next block
    // (see `meridian_chain::poa::tick`'s pending-reconciliation step).
    let mempool = Arc::new(Mutex::new(Mempool::new()));

    let engine = Arc::new(
        JobEngine::new(storage.clone(), mempool, relay_keypair, chain_params.clone(), config)
            .await
            .map_err(|e| NodeError::Startup(format!("building job engine: {e}")))?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let assign_engine = Arc::clone(&engine);
    let assign_storage = storage.clone();
    let mut assign_shutdown = shutdown_rx.clone();
    let assign_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ASSIGN_SWEEP_INTERVAL_MS)) => {}
                _ = assign_shutdown.changed() => {
                    if *assign_shutdown.borrow() {
                        return;
                    }
                }
            }
            let now = now_unix();
            match assign_storage.list_jobs_by_state(JobState::Queued).await {
                Ok(jobs) => {
                    for job in jobs {
                        if let Err(e) = assign_engine.assign(&job.job_id, now).await {
                            warn!(job_id = %job.job_id, error = %e, "assignment sweep failed for job");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "assignment sweep: listing queued jobs failed"),
            }
        }
    });

    let watchdog_engine = Arc::clone(&engine);
    let mut watchdog_shutdown = shutdown_rx.clone();
    let watchdog_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(WATCHDOG_SWEEP_INTERVAL_SEC)) => {}
                _ = watchdog_shutdown.changed() => {
                    if *watchdog_shutdown.borrow() {
                        return;
                    }
                }
            }
            let now = now_unix();
            match watchdog_engine.expire_watchdog(now).await {
                Ok(0) => {}
                Ok(n) => info!(expired = n, "deadline watchdog"),
                Err(e) => warn!(error = %e, "deadline watchdog failed"),
            }
        }
    });

    let state = AppState {
        storage,
        chain_params,
        min_fee: args.chain_min_fee,
        economic_bounds: EconomicBounds::default(),
        zk_registry: Arc::new(ZkVerifierRegistry::devnet(Vec::new())),
        mempool: None,
        job_engine: Some(engine),
        broker: Broker::new(),
        jwt_keys: Arc::new(JwtKeys::from_secret(&args.jwt_secret)),
        limiters: Arc::new(RateLimiters::new()),
    };

    let router = build_router(state, &args.cors_allowed_origins);

    serve(router, args.rpc_bind, shutdown_rx)
        .await
        .map_err(|e| NodeError::Startup(format!("RPC server: {e}")))?;

    shutdown_tx.send(true).ok();
    let _ = assign_task.await;
    let _ = watchdog_task.await;
    Ok(())
}

async fn run_migrate(args: MigrateArgs) -> Result<(), NodeError> {
    let storage = Storage::connect(&args.database_url)
        .await
        .map_err(|e| NodeError::Startup(format!("opening database: {e}")))?;
    storage.migrate().await.map_err(|e| NodeError::Migration(e.to_string()))?;
    info!("migrations applied");
    Ok(())
}

async fn run_audit_log(args: AuditLogArgs) -> Result<(), NodeError> {
    let storage = Storage::connect(&args.database_url)
        .await
        .map_err(|e| NodeError::Startup(format!("opening database: {e}")))?;
    let entries = storage.list_audit_entries(args.limit).await.map_err(|e| NodeError::Command(e.to_string()))?;
    for e in &entries {
        println!("{}\t{}\t{}\t{}", e.at, e.job_id, e.event, e.detail);
    }
    println!("{} entr(ies)", entries.len());
    Ok(())
}

async fn run_tenants(args: TenantsArgs) -> Result<(), NodeError> {
    match args.action {
        TenantAction::List(a) => {
            let storage = Storage::connect(&a.database_url)
                .await
                .map_err(|e| NodeError::Startup(format!("opening database: {e}")))?;
            let tenants = storage.list_tenants().await.map_err(|e| NodeError::Command(e.to_string()))?;
            for t in &tenants {
                println!("{}\t{}\t{}", t.address, t.label, t.created_at);
            }
            println!("{} tenant(s)", tenants.len());
            Ok(())
        }
        TenantAction::Add(a) => {
            let storage = Storage::connect(&a.database_url)
                .await
                .map_err(|e| NodeError::Startup(format!("opening database: {e}")))?;
            let address = meridian_core::types::Address::from_b58(&a.address)
                .map_err(|e| NodeError::Command(format!("invalid address: {e}")))?;
            storage
                .upsert_tenant(&address, &a.label, now_unix())
                .await
                .map_err(|e| NodeError::Command(e.to_string()))?;
            info!(%address, label = %a.label, "tenant added");
            Ok(())
        }
        TenantAction::Remove(a) => {
            let storage = Storage::connect(&a.database_url)
                .await
                .map_err(|e| NodeError::Startup(format!("opening database: {e}")))?;
            let address = meridian_core::types::Address::from_b58(&a.address)
                .map_err(|e| NodeError::Command(format!("invalid address: {e}")))?;
            let removed = storage.remove_tenant(&address).await.map_err(|e| NodeError::Command(e.to_string()))?;
            if !removed {
                return Err(NodeError::Command(format!("no tenant registered for {address}")));
            }
            info!(%address, "tenant removed");
            Ok(())
        }
    }
}

fn load_keypair(path: &std::path::Path) -> Result<KeyPair, String> {
    let json = std::fs::read_to_string(path).map_err(|e| format!("reading keyfile {}: {e}", path.display()))?;
    serde_json::from_str(&json).map_err(|e| format!("parsing keyfile {}: {e}", path.display()))
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}
