//! meridian-pool-node — the Pool Hub binary (spec §4.4, §6:
//! `pool-hub: serve, miners list`).
//!
//! `serve` fronts `meridian-pool`'s registry with the shared
//! `meridian-rpc` HTTP surface (`/miner/*`, `/match`) and runs a
//! background sweep that marks miners offline once their heartbeat goes
//! stale past `HEARTBEAT_GRACE_SEC`. It never runs a proposer loop or a
//! job engine — `AppState::mempool`/`job_engine` stay `None` on this
//! binary, same convention `meridian-chain-node` and
//! `meridian-coordinator-node` use for the fields they don't own.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use meridian_chain::{ChainParams, EconomicBounds};
use meridian_crypto::ZkVerifierRegistry;
use meridian_genesis::GenesisParams;
use meridian_rpc::auth::JwtKeys;
use meridian_rpc::ratelimit::RateLimiters;
use meridian_rpc::{build_router, serve, AppState};
use meridian_storage::Storage;
use meridian_sync::Broker;

/// Cadence of the background heartbeat sweep. Not a protocol constant —
/// a fraction of `HEARTBEAT_GRACE_SEC` is plenty responsive without
/// hammering storage, so it is a fixed literal rather than a config knob.
const HEARTBEAT_SWEEP_INTERVAL_SEC: u64 = 30;

#[derive(Parser, Debug)]
#[command(name = "meridian-pool-node", version, about = "Meridian Pool Hub — miner registry and matchmaker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pool hub: RPC surface plus the heartbeat-grace sweep.
    Serve(ServeArgs),
    /// List registered miners.
    Miners(MinersArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://meridian-pool.db")]
    database_url: String,

    #[arg(long, env = "RPC_BIND", default_value = "127.0.0.1:8646")]
    rpc_bind: SocketAddr,

    /// Genesis parameters JSON — the pool hub never applies genesis itself
    /// but needs the same chain parameters every other role sees, so it
    /// reads the same file (spec §6 "schema file is authoritative").
    #[arg(long)]
    genesis_params: PathBuf,

    #[arg(long, env = "JWT_SECRET")]
    jwt_secret: String,

    #[arg(long, env = "CORS_ALLOWED_ORIGINS", value_delimiter = ',')]
    cors_allowed_origins: Vec<String>,
}

#[derive(Args, Debug)]
struct MinersArgs {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://meridian-pool.db")]
    database_url: String,

    /// Only list miners currently online.
    #[arg(long)]
    online_only: bool,
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
            tracing::error!(error = e.message(), "meridian-pool-node exiting");
            ExitCode::from(e.code())
        }
    }
}

async fn dispatch(command: Command) -> Result<(), NodeError> {
    match command {
        Command::Serve(args) => run_serve(args).await,
        Command::Miners(args) => run_miners(args).await,
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

    info!("meridian-pool-node starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep_storage = storage.clone();
    let mut sweep_shutdown = shutdown_rx.clone();
    let sweep_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(HEARTBEAT_SWEEP_INTERVAL_SEC)) => {}
                _ = sweep_shutdown.changed() => {
                    if *sweep_shutdown.borrow() {
                        return;
                    }
                }
            }
            let now = now_unix();
            match meridian_pool::sweep_stale_heartbeats(&sweep_storage, now).await {
                Ok(0) => {}
                Ok(n) => info!(marked_offline = n, "heartbeat sweep"),
                Err(e) => tracing::warn!(error = %e, "heartbeat sweep failed"),
            }
        }
    });

    let state = AppState {
        storage,
        chain_params,
        min_fee: meridian_core::DEFAULT_MIN_FEE,
        economic_bounds: EconomicBounds::default(),
        zk_registry: Arc::new(ZkVerifierRegistry::devnet(Vec::new())),
        mempool: None,
        job_engine: None,
        broker: Broker::new(),
        jwt_keys: Arc::new(JwtKeys::from_secret(&args.jwt_secret)),
        limiters: Arc::new(RateLimiters::new()),
    };

    let router = build_router(state, &args.cors_allowed_origins);

    serve(router, args.rpc_bind, shutdown_rx)
        .await
        .map_err(|e| NodeError::Startup(format!("RPC server: {e}")))?;

    shutdown_tx.send(true).ok();
    let _ = sweep_task.await;
    Ok(())
}

async fn run_miners(args: MinersArgs) -> Result<(), NodeError> {
    let storage = Storage::connect(&args.database_url)
        .await
        .map_err(|e| NodeError::Startup(format!("opening database: {e}")))?;

    let miners = if args.online_only {
        storage.list_online_miners().await
    } else {
        storage.list_miners().await
    }
    .map_err(|e| NodeError::Command(e.to_string()))?;

    for m in &miners {
        println!(
            "{}\t{}\t{:?}\t{:.2}\t{}gb\t{}",
            m.miner_id.to_hex(),
            m.address,
            m.status,
            m.trust_score,
            m.capabilities.vram_gb,
            m.endpoint_url
        );
    }
    println!("{} miner(s)", miners.len());
    Ok(())
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}
