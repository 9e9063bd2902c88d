//! meridian-chain-node — the Meridian blockchain node binary (spec §4.5,
//! §6: `chain: serve, keygen, make-genesis, faucet`).
//!
//! `serve` opens (or initializes) the state database, starts the PoA
//! proposer loop when `--proposer-key` is supplied (a read-replica simply
//! omits it and serves only the chain's read routes), starts the
//! cross-site sync workers when enabled, and fronts all of it with the
//! shared `meridian-rpc` HTTP/WS surface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use meridian_chain::{ChainParams, EconomicBounds, Mempool};
use meridian_crypto::{KeyPair, ZkVerifierRegistry};
use meridian_genesis::{apply_genesis, faucet_credit, GenesisParams, PremineAccount};
use meridian_rpc::auth::JwtKeys;
use meridian_rpc::ratelimit::RateLimiters;
use meridian_rpc::{build_router, serve, AppState};
use meridian_storage::Storage;
use meridian_sync::{Broker, HttpRemoteChain, SyncWorker};

#[derive(Parser, Debug)]
#[command(name = "meridian-chain-node", version, about = "Meridian PoA blockchain node — receipt-gated minting")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the chain node: RPC surface, proposer loop (if authorized), sync workers.
    Serve(ServeArgs),
    /// Generate a fresh Ed25519 keypair and write it to a JSON file.
    Keygen(KeygenArgs),
    /// Generate a devnet genesis parameters file.
    MakeGenesis(MakeGenesisArgs),
    /// Credit an account directly, bypassing the transaction flow (devnet only).
    Faucet(FaucetArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Relational store location (spec §6 `DATABASE_URL`).
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://meridian-chain.db")]
    database_url: String,

    /// HTTP/WS bind address (spec §6 `RPC_BIND`).
    #[arg(long, env = "RPC_BIND", default_value = "127.0.0.1:8645")]
    rpc_bind: SocketAddr,

    /// Path to a `keygen`-produced keyfile. Omit to run as a read-only
    /// replica that never produces blocks (spec §6 `PROPOSER_KEY`).
    #[arg(long, env = "PROPOSER_KEY")]
    proposer_key: Option<PathBuf>,

    /// Genesis parameters JSON, required the first time this database is used.
    #[arg(long)]
    genesis_params: Option<PathBuf>,

    /// JWT signing secret for `/jobs/*` bearer auth (spec §6 `JWT_SECRET`:
    /// "REQUIRED for API authentication; absence must fail startup").
    #[arg(long, env = "JWT_SECRET")]
    jwt_secret: String,

    /// Exact CORS allow-list, no wildcards in production (spec §6 `CORS_ALLOWED_ORIGINS`).
    #[arg(long, env = "CORS_ALLOWED_ORIGINS", value_delimiter = ',')]
    cors_allowed_origins: Vec<String>,

    #[arg(long, env = "BLOCK_INTERVAL_SEC", default_value_t = meridian_core::DEFAULT_BLOCK_INTERVAL_SEC)]
    block_interval_sec: u64,

    #[arg(long, env = "MAX_TXS_PER_BLOCK", default_value_t = meridian_core::DEFAULT_MAX_TXS_PER_BLOCK)]
    max_txs_per_block: usize,

    #[arg(long, env = "MAX_BLOCK_SIZE_BYTES", default_value_t = meridian_core::DEFAULT_MAX_BLOCK_SIZE_BYTES)]
    max_block_size_bytes: usize,

    #[arg(long, env = "MIN_FEE", default_value_t = meridian_core::DEFAULT_MIN_FEE)]
    min_fee: u128,

    #[arg(long, env = "CROSS_SITE_SYNC_ENABLED", default_value_t = false)]
    cross_site_sync_enabled: bool,

    #[arg(long, env = "CROSS_SITE_REMOTE_ENDPOINTS", value_delimiter = ',')]
    cross_site_remote_endpoints: Vec<String>,

    #[arg(long, env = "CROSS_SITE_POLL_INTERVAL_SEC", default_value_t = meridian_core::DEFAULT_CROSS_SITE_POLL_INTERVAL_SEC)]
    cross_site_poll_interval_sec: u64,

    #[arg(long, env = "REORG_DEPTH_LIMIT", default_value_t = meridian_core::DEFAULT_REORG_DEPTH_LIMIT)]
    reorg_depth_limit: u64,
}

#[derive(Args, Debug)]
struct KeygenArgs {
    /// Destination JSON file for the generated keypair.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct MakeGenesisArgs {
    #[arg(long, default_value = "meridian-devnet")]
    chain_id: String,

    /// Existing treasury keyfile; a fresh one is generated and printed if omitted.
    #[arg(long)]
    treasury_key: Option<PathBuf>,

    /// Existing proposer keyfile; a fresh one is generated and printed if omitted.
    #[arg(long)]
    proposer_key: Option<PathBuf>,

    /// `keyfile=balance` premine entries, repeatable — the keyfile supplies
    /// both the premined address and the pubkey the chain records for it.
    #[arg(long = "premine", value_parser = parse_premine)]
    premine: Vec<(PathBuf, u128)>,

    #[arg(long)]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct FaucetArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Keyfile of the account to credit (faucet needs the pubkey, not just the address).
    #[arg(long)]
    keyfile: PathBuf,

    #[arg(long)]
    amount: u128,
}

fn parse_premine(raw: &str) -> Result<(PathBuf, u128), String> {
    let (path, balance) = raw.rsplit_once('=').ok_or_else(|| "expected keyfile=balance".to_string())?;
    let balance: u128 = balance.parse().map_err(|_| "balance must be an integer".to_string())?;
    Ok((PathBuf::from(path), balance))
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
            tracing::error!(error = e.message(), "meridian-chain-node exiting");
            ExitCode::from(e.code())
        }
    }
}

async fn dispatch(command: Command) -> Result<(), NodeError> {
    match command {
        Command::Serve(args) => run_serve(args).await,
        Command::Keygen(args) => run_keygen(args),
        Command::MakeGenesis(args) => run_make_genesis(args),
        Command::Faucet(args) => run_faucet(args).await,
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

    let proposer_keypair = match &args.proposer_key {
        Some(path) => Some(Arc::new(load_keypair(path).map_err(NodeError::Startup)?)),
        None => {
            warn!("no --proposer-key given; this node will not produce blocks");
            None
        }
    };

    let chain_params = load_chain_params(&storage, args.genesis_params.as_deref())
        .await
        .map_err(NodeError::Startup)?;

    info!(treasury = %chain_params.treasury_address, proposer = proposer_keypair.is_some(), "meridian-chain-node starting");

    let mempool = Arc::new(Mutex::new(Mempool::new()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let economic_bounds = EconomicBounds::default();
    let zk_registry = Arc::new(ZkVerifierRegistry::devnet(Vec::new()));

    let mut tasks = Vec::new();
    if let Some(keypair) = proposer_keypair.clone() {
        let proposer_config = meridian_chain::ProposerConfig {
            block_interval: std::time::Duration::from_secs(args.block_interval_sec),
            max_txs_per_block: args.max_txs_per_block,
            max_block_size_bytes: args.max_block_size_bytes,
            min_fee: args.min_fee,
            economic_bounds,
            zk_registry: Arc::clone(&zk_registry),
        };
        let storage_clone = storage.clone();
        let mempool_clone = Arc::clone(&mempool);
        let params_clone = chain_params.clone();
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            meridian_chain::run_proposer_loop(storage_clone, keypair, mempool_clone, params_clone, proposer_config, rx).await;
        }));
    }

    if args.cross_site_sync_enabled {
        for endpoint in &args.cross_site_remote_endpoints {
            let worker = SyncWorker::new(
                storage.clone(),
                HttpRemoteChain::new(endpoint.clone()),
                chain_params.clone(),
                std::time::Duration::from_secs(args.cross_site_poll_interval_sec),
                args.reorg_depth_limit,
                meridian_core::DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
                std::time::Duration::from_secs(meridian_core::DEFAULT_CIRCUIT_BREAKER_COOLDOWN_SEC),
            );
            let rx = shutdown_rx.clone();
            let endpoint = endpoint.clone();
            tasks.push(tokio::spawn(async move {
                info!(%endpoint, "cross-site sync worker starting");
                worker.run(rx).await;
            }));
        }
    }

    let state = AppState {
        storage,
        chain_params,
        min_fee: args.min_fee,
        economic_bounds,
        zk_registry,
        mempool: proposer_keypair.as_ref().map(|_| Arc::clone(&mempool)),
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
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

async fn load_chain_params(storage: &Storage, genesis_params_path: Option<&std::path::Path>) -> Result<ChainParams, String> {
    let fresh = storage.get_head_height().await.map_err(|e| e.to_string())?.is_none();

    if fresh {
        let path = genesis_params_path.ok_or("fresh database requires --genesis-params on first run")?;
        let json = std::fs::read_to_string(path).map_err(|e| format!("reading genesis params: {e}"))?;
        let params: GenesisParams = serde_json::from_str(&json).map_err(|e| format!("parsing genesis params: {e}"))?;
        apply_genesis(storage, &params).await.map_err(|e| e.to_string())?;
        Ok(ChainParams {
            mint_per_unit: params.mint_per_unit,
            coordinator_ratio: params.coordinator_ratio,
            treasury_address: params.treasury_address,
            trusted_proposers: params.trusted_proposers,
        })
    } else if let Some(path) = genesis_params_path {
        let json = std::fs::read_to_string(path).map_err(|e| format!("reading genesis params: {e}"))?;
        let params: GenesisParams = serde_json::from_str(&json).map_err(|e| format!("parsing genesis params: {e}"))?;
        Ok(ChainParams {
            mint_per_unit: params.mint_per_unit,
            coordinator_ratio: params.coordinator_ratio,
            treasury_address: params.treasury_address,
            trusted_proposers: params.trusted_proposers,
        })
    } else {
        Err("existing database found but no --genesis-params given to recover chain parameters from".into())
    }
}

fn load_keypair(path: &std::path::Path) -> Result<KeyPair, String> {
    let json = std::fs::read_to_string(path).map_err(|e| format!("reading keyfile {}: {e}", path.display()))?;
    serde_json::from_str(&json).map_err(|e| format!("parsing keyfile {}: {e}", path.display()))
}

fn run_keygen(args: KeygenArgs) -> Result<(), NodeError> {
    let keypair = KeyPair::generate();
    let address = keypair.address.to_b58();
    let json = serde_json::to_string_pretty(&keypair).map_err(|e| NodeError::Command(e.to_string()))?;
    std::fs::write(&args.out, json).map_err(|e| NodeError::Command(format!("writing {}: {e}", args.out.display())))?;
    info!(%address, path = %args.out.display(), "keypair written");
    Ok(())
}

fn run_make_genesis(args: MakeGenesisArgs) -> Result<(), NodeError> {
    let treasury = match &args.treasury_key {
        Some(path) => load_keypair(path).map_err(NodeError::Command)?,
        None => {
            let kp = KeyPair::generate();
            warn!(address = %kp.address, "generated ephemeral treasury key; not saved to disk");
            kp
        }
    };
    let proposer = match &args.proposer_key {
        Some(path) => load_keypair(path).map_err(NodeError::Command)?,
        None => {
            let kp = KeyPair::generate();
            warn!(address = %kp.address, "generated ephemeral proposer key; not saved to disk");
            kp
        }
    };

    let mut params = GenesisParams::devnet(args.chain_id, treasury.address.clone(), proposer.address.clone());
    for (keyfile, balance) in &args.premine {
        let kp = load_keypair(keyfile).map_err(NodeError::Command)?;
        params.premine.push(PremineAccount { address: kp.address, pubkey: kp.public_key, balance: *balance });
    }

    let json = serde_json::to_string_pretty(&params).map_err(|e| NodeError::Command(e.to_string()))?;
    std::fs::write(&args.out, json).map_err(|e| NodeError::Command(format!("writing {}: {e}", args.out.display())))?;
    info!(path = %args.out.display(), "genesis parameters written");
    Ok(())
}

async fn run_faucet(args: FaucetArgs) -> Result<(), NodeError> {
    let keypair = load_keypair(&args.keyfile).map_err(NodeError::Command)?;
    let storage = Storage::connect(&args.database_url)
        .await
        .map_err(|e| NodeError::Startup(format!("opening database: {e}")))?;
    faucet_credit(&storage, &keypair.address, &keypair.public_key, args.amount)
        .await
        .map_err(|e| NodeError::Command(e.to_string()))?;
    info!(address = %keypair.address, amount = args.amount, "faucet credit applied");
    Ok(())
}
