//! End-to-end smoke test for `meridian-chain-node`.
//!
//! Spawns a real node process against a fresh devnet genesis, submits a
//! signed `TRANSFER` over its REST surface, and asserts the balance/height
//! changes land. Also exercises the empty-mempool invariant (spec §4.5,
//! §8 "Empty mempool → no block produced").

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use meridian_chain::Mempool;
use meridian_core::transaction::{AuthScheme, Transaction, TransactionBody, TxKind, TxStatus};
use meridian_crypto::KeyPair;

struct NodeGuard {
    child: Child,
    data_dir: PathBuf,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn bin() -> &'static str {
    env!("CARGO_BIN_EXE_meridian-chain-node")
}

fn run_cli(args: &[&str]) {
    let status = Command::new(bin())
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .status()
        .expect("spawn CLI subcommand");
    assert!(status.success(), "CLI subcommand {args:?} failed");
}

fn keygen(dir: &Path, name: &str) -> PathBuf {
    let out = dir.join(format!("{name}.json"));
    run_cli(&["keygen", "--out", out.to_str().unwrap()]);
    out
}

fn load_keypair(path: &Path) -> KeyPair {
    let json = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&json).unwrap()
}

async fn wait_for_rpc(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = client.get(url).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

async fn get_head(client: &reqwest::Client, base: &str) -> u64 {
    let resp: serde_json::Value = client.get(format!("{base}/rpc/getHead")).send().await.unwrap().json().await.unwrap();
    resp["height"].as_u64().unwrap()
}

async fn get_balance(client: &reqwest::Client, base: &str, addr_hex: &str) -> u128 {
    let resp: serde_json::Value =
        client.get(format!("{base}/rpc/getBalance/{addr_hex}")).send().await.unwrap().json().await.unwrap();
    resp["balance"].as_u64().expect("balance is a JSON number") as u128
}

fn sign_transfer(sender: &KeyPair, nonce: u64, to: &meridian_core::types::Address, amount: u128, fee: u128) -> Transaction {
    let kind = TxKind::Transfer { to: to.clone(), amount };
    let auth_scheme = AuthScheme::SingleSig;
    let timestamp = 1;
    let body = TransactionBody {
        sender: &sender.address,
        sender_public_key: &sender.public_key,
        nonce,
        fee,
        kind: &kind,
        auth_scheme: &auth_scheme,
        timestamp,
    };
    let body_bytes = bincode::serialize(&body).unwrap();
    let signature = sender.sign(&body_bytes);
    let tx_hash = meridian_core::types::TxHash::from_bytes(meridian_crypto::sha256(&body_bytes));
    Transaction {
        tx_hash,
        sender: sender.address.clone(),
        sender_public_key: sender.public_key.clone(),
        nonce,
        fee,
        kind,
        auth_scheme,
        signatures: vec![signature],
        timestamp,
        status: TxStatus::Pending,
    }
}

#[tokio::test]
async fn transfer_lands_in_a_block_and_empty_mempool_produces_none() {
    let data_dir = std::env::temp_dir().join(format!("meridian-chain-node-smoke-{}", std::process::id()));
    std::fs::create_dir_all(&data_dir).unwrap();

    let treasury_key = keygen(&data_dir, "treasury");
    let proposer_key = keygen(&data_dir, "proposer");
    let recipient_key = keygen(&data_dir, "recipient");

    let treasury = load_keypair(&treasury_key);
    let recipient = load_keypair(&recipient_key);

    let genesis_path = data_dir.join("genesis.json");
    run_cli(&[
        "make-genesis",
        "--chain-id",
        "meridian-smoke",
        "--treasury-key",
        treasury_key.to_str().unwrap(),
        "--proposer-key",
        proposer_key.to_str().unwrap(),
        "--premine",
        &format!("{}={}", treasury_key.to_str().unwrap(), 1_000_000u128),
        "--out",
        genesis_path.to_str().unwrap(),
    ]);

    let port = free_port();
    let db_path = data_dir.join("chain.db");
    let child = Command::new(bin())
        .args([
            "serve",
            "--database-url",
            &format!("sqlite://{}?mode=rwc", db_path.display()),
            "--rpc-bind",
            &format!("127.0.0.1:{port}"),
            "--proposer-key",
            proposer_key.to_str().unwrap(),
            "--genesis-params",
            genesis_path.to_str().unwrap(),
            "--jwt-secret",
            "smoke-test-secret",
            "--block-interval-sec",
            "1",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("spawn chain node");

    let _guard = NodeGuard { child, data_dir: data_dir.clone() };
    let base = format!("http://127.0.0.1:{port}");
    let client = reqwest::Client::new();

    assert!(wait_for_rpc(&client, &format!("{base}/rpc/getHead"), Duration::from_secs(10)).await, "node never came up");

    // Boundary behavior: with an empty mempool the height must not advance
    // across at least one full block interval.
    let before = get_head(&client, &base).await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let after_idle = get_head(&client, &base).await;
    assert_eq!(before, after_idle, "height must not advance from an empty mempool");

    let tx = sign_transfer(&treasury, 1, &recipient.address, 1_000, 1);
    let resp = client.post(format!("{base}/rpc/sendTx")).json(&tx).send().await.unwrap();
    assert!(resp.status().is_success(), "sendTx failed: {:?}", resp.text().await);

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut balance = 0u128;
    while Instant::now() < deadline {
        balance = get_balance(&client, &base, &recipient.address.to_hex()).await;
        if balance == 1_000 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert_eq!(balance, 1_000, "transfer never landed in a block");
    assert!(get_head(&client, &base).await >= 1, "height did not advance after a non-empty mempool tick");
}

#[test]
fn mempool_insert_rejects_duplicate_hash() {
    let mut pool = Mempool::new();
    let kp = KeyPair::generate();
    let recipient = KeyPair::generate();
    let tx = sign_transfer(&kp, 1, &recipient.address, 10, 1);
    assert!(pool.insert(tx.clone()));
    assert!(!pool.insert(tx), "inserting the same tx hash twice must be a no-op");
}
