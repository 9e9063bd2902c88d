//! End-to-end smoke test for `meridian-coordinator-node`.
//!
//! Spawns a real coordinator process, submits a job as an authenticated
//! client (spec §4.3, §4.7 "Client API key"), confirms it lands `QUEUED`,
//! then cancels it and confirms the terminal transition — all without a
//! miner in the loop, since matching/assignment has its own coverage in
//! `meridian-pool`/`meridian-coordinator`'s own test suites.

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use jsonwebtoken::{encode, EncodingKey, Header};
use meridian_crypto::KeyPair;
use meridian_genesis::{GenesisParams, PremineAccount};

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
    env!("CARGO_BIN_EXE_meridian-coordinator-node")
}

fn write_genesis(path: &Path, client: &KeyPair) {
    let treasury = KeyPair::generate();
    let proposer = KeyPair::generate();
    let mut params = GenesisParams::devnet("meridian-coordinator-smoke", treasury.address, proposer.address);
    params.premine.push(PremineAccount {
        address: client.address.clone(),
        pubkey: client.public_key.clone(),
        balance: 1_000_000,
    });
    std::fs::write(path, serde_json::to_string_pretty(&params).unwrap()).unwrap();
}

fn client_jwt(secret: &str, client_addr: &str) -> String {
    #[derive(serde::Serialize)]
    struct Claims {
        sub: String,
        exp: usize,
    }
    let claims = Claims { sub: client_addr.to_string(), exp: usize::MAX / 2 };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
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

#[tokio::test]
async fn job_is_submitted_queued_then_cancelled() {
    let data_dir = std::env::temp_dir().join(format!("meridian-coordinator-node-smoke-{}", std::process::id()));
    std::fs::create_dir_all(&data_dir).unwrap();

    let client_key = KeyPair::generate();
    let genesis_path = data_dir.join("genesis.json");
    write_genesis(&genesis_path, &client_key);

    let relay_key = KeyPair::generate();
    let relay_key_path = data_dir.join("relay.json");
    std::fs::write(&relay_key_path, serde_json::to_string(&relay_key).unwrap()).unwrap();

    let jwt_secret = "smoke-test-secret";
    let port = free_port();
    let db_path = data_dir.join("coordinator.db");
    let child = Command::new(bin())
        .args([
            "serve",
            "--database-url",
            &format!("sqlite://{}?mode=rwc", db_path.display()),
            "--rpc-bind",
            &format!("127.0.0.1:{port}"),
            "--genesis-params",
            genesis_path.to_str().unwrap(),
            "--receipt-attestation-key",
            relay_key_path.to_str().unwrap(),
            "--jwt-secret",
            jwt_secret,
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("spawn coordinator node");

    let _guard = NodeGuard { child, data_dir: data_dir.clone() };
    let base = format!("http://127.0.0.1:{port}");
    let client = reqwest::Client::new();

    assert!(wait_for_rpc(&client, &format!("{base}/rpc/getHead"), Duration::from_secs(10)).await, "node never came up");

    let token = client_jwt(jwt_secret, &client_key.address.to_b58());

    let submit_body = serde_json::json!({
        "client_nonce": 1,
        "payload": {
            "model": "llama-70b",
            "prompt": "hello",
            "params": {},
        },
        "constraints": {
            "min_vram_gb": 16,
            "min_ram_gb": 0,
            "tags": [],
            "region": null,
        },
        "max_price": 500,
        "deadline": chrono_like_deadline(),
    });

    let resp = client
        .post(format!("{base}/jobs"))
        .bearer_auth(&token)
        .json(&submit_body)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "submit_job failed: {:?}", resp.text().await);
    let submitted: serde_json::Value = resp.json().await.unwrap();
    let job_id = submitted["job_id"].as_str().expect("job_id string").to_string();

    let resp = client.get(format!("{base}/jobs/{job_id}")).bearer_auth(&token).send().await.unwrap();
    assert!(resp.status().is_success(), "get_job failed: {:?}", resp.text().await);
    let job: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(job["state"].as_str(), Some("queued"), "job did not land queued: {job:?}");

    // Submitting the same (client, nonce) pair again must be idempotent,
    // returning the same job rather than creating a second one.
    let resp = client
        .post(format!("{base}/jobs"))
        .bearer_auth(&token)
        .json(&submit_body)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let resubmitted: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(resubmitted["job_id"].as_str(), Some(job_id.as_str()), "duplicate nonce must not mint a new job");

    let resp = client.post(format!("{base}/jobs/{job_id}/cancel")).bearer_auth(&token).send().await.unwrap();
    assert!(resp.status().is_success(), "cancel failed: {:?}", resp.text().await);

    let resp = client.get(format!("{base}/jobs/{job_id}")).bearer_auth(&token).send().await.unwrap();
    let job: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(job["state"].as_str(), Some("cancelled"), "job did not transition to cancelled: {job:?}");

    // A second cancel on an already-terminal job must be rejected.
    let resp = client.post(format!("{base}/jobs/{job_id}/cancel")).bearer_auth(&token).send().await.unwrap();
    assert!(!resp.status().is_success(), "cancelling an already-cancelled job must fail");
}

fn chrono_like_deadline() -> i64 {
    // Far enough in the future that the watchdog sweep never fires during
    // the test; this binary has no other source of "now" available to a
    // test that must not depend on wall-clock skew with the node process.
    4_102_444_800 // 2100-01-01T00:00:00Z
}
