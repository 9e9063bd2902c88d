use meridian_core::block::Block;

/// What the sync worker needs from a remote peer (spec §4.5: poll `head`,
/// pull by height range). A trait so tests can stub a peer without a real
/// HTTP server.
#[async_trait::async_trait]
pub trait RemoteChain: Send + Sync {
    async fn get_head(&self) -> Result<u64, RemoteError>;
    async fn get_blocks(&self, from: u64, to: u64) -> Result<Vec<Block>, RemoteError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("remote endpoint returned malformed data: {0}")]
    Malformed(String),
}

/// Pulls from a peer's `GET /rpc/getHead` and `GET /rpc/getBlock/{n}` REST
/// surface (spec §6).
pub struct HttpRemoteChain {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemoteChain {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl RemoteChain for HttpRemoteChain {
    async fn get_head(&self) -> Result<u64, RemoteError> {
        let url = format!("{}/rpc/getHead", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
        #[derive(serde::Deserialize)]
        struct HeadResponse {
            height: u64,
        }
        let body: HeadResponse = resp
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        Ok(body.height)
    }

    async fn get_blocks(&self, from: u64, to: u64) -> Result<Vec<Block>, RemoteError> {
        let mut blocks = Vec::with_capacity((to.saturating_sub(from) + 1) as usize);
        for height in from..=to {
            let url = format!("{}/rpc/getBlock/{}", self.base_url, height);
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| RemoteError::Unreachable(e.to_string()))?
                .error_for_status()
                .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
            let block: Block = resp
                .json()
                .await
                .map_err(|e| RemoteError::Malformed(e.to_string()))?;
            blocks.push(block);
        }
        Ok(blocks)
    }
}
