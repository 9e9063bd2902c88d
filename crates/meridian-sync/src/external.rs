use crate::message::SyncEvent;

/// An externally-hosted broker backing `{block, tx}` delivery across
/// processes that don't share the in-process [`crate::broker::Broker`]
/// (spec §4.6 "External broker — any key/value stream with at-least-once
/// semantics"). Sequence numbers let a subscriber detect a gap and trigger
/// a resync through the normal cross-site sync path rather than trusting
/// the stream to be gapless.
#[async_trait::async_trait]
pub trait ExternalBroker: Send + Sync {
    async fn publish(&self, event: SyncEvent) -> Result<u64, ExternalBrokerError>;

    /// Read events with sequence number strictly greater than `after_seq`.
    /// Returns them alongside their sequence numbers so the caller can spot
    /// a jump (a jump means delivery was lossy upstream; the caller resyncs
    /// via `get_head`/`get_block` rather than trusting the gap filled
    /// itself in).
    async fn read_since(&self, after_seq: u64) -> Result<Vec<(u64, SyncEvent)>, ExternalBrokerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ExternalBrokerError {
    #[error("external broker unreachable: {0}")]
    Unreachable(String),
    #[error("external broker returned malformed data: {0}")]
    Malformed(String),
}
