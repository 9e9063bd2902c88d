//! meridian-sync
//!
//! Block/transaction propagation and cross-site chain reconciliation
//! (spec §4.6). Two independent concerns live here: an in-process pub/sub
//! [`Broker`] used to fan `{block, tx}` events out to local RPC
//! subscribers, and a [`SyncWorker`] that polls remote nodes, detects
//! forks, and drives reorgs through `meridian-chain`.

pub mod broker;
pub mod circuit_breaker;
pub mod config;
pub mod external;
pub mod message;
pub mod remote;
pub mod sync;

pub use broker::{Broker, Subscription};
pub use circuit_breaker::CircuitBreaker;
pub use config::SyncConfig;
pub use external::{ExternalBroker, ExternalBrokerError};
pub use message::{SyncEvent, Topic};
pub use remote::{HttpRemoteChain, RemoteChain, RemoteError};
pub use sync::{trusted_proposers_from, SyncWorker};
