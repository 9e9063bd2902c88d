pub mod account;
pub mod block;
pub mod constants;
pub mod error;
pub mod escrow;
pub mod job;
pub mod matchmaking;
pub mod miner;
pub mod receipt;
pub mod transaction;
pub mod types;

pub use account::*;
pub use block::*;
pub use constants::*;
pub use error::{CoreError, ErrKind};
pub use escrow::*;
pub use job::*;
pub use matchmaking::*;
pub use miner::*;
pub use receipt::*;
pub use transaction::*;
pub use types::*;
