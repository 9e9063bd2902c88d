use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use meridian_core::types::MinerId;
use tokio::sync::Notify;

/// Per-miner wake channel for `poll`'s long-poll semantics (spec §4.3).
/// `assign` wakes the miner it just assigned a job to; a `poll` call that
/// found nothing waits on its `Notify` (bounded by a server-side timeout)
/// instead of busy-polling the database.
#[derive(Default)]
pub struct PollWaiters {
    inner: Mutex<HashMap<MinerId, Arc<Notify>>>,
}

impl PollWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn waiter_for(&self, miner_id: &MinerId) -> Arc<Notify> {
        let mut guard = self.inner.lock().expect("poll waiters lock poisoned");
        guard.entry(miner_id.clone()).or_insert_with(|| Arc::new(Notify::new())).clone()
    }

    /// Wake a miner's pending `poll`, if any is currently waiting. A no-op
    /// if nobody is listening — the miner will see the job on its next
    /// `poll` call regardless.
    pub fn wake(&self, miner_id: &MinerId) {
        if let Some(notify) = self.inner.lock().expect("poll waiters lock poisoned").get(miner_id) {
            notify.notify_one();
        }
    }
}
