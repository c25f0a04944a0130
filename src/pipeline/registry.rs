use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

pub type TabId = u64;

#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct RunHandle {
    pub tab: TabId,
    pub run_id: u64,
    pub token: CancelToken,
}

/// At most one active run per tab; starting a run cancels the tab's previous one.
#[derive(Debug, Default)]
pub struct RunRegistry {
    next_run: AtomicU64,
    active: Mutex<HashMap<TabId, RunHandle>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, tab: TabId) -> RunHandle {
        let handle = RunHandle {
            tab,
            run_id: self.next_run.fetch_add(1, Ordering::SeqCst) + 1,
            token: CancelToken::default(),
        };
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = active.insert(tab, handle.clone()) {
            debug!(tab, run = prev.run_id, "cancelling previous run");
            prev.token.cancel();
        }
        handle
    }

    /// Removes the run if it is still the tab's current one.
    pub fn finish(&self, handle: &RunHandle) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.get(&handle.tab).is_some_and(|h| h.run_id == handle.run_id) {
            active.remove(&handle.tab);
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
