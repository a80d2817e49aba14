//! Registered-consumer capability objects. Background components that pin
//! log records in memory (the page cache, a replication feed) register
//! here so capacity planning and file recycling know the oldest LSN that
//! must still be retained.

use std::sync::{Arc, Mutex};

use crate::types::Lsn;

/// A component the engine must not truncate history out from under. `oldest`
/// reports the lowest LSN the consumer still needs; `rush` is an optional
/// hint the capacity planner can invoke to ask the consumer to catch up
/// faster (e.g. flush dirty pages sooner) when space is tight.
pub trait Consumer: Send + Sync {
    fn name(&self) -> &str;
    fn oldest_needed_lsn(&self) -> Lsn;
    fn rush(&self) {}
}

#[derive(Default)]
pub struct ConsumerRegistry {
    consumers: Mutex<Vec<Arc<dyn Consumer>>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self { consumers: Mutex::new(Vec::new()) }
    }

    pub fn register(&self, consumer: Arc<dyn Consumer>) {
        self.consumers.lock().unwrap().push(consumer);
    }

    pub fn unregister(&self, name: &str) {
        self.consumers.lock().unwrap().retain(|c| c.name() != name);
    }

    /// The oldest LSN any registered consumer still needs, or `None` if no
    /// consumer is registered (the caller should fall back to the last
    /// checkpoint LSN in that case).
    pub fn oldest_needed_lsn(&self) -> Option<Lsn> {
        self.consumers.lock().unwrap().iter().map(|c| c.oldest_needed_lsn()).min()
    }

    pub fn rush_all(&self) {
        for c in self.consumers.lock().unwrap().iter() {
            c.rush();
        }
    }
}
