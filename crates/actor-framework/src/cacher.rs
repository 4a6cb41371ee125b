//! # Cachers
//!
//! A [`Cacher`] swaps idle root actors out of memory. The store still tracks the
//! actor (its queue, checkpoint and readiness). Only the live instance moves to the
//! cacher, and it comes back the next time the actor is scheduled.
//!
//! ## Contract
//!
//! - `save` is best effort. `false` means "keep it in memory"; it is never an error.
//!   The caller may drop its in-memory instance only after `save` returned `true`.
//! - `restore` reads the entry and marks it non-loadable in the same critical section,
//!   so two callers can never both restore one actor.
//! - `delete` removes an entry and is idempotent.

use crate::address::Address;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, trace};

#[async_trait]
pub trait Cacher: Send + Sync + 'static {
    async fn save(&self, address: &Address, image: Bytes) -> bool;

    async fn restore(&self, address: &Address) -> Option<Bytes>;

    async fn delete(&self, address: &Address);
}

struct Entry {
    image: Bytes,
    loadable: bool,
}

/// An in-process [`Cacher`] with an optional entry limit.
#[derive(Default)]
pub struct MemoryCacher {
    entries: Mutex<HashMap<Address, Entry>>,
    capacity: Option<usize>,
}

impl MemoryCacher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cacher that refuses new entries once it holds `capacity` of them.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `address` has an entry that can still be restored.
    pub fn is_loadable(&self, address: &Address) -> bool {
        self.entries
            .lock()
            .get(address)
            .is_some_and(|entry| entry.loadable)
    }
}

#[async_trait]
impl Cacher for MemoryCacher {
    async fn save(&self, address: &Address, image: Bytes) -> bool {
        let mut entries = self.entries.lock();
        let full = self
            .capacity
            .is_some_and(|capacity| entries.len() >= capacity);
        if full && !entries.contains_key(address) {
            debug!(%address, "Cacher full, actor stays resident");
            return false;
        }
        trace!(%address, bytes = image.len(), "Cached actor");
        entries.insert(
            address.clone(),
            Entry {
                image,
                loadable: true,
            },
        );
        true
    }

    async fn restore(&self, address: &Address) -> Option<Bytes> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(address)?;
        if !entry.loadable {
            debug!(%address, "Cached actor already restored");
            return None;
        }
        entry.loadable = false;
        Some(entry.image.clone())
    }

    async fn delete(&self, address: &Address) {
        self.entries.lock().remove(address);
    }
}
