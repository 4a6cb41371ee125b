//! # Stores
//!
//! A [`Store`] holds idle actors and their pending messages and hands out work to the
//! runner. It is the only place that decides which actor runs next, and it guarantees
//! that at most one worker holds a given actor at a time.
//!
//! ## Per-actor state machine
//!
//! ```text
//!            store_messages / checkpoint expiry
//!   IDLE ─────────────────────────────────────► READY
//!    ▲                                            │ take()
//!    │ store_actor (no pending work)              ▼
//!    └────────────────────────────────────── PROCESSING ──► DESTROYED (discard)
//!                  store_actor (more work) ──► READY
//! ```
//!
//! `take()` and `insert_actor()` are the only ways into PROCESSING and `store_actor()`
//! the only way out, so a second `take()` can never claim an actor that is already
//! claimed. `insert_actor()` refuses addresses that already hold an actor, and
//! `store_actor()` refuses idle actors nobody claimed.
//!
//! ## Checkpoint monotonicity
//!
//! Every time a checkpoint fires the store bumps the actor's checkpoint instance and
//! hands that number out with the work. `store_actor()` rejects snapshots carrying a
//! lower instance than the stored one, so a stale copy can never overwrite newer
//! checkpoint state.
//!
//! ## Backends
//!
//! [`MemoryStore`] is the reference implementation. Durable backends keep one record
//! per actor (serialized actor bytes, checkpoint payload, deadline, instance, idle
//! flag) plus an append-only message queue per actor, and must retry connectivity
//! failures internally; anything they cannot hide is reported as
//! [`StoreError::Unavailable`](crate::error::StoreError::Unavailable) and retried by
//! the runner.

mod memory;

pub use memory::MemoryStore;

use crate::address::Address;
use crate::error::StoreError;
use crate::message::{Message, Payload};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// A checkpoint request: deliver `payload` to the actor from itself if nothing else
/// arrives within `timeout`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointSpec {
    pub payload: Payload,
    pub timeout: Duration,
}

/// An actor as handed to [`Store::store_actor`].
#[derive(Clone, Debug)]
pub struct StoredActor {
    pub address: Address,
    /// Serialized actor. `None` means the runner keeps the live instance in memory.
    pub data: Option<Bytes>,
    pub checkpoint: Option<CheckpointSpec>,
    pub instance: u64,
}

impl StoredActor {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            data: None,
            checkpoint: None,
            instance: 0,
        }
    }

    pub fn with_data(mut self, data: Bytes) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_checkpoint(mut self, payload: Payload, timeout: Duration) -> Self {
        self.checkpoint = Some(CheckpointSpec { payload, timeout });
        self
    }

    pub fn with_instance(mut self, instance: u64) -> Self {
        self.instance = instance;
        self
    }
}

/// One unit of work: a claimed actor and the message to resume it with.
#[derive(Clone, Debug)]
pub struct StoredWork {
    pub address: Address,
    pub message: Message,
    /// Present when the actor has to be rehydrated from its serialized form.
    pub actor_data: Option<Bytes>,
    /// The actor's checkpoint instance after this take.
    pub instance: u64,
    /// `message` was synthesized from an expired checkpoint.
    pub checkpoint: bool,
}

/// Result of [`Store::store_actor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    /// The snapshot's instance was older than the stored one; it was ignored but the
    /// processing claim was released.
    Stale,
}

/// Counters exposed for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub actors: usize,
    pub processing: usize,
    pub ready: usize,
    pub messages: usize,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// The top-level address segment this store owns.
    fn prefix(&self) -> &str;

    /// Queues messages for delivery. Messages for actors that do not exist are dropped.
    async fn store_messages(&self, messages: Vec<Message>) -> Result<(), StoreError>;

    /// Creates a new actor, claimed by the caller, who hands it back through
    /// [`Store::store_actor`]. Fails with [`StoreError::AlreadyExists`] if the address
    /// already holds an actor, claimed or not.
    async fn insert_actor(&self, actor: StoredActor) -> Result<(), StoreError>;

    /// Returns a claimed actor and releases the claim. An address with no actor is
    /// created idle; an idle actor fails with [`StoreError::NotClaimed`].
    async fn store_actor(&self, actor: StoredActor) -> Result<StoreOutcome, StoreError>;

    /// Waits for the next piece of work. Dropping the future claims nothing.
    async fn take(&self) -> Result<StoredWork, StoreError>;

    /// Removes an actor and its queued messages. Missing actors are ignored.
    async fn discard(&self, address: &Address) -> Result<(), StoreError>;

    /// Wakes every waiter; all further calls fail with `StoreError::Closed`.
    async fn close(&self);
}

/// Checks that `address` belongs to a store owning `prefix`.
pub(crate) fn check_prefix(prefix: &str, address: &Address) -> Result<(), StoreError> {
    if address.first() == prefix {
        Ok(())
    } else {
        Err(StoreError::WrongPrefix {
            expected: prefix.to_string(),
            address: address.clone(),
        })
    }
}
