//! # Test Doubles
//!
//! Helpers for exercising actors and gateways without real transports.
//!
//! | Double | Stands in for | Use it to |
//! |--------|---------------|-----------|
//! | [`CaptureGateway`] | any external gateway | receive what actors send to a prefix, and send into the system |
//! | [`FlakyStore`] | a remote store with connectivity hiccups | check that callers retry transient failures |
//!
//! ## Capturing output
//!
//! Register the capture's incoming shuttle on a runner and read what arrives:
//!
//! ```rust
//! use actor_framework::address::Address;
//! use actor_framework::message::{Message, Payload};
//! use actor_framework::mock::CaptureGateway;
//! use actor_framework::shuttle::Gateway;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = CaptureGateway::new("client");
//!     client.incoming_shuttle().send(vec![Message::new(
//!         Address::of("runner"),
//!         Address::parse("client:me").unwrap(),
//!         Payload::from_static(b"hi"),
//!     )]);
//!     let message = client.recv().await;
//!     assert_eq!(message.payload().as_bytes().as_ref(), b"hi");
//! }
//! ```
//!
//! ## Injecting store failures
//!
//! [`FlakyStore`] wraps any store and fails the next `n` writes with
//! [`StoreError::Unavailable`] before delegating. A correct caller retries and the
//! write eventually lands exactly once.

use crate::address::Address;
use crate::error::StoreError;
use crate::message::Message;
use crate::shuttle::{ChannelShuttle, Gateway, Shuttle, ShuttleMap};
use crate::store::{Store, StoreOutcome, StoredActor, StoredWork};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// How long [`CaptureGateway::recv`] waits before failing the test.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct Inbox {
    receiver: mpsc::UnboundedReceiver<Vec<Message>>,
    buffered: VecDeque<Message>,
}

/// A gateway that records everything sent to its prefix.
pub struct CaptureGateway {
    prefix: String,
    incoming: Arc<ChannelShuttle>,
    inbox: Mutex<Inbox>,
    outgoing: ShuttleMap,
}

impl CaptureGateway {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let (incoming, receiver) = ChannelShuttle::new(prefix.clone());
        Self {
            prefix,
            incoming: Arc::new(incoming),
            inbox: Mutex::new(Inbox {
                receiver,
                buffered: VecDeque::new(),
            }),
            outgoing: ShuttleMap::new(),
        }
    }

    /// The next captured message.
    ///
    /// # Panics
    ///
    /// If nothing arrives within [`RECV_TIMEOUT`].
    pub async fn recv(&self) -> Message {
        match self.recv_timeout(RECV_TIMEOUT).await {
            Some(message) => message,
            None => panic!("{}: no message within {:?}", self.prefix, RECV_TIMEOUT),
        }
    }

    /// The next captured message, or `None` if nothing arrives within `timeout`.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        let mut inbox = self.inbox.lock().await;
        if let Some(message) = inbox.buffered.pop_front() {
            return Some(message);
        }
        let batch = tokio::time::timeout(timeout, inbox.receiver.recv())
            .await
            .ok()
            .flatten()?;
        inbox.buffered.extend(batch);
        inbox.buffered.pop_front()
    }

    /// Everything captured so far, without waiting.
    pub async fn drain(&self) -> Vec<Message> {
        let mut inbox = self.inbox.lock().await;
        while let Ok(batch) = inbox.receiver.try_recv() {
            inbox.buffered.extend(batch);
        }
        inbox.buffered.drain(..).collect()
    }

    /// Sends messages through the registered outgoing shuttles, as a real gateway
    /// would forward traffic into the system.
    pub fn send(&self, messages: Vec<Message>) {
        self.outgoing.dispatch(messages);
    }
}

#[async_trait]
impl Gateway for CaptureGateway {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn incoming_shuttle(&self) -> Arc<dyn Shuttle> {
        self.incoming.clone()
    }

    fn add_outgoing_shuttle(&self, shuttle: Arc<dyn Shuttle>) {
        self.outgoing.insert(shuttle);
    }

    fn remove_outgoing_shuttle(&self, prefix: &str) {
        self.outgoing.remove(prefix);
    }

    fn close(&self) {}

    async fn join(&self) {}
}

/// A [`Store`] whose next few writes fail with [`StoreError::Unavailable`].
pub struct FlakyStore<S> {
    inner: S,
    failures: AtomicUsize,
}

impl<S: Store> FlakyStore<S> {
    pub fn new(inner: S, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn failures_left(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Arms `n` more failures.
    pub fn fail_next(&self, n: usize) {
        self.failures.fetch_add(n, Ordering::SeqCst);
    }

    fn hiccup(&self, op: &str) -> Result<(), StoreError> {
        let armed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            Err(StoreError::Unavailable(format!("{op}: injected failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: Store> Store for FlakyStore<S> {
    fn prefix(&self) -> &str {
        self.inner.prefix()
    }

    async fn store_messages(&self, messages: Vec<Message>) -> Result<(), StoreError> {
        self.hiccup("store_messages")?;
        self.inner.store_messages(messages).await
    }

    async fn insert_actor(&self, actor: StoredActor) -> Result<(), StoreError> {
        self.hiccup("insert_actor")?;
        self.inner.insert_actor(actor).await
    }

    async fn store_actor(&self, actor: StoredActor) -> Result<StoreOutcome, StoreError> {
        self.hiccup("store_actor")?;
        self.inner.store_actor(actor).await
    }

    async fn take(&self) -> Result<StoredWork, StoreError> {
        self.inner.take().await
    }

    async fn discard(&self, address: &Address) -> Result<(), StoreError> {
        self.hiccup("discard")?;
        self.inner.discard(address).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
