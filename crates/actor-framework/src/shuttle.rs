//! # Shuttles & Gateways
//!
//! A [`Shuttle`] is the send side of anything that accepts messages: a runner's store,
//! the timer, a simulated network, a test capture. Each shuttle owns one top-level
//! address prefix, and routing picks the shuttle by the destination's first segment.
//!
//! A [`Gateway`] owns an incoming shuttle (how others reach it) and a set of outgoing
//! shuttles (where it delivers), plus a lifecycle.
//!
//! ```text
//!   runner ──(timer shuttle)──► timer ──(runner shuttle)──► runner
//! ```

use crate::address::Address;
use crate::message::Message;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Send-side handle for a message sink.
///
/// `send` may be called from any thread and must not block.
pub trait Shuttle: Send + Sync {
    fn prefix(&self) -> &str;

    fn send(&self, messages: Vec<Message>);
}

#[async_trait]
pub trait Gateway: Send + Sync {
    fn prefix(&self) -> &str;

    /// The shuttle others use to send messages to this gateway.
    fn incoming_shuttle(&self) -> Arc<dyn Shuttle>;

    fn add_outgoing_shuttle(&self, shuttle: Arc<dyn Shuttle>);

    fn remove_outgoing_shuttle(&self, prefix: &str);

    /// Asks the gateway to stop. Returns immediately; see [`Gateway::join`].
    fn close(&self);

    /// Waits until the gateway's tasks have exited.
    async fn join(&self);
}

/// A [`Shuttle`] backed by an unbounded tokio channel.
pub struct ChannelShuttle {
    prefix: String,
    sender: mpsc::UnboundedSender<Vec<Message>>,
}

impl ChannelShuttle {
    pub fn new(prefix: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Vec<Message>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let shuttle = Self {
            prefix: prefix.into(),
            sender,
        };
        (shuttle, receiver)
    }
}

impl Shuttle for ChannelShuttle {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn send(&self, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        if self.sender.send(messages).is_err() {
            debug!(prefix = %self.prefix, "Shuttle receiver gone, dropping messages");
        }
    }
}

/// Outgoing shuttle registry, safe to read while shuttles are added or removed.
#[derive(Default)]
pub struct ShuttleMap {
    shuttles: RwLock<HashMap<String, Arc<dyn Shuttle>>>,
}

impl ShuttleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, shuttle: Arc<dyn Shuttle>) {
        let prefix = shuttle.prefix().to_string();
        self.shuttles.write().insert(prefix, shuttle);
    }

    pub fn remove(&self, prefix: &str) -> Option<Arc<dyn Shuttle>> {
        self.shuttles.write().remove(prefix)
    }

    pub fn get(&self, prefix: &str) -> Option<Arc<dyn Shuttle>> {
        self.shuttles.read().get(prefix).cloned()
    }

    pub fn len(&self) -> usize {
        self.shuttles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sends each message to the shuttle owning its destination prefix. Messages with
    /// no registered shuttle are dropped with a warning.
    pub fn dispatch(&self, messages: Vec<Message>) {
        for (prefix, batch) in group_by_prefix(messages) {
            match self.get(&prefix) {
                Some(shuttle) => shuttle.send(batch),
                None => warn!(%prefix, count = batch.len(), "No shuttle for prefix, dropping messages"),
            }
        }
    }
}

/// Groups messages by destination prefix, keeping their relative order.
pub fn group_by_prefix(messages: Vec<Message>) -> Vec<(String, Vec<Message>)> {
    let mut groups: Vec<(String, Vec<Message>)> = Vec::new();
    for message in messages {
        let prefix = message.destination().first();
        match groups.iter_mut().find(|(p, _)| p == prefix) {
            Some((_, batch)) => batch.push(message),
            None => groups.push((prefix.to_string(), vec![message])),
        }
    }
    groups
}

/// `destination` with the first segment removed, or `None` if nothing remains.
pub(crate) fn strip_prefix(destination: &Address) -> Option<Address> {
    let prefix = Address::of(destination.first());
    prefix.remove_prefix(destination).ok().flatten()
}
