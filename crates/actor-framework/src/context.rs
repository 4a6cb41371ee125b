//! # Actor Execution Context
//!
//! A [`Context`] is the mutable state a coroutine sees while it runs: the message it
//! was resumed with, the batch of messages it wants to send, how it wants messages for
//! its children handled, and its checkpoint configuration.
//!
//! The context is the only channel between a coroutine and the runtime. A coroutine
//! never sends anything directly; it queues outgoing messages here and the runner
//! drains and routes them once the coroutine suspends.
//!
//! ## Forwarding modes
//!
//! When a message arrives for `parent:child:...` and `child` is a known child, the
//! parent's [`SuspendMode`] decides who handles it:
//!
//! | Mode | Behavior |
//! |------|----------|
//! | [`SuspendMode::Release`] | The parent handles everything itself. |
//! | [`SuspendMode::ForwardAndRelease`] | The child handles it; the parent is not resumed. |
//! | [`SuspendMode::ForwardAndReturn`] | The child handles it, then the parent is resumed with [`Resumption::Returned`]. |
//!
//! With [`Context::set_intercept`] the parent is resumed first with
//! [`Resumption::Intercepted`] and the message only reaches the child if the parent
//! calls [`Context::forward`].

use crate::actor::Coroutine;
use crate::address::Address;
use crate::message::{Message, Payload};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::mem;
use std::time::Duration;

/// How a suspended parent treats messages addressed to its children.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuspendMode {
    Release,
    #[default]
    ForwardAndRelease,
    ForwardAndReturn,
}

impl SuspendMode {
    pub fn forwards(self) -> bool {
        !matches!(self, SuspendMode::Release)
    }
}

/// Why the coroutine is being resumed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Resumption {
    /// The incoming message is for this node.
    #[default]
    Direct,
    /// The incoming message is for `child`; call [`Context::forward`] to pass it on.
    Intercepted { child: Address },
    /// `child` has just handled the incoming message.
    Returned { child: Address },
}

/// One queued outgoing message. The source is the node's address extended by
/// `source_suffix`.
#[derive(Clone, Debug)]
pub struct Outgoing {
    pub source_suffix: Option<Address>,
    pub destination: Address,
    pub payload: Payload,
}

pub(crate) struct ChildSpawn {
    pub(crate) id: String,
    pub(crate) coroutine: Box<dyn Coroutine>,
    pub(crate) priming: Vec<Payload>,
}

/// A request to create a new top-level actor, handed to the runner after the turn.
pub struct RootSpawn {
    pub address: Address,
    pub coroutine: Box<dyn Coroutine>,
    pub priming: Vec<Payload>,
    /// Source of the priming messages.
    pub source: Address,
}

impl RootSpawn {
    /// A spawn request from outside any actor; priming messages come from the empty
    /// address.
    pub fn new(address: Address, coroutine: impl Coroutine, priming: Vec<Payload>) -> Self {
        Self {
            address,
            coroutine: Box::new(coroutine),
            priming,
            source: Address::empty(),
        }
    }
}

impl fmt::Debug for RootSpawn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootSpawn")
            .field("address", &self.address)
            .field("tag", &self.coroutine.tag())
            .field("priming", &self.priming.len())
            .field("source", &self.source)
            .finish()
    }
}

fn idle_message() -> Message {
    Message::new(Address::empty(), Address::empty(), Payload::default())
}

/// Per-node execution state. Only the persistent part (address, mode, children,
/// checkpoint configuration) survives serialization; everything else is scoped to a
/// single resumption.
#[derive(Serialize, Deserialize)]
pub struct Context {
    address: Address,
    mode: SuspendMode,
    intercept: bool,
    children: BTreeSet<Address>,
    checkpoint_payload: Option<Payload>,
    checkpoint_timeout: Option<Duration>,
    checkpoint_instance: u64,

    #[serde(skip, default = "idle_message")]
    incoming: Message,
    #[serde(skip)]
    resumption: Resumption,
    #[serde(skip)]
    checkpoint_fired: bool,
    #[serde(skip)]
    forward: bool,
    #[serde(skip)]
    outgoing: Vec<Outgoing>,
    #[serde(skip)]
    spawned_children: Vec<ChildSpawn>,
    #[serde(skip)]
    removed_children: Vec<Address>,
    #[serde(skip)]
    spawned_roots: Vec<RootSpawn>,
}

impl Context {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            mode: SuspendMode::default(),
            intercept: false,
            children: BTreeSet::new(),
            checkpoint_payload: None,
            checkpoint_timeout: None,
            checkpoint_instance: 0,
            incoming: idle_message(),
            resumption: Resumption::Direct,
            checkpoint_fired: false,
            forward: false,
            outgoing: Vec::new(),
            spawned_children: Vec::new(),
            removed_children: Vec::new(),
            spawned_roots: Vec::new(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The message this resumption was triggered by.
    pub fn incoming(&self) -> &Message {
        &self.incoming
    }

    pub fn resumption(&self) -> &Resumption {
        &self.resumption
    }

    /// `true` when the incoming message is a checkpoint heartbeat synthesized by the
    /// store rather than a message someone sent.
    pub fn is_checkpoint(&self) -> bool {
        self.checkpoint_fired
    }

    // --- Outgoing ---

    pub fn send(&mut self, destination: Address, payload: Payload) {
        self.outgoing.push(Outgoing {
            source_suffix: None,
            destination,
            payload,
        });
    }

    /// Sends from a sub-address of this node, e.g. so the reply comes back to
    /// `self:suffix`.
    pub fn send_from(&mut self, source_suffix: Address, destination: Address, payload: Payload) {
        self.outgoing.push(Outgoing {
            source_suffix: Some(source_suffix),
            destination,
            payload,
        });
    }

    /// Sends back to the source of the incoming message.
    pub fn reply(&mut self, payload: Payload) {
        let destination = self.incoming.source().clone();
        self.send(destination, payload);
    }

    // --- Forwarding ---

    pub fn mode(&self) -> SuspendMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: SuspendMode) {
        self.mode = mode;
    }

    pub fn intercepting(&self) -> bool {
        self.intercept
    }

    pub fn set_intercept(&mut self, intercept: bool) {
        self.intercept = intercept;
    }

    /// Passes an intercepted message on to the child it was addressed to.
    /// Has no effect outside [`Resumption::Intercepted`].
    pub fn forward(&mut self) {
        if matches!(self.resumption, Resumption::Intercepted { .. }) {
            self.forward = true;
        }
    }

    // --- Children ---

    pub fn children(&self) -> &BTreeSet<Address> {
        &self.children
    }

    /// Creates a child at `self:id`. The child is resumed once per priming payload
    /// (with this node as the source) before the current turn ends.
    pub fn spawn_child(
        &mut self,
        id: impl Into<String>,
        coroutine: impl Coroutine,
        priming: Vec<Payload>,
    ) -> Address {
        let id = id.into();
        let address = self.address.child(id.clone());
        self.spawned_children.push(ChildSpawn {
            id,
            coroutine: Box::new(coroutine),
            priming,
        });
        address
    }

    /// Destroys the child at `self:id` (and everything below it) once this
    /// resumption ends.
    pub fn remove_child(&mut self, id: impl Into<String>) {
        let address = self.address.child(id);
        self.removed_children.push(address);
    }

    /// Creates a new top-level actor. The runner stores it after this turn, followed by
    /// one priming message per payload sent from this node.
    pub fn spawn_root(&mut self, address: Address, coroutine: impl Coroutine, priming: Vec<Payload>) {
        self.spawned_roots.push(RootSpawn {
            address,
            coroutine: Box::new(coroutine),
            priming,
            source: self.address.clone(),
        });
    }

    // --- Checkpoints ---

    /// Asks the store to resume this actor with `payload` (sent from itself to itself)
    /// if no other message arrives within `timeout`. Only honored on the root node.
    pub fn set_checkpoint(&mut self, payload: Payload, timeout: Duration) {
        self.checkpoint_payload = Some(payload);
        self.checkpoint_timeout = Some(timeout);
    }

    pub fn clear_checkpoint(&mut self) {
        self.checkpoint_payload = None;
        self.checkpoint_timeout = None;
    }

    /// How many checkpoints have fired for this actor.
    pub fn checkpoint_instance(&self) -> u64 {
        self.checkpoint_instance
    }

    // --- Runtime side ---

    pub(crate) fn checkpoint(&self) -> Option<(Payload, Duration)> {
        match (&self.checkpoint_payload, self.checkpoint_timeout) {
            (Some(payload), Some(timeout)) => Some((payload.clone(), timeout)),
            _ => None,
        }
    }

    pub(crate) fn set_checkpoint_instance(&mut self, instance: u64) {
        self.checkpoint_instance = instance;
    }

    pub(crate) fn begin(&mut self, incoming: Message, resumption: Resumption, checkpoint: bool) {
        self.incoming = incoming;
        self.resumption = resumption;
        self.checkpoint_fired = checkpoint;
        self.forward = false;
    }

    /// Drains the outgoing batch, composing each source with this node's address.
    pub(crate) fn drain_outgoing(&mut self) -> Vec<Message> {
        let address = &self.address;
        mem::take(&mut self.outgoing)
            .into_iter()
            .map(|out| {
                let source = match &out.source_suffix {
                    Some(suffix) => address.append(suffix),
                    None => address.clone(),
                };
                Message::new(source, out.destination, out.payload)
            })
            .collect()
    }

    pub(crate) fn take_forward(&mut self) -> bool {
        mem::take(&mut self.forward)
    }

    pub(crate) fn take_spawned_children(&mut self) -> Vec<ChildSpawn> {
        mem::take(&mut self.spawned_children)
    }

    pub(crate) fn take_removed_children(&mut self) -> Vec<Address> {
        mem::take(&mut self.removed_children)
    }

    pub(crate) fn take_spawned_roots(&mut self) -> Vec<RootSpawn> {
        mem::take(&mut self.spawned_roots)
    }

    pub(crate) fn add_child(&mut self, child: Address) {
        self.children.insert(child);
    }

    pub(crate) fn forget_child(&mut self, child: &Address) {
        self.children.remove(child);
    }

    /// Drops per-resumption state so the context is at rest.
    pub(crate) fn settle(&mut self) {
        self.incoming = idle_message();
        self.resumption = Resumption::Direct;
        self.checkpoint_fired = false;
        self.forward = false;
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("address", &self.address)
            .field("mode", &self.mode)
            .field("intercept", &self.intercept)
            .field("children", &self.children)
            .field("checkpoint_timeout", &self.checkpoint_timeout)
            .field("checkpoint_instance", &self.checkpoint_instance)
            .field("outgoing", &self.outgoing.len())
            .finish()
    }
}
