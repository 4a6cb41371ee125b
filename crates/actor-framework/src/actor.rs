//! # Actors
//!
//! An [`Actor`] is a resumable computation bound to an address. The computation is a
//! [`Coroutine`]: a state machine that the runtime resumes exactly once per delivered
//! message and that yields control back by returning a [`Step`].
//!
//! ```text
//!            deliver(msg)
//!   runner ───────────────► Actor ──► route to node ──► Coroutine::resume(&mut Context)
//!      ▲                                                         │
//!      └──────────── TurnReport { outgoing, spawned, finished } ◄┘
//! ```
//!
//! ## Children
//!
//! A coroutine may spawn children below its own address. Children are not separate
//! store entries: they live in the same actor, in an arena keyed by absolute address,
//! and each node's [`Context`] only records the *addresses* of its children. This keeps
//! parent/child links free of ownership cycles and lets the whole tree be claimed,
//! executed and stored as one unit, so a parent and its children never run
//! concurrently.
//!
//! ## Serialization
//!
//! Coroutines encode their own state ([`Coroutine::encode`]) and are rebuilt through a
//! [`CoroutineRegistry`] keyed by [`Coroutine::tag`]. [`Actor::encode`] produces an
//! image of every node (tag, state, persistent context) that
//! [`CoroutineRegistry::decode_actor`] turns back into an actor.

use crate::address::Address;
use crate::codec;
use crate::context::{ChildSpawn, Context, Resumption, RootSpawn, SuspendMode};
use crate::error::{ActorError, CodecError};
use crate::message::{Message, Payload};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What a coroutine does after handling a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Wait for the next message.
    Suspend,
    /// The computation is over; the node (and its children) are destroyed.
    Finish,
}

/// A resumable computation.
///
/// `resume` must not block: everything between two suspension points runs on a
/// scheduler worker without preemption. State that must survive between messages
/// lives in `self`.
pub trait Coroutine: Send + 'static {
    fn resume(&mut self, cx: &mut Context) -> Result<Step, ActorError>;

    /// Registry key used to rebuild this coroutine from [`Coroutine::encode`]'s output.
    fn tag(&self) -> &'static str;

    fn encode(&self) -> Result<Vec<u8>, CodecError>;
}

struct Node {
    coroutine: Box<dyn Coroutine>,
    context: Context,
}

/// Everything one delivery produced.
#[derive(Debug, Default)]
pub struct TurnReport {
    /// Outgoing messages in the order they were queued, sources already absolute.
    pub outgoing: Vec<Message>,
    /// Root actors requested with [`Context::spawn_root`].
    pub spawned: Vec<RootSpawn>,
    /// The root coroutine finished; the actor must be discarded.
    pub finished: bool,
}

/// A root coroutine plus its children, addressed as one unit.
pub struct Actor {
    address: Address,
    nodes: BTreeMap<Address, Node>,
}

impl Actor {
    pub fn new(address: Address, coroutine: impl Coroutine) -> Self {
        Self::from_boxed(address, Box::new(coroutine))
    }

    pub fn from_boxed(address: Address, coroutine: Box<dyn Coroutine>) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            address.clone(),
            Node {
                coroutine,
                context: Context::new(address.clone()),
            },
        );
        Self { address, nodes }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The root node's context.
    pub fn context(&self) -> Option<&Context> {
        self.nodes.get(&self.address).map(|node| &node.context)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.nodes.contains_key(address)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Registry tags of every node, root first.
    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.nodes.values().map(|node| node.coroutine.tag())
    }

    pub fn checkpoint_instance(&self) -> u64 {
        self.context().map(Context::checkpoint_instance).unwrap_or(0)
    }

    pub fn set_checkpoint_instance(&mut self, instance: u64) {
        if let Some(node) = self.nodes.get_mut(&self.address) {
            node.context.set_checkpoint_instance(instance);
        }
    }

    /// The root node's checkpoint request, if any.
    pub fn checkpoint(&self) -> Option<(Payload, Duration)> {
        self.context().and_then(Context::checkpoint)
    }

    /// Delivers one message to whichever node should handle it and reports what the
    /// turn produced. `checkpoint` marks a heartbeat synthesized by the store.
    pub fn deliver(&mut self, message: Message, checkpoint: bool) -> Result<TurnReport, ActorError> {
        if !self.address.is_prefix_of(message.destination()) {
            return Err(ActorError::Misrouted {
                actor: self.address.clone(),
                destination: message.destination().clone(),
            });
        }
        let mut report = TurnReport::default();
        let root = self.address.clone();
        self.route(&root, &message, checkpoint, &mut report)?;
        Ok(report)
    }

    fn route(
        &mut self,
        at: &Address,
        message: &Message,
        checkpoint: bool,
        report: &mut TurnReport,
    ) -> Result<(), ActorError> {
        let Some(node) = self.nodes.get(at) else {
            return Ok(());
        };
        let mode = node.context.mode();
        let intercept = node.context.intercepting();
        let target = match at.remove_prefix(message.destination())? {
            Some(rest) => {
                let child = at.child(rest.first());
                node.context.children().contains(&child).then_some(child)
            }
            None => None,
        };

        let child = match target {
            Some(child) if mode.forwards() => child,
            _ => {
                self.resume(at, message.clone(), Resumption::Direct, checkpoint, report)?;
                return Ok(());
            }
        };

        if intercept {
            let resumption = Resumption::Intercepted {
                child: child.clone(),
            };
            let forwarded = self.resume(at, message.clone(), resumption, checkpoint, report)?;
            if !forwarded || !self.nodes.contains_key(&child) {
                return Ok(());
            }
        }

        self.route(&child, message, checkpoint, report)?;

        if mode == SuspendMode::ForwardAndReturn && self.nodes.contains_key(at) {
            let resumption = Resumption::Returned { child };
            self.resume(at, message.clone(), resumption, checkpoint, report)?;
        }
        Ok(())
    }

    /// Resumes one node and applies its side effects. Returns whether the node asked
    /// for an intercepted message to be forwarded.
    fn resume(
        &mut self,
        at: &Address,
        message: Message,
        resumption: Resumption,
        checkpoint: bool,
        report: &mut TurnReport,
    ) -> Result<bool, ActorError> {
        let Some(node) = self.nodes.get_mut(at) else {
            return Ok(false);
        };
        node.context.begin(message, resumption, checkpoint);
        let step = node.coroutine.resume(&mut node.context)?;

        report.outgoing.extend(node.context.drain_outgoing());
        report.spawned.extend(node.context.take_spawned_roots());
        let forward = node.context.take_forward();
        let removed = node.context.take_removed_children();
        let spawned = node.context.take_spawned_children();
        node.context.settle();

        for child in removed {
            self.remove_subtree(&child);
        }
        for spawn in spawned {
            self.spawn_child(at, spawn, report)?;
        }

        if step == Step::Finish {
            self.remove_subtree(at);
            if *at == self.address {
                report.finished = true;
            }
        }
        Ok(forward)
    }

    fn spawn_child(
        &mut self,
        parent: &Address,
        spawn: ChildSpawn,
        report: &mut TurnReport,
    ) -> Result<(), ActorError> {
        let ChildSpawn {
            id,
            coroutine,
            priming,
        } = spawn;
        let address = parent.child(id);
        if self.nodes.contains_key(&address) {
            return Err(ActorError::DuplicateChild(address));
        }
        self.nodes.insert(
            address.clone(),
            Node {
                coroutine,
                context: Context::new(address.clone()),
            },
        );
        if let Some(node) = self.nodes.get_mut(parent) {
            node.context.add_child(address.clone());
        }
        for payload in priming {
            let message = Message::new(parent.clone(), address.clone(), payload);
            self.resume(&address, message, Resumption::Direct, false, report)?;
        }
        Ok(())
    }

    fn remove_subtree(&mut self, address: &Address) {
        self.nodes.retain(|key, _| !address.is_prefix_of(key));
        if let Some(parent) = address.parent() {
            if let Some(node) = self.nodes.get_mut(&parent) {
                node.context.forget_child(address);
            }
        }
    }

    /// Serializes every node into one image.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let nodes = self
            .nodes
            .values()
            .map(|node| {
                Ok(NodeImageRef {
                    tag: node.coroutine.tag(),
                    state: node.coroutine.encode()?,
                    context: &node.context,
                })
            })
            .collect::<Result<Vec<_>, CodecError>>()?;
        let image = ActorImageRef {
            address: &self.address,
            nodes,
        };
        codec::encode(&image).map(Bytes::from)
    }
}

impl fmt::Debug for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actor")
            .field("address", &self.address)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Serialize)]
struct NodeImageRef<'a> {
    tag: &'a str,
    state: Vec<u8>,
    context: &'a Context,
}

#[derive(Serialize)]
struct ActorImageRef<'a> {
    address: &'a Address,
    nodes: Vec<NodeImageRef<'a>>,
}

#[derive(Deserialize)]
struct NodeImage {
    tag: String,
    state: Vec<u8>,
    context: Context,
}

#[derive(Deserialize)]
struct ActorImage {
    address: Address,
    nodes: Vec<NodeImage>,
}

type Decoder = Arc<dyn Fn(&[u8]) -> Result<Box<dyn Coroutine>, CodecError> + Send + Sync>;

/// Maps coroutine tags to decoders so serialized actors can be rebuilt.
#[derive(Clone, Default)]
pub struct CoroutineRegistry {
    decoders: HashMap<&'static str, Decoder>,
}

impl CoroutineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `tag`, which must match what `T::tag` returns.
    pub fn register<T>(mut self, tag: &'static str) -> Self
    where
        T: Coroutine + DeserializeOwned,
    {
        let decoder: Decoder = Arc::new(|bytes: &[u8]| {
            let coroutine: T = codec::decode(bytes)?;
            Ok(Box::new(coroutine) as Box<dyn Coroutine>)
        });
        self.decoders.insert(tag, decoder);
        self
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }

    pub fn decode_coroutine(&self, tag: &str, state: &[u8]) -> Result<Box<dyn Coroutine>, CodecError> {
        let decoder = self
            .decoders
            .get(tag)
            .ok_or_else(|| CodecError::UnknownTag(tag.to_string()))?;
        decoder(state)
    }

    /// Rebuilds an actor from [`Actor::encode`]'s output.
    pub fn decode_actor(&self, bytes: &[u8]) -> Result<Actor, CodecError> {
        let image: ActorImage = codec::decode(bytes)?;
        let mut nodes = BTreeMap::new();
        for node in image.nodes {
            let coroutine = self.decode_coroutine(&node.tag, &node.state)?;
            nodes.insert(
                node.context.address().clone(),
                Node {
                    coroutine,
                    context: node.context,
                },
            );
        }
        if !nodes.contains_key(&image.address) {
            return Err(CodecError::Decode(format!(
                "image for {} has no root node",
                image.address
            )));
        }
        Ok(Actor {
            address: image.address,
            nodes,
        })
    }
}

impl fmt::Debug for CoroutineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoroutineRegistry")
            .field("tags", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}
