//! # Actor Framework
//!
//! The building blocks of a stored-actor runtime: addressed, message-driven actors
//! that are scheduled cooperatively over a fixed worker pool, talk only through
//! asynchronous messages, spawn children and new root actors, receive checkpoint
//! heartbeats when idle, and can be swapped out of memory.
//!
//! ## Architecture Overview
//!
//! ```text
//!                ┌───────────── Runner (N workers) ─────────────┐
//!   shuttles ───►│ pump ──► Store ──take()──► Actor::deliver     │
//!                │            ▲                   │             │
//!                │            └── store_actor ◄───┤ outgoing    │
//!                └────────────────────────────────┼─────────────┘
//!                                                 ▼
//!                                ShuttleMap ──► timer / line / other runners
//! ```
//!
//! 1. A message reaches the runner owning its first address segment.
//! 2. The [`Store`](store::Store) queues it and marks the actor ready.
//! 3. A worker claims the actor with `take()`; nobody else can claim it until it is
//!    stored back.
//! 4. The actor's [`Coroutine`](actor::Coroutine) runs to its next suspension point.
//! 5. Its outgoing messages are routed by prefix: back into the store, or to a
//!    [`Shuttle`](shuttle::Shuttle) of another [`Gateway`](shuttle::Gateway).
//!
//! ## Module Tour
//!
//! | Module | Role |
//! |--------|------|
//! | [`address`] | Hierarchical `a:b:c` addresses with `\` escaping |
//! | [`message`] | `(source, destination, payload)` envelopes and payload validation |
//! | [`codec`] | Binary encoding for payloads, actor images and cache entries |
//! | [`context`] | What a coroutine sees while it runs: incoming message, outgoing batch, children, checkpoint |
//! | [`actor`] | Coroutines, the actor tree and its serialization registry |
//! | [`store`] | The work queue that decides who runs next, with [`MemoryStore`](store::MemoryStore) |
//! | [`runner`] | The worker pool executing scheduling turns |
//! | [`shuttle`] | Gateway and shuttle contracts plus prefix routing |
//! | [`timer`] | Delayed delivery through `timer:<target>:<ms>` |
//! | [`line`] / [`simulation`] | Deterministic unreliable links and an in-process network |
//! | [`cacher`] | Swapping idle actors out of memory |
//! | [`config`] | Serde configuration with validation |
//! | [`error`] | One error enum per concern |
//! | [`mock`] | Test doubles |
//! | [`tracing`] | Log setup |
//!
//! ## Quick Start
//!
//! ```rust
//! use actor_framework::actor::{Coroutine, Step};
//! use actor_framework::address::Address;
//! use actor_framework::context::{Context, RootSpawn};
//! use actor_framework::error::{ActorError, CodecError};
//! use actor_framework::message::{Message, Payload};
//! use actor_framework::mock::CaptureGateway;
//! use actor_framework::runner::Runner;
//! use actor_framework::shuttle::Gateway;
//! use actor_framework::store::MemoryStore;
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl Coroutine for Echo {
//!     fn resume(&mut self, cx: &mut Context) -> Result<Step, ActorError> {
//!         cx.reply(cx.incoming().payload().clone());
//!         Ok(Step::Suspend)
//!     }
//!
//!     fn tag(&self) -> &'static str {
//!         "echo"
//!     }
//!
//!     fn encode(&self) -> Result<Vec<u8>, CodecError> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let runner = Runner::builder(Arc::new(MemoryStore::new("runner")))
//!         .start()
//!         .unwrap();
//!     let client = CaptureGateway::new("client");
//!     runner.add_outgoing_shuttle(client.incoming_shuttle());
//!     client.add_outgoing_shuttle(runner.incoming_shuttle());
//!
//!     let echo = Address::parse("runner:echo").unwrap();
//!     runner.spawn(RootSpawn::new(echo.clone(), Echo, vec![])).await.unwrap();
//!
//!     client.send(vec![Message::new(
//!         Address::parse("client:me").unwrap(),
//!         echo,
//!         Payload::from_static(b"hello"),
//!     )]);
//!     let reply = client.recv().await;
//!     assert_eq!(reply.payload().as_bytes().as_ref(), b"hello");
//!
//!     runner.close();
//!     runner.join().await;
//! }
//! ```
//!
//! ## Concurrency Model
//!
//! - A coroutine never runs on two workers at once: the store hands out an actor only
//!   while it is not being processed.
//! - A turn is never preempted. Coroutines must not block; slow work belongs behind a
//!   gateway, with the actor suspending until the reply arrives.
//! - Parents and children form one unit: they are claimed, run and stored together.
//!
//! ## Testing
//!
//! [`mock::CaptureGateway`] collects what actors send to a prefix, and
//! [`mock::FlakyStore`] injects transient store failures.

pub mod actor;
pub mod address;
pub mod cacher;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod line;
pub mod message;
pub mod mock;
pub mod runner;
pub mod schedule;
pub mod shuttle;
pub mod simulation;
pub mod store;
pub mod timer;
pub mod tracing;

// Re-export core types for convenience
pub use actor::{Actor, Coroutine, CoroutineRegistry, Step};
pub use address::Address;
pub use context::{Context, Resumption, RootSpawn, SuspendMode};
pub use error::FrameworkError;
pub use message::{Message, Payload, Validate};
pub use runner::Runner;
pub use shuttle::{Gateway, Shuttle};
pub use store::{MemoryStore, Store};
