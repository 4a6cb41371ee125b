//! # System Lifecycle & Orchestration
//!
//! This module manages the runtime lifecycle of an actor system: building the store
//! and runner, wiring gateways together, seeding the initial actors, and shutting
//! everything down without losing the output of a turn that was already running.
//!
//! ## The Orchestration Pattern
//!
//! Individual actors are simple; **wiring them together** is where complexity lives.
//! [`ActorSystem`] is the conductor.
//!
//! **Key Responsibilities:**
//! 1. **Store & Runner** - Create the store for the system's prefix and start the workers
//! 2. **Shuttle Wiring** - Connect the runner and every gateway in both directions
//! 3. **Seeding** - Store the initial actors, then their priming messages
//! 4. **Graceful Shutdown** - Stop the runner first, then the gateways
//! 5. **Observability Setup** - [`setup_tracing`] for binaries
//!
//! ## Building a System
//!
//! ```rust
//! use actor_runtime::lifecycle::ActorSystem;
//! use actor_runtime::framework::timer::TimerGateway;
//! use actor_runtime::framework::error::{ActorError, CodecError};
//! use actor_runtime::framework::{Address, Context, Coroutine, Payload, Step};
//! use std::sync::Arc;
//!
//! struct Noop;
//!
//! impl Coroutine for Noop {
//!     fn resume(&mut self, _cx: &mut Context) -> Result<Step, ActorError> {
//!         Ok(Step::Suspend)
//!     }
//!     fn tag(&self) -> &'static str { "noop" }
//!     fn encode(&self) -> Result<Vec<u8>, CodecError> { Ok(Vec::new()) }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let system = ActorSystem::builder("runner")
//!         .workers(2)
//!         .gateway(Arc::new(TimerGateway::start()))
//!         .actor(Address::parse("runner:noop").unwrap(), Noop, vec![Payload::default()])
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     system.shutdown().await;
//! }
//! ```
//!
//! ## Wiring
//!
//! ```text
//!            ┌──────── runner ────────┐
//!            ▼                        ▼
//!          timer ◄──────────────────► net
//! ```
//!
//! Each gateway receives the incoming shuttle of the runner and of every other
//! gateway, so a timer can fire into a simulated network as easily as into the
//! runner. Prefixes must be unique; a clash fails the build with
//! [`SystemError::DuplicatePrefix`].
//!
//! ## Graceful Shutdown
//!
//! 1. **Close the runner** - Workers stop taking new work
//! 2. **Join the runner** - Turns in progress finish and route their output
//! 3. **Close and join gateways** - Timers and lines stop; anything still pending in
//!    them is dropped

mod system;

pub use actor_framework::tracing::setup_tracing;
pub use system::{ActorSystem, ActorSystemBuilder, SystemError};
