//! # Actor Runtime
//!
//! > **A stored-actor runtime on Tokio.**
//!
//! Actors here are addressed, resumable computations. They are scheduled
//! cooperatively over a fixed worker pool, exchange only asynchronous messages, can be
//! checkpointed while idle and swapped out of memory, and reach timers and simulated
//! networks through gateways.
//!
//! ## Crate Layout
//!
//! | Crate | Role |
//! |-------|------|
//! | `actor-framework` ([`framework`]) | Addresses, messages, actors, stores, the runner, gateways |
//! | `actor-runtime` (this crate) | [`ActorSystem`](lifecycle::ActorSystem): builds and wires a complete system |
//! | `actor-sample` | Demonstration actors and a runnable demo |
//!
//! ## Module Tour
//!
//! ### 1. The Engine ([`framework`])
//! The core runtime, re-exported as-is.
//! - **Role**: Scheduling (store + runner), the actor model (coroutines, contexts,
//!   children), and the gateway contract.
//! - **Key items**: [`Runner`](framework::Runner), [`Store`](framework::Store),
//!   [`Coroutine`](framework::Coroutine), [`Gateway`](framework::Gateway).
//!
//! ### 2. The Orchestrator ([`lifecycle`])
//! - **Role**: The "dependency injection container" that starts the runner, wires
//!   gateways and seeds actors.
//! - **Key items**: [`ActorSystem`](lifecycle::ActorSystem),
//!   [`shutdown`](lifecycle::ActorSystem::shutdown).
//!
//! ## Quick Start
//!
//! ### Running the Demo
//!
//! ```bash
//! # Run with info logs
//! RUST_LOG=info cargo run -p actor-sample
//! ```
//!
//! ### Running Tests
//!
//! ```bash
//! cargo test --workspace
//! ```

pub use actor_framework as framework;

pub mod lifecycle;

pub use lifecycle::{ActorSystem, ActorSystemBuilder, SystemError};
