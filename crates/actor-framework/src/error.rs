//! # Framework Errors
//!
//! This module defines the error types used throughout the runtime. Each concern
//! (addressing, encoding, storage, actor execution, timers, configuration) gets its
//! own enum so callers can match on exactly what went wrong, and [`FrameworkError`]
//! unifies them for code that only needs to propagate.
//!
//! ## Error classes
//!
//! - **Fatal / programmer errors** are returned immediately and never retried:
//!   [`StoreError::WrongPrefix`], [`StoreError::Closed`],
//!   [`StoreError::AlreadyExists`], [`StoreError::NotClaimed`], [`ConfigError`],
//!   malformed addresses.
//! - **Transient errors** ([`StoreError::Unavailable`]) are retried by the runner
//!   until they succeed or the runner shuts down.
//! - **Expected absence** (a message for an actor that does not exist, a cache miss)
//!   is not an error at all: it is logged and reported as `None` / a dropped message.

use crate::address::Address;

/// Errors produced while building or manipulating an [`Address`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address must have at least one segment")]
    Empty,
    #[error("Address ends with a dangling escape character")]
    DanglingEscape,
    #[error("Index {index} out of range for address of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("{parent} is not a prefix of {child}")]
    NotPrefix { parent: Address, child: Address },
}

/// Errors produced by the structured encoding layer.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Encoding failed: {0}")]
    Encode(String),
    #[error("Decoding failed: {0}")]
    Decode(String),
    #[error("Validation failed: {0}")]
    Invalid(String),
    #[error("No coroutine registered for tag {0:?}")]
    UnknownTag(String),
}

/// Errors produced by a [`Store`](crate::store::Store).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A message or actor was routed to a store that does not own its prefix.
    /// This is a routing bug upstream.
    #[error("Address {address} does not belong to store {expected:?}")]
    WrongPrefix { expected: String, address: Address },
    #[error("Store closed")]
    Closed,
    /// A root actor was spawned at an address that already holds one.
    #[error("Actor {0} already exists")]
    AlreadyExists(Address),
    /// `store_actor` was called for an idle actor nobody had claimed.
    #[error("Actor {0} was not claimed")]
    NotClaimed(Address),
    /// The backing storage could not be reached. Callers retry.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl StoreError {
    /// Whether the operation should be retried rather than surfaced.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Errors raised by an actor's computation during a scheduling turn.
///
/// Any of these ends the turn and the runner discards the actor.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("Actor failed: {0}")]
    Failed(String),
    #[error("Actor panicked: {0}")]
    Panicked(String),
    #[error("No live or cached instance of {0}")]
    Missing(Address),
    /// The local copy of the actor is older than what the store holds.
    #[error("Local copy of {address} is at checkpoint {local}, store is at {stored}")]
    StaleCopy { address: Address, local: u64, stored: u64 },
    #[error("Child already exists: {0}")]
    DuplicateChild(Address),
    #[error("Message for {destination} does not belong to actor {actor}")]
    Misrouted { actor: Address, destination: Address },
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors produced by the timer gateway when parsing a destination.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("Invalid delay {0:?}: expected a number of milliseconds made of digits only")]
    InvalidDelay(String),
    #[error("Timer destination {0} has no delay segment")]
    MissingDelay(Address),
}

/// Invalid configuration values. Always fatal.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Umbrella error for code that only needs to propagate.
#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Actor(#[from] ActorError),
    #[error(transparent)]
    Timer(#[from] TimerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
