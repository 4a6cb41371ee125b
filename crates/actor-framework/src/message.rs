//! # Messages
//!
//! A [`Message`] is the only thing actors exchange: an immutable envelope carrying a
//! source [`Address`], a destination [`Address`] and an opaque [`Payload`].
//!
//! Payloads are bytes. Actors agree on a payload type and use
//! [`Payload::encode`] / [`Payload::decode`] to cross the boundary. Because payloads
//! are reference-counted byte buffers, cloning a message (for example when a
//! simulated line duplicates it) never copies the body.

use crate::address::Address;
use crate::codec;
use crate::error::CodecError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Explicit validation for a payload type, run after decoding.
///
/// Implement this for message types whose invariants cannot be expressed by the
/// type alone (ranges, non-empty fields), then decode with
/// [`Payload::decode_valid`].
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// Opaque message body.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Payload(Bytes);

impl Payload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn from_static(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }

    /// Encodes a value with the runtime codec.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, CodecError> {
        codec::encode(value).map(|bytes| Self(Bytes::from(bytes)))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        codec::decode(&self.0)
    }

    /// Decodes and then runs the type's [`Validate`] check.
    pub fn decode_valid<T: DeserializeOwned + Validate>(&self) -> Result<T, CodecError> {
        let value: T = self.decode()?;
        value.validate().map_err(CodecError::Invalid)?;
        Ok(value)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Size in whole kilobytes, rounded up.
    pub fn size_kb(&self) -> u64 {
        (self.0.len() as u64).div_ceil(1024)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

/// Immutable `(source, destination, payload)` envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    source: Address,
    destination: Address,
    payload: Payload,
}

impl Message {
    pub fn new(source: Address, destination: Address, payload: Payload) -> Self {
        Self {
            source,
            destination,
            payload,
        }
    }

    pub fn source(&self) -> &Address {
        &self.source
    }

    pub fn destination(&self) -> &Address {
        &self.destination
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_parts(self) -> (Address, Address, Payload) {
        (self.source, self.destination, self.payload)
    }
}
