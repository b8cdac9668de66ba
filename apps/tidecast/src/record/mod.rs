//! Typed envelope codec for durable events.
//!
//! A [`Recordable`] carries a stable type name (independent of module
//! layout), an optional producer timestamp, and a store-assigned monotonic
//! id. On disk and on any external transport it travels as an [`Envelope`]:
//! the type name plus the concrete value's JSON.
//!
//! Decoders live in an explicit [`Registry`] handed to the store at
//! construction — no process-global state, so test suites get fresh
//! registries.

pub mod store;

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use store::{LogStore, Recorder, StoreError};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unregistered record type: {0}")]
    UnknownType(String),
    #[error("record payload encode: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("record payload decode: {0}")]
    Decode(#[source] serde_json::Error),
}

/// A message that survives restarts.
pub trait Recordable: Clone + Send + Sync + 'static {
    /// Stable wire name for the concrete variant. Never derive this from the
    /// Rust path; moving a type must not orphan existing log entries.
    fn type_name(&self) -> &'static str;

    /// Producer timestamp; the store substitutes insertion time when absent.
    fn ts(&self) -> Option<DateTime<Utc>>;

    /// Store-assigned id, present after the first save.
    fn id(&self) -> Option<u64>;

    fn with_id(self, id: u64) -> Self;

    /// The concrete value's JSON serialization.
    fn payload(&self) -> Result<Value, CodecError>;

    fn envelope(&self) -> Result<Envelope, CodecError> {
        Ok(Envelope {
            type_name: self.type_name().to_string(),
            payload: self.payload()?,
        })
    }
}

/// `{Type, Payload}` wire form of a recordable message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Type")]
    pub type_name: String,
    #[serde(rename = "Payload")]
    pub payload: Value,
}

type DecodeFn<M> = Box<dyn Fn(Value) -> Result<M, CodecError> + Send + Sync>;

/// Maps stable type names to decoder closures producing `M`.
pub struct Registry<M> {
    decoders: HashMap<&'static str, DecodeFn<M>>,
}

impl<M> Default for Registry<M> {
    fn default() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }
}

impl<M> fmt::Debug for Registry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<M> Registry<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a decoder for `type_name`. Idempotent: a repeat registration
    /// replaces the previous decoder.
    pub fn register<T>(&mut self, type_name: &'static str)
    where
        T: DeserializeOwned + Into<M> + 'static,
    {
        self.decoders.insert(
            type_name,
            Box::new(|payload| {
                serde_json::from_value::<T>(payload)
                    .map(Into::into)
                    .map_err(CodecError::Decode)
            }),
        );
    }

    pub fn decode(&self, envelope: &Envelope) -> Result<M, CodecError> {
        let decode = self
            .decoders
            .get(envelope.type_name.as_str())
            .ok_or_else(|| CodecError::UnknownType(envelope.type_name.clone()))?;
        decode(envelope.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Record;
    use crate::world::chat::{ChatMsg, CHAT_MSG_TYPE};

    fn sample() -> ChatMsg {
        ChatMsg::user(Utc::now(), "alice@example.com", "100.64.1.2:52011", "hi")
    }

    #[test]
    fn envelope_round_trip() {
        let mut registry: Registry<Record> = Registry::new();
        registry.register::<ChatMsg>(CHAT_MSG_TYPE);

        let rec = Record::Chat(sample());
        let envelope = rec.envelope().expect("encode");
        assert_eq!(envelope.type_name, CHAT_MSG_TYPE);

        let decoded = registry.decode(&envelope).expect("decode");
        let Record::Chat(msg) = decoded;
        assert_eq!(msg.who, "alice@example.com");
        assert_eq!(msg.text, "hi");
    }

    #[test]
    fn unknown_type_is_an_error() {
        let registry: Registry<Record> = Registry::new();
        let envelope = Record::Chat(sample()).envelope().expect("encode");
        match registry.decode(&envelope) {
            Err(CodecError::UnknownType(name)) => assert_eq!(name, CHAT_MSG_TYPE),
            other => panic!("expected unknown-type error, got {other:?}"),
        }
    }

    #[test]
    fn reregistration_is_idempotent() {
        let mut registry: Registry<Record> = Registry::new();
        registry.register::<ChatMsg>(CHAT_MSG_TYPE);
        registry.register::<ChatMsg>(CHAT_MSG_TYPE);
        let envelope = Record::Chat(sample()).envelope().expect("encode");
        registry.decode(&envelope).expect("decode still works");
    }

    #[test]
    fn envelope_wire_format_uses_type_and_payload_keys() {
        let envelope = Record::Chat(sample()).envelope().expect("encode");
        let json = serde_json::to_value(&envelope).expect("to_value");
        assert!(json.get("Type").is_some());
        assert!(json.get("Payload").is_some());
    }
}
