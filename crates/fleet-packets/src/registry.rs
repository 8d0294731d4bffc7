//! Packet kind registry.
//!
//! Receivers can only decode kinds they have registered; everything else on
//! the wire is silently dropped. The registry is built up front and then
//! shared read-only with the dispatcher.

use std::collections::HashMap;
use std::fmt;

use crate::builtin;
use crate::error::PacketError;
use crate::packet::{self, Envelope, Packet, ReceivedPacket};

type DecodeFn = fn(&str) -> Result<ReceivedPacket, serde_json::Error>;

/// Maps packet kinds to their decoders.
#[derive(Default, Clone)]
pub struct PacketRegistry {
    decoders: HashMap<&'static str, DecodeFn>,
}

impl fmt::Debug for PacketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}

impl PacketRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in lifecycle and ping packets.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Register a packet kind. Re-registering a kind replaces its decoder.
    pub fn register<T: Packet>(&mut self) -> &mut Self {
        if self.decoders.insert(T::KIND, packet::decode::<T>).is_some() {
            tracing::debug!(kind = T::KIND, "Packet kind registered twice");
        }
        self
    }

    /// Remove a packet kind. Returns whether it was registered.
    pub fn unregister(&mut self, kind: &str) -> bool {
        self.decoders.remove(kind).is_some()
    }

    /// Whether a kind has been registered.
    #[must_use]
    pub fn is_registered(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    /// Iterate the registered kinds.
    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.decoders.keys().copied()
    }

    /// Decode an envelope.
    ///
    /// Returns `None` if the kind is not registered.
    pub fn decode(&self, envelope: &Envelope) -> Option<Result<ReceivedPacket, PacketError>> {
        let decode = self.decoders.get(envelope.kind.as_str())?;
        Some(
            decode(&envelope.payload).map_err(|source| PacketError::Decode {
                kind: envelope.kind.clone(),
                source,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{PingRequest, ShutdownAck, ShutdownRequest};
    use fleet_core::ParticipantId;

    #[test]
    fn builtin_kinds_are_registered() {
        let registry = PacketRegistry::with_builtin();
        assert!(registry.is_registered(ShutdownRequest::KIND));
        assert!(registry.is_registered(ShutdownAck::KIND));
        assert!(registry.is_registered(PingRequest::KIND));
    }

    #[test]
    fn unknown_kind_decodes_to_none() {
        let registry = PacketRegistry::new();
        let envelope = Envelope {
            kind: "nobody.Knows".to_string(),
            payload: "{}".to_string(),
        };
        assert!(registry.decode(&envelope).is_none());
    }

    #[test]
    fn unregister_removes_kind() {
        let mut registry = PacketRegistry::with_builtin();
        assert!(registry.unregister(ShutdownAck::KIND));
        assert!(!registry.is_registered(ShutdownAck::KIND));
        assert!(!registry.unregister(ShutdownAck::KIND));
    }

    #[test]
    fn bad_payload_is_a_decode_error() {
        let registry = PacketRegistry::with_builtin();
        let envelope = Envelope {
            kind: ShutdownRequest::KIND.to_string(),
            payload: "[1, 2]".to_string(),
        };
        assert!(matches!(
            registry.decode(&envelope),
            Some(Err(PacketError::Decode { .. }))
        ));
    }

    #[test]
    fn decodes_registered_kind() {
        let registry = PacketRegistry::with_builtin();
        let bytes = packet::encode(&ShutdownRequest {}, ParticipantId::node(1)).unwrap();
        let envelope = Envelope::from_bytes(&bytes).unwrap();

        let received = registry.decode(&envelope).unwrap().unwrap();
        assert!(received.is::<ShutdownRequest>());
        assert_eq!(received.sender(), ParticipantId::node(1));
    }
}
