//! Packet traits and the wire envelope.
//!
//! On the wire a packet is a JSON [`Envelope`]: the packet's kind plus a
//! payload string holding the JSON of the sender, the local-receiver flag and
//! the packet body.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use fleet_core::ParticipantId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::PacketError;

/// A typed message that can travel over the bus.
///
/// `KIND` is the stable name receivers use to pick a decoder, so it must be
/// unique across the cluster.
pub trait Packet: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Stable kind name.
    const KIND: &'static str;

    /// Whether the sender's own dispatcher should also receive this packet.
    fn allow_local_receiver(&self) -> bool {
        false
    }
}

/// A packet that expects a reply of a specific kind.
pub trait Request: Packet {
    /// The packet kind that answers this request.
    type Reply: Packet;
}

/// Framing of every message on the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Packet kind, used to pick the decoder.
    pub kind: String,
    /// JSON-encoded [`Frame`].
    pub payload: String,
}

impl Envelope {
    /// Serialize the envelope to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        serde_json::to_vec(self).map_err(|source| PacketError::Encode {
            kind: self.kind.clone(),
            source,
        })
    }

    /// Parse an envelope from bytes.
    ///
    /// # Errors
    ///
    /// Returns `PacketError::Envelope` if the bytes are not a valid envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        serde_json::from_slice(bytes).map_err(PacketError::Envelope)
    }
}

/// The payload of an [`Envelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame<T> {
    /// Participant that published the packet.
    pub sender: ParticipantId,
    /// Whether the sender may receive its own packet.
    pub allow_local_receiver: bool,
    /// The packet body.
    pub body: T,
}

/// Encode a packet into wire bytes.
pub(crate) fn encode<T: Packet>(packet: &T, sender: ParticipantId) -> Result<Vec<u8>, PacketError> {
    let frame = Frame {
        sender,
        allow_local_receiver: packet.allow_local_receiver(),
        body: packet,
    };
    let payload = serde_json::to_string(&frame).map_err(|source| PacketError::Encode {
        kind: T::KIND.to_string(),
        source,
    })?;
    Envelope {
        kind: T::KIND.to_string(),
        payload,
    }
    .to_bytes()
}

/// Decode the payload of a `T` envelope. Used as the registry's decoder.
pub(crate) fn decode<T: Packet>(payload: &str) -> Result<ReceivedPacket, serde_json::Error> {
    let frame: Frame<T> = serde_json::from_str(payload)?;
    Ok(ReceivedPacket {
        kind: T::KIND,
        sender: frame.sender,
        allow_local_receiver: frame.allow_local_receiver,
        received_at: Instant::now(),
        body: Arc::new(frame.body),
    })
}

/// A decoded inbound packet of any registered kind.
#[derive(Clone)]
pub struct ReceivedPacket {
    kind: &'static str,
    sender: ParticipantId,
    allow_local_receiver: bool,
    received_at: Instant,
    body: Arc<dyn Any + Send + Sync>,
}

impl ReceivedPacket {
    /// The packet's kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    /// The participant that published the packet.
    #[must_use]
    pub const fn sender(&self) -> ParticipantId {
        self.sender
    }

    /// Whether the sender allowed itself to receive this packet.
    #[must_use]
    pub const fn allow_local_receiver(&self) -> bool {
        self.allow_local_receiver
    }

    /// When the local dispatcher decoded the packet.
    #[must_use]
    pub const fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Whether the body is a `T`.
    #[must_use]
    pub fn is<T: Packet>(&self) -> bool {
        self.body.is::<T>()
    }

    /// Borrow the body as a `T`, if it is one.
    #[must_use]
    pub fn downcast<T: Packet>(&self) -> Option<&T> {
        self.body.downcast_ref::<T>()
    }
}

impl fmt::Debug for ReceivedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivedPacket")
            .field("kind", &self.kind)
            .field("sender", &self.sender)
            .field("allow_local_receiver", &self.allow_local_receiver)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        text: String,
    }

    impl Packet for Greeting {
        const KIND: &'static str = "test.Greeting";
    }

    #[test]
    fn envelope_carries_kind_and_frame() {
        let bytes = encode(
            &Greeting {
                text: "hi".into(),
            },
            ParticipantId::proxy(2),
        )
        .unwrap();

        let envelope = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(envelope.kind, "test.Greeting");

        let json: serde_json::Value = serde_json::from_str(&envelope.payload).unwrap();
        assert_eq!(json["sender"], "proxy-2");
        assert_eq!(json["allow_local_receiver"], false);
        assert_eq!(json["body"]["text"], "hi");
    }

    #[test]
    fn decoded_body_downcasts_to_its_type() {
        let bytes = encode(
            &Greeting {
                text: "hi".into(),
            },
            ParticipantId::node(1),
        )
        .unwrap();
        let envelope = Envelope::from_bytes(&bytes).unwrap();
        let packet = decode::<Greeting>(&envelope.payload).unwrap();

        assert_eq!(packet.kind(), Greeting::KIND);
        assert_eq!(packet.sender(), ParticipantId::node(1));
        assert!(packet.is::<Greeting>());
        assert_eq!(packet.downcast::<Greeting>().unwrap().text, "hi");
    }

    #[test]
    fn garbage_is_not_an_envelope() {
        assert!(matches!(
            Envelope::from_bytes(b"not json"),
            Err(PacketError::Envelope(_))
        ));
    }
}
