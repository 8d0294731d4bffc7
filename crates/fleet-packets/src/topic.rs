//! Topic naming.
//!
//! Three topic classes exist: unicast (one participant), role-multicast (all
//! participants of a role) and broadcast (everyone).

use std::fmt;

use fleet_core::{ParticipantId, ServiceRole};

/// Reserved name of the broadcast topic.
pub const BROADCAST_TOPIC: &str = "broadcast";

/// A named pub/sub channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Delivered to exactly one participant.
    Unicast(ParticipantId),
    /// Delivered to every participant of a role.
    Role(ServiceRole),
    /// Delivered to everyone.
    Broadcast,
}

impl Topic {
    /// The channel name used on the transport.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Unicast(id) => id.to_name(),
            Self::Role(role) => role.topic_name().to_string(),
            Self::Broadcast => BROADCAST_TOPIC.to_string(),
        }
    }

    /// Every topic a participant must listen on: its own, broadcast, and one per role.
    #[must_use]
    pub fn subscriptions_for(id: &ParticipantId) -> Vec<Self> {
        let mut topics = vec![Self::Unicast(*id), Self::Broadcast];
        topics.extend(ServiceRole::ALL.into_iter().map(Self::Role));
        topics
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
