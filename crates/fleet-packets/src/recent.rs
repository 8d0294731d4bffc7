//! Short lookback cache of inbound packets.
//!
//! Lets late subscribers inspect packets that arrived moments before they
//! registered.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::packet::ReceivedPacket;

/// How long inbound packets are kept.
pub const LOOKBACK_WINDOW: Duration = Duration::from_secs(3);

pub(crate) struct RecentPackets {
    window: Duration,
    entries: Mutex<VecDeque<ReceivedPacket>>,
}

impl RecentPackets {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn push(&self, packet: ReceivedPacket) {
        let mut entries = self.entries.lock();
        Self::prune(&mut entries, self.window);
        entries.push_back(packet);
    }

    pub(crate) fn of_kind(&self, kind: &str) -> Vec<ReceivedPacket> {
        let mut entries = self.entries.lock();
        Self::prune(&mut entries, self.window);
        entries.iter().filter(|p| p.kind() == kind).cloned().collect()
    }

    fn prune(entries: &mut VecDeque<ReceivedPacket>, window: Duration) {
        let now = Instant::now();
        while entries
            .front()
            .is_some_and(|p| now.duration_since(p.received_at()) > window)
        {
            entries.pop_front();
        }
    }
}
