//! Built-in packets every participant understands.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dispatcher::{ListenerId, PacketDispatcher};
use crate::packet::{Packet, Request};
use crate::registry::PacketRegistry;

/// Asks a server to shut itself down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownRequest {}

impl Packet for ShutdownRequest {
    const KIND: &'static str = "fleet.lifecycle.ShutdownRequest";
}

impl Request for ShutdownRequest {
    type Reply = ShutdownAck;
}

/// Confirms that a server has begun shutting down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownAck {}

impl Packet for ShutdownAck {
    const KIND: &'static str = "fleet.lifecycle.ShutdownAck";
}

/// Liveness check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {}

impl Packet for PingRequest {
    const KIND: &'static str = "fleet.ping.PingRequest";
}

impl Request for PingRequest {
    type Reply = PingReply;
}

/// Answer to a [`PingRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingReply {}

impl Packet for PingReply {
    const KIND: &'static str = "fleet.ping.PingReply";
}

pub(crate) fn register_all(registry: &mut PacketRegistry) {
    registry
        .register::<ShutdownRequest>()
        .register::<ShutdownAck>()
        .register::<PingRequest>()
        .register::<PingReply>();
}

/// Server-side shutdown handling.
///
/// On every [`ShutdownRequest`] a [`ShutdownAck`] is sent back to the
/// requester first, then `on_shutdown` runs on the blocking pool so the
/// listener returns immediately.
pub fn respond_to_shutdown<F>(dispatcher: &Arc<PacketDispatcher>, on_shutdown: F) -> ListenerId
where
    F: Fn() + Send + Sync + 'static,
{
    let weak = Arc::downgrade(dispatcher);
    let on_shutdown = Arc::new(on_shutdown);

    dispatcher.listen::<ShutdownRequest, _>(move |_, packet| {
        if let Some(dispatcher) = weak.upgrade() {
            dispatcher.send(&ShutdownAck {}, packet.sender())?;
        }
        tracing::info!(requester = %packet.sender(), "Shutdown requested");

        let on_shutdown = Arc::clone(&on_shutdown);
        tokio::task::spawn_blocking(move || on_shutdown());
        Ok(())
    })
}
