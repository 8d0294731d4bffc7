//! The packet dispatcher: one per participant.
//!
//! Inbound messages are decoded, filtered for local echo, recorded in the
//! lookback cache and then delivered in two passes: first to pending
//! responses whose reply kind matches, then to every listener of the kind in
//! registration order. Both passes work on a snapshot, so callbacks may freely
//! register or remove listeners and start new requests.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use fleet_core::{ParticipantId, ServiceRole};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use crate::builtin::{PingReply, PingRequest};
use crate::bus::{SubscriptionId, TopicHandler, Transport};
use crate::error::{HandlerError, PacketError, Result};
use crate::packet::{self, Envelope, Packet, ReceivedPacket, Request};
use crate::recent::{RecentPackets, LOOKBACK_WINDOW};
use crate::registry::PacketRegistry;
use crate::response::{PendingResponse, ResponseFuture};
use crate::topic::Topic;

/// Callback registered with [`PacketDispatcher::listen`].
pub type ListenerFn =
    Arc<dyn Fn(&ReceivedPacket) -> std::result::Result<(), HandlerError> + Send + Sync>;

/// Handle returned by [`PacketDispatcher::listen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Where a packet is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The unicast topics of specific participants.
    Participants(Vec<ParticipantId>),
    /// Every participant of the given roles.
    Roles(Vec<ServiceRole>),
    /// Everyone.
    Broadcast,
}

impl Target {
    fn topics(&self) -> Vec<Topic> {
        match self {
            Self::Participants(ids) => ids.iter().copied().map(Topic::Unicast).collect(),
            Self::Roles(roles) => roles.iter().copied().map(Topic::Role).collect(),
            Self::Broadcast => vec![Topic::Broadcast],
        }
    }
}

impl From<ParticipantId> for Target {
    fn from(id: ParticipantId) -> Self {
        Self::Participants(vec![id])
    }
}

impl From<ServiceRole> for Target {
    fn from(role: ServiceRole) -> Self {
        Self::Roles(vec![role])
    }
}

struct Listener {
    id: ListenerId,
    kind: &'static str,
    handler: ListenerFn,
}

/// Routes packets between the transport and local callbacks.
pub struct PacketDispatcher {
    local_id: ParticipantId,
    transport: Arc<dyn Transport>,
    registry: Arc<PacketRegistry>,
    listeners: RwLock<Vec<Listener>>,
    pending: Mutex<Vec<Arc<PendingResponse>>>,
    recent: RecentPackets,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    next_id: AtomicU64,
}

impl PacketDispatcher {
    /// Subscribe `local_id` to its unicast topic, the broadcast topic and every
    /// role topic, and start answering pings.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport refuses a subscription.
    pub fn connect(
        local_id: ParticipantId,
        transport: Arc<dyn Transport>,
        registry: Arc<PacketRegistry>,
    ) -> Result<Arc<Self>> {
        let dispatcher = Arc::new(Self {
            local_id,
            transport,
            registry,
            listeners: RwLock::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            recent: RecentPackets::new(LOOKBACK_WINDOW),
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        });

        for topic in Topic::subscriptions_for(&local_id) {
            let weak = Arc::downgrade(&dispatcher);
            let handler: TopicHandler = Arc::new(move |bytes: &[u8]| {
                if let Some(dispatcher) = weak.upgrade() {
                    dispatcher.handle_inbound(bytes);
                }
            });

            match dispatcher.transport.subscribe(&topic, handler) {
                Ok(id) => dispatcher.subscriptions.lock().push(id),
                Err(e) => {
                    dispatcher.disconnect();
                    return Err(e.into());
                }
            }
        }

        if dispatcher.registry.is_registered(PingRequest::KIND) {
            dispatcher.install_ping_responder();
        }

        tracing::debug!(participant = %local_id, "Packet dispatcher connected");
        Ok(dispatcher)
    }

    /// The identity this dispatcher publishes as.
    #[must_use]
    pub const fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    /// The registry used to decode inbound packets.
    #[must_use]
    pub fn registry(&self) -> &PacketRegistry {
        &self.registry
    }

    /// Drop every topic subscription. Pending responses still time out.
    pub fn disconnect(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for id in subscriptions {
            self.transport.unsubscribe(id);
        }
    }

    /// Register a listener for packets of kind `T`.
    ///
    /// Listeners run on the transport's delivery task and should hand long
    /// work off to a spawned task.
    pub fn listen<T, F>(&self, handler: F) -> ListenerId
    where
        T: Packet,
        F: Fn(&T, &ReceivedPacket) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: ListenerFn = Arc::new(move |packet: &ReceivedPacket| match packet.downcast::<T>() {
            Some(body) => handler(body, packet),
            None => Ok(()),
        });

        self.listeners.write().push(Listener {
            id,
            kind: T::KIND,
            handler,
        });
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unlisten(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// Publish a packet.
    ///
    /// # Errors
    ///
    /// Returns `PacketError::Unregistered` if the kind was never registered,
    /// or a transport error if publishing fails.
    pub fn send<T: Packet>(&self, packet: &T, target: impl Into<Target>) -> Result<()> {
        self.publish(packet, &target.into())
    }

    /// Publish a request and return a future for its reply.
    ///
    /// The future is registered before the request leaves, so a reply can
    /// never outrun it. It resolves with nothing once `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns an error if the request or reply kind is unregistered or the
    /// publish fails; no pending response is left behind in either case.
    pub fn request<R: Request>(
        self: &Arc<Self>,
        packet: &R,
        target: impl Into<Target>,
        timeout: Duration,
    ) -> Result<ResponseFuture<R::Reply>> {
        let reply_kind = <R::Reply as Packet>::KIND;
        if !self.registry.is_registered(reply_kind) {
            return Err(PacketError::Unregistered(reply_kind.to_string()));
        }

        let deadline = Instant::now() + timeout;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (pending, rx) = PendingResponse::new(id, reply_kind);
        self.pending.lock().push(Arc::clone(&pending));

        if let Err(e) = self.publish(packet, &target.into()) {
            self.remove_pending(id);
            return Err(e);
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let timer = Arc::clone(&pending);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if timer.expire() {
                tracing::trace!(reply_kind, "Response timed out");
            }
            if let Some(dispatcher) = weak.upgrade() {
                dispatcher.remove_pending(timer.id());
            }
        });

        Ok(ResponseFuture::new(pending, rx, deadline))
    }

    /// Ping a participant. Returns the round trip, or `None` on timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the ping cannot be published.
    pub async fn ping(
        self: &Arc<Self>,
        target: ParticipantId,
        timeout: Duration,
    ) -> Result<Option<Duration>> {
        let started = Instant::now();
        let reply = self.request(&PingRequest {}, target, timeout)?;
        Ok(reply.await_one().await.map(|_| started.elapsed()))
    }

    /// Packets of `kind` received within the lookback window, oldest first.
    #[must_use]
    pub fn recent(&self, kind: &str) -> Vec<ReceivedPacket> {
        self.recent.of_kind(kind)
    }

    /// Number of responses still waiting for a reply or their deadline.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn publish<T: Packet>(&self, packet: &T, target: &Target) -> Result<()> {
        if !self.registry.is_registered(T::KIND) {
            return Err(PacketError::Unregistered(T::KIND.to_string()));
        }

        let bytes = packet::encode(packet, self.local_id)?;
        for topic in target.topics() {
            self.transport.publish(&topic, &bytes)?;
        }
        tracing::trace!(kind = T::KIND, ?target, "Published packet");
        Ok(())
    }

    fn remove_pending(&self, id: u64) {
        self.pending.lock().retain(|p| p.id() != id);
    }

    fn install_ping_responder(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.listen::<PingRequest, _>(move |_, packet| {
            if let Some(dispatcher) = weak.upgrade() {
                dispatcher.send(&PingReply {}, packet.sender())?;
            }
            Ok(())
        });
    }

    fn handle_inbound(&self, bytes: &[u8]) {
        let envelope = match Envelope::from_bytes(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed message");
                return;
            }
        };

        let packet = match self.registry.decode(&envelope) {
            Some(Ok(packet)) => packet,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Dropping undecodable packet");
                return;
            }
            None => {
                tracing::trace!(kind = %envelope.kind, "Dropping unregistered packet kind");
                return;
            }
        };

        if packet.sender() == self.local_id && !packet.allow_local_receiver() {
            return;
        }

        self.recent.push(packet.clone());

        let matched: Vec<Arc<PendingResponse>> = {
            let mut pending = self.pending.lock();
            let (matched, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut *pending)
                .into_iter()
                .partition(|p| p.matches(packet.kind()));
            *pending = rest;
            matched
        };
        for pending in matched {
            guarded(packet.kind(), "response", || {
                pending.resolve(&packet);
                Ok(())
            });
        }

        let listeners: Vec<ListenerFn> = self
            .listeners
            .read()
            .iter()
            .filter(|l| l.kind == packet.kind())
            .map(|l| Arc::clone(&l.handler))
            .collect();
        for handler in listeners {
            guarded(packet.kind(), "listener", || handler(&packet));
        }
    }
}

impl Drop for PacketDispatcher {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Run a callback, logging its error or panic instead of propagating it.
fn guarded<F>(kind: &str, what: &str, callback: F)
where
    F: FnOnce() -> std::result::Result<(), HandlerError>,
{
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(kind, what, error = %e, "Packet callback failed"),
        Err(_) => tracing::error!(kind, what, "Packet callback panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{ShutdownAck, ShutdownRequest};
    use crate::bus::LocalBroker;
    use crate::error::BusError;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
        echo: bool,
    }

    impl Packet for Note {
        const KIND: &'static str = "test.Note";

        fn allow_local_receiver(&self) -> bool {
            self.echo
        }
    }

    fn registry() -> Arc<PacketRegistry> {
        let mut registry = PacketRegistry::with_builtin();
        registry.register::<Note>();
        Arc::new(registry)
    }

    fn connect(broker: &Arc<LocalBroker>, id: ParticipantId) -> Arc<PacketDispatcher> {
        let transport: Arc<dyn Transport> = Arc::clone(broker) as Arc<dyn Transport>;
        PacketDispatcher::connect(id, transport, registry()).unwrap()
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn note(text: &str) -> Note {
        Note {
            text: text.to_string(),
            echo: false,
        }
    }

    #[tokio::test]
    async fn unicast_reaches_only_target() {
        let broker = Arc::new(LocalBroker::new());
        let node = connect(&broker, ParticipantId::node(1));
        let a = connect(&broker, ParticipantId::server(1));
        let b = connect(&broker, ParticipantId::server(2));

        let hits_a = Arc::new(AtomicUsize::new(0));
        let hits_b = Arc::new(AtomicUsize::new(0));
        let ha = Arc::clone(&hits_a);
        let hb = Arc::clone(&hits_b);
        a.listen::<Note, _>(move |_, _| {
            ha.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        b.listen::<Note, _>(move |_, _| {
            hb.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        node.send(&note("hi"), ParticipantId::server(1)).unwrap();
        settle().await;

        assert_eq!(hits_a.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn role_multicast_reaches_every_member() {
        let broker = Arc::new(LocalBroker::new());
        let node = connect(&broker, ParticipantId::node(1));
        let servers: Vec<_> = (1..=3)
            .map(|i| connect(&broker, ParticipantId::server(i)))
            .collect();

        let hits = Arc::new(AtomicUsize::new(0));
        for server in &servers {
            let hits = Arc::clone(&hits);
            server.listen::<Note, _>(move |_, _| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        node.send(&note("all"), ServiceRole::Server).unwrap();
        settle().await;

        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn local_echo_is_suppressed_unless_allowed() {
        let broker = Arc::new(LocalBroker::new());
        let node = connect(&broker, ParticipantId::node(1));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        node.listen::<Note, _>(move |note, _| {
            sink.lock().push(note.text.clone());
            Ok(())
        });

        node.send(&note("muted"), Target::Broadcast).unwrap();
        node.send(
            &Note {
                text: "echoed".to_string(),
                echo: true,
            },
            Target::Broadcast,
        )
        .unwrap();
        settle().await;

        assert_eq!(*seen.lock(), vec!["echoed".to_string()]);
    }

    #[tokio::test]
    async fn unregistered_kind_is_rejected_on_send() {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Unknown {}
        impl Packet for Unknown {
            const KIND: &'static str = "test.Unknown";
        }

        let broker = Arc::new(LocalBroker::new());
        let node = connect(&broker, ParticipantId::node(1));

        assert!(matches!(
            node.send(&Unknown {}, Target::Broadcast),
            Err(PacketError::Unregistered(kind)) if kind == "test.Unknown"
        ));
    }

    #[tokio::test]
    async fn unregistered_kind_is_dropped_on_receive() {
        let broker = Arc::new(LocalBroker::new());
        let sender = connect(&broker, ParticipantId::proxy(1));

        // Receiver without the Note kind
        let transport: Arc<dyn Transport> = Arc::clone(&broker) as Arc<dyn Transport>;
        let receiver = PacketDispatcher::connect(
            ParticipantId::node(1),
            transport,
            Arc::new(PacketRegistry::with_builtin()),
        )
        .unwrap();

        sender.send(&note("ignored"), ParticipantId::node(1)).unwrap();
        settle().await;

        assert!(receiver.recent(Note::KIND).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out_without_reply() {
        let broker = Arc::new(LocalBroker::new());
        let node = connect(&broker, ParticipantId::node(1));

        let started = Instant::now();
        let reply = node
            .request(&ShutdownRequest {}, ParticipantId::server(7), Duration::from_secs(4))
            .unwrap();
        assert_eq!(node.pending_count(), 1);

        assert!(reply.await_one().await.is_none());
        assert!(started.elapsed() >= Duration::from_secs(4));
        settle().await;
        assert_eq!(node.pending_count(), 0);
    }

    #[tokio::test]
    async fn request_resolves_with_reply() {
        let broker = Arc::new(LocalBroker::new());
        let node = connect(&broker, ParticipantId::node(1));
        let server = connect(&broker, ParticipantId::server(7));

        let stopping = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&stopping);
        crate::builtin::respond_to_shutdown(&server, move || {
            flag.fetch_add(1, Ordering::SeqCst);
        });

        let reply = node
            .request(&ShutdownRequest {}, ParticipantId::server(7), Duration::from_secs(4))
            .unwrap();
        let packet = reply.await_packet().await.unwrap();
        assert!(packet.is::<ShutdownAck>());
        assert_eq!(packet.sender(), ParticipantId::server(7));
        assert_eq!(node.pending_count(), 0);
    }

    #[tokio::test]
    async fn reply_resolves_every_pending_future_of_the_kind() {
        let broker = Arc::new(LocalBroker::new());
        let node = connect(&broker, ParticipantId::node(1));
        let server = connect(&broker, ParticipantId::server(7));

        let first = node
            .request(&ShutdownRequest {}, ParticipantId::server(8), Duration::from_secs(4))
            .unwrap();
        let second = node
            .request(&ShutdownRequest {}, ParticipantId::server(9), Duration::from_secs(4))
            .unwrap();

        server.send(&ShutdownAck {}, ParticipantId::node(1)).unwrap();

        assert!(first.await_one().await.is_some());
        assert!(second.await_one().await.is_some());
    }

    #[tokio::test]
    async fn failing_listener_does_not_stop_later_ones() {
        let broker = Arc::new(LocalBroker::new());
        let node = connect(&broker, ParticipantId::node(1));
        let proxy = connect(&broker, ParticipantId::proxy(1));

        let calls = Arc::new(Mutex::new(Vec::new()));
        let c1 = Arc::clone(&calls);
        let c2 = Arc::clone(&calls);
        let c3 = Arc::clone(&calls);
        node.listen::<Note, _>(move |_, _| {
            c1.lock().push(1);
            Err(HandlerError::new("boom"))
        });
        node.listen::<Note, _>(move |_, _| {
            c2.lock().push(2);
            panic!("listener panic");
        });
        node.listen::<Note, _>(move |_, _| {
            c3.lock().push(3);
            Ok(())
        });

        proxy.send(&note("x"), ParticipantId::node(1)).unwrap();
        settle().await;

        assert_eq!(*calls.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn listener_may_unlisten_during_dispatch() {
        let broker = Arc::new(LocalBroker::new());
        let node = connect(&broker, ParticipantId::node(1));
        let proxy = connect(&broker, ParticipantId::proxy(1));

        let hits = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let weak = Arc::downgrade(&node);
        let own_id = Arc::clone(&slot);
        let counter = Arc::clone(&hits);
        let id = node.listen::<Note, _>(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let (Some(dispatcher), Some(id)) = (weak.upgrade(), *own_id.lock()) {
                dispatcher.unlisten(id);
            }
            Ok(())
        });
        *slot.lock() = Some(id);

        proxy.send(&note("one"), ParticipantId::node(1)).unwrap();
        settle().await;
        proxy.send(&note("two"), ParticipantId::node(1)).unwrap();
        settle().await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recent_packets_are_kept_for_late_listeners() {
        let broker = Arc::new(LocalBroker::new());
        let node = connect(&broker, ParticipantId::node(1));
        let proxy = connect(&broker, ParticipantId::proxy(1));

        proxy.send(&note("early"), ParticipantId::node(1)).unwrap();
        settle().await;

        let recent = node.recent(Note::KIND);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].downcast::<Note>().unwrap().text, "early");
    }

    #[tokio::test]
    async fn ping_round_trips() {
        let broker = Arc::new(LocalBroker::new());
        let node = connect(&broker, ParticipantId::node(1));
        let _server = connect(&broker, ParticipantId::server(3));

        let rtt = node
            .ping(ParticipantId::server(3), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(rtt.is_some());
    }

    #[tokio::test]
    async fn unreachable_transport_fails_send_and_leaves_no_pending() {
        let broker = Arc::new(LocalBroker::new());
        let node = connect(&broker, ParticipantId::node(1));
        broker.set_reachable(false);

        assert!(matches!(
            node.send(&note("x"), Target::Broadcast),
            Err(PacketError::Transport(BusError::Unreachable(_)))
        ));
        assert!(node
            .request(&ShutdownRequest {}, ParticipantId::server(1), Duration::from_secs(1))
            .is_err());
        assert_eq!(node.pending_count(), 0);
    }

    #[tokio::test]
    async fn connect_fails_when_unreachable() {
        let broker = Arc::new(LocalBroker::new());
        broker.set_reachable(false);
        let transport: Arc<dyn Transport> = Arc::clone(&broker) as Arc<dyn Transport>;

        assert!(PacketDispatcher::connect(ParticipantId::node(1), transport, registry()).is_err());
    }
}
