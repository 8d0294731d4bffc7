//! Pending replies to outbound requests.
//!
//! A [`ResponseFuture`] resolves exactly once: either with the first matching
//! reply or with nothing once its deadline passes.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::packet::{Packet, ReceivedPacket};

/// Observable state of a [`ResponseFuture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    /// Neither a reply nor the deadline has arrived.
    Pending,
    /// A matching reply was delivered.
    Resolved,
    /// The deadline passed without a reply.
    TimedOut,
}

type Slot = oneshot::Sender<Option<ReceivedPacket>>;

/// Dispatcher-side half of a pending response.
pub(crate) struct PendingResponse {
    id: u64,
    reply_kind: &'static str,
    slot: Mutex<Option<Slot>>,
    state: Mutex<ResponseState>,
}

impl PendingResponse {
    pub(crate) fn new(
        id: u64,
        reply_kind: &'static str,
    ) -> (Arc<Self>, oneshot::Receiver<Option<ReceivedPacket>>) {
        let (tx, rx) = oneshot::channel();
        let pending = Arc::new(Self {
            id,
            reply_kind,
            slot: Mutex::new(Some(tx)),
            state: Mutex::new(ResponseState::Pending),
        });
        (pending, rx)
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn matches(&self, kind: &str) -> bool {
        self.reply_kind == kind
    }

    pub(crate) fn state(&self) -> ResponseState {
        *self.state.lock()
    }

    /// Deliver a reply. Returns false if already settled.
    pub(crate) fn resolve(&self, packet: &ReceivedPacket) -> bool {
        self.settle(ResponseState::Resolved, Some(packet.clone()))
    }

    /// Settle with no reply. Returns false if already settled.
    pub(crate) fn expire(&self) -> bool {
        self.settle(ResponseState::TimedOut, None)
    }

    fn settle(&self, state: ResponseState, value: Option<ReceivedPacket>) -> bool {
        let Some(slot) = self.slot.lock().take() else {
            return false;
        };
        *self.state.lock() = state;
        // The caller may have dropped its future; the outcome stands either way.
        let _ = slot.send(value);
        true
    }
}

/// Caller-side handle to the reply of a request.
///
/// Await it with [`await_one`](Self::await_one) or hand it a callback with
/// [`on_resolve`](Self::on_resolve).
pub struct ResponseFuture<T> {
    shared: Arc<PendingResponse>,
    rx: oneshot::Receiver<Option<ReceivedPacket>>,
    deadline: Instant,
    _reply: PhantomData<fn() -> T>,
}

impl<T: Packet> ResponseFuture<T> {
    pub(crate) fn new(
        shared: Arc<PendingResponse>,
        rx: oneshot::Receiver<Option<ReceivedPacket>>,
        deadline: Instant,
    ) -> Self {
        Self {
            shared,
            rx,
            deadline,
            _reply: PhantomData,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ResponseState {
        self.shared.state()
    }

    /// The instant after which the future resolves with nothing.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the reply packet with its sender metadata.
    pub async fn await_packet(self) -> Option<ReceivedPacket> {
        self.rx.await.ok().flatten()
    }

    /// Wait for the reply. `None` means the deadline passed first.
    pub async fn await_one(self) -> Option<T> {
        self.await_packet()
            .await
            .and_then(|packet| packet.downcast::<T>().cloned())
    }

    /// Run `callback` with the outcome once it is known, without blocking.
    pub fn on_resolve<F>(self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(Option<T>) + Send + 'static,
    {
        tokio::spawn(async move { callback(self.await_one().await) })
    }
}

impl<T> std::fmt::Debug for ResponseFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("reply_kind", &self.shared.reply_kind)
            .field("state", &self.shared.state())
            .field("deadline", &self.deadline)
            .finish()
    }
}
