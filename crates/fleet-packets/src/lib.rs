//! Topic-based packet bus for fleet.
//!
//! Every participant owns one [`PacketDispatcher`]. It subscribes to the
//! participant's unicast topic, the broadcast topic and each role topic on a
//! [`Transport`], decodes inbound packets through a [`PacketRegistry`] and
//! delivers them to pending [`ResponseFuture`]s and registered listeners.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use fleet_core::ParticipantId;
//! use fleet_packets::{LocalBroker, PacketDispatcher, PacketRegistry, ShutdownRequest, Transport};
//!
//! # async fn run() -> fleet_packets::Result<()> {
//! let broker: Arc<dyn Transport> = Arc::new(LocalBroker::new());
//! let registry = Arc::new(PacketRegistry::with_builtin());
//! let node = PacketDispatcher::connect(ParticipantId::node(1), broker, registry)?;
//!
//! let ack = node.request(&ShutdownRequest {}, ParticipantId::server(7), Duration::from_secs(4))?;
//! if ack.await_one().await.is_none() {
//!     println!("server-7 did not answer");
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod builtin;
pub mod bus;
pub mod dispatcher;
pub mod error;
pub mod packet;
mod recent;
pub mod registry;
pub mod response;
pub mod topic;

pub use builtin::{respond_to_shutdown, PingReply, PingRequest, ShutdownAck, ShutdownRequest};
pub use bus::{LocalBroker, SubscriptionId, TopicHandler, Transport};
pub use dispatcher::{ListenerFn, ListenerId, PacketDispatcher, Target};
pub use error::{BusError, HandlerError, PacketError, Result};
pub use packet::{Envelope, Frame, Packet, ReceivedPacket, Request};
pub use recent::LOOKBACK_WINDOW;
pub use registry::PacketRegistry;
pub use response::{ResponseFuture, ResponseState};
pub use topic::{Topic, BROADCAST_TOPIC};
