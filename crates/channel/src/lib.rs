//! Resilient event delivery toward a remote peer.
//!
//! * [`EventChannel`]: one logical connection that queues events while the peer
//!   is unreachable and replays them in order on reconnect
//! * [`Transport`]: the seam to the concrete wire (socket, websocket, test sink)
//! * [`Reporter`]: per-invocation façade tagging progress events with an id
//!   and a [`Status`]

mod channel;
mod error;
mod event;
mod reporter;
mod transport;

pub use channel::{DEFAULT_IDLE_DISCONNECT, EventChannel};
pub use error::{ChannelError, TransportError};
pub use event::{Event, EventFrame, Payload};
pub use reporter::{HANDLER_DATA, HandlerData, HandlerDataBody, Reporter, Status};
pub use transport::{SinkTransport, Transport};
