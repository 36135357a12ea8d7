use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{EventFrame, TransportError};

/// Concrete wire toward one remote peer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
	/// Whether the peer is currently reachable through this transport.
	fn is_alive(&self) -> bool;

	/// Writes one frame.
	async fn send(&self, frame: &EventFrame) -> Result<(), TransportError>;
}

/// Transport backed by an unbounded in-process channel.
///
/// The receiving half is typically pumped into a socket writer. The transport
/// dies when [`SinkTransport::close`] is called or the receiver is dropped.
#[derive(Debug)]
pub struct SinkTransport {
	tx: mpsc::UnboundedSender<EventFrame>,
	closed: AtomicBool,
}

impl SinkTransport {
	pub fn new() -> (Self, mpsc::UnboundedReceiver<EventFrame>) {
		let (tx, rx) = mpsc::unbounded_channel();
		(
			Self {
				tx,
				closed: AtomicBool::new(false),
			},
			rx,
		)
	}

	/// Marks the transport dead. Frames already handed over stay readable.
	pub fn close(&self) {
		self.closed.store(true, Ordering::Release);
	}
}

#[async_trait]
impl Transport for SinkTransport {
	fn is_alive(&self) -> bool {
		!self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
	}

	async fn send(&self, frame: &EventFrame) -> Result<(), TransportError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(TransportError::Closed);
		}
		self.tx.send(frame.clone()).map_err(|_| TransportError::Closed)
	}
}
