use thiserror::Error;

/// Errors raised by [`crate::EventChannel`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
	/// A live transport is already bound; the old one must be observed
	/// disconnected before a new one can take its place.
	#[error("channel is already connected to a live transport")]
	AlreadyConnected,
}

/// Delivery failure reported by a [`crate::Transport`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
	/// The transport has been closed by either side.
	#[error("transport closed")]
	Closed,
	/// The transport is up but refused this frame.
	#[error("transport rejected frame: {0}")]
	Rejected(String),
}
