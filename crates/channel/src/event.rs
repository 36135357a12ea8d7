use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event body, either computed up front or produced lazily at delivery time.
pub enum Payload {
	Value(Value),
	/// Evaluated only when the event is actually written to a transport.
	Deferred(Box<dyn FnOnce() -> Value + Send>),
}

impl Payload {
	/// Wraps a producer that runs at delivery time.
	pub fn deferred(producer: impl FnOnce() -> Value + Send + 'static) -> Self {
		Self::Deferred(Box::new(producer))
	}

	pub fn is_deferred(&self) -> bool {
		matches!(self, Self::Deferred(_))
	}

	/// Produces the concrete value, running a deferred producer if needed.
	pub fn resolve(self) -> Value {
		match self {
			Self::Value(value) => value,
			Self::Deferred(producer) => producer(),
		}
	}
}

impl From<Value> for Payload {
	fn from(value: Value) -> Self {
		Self::Value(value)
	}
}

impl fmt::Debug for Payload {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
			Self::Deferred(_) => f.write_str("Deferred(..)"),
		}
	}
}

/// One event addressed to the remote peer.
#[derive(Debug)]
pub struct Event {
	kind: String,
	payload: Payload,
}

impl Event {
	pub fn new(kind: impl Into<String>, payload: impl Into<Payload>) -> Self {
		Self {
			kind: kind.into(),
			payload: payload.into(),
		}
	}

	pub fn kind(&self) -> &str {
		&self.kind
	}

	pub fn payload(&self) -> &Payload {
		&self.payload
	}

	/// Resolves the payload into a wire frame.
	pub fn into_frame(self) -> EventFrame {
		EventFrame {
			event: self.kind,
			payload: self.payload.resolve(),
		}
	}
}

impl From<EventFrame> for Event {
	fn from(frame: EventFrame) -> Self {
		Self::new(frame.event, frame.payload)
	}
}

/// Wire form of an event: `{"event": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
	pub event: String,
	pub payload: Value,
}
