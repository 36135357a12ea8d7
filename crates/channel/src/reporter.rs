use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::EventChannel;

/// Event kind carrying per-invocation progress.
pub const HANDLER_DATA: &str = "handler-data";

/// Lifecycle tag attached to every progress message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
	Started,
	Info,
	Output,
	Error,
	Ended,
}

impl Status {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Started => "started",
			Self::Info => "info",
			Self::Output => "output",
			Self::Error => "error",
			Self::Ended => "ended",
		}
	}
}

impl fmt::Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Decoded `handler-data` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerData {
	pub id: String,
	pub data: HandlerDataBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerDataBody {
	pub status: Status,
	pub output: Value,
}

/// Per-invocation progress façade over an [`EventChannel`].
///
/// A reporter without an id is silent: callers that want a synchronous
/// result instead of a stream get one without any event traffic.
#[derive(Clone)]
pub struct Reporter {
	id: Option<String>,
	channel: Arc<EventChannel>,
}

impl Reporter {
	pub fn new(id: Option<String>, channel: Arc<EventChannel>) -> Self {
		Self { id, channel }
	}

	pub fn id(&self) -> Option<&str> {
		self.id.as_deref()
	}

	pub fn is_silent(&self) -> bool {
		self.id.is_none()
	}

	/// Sends one tagged message. Delivery problems never reach the caller.
	pub async fn send(&self, status: Status, output: impl Into<Value>) {
		let Some(id) = &self.id else {
			return;
		};
		let payload = json!({
			"id": id,
			"data": {
				"status": status,
				"output": output.into(),
			},
		});
		self.channel.send(HANDLER_DATA, payload).await;
	}

	pub async fn started(&self, message: impl Into<Value>) {
		self.send(Status::Started, message).await;
	}

	pub async fn info(&self, message: impl Into<Value>) {
		self.send(Status::Info, message).await;
	}

	pub async fn output(&self, message: impl Into<Value>) {
		self.send(Status::Output, message).await;
	}

	pub async fn error(&self, message: impl Into<Value>) {
		self.send(Status::Error, message).await;
	}

	pub async fn ended(&self, message: impl Into<Value>) {
		self.send(Status::Ended, message).await;
	}
}

impl fmt::Debug for Reporter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Reporter").field("id", &self.id).field("channel", &self.channel.label()).finish()
	}
}
