//! Newline-delimited JSON frames exchanged over the IPC socket.

use kikx_channel::EventFrame;
use kikx_invocation::{InvocationConfig, InvokeError};
use kikx_worker::TaskId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::HostError;

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
	/// Opens a new context for an application and binds this connection to it.
	Open { app: String },
	/// Rebinds this connection to an existing context.
	Attach { context: TaskId },
	/// Invokes a capability of the bound context.
	Call {
		id: u64,
		path: String,
		#[serde(default)]
		config: InvocationConfig,
		/// Invocation id to use, so `funcx.cancel` can target this call.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		invocation: Option<TaskId>,
	},
}

/// Frames sent by the server in reply to client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
	Opened { context: TaskId },
	Result { id: u64, value: Value },
	Cancelled { id: u64 },
	/// `id` is absent for failures not tied to a call.
	Error { id: Option<u64>, error: WireError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
	pub kind: String,
	pub message: String,
}

impl From<&InvokeError> for WireError {
	fn from(err: &InvokeError) -> Self {
		Self {
			kind: err.kind().to_owned(),
			message: err.to_string(),
		}
	}
}

impl From<&HostError> for WireError {
	fn from(err: &HostError) -> Self {
		Self {
			kind: err.kind().to_owned(),
			message: err.to_string(),
		}
	}
}

/// Anything written to a connection: replies and channel events share the
/// stream, told apart by their keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
	Reply(ServerFrame),
	Event(EventFrame),
}
