use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by invocation dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
	/// The path does not name a registered capability, or a process id is unknown.
	#[error("not found: {0}")]
	NotFound(String),

	/// The request violates the wire schema or its limits.
	#[error("invalid request: {0}")]
	InvalidRequest(String),

	/// The arguments do not fit the capability.
	#[error("invalid arguments: {0}")]
	InvalidArguments(String),

	#[error("can't re-run task that's already running")]
	AlreadyRunning,

	#[error("no active process")]
	NoActiveProcess,

	/// The invocation deadline expired; the work was asked to stop.
	#[error("invocation timed out after {0:?}")]
	Timeout(Duration),

	/// The work observed cancellation. Dispatch reports this as an outcome,
	/// not an error.
	#[error("invocation cancelled")]
	Cancelled,

	/// The invoked logic failed or panicked.
	#[error("{0}")]
	Execution(String),
}

impl InvokeError {
	/// Stable machine-readable tag used on the wire.
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::NotFound(_) => "not_found",
			Self::InvalidRequest(_) => "invalid_request",
			Self::InvalidArguments(_) => "invalid_arguments",
			Self::AlreadyRunning => "already_running",
			Self::NoActiveProcess => "no_active_process",
			Self::Timeout(_) => "timeout",
			Self::Cancelled => "cancelled",
			Self::Execution(_) => "execution",
		}
	}
}

/// Errors raised while building a [`CapabilityRegistry`](crate::CapabilityRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
	#[error("capability path `{0}` is registered twice")]
	Duplicate(String),

	#[error("invalid capability name `{0}`")]
	InvalidName(String),
}
