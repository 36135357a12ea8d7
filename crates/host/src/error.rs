use kikx_channel::ChannelError;
use kikx_invocation::{InvokeError, RegistryError};
use kikx_process::ProcessError;
use kikx_worker::TaskId;
use thiserror::Error;

/// Errors raised while managing contexts and connections.
#[derive(Debug, Error)]
pub enum HostError {
	#[error("invalid app name `{0}`")]
	InvalidApp(String),

	#[error("context not found: {0}")]
	ContextNotFound(TaskId),

	#[error("connection is already bound to context {0}")]
	AlreadyBound(TaskId),

	#[error("connection is not attached to a context")]
	NotAttached,

	#[error("invalid frame: {0}")]
	InvalidFrame(String),

	#[error(transparent)]
	Channel(#[from] ChannelError),

	#[error(transparent)]
	Process(#[from] ProcessError),

	#[error(transparent)]
	Registry(#[from] RegistryError),

	#[error(transparent)]
	Config(#[from] kikx_config::ConfigError),
}

impl HostError {
	/// Stable machine-readable tag used on the wire.
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::InvalidApp(_) => "invalid_app",
			Self::ContextNotFound(_) => "not_found",
			Self::AlreadyBound(_) => "already_bound",
			Self::NotAttached => "not_attached",
			Self::InvalidFrame(_) => "invalid_frame",
			Self::Channel(ChannelError::AlreadyConnected) => "already_connected",
			Self::Process(_) => "process",
			Self::Registry(_) => "registry",
			Self::Config(_) => "config",
		}
	}
}

/// Maps a process failure onto the invocation error taxonomy.
pub(crate) fn invoke_error(err: ProcessError) -> InvokeError {
	match err {
		ProcessError::NotFound(id) => InvokeError::NotFound(id),
		ProcessError::AlreadyRunning => InvokeError::AlreadyRunning,
		ProcessError::NoActiveProcess => InvokeError::NoActiveProcess,
		ProcessError::Cancelled => InvokeError::Cancelled,
		ProcessError::EmptyCommand | ProcessError::InvalidCommandLine(_) | ProcessError::Template(_) => {
			InvokeError::InvalidArguments(err.to_string())
		}
		ProcessError::Spawn { .. } | ProcessError::Io(_) | ProcessError::Execution(_) => InvokeError::Execution(err.to_string()),
	}
}
