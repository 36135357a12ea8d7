use thiserror::Error;

/// Errors raised while building, running or controlling processes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
	/// The command line contained no command.
	#[error("command not found")]
	EmptyCommand,

	/// The command line could not be split into shell words.
	#[error("invalid command line: {0}")]
	InvalidCommandLine(String),

	/// The command template is malformed.
	#[error("invalid command template: {0}")]
	Template(String),

	/// No process is registered under this id.
	#[error("task not found: {0}")]
	NotFound(String),

	/// `run` was called on a process that has already been started.
	#[error("can't re-run task that's already running")]
	AlreadyRunning,

	/// Input was sent to a process that is not running.
	#[error("no active process")]
	NoActiveProcess,

	/// The OS refused to start the process.
	#[error("failed to spawn `{command}`: {reason}")]
	Spawn {
		/// The expanded command.
		command: String,
		/// The underlying OS error.
		reason: String,
	},

	/// Reading from or writing to the process failed.
	#[error("process I/O failed: {0}")]
	Io(String),

	/// The supervising unit of work was cancelled.
	#[error("task cancelled")]
	Cancelled,

	/// The supervising unit of work failed outside the process itself.
	#[error("{0}")]
	Execution(String),
}

impl From<std::io::Error> for ProcessError {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err.to_string())
	}
}
