/// Execution classes used for task scheduling and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// A remote invocation scheduled by a dispatcher.
	Invocation,
	/// Supervision of one external OS process.
	Process,
	/// Deferred timer callbacks (idle disconnects and similar).
	Timer,
	/// Per-connection I/O pumps.
	Connection,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Invocation => "invocation",
			Self::Process => "process",
			Self::Timer => "timer",
			Self::Connection => "connection",
		}
	}
}
