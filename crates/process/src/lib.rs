//! External process supervision.
//!
//! A [`ProcessSupervisor`] expands command lines through a per-context
//! [`CommandTemplate`], runs each one as a [`ManagedProcess`] in its own process
//! group, streams or captures its output, and force-terminates the whole group
//! once the run ends, fails, or is cancelled.

mod env;
mod error;
mod process;
mod supervisor;
mod template;

pub use env::{ContextPaths, ProcessEnv, vars};
pub use error::ProcessError;
pub use process::{CapturedOutput, DEFAULT_IDLE_TIMEOUT, ExecMode, ManagedProcess, ProcessPhase, RunOutput};
pub use supervisor::{ProcessSupervisor, RunTaskOutcome};
pub use template::CommandTemplate;
