use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use kikx_channel::Reporter;
use kikx_worker::{CancellationToken, TaskClass, TaskId};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};

use crate::{ProcessEnv, ProcessError};

/// How long a streaming process may stay silent before it is checked on.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

const SHELL: &str = "/bin/sh";

/// Lifecycle phase of a [`ManagedProcess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPhase {
	Created,
	Started,
	Streaming,
	Batch,
	Ended,
	Killed,
}

impl ProcessPhase {
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Ended | Self::Killed)
	}
}

/// Execution mode chosen at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecMode {
	/// Forward output line by line to a reporter.
	Streaming,
	/// Feed `input` on stdin, then capture everything until exit.
	Batch { input: Vec<String> },
}

/// Output of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CapturedOutput {
	/// Decoded stdout, absent when nothing was written.
	pub stdout: Option<String>,
	/// Decoded stderr, absent when nothing was written.
	pub stderr: Option<String>,
	/// Exit code, absent when the process was ended by a signal.
	pub exit_code: Option<i32>,
}

/// Result of [`ManagedProcess::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutput {
	Streamed,
	Captured(CapturedOutput),
}

#[derive(Debug)]
struct Lifecycle {
	phase: ProcessPhase,
	pid: Option<u32>,
	exit_code: Option<i32>,
	exited: bool,
}

/// One external shell command and the state needed to tear it down.
///
/// The command runs through `sh -c` as the leader of a fresh process group so
/// [`clean`](Self::clean) can kill it together with everything it spawned.
#[derive(Debug)]
pub struct ManagedProcess {
	id: TaskId,
	command: String,
	env: Arc<ProcessEnv>,
	mode: ExecMode,
	idle_timeout: Duration,
	lifecycle: Mutex<Lifecycle>,
	stdin: tokio::sync::Mutex<Option<ChildStdin>>,
	/// Fires when the run ends or the process is cleaned; pending writes give up.
	input_closed: CancellationToken,
}

impl ManagedProcess {
	pub fn new(command: impl Into<String>, env: Arc<ProcessEnv>, mode: ExecMode) -> Self {
		Self {
			id: TaskId::new(),
			command: command.into(),
			env,
			mode,
			idle_timeout: DEFAULT_IDLE_TIMEOUT,
			lifecycle: Mutex::new(Lifecycle {
				phase: ProcessPhase::Created,
				pid: None,
				exit_code: None,
				exited: false,
			}),
			stdin: tokio::sync::Mutex::new(None),
			input_closed: CancellationToken::new(),
		}
	}

	pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
		self.idle_timeout = idle_timeout;
		self
	}

	pub fn id(&self) -> TaskId {
		self.id
	}

	pub fn command(&self) -> &str {
		&self.command
	}

	pub fn mode(&self) -> &ExecMode {
		&self.mode
	}

	pub fn phase(&self) -> ProcessPhase {
		self.lifecycle.lock().phase
	}

	/// OS process id, also the process group id, once spawned.
	pub fn pid(&self) -> Option<u32> {
		self.lifecycle.lock().pid
	}

	pub fn exit_code(&self) -> Option<i32> {
		self.lifecycle.lock().exit_code
	}

	/// Whether the process has been spawned and not yet observed to exit.
	pub fn is_running(&self) -> bool {
		let lc = self.lifecycle.lock();
		matches!(lc.phase, ProcessPhase::Started | ProcessPhase::Streaming | ProcessPhase::Batch) && !lc.exited
	}

	/// Spawns the command and drives it to completion in the configured mode.
	///
	/// Returns [`ProcessError::Cancelled`] as soon as `cancel` fires; the
	/// process keeps running until [`clean`](Self::clean) is called.
	pub async fn run(&self, reporter: &Reporter, cancel: &CancellationToken) -> Result<RunOutput, ProcessError> {
		let prior = {
			let mut lc = self.lifecycle.lock();
			let prior = lc.phase;
			if prior == ProcessPhase::Created {
				lc.phase = ProcessPhase::Started;
			}
			prior
		};
		match prior {
			ProcessPhase::Created => {}
			ProcessPhase::Killed => return Err(ProcessError::Cancelled),
			_ => {
				let err = ProcessError::AlreadyRunning;
				reporter.error(err.to_string()).await;
				return Err(err);
			}
		}

		let mut child = match self.spawn() {
			Ok(child) => child,
			Err(err) => {
				self.finish(None);
				return Err(err);
			}
		};
		self.lifecycle.lock().pid = child.id();
		tracing::debug!(task_id = %self.id, pid = ?child.id(), command = %self.command, "process.spawned");

		match &self.mode {
			ExecMode::Batch { input } => {
				self.set_phase(ProcessPhase::Batch);
				let captured = tokio::select! {
					biased;
					_ = cancel.cancelled() => return Err(ProcessError::Cancelled),
					captured = self.exchange(&mut child, input) => captured?,
				};
				Ok(RunOutput::Captured(captured))
			}
			ExecMode::Streaming => {
				self.set_phase(ProcessPhase::Streaming);
				let result = self.stream(&mut child, reporter, cancel).await;
				self.close_input();
				result.map(|()| RunOutput::Streamed)
			}
		}
	}

	/// Writes a line to the process's stdin.
	pub async fn send(&self, data: &str) -> Result<(), ProcessError> {
		if !self.is_running() {
			return Err(ProcessError::NoActiveProcess);
		}
		let mut guard = tokio::select! {
			_ = self.input_closed.cancelled() => return Err(ProcessError::NoActiveProcess),
			guard = self.stdin.lock() => guard,
		};
		let stdin = guard.as_mut().ok_or(ProcessError::NoActiveProcess)?;
		let written = tokio::select! {
			_ = self.input_closed.cancelled() => None,
			res = write_line(stdin, data) => Some(res),
		};
		match written {
			Some(res) => res.map_err(ProcessError::from),
			None => {
				guard.take();
				Err(ProcessError::NoActiveProcess)
			}
		}
	}

	/// Stops accepting input without waiting on a writer stuck on a full pipe.
	fn close_input(&self) {
		self.input_closed.cancel();
		if let Ok(mut stdin) = self.stdin.try_lock() {
			stdin.take();
		}
	}

	/// Force-kills the process group.
	///
	/// Returns whether a kill signal was delivered. A process that has not
	/// started or has already exited is left alone. Safe to call repeatedly.
	pub fn clean(&self) -> bool {
		let pid = {
			let mut lc = self.lifecycle.lock();
			match lc.phase {
				ProcessPhase::Ended | ProcessPhase::Killed => return false,
				ProcessPhase::Created => {
					lc.phase = ProcessPhase::Killed;
					return false;
				}
				_ if lc.exited => return false,
				_ => {}
			}
			lc.phase = ProcessPhase::Killed;
			lc.pid
		};
		self.close_input();
		let Some(pid) = pid else {
			return false;
		};
		let delivered = kill_group(pid);
		tracing::debug!(task_id = %self.id, pid, delivered, "process.killed");
		delivered
	}

	fn spawn(&self) -> Result<Child, ProcessError> {
		let mut cmd = Command::new(SHELL);
		cmd.arg("-c")
			.arg(&self.command)
			.env_clear()
			.envs(self.env.vars())
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(false);
		if let Some(dir) = self.env.working_dir() {
			cmd.current_dir(dir);
		}
		#[cfg(unix)]
		cmd.process_group(0);

		cmd.spawn().map_err(|e| ProcessError::Spawn {
			command: self.command.clone(),
			reason: e.to_string(),
		})
	}

	async fn exchange(&self, child: &mut Child, input: &[String]) -> Result<CapturedOutput, ProcessError> {
		let stdin = child.stdin.take();
		let payload = input.join("\n");
		let write = async move {
			let Some(mut stdin) = stdin else { return };
			if !payload.is_empty()
				&& let Err(e) = stdin.write_all(payload.as_bytes()).await
			{
				tracing::trace!(error = %e, "process.stdin_closed_early");
			}
		};

		let (_, stdout, stderr) = tokio::join!(write, read_all(child.stdout.take()), read_all(child.stderr.take()));
		let status = child.wait().await?;
		self.record_exit(status);

		let captured = CapturedOutput {
			stdout: non_empty(stdout?),
			stderr: non_empty(stderr?),
			exit_code: status.code(),
		};
		self.finish(status.code());
		Ok(captured)
	}

	async fn stream(&self, child: &mut Child, reporter: &Reporter, cancel: &CancellationToken) -> Result<(), ProcessError> {
		*self.stdin.lock().await = child.stdin.take();
		let stdout = child.stdout.take().ok_or_else(|| ProcessError::Io("stdout not captured".into()))?;
		let stderr = child
			.stderr
			.take()
			.map(|stderr| kikx_worker::spawn(TaskClass::Process, read_all(Some(stderr))));

		let mut reader = BufReader::new(stdout);
		let mut line = Vec::new();
		loop {
			let read = tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(ProcessError::Cancelled),
				read = tokio::time::timeout(self.idle_timeout, reader.read_until(b'\n', &mut line)) => read,
			};
			match read {
				Ok(Ok(0)) => {
					if !line.is_empty() {
						reporter.output(decode(std::mem::take(&mut line))).await;
					}
					break;
				}
				Ok(Ok(_)) => {
					reporter.output(decode(std::mem::take(&mut line))).await;
				}
				Ok(Err(e)) => return Err(e.into()),
				Err(_) => {
					reporter
						.info(format!(
							"Task {}: No output for {} seconds, checking process...\n",
							self.id,
							self.idle_timeout.as_secs()
						))
						.await;
					if let Some(status) = child.try_wait()? {
						self.record_exit(status);
						break;
					}
				}
			}
		}

		let status = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(ProcessError::Cancelled),
			status = child.wait() => status?,
		};
		self.record_exit(status);

		if let Some(handle) = stderr {
			let captured = tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(ProcessError::Cancelled),
				joined = handle => joined.map_err(|e| ProcessError::Execution(e.to_string()))??,
			};
			if let Some(text) = non_empty(captured) {
				reporter.error(text).await;
			}
		}

		tracing::debug!(task_id = %self.id, exit_code = ?status.code(), "process.stream_finished");
		self.finish(status.code());
		Ok(())
	}

	fn set_phase(&self, phase: ProcessPhase) {
		let mut lc = self.lifecycle.lock();
		if !lc.phase.is_terminal() {
			lc.phase = phase;
		}
	}

	fn record_exit(&self, status: ExitStatus) {
		let mut lc = self.lifecycle.lock();
		lc.exited = true;
		lc.exit_code = status.code();
	}

	fn finish(&self, exit_code: Option<i32>) {
		let mut lc = self.lifecycle.lock();
		if exit_code.is_some() {
			lc.exit_code = exit_code;
		}
		if !lc.phase.is_terminal() {
			lc.phase = ProcessPhase::Ended;
		}
	}
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> Result<Vec<u8>, ProcessError> {
	let mut buf = Vec::new();
	if let Some(mut reader) = reader {
		reader.read_to_end(&mut buf).await?;
	}
	Ok(buf)
}

fn decode(bytes: Vec<u8>) -> String {
	String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn non_empty(bytes: Vec<u8>) -> Option<String> {
	(!bytes.is_empty()).then(|| decode(bytes))
}

async fn write_line(stdin: &mut ChildStdin, data: &str) -> std::io::Result<()> {
	stdin.write_all(data.as_bytes()).await?;
	stdin.write_all(b"\n").await?;
	stdin.flush().await
}

#[cfg(unix)]
fn kill_group(pid: u32) -> bool {
	use nix::errno::Errno;
	use nix::sys::signal::{Signal, killpg};
	use nix::unistd::Pid;

	let Ok(raw) = i32::try_from(pid) else {
		return false;
	};
	match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
		Ok(()) => true,
		Err(Errno::ESRCH) => false,
		Err(e) => {
			tracing::warn!(pid, error = %e, "process.kill_failed");
			false
		}
	}
}

#[cfg(not(unix))]
fn kill_group(pid: u32) -> bool {
	tracing::warn!(pid, "process.kill_unsupported");
	false
}
