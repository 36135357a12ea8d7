use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kikx_channel::{EventChannel, Reporter};
use kikx_worker::{CancellationToken, TaskClass, TaskId, TaskRegistry, join_error_panic_message};
use parking_lot::Mutex;

use crate::process::DEFAULT_IDLE_TIMEOUT;
use crate::{CapturedOutput, CommandTemplate, ExecMode, ManagedProcess, ProcessEnv, ProcessError, RunOutput};

type Processes = Arc<Mutex<HashMap<TaskId, Arc<ManagedProcess>>>>;

/// What a call to [`ProcessSupervisor::run_task`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTaskOutcome {
	/// A streaming run was started in the background under this id.
	Spawned(TaskId),
	/// A batch run finished.
	Finished(CapturedOutput),
}

/// Owns every process started on behalf of one context.
///
/// Each run is registered under its process id until its teardown completes,
/// and teardown always kills the process group before the entry disappears.
pub struct ProcessSupervisor {
	env: Arc<ProcessEnv>,
	template: CommandTemplate,
	idle_timeout: Duration,
	channel: Arc<EventChannel>,
	processes: Processes,
	tasks: TaskRegistry,
}

impl ProcessSupervisor {
	pub fn new(env: ProcessEnv, template: CommandTemplate, channel: Arc<EventChannel>) -> Self {
		Self {
			env: Arc::new(env),
			template,
			idle_timeout: DEFAULT_IDLE_TIMEOUT,
			channel,
			processes: Arc::default(),
			tasks: TaskRegistry::new("process"),
		}
	}

	pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
		self.idle_timeout = idle_timeout;
		self
	}

	pub fn env(&self) -> &ProcessEnv {
		&self.env
	}

	pub fn template(&self) -> &CommandTemplate {
		&self.template
	}

	/// Runs a command line through the template.
	///
	/// With a `reporter_id` the process streams progress under that id and
	/// this returns as soon as it is registered. Without one, `input` is fed
	/// on stdin and this waits for the captured output.
	pub async fn run_task(&self, command_line: &str, reporter_id: Option<String>, input: Vec<String>) -> Result<RunTaskOutcome, ProcessError> {
		self.run_task_with_cancel(command_line, reporter_id, input, None).await
	}

	/// Like [`run_task`](Self::run_task), but a batch run is killed if
	/// `caller` is cancelled while it is being awaited.
	pub async fn run_task_with_cancel(
		&self,
		command_line: &str,
		reporter_id: Option<String>,
		input: Vec<String>,
		caller: Option<&CancellationToken>,
	) -> Result<RunTaskOutcome, ProcessError> {
		let command = self.template.expand(command_line)?;
		match reporter_id {
			Some(id) => {
				if !input.is_empty() {
					tracing::debug!(lines = input.len(), "process.streaming_input_ignored");
				}
				self.start(command, ExecMode::Streaming, Some(id)).map(RunTaskOutcome::Spawned)
			}
			None => self.run_batch(command, input, caller).await.map(RunTaskOutcome::Finished),
		}
	}

	/// Runs a raw shell command line and waits for its captured output.
	///
	/// The template is not applied.
	pub async fn sh(&self, command: &str, input: Vec<String>) -> Result<CapturedOutput, ProcessError> {
		self.sh_with_cancel(command, input, None).await
	}

	pub async fn sh_with_cancel(&self, command: &str, input: Vec<String>, caller: Option<&CancellationToken>) -> Result<CapturedOutput, ProcessError> {
		if command.trim().is_empty() {
			return Err(ProcessError::EmptyCommand);
		}
		self.run_batch(command.to_owned(), input, caller).await
	}

	/// Requests termination of a running process.
	///
	/// Returns `true` only for the first effective request.
	pub fn kill(&self, id: TaskId) -> bool {
		self.tasks.cancel(id)
	}

	/// Writes a line to a running process's stdin.
	pub async fn send_input(&self, id: TaskId, text: &str) -> Result<(), ProcessError> {
		let process = self.process(id).ok_or_else(|| ProcessError::NotFound(id.to_string()))?;
		process.send(text).await
	}

	/// Cancels every running process. Returns how many were signalled.
	pub fn shutdown(&self) -> usize {
		let cancelled = self.tasks.cancel_all();
		if cancelled > 0 {
			tracing::info!(cancelled, "process.shutdown");
		}
		cancelled
	}

	pub fn process(&self, id: TaskId) -> Option<Arc<ManagedProcess>> {
		self.processes.lock().get(&id).cloned()
	}

	/// Ids of registered processes.
	pub fn running(&self) -> Vec<TaskId> {
		self.processes.lock().keys().copied().collect()
	}

	pub fn len(&self) -> usize {
		self.processes.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.processes.lock().is_empty()
	}

	async fn run_batch(&self, command: String, input: Vec<String>, caller: Option<&CancellationToken>) -> Result<CapturedOutput, ProcessError> {
		let process = self.register(command, ExecMode::Batch { input });
		let id = process.id();
		let mut task = self
			.tasks
			.schedule_with_id(id, TaskClass::Process, |cancel| execute(process, Reporter::new(None, Arc::clone(&self.channel)), cancel, Arc::clone(&self.processes)))
			.map_err(|e| self.unregister(id, e.to_string()))?;

		let joined = match caller {
			Some(caller) => tokio::select! {
				joined = &mut task => joined,
				_ = caller.cancelled() => {
					self.kill(id);
					task.await
				}
			},
			None => task.await,
		};

		match joined {
			Ok(Ok(RunOutput::Captured(captured))) => Ok(captured),
			Ok(Ok(RunOutput::Streamed)) => Ok(CapturedOutput::default()),
			Ok(Err(err)) => Err(err),
			Err(err) => Err(ProcessError::Execution(join_error_panic_message(err).unwrap_or_else(|| "process task aborted".into()))),
		}
	}

	fn start(&self, command: String, mode: ExecMode, reporter_id: Option<String>) -> Result<TaskId, ProcessError> {
		let process = self.register(command, mode);
		let id = process.id();
		let reporter = Reporter::new(reporter_id, Arc::clone(&self.channel));
		self.tasks
			.schedule_with_id(id, TaskClass::Process, |cancel| execute(process, reporter, cancel, Arc::clone(&self.processes)))
			.map_err(|e| self.unregister(id, e.to_string()))?;
		Ok(id)
	}

	fn register(&self, command: String, mode: ExecMode) -> Arc<ManagedProcess> {
		let process = Arc::new(ManagedProcess::new(command, Arc::clone(&self.env), mode).with_idle_timeout(self.idle_timeout));
		self.processes.lock().insert(process.id(), Arc::clone(&process));
		process
	}

	fn unregister(&self, id: TaskId, reason: String) -> ProcessError {
		self.processes.lock().remove(&id);
		ProcessError::Execution(reason)
	}
}

impl Drop for ProcessSupervisor {
	fn drop(&mut self) {
		self.tasks.cancel_all();
	}
}

impl std::fmt::Debug for ProcessSupervisor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProcessSupervisor")
			.field("template", &self.template.as_str())
			.field("idle_timeout", &self.idle_timeout)
			.field("processes", &self.len())
			.finish()
	}
}

/// Kills the process and drops its registry entry, once.
struct Teardown {
	process: Arc<ManagedProcess>,
	processes: Processes,
	done: bool,
}

impl Teardown {
	fn run(&mut self) {
		if std::mem::replace(&mut self.done, true) {
			return;
		}
		self.process.clean();
		self.processes.lock().remove(&self.process.id());
	}
}

impl Drop for Teardown {
	fn drop(&mut self) {
		self.run();
	}
}

async fn execute(process: Arc<ManagedProcess>, reporter: Reporter, cancel: CancellationToken, processes: Processes) -> Result<RunOutput, ProcessError> {
	let id = process.id();
	let mut teardown = Teardown {
		process: Arc::clone(&process),
		processes,
		done: false,
	};

	reporter.started("Task started\n").await;
	let result = process.run(&reporter, &cancel).await;
	match &result {
		Ok(_) => tracing::debug!(task_id = %id, exit_code = ?process.exit_code(), "process.finished"),
		Err(ProcessError::Cancelled) => tracing::debug!(task_id = %id, "process.cancelled"),
		Err(ProcessError::AlreadyRunning) => {}
		Err(err) => {
			tracing::warn!(task_id = %id, error = %err, "process.failed");
			reporter.error(err.to_string()).await;
		}
	}

	teardown.run();
	reporter.ended("Task ended\n").await;
	result
}
