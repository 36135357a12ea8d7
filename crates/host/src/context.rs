use std::sync::Arc;

use kikx_channel::EventChannel;
use kikx_invocation::{
	Arity, Call, Capability, CapabilityRegistry, DispatchOutcome, InvocationDispatcher, InvocationRequest, InvokeError,
};
use kikx_process::{ContextPaths, ProcessEnv, ProcessSupervisor, RunTaskOutcome};
use kikx_worker::{TaskId, TaskRegistry};
use serde_json::{Value, json};

use crate::error::invoke_error;
use crate::{HostError, HostSettings};

/// One opened application: its event channel, its processes and the
/// invocations running on its behalf.
#[derive(Debug)]
pub struct AppContext {
	id: TaskId,
	name: String,
	paths: ContextPaths,
	channel: Arc<EventChannel>,
	supervisor: Arc<ProcessSupervisor>,
	dispatcher: InvocationDispatcher,
}

impl AppContext {
	pub fn new(name: &str, settings: &HostSettings) -> Result<Self, HostError> {
		let id = TaskId::new();
		let paths = settings.context_paths(id, name);
		let channel = Arc::new(EventChannel::with_idle_timeout(format!("{name}:{id}"), settings.idle_disconnect));
		let supervisor = Arc::new(
			ProcessSupervisor::new(ProcessEnv::from_current(&paths), settings.task_template.clone(), Arc::clone(&channel))
				.with_idle_timeout(settings.process_idle_timeout),
		);
		let invocations = TaskRegistry::new("invocation");
		let capabilities = capabilities(id, name, &paths, &supervisor, &invocations)?;

		tracing::info!(context = %id, app = name, "context.open");
		Ok(Self {
			id,
			name: name.to_owned(),
			paths,
			channel,
			supervisor,
			dispatcher: InvocationDispatcher::with_task_registry(capabilities, invocations),
		})
	}

	pub fn id(&self) -> TaskId {
		self.id
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn paths(&self) -> &ContextPaths {
		&self.paths
	}

	pub fn channel(&self) -> &Arc<EventChannel> {
		&self.channel
	}

	pub fn supervisor(&self) -> &ProcessSupervisor {
		&self.supervisor
	}

	pub fn dispatcher(&self) -> &InvocationDispatcher {
		&self.dispatcher
	}

	pub async fn dispatch(&self, request: InvocationRequest) -> Result<DispatchOutcome, InvokeError> {
		self.dispatcher.dispatch(request).await
	}

	pub async fn dispatch_with_id(&self, id: TaskId, request: InvocationRequest) -> Result<DispatchOutcome, InvokeError> {
		self.dispatcher.dispatch_with_id(id, request).await
	}

	/// Cancels every invocation and process and drops the channel binding.
	pub fn close(&self) {
		let invocations = self.dispatcher.shutdown();
		let processes = self.supervisor.shutdown();
		self.channel.cancel_idle_disconnect();
		self.channel.disconnect();
		tracing::info!(context = %self.id, app = %self.name, invocations, processes, "context.close");
	}
}

fn capabilities(
	id: TaskId,
	name: &str,
	paths: &ContextPaths,
	supervisor: &Arc<ProcessSupervisor>,
	invocations: &TaskRegistry,
) -> Result<CapabilityRegistry, HostError> {
	let info = {
		let supervisor = Arc::clone(supervisor);
		let invocations = invocations.clone();
		let base = json!({
			"id": id,
			"name": name,
			"app_path": paths.app_path,
			"data_path": paths.app_data_path,
		});
		move |_: Call| -> Result<Value, InvokeError> {
			let mut info = base.clone();
			info["processes"] = json!(supervisor.len());
			info["invocations"] = json!(invocations.len());
			Ok(info)
		}
	};
	let run_task = {
		let supervisor = Arc::clone(supervisor);
		move |call: Call| run_task(Arc::clone(&supervisor), call)
	};
	let sh = {
		let supervisor = Arc::clone(supervisor);
		move |call: Call| sh(Arc::clone(&supervisor), call)
	};
	let kill = {
		let supervisor = Arc::clone(supervisor);
		move |call: Call| -> Result<Value, InvokeError> { Ok(json!(supervisor.kill(task_id(&call, 0)?))) }
	};
	let send_input = {
		let supervisor = Arc::clone(supervisor);
		move |call: Call| send_input(Arc::clone(&supervisor), call)
	};
	let list = {
		let supervisor = Arc::clone(supervisor);
		move |_: Call| -> Result<Value, InvokeError> {
			let running = supervisor
				.running()
				.into_iter()
				.filter_map(|id| supervisor.process(id))
				.map(|p| json!({ "id": p.id(), "command": p.command(), "pid": p.pid() }))
				.collect();
			Ok(Value::Array(running))
		}
	};
	let cancel = {
		let invocations = invocations.clone();
		move |call: Call| -> Result<Value, InvokeError> { Ok(json!(invocations.cancel(task_id(&call, 0)?))) }
	};

	let registry = CapabilityRegistry::builder()
		.capability("echo", Capability::sync_fn(Arity::at_least(0), |call| Ok(Value::Array(call.args.positional().to_vec()))))
		.namespace("app", |ns| ns.capability("info", Capability::sync_fn(Arity::NONE, info)))
		.namespace("tasks", |ns| {
			ns.capability("run_task", Capability::async_fn(Arity::range(1, 3), run_task))
				.capability("sh", Capability::async_fn(Arity::range(1, 2), sh))
				.capability("kill", Capability::sync_fn(Arity::exact(1), kill).without_timeout())
				.capability("send_input", Capability::async_fn(Arity::exact(2), send_input))
				.capability("list", Capability::sync_fn(Arity::NONE, list))
		})
		.namespace("funcx", |ns| ns.capability("cancel", Capability::sync_fn(Arity::exact(1), cancel).without_timeout()))
		.build()?;
	Ok(registry)
}

/// `tasks.run_task(command, reporter_id?, input?)`
async fn run_task(supervisor: Arc<ProcessSupervisor>, call: Call) -> Result<Value, InvokeError> {
	let command = call.args.str(0, "command")?;
	let reporter_id = call.args.opt_str(1, "reporter_id")?.map(str::to_owned);
	let input = call.args.string_list(2, "input")?;
	let outcome = supervisor
		.run_task_with_cancel(command, reporter_id, input, Some(&call.cancel))
		.await
		.map_err(invoke_error)?;
	match outcome {
		RunTaskOutcome::Spawned(id) => Ok(json!(id)),
		RunTaskOutcome::Finished(captured) => to_value(&captured),
	}
}

/// `tasks.sh(command, input?)`
async fn sh(supervisor: Arc<ProcessSupervisor>, call: Call) -> Result<Value, InvokeError> {
	let command = call.args.str(0, "command")?;
	let input = call.args.string_list(1, "input")?;
	let captured = supervisor.sh_with_cancel(command, input, Some(&call.cancel)).await.map_err(invoke_error)?;
	to_value(&captured)
}

/// `tasks.send_input(id, text)`
async fn send_input(supervisor: Arc<ProcessSupervisor>, call: Call) -> Result<Value, InvokeError> {
	let id = task_id(&call, 0)?;
	let text = call.args.str(1, "text")?;
	supervisor.send_input(id, text).await.map_err(invoke_error)?;
	Ok(Value::Null)
}

fn task_id(call: &Call, index: usize) -> Result<TaskId, InvokeError> {
	let raw = call.args.str(index, "id")?;
	raw.parse().map_err(|_| InvokeError::InvalidArguments(format!("`{raw}` is not a task id")))
}

fn to_value(value: &impl serde::Serialize) -> Result<Value, InvokeError> {
	serde_json::to_value(value).map_err(|e| InvokeError::Execution(e.to_string()))
}
