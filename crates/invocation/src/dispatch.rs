use std::sync::Arc;

use kikx_worker::{TaskClass, TaskId, TaskRegistry, join_error_panic_message};
use serde_json::Value;

use crate::registry::{Call, CallArgs};
use crate::schema::{DEFAULT_LIMITS, InvocationLimits};
use crate::{CapabilityRegistry, Invocation, InvocationRequest, InvokeError};

/// How a dispatched invocation ended, when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
	Completed(Value),
	/// The invocation was cancelled before it produced a result.
	Cancelled,
}

/// Resolves requests against a capability graph and runs each one as a
/// cancellable unit of work.
#[derive(Debug, Clone)]
pub struct InvocationDispatcher {
	capabilities: Arc<CapabilityRegistry>,
	limits: InvocationLimits,
	tasks: TaskRegistry,
}

impl InvocationDispatcher {
	pub fn new(capabilities: CapabilityRegistry) -> Self {
		Self::with_task_registry(capabilities, TaskRegistry::new("invocation"))
	}

	/// Uses an existing registry for in-flight invocations, so capabilities
	/// built before the dispatcher can cancel invocations through it.
	pub fn with_task_registry(capabilities: CapabilityRegistry, tasks: TaskRegistry) -> Self {
		Self {
			capabilities: Arc::new(capabilities),
			limits: DEFAULT_LIMITS,
			tasks,
		}
	}

	pub fn with_limits(mut self, limits: InvocationLimits) -> Self {
		self.limits = limits;
		self
	}

	pub fn capabilities(&self) -> &CapabilityRegistry {
		&self.capabilities
	}

	/// Dispatches under a fresh invocation id.
	pub async fn dispatch(&self, request: InvocationRequest) -> Result<DispatchOutcome, InvokeError> {
		self.dispatch_with_id(TaskId::new(), request).await
	}

	/// Dispatches under a caller-chosen id, so the caller can cancel it later.
	///
	/// With a timeout, this returns [`InvokeError::Timeout`] as soon as the
	/// deadline passes; the work itself is cancelled and finishes on its own.
	pub async fn dispatch_with_id(&self, id: TaskId, request: InvocationRequest) -> Result<DispatchOutcome, InvokeError> {
		request.validate(&self.limits)?;
		let capability = self.capabilities.resolve(&request.path)?.clone();
		let arity = capability.arity();
		if !arity.accepts(request.config.args.len()) {
			return Err(InvokeError::InvalidArguments(format!(
				"{} expects {arity} args, got {}",
				request.path,
				request.config.args.len()
			)));
		}

		let timeout = request.config.timeout().filter(|_| capability.is_timeout_eligible());
		let invocation = Invocation::new(id, request, timeout);
		tracing::debug!(task_id = %id, invocation = %invocation.describe(), "invocation.dispatch");

		let Invocation { path, args, options, .. } = invocation;
		let mut task = self
			.tasks
			.schedule_with_id(id, TaskClass::Invocation, move |cancel| {
				capability.invoke(Call {
					id,
					path,
					args: CallArgs::new(args, options),
					cancel,
				})
			})
			.map_err(|e| InvokeError::InvalidRequest(e.to_string()))?;
		let token = task.token().clone();

		let joined = match timeout {
			Some(limit) => match tokio::time::timeout(limit, &mut task).await {
				Ok(joined) => joined,
				Err(_) => {
					token.cancel();
					tracing::info!(task_id = %id, timeout = ?limit, "invocation.timeout");
					return Err(InvokeError::Timeout(limit));
				}
			},
			None => task.await,
		};

		match joined {
			Ok(Err(InvokeError::Cancelled)) => Ok(DispatchOutcome::Cancelled),
			Ok(_) if token.is_cancelled() => {
				tracing::debug!(task_id = %id, "invocation.result_discarded");
				Ok(DispatchOutcome::Cancelled)
			}
			Ok(Ok(value)) => Ok(DispatchOutcome::Completed(value)),
			Ok(Err(err)) => Err(err),
			Err(err) if err.is_cancelled() => Ok(DispatchOutcome::Cancelled),
			Err(err) => {
				let message = join_error_panic_message(err).unwrap_or_else(|| "invocation panicked".into());
				tracing::warn!(task_id = %id, error = %message, "invocation.panicked");
				Err(InvokeError::Execution(message))
			}
		}
	}

	/// Requests cancellation of one in-flight invocation.
	pub fn cancel(&self, id: TaskId) -> bool {
		self.tasks.cancel(id)
	}

	/// Cancels every in-flight invocation without waiting for them.
	pub fn shutdown(&self) -> usize {
		self.tasks.cancel_all()
	}

	pub fn in_flight(&self) -> usize {
		self.tasks.len()
	}

	pub fn in_flight_ids(&self) -> Vec<TaskId> {
		self.tasks.ids()
	}
}
