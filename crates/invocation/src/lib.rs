//! Remote invocation of capabilities by dotted path.
//!
//! Requests arrive as [`InvocationRequest`]s, are resolved against a
//! [`CapabilityRegistry`] built when the owning context is created, and run as
//! cancellable units of work by an [`InvocationDispatcher`].

use std::time::Duration;

use kikx_worker::TaskId;
use serde_json::{Map, Value};

mod dispatch;
mod error;
mod registry;
pub mod schema;

pub use dispatch::{DispatchOutcome, InvocationDispatcher};
pub use error::{InvokeError, RegistryError};
pub use registry::{Arity, BoxFuture, Call, CallArgs, Capability, CapabilityKind, CapabilityRegistry, NamespaceBuilder};
pub use schema::{InvocationConfig, InvocationRequest};

/// One accepted request, owned by the dispatcher until it finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
	pub id: TaskId,
	pub path: String,
	pub args: Vec<Value>,
	pub options: Map<String, Value>,
	/// Effective deadline after capability eligibility is applied.
	pub timeout: Option<Duration>,
}

impl Invocation {
	pub fn new(id: TaskId, request: InvocationRequest, timeout: Option<Duration>) -> Self {
		let InvocationRequest { path, config } = request;
		Self {
			id,
			path,
			args: config.args,
			options: config.options,
			timeout,
		}
	}

	/// Short description for tracing.
	pub fn describe(&self) -> String {
		let args = self.args.len();
		match self.timeout {
			Some(limit) => format!("{}({args} args, {:.3}s)", self.path, limit.as_secs_f64()),
			None => format!("{}({args} args)", self.path),
		}
	}
}
