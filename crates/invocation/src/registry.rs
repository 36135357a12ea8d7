//! Capability graph: dotted paths resolved to typed invokable descriptors.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use kikx_worker::{CancellationToken, TaskId};
use serde_json::{Map, Value};

use crate::{InvokeError, RegistryError};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type SyncHandler = dyn Fn(Call) -> Result<Value, InvokeError> + Send + Sync;
type AsyncHandler = dyn Fn(Call) -> BoxFuture<Result<Value, InvokeError>> + Send + Sync;

/// Whether a capability completes inline or suspends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
	Sync,
	Async,
}

/// Accepted positional argument counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
	pub min: usize,
	pub max: Option<usize>,
}

impl Arity {
	pub const NONE: Self = Self::exact(0);

	pub const fn exact(n: usize) -> Self {
		Self { min: n, max: Some(n) }
	}

	pub const fn range(min: usize, max: usize) -> Self {
		Self { min, max: Some(max) }
	}

	pub const fn at_least(min: usize) -> Self {
		Self { min, max: None }
	}

	pub fn accepts(&self, count: usize) -> bool {
		count >= self.min && self.max.is_none_or(|max| count <= max)
	}
}

impl fmt::Display for Arity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.max {
			Some(max) if max == self.min => write!(f, "{max}"),
			Some(max) => write!(f, "{}..={max}", self.min),
			None => write!(f, "{}..", self.min),
		}
	}
}

/// Arguments of one call: positional values plus named options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
	args: Vec<Value>,
	options: Map<String, Value>,
}

impl CallArgs {
	pub fn new(args: Vec<Value>, options: Map<String, Value>) -> Self {
		Self { args, options }
	}

	pub fn len(&self) -> usize {
		self.args.len()
	}

	pub fn is_empty(&self) -> bool {
		self.args.is_empty()
	}

	pub fn positional(&self) -> &[Value] {
		&self.args
	}

	pub fn options(&self) -> &Map<String, Value> {
		&self.options
	}

	/// Argument at `index`, falling back to the option called `name`.
	/// JSON `null` counts as absent.
	pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
		let present = |v: &&Value| !v.is_null();
		self.args
			.get(index)
			.filter(present)
			.or_else(|| self.options.get(name).filter(present))
	}

	pub fn str(&self, index: usize, name: &str) -> Result<&str, InvokeError> {
		self.opt_str(index, name)?
			.ok_or_else(|| InvokeError::InvalidArguments(format!("missing `{name}`")))
	}

	pub fn opt_str(&self, index: usize, name: &str) -> Result<Option<&str>, InvokeError> {
		match self.get(index, name) {
			None => Ok(None),
			Some(Value::String(s)) => Ok(Some(s)),
			Some(other) => Err(InvokeError::InvalidArguments(format!("`{name}` must be a string, got {other}"))),
		}
	}

	/// A list of strings; absent means empty.
	pub fn string_list(&self, index: usize, name: &str) -> Result<Vec<String>, InvokeError> {
		match self.get(index, name) {
			None => Ok(Vec::new()),
			Some(Value::Array(items)) => items
				.iter()
				.map(|item| match item {
					Value::String(s) => Ok(s.clone()),
					other => Err(InvokeError::InvalidArguments(format!("`{name}` items must be strings, got {other}"))),
				})
				.collect(),
			Some(other) => Err(InvokeError::InvalidArguments(format!("`{name}` must be a list of strings, got {other}"))),
		}
	}
}

/// Everything a capability handler receives.
#[derive(Debug, Clone)]
pub struct Call {
	/// Id of the invocation, also its cancellation key.
	pub id: TaskId,
	pub path: String,
	pub args: CallArgs,
	/// Fires when the invocation is cancelled or times out.
	pub cancel: CancellationToken,
}

#[derive(Clone)]
enum Handler {
	Sync(Arc<SyncHandler>),
	Async(Arc<AsyncHandler>),
}

/// Typed descriptor of one invokable member of the graph.
#[derive(Clone)]
pub struct Capability {
	handler: Handler,
	arity: Arity,
	timeout_eligible: bool,
}

impl Capability {
	/// A capability that completes without suspending.
	pub fn sync_fn<F>(arity: Arity, handler: F) -> Self
	where
		F: Fn(Call) -> Result<Value, InvokeError> + Send + Sync + 'static,
	{
		Self {
			handler: Handler::Sync(Arc::new(handler)),
			arity,
			timeout_eligible: true,
		}
	}

	/// A capability backed by a future.
	pub fn async_fn<F, Fut>(arity: Arity, handler: F) -> Self
	where
		F: Fn(Call) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Value, InvokeError>> + Send + 'static,
	{
		Self {
			handler: Handler::Async(Arc::new(move |call| -> BoxFuture<Result<Value, InvokeError>> { Box::pin(handler(call)) })),
			arity,
			timeout_eligible: true,
		}
	}

	/// Makes the capability ignore request timeouts.
	pub fn without_timeout(mut self) -> Self {
		self.timeout_eligible = false;
		self
	}

	pub fn kind(&self) -> CapabilityKind {
		match self.handler {
			Handler::Sync(_) => CapabilityKind::Sync,
			Handler::Async(_) => CapabilityKind::Async,
		}
	}

	pub fn arity(&self) -> Arity {
		self.arity
	}

	pub fn is_timeout_eligible(&self) -> bool {
		self.timeout_eligible
	}

	/// Produces the unit of work for one call. Sync handlers run when the
	/// returned future is first polled.
	pub(crate) fn invoke(&self, call: Call) -> BoxFuture<Result<Value, InvokeError>> {
		match &self.handler {
			Handler::Sync(handler) => {
				let handler = Arc::clone(handler);
				Box::pin(async move { handler(call) })
			}
			Handler::Async(handler) => handler(call),
		}
	}
}

impl fmt::Debug for Capability {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Capability")
			.field("kind", &self.kind())
			.field("arity", &self.arity)
			.field("timeout_eligible", &self.timeout_eligible)
			.finish()
	}
}

#[derive(Debug, Clone)]
enum Node {
	Namespace(BTreeMap<String, Node>),
	Leaf(Capability),
}

/// Immutable tree of capabilities keyed by dotted path.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
	root: BTreeMap<String, Node>,
}

impl CapabilityRegistry {
	pub fn builder() -> NamespaceBuilder {
		NamespaceBuilder::default()
	}

	/// Walks `path` segment by segment. Every intermediate segment must be a
	/// namespace and the last one a capability.
	pub fn resolve(&self, path: &str) -> Result<&Capability, InvokeError> {
		let not_found = || InvokeError::NotFound(path.to_owned());
		let mut level = &self.root;
		let mut segments = path.split('.').peekable();
		while let Some(segment) = segments.next() {
			let node = level.get(segment).ok_or_else(not_found)?;
			match (node, segments.peek().is_some()) {
				(Node::Namespace(children), true) => level = children,
				(Node::Leaf(capability), false) => return Ok(capability),
				_ => return Err(not_found()),
			}
		}
		Err(not_found())
	}

	/// Every registered capability path, sorted.
	pub fn paths(&self) -> Vec<String> {
		let mut out = Vec::new();
		collect_paths(&self.root, "", &mut out);
		out
	}
}

fn collect_paths(level: &BTreeMap<String, Node>, prefix: &str, out: &mut Vec<String>) {
	for (name, node) in level {
		let path = if prefix.is_empty() { name.clone() } else { format!("{prefix}.{name}") };
		match node {
			Node::Namespace(children) => collect_paths(children, &path, out),
			Node::Leaf(_) => out.push(path),
		}
	}
}

/// Builder for one level of the capability tree.
///
/// Registration problems are collected and reported by
/// [`build`](Self::build).
#[derive(Debug, Default)]
pub struct NamespaceBuilder {
	prefix: String,
	entries: BTreeMap<String, Node>,
	errors: Vec<RegistryError>,
}

impl NamespaceBuilder {
	pub fn capability(mut self, name: &str, capability: Capability) -> Self {
		if let Some(name) = self.check_name(name) {
			self.entries.insert(name, Node::Leaf(capability));
		}
		self
	}

	/// Registers a nested namespace populated by `populate`.
	pub fn namespace(mut self, name: &str, populate: impl FnOnce(NamespaceBuilder) -> NamespaceBuilder) -> Self {
		let Some(name) = self.check_name(name) else {
			return self;
		};
		let child = populate(NamespaceBuilder {
			prefix: self.qualify(&name),
			..Default::default()
		});
		self.errors.extend(child.errors);
		self.entries.insert(name, Node::Namespace(child.entries));
		self
	}

	pub fn build(self) -> Result<CapabilityRegistry, RegistryError> {
		match self.errors.into_iter().next() {
			Some(err) => Err(err),
			None => Ok(CapabilityRegistry { root: self.entries }),
		}
	}

	fn qualify(&self, name: &str) -> String {
		if self.prefix.is_empty() {
			name.to_owned()
		} else {
			format!("{}.{name}", self.prefix)
		}
	}

	fn check_name(&mut self, name: &str) -> Option<String> {
		if name.is_empty() || name.contains('.') {
			self.errors.push(RegistryError::InvalidName(self.qualify(name)));
			return None;
		}
		if self.entries.contains_key(name) {
			self.errors.push(RegistryError::Duplicate(self.qualify(name)));
			return None;
		}
		Some(name.to_owned())
	}
}
