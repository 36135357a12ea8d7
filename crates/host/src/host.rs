use std::collections::HashMap;
use std::sync::{Arc, Weak};

use kikx_channel::Transport;
use kikx_worker::TaskId;
use parking_lot::Mutex;

use crate::{AppContext, HostError, HostSettings};

/// Registry of open application contexts.
///
/// Contexts outlive connections: when a connection ends, its context waits
/// for a reattachment until the idle-disconnect timer closes it.
#[derive(Debug)]
pub struct Host {
	settings: HostSettings,
	contexts: Mutex<HashMap<TaskId, Arc<AppContext>>>,
}

impl Host {
	pub fn new(settings: HostSettings) -> Arc<Self> {
		Arc::new(Self {
			settings,
			contexts: Mutex::new(HashMap::new()),
		})
	}

	pub fn settings(&self) -> &HostSettings {
		&self.settings
	}

	/// Opens a new context for the app called `name`.
	pub fn open_app(&self, name: &str) -> Result<Arc<AppContext>, HostError> {
		if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
			return Err(HostError::InvalidApp(name.to_owned()));
		}
		let context = Arc::new(AppContext::new(name, &self.settings)?);
		self.contexts.lock().insert(context.id(), Arc::clone(&context));
		Ok(context)
	}

	pub fn get(&self, id: TaskId) -> Option<Arc<AppContext>> {
		self.contexts.lock().get(&id).cloned()
	}

	/// Closes and forgets a context. Returns whether it was open.
	pub fn close(&self, id: TaskId) -> bool {
		let Some(context) = self.contexts.lock().remove(&id) else {
			return false;
		};
		context.close();
		true
	}

	pub fn len(&self) -> usize {
		self.contexts.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.contexts.lock().is_empty()
	}

	pub fn ids(&self) -> Vec<TaskId> {
		self.contexts.lock().keys().copied().collect()
	}

	/// Binds `transport` to the context `id` and replays its queued events.
	pub async fn attach(&self, id: TaskId, transport: Arc<dyn Transport>) -> Result<(Arc<AppContext>, usize), HostError> {
		let context = self.get(id).ok_or(HostError::ContextNotFound(id))?;
		let replayed = context.channel().connect(transport).await?;
		tracing::info!(context = %id, replayed, "context.attach");
		Ok((context, replayed))
	}

	/// Handles the end of a connection bound to `context`.
	///
	/// The channel is unbound, unless a newer connection has already taken
	/// over, and the idle-disconnect timer is armed to close the context.
	pub fn detach(self: &Arc<Self>, context: &Arc<AppContext>, transport: &Arc<dyn Transport>) {
		if !context.channel().release(transport) {
			return;
		}
		let id = context.id();
		let host: Weak<Self> = Arc::downgrade(self);
		context.channel().arm_idle_disconnect(None, move || async move {
			if let Some(host) = host.upgrade()
				&& host.close(id)
			{
				tracing::info!(context = %id, "context.idle_closed");
			}
		});
		tracing::debug!(context = %id, "context.detach");
	}

	/// Closes every context. Returns how many were open.
	pub fn shutdown(&self) -> usize {
		let contexts: Vec<_> = self.contexts.lock().drain().map(|(_, c)| c).collect();
		for context in &contexts {
			context.close();
		}
		contexts.len()
	}
}
