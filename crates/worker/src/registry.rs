use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{TaskClass, TaskId};

/// Errors raised when scheduling into a [`TaskRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskRegistryError {
	/// A live unit of work is already registered under this id.
	#[error("task {0} is already scheduled")]
	Duplicate(TaskId),
}

type Entries = Arc<Mutex<HashMap<TaskId, CancellationToken>>>;

/// Keyed registry of in-flight cancellable units of work.
///
/// Every entry is inserted before its work is spawned and removed exactly once
/// by a completion guard owned by the spawned future, whether the work
/// completes, fails, panics or is dropped. The registry length therefore always
/// equals the number of unfinished units of work.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
	label: &'static str,
	entries: Entries,
}

impl TaskRegistry {
	/// Creates an empty registry. `label` tags tracing output.
	pub fn new(label: &'static str) -> Self {
		Self {
			label,
			entries: Arc::default(),
		}
	}

	/// Schedules `work` under a freshly generated id.
	///
	/// `work` receives the cancellation token of its entry and is expected to
	/// observe it at its own suspension points.
	pub fn schedule<W, Fut>(&self, class: TaskClass, work: W) -> ScheduledTask<Fut::Output>
	where
		W: FnOnce(CancellationToken) -> Fut,
		Fut: Future + Send + 'static,
		Fut::Output: Send + 'static,
	{
		let (id, token) = loop {
			let id = TaskId::new();
			if let Some(token) = self.try_insert(id) {
				break (id, token);
			}
		};
		self.spawn_entry(id, token, class, work)
	}

	/// Schedules `work` under a caller-chosen id.
	pub fn schedule_with_id<W, Fut>(&self, id: TaskId, class: TaskClass, work: W) -> Result<ScheduledTask<Fut::Output>, TaskRegistryError>
	where
		W: FnOnce(CancellationToken) -> Fut,
		Fut: Future + Send + 'static,
		Fut::Output: Send + 'static,
	{
		let token = self.try_insert(id).ok_or(TaskRegistryError::Duplicate(id))?;
		Ok(self.spawn_entry(id, token, class, work))
	}

	/// Requests cancellation of one entry.
	///
	/// Returns `true` only for the first effective request on a live entry.
	pub fn cancel(&self, id: TaskId) -> bool {
		let entries = self.entries.lock();
		let Some(token) = entries.get(&id) else {
			return false;
		};
		if token.is_cancelled() {
			return false;
		}
		token.cancel();
		tracing::debug!(registry = self.label, task_id = %id, "task.cancel");
		true
	}

	/// Requests cancellation of every live entry without waiting for drain.
	///
	/// Returns how many entries were newly cancelled.
	pub fn cancel_all(&self) -> usize {
		let entries = self.entries.lock();
		let mut cancelled = 0;
		for token in entries.values() {
			if !token.is_cancelled() {
				token.cancel();
				cancelled += 1;
			}
		}
		tracing::debug!(registry = self.label, cancelled, pending = entries.len(), "task.cancel_all");
		cancelled
	}

	/// Returns the cancellation token of a live entry.
	pub fn token(&self, id: TaskId) -> Option<CancellationToken> {
		self.entries.lock().get(&id).cloned()
	}

	pub fn contains(&self, id: TaskId) -> bool {
		self.entries.lock().contains_key(&id)
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}

	/// Returns the ids of all live entries, sorted.
	pub fn ids(&self) -> Vec<TaskId> {
		let mut ids: Vec<_> = self.entries.lock().keys().copied().collect();
		ids.sort();
		ids
	}

	fn try_insert(&self, id: TaskId) -> Option<CancellationToken> {
		let mut entries = self.entries.lock();
		if entries.contains_key(&id) {
			return None;
		}
		let token = CancellationToken::new();
		entries.insert(id, token.clone());
		Some(token)
	}

	fn spawn_entry<W, Fut>(&self, id: TaskId, token: CancellationToken, class: TaskClass, work: W) -> ScheduledTask<Fut::Output>
	where
		W: FnOnce(CancellationToken) -> Fut,
		Fut: Future + Send + 'static,
		Fut::Output: Send + 'static,
	{
		let guard = CompletionGuard {
			label: self.label,
			entries: Arc::clone(&self.entries),
			id,
		};
		let fut = work(token.clone());
		tracing::trace!(registry = self.label, task_id = %id, worker_class = class.as_str(), "task.schedule");
		let handle = crate::spawn(class, async move {
			let _guard = guard;
			fut.await
		});
		ScheduledTask { id, token, handle }
	}
}

/// Removes its registry entry when the owning future finishes or is dropped.
struct CompletionGuard {
	label: &'static str,
	entries: Entries,
	id: TaskId,
}

impl Drop for CompletionGuard {
	fn drop(&mut self) {
		if self.entries.lock().remove(&self.id).is_some() {
			tracing::trace!(registry = self.label, task_id = %self.id, "task.complete");
		}
	}
}

/// Handle to one scheduled unit of work.
///
/// Awaiting the handle yields the work's output, or the join error if the work
/// panicked.
#[derive(Debug)]
pub struct ScheduledTask<T> {
	id: TaskId,
	token: CancellationToken,
	handle: JoinHandle<T>,
}

impl<T> ScheduledTask<T> {
	pub fn id(&self) -> TaskId {
		self.id
	}

	/// Returns the entry's cancellation token.
	pub fn token(&self) -> &CancellationToken {
		&self.token
	}

	/// Requests cooperative cancellation of this unit of work.
	pub fn cancel(&self) {
		self.token.cancel();
	}

	pub fn is_finished(&self) -> bool {
		self.handle.is_finished()
	}
}

impl<T> Future for ScheduledTask<T> {
	type Output = Result<T, JoinError>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.handle).poll(cx)
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[tokio::test]
	async fn entry_removed_after_completion() {
		let registry = TaskRegistry::new("test");
		let task = registry.schedule(TaskClass::Invocation, |_token| async { 7 });
		let id = task.id();
		assert_eq!(task.await.unwrap(), 7);
		assert!(!registry.contains(id));
		assert!(registry.is_empty());
	}

	#[tokio::test]
	async fn entry_removed_after_panic() {
		let registry = TaskRegistry::new("test");
		let task = registry.schedule(TaskClass::Invocation, |_token| async { panic!("boom") });
		assert!(task.await.is_err());
		assert!(registry.is_empty());
	}

	#[tokio::test]
	async fn cancel_is_observed_cooperatively() {
		let registry = TaskRegistry::new("test");
		let task = registry.schedule(TaskClass::Invocation, |token| async move {
			tokio::select! {
				_ = token.cancelled() => "cancelled",
				_ = tokio::time::sleep(Duration::from_secs(60)) => "slept",
			}
		});
		let id = task.id();
		assert_eq!(registry.len(), 1);
		assert!(registry.cancel(id));
		assert_eq!(task.await.unwrap(), "cancelled");
		assert!(registry.is_empty());
	}

	#[tokio::test]
	async fn only_first_cancel_has_effect() {
		let registry = TaskRegistry::new("test");
		let task = registry.schedule(TaskClass::Process, |token| async move { token.cancelled().await });
		let id = task.id();
		assert!(registry.cancel(id));
		assert!(!registry.cancel(id));
		task.await.unwrap();
		assert!(!registry.cancel(id));
	}

	#[tokio::test]
	async fn cancel_all_reaches_every_entry() {
		let registry = TaskRegistry::new("test");
		let tasks: Vec<_> = (0..4)
			.map(|_| registry.schedule(TaskClass::Invocation, |token| async move { token.cancelled().await }))
			.collect();
		assert_eq!(registry.len(), 4);
		assert_eq!(registry.cancel_all(), 4);
		assert_eq!(registry.cancel_all(), 0);
		for task in tasks {
			task.await.unwrap();
		}
		assert!(registry.is_empty());
	}

	#[tokio::test]
	async fn duplicate_id_is_rejected() {
		let registry = TaskRegistry::new("test");
		let id = TaskId::new();
		let first = registry
			.schedule_with_id(id, TaskClass::Process, |token| async move { token.cancelled().await })
			.unwrap();
		let second = registry.schedule_with_id(id, TaskClass::Process, |_token| async {});
		assert_eq!(second.err(), Some(TaskRegistryError::Duplicate(id)));

		first.cancel();
		first.await.unwrap();
		assert!(registry.schedule_with_id(id, TaskClass::Process, |_token| async {}).is_ok());
	}

	#[tokio::test]
	async fn ids_lists_live_entries() {
		let registry = TaskRegistry::new("test");
		let a = registry.schedule(TaskClass::Invocation, |token| async move { token.cancelled().await });
		let b = registry.schedule(TaskClass::Invocation, |token| async move { token.cancelled().await });
		let mut expected = vec![a.id(), b.id()];
		expected.sort();
		assert_eq!(registry.ids(), expected);
		registry.cancel_all();
		let _ = (a.await, b.await);
	}
}
