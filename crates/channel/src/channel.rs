use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use kikx_worker::{CancellationToken, TaskClass};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::{ChannelError, Event, Payload, Transport};

/// Default wait before an unbound channel declares its peer gone.
pub const DEFAULT_IDLE_DISCONNECT: Duration = Duration::from_secs(10 * 60);

struct IdleTimer {
	cancel: CancellationToken,
	handle: JoinHandle<()>,
}

/// One logical bidirectional connection to a remote peer.
///
/// Events sent while no live transport is bound are queued and replayed in
/// FIFO order by the next [`EventChannel::connect`], before any event sent
/// after it.
pub struct EventChannel {
	label: String,
	idle_timeout: Duration,
	/// Currently bound transport. Never held across an await.
	transport: Mutex<Option<Arc<dyn Transport>>>,
	/// Queued events. Its lock also serializes deliveries so a replay always
	/// completes before the next direct send.
	pending: tokio::sync::Mutex<VecDeque<Event>>,
	idle: Mutex<Option<IdleTimer>>,
}

impl EventChannel {
	/// Creates an unbound channel with the default idle-disconnect timeout.
	pub fn new(label: impl Into<String>) -> Self {
		Self::with_idle_timeout(label, DEFAULT_IDLE_DISCONNECT)
	}

	pub fn with_idle_timeout(label: impl Into<String>, idle_timeout: Duration) -> Self {
		Self {
			label: label.into(),
			idle_timeout,
			transport: Mutex::new(None),
			pending: tokio::sync::Mutex::new(VecDeque::new()),
			idle: Mutex::new(None),
		}
	}

	pub fn label(&self) -> &str {
		&self.label
	}

	pub fn idle_timeout(&self) -> Duration {
		self.idle_timeout
	}

	/// Whether a live transport is bound.
	pub fn is_connected(&self) -> bool {
		self.current().is_some_and(|t| t.is_alive())
	}

	/// Number of events waiting for a reconnect.
	pub async fn pending_len(&self) -> usize {
		self.pending.lock().await.len()
	}

	/// Delivers an event, or queues it if the peer is unreachable.
	///
	/// Never fails: a live transport that rejects the frame drops it, a dead
	/// transport defers it.
	pub async fn send(&self, kind: impl Into<String>, payload: impl Into<Payload>) {
		let event = Event::new(kind, payload);
		let mut pending = self.pending.lock().await;

		let Some(transport) = self.current().filter(|t| t.is_alive()) else {
			tracing::debug!(channel = %self.label, event = event.kind(), "channel.queue");
			pending.push_back(event);
			return;
		};

		let frame = event.into_frame();
		if let Err(e) = transport.send(&frame).await {
			if transport.is_alive() {
				tracing::debug!(channel = %self.label, event = %frame.event, error = %e, "channel.send dropped");
			} else {
				tracing::debug!(channel = %self.label, event = %frame.event, "channel.queue after transport loss");
				pending.push_back(Event::from(frame));
			}
		}
	}

	/// Binds a new transport and replays queued events.
	///
	/// Fails with [`ChannelError::AlreadyConnected`] while the bound transport
	/// is still alive. Cancels any armed idle-disconnect timer. Returns the
	/// number of replayed events.
	pub async fn connect(&self, transport: Arc<dyn Transport>) -> Result<usize, ChannelError> {
		self.connect_then(transport, || {}).await
	}

	/// Like [`connect`](Self::connect), running `on_bound` once the transport
	/// is bound and before anything is replayed. `on_bound` is not called when
	/// the connect fails.
	pub async fn connect_then(&self, transport: Arc<dyn Transport>, on_bound: impl FnOnce()) -> Result<usize, ChannelError> {
		let mut pending = self.pending.lock().await;
		{
			let mut bound = self.transport.lock();
			if bound.as_ref().is_some_and(|t| t.is_alive()) {
				tracing::warn!(channel = %self.label, "channel.connect while already connected");
				return Err(ChannelError::AlreadyConnected);
			}
			let reconnect = bound.is_some();
			*bound = Some(Arc::clone(&transport));
			tracing::info!(channel = %self.label, reconnect, queued = pending.len(), "channel.connect");
		}

		self.cancel_idle_disconnect();
		on_bound();

		let mut replayed = 0;
		while let Some(event) = pending.pop_front() {
			let frame = event.into_frame();
			match transport.send(&frame).await {
				Ok(()) => replayed += 1,
				Err(e) if transport.is_alive() => {
					tracing::debug!(channel = %self.label, event = %frame.event, error = %e, "channel.replay dropped");
				}
				Err(_) => {
					tracing::debug!(channel = %self.label, remaining = pending.len() + 1, "channel.replay interrupted");
					pending.push_front(Event::from(frame));
					break;
				}
			}
		}
		Ok(replayed)
	}

	/// Unbinds the current transport. Returns whether it was still alive.
	pub fn disconnect(&self) -> bool {
		let was_alive = self.transport.lock().take().is_some_and(|t| t.is_alive());
		tracing::debug!(channel = %self.label, was_alive, "channel.disconnect");
		was_alive
	}

	/// Unbinds `transport` if it is still the bound one.
	///
	/// A connection that ends after a newer one has already been connected
	/// leaves the newer binding alone.
	pub fn release(&self, transport: &Arc<dyn Transport>) -> bool {
		let mut bound = self.transport.lock();
		if !bound.as_ref().is_some_and(|t| std::ptr::addr_eq(Arc::as_ptr(t), Arc::as_ptr(transport))) {
			return false;
		}
		bound.take();
		tracing::debug!(channel = %self.label, "channel.release");
		true
	}

	/// Arms the idle-disconnect timer.
	///
	/// Unless cancelled by a later [`EventChannel::connect`] or
	/// [`EventChannel::cancel_idle_disconnect`], `on_idle` runs once `timeout`
	/// (or the channel's default) has elapsed. Re-arming replaces the previous
	/// timer.
	pub fn arm_idle_disconnect<F, Fut>(&self, timeout: Option<Duration>, on_idle: F)
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let wait = timeout.unwrap_or(self.idle_timeout);
		let cancel = CancellationToken::new();
		let token = cancel.clone();
		let label = self.label.clone();
		let handle = kikx_worker::spawn(TaskClass::Timer, async move {
			tokio::select! {
				_ = token.cancelled() => {
					tracing::debug!(channel = %label, "channel.idle cancelled");
				}
				_ = tokio::time::sleep(wait) => {
					tracing::info!(channel = %label, wait_secs = wait.as_secs_f64(), "channel.idle timeout reached");
					on_idle().await;
				}
			}
		});

		if let Some(previous) = self.idle.lock().replace(IdleTimer { cancel, handle }) {
			previous.cancel.cancel();
		}
	}

	/// Cancels a pending idle-disconnect timer. Safe to call repeatedly.
	pub fn cancel_idle_disconnect(&self) -> bool {
		let Some(timer) = self.idle.lock().take() else {
			return false;
		};
		let fired = timer.handle.is_finished() && !timer.cancel.is_cancelled();
		timer.cancel.cancel();
		!fired
	}

	/// Whether an idle-disconnect timer is armed and has not yet fired.
	pub fn idle_armed(&self) -> bool {
		self.idle.lock().as_ref().is_some_and(|t| !t.handle.is_finished() && !t.cancel.is_cancelled())
	}

	fn current(&self) -> Option<Arc<dyn Transport>> {
		self.transport.lock().clone()
	}
}

impl Drop for EventChannel {
	fn drop(&mut self) {
		if let Some(timer) = self.idle.get_mut().take() {
			timer.cancel.cancel();
		}
	}
}

impl std::fmt::Debug for EventChannel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventChannel")
			.field("label", &self.label)
			.field("connected", &self.is_connected())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests;
