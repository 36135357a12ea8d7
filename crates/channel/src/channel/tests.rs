use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;

use super::*;
use crate::{EventFrame, SinkTransport, TransportError};

fn drain(rx: &mut mpsc::UnboundedReceiver<EventFrame>) -> Vec<EventFrame> {
	let mut frames = Vec::new();
	while let Ok(frame) = rx.try_recv() {
		frames.push(frame);
	}
	frames
}

fn kinds(frames: &[EventFrame]) -> Vec<&str> {
	frames.iter().map(|f| f.event.as_str()).collect()
}

#[tokio::test]
async fn starts_unbound_and_queues() {
	let channel = EventChannel::new("ctx");
	assert!(!channel.is_connected());

	channel.send("a", json!(1)).await;
	channel.send("b", json!(2)).await;
	assert_eq!(channel.pending_len().await, 2);
}

#[tokio::test]
async fn connected_channel_delivers_directly() {
	let channel = EventChannel::new("ctx");
	let (transport, mut rx) = SinkTransport::new();
	assert_eq!(channel.connect(Arc::new(transport)).await, Ok(0));
	assert!(channel.is_connected());

	channel.send("hello", json!({ "n": 1 })).await;
	let frames = drain(&mut rx);
	assert_eq!(frames, vec![EventFrame {
		event: "hello".into(),
		payload: json!({ "n": 1 }),
	}]);
	assert_eq!(channel.pending_len().await, 0);
}

#[tokio::test]
async fn reconnect_replays_in_order_before_new_events() {
	let channel = EventChannel::new("ctx");
	let (first, mut first_rx) = SinkTransport::new();
	let first = Arc::new(first);
	channel.connect(first.clone()).await.unwrap();
	channel.send("before", json!(0)).await;

	first.close();
	assert!(!channel.is_connected());
	for kind in ["q1", "q2", "q3"] {
		channel.send(kind, json!(null)).await;
	}
	assert_eq!(kinds(&drain(&mut first_rx)), vec!["before"]);

	let (second, mut second_rx) = SinkTransport::new();
	assert_eq!(channel.connect(Arc::new(second)).await, Ok(3));
	channel.send("after", json!(null)).await;

	assert_eq!(kinds(&drain(&mut second_rx)), vec!["q1", "q2", "q3", "after"]);
	assert_eq!(channel.pending_len().await, 0);
}

#[tokio::test]
async fn double_connect_is_rejected_while_alive() {
	let channel = EventChannel::new("ctx");
	let (first, _first_rx) = SinkTransport::new();
	let first = Arc::new(first);
	channel.connect(first.clone()).await.unwrap();

	let (second, _second_rx) = SinkTransport::new();
	let second = Arc::new(second);
	assert_eq!(channel.connect(second.clone()).await, Err(ChannelError::AlreadyConnected));

	first.close();
	channel.send("queued", json!(null)).await;
	assert_eq!(channel.connect(second).await, Ok(1));
}

#[tokio::test]
async fn release_only_unbinds_the_matching_transport() {
	let channel = EventChannel::new("ctx");
	let (stale, _stale_rx) = SinkTransport::new();
	let stale: Arc<dyn Transport> = Arc::new(stale);
	channel.connect(Arc::clone(&stale)).await.unwrap();

	let (fresh, _fresh_rx) = SinkTransport::new();
	let fresh: Arc<dyn Transport> = Arc::new(fresh);
	assert!(channel.release(&stale));
	assert!(!channel.is_connected());
	channel.connect(Arc::clone(&fresh)).await.unwrap();

	assert!(!channel.release(&stale));
	assert!(channel.is_connected());
	assert!(channel.release(&fresh));
	assert!(!channel.release(&fresh));
}

#[tokio::test]
async fn dropped_receiver_counts_as_disconnect() {
	let channel = EventChannel::new("ctx");
	let (transport, rx) = SinkTransport::new();
	channel.connect(Arc::new(transport)).await.unwrap();
	drop(rx);

	assert!(!channel.is_connected());
	channel.send("kept", json!(null)).await;
	assert_eq!(channel.pending_len().await, 1);
}

#[tokio::test]
async fn deferred_payload_not_produced_while_queued() {
	let channel = EventChannel::new("ctx");
	let produced = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&produced);
	channel
		.send(
			"lazy",
			Payload::deferred(move || {
				counter.fetch_add(1, Ordering::SeqCst);
				json!("value")
			}),
		)
		.await;
	assert_eq!(produced.load(Ordering::SeqCst), 0);

	let (transport, mut rx) = SinkTransport::new();
	channel.connect(Arc::new(transport)).await.unwrap();
	assert_eq!(produced.load(Ordering::SeqCst), 1);
	assert_eq!(drain(&mut rx)[0].payload, json!("value"));
}

/// Transport that is alive but rejects every frame.
struct Flaky;

#[async_trait]
impl Transport for Flaky {
	fn is_alive(&self) -> bool {
		true
	}

	async fn send(&self, _frame: &EventFrame) -> Result<(), TransportError> {
		Err(TransportError::Rejected("busy".into()))
	}
}

#[tokio::test]
async fn transient_failure_on_live_transport_drops_event() {
	let channel = EventChannel::new("ctx");
	channel.connect(Arc::new(Flaky)).await.unwrap();
	channel.send("lost", json!(null)).await;
	assert_eq!(channel.pending_len().await, 0);
}

/// Transport that accepts `budget` frames and then dies.
struct DiesAfter {
	budget: AtomicUsize,
	alive: AtomicBool,
	seen: parking_lot::Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for DiesAfter {
	fn is_alive(&self) -> bool {
		self.alive.load(Ordering::SeqCst)
	}

	async fn send(&self, frame: &EventFrame) -> Result<(), TransportError> {
		if self.budget.load(Ordering::SeqCst) == 0 {
			self.alive.store(false, Ordering::SeqCst);
			return Err(TransportError::Closed);
		}
		self.budget.fetch_sub(1, Ordering::SeqCst);
		self.seen.lock().push(frame.event.clone());
		Ok(())
	}
}

#[tokio::test]
async fn interrupted_replay_keeps_tail_queued() {
	let channel = EventChannel::new("ctx");
	for kind in ["e1", "e2", "e3", "e4"] {
		channel.send(kind, json!(null)).await;
	}

	let dying = Arc::new(DiesAfter {
		budget: AtomicUsize::new(2),
		alive: AtomicBool::new(true),
		seen: parking_lot::Mutex::new(Vec::new()),
	});
	assert_eq!(channel.connect(dying.clone()).await, Ok(2));
	assert_eq!(*dying.seen.lock(), vec!["e1".to_string(), "e2".to_string()]);
	assert_eq!(channel.pending_len().await, 2);

	let (transport, mut rx) = SinkTransport::new();
	assert_eq!(channel.connect(Arc::new(transport)).await, Ok(2));
	assert_eq!(kinds(&drain(&mut rx)), vec!["e3", "e4"]);
}

#[tokio::test(start_paused = true)]
async fn idle_timer_fires_after_timeout() {
	let channel = EventChannel::with_idle_timeout("ctx", Duration::from_secs(30));
	let fired = Arc::new(AtomicBool::new(false));
	let flag = Arc::clone(&fired);
	channel.arm_idle_disconnect(None, move || async move {
		flag.store(true, Ordering::SeqCst);
	});
	assert!(channel.idle_armed());

	tokio::time::sleep(Duration::from_secs(29)).await;
	assert!(!fired.load(Ordering::SeqCst));
	tokio::time::sleep(Duration::from_secs(2)).await;
	assert!(fired.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn connect_cancels_idle_timer() {
	let channel = EventChannel::new("ctx");
	let fired = Arc::new(AtomicBool::new(false));
	let flag = Arc::clone(&fired);
	channel.arm_idle_disconnect(Some(Duration::from_secs(5)), move || async move {
		flag.store(true, Ordering::SeqCst);
	});

	let (transport, _rx) = SinkTransport::new();
	channel.connect(Arc::new(transport)).await.unwrap();
	assert!(!channel.idle_armed());

	tokio::time::sleep(Duration::from_secs(10)).await;
	assert!(!fired.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn cancelling_idle_timer_twice_is_harmless() {
	let channel = EventChannel::new("ctx");
	channel.arm_idle_disconnect(Some(Duration::from_secs(5)), || async {});
	assert!(channel.cancel_idle_disconnect());
	assert!(!channel.cancel_idle_disconnect());
	assert!(!channel.idle_armed());
}

#[tokio::test(start_paused = true)]
async fn rearming_replaces_previous_timer() {
	let channel = EventChannel::new("ctx");
	let hits = Arc::new(AtomicUsize::new(0));
	for _ in 0..2 {
		let hits = Arc::clone(&hits);
		channel.arm_idle_disconnect(Some(Duration::from_secs(5)), move || async move {
			hits.fetch_add(1, Ordering::SeqCst);
		});
	}
	tokio::time::sleep(Duration::from_secs(6)).await;
	assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn bound_hook_runs_before_replay_and_only_on_success() {
	let channel = EventChannel::new("ctx");
	channel.send("e1", json!(null)).await;
	channel.send("e2", json!(null)).await;

	let log = Arc::new(DiesAfter {
		budget: AtomicUsize::new(usize::MAX),
		alive: AtomicBool::new(true),
		seen: parking_lot::Mutex::new(Vec::new()),
	});
	let hook_log = Arc::clone(&log);
	let replayed = channel.connect_then(log.clone(), move || hook_log.seen.lock().push("bound".into())).await;
	assert_eq!(replayed, Ok(2));
	assert_eq!(*log.seen.lock(), vec!["bound", "e1", "e2"]);

	let called = AtomicBool::new(false);
	let (late, _late_rx) = SinkTransport::new();
	let refused = channel.connect_then(Arc::new(late), || called.store(true, Ordering::SeqCst)).await;
	assert_eq!(refused, Err(ChannelError::AlreadyConnected));
	assert!(!called.load(Ordering::SeqCst));
}
