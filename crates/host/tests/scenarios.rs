#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use kikx_channel::{EventFrame, HandlerData, SinkTransport, Status};
use kikx_config::Config;
use kikx_host::{Host, HostSettings};
use kikx_invocation::{DispatchOutcome, InvocationRequest, InvokeError};
use kikx_process::CommandTemplate;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn host(dir: &TempDir, process_idle: Duration) -> Arc<Host> {
	init_tracing();
	let mut config = Config::default();
	config.paths.storage = Some(dir.path().join("storage"));
	config.paths.data = Some(dir.path().join("data"));
	config.paths.home = Some(dir.path().to_path_buf());
	config.process.task_template = CommandTemplate::PASSTHROUGH.to_owned();
	let mut settings = HostSettings::from_config(&config).unwrap();
	settings.process_idle_timeout = process_idle;
	Host::new(settings)
}

async fn statuses(frames: &mut UnboundedReceiver<EventFrame>, id: &str) -> Vec<(Status, String)> {
	let mut seen = Vec::new();
	loop {
		let frame = tokio::time::timeout(Duration::from_secs(10), frames.recv())
			.await
			.expect("timed out waiting for progress")
			.expect("transport closed");
		let data: HandlerData = serde_json::from_value(frame.payload).unwrap();
		if data.id != id {
			continue;
		}
		let status = data.data.status;
		seen.push((status, data.data.output.as_str().unwrap_or_default().to_owned()));
		if status == Status::Ended {
			return seen;
		}
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_invocation_kills_its_process() {
	let dir = tempfile::tempdir().unwrap();
	let host = host(&dir, Duration::from_secs(30));
	let context = host.open_app("com.kikx.neko").unwrap();

	let started = Instant::now();
	let request = InvocationRequest::new("tasks.run_task").with_args(vec![json!("sleep 5")]).with_timeout(Duration::from_secs(1));
	let err = context.dispatch(request).await.unwrap_err();
	assert!(matches!(err, InvokeError::Timeout(_)), "{err:?}");
	assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());

	for _ in 0..200 {
		if context.supervisor().is_empty() && context.dispatcher().in_flight() == 0 {
			return;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("process outlived its invocation");
}

#[tokio::test]
async fn quiet_process_gets_one_liveness_check() {
	let dir = tempfile::tempdir().unwrap();
	let host = host(&dir, Duration::from_millis(400));
	let context = host.open_app("com.kikx.neko").unwrap();
	let (transport, mut frames) = SinkTransport::new();
	host.attach(context.id(), Arc::new(transport)).await.unwrap();

	let request = InvocationRequest::new("tasks.run_task").with_args(vec![json!("sh -c 'sleep 0.6; echo awake'"), json!("h1")]);
	let outcome = context.dispatch(request).await.unwrap();
	assert!(matches!(outcome, DispatchOutcome::Completed(ref id) if id.is_string()));

	let seen = statuses(&mut frames, "h1").await;
	let kinds: Vec<Status> = seen.iter().map(|(status, _)| *status).collect();
	assert_eq!(kinds, vec![Status::Started, Status::Info, Status::Output, Status::Ended]);
	assert_eq!(seen[2].1, "awake\n");
}

#[tokio::test]
async fn running_tasks_can_be_listed_fed_and_killed() {
	let dir = tempfile::tempdir().unwrap();
	let host = host(&dir, Duration::from_secs(30));
	let context = host.open_app("com.kikx.neko").unwrap();
	let (transport, mut frames) = SinkTransport::new();
	host.attach(context.id(), Arc::new(transport)).await.unwrap();

	let run = InvocationRequest::new("tasks.run_task").with_args(vec![json!("cat"), json!("h2")]);
	let DispatchOutcome::Completed(task) = context.dispatch(run).await.unwrap() else {
		panic!("run_task was cancelled");
	};

	// Input is refused until the process is up.
	let send = InvocationRequest::new("tasks.send_input").with_args(vec![task.clone(), json!("ping")]);
	let mut attempts = 0;
	while let Err(err) = context.dispatch(send.clone()).await {
		assert_eq!(err, InvokeError::NoActiveProcess);
		attempts += 1;
		assert!(attempts < 500, "process never started");
		tokio::time::sleep(Duration::from_millis(10)).await;
	}

	let DispatchOutcome::Completed(listed) = context.dispatch(InvocationRequest::new("tasks.list")).await.unwrap() else {
		panic!("list was cancelled");
	};
	assert_eq!(listed[0]["id"], task);
	assert_eq!(listed[0]["command"], "cat");
	assert!(listed[0]["pid"].is_u64());

	loop {
		let frame = tokio::time::timeout(Duration::from_secs(10), frames.recv()).await.unwrap().unwrap();
		let data: HandlerData = serde_json::from_value(frame.payload).unwrap();
		if data.data.status == Status::Output {
			assert_eq!(data.data.output, json!("ping\n"));
			break;
		}
	}

	let kill = InvocationRequest::new("tasks.kill").with_args(vec![task.clone()]);
	assert_eq!(context.dispatch(kill.clone()).await.unwrap(), DispatchOutcome::Completed(json!(true)));

	let seen = statuses(&mut frames, "h2").await;
	assert_eq!(seen.last(), Some(&(Status::Ended, "Task ended\n".to_owned())));
	assert_eq!(context.dispatch(kill).await.unwrap(), DispatchOutcome::Completed(json!(false)));
}
