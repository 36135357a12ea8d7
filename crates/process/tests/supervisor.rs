#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use kikx_channel::{EventChannel, EventFrame, HANDLER_DATA, HandlerData, SinkTransport, Status};
use kikx_process::{CapturedOutput, CommandTemplate, ContextPaths, ProcessEnv, ProcessError, ProcessPhase, ProcessSupervisor, RunTaskOutcome};
use kikx_worker::{CancellationToken, TaskId};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

struct Harness {
	supervisor: ProcessSupervisor,
	frames: UnboundedReceiver<EventFrame>,
	dir: TempDir,
}

async fn harness(idle_timeout: Duration) -> Harness {
	let dir = tempfile::tempdir().unwrap();
	let data = dir.path().join("data");
	std::fs::create_dir_all(&data).unwrap();
	let paths = ContextPaths {
		app_id: "feedface".into(),
		app_name: "com.kikx.test".into(),
		storage_path: dir.path().to_path_buf(),
		app_path: dir.path().join("app"),
		app_data_path: data,
		home_path: dir.path().to_path_buf(),
		interpreter: None,
	};

	let channel = Arc::new(EventChannel::new("test"));
	let (transport, frames) = SinkTransport::new();
	channel.connect(Arc::new(transport)).await.unwrap();

	let template = CommandTemplate::parse(CommandTemplate::PASSTHROUGH).unwrap();
	let supervisor = ProcessSupervisor::new(ProcessEnv::from_current(&paths), template, channel).with_idle_timeout(idle_timeout);
	Harness {
		supervisor,
		frames,
		dir,
	}
}

/// Collects progress messages for `id` up to and including `ended`.
async fn drain_until_ended(frames: &mut UnboundedReceiver<EventFrame>, id: &str) -> Vec<(Status, String)> {
	let mut seen = Vec::new();
	loop {
		let frame = tokio::time::timeout(Duration::from_secs(10), frames.recv())
			.await
			.expect("timed out waiting for progress")
			.expect("channel closed");
		assert_eq!(frame.event, HANDLER_DATA);
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

async fn wait_for_phase(supervisor: &ProcessSupervisor, id: TaskId, phase: ProcessPhase) {
	for _ in 0..500 {
		if supervisor.process(id).is_some_and(|p| p.phase() == phase) {
			return;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("process {id} never reached {phase:?}");
}

fn spawned(outcome: RunTaskOutcome) -> TaskId {
	match outcome {
		RunTaskOutcome::Spawned(id) => id,
		other => panic!("expected a spawned task, got {other:?}"),
	}
}

#[tokio::test]
async fn batch_run_returns_captured_output() {
	let h = harness(Duration::from_secs(30)).await;
	let outcome = h.supervisor.run_task("echo hi", None, Vec::new()).await.unwrap();
	assert_eq!(
		outcome,
		RunTaskOutcome::Finished(CapturedOutput {
			stdout: Some("hi\n".into()),
			stderr: None,
			exit_code: Some(0),
		})
	);
	assert!(h.supervisor.is_empty());
}

#[tokio::test]
async fn batch_run_reports_failure_output() {
	let h = harness(Duration::from_secs(30)).await;
	let out = h.supervisor.sh("echo oops >&2; exit 3", Vec::new()).await.unwrap();
	assert_eq!(out.stdout, None);
	assert_eq!(out.stderr.as_deref(), Some("oops\n"));
	assert_eq!(out.exit_code, Some(3));
}

#[tokio::test]
async fn sh_runs_in_app_data_directory_with_context_env() {
	let h = harness(Duration::from_secs(30)).await;
	let out = h.supervisor.sh("pwd; echo $KIKX_APP_NAME", Vec::new()).await.unwrap();
	let expected_dir = h.dir.path().join("data").canonicalize().unwrap();
	let stdout = out.stdout.unwrap();
	let mut lines = stdout.lines();
	assert_eq!(std::path::Path::new(lines.next().unwrap()).canonicalize().unwrap(), expected_dir);
	assert_eq!(lines.next(), Some("com.kikx.test"));
}

#[tokio::test]
async fn batch_input_is_written_to_stdin() {
	let h = harness(Duration::from_secs(30)).await;
	let out = h.supervisor.sh("cat", vec!["one".into(), "two".into()]).await.unwrap();
	assert_eq!(out.stdout.as_deref(), Some("one\ntwo"));
}

#[tokio::test]
async fn streaming_run_reports_lines_in_order() {
	let mut h = harness(Duration::from_secs(30)).await;
	let id = spawned(h.supervisor.run_task("printf 'a\\nb\\nc\\n'", Some("h1".into()), Vec::new()).await.unwrap());

	let seen = drain_until_ended(&mut h.frames, "h1").await;
	assert_eq!(seen, vec![
		(Status::Started, "Task started\n".to_owned()),
		(Status::Output, "a\n".to_owned()),
		(Status::Output, "b\n".to_owned()),
		(Status::Output, "c\n".to_owned()),
		(Status::Ended, "Task ended\n".to_owned()),
	]);
	assert!(h.supervisor.process(id).is_none());
}

#[tokio::test]
async fn streaming_stderr_is_reported_as_error() {
	let mut h = harness(Duration::from_secs(30)).await;
	spawned(h.supervisor.run_task("sh -c 'echo bad >&2'", Some("h2".into()), Vec::new()).await.unwrap());

	let seen = drain_until_ended(&mut h.frames, "h2").await;
	assert!(seen.contains(&(Status::Error, "bad\n".to_owned())), "{seen:?}");
}

#[tokio::test]
async fn silent_process_is_checked_on_before_output() {
	let mut h = harness(Duration::from_millis(400)).await;
	let id = spawned(h.supervisor.run_task("sh -c 'sleep 0.6; echo done'", Some("h3".into()), Vec::new()).await.unwrap());

	let seen = drain_until_ended(&mut h.frames, "h3").await;
	let statuses: Vec<Status> = seen.iter().map(|(s, _)| *s).collect();
	assert_eq!(statuses, vec![Status::Started, Status::Info, Status::Output, Status::Ended]);
	assert!(seen[1].1.starts_with(&format!("Task {id}: No output for ")), "{seen:?}");
	assert_eq!(seen[2].1, "done\n");
}

#[tokio::test]
async fn kill_terminates_and_unregisters() {
	let mut h = harness(Duration::from_secs(30)).await;
	let id = spawned(h.supervisor.run_task("sleep 30", Some("h4".into()), Vec::new()).await.unwrap());
	wait_for_phase(&h.supervisor, id, ProcessPhase::Streaming).await;
	let process = h.supervisor.process(id).unwrap();

	assert!(h.supervisor.kill(id));
	assert!(!h.supervisor.kill(id));

	let seen = drain_until_ended(&mut h.frames, "h4").await;
	assert_eq!(seen.last().map(|(s, _)| *s), Some(Status::Ended));
	assert!(h.supervisor.process(id).is_none());
	assert_eq!(process.phase(), ProcessPhase::Killed);
	assert!(!h.supervisor.kill(id));
}

#[tokio::test]
async fn kill_is_not_held_up_by_a_blocked_writer() {
	let mut h = harness(Duration::from_secs(30)).await;
	let id = spawned(h.supervisor.run_task("sleep 30", Some("h6".into()), Vec::new()).await.unwrap());
	wait_for_phase(&h.supervisor, id, ProcessPhase::Streaming).await;
	let process = h.supervisor.process(id).unwrap();

	// More than a pipe holds, to a process that never reads it.
	let writer = {
		let process = Arc::clone(&process);
		tokio::spawn(async move { process.send(&"x".repeat(1 << 20)).await })
	};
	tokio::time::sleep(Duration::from_millis(300)).await;
	assert!(!writer.is_finished());

	assert!(h.supervisor.kill(id));
	let seen = drain_until_ended(&mut h.frames, "h6").await;
	assert_eq!(seen.last().map(|(s, _)| *s), Some(Status::Ended));
	assert!(h.supervisor.process(id).is_none());
	assert_eq!(process.phase(), ProcessPhase::Killed);

	let written = tokio::time::timeout(Duration::from_secs(5), writer).await.unwrap().unwrap();
	assert!(written.is_err());
	assert_eq!(process.send("late").await, Err(ProcessError::NoActiveProcess));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn kill_reaches_the_whole_process_group() {
	let mut h = harness(Duration::from_secs(30)).await;
	let marker = h.dir.path().join("child.pid");
	let command = format!("sh -c 'sleep 30 & echo $! > {}; wait'", marker.display());
	let id = spawned(h.supervisor.run_task(&command, Some("h5".into()), Vec::new()).await.unwrap());

	for _ in 0..500 {
		if std::fs::read_to_string(&marker).is_ok_and(|s| s.ends_with('\n')) {
			break;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	let child: i32 = std::fs::read_to_string(&marker).unwrap().trim().parse().unwrap();

	assert!(h.supervisor.kill(id));
	drain_until_ended(&mut h.frames, "h5").await;

	let mut gone = false;
	for _ in 0..200 {
		// A killed orphan may linger as a zombie until it is reaped.
		let state = std::fs::read_to_string(format!("/proc/{child}/stat"));
		if state.map_or(true, |stat| stat.rsplit_once(") ").is_some_and(|(_, rest)| rest.starts_with('Z'))) {
			gone = true;
			break;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	assert!(gone, "grandchild {child} survived the kill");
}

#[tokio::test]
async fn send_input_reaches_running_process() {
	let mut h = harness(Duration::from_secs(30)).await;
	let id = spawned(h.supervisor.run_task("sh -c 'read line; echo got $line'", Some("h6".into()), Vec::new()).await.unwrap());
	wait_for_phase(&h.supervisor, id, ProcessPhase::Streaming).await;

	h.supervisor.send_input(id, "hello").await.unwrap();
	let seen = drain_until_ended(&mut h.frames, "h6").await;
	assert!(seen.contains(&(Status::Output, "got hello\n".to_owned())), "{seen:?}");
}

#[tokio::test]
async fn send_input_to_unknown_process() {
	let h = harness(Duration::from_secs(30)).await;
	let id = TaskId::new();
	let err = h.supervisor.send_input(id, "x").await.unwrap_err();
	assert_eq!(err, ProcessError::NotFound(id.to_string()));
}

#[tokio::test]
async fn empty_command_line_is_rejected() {
	let h = harness(Duration::from_secs(30)).await;
	let err = h.supervisor.run_task("  ", Some("h7".into()), Vec::new()).await.unwrap_err();
	assert_eq!(err, ProcessError::EmptyCommand);
	assert_eq!(h.supervisor.sh("", Vec::new()).await.unwrap_err(), ProcessError::EmptyCommand);
	assert!(h.supervisor.is_empty());
}

#[tokio::test]
async fn cancelled_caller_kills_batch_run() {
	let h = harness(Duration::from_secs(30)).await;
	let caller = CancellationToken::new();
	let trigger = caller.clone();
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(200)).await;
		trigger.cancel();
	});

	let err = h.supervisor.run_task_with_cancel("sleep 30", None, Vec::new(), Some(&caller)).await.unwrap_err();
	assert_eq!(err, ProcessError::Cancelled);
	assert!(h.supervisor.is_empty());
}

#[tokio::test]
async fn shutdown_cancels_everything() {
	let mut h = harness(Duration::from_secs(30)).await;
	let a = spawned(h.supervisor.run_task("sleep 30", Some("s1".into()), Vec::new()).await.unwrap());
	let b = spawned(h.supervisor.run_task("sleep 30", Some("s2".into()), Vec::new()).await.unwrap());
	wait_for_phase(&h.supervisor, a, ProcessPhase::Streaming).await;
	wait_for_phase(&h.supervisor, b, ProcessPhase::Streaming).await;

	assert_eq!(h.supervisor.shutdown(), 2);
	let mut ended = 0;
	while ended < 2 {
		let frame = tokio::time::timeout(Duration::from_secs(10), h.frames.recv()).await.unwrap().unwrap();
		let data: HandlerData = serde_json::from_value(frame.payload).unwrap();
		if data.data.status == Status::Ended {
			ended += 1;
		}
	}
	assert!(h.supervisor.is_empty());
}
