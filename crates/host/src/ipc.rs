//! IPC server: one newline-delimited JSON stream per connection.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use kikx_channel::{EventFrame, Transport, TransportError};
use kikx_invocation::{DispatchOutcome, InvocationRequest};
use kikx_worker::{CancellationToken, TaskClass, TaskId};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use crate::wire::{ClientFrame, Outbound, ServerFrame, WireError};
use crate::{AppContext, Host, HostError};

/// Start the IPC server on a Unix domain socket.
///
/// Runs until `shutdown` is cancelled, then closes every context.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound or if filesystem operations
/// on the socket path fail.
pub async fn serve(socket_path: impl AsRef<Path>, host: Arc<Host>, shutdown: CancellationToken) -> std::io::Result<()> {
	let path = socket_path.as_ref();
	if path.exists() {
		tokio::fs::remove_file(path).await?;
	}

	let listener = UnixListener::bind(path)?;
	tracing::info!(path = %path.display(), "IPC server listening");

	loop {
		tokio::select! {
			_ = shutdown.cancelled() => {
				tracing::info!("IPC server shutting down");
				let closed = host.shutdown();
				tracing::info!(contexts = closed, "contexts closed");
				break;
			}
			res = listener.accept() => {
				match res {
					Ok((stream, _addr)) => {
						kikx_worker::spawn(TaskClass::Connection, handle_connection(stream, Arc::clone(&host), shutdown.child_token()));
					}
					Err(e) => {
						tracing::error!(error = %e, "Failed to accept connection");
					}
				}
			}
		}
	}

	if let Err(e) = tokio::fs::remove_file(path).await {
		tracing::debug!(error = %e, "socket cleanup failed");
	}
	Ok(())
}

/// Transport that writes event frames into a connection's outbound queue.
#[derive(Debug)]
struct ConnectionTransport {
	tx: mpsc::UnboundedSender<Outbound>,
	closed: Arc<AtomicBool>,
}

impl ConnectionTransport {
	fn close(&self) {
		self.closed.store(true, Ordering::Release);
	}
}

#[async_trait]
impl Transport for ConnectionTransport {
	fn is_alive(&self) -> bool {
		!self.closed.load(Ordering::Acquire) && !self.tx.is_closed()
	}

	async fn send(&self, frame: &EventFrame) -> Result<(), TransportError> {
		if !self.is_alive() {
			return Err(TransportError::Closed);
		}
		self.tx.send(Outbound::Event(frame.clone())).map_err(|_| TransportError::Closed)
	}
}

/// Per-connection state: the outbound queue and the bound context.
struct Connection {
	host: Arc<Host>,
	out: mpsc::UnboundedSender<Outbound>,
	transport: Arc<ConnectionTransport>,
	bound: Option<Arc<AppContext>>,
}

impl Connection {
	fn reply(&self, frame: ServerFrame) {
		// A closed writer means the peer is gone; the read loop ends on its own.
		let _ = self.out.send(Outbound::Reply(frame));
	}

	fn fail(&self, id: Option<u64>, err: &HostError) {
		tracing::debug!(error = %err, "ipc.frame_failed");
		self.reply(ServerFrame::Error { id, error: err.into() });
	}

	fn dyn_transport(&self) -> Arc<dyn Transport> {
		Arc::clone(&self.transport) as Arc<dyn Transport>
	}

	async fn handle_line(&mut self, line: &str) {
		if line.trim().is_empty() {
			return;
		}
		let frame = match serde_json::from_str::<ClientFrame>(line) {
			Ok(frame) => frame,
			Err(e) => return self.fail(None, &HostError::InvalidFrame(e.to_string())),
		};

		match frame {
			ClientFrame::Open { app } => {
				if let Some(bound) = &self.bound {
					return self.fail(None, &HostError::AlreadyBound(bound.id()));
				}
				let context = match self.host.open_app(&app) {
					Ok(context) => context,
					Err(e) => return self.fail(None, &e),
				};
				self.bind(context).await;
			}
			ClientFrame::Attach { context } => {
				if let Some(bound) = &self.bound {
					return self.fail(None, &HostError::AlreadyBound(bound.id()));
				}
				let Some(context) = self.host.get(context) else {
					return self.fail(None, &HostError::ContextNotFound(context));
				};
				self.bind(context).await;
			}
			ClientFrame::Call {
				id,
				path,
				config,
				invocation,
			} => {
				let Some(context) = self.bound.clone() else {
					return self.fail(Some(id), &HostError::NotAttached);
				};
				let out = self.out.clone();
				let request = InvocationRequest { path, config };
				kikx_worker::spawn(TaskClass::Connection, async move {
					let invocation = invocation.unwrap_or_default();
					let reply = match context.dispatch_with_id(invocation, request).await {
						Ok(DispatchOutcome::Completed(value)) => ServerFrame::Result { id, value },
						Ok(DispatchOutcome::Cancelled) => ServerFrame::Cancelled { id },
						Err(e) => ServerFrame::Error {
							id: Some(id),
							error: WireError::from(&e),
						},
					};
					let _ = out.send(Outbound::Reply(reply));
				});
			}
		}
	}

	/// Connects the channel and announces the context. `opened` is queued
	/// only once the bind succeeded and always ahead of replayed events.
	async fn bind(&mut self, context: Arc<AppContext>) {
		let out = self.out.clone();
		let id = context.id();
		let announce = move || {
			let _ = out.send(Outbound::Reply(ServerFrame::Opened { context: id }));
		};
		match context.channel().connect_then(self.dyn_transport(), announce).await {
			Ok(replayed) => {
				tracing::info!(context = %context.id(), replayed, "ipc.bound");
				self.bound = Some(context);
			}
			Err(e) => self.fail(None, &HostError::from(e)),
		}
	}

	fn finish(self) {
		self.transport.close();
		if let Some(context) = &self.bound {
			let transport = self.dyn_transport();
			self.host.detach(context, &transport);
		}
	}
}

/// Handle a single IPC connection.
pub async fn handle_connection(stream: UnixStream, host: Arc<Host>, shutdown: CancellationToken) {
	tracing::info!("New IPC connection");

	let (reader, mut writer) = stream.into_split();
	let (out, mut outbound) = mpsc::unbounded_channel::<Outbound>();
	let closed = Arc::new(AtomicBool::new(false));
	let transport = Arc::new(ConnectionTransport {
		tx: out.clone(),
		closed: Arc::clone(&closed),
	});

	// Ends once every sender is gone: the connection, its transport and any
	// call still running on its behalf.
	kikx_worker::spawn(TaskClass::Connection, async move {
		while let Some(frame) = outbound.recv().await {
			let mut line = match serde_json::to_vec(&frame) {
				Ok(line) => line,
				Err(e) => {
					tracing::error!(error = %e, "ipc.encode_failed");
					continue;
				}
			};
			line.push(b'\n');
			if let Err(e) = writer.write_all(&line).await {
				tracing::debug!(error = %e, "ipc.write_failed");
				closed.store(true, Ordering::Release);
				break;
			}
		}
	});

	let mut connection = Connection {
		host,
		out,
		transport,
		bound: None,
	};
	let mut lines = BufReader::new(reader).lines();
	loop {
		let line = tokio::select! {
			_ = shutdown.cancelled() => break,
			line = lines.next_line() => line,
		};
		match line {
			Ok(Some(line)) => connection.handle_line(&line).await,
			Ok(None) => break,
			Err(e) => {
				tracing::debug!(error = %e, "ipc.read_failed");
				break;
			}
		}
	}

	connection.finish();
	tracing::info!("IPC connection closed");
}
