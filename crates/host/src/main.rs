//! kikx host binary.
//!
//! Runs as a daemon that owns application contexts and serves the IPC
//! socket until interrupted.

use std::path::{Path, PathBuf};

use clap::Parser;
use kikx_config::Config;
use kikx_host::{Host, HostSettings};
use kikx_worker::CancellationToken;
use tracing::info;

/// Host command line arguments.
#[derive(Parser, Debug)]
#[command(name = "kikx-host")]
#[command(about = "Application context host for kikx")]
struct Args {
	/// Socket path for IPC
	#[arg(short, long, value_name = "PATH")]
	socket: Option<PathBuf>,

	/// Configuration file
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	let config = Config::load_or_default(args.config.as_deref())?;

	setup_tracing(args.verbose, config.server.log_dir.as_deref());

	info!("starting kikx-host");

	let socket_path = args.socket.unwrap_or_else(|| config.server.socket_path());
	if let Some(parent) = socket_path.parent()
		&& !parent.exists()
	{
		std::fs::create_dir_all(parent)?;
	}

	info!(socket = %socket_path.display(), "IPC socket path");

	let host = Host::new(HostSettings::from_config(&config)?);
	let shutdown = CancellationToken::new();

	let interrupt = shutdown.clone();
	tokio::spawn(async move {
		match tokio::signal::ctrl_c().await {
			Ok(()) => info!("interrupt received"),
			Err(e) => tracing::error!(error = %e, "failed to listen for interrupt"),
		}
		interrupt.cancel();
	});

	info!("starting IPC server");
	kikx_host::ipc::serve(&socket_path, host, shutdown).await?;

	Ok(())
}

fn setup_tracing(verbose: bool, log_dir: Option<&Path>) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::fmt::format::FmtSpan;
	use tracing_subscriber::prelude::*;

	let filter = || {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| {
			if verbose {
				EnvFilter::new("kikx=trace,debug")
			} else {
				EnvFilter::new("kikx=debug,info")
			}
		})
	};

	// KIKX_LOG_DIR wins over the configured directory.
	let log_dir = std::env::var("KIKX_LOG_DIR")
		.ok()
		.map(PathBuf::from)
		.or_else(|| log_dir.map(Path::to_path_buf));
	if let Some(log_dir) = log_dir
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let pid = std::process::id();
		let log_path = log_dir.join(format!("kikx-host.{pid}.log"));

		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_span_events(FmtSpan::CLOSE)
				.with_target(true);

			tracing_subscriber::registry().with(filter()).with(file_layer).init();

			tracing::info!(path = ?log_path, "host tracing initialized");
			return;
		}
	}

	tracing_subscriber::fmt().with_env_filter(filter()).with_writer(std::io::stderr).init();
}
