//! Starting execution contexts.
//!
//! A context runs either on a dedicated OS thread with its own
//! single-threaded tokio runtime, or in a child process that serves one
//! context over its stdio (`<program> worker --session <name> [--root <dir>]`).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::thread::JoinHandle;

use tokio::process::{Child, Command};

use crate::context::ExecutionContext;
use crate::error::{Error, Result};
use crate::storage::StorageBackend;
use crate::transport::{PipeTransport, TransportParts, channel_pair};

/// Subcommand a worker process is started with.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// Where execution contexts run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LaunchMode {
	/// Dedicated thread in this process.
	#[default]
	Thread,
	/// Child process running `program worker`.
	Process { program: PathBuf },
}

impl LaunchMode {
	/// Spawns the current executable as the worker program.
	pub fn current_exe() -> Result<Self> {
		let program = std::env::current_exe()
			.map_err(|e| Error::LaunchFailed(format!("Failed to locate current executable: {e}")))?;
		Ok(LaunchMode::Process { program })
	}
}

/// Whatever keeps a launched context alive.
#[derive(Debug)]
pub enum Worker {
	Thread(JoinHandle<()>),
	Process(Child),
}

impl Worker {
	/// Returns true while the context is still running.
	pub fn is_running(&mut self) -> bool {
		match self {
			Worker::Thread(handle) => !handle.is_finished(),
			Worker::Process(child) => matches!(child.try_wait(), Ok(None)),
		}
	}

	/// Forcefully stops a worker process. Threads exit on their own once
	/// their channel closes.
	pub fn kill(&mut self) {
		if let Worker::Process(child) = self {
			if let Err(e) = child.start_kill() {
				tracing::debug!("Worker process already gone: {}", e);
			}
		}
	}
}

/// A freshly started context and the controller side of its channel.
pub struct Launched {
	pub parts: TransportParts,
	pub worker: Worker,
}

/// Starts a context for `name` backed by `backend`.
pub fn launch(mode: &LaunchMode, name: &str, backend: StorageBackend) -> Result<Launched> {
	match mode {
		LaunchMode::Thread => launch_thread(name, backend),
		LaunchMode::Process { program } => launch_process(program, name, &backend),
	}
}

fn launch_thread(name: &str, backend: StorageBackend) -> Result<Launched> {
	let (controller, context_side) = channel_pair();
	let context = ExecutionContext::new(name, backend);
	let session = name.to_string();

	let handle = std::thread::Builder::new()
		.name(format!("sqlw-{name}"))
		.spawn(move || {
			let runtime = match tokio::runtime::Builder::new_current_thread()
				.enable_all()
				.build()
			{
				Ok(runtime) => runtime,
				Err(e) => {
					tracing::error!(session = %session, "Failed to build context runtime: {}", e);
					return;
				}
			};

			if let Err(e) = runtime.block_on(context.serve(context_side)) {
				tracing::error!(session = %session, "Execution context failed: {}", e);
			}
		})
		.map_err(|e| Error::LaunchFailed(format!("Failed to spawn context thread: {e}")))?;

	tracing::debug!(session = %name, "Context thread started");

	Ok(Launched {
		parts: controller,
		worker: Worker::Thread(handle),
	})
}

fn launch_process(program: &Path, name: &str, backend: &StorageBackend) -> Result<Launched> {
	let mut cmd = Command::new(program);
	cmd.arg(WORKER_SUBCOMMAND)
		.arg("--session")
		.arg(name)
		.stdin(Stdio::piped())
		.stdout(Stdio::piped())
		.stderr(Stdio::inherit())
		.kill_on_drop(true);

	if let Some(store) = backend.durable() {
		cmd.arg("--root").arg(store.root());
	}

	let mut child = cmd
		.spawn()
		.map_err(|e| Error::LaunchFailed(format!("Failed to spawn process: {}", e)))?;

	let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
		let _ = child.start_kill();
		return Err(Error::LaunchFailed(
			"Worker process has no stdio pipes".to_string(),
		));
	};

	let (transport, message_rx) = PipeTransport::new(stdin, stdout);
	tracing::debug!(session = %name, pid = ?child.id(), "Context process started");

	Ok(Launched {
		parts: transport.into_transport_parts(message_rx),
		worker: Worker::Process(child),
	})
}

/// Serves one context over this process's stdio until terminated.
///
/// Entry point of the worker subcommand.
pub async fn serve_stdio(name: &str, backend: StorageBackend) -> Result<()> {
	let context = ExecutionContext::new(name, backend);
	context
		.serve_pipe(tokio::io::stdout(), tokio::io::stdin())
		.await
}
