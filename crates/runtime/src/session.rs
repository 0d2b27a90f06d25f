//! Controller-side handle to one execution context.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sqlw_protocol::{Backend, Command, Event, Record, Reply, Snapshot, SqlValue};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::launcher::{LaunchMode, Launched, Worker, launch};
use crate::storage::StorageBackend;

/// Lifecycle of a session as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	/// Context is running, no database opened yet.
	Starting,
	/// A database handle is open.
	Open,
	/// A close request is in flight.
	Closing,
	/// The context confirmed the handle is closed.
	Closed,
	/// The context has been told to exit.
	Terminated,
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			SessionState::Starting => "starting",
			SessionState::Open => "open",
			SessionState::Closing => "closing",
			SessionState::Closed => "closed",
			SessionState::Terminated => "terminated",
		};
		f.write_str(s)
	}
}

/// Outcome of opening a database in a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
	pub message: String,
	pub backend: Backend,
}

/// Outcome of importing an image into a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Imported {
	pub message: String,
	pub size: u64,
}

/// Handle to one running execution context.
///
/// Dropping the last handle tells the context to exit.
pub struct SessionHandle {
	name: Arc<str>,
	backend: Backend,
	connection: Arc<Connection>,
	state: Mutex<SessionState>,
	worker: Mutex<Worker>,
}

impl fmt::Debug for SessionHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionHandle")
			.field("name", &self.name)
			.field("backend", &self.backend)
			.field("state", &self.state())
			.finish()
	}
}

impl SessionHandle {
	/// Launches a context for `name` and starts correlating its responses.
	///
	/// Must be called from within a tokio runtime.
	pub fn start(
		name: &str,
		backend: StorageBackend,
		mode: &LaunchMode,
		call_timeout: Option<Duration>,
	) -> Result<Self> {
		let kind = backend.kind();
		let Launched { parts, worker } = launch(mode, name, backend)?;

		let name: Arc<str> = Arc::from(name);
		let connection = Arc::new(
			Connection::new(parts)
				.with_label(Arc::clone(&name))
				.with_call_timeout(call_timeout),
		);

		let runner = Arc::clone(&connection);
		tokio::spawn(async move {
			if let Err(e) = runner.run().await {
				tracing::error!(session = %runner.label(), "Connection loop failed: {}", e);
			}
		});

		tracing::info!(session = %name, backend = ?kind, "Session started");

		Ok(Self {
			name,
			backend: kind,
			connection,
			state: Mutex::new(SessionState::Starting),
			worker: Mutex::new(worker),
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Backend the context was created with.
	pub fn backend(&self) -> Backend {
		self.backend
	}

	pub fn state(&self) -> SessionState {
		*self.state.lock()
	}

	/// Returns true while the context can still take commands.
	pub fn is_alive(&self) -> bool {
		self.state() != SessionState::Terminated && !self.connection.is_closed()
	}

	/// Subscribes to unsolicited events from the context.
	pub fn events(&self) -> broadcast::Receiver<Event> {
		self.connection.subscribe()
	}

	/// Sends any command and awaits its reply.
	pub async fn call(&self, command: Command) -> Result<Reply> {
		self.call_with(command, None).await
	}

	/// Sends any command and awaits its reply, giving up when `cancel` fires.
	///
	/// `terminate` is never answered by the context; it goes through
	/// [`terminate`](Self::terminate) and is acknowledged with
	/// [`Reply::Terminated`].
	pub async fn call_with(
		&self,
		command: Command,
		cancel: Option<&CancellationToken>,
	) -> Result<Reply> {
		self.admit(&command)?;
		if matches!(command, Command::Terminate) {
			self.terminate();
			return Ok(Reply::Terminated);
		}
		self.connection.send_with(command, cancel).await
	}

	fn admit(&self, command: &Command) -> Result<()> {
		match self.state() {
			SessionState::Terminated => Err(Error::SessionTerminated(self.name.to_string())),
			SessionState::Closing if !matches!(command, Command::CloseDb | Command::Terminate) => {
				Err(Error::SessionClosing(self.name.to_string()))
			}
			_ => Ok(()),
		}
	}

	fn set_state(&self, next: SessionState) {
		let mut state = self.state.lock();
		if *state == SessionState::Terminated {
			return;
		}
		if *state != next {
			tracing::debug!(session = %self.name, from = %*state, to = %next, "Session state changed");
			*state = next;
		}
	}

	/// Opens (or creates) this session's database.
	pub async fn create_db(&self) -> Result<Created> {
		let reply = self
			.call(Command::CreateDb {
				name: self.name.to_string(),
			})
			.await?;
		match reply {
			Reply::Created { message, backend } => {
				self.set_state(SessionState::Open);
				Ok(Created { message, backend })
			}
			other => Err(unexpected("created", &other)),
		}
	}

	/// Runs `sql` and returns value-only rows.
	pub async fn execute_query(&self, sql: impl Into<String>) -> Result<Vec<Vec<SqlValue>>> {
		match self.call(Command::ExecuteQuery { sql: sql.into() }).await? {
			Reply::QueryResult { rows } => Ok(rows),
			other => Err(unexpected("queryResult", &other)),
		}
	}

	/// Prepares one statement, binds `values` by position and returns
	/// column-tagged records.
	pub async fn prepare_statement(
		&self,
		sql: impl Into<String>,
		values: Vec<SqlValue>,
	) -> Result<Vec<Record>> {
		let command = Command::PrepareStatement {
			sql: sql.into(),
			values,
		};
		match self.call(command).await? {
			Reply::StatementResult { records } => Ok(records),
			other => Err(unexpected("statementResult", &other)),
		}
	}

	/// Replaces this session's database with `snapshot`.
	pub async fn upload_db(&self, snapshot: Snapshot) -> Result<Imported> {
		let command = Command::UploadDb {
			name: self.name.to_string(),
			snapshot,
		};
		match self.call(command).await? {
			Reply::Imported { message, size } => {
				self.set_state(SessionState::Open);
				Ok(Imported { message, size })
			}
			other => Err(unexpected("imported", &other)),
		}
	}

	/// Exports the open database as a full image.
	pub async fn download_db(&self) -> Result<Snapshot> {
		match self.call(Command::DownloadDb).await? {
			Reply::SnapshotBlob { snapshot } => Ok(snapshot),
			other => Err(unexpected("snapshotBlob", &other)),
		}
	}

	/// Closes the database handle and waits for the context to confirm.
	///
	/// Succeeds whether or not a handle was open.
	pub async fn close_db(&self) -> Result<()> {
		self.close_then(SessionState::Closed).await
	}

	/// Like [`close_db`](Self::close_db), but the session stays `Closing`
	/// after the context confirms, so nothing can reopen the database while
	/// its file is removed. Ends with [`terminate`](Self::terminate) or
	/// [`release_close`](Self::release_close).
	pub async fn close_and_hold(&self) -> Result<()> {
		self.close_then(SessionState::Closing).await
	}

	/// Lets a session held by [`close_and_hold`](Self::close_and_hold) take
	/// commands again.
	pub fn release_close(&self) {
		let mut state = self.state.lock();
		if *state == SessionState::Closing {
			*state = SessionState::Closed;
		}
	}

	async fn close_then(&self, settled: SessionState) -> Result<()> {
		self.admit(&Command::CloseDb)?;
		let previous = self.state();
		self.set_state(SessionState::Closing);

		match self.connection.send(Command::CloseDb).await {
			Ok(Reply::Closed) => {
				self.set_state(settled);
				Ok(())
			}
			Ok(other) => {
				self.set_state(previous);
				Err(unexpected("closed", &other))
			}
			Err(e) => {
				self.set_state(previous);
				Err(e)
			}
		}
	}

	/// Tells the context to exit without waiting for it.
	///
	/// Idempotent.
	pub fn terminate(&self) {
		{
			let mut state = self.state.lock();
			if *state == SessionState::Terminated {
				return;
			}
			*state = SessionState::Terminated;
		}

		tracing::info!(session = %self.name, "Terminating session");
		if let Err(e) = self.connection.notify(Command::Terminate) {
			tracing::debug!(session = %self.name, "Context already gone: {}", e);
			self.worker.lock().kill();
		}
	}

}

impl Drop for SessionHandle {
	fn drop(&mut self) {
		self.terminate();
	}
}

fn unexpected(expected: &str, reply: &Reply) -> Error {
	Error::ProtocolError(format!("expected {expected} reply, got {}", reply.kind()))
}
