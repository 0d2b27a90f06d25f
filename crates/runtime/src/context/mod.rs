//! Execution context: the engine-facing side of a session.
//!
//! A context owns one storage backend and at most one open database handle.
//! [`ExecutionContext::serve`] reads requests off a transport and answers them
//! strictly one at a time, in arrival order. Every request that expects a
//! reply gets exactly one response, success or typed error.

mod engine;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use serde_json::Value;
use sqlw_protocol::{
	Command, ErrorKind, ErrorPayload, Event, Reply, Request, Response, Snapshot,
};
use tokio::io::{AsyncRead, AsyncWrite};

use self::engine::{Database, EngineResult};
use crate::error::Result;
use crate::storage::StorageBackend;
use crate::transport::{PipeTransport, TransportParts};

/// Engine host for one session.
pub struct ExecutionContext {
	name: String,
	backend: StorageBackend,
	db: Option<Database>,
}

impl ExecutionContext {
	pub fn new(name: impl Into<String>, backend: StorageBackend) -> Self {
		Self {
			name: name.into(),
			backend,
			db: None,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn backend(&self) -> &StorageBackend {
		&self.backend
	}

	/// Returns true while a database handle is open.
	pub fn is_open(&self) -> bool {
		self.db.is_some()
	}

	/// Runs one command to completion.
	///
	/// Returns `None` for [`Command::Terminate`], which is never answered.
	pub fn handle(&mut self, command: Command) -> Option<std::result::Result<Reply, ErrorPayload>> {
		let result = match command {
			Command::CreateDb { name } => self.create_db(&name),
			Command::ExecuteQuery { sql } => self
				.database()
				.and_then(|db| db.execute_query(&sql))
				.map(|rows| Reply::QueryResult { rows }),
			Command::PrepareStatement { sql, values } => self
				.database()
				.and_then(|db| db.prepare_statement(&sql, &values))
				.map(|records| Reply::StatementResult { records }),
			Command::UploadDb { name, snapshot } => self.upload_db(&name, snapshot),
			Command::DownloadDb => self
				.database()
				.and_then(Database::export)
				.map(|snapshot| Reply::SnapshotBlob { snapshot }),
			Command::CloseDb => {
				self.close();
				Ok(Reply::Closed)
			}
			Command::Terminate => return None,
		};
		Some(result)
	}

	fn database(&self) -> EngineResult<&Database> {
		self.db.as_ref().ok_or_else(|| {
			ErrorPayload::new(
				ErrorKind::NoDatabase,
				format!("No database is open in session '{}'", self.name),
			)
		})
	}

	fn create_db(&mut self, name: &str) -> EngineResult<Reply> {
		self.close();

		let (db, message) = match &self.backend {
			StorageBackend::Durable(store) => {
				std::fs::create_dir_all(store.root()).map_err(|e| {
					ErrorPayload::new(
						ErrorKind::NoDatabase,
						format!("Failed to create storage root: {e}"),
					)
				})?;
				let path = store.path_for(name);
				let db = Database::open_durable(&path)?;
				let message = format!(
					"Database '{name}' opened with durable storage at {}",
					path.display()
				);
				(db, message)
			}
			StorageBackend::Transient => (
				Database::open_transient()?,
				format!("Database '{name}' opened in transient memory (durable storage unavailable)"),
			),
		};

		tracing::info!(session = %self.name, backend = ?self.backend.kind(), "Database opened");
		self.db = Some(db);

		Ok(Reply::Created {
			message,
			backend: self.backend.kind(),
		})
	}

	fn upload_db(&mut self, name: &str, snapshot: Snapshot) -> EngineResult<Reply> {
		let StorageBackend::Durable(store) = &self.backend else {
			return Err(ErrorPayload::new(
				ErrorKind::StorageUnsupported,
				"Durable storage is not available to import into",
			));
		};

		if snapshot.is_empty() {
			return Err(ErrorPayload::new(ErrorKind::ImportError, "Imported image is empty"));
		}
		if !snapshot.has_sqlite_header() {
			return Err(ErrorPayload::new(
				ErrorKind::ImportError,
				"Imported image is not an SQLite database",
			));
		}

		let import_error =
			|message: String| ErrorPayload::new(ErrorKind::ImportError, message);

		// nothing the session can see changes until the staged copy opens
		let staged = store
			.stage_image(snapshot.as_bytes())
			.map_err(|e| import_error(format!("Failed to write image: {e}")))?;
		Database::open_durable(staged.path())
			.and_then(|db| {
				let verified = db.verify();
				db.close();
				verified
			})
			.map_err(|e| import_error(format!("Imported image is unreadable: {}", e.message)))?;

		// the target may be the file currently open
		let prior = self.db.take().and_then(|db| {
			let path = db.path().map(Path::to_path_buf);
			db.close();
			path
		});

		let path = match store.commit_image(name, staged) {
			Ok(path) => path,
			Err(e) => {
				self.reopen(prior);
				return Err(import_error(format!("Failed to replace database: {e}")));
			}
		};

		let db = match Database::open_durable(&path) {
			Ok(db) => db,
			Err(e) => {
				self.reopen(prior);
				return Err(e);
			}
		};
		let size = snapshot.len() as u64;
		tracing::info!(session = %self.name, size, path = %path.display(), "Database imported");
		self.db = Some(db);

		Ok(Reply::Imported {
			message: format!("Imported {size} bytes into '{name}'"),
			size,
		})
	}

	/// Best-effort reopen of a handle closed for an import that then failed.
	fn reopen(&mut self, prior: Option<PathBuf>) {
		let Some(path) = prior else {
			return;
		};
		match Database::open_durable(&path) {
			Ok(db) => self.db = Some(db),
			Err(e) => {
				tracing::warn!(session = %self.name, path = %path.display(), "Failed to reopen database: {}", e.message);
			}
		}
	}

	/// Closes the open handle, if any.
	pub fn close(&mut self) {
		if let Some(db) = self.db.take() {
			tracing::debug!(
				session = %self.name,
				path = ?db.path(),
				"Closing database"
			);
			db.close();
		}
	}

	/// Serves requests from `parts` until terminated or until the controller
	/// goes away.
	pub async fn serve(mut self, parts: TransportParts) -> Result<()> {
		let TransportParts {
			mut sender,
			receiver,
			mut message_rx,
		} = parts;

		let name = self.name.clone();
		let reader = tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				tracing::error!(session = %name, "Context transport read error: {}", e);
			}
		});

		tracing::debug!(session = %self.name, "Execution context serving");

		while let Some(value) = message_rx.recv().await {
			let request = match serde_json::from_value::<Request>(value.clone()) {
				Ok(request) => request,
				Err(e) => {
					let Some(id) = request_id(&value) else {
						tracing::warn!(session = %self.name, "Dropping undecodable request: {}", e);
						continue;
					};
					let response = Response::err(
						id,
						ErrorPayload::new(ErrorKind::Protocol, format!("Malformed request: {e}")),
					);
					if sender.send(serde_json::to_value(&response)?).await.is_err() {
						break;
					}
					continue;
				}
			};

			let Request { id, command } = request;
			let action = command.action();

			let Some(result) = self.handle(command) else {
				tracing::info!(session = %self.name, "Execution context terminating");
				let event = Event::Terminated {
					name: self.name.clone(),
				};
				let _ = sender.send(serde_json::to_value(&event)?).await;
				break;
			};

			let response = match result {
				Ok(reply) => Response::ok(id, reply),
				Err(error) => {
					tracing::debug!(session = %self.name, id, action, kind = %error.kind, "Command failed");
					Response::err(id, error)
				}
			};

			if let Err(e) = sender.send(serde_json::to_value(&response)?).await {
				tracing::debug!(session = %self.name, "Controller went away: {}", e);
				break;
			}
		}

		reader.abort();
		self.close();
		tracing::debug!(session = %self.name, "Execution context stopped");
		Ok(())
	}

	/// Serves requests framed on a byte stream pair, such as process stdio.
	pub async fn serve_pipe<W, R>(self, writer: W, reader: R) -> Result<()>
	where
		W: AsyncWrite + Unpin + Send + 'static,
		R: AsyncRead + Unpin + Send + 'static,
	{
		let (transport, message_rx) = PipeTransport::new(writer, reader);
		self.serve(transport.into_transport_parts(message_rx)).await
	}
}

impl Drop for ExecutionContext {
	fn drop(&mut self) {
		self.close();
	}
}

fn request_id(value: &Value) -> Option<u32> {
	value
		.get("id")
		.and_then(Value::as_u64)
		.and_then(|id| u32::try_from(id).ok())
}
