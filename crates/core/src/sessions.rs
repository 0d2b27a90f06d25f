//! Lifecycle controller: the public face of sqlw.
//!
//! [`Sessions`] owns the registry and sequences the multi-step operations
//! (create then open, close then delete then tear down, create then import).

use std::sync::Arc;

use sqlw_protocol::{Command, Record, Reply, Snapshot, SqlValue};
use sqlw_runtime::{
	CancellationToken, Created, DB_EXTENSION_ALIASES, DurableStore, Error, Imported, Registry,
	Result, SessionHandle, StorageProbe,
};
use tokio::sync::broadcast;

use crate::config::SessionsConfig;
use crate::publish::{BroadcastHub, DOWNLOAD_TOPIC, SnapshotMessage, SnapshotPublisher};

/// Session name used when a caller does not pick one.
pub const DEFAULT_SESSION: &str = "default";

/// Splits an upload file name into its session name, accepting only database
/// extensions.
///
/// ```ignore
/// assert_eq!(parse_upload_name("foo.sqlite3")?, "foo");
/// assert!(parse_upload_name("foo.txt").is_err());
/// ```
pub fn parse_upload_name(file_name: &str) -> Result<&str> {
	let unsupported = || Error::UnsupportedExtension {
		file_name: file_name.to_string(),
	};

	let (base, extension) = file_name.rsplit_once('.').ok_or_else(unsupported)?;
	let recognized = DB_EXTENSION_ALIASES
		.iter()
		.any(|alias| alias.eq_ignore_ascii_case(extension));
	if !recognized || base.is_empty() {
		return Err(unsupported());
	}
	Ok(base)
}

/// Controller for a set of named sessions.
pub struct Sessions {
	registry: Registry,
	store: Option<DurableStore>,
	publisher: Arc<dyn SnapshotPublisher>,
	hub: Option<Arc<BroadcastHub>>,
}

impl Sessions {
	/// Creates a controller publishing downloads on an in-process
	/// [`BroadcastHub`].
	pub fn new(config: SessionsConfig) -> Self {
		let hub = Arc::new(BroadcastHub::new(config.broadcast_capacity));
		let publisher: Arc<dyn SnapshotPublisher> = hub.clone();
		let mut sessions = Self::from_parts(&config, config.probe(), publisher);
		sessions.hub = Some(hub);
		sessions
	}

	/// Creates a controller with an explicit storage probe and publisher.
	pub fn from_parts(
		config: &SessionsConfig,
		probe: Arc<dyn StorageProbe>,
		publisher: Arc<dyn SnapshotPublisher>,
	) -> Self {
		let registry = Registry::new(probe)
			.with_launch_mode(config.launch_mode.clone())
			.with_call_timeout(config.call_timeout);

		Self {
			registry,
			store: config.store(),
			publisher,
			hub: None,
		}
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	/// Looks up a live session.
	pub fn resolve(&self, name: &str) -> Option<Arc<SessionHandle>> {
		self.registry.resolve(name)
	}

	/// Names of all live sessions, sorted.
	pub fn session_names(&self) -> Vec<String> {
		self.registry.names()
	}

	/// Listens for snapshots published by [`download_db`](Self::download_db).
	///
	/// `None` when the controller was built with a custom publisher.
	pub fn subscribe_downloads(&self) -> Option<broadcast::Receiver<SnapshotMessage>> {
		self.hub.as_ref().map(|hub| hub.subscribe(DOWNLOAD_TOPIC))
	}

	/// Starts a context for `name` and opens its database.
	///
	/// Fails immediately with [`Error::AlreadyExists`] if the name is taken.
	/// If the database cannot be opened the new context is torn down again.
	pub async fn create_db(&self, name: &str) -> Result<Created> {
		let handle = self.registry.create(name)?;
		match handle.create_db().await {
			Ok(created) => {
				tracing::info!(session = %name, backend = ?created.backend, "Session created");
				Ok(created)
			}
			Err(e) => {
				tracing::warn!(session = %name, "Failed to open database, discarding session: {}", e);
				self.discard(name, &handle);
				Err(e)
			}
		}
	}

	/// Runs `sql` in session `name` and returns value-only rows.
	pub async fn execute_query(&self, name: &str, sql: &str) -> Result<Vec<Vec<SqlValue>>> {
		self.registry.get(name)?.execute_query(sql).await
	}

	/// Prepares `sql` in session `name`, binds `values` positionally and
	/// returns column-tagged records.
	pub async fn execute_statement(
		&self,
		name: &str,
		sql: &str,
		values: Vec<SqlValue>,
	) -> Result<Vec<Record>> {
		self.registry.get(name)?.prepare_statement(sql, values).await
	}

	/// Sends a raw command to session `name`, giving up when `cancel` fires.
	///
	/// `terminate` is routed through [`terminate`](Self::terminate), so the
	/// name is free again once it returns.
	pub async fn call(
		&self,
		name: &str,
		command: Command,
		cancel: Option<&CancellationToken>,
	) -> Result<Reply> {
		let handle = self.registry.get(name)?;
		if matches!(command, Command::Terminate) {
			self.discard(name, &handle);
			return Ok(Reply::Terminated);
		}
		handle.call_with(command, cancel).await
	}

	/// Imports a database image named `file_name` (`<session>.sqlite3` or
	/// `<session>.sqlite`), creating the session if it does not exist.
	///
	/// Unsupported extensions are rejected before any session is created.
	pub async fn upload_db(&self, file_name: &str, bytes: impl Into<Snapshot>) -> Result<Imported> {
		let name = parse_upload_name(file_name)?;
		let snapshot = bytes.into();

		let (handle, created) = match self.registry.resolve(name).filter(|h| h.is_alive()) {
			Some(handle) => (handle, false),
			None => match self.registry.create(name) {
				Ok(handle) => (handle, true),
				// created concurrently, import into that one
				Err(Error::AlreadyExists(_)) => (self.registry.get(name)?, false),
				Err(e) => return Err(e),
			},
		};

		match handle.upload_db(snapshot).await {
			Ok(imported) => {
				tracing::info!(session = %name, size = imported.size, "Snapshot imported");
				Ok(imported)
			}
			Err(e) => {
				if created {
					tracing::warn!(session = %name, "Import failed, discarding new session: {}", e);
					self.discard(name, &handle);
				}
				Err(e)
			}
		}
	}

	/// Exports session `name` and returns the image directly.
	pub async fn export(&self, name: &str) -> Result<Snapshot> {
		self.registry.get(name)?.download_db().await
	}

	/// Exports session `name` and publishes the image on
	/// [`DOWNLOAD_TOPIC`].
	///
	/// Settles once the export has succeeded or failed; delivery to
	/// listeners is not awaited.
	pub async fn download_db(&self, name: &str) -> Result<()> {
		let snapshot = self.export(name).await?;
		self.publisher
			.publish(DOWNLOAD_TOPIC, SnapshotMessage::new(name, snapshot));
		Ok(())
	}

	/// Closes the database of session `name` without stopping its context.
	pub async fn close(&self, name: &str) -> Result<()> {
		self.registry.get(name)?.close_db().await
	}

	/// Tells the context of session `name` to exit and forgets it.
	///
	/// Returns false if there was no such session.
	pub fn terminate(&self, name: &str) -> bool {
		match self.registry.remove(name) {
			Some(handle) => {
				handle.terminate();
				true
			}
			None => false,
		}
	}

	/// Deletes the persisted database of `name` and tears its session down.
	///
	/// A name without a persisted file is a no-op. Otherwise the database is
	/// closed first, and the file is removed only after the context has
	/// confirmed the close.
	pub async fn delete_and_destroy(&self, name: &str) -> Result<()> {
		let Some(store) = &self.store else {
			tracing::debug!(session = %name, "No durable storage, nothing to delete");
			return Ok(());
		};
		if store.lookup(name).is_none() {
			tracing::debug!(session = %name, "No persisted database, nothing to delete");
			return Ok(());
		}

		let handle = self.registry.resolve(name);
		if let Some(handle) = handle.as_ref().filter(|h| h.is_alive()) {
			// stays closing so nothing reopens the file before it is gone
			handle.close_and_hold().await?;
		}

		if let Err(e) = store.remove(name) {
			if let Some(handle) = &handle {
				handle.release_close();
			}
			return Err(e.into());
		}
		tracing::info!(session = %name, "Persisted database removed");

		if let Some(handle) = handle {
			self.discard(name, &handle);
		}
		Ok(())
	}

	/// Terminates every session.
	pub fn shutdown(&self) {
		self.registry.terminate_all();
	}

	fn discard(&self, name: &str, handle: &Arc<SessionHandle>) {
		// only remove the entry if it still points at this handle
		if self
			.registry
			.resolve(name)
			.is_some_and(|current| Arc::ptr_eq(&current, handle))
		{
			self.registry.remove(name);
		}
		handle.terminate();
	}
}

impl Default for Sessions {
	fn default() -> Self {
		Self::new(SessionsConfig::default())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_upload_name() {
		assert_eq!(parse_upload_name("foo.sqlite3").unwrap(), "foo");
		assert_eq!(parse_upload_name("foo.sqlite").unwrap(), "foo");
		assert_eq!(parse_upload_name("foo.SQLITE3").unwrap(), "foo");
		assert_eq!(parse_upload_name("my.data.sqlite").unwrap(), "my.data");
	}

	#[test]
	fn test_parse_upload_name_rejects_other_extensions() {
		for file_name in ["foo.txt", "foo", "foo.db", ".sqlite3", "foo.sqlite3.bak"] {
			let err = parse_upload_name(file_name).unwrap_err();
			assert!(
				matches!(err, Error::UnsupportedExtension { .. }),
				"{file_name}: {err:?}"
			);
		}
	}
}
