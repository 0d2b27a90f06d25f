//! Session registry: at most one live context per name.
//!
//! Uses [`DashMap`] for concurrent access; creation is check-then-act under
//! the shard lock of the name's entry, so two racing creates for one name
//! cannot both register.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{Error, Result};
use crate::launcher::LaunchMode;
use crate::session::SessionHandle;
use crate::storage::{StorageProbe, validate_name};

/// Thread-safe table of live sessions by name.
pub struct Registry {
	sessions: DashMap<Arc<str>, Arc<SessionHandle>>,
	probe: Arc<dyn StorageProbe>,
	launch_mode: LaunchMode,
	call_timeout: Option<Duration>,
}

impl Registry {
	pub fn new(probe: Arc<dyn StorageProbe>) -> Self {
		Self {
			sessions: DashMap::new(),
			probe,
			launch_mode: LaunchMode::default(),
			call_timeout: None,
		}
	}

	pub fn with_launch_mode(mut self, mode: LaunchMode) -> Self {
		self.launch_mode = mode;
		self
	}

	pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.call_timeout = timeout;
		self
	}

	pub fn launch_mode(&self) -> &LaunchMode {
		&self.launch_mode
	}

	/// Synchronous lookup.
	pub fn resolve(&self, name: &str) -> Option<Arc<SessionHandle>> {
		self.sessions.get(name).map(|r| r.value().clone())
	}

	/// Like [`resolve`](Self::resolve), but absence is an error.
	pub fn get(&self, name: &str) -> Result<Arc<SessionHandle>> {
		self.resolve(name)
			.ok_or_else(|| Error::NoSession(name.to_string()))
	}

	pub fn contains(&self, name: &str) -> bool {
		self.sessions.contains_key(name)
	}

	/// Launches a context for `name` and registers it.
	///
	/// Fails with [`Error::AlreadyExists`] if a live session holds `name`;
	/// the existing session is left untouched and the context launched for
	/// this attempt is torn down. An entry whose context has exited is
	/// replaced. Must be called from within a tokio runtime.
	pub fn create(&self, name: &str) -> Result<Arc<SessionHandle>> {
		validate_name(name)?;
		if self.resolve(name).is_some_and(|handle| handle.is_alive()) {
			return Err(Error::AlreadyExists(name.to_string()));
		}

		let backend = self.probe.probe();
		let handle = Arc::new(SessionHandle::start(
			name,
			backend,
			&self.launch_mode,
			self.call_timeout,
		)?);

		match self.sessions.entry(Arc::from(name)) {
			Entry::Occupied(mut entry) => {
				if entry.get().is_alive() {
					tracing::debug!(session = %name, "Lost creation race, discarding new context");
					handle.terminate();
					return Err(Error::AlreadyExists(name.to_string()));
				}
				tracing::debug!(session = %name, "Replacing session whose context has exited");
				let dead = entry.insert(Arc::clone(&handle));
				dead.terminate();
				Ok(handle)
			}
			Entry::Vacant(entry) => {
				entry.insert(Arc::clone(&handle));
				Ok(handle)
			}
		}
	}

	/// Removes the entry for `name`, returning it if there was one.
	///
	/// The context keeps running until the handle is terminated or the last
	/// reference to it is dropped.
	pub fn remove(&self, name: &str) -> Option<Arc<SessionHandle>> {
		self.sessions.remove(name).map(|(_, handle)| handle)
	}

	/// Names of all registered sessions, sorted.
	pub fn names(&self) -> Vec<String> {
		let mut names: Vec<String> = self
			.sessions
			.iter()
			.map(|entry| entry.key().to_string())
			.collect();
		names.sort();
		names
	}

	pub fn len(&self) -> usize {
		self.sessions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.is_empty()
	}

	/// Terminates and unregisters every session.
	pub fn terminate_all(&self) {
		let names = self.names();
		for name in names {
			if let Some(handle) = self.remove(&name) {
				handle.terminate();
			}
		}
	}
}

impl Drop for Registry {
	fn drop(&mut self) {
		self.terminate_all();
	}
}
