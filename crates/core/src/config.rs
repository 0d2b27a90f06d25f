//! Controller configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sqlw_runtime::{DirectoryProbe, DurableStore, LaunchMode, StorageProbe, TransientProbe};

/// Default capacity of each broadcast topic.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 16;

/// Settings for a [`Sessions`](crate::Sessions) controller.
///
/// ```ignore
/// let config = SessionsConfig::default()
///     .with_storage_root("/var/lib/sqlw")
///     .with_call_timeout(Some(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone)]
pub struct SessionsConfig {
	/// Directory for durable databases; `None` keeps every session in memory.
	pub storage_root: Option<PathBuf>,
	/// Upper bound on how long any single call waits for its response.
	pub call_timeout: Option<Duration>,
	/// Where execution contexts run.
	pub launch_mode: LaunchMode,
	/// Messages buffered per broadcast topic before slow listeners lag.
	pub broadcast_capacity: usize,
}

impl Default for SessionsConfig {
	fn default() -> Self {
		Self {
			storage_root: None,
			call_timeout: None,
			launch_mode: LaunchMode::Thread,
			broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
		}
	}
}

impl SessionsConfig {
	pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
		self.storage_root = Some(root.into());
		self
	}

	/// Keeps every session in memory.
	pub fn transient(mut self) -> Self {
		self.storage_root = None;
		self
	}

	pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.call_timeout = timeout;
		self
	}

	pub fn with_launch_mode(mut self, mode: LaunchMode) -> Self {
		self.launch_mode = mode;
		self
	}

	pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
		self.broadcast_capacity = capacity.max(1);
		self
	}

	/// Storage probe matching `storage_root`.
	pub fn probe(&self) -> Arc<dyn StorageProbe> {
		match &self.storage_root {
			Some(root) => Arc::new(DirectoryProbe::new(root)),
			None => Arc::new(TransientProbe),
		}
	}

	/// Durable store matching `storage_root`, if any.
	pub fn store(&self) -> Option<DurableStore> {
		self.storage_root.as_ref().map(DurableStore::new)
	}
}
