//! Storage backends for execution contexts.
//!
//! Whether a context persists its database is decided once, when the context
//! is created, by asking a [`StorageProbe`]. A durable backend keeps one file
//! per session under a root directory (`<root>/<name>.sqlite3`); the
//! transient backend keeps the database in memory.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use sqlw_protocol::Backend;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Extension of database files written by the durable store.
pub const DB_EXTENSION: &str = "sqlite3";

/// File extensions accepted as database images on upload.
pub const DB_EXTENSION_ALIASES: [&str; 2] = ["sqlite", "sqlite3"];

/// Rejects names that cannot be used as a single file name.
pub fn validate_name(name: &str) -> Result<()> {
	let reason = if name.is_empty() {
		"name is empty"
	} else if name == "." || name == ".." {
		"name is a relative path component"
	} else if name.contains(['/', '\\', '\0']) {
		"name contains a path separator"
	} else {
		return Ok(());
	};

	Err(Error::InvalidName {
		name: name.to_string(),
		reason,
	})
}

/// Directory of database files, one per session name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableStore {
	root: PathBuf,
}

impl DurableStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Path of the database file for `name`, whether or not it exists.
	pub fn path_for(&self, name: &str) -> PathBuf {
		self.root.join(format!("{name}.{DB_EXTENSION}"))
	}

	/// Path of the database file for `name` if one has been persisted.
	pub fn lookup(&self, name: &str) -> Option<PathBuf> {
		let path = self.path_for(name);
		path.is_file().then_some(path)
	}

	/// Removes the database file for `name` along with any journal files.
	///
	/// Returns false if there was nothing to remove.
	pub fn remove(&self, name: &str) -> io::Result<bool> {
		let path = self.path_for(name);
		let removed = match fs::remove_file(&path) {
			Ok(()) => true,
			Err(e) if e.kind() == io::ErrorKind::NotFound => false,
			Err(e) => return Err(e),
		};

		for suffix in ["-journal", "-wal", "-shm"] {
			let mut sidecar = path.clone().into_os_string();
			sidecar.push(suffix);
			match fs::remove_file(PathBuf::from(sidecar)) {
				Ok(()) => {}
				Err(e) if e.kind() == io::ErrorKind::NotFound => {}
				Err(e) => return Err(e),
			}
		}

		Ok(removed)
	}

	/// Replaces the database file for `name` with `bytes`.
	///
	/// The image is written to a temporary file in the same directory and
	/// renamed into place, so a failed write never leaves a torn file behind.
	pub fn write_image(&self, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
		let staged = self.stage_image(bytes)?;
		self.commit_image(name, staged)
	}

	/// Writes `bytes` to a temporary file under the root without touching any
	/// session's database. The file is deleted when dropped uncommitted.
	pub fn stage_image(&self, bytes: &[u8]) -> io::Result<NamedTempFile> {
		fs::create_dir_all(&self.root)?;
		let mut staged = NamedTempFile::new_in(&self.root)?;
		staged.write_all(bytes)?;
		staged.as_file().sync_all()?;
		Ok(staged)
	}

	/// Renames a staged image into place as the database file for `name`.
	pub fn commit_image(&self, name: &str, staged: NamedTempFile) -> io::Result<PathBuf> {
		let path = self.path_for(name);
		staged.persist(&path).map_err(|e| e.error)?;
		Ok(path)
	}

	/// Names of all persisted databases, sorted.
	pub fn list(&self) -> io::Result<Vec<String>> {
		let entries = match fs::read_dir(&self.root) {
			Ok(entries) => entries,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e),
		};

		let mut names = Vec::new();
		for entry in entries {
			let path = entry?.path();
			if path.extension().and_then(|e| e.to_str()) != Some(DB_EXTENSION) {
				continue;
			}
			if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
				names.push(stem.to_string());
			}
		}
		names.sort();
		Ok(names)
	}
}

/// Backend a context is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
	Durable(DurableStore),
	Transient,
}

impl StorageBackend {
	pub fn kind(&self) -> Backend {
		match self {
			StorageBackend::Durable(_) => Backend::Durable,
			StorageBackend::Transient => Backend::Transient,
		}
	}

	pub fn durable(&self) -> Option<&DurableStore> {
		match self {
			StorageBackend::Durable(store) => Some(store),
			StorageBackend::Transient => None,
		}
	}
}

/// Capability probe consulted once per context creation.
pub trait StorageProbe: Send + Sync {
	fn probe(&self) -> StorageBackend;
}

/// Durable storage under `root` when the directory can be created and
/// written to, transient otherwise.
#[derive(Debug, Clone)]
pub struct DirectoryProbe {
	root: PathBuf,
}

impl DirectoryProbe {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}
}

impl StorageProbe for DirectoryProbe {
	fn probe(&self) -> StorageBackend {
		let writable = fs::create_dir_all(&self.root)
			.and_then(|()| tempfile::tempfile_in(&self.root))
			.map(drop);

		match writable {
			Ok(()) => StorageBackend::Durable(DurableStore::new(&self.root)),
			Err(e) => {
				tracing::warn!(
					root = %self.root.display(),
					"Durable storage unavailable, falling back to transient: {}",
					e
				);
				StorageBackend::Transient
			}
		}
	}
}

/// Always selects the in-memory backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientProbe;

impl StorageProbe for TransientProbe {
	fn probe(&self) -> StorageBackend {
		StorageBackend::Transient
	}
}
