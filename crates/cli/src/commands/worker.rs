use std::path::PathBuf;

use sqlw_runtime::{DurableStore, StorageBackend};

use crate::error::Result;

/// Serves session `name` over stdio for a parent controller.
///
/// The parent has already probed storage, so `root` is trusted as is.
pub async fn execute(name: &str, root: Option<PathBuf>) -> Result<()> {
	let backend = match root {
		Some(root) => StorageBackend::Durable(DurableStore::new(root)),
		None => StorageBackend::Transient,
	};

	tracing::debug!(session = %name, backend = ?backend.kind(), "Worker starting");
	sqlw_runtime::serve_stdio(name, backend).await?;
	tracing::debug!(session = %name, "Worker exiting");
	Ok(())
}
