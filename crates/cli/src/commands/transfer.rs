//! Moving database images in and out of sessions.

use std::path::{Path, PathBuf};

use anyhow::Context;
use sqlw::{Error, Sessions, SessionsConfig};

use crate::error::{Result, SqlwCliError};
use crate::output::{CommandInputs, ExportData, ImportData, OutputFormat, ResultBuilder, print_result};

pub async fn import(
	sessions: &Sessions,
	file: &Path,
	name: Option<&str>,
	format: OutputFormat,
) -> Result<()> {
	let builder = ResultBuilder::new("import");
	let file_name = upload_file_name(file, name)?;

	let bytes = tokio::fs::read(file)
		.await
		.with_context(|| format!("reading {}", file.display()))?;

	let session = sqlw::parse_upload_name(&file_name)?.to_string();
	let imported = sessions.upload_db(&file_name, bytes).await?;

	let result = builder
		.inputs(CommandInputs {
			session: Some(session.clone()),
			path: Some(file.to_path_buf()),
			..Default::default()
		})
		.data(ImportData {
			session,
			size_bytes: imported.size,
			message: imported.message,
		})
		.build();
	print_result(&result, format);
	Ok(())
}

/// File name handed to the controller: the file's own name, or `name` with
/// the file's extension when importing under another session name.
fn upload_file_name(file: &Path, name: Option<&str>) -> Result<String> {
	let own = file
		.file_name()
		.and_then(|n| n.to_str())
		.ok_or_else(|| SqlwCliError::InvalidInput(format!("not a file name: {}", file.display())))?;

	Ok(match name {
		Some(name) => {
			let extension = file.extension().and_then(|e| e.to_str()).unwrap_or_default();
			format!("{name}.{extension}")
		}
		None => own.to_string(),
	})
}

pub async fn export(
	sessions: &Sessions,
	config: &SessionsConfig,
	session: &str,
	output: Option<PathBuf>,
	format: OutputFormat,
) -> Result<()> {
	let builder = ResultBuilder::new("export");

	// exporting a name that was never persisted would only create an empty file
	if let Some(store) = config.store() {
		if store.lookup(session).is_none() {
			return Err(Error::NoSession(session.to_string()).into());
		}
	}

	let mut downloads = sessions
		.subscribe_downloads()
		.ok_or_else(|| SqlwCliError::MissingSnapshot(session.to_string()))?;

	sessions.create_db(session).await?;
	sessions.download_db(session).await?;

	let message = downloads
		.recv()
		.await
		.map_err(|_| SqlwCliError::MissingSnapshot(session.to_string()))?;

	let path = output.unwrap_or_else(|| PathBuf::from(message.file_name()));
	tokio::fs::write(&path, message.snapshot.as_bytes())
		.await
		.map_err(|source| SqlwCliError::Write {
			path: path.clone(),
			source,
		})?;
	tracing::info!(session = %session, path = %path.display(), "Snapshot written");

	let result = builder
		.inputs(CommandInputs {
			session: Some(session.to_string()),
			path: Some(path.clone()),
			..Default::default()
		})
		.data(ExportData {
			session: message.session,
			path,
			mime_type: message.mime_type.to_string(),
			size_bytes: message.snapshot.len() as u64,
		})
		.build();
	print_result(&result, format);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_upload_file_name() {
		let file = Path::new("/data/orders.sqlite");
		assert_eq!(upload_file_name(file, None).unwrap(), "orders.sqlite");
		assert_eq!(upload_file_name(file, Some("copy")).unwrap(), "copy.sqlite");
		// the extension check still applies to renamed imports
		assert_eq!(upload_file_name(Path::new("notes"), Some("copy")).unwrap(), "copy.");
	}
}
