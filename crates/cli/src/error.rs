use std::path::PathBuf;

use sqlw::ErrorKind;
use thiserror::Error;

use crate::output::{CommandError, ErrorCode};

pub type Result<T> = std::result::Result<T, SqlwCliError>;

#[derive(Debug, Error)]
pub enum SqlwCliError {
	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error("failed to write {path}")]
	Write {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("no snapshot was published for session '{0}'")]
	MissingSnapshot(String),

	#[error(transparent)]
	Sqlw(#[from] sqlw::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl SqlwCliError {
	pub fn code(&self) -> ErrorCode {
		match self {
			SqlwCliError::InvalidInput(_) => ErrorCode::InvalidInput,
			SqlwCliError::Write { .. } | SqlwCliError::Io(_) => ErrorCode::IoError,
			SqlwCliError::MissingSnapshot(_) => ErrorCode::InternalError,
			SqlwCliError::Sqlw(err) => sqlw_error_code(err),
			SqlwCliError::Json(_) => ErrorCode::InvalidInput,
			SqlwCliError::Anyhow(err) => match err.downcast_ref::<std::io::Error>() {
				Some(_) => ErrorCode::IoError,
				None => ErrorCode::InternalError,
			},
		}
	}

	pub fn to_command_error(&self) -> CommandError {
		let details = match self {
			SqlwCliError::Sqlw(sqlw::Error::Remote { kind, .. }) => {
				Some(serde_json::json!({ "kind": kind.as_str() }))
			}
			SqlwCliError::Write { path, .. } => Some(serde_json::json!({ "path": path })),
			_ => None,
		};

		// anyhow chains carry the useful context in their sources
		let message = match self {
			SqlwCliError::Anyhow(err) => format!("{err:#}"),
			SqlwCliError::Write { path, source } => {
				format!("failed to write {}: {source}", path.display())
			}
			other => other.to_string(),
		};

		CommandError {
			code: self.code(),
			message,
			details,
		}
	}
}

fn sqlw_error_code(err: &sqlw::Error) -> ErrorCode {
	use sqlw::Error;

	match err {
		Error::AlreadyExists(_) => ErrorCode::AlreadyExists,
		Error::NoSession(_) => ErrorCode::NoSession,
		Error::InvalidName { .. } => ErrorCode::InvalidName,
		Error::UnsupportedExtension { .. } => ErrorCode::UnsupportedExtension,
		Error::SessionClosing(_) | Error::SessionTerminated(_) => ErrorCode::SessionUnavailable,
		Error::LaunchFailed(_) => ErrorCode::LaunchFailed,
		Error::TransportError(_) | Error::ProtocolError(_) | Error::ChannelClosed => {
			ErrorCode::ChannelError
		}
		Error::Remote { kind, .. } => match kind {
			ErrorKind::StorageUnsupported => ErrorCode::StorageUnsupported,
			ErrorKind::ImportError => ErrorCode::ImportError,
			ErrorKind::EngineConstraintViolation => ErrorCode::ConstraintViolation,
			ErrorKind::OutOfMemoryOnExport => ErrorCode::OutOfMemory,
			ErrorKind::NoDatabase => ErrorCode::NoDatabase,
			ErrorKind::Engine => ErrorCode::EngineError,
			ErrorKind::Protocol => ErrorCode::ChannelError,
		},
		Error::Timeout(_) => ErrorCode::Timeout,
		Error::Cancelled(_) => ErrorCode::Cancelled,
		Error::Io(_) => ErrorCode::IoError,
		Error::Json(_) => ErrorCode::InternalError,
	}
}
