//! Error types for the sqlw runtime.

use sqlw_protocol::{ErrorKind, ErrorPayload};
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing sessions and talking to contexts.
#[derive(Debug, Error)]
pub enum Error {
	/// A session with this name is already registered.
	#[error("Session already exists: {0}")]
	AlreadyExists(String),

	/// No session is registered under this name.
	#[error("No session named '{0}'")]
	NoSession(String),

	/// Session name cannot be used as a storage file name.
	#[error("Invalid session name '{name}': {reason}")]
	InvalidName { name: String, reason: &'static str },

	/// Uploaded file does not carry a recognized database extension.
	#[error("Unsupported extension for '{file_name}' (expected .sqlite or .sqlite3)")]
	UnsupportedExtension { file_name: String },

	/// Session is being closed and accepts no further work.
	#[error("Session '{0}' is closing")]
	SessionClosing(String),

	/// Session context has been torn down.
	#[error("Session '{0}' has been terminated")]
	SessionTerminated(String),

	/// Failed to start an execution context.
	#[error("Failed to launch execution context: {0}")]
	LaunchFailed(String),

	/// Transport-level error (framing, pipe I/O).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Protocol-level error (unexpected or malformed message).
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// Channel closed before a response arrived.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Typed failure reported by an execution context.
	#[error("{kind}: {message}")]
	Remote { kind: ErrorKind, message: String },

	/// Timeout waiting for a response.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// Caller cancelled the pending call.
	#[error("Call cancelled: {0}")]
	Cancelled(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Returns the remote error kind if a context reported this failure.
	pub fn kind(&self) -> Option<ErrorKind> {
		match self {
			Error::Remote { kind, .. } => Some(*kind),
			_ => None,
		}
	}

	/// Returns true if the failure came from the transport rather than the engine.
	pub fn is_channel_error(&self) -> bool {
		matches!(self, Error::ChannelClosed | Error::TransportError(_))
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_))
	}

	/// Returns true if a constraint failed inside the engine.
	pub fn is_constraint_violation(&self) -> bool {
		self.kind() == Some(ErrorKind::EngineConstraintViolation)
	}
}

impl From<ErrorPayload> for Error {
	fn from(payload: ErrorPayload) -> Self {
		Error::Remote {
			kind: payload.kind,
			message: payload.message,
		}
	}
}
